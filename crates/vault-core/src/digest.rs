//! Content fingerprints used for deduplication and file metadata.

use std::collections::BTreeMap;

use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

use crate::errors::{VaultError, VaultResult};

/// Hex SHA-256 of arbitrary bytes. This is the `dhash` of files and blobs.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Full set of file digests computed at upload time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileDigests {
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
    pub sha512: String,
    pub crc32: String,
}

impl FileDigests {
    pub fn compute(data: &[u8]) -> Self {
        let mut sha1 = Sha1::new();
        sha1.update(data);
        let mut sha512 = Sha512::new();
        sha512.update(data);
        Self {
            md5: format!("{:x}", md5::compute(data)),
            sha1: format!("{:x}", sha1.finalize()),
            sha256: sha256_hex(data),
            sha512: format!("{:x}", sha512.finalize()),
            crc32: format!("{:08x}", crc32fast::hash(data)),
        }
    }
}

/// Serialise a JSON value with object keys sorted at every level.
pub fn canonical_json(value: &serde_json::Value) -> VaultResult<String> {
    fn sorted(value: &serde_json::Value) -> serde_json::Value {
        match value {
            serde_json::Value::Object(map) => {
                let ordered: BTreeMap<&String, serde_json::Value> =
                    map.iter().map(|(k, v)| (k, sorted(v))).collect();
                serde_json::Value::Object(
                    ordered.into_iter().map(|(k, v)| (k.clone(), v)).collect(),
                )
            }
            serde_json::Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(sorted).collect())
            }
            other => other.clone(),
        }
    }
    Ok(serde_json::to_string(&sorted(value))?)
}

/// Fingerprint of a config payload: SHA-256 of its canonical JSON.
pub fn config_dhash(cfg: &serde_json::Value) -> VaultResult<String> {
    if !cfg.is_object() {
        return Err(VaultError::Validation(
            "Config payload must be a JSON object".to_string(),
        ));
    }
    Ok(sha256_hex(canonical_json(cfg)?.as_bytes()))
}
