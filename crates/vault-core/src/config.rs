//! Runtime configuration, read from `VAULT_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

/// Default name of the group every user joins on registration.
pub const DEFAULT_PUBLIC_GROUP: &str = "public";

#[derive(Clone, Debug, PartialEq)]
pub struct VaultConfig {
    pub db_path: PathBuf,
    pub busy_timeout_ms: u64,
    pub query_cache_entries: usize,
    pub query_cache_ttl_seconds: f64,
    /// Group excluded from `upload_as = "*"` and joined by new users.
    pub public_group: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("vault.db"),
            busy_timeout_ms: 10_000,
            query_cache_entries: 512,
            query_cache_ttl_seconds: 15.0,
            public_group: DEFAULT_PUBLIC_GROUP.to_string(),
        }
    }
}

impl VaultConfig {
    /// Build a configuration from the environment, falling back to defaults
    /// for unset or unparseable values.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            db_path: env_string("VAULT_DB_PATH")
                .map(|p| expand_tilde(&p))
                .unwrap_or(defaults.db_path),
            busy_timeout_ms: env_parse("VAULT_BUSY_TIMEOUT_MS").unwrap_or(defaults.busy_timeout_ms),
            query_cache_entries: env_parse("VAULT_QUERY_CACHE_ENTRIES")
                .unwrap_or(defaults.query_cache_entries),
            query_cache_ttl_seconds: env_parse("VAULT_QUERY_CACHE_TTL")
                .unwrap_or(defaults.query_cache_ttl_seconds),
            public_group: env_string("VAULT_PUBLIC_GROUP").unwrap_or(defaults.public_group),
        }
    }

    /// Configuration for a database at `db_path`, defaults elsewhere.
    pub fn with_db_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Self::default()
        }
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_string(name).and_then(|v| v.parse::<T>().ok())
}

/// Expand a leading `~` to the user's home directory.
pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            let mut expanded = PathBuf::from(home);
            if path.len() > 2 {
                expanded.push(&path[2..]);
            }
            return expanded;
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = VaultConfig::default();
        assert_eq!(config.public_group, "public");
        assert_eq!(config.busy_timeout(), Duration::from_secs(10));
        assert!(config.query_cache_entries > 0);
    }

    #[test]
    fn tilde_is_expanded_against_home() {
        if let Some(home) = std::env::var_os("HOME") {
            assert_eq!(expand_tilde("~/x.db"), PathBuf::from(home).join("x.db"));
        }
        assert_eq!(expand_tilde("/tmp/x.db"), PathBuf::from("/tmp/x.db"));
    }

    #[test]
    fn with_db_path_keeps_other_defaults() {
        let config = VaultConfig::with_db_path("/tmp/vault-test.db");
        assert_eq!(config.db_path, PathBuf::from("/tmp/vault-test.db"));
        assert_eq!(config.public_group, DEFAULT_PUBLIC_GROUP);
    }
}
