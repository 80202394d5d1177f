//! Object store: fingerprint lookups, visibility-filtered access and
//! create-or-reuse deduplication.

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

use crate::auth::Viewer;
use crate::digest::{config_dhash, sha256_hex, FileDigests};
use crate::errors::{VaultError, VaultResult};
use crate::models::{
    BlobAttrs, ConfigAttrs, ConfigFamilyStats, FileAttrs, NewObject, ObjectKind, ObjectRecord,
    ObjectType,
};
use crate::query::guards::PAGE_SIZE;
use crate::query::pagination::boundary;
use crate::query::predicate::Predicate;
use crate::store::database::timestamp_now;
use crate::store::tags;

/// Columns hydrating an [`ObjectRecord`], in [`object_from_row`] order.
/// The last one is [`tags::TAGS_COLUMN`].
pub const OBJECT_COLUMNS: &str = "o.id, o.dhash, o.type, o.upload_time, \
     f.file_name, f.file_size, f.file_type, f.md5, f.sha1, f.sha256, f.sha512, f.crc32, \
     c.family, c.config_type, c.cfg, \
     b.blob_name, b.blob_type, b.blob_size, b.content, b.last_seen, \
     (SELECT GROUP_CONCAT(tg.tag, ',') FROM tags tg WHERE tg.object_id = o.id)";

/// Row source every object query selects from.
pub const OBJECT_SOURCE: &str = "objects o \
     LEFT JOIN files f ON f.object_id = o.id \
     LEFT JOIN configs c ON c.object_id = o.id \
     LEFT JOIN blobs b ON b.object_id = o.id";

/// Default `config_type` for uploaded configs.
pub const DEFAULT_CONFIG_TYPE: &str = "static";

/// Default `file_type` when the caller did not classify the content.
pub const DEFAULT_FILE_TYPE: &str = "data";

/// Hydrate an object from a row selected with [`OBJECT_COLUMNS`].
pub fn object_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ObjectRecord> {
    let type_tag: String = row.get(2)?;
    let object_type = ObjectType::try_from(type_tag.as_str())
        .map_err(|_| rusqlite::Error::InvalidColumnType(2, "type".into(), Type::Text))?;
    let kind = match object_type {
        ObjectType::File => ObjectKind::File(FileAttrs {
            file_name: row.get(4)?,
            file_size: row.get(5)?,
            file_type: row.get(6)?,
            md5: row.get(7)?,
            sha1: row.get(8)?,
            sha256: row.get(9)?,
            sha512: row.get(10)?,
            crc32: row.get(11)?,
        }),
        ObjectType::Config => {
            let raw: String = row.get(14)?;
            let cfg = serde_json::from_str(&raw)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(14, Type::Text, Box::new(e)))?;
            ObjectKind::Config(ConfigAttrs {
                family: row.get(12)?,
                config_type: row.get(13)?,
                cfg,
            })
        }
        ObjectType::Blob => ObjectKind::Blob(BlobAttrs {
            blob_name: row.get(15)?,
            blob_type: row.get(16)?,
            blob_size: row.get(17)?,
            content: row.get(18)?,
            last_seen: row.get(19)?,
        }),
        ObjectType::Object => {
            return Err(rusqlite::Error::InvalidColumnType(2, "type".into(), Type::Text))
        }
    };
    Ok(ObjectRecord {
        id: row.get(0)?,
        dhash: row.get(1)?,
        upload_time: row.get(3)?,
        tags: tags::split_tags(row.get(20)?),
        kind,
    })
}

fn select_one(conn: &Connection, filter: &str, key: &dyn rusqlite::ToSql) -> VaultResult<Option<ObjectRecord>> {
    let sql = format!("SELECT {OBJECT_COLUMNS} FROM {OBJECT_SOURCE} WHERE {filter} LIMIT 1;");
    let record = conn.query_row(&sql, [key], object_from_row).optional()?;
    Ok(record)
}

/// Unfiltered lookup by fingerprint. Never expose the result to a caller
/// without a visibility check.
pub fn get_by_dhash(conn: &Connection, dhash: &str) -> VaultResult<Option<ObjectRecord>> {
    select_one(conn, "o.dhash = ?1", &dhash)
}

/// Resolve an identifier to an unfiltered record of the requested type.
///
/// Files may also be addressed by their md5, sha1 or sha512 digest.
fn lookup(conn: &Connection, object_type: ObjectType, identifier: &str) -> VaultResult<Option<ObjectRecord>> {
    let identifier = identifier.trim().to_lowercase();
    let record = if object_type.admits(ObjectType::File) {
        let column = match identifier.len() {
            32 => Some("f.md5"),
            40 => Some("f.sha1"),
            128 => Some("f.sha512"),
            _ => None,
        };
        match column {
            Some(column) => select_one(conn, &format!("{column} = ?1"), &identifier)?,
            None => get_by_dhash(conn, &identifier)?,
        }
    } else {
        get_by_dhash(conn, &identifier)?
    };
    Ok(record.filter(|r| object_type.admits(r.object_type())))
}

/// Is the object with row id `object_id` visible to `viewer`?
pub fn object_visible(conn: &Connection, viewer: &Viewer, object_id: i64) -> VaultResult<bool> {
    let mut rendered = Predicate::visible("o").render(viewer);
    let placeholder = rendered.bind(object_id);
    let sql = format!(
        "SELECT EXISTS (SELECT 1 FROM objects o WHERE o.id = {placeholder} AND {});",
        rendered.sql
    );
    let visible: bool = conn.query_row(&sql, rendered.param_refs().as_slice(), |row| row.get(0))?;
    Ok(visible)
}

/// Resolve `identifier` as `viewer`.
///
/// Returns `None` both when the object does not exist, has another type, or
/// is not visible; the three cases are indistinguishable to the caller.
pub fn access(
    conn: &Connection,
    viewer: &Viewer,
    object_type: ObjectType,
    identifier: &str,
) -> VaultResult<Option<ObjectRecord>> {
    match lookup(conn, object_type, identifier)? {
        Some(record) if object_visible(conn, viewer, record.id)? => Ok(Some(record)),
        _ => Ok(None),
    }
}

/// Variant row contents prepared from an upload.
enum Prepared<'a> {
    File {
        name: &'a str,
        size: i64,
        file_type: &'a str,
        digests: FileDigests,
    },
    Config {
        family: &'a str,
        config_type: &'a str,
        cfg: String,
    },
    Blob {
        name: &'a str,
        blob_type: &'a str,
        content: &'a str,
    },
}

fn prepare(new: &NewObject) -> VaultResult<(String, Prepared<'_>)> {
    match new {
        NewObject::File(file) => {
            if file.content.is_empty() {
                return Err(VaultError::EmptyFile);
            }
            let digests = FileDigests::compute(&file.content);
            Ok((
                digests.sha256.clone(),
                Prepared::File {
                    name: &file.file_name,
                    size: file.content.len() as i64,
                    file_type: file.file_type.as_deref().unwrap_or(DEFAULT_FILE_TYPE),
                    digests,
                },
            ))
        }
        NewObject::Config(config) => Ok((
            config_dhash(&config.cfg)?,
            Prepared::Config {
                family: &config.family,
                config_type: config.config_type.as_deref().unwrap_or(DEFAULT_CONFIG_TYPE),
                cfg: serde_json::to_string(&config.cfg)?,
            },
        )),
        NewObject::Blob(blob) => Ok((
            sha256_hex(blob.content.as_bytes()),
            Prepared::Blob {
                name: &blob.blob_name,
                blob_type: &blob.blob_type,
                content: &blob.content,
            },
        )),
    }
}

fn insert_variant(conn: &Connection, object_id: i64, prepared: &Prepared<'_>, now: &str) -> VaultResult<()> {
    match prepared {
        Prepared::File {
            name,
            size,
            file_type,
            digests,
        } => {
            conn.execute(
                "INSERT INTO files(object_id, file_name, file_size, file_type, md5, sha1, sha256, sha512, crc32) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9);",
                params![
                    object_id,
                    name,
                    size,
                    file_type,
                    digests.md5,
                    digests.sha1,
                    digests.sha256,
                    digests.sha512,
                    digests.crc32
                ],
            )?;
        }
        Prepared::Config {
            family,
            config_type,
            cfg,
        } => {
            conn.execute(
                "INSERT INTO configs(object_id, family, config_type, cfg) VALUES (?1, ?2, ?3, ?4);",
                params![object_id, family, config_type, cfg],
            )?;
        }
        Prepared::Blob {
            name,
            blob_type,
            content,
        } => {
            conn.execute(
                "INSERT INTO blobs(object_id, blob_name, blob_type, blob_size, content, last_seen) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
                params![object_id, name, blob_type, content.len() as i64, content, now],
            )?;
        }
    }
    Ok(())
}

/// Insert `new`, or reuse the record already holding its fingerprint.
///
/// Returns the record and whether it was newly created. A reused record
/// gets a fresh `upload_time` (and `last_seen` for blobs); its fingerprint
/// and variant never change. Must run inside the caller's transaction.
pub fn create_or_reuse(conn: &Connection, new: &NewObject) -> VaultResult<(ObjectRecord, bool)> {
    let (dhash, prepared) = prepare(new)?;
    let object_type = new.object_type();
    let now = timestamp_now();

    // The UNIQUE(dhash) constraint arbitrates concurrent uploads: whoever
    // loses the insert re-reads and reuses the winner's row.
    let inserted = conn.execute(
        "INSERT INTO objects(dhash, type, upload_time) VALUES (?1, ?2, ?3) \
         ON CONFLICT(dhash) DO NOTHING;",
        params![dhash, object_type.as_str(), now],
    )?;

    let is_new = inserted == 1;
    if is_new {
        let object_id = conn.last_insert_rowid();
        insert_variant(conn, object_id, &prepared, &now)?;
    } else {
        let existing = get_by_dhash(conn, &dhash)?
            .ok_or_else(|| VaultError::not_found(format!("Object {dhash}")))?;
        if existing.object_type() != object_type {
            return Err(VaultError::ObjectTypeConflict {
                dhash,
                expected: object_type.to_string(),
            });
        }
        conn.execute(
            "UPDATE objects SET upload_time = ?1 WHERE id = ?2;",
            params![now, existing.id],
        )?;
        if object_type == ObjectType::Blob {
            conn.execute(
                "UPDATE blobs SET last_seen = ?1 WHERE object_id = ?2;",
                params![now, existing.id],
            )?;
        }
    }

    let record = get_by_dhash(conn, &dhash)?
        .ok_or_else(|| VaultError::not_found(format!("Object {dhash}")))?;
    Ok((record, is_new))
}

/// Filter of [`list`]: the type tag, then `query`, then visibility, then
/// the boundary after `cursor`.
pub fn list_filter(
    object_type: ObjectType,
    query: Predicate,
    cursor: Option<&ObjectRecord>,
) -> Predicate {
    let type_filter = if object_type.is_concrete() {
        Predicate::sql("o.type = ").push_param(object_type.as_str().to_string())
    } else {
        Predicate::always()
    };
    Predicate::all([
        type_filter,
        query,
        Predicate::visible("o"),
        cursor.map(boundary).unwrap_or_else(Predicate::always),
    ])
}

/// One page of objects of `object_type` matching `query`, newest first,
/// continuing after `cursor` when given.
pub fn list(
    conn: &Connection,
    viewer: &Viewer,
    object_type: ObjectType,
    query: Predicate,
    cursor: Option<&ObjectRecord>,
    offset: Option<i64>,
) -> VaultResult<Vec<ObjectRecord>> {
    let mut rendered = list_filter(object_type, query, cursor).render(viewer);
    let limit = rendered.bind(PAGE_SIZE);
    let offset = rendered.bind(offset.unwrap_or(0));
    let sql = format!(
        "SELECT {OBJECT_COLUMNS} FROM {OBJECT_SOURCE} WHERE {} \
         ORDER BY o.id DESC LIMIT {limit} OFFSET {offset};",
        rendered.sql
    );
    let mut stmt = conn.prepare(&sql)?;
    let records = stmt
        .query_map(rendered.param_refs().as_slice(), object_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(records)
}

/// Per-family config counts and latest upload, over configs visible to
/// `viewer` and uploaded after `since` (all when `None`).
pub fn config_stats(
    conn: &Connection,
    viewer: &Viewer,
    since: Option<&str>,
) -> VaultResult<Vec<ConfigFamilyStats>> {
    let mut filter = Predicate::visible("o");
    if let Some(since) = since {
        filter = filter.and(Predicate::sql("o.upload_time > ").push_param(since.to_string()));
    }
    let rendered = filter.render(viewer);
    let sql = format!(
        "SELECT c.family, MAX(o.upload_time), COUNT(*) FROM objects o \
         JOIN configs c ON c.object_id = o.id \
         WHERE {} GROUP BY c.family ORDER BY c.family ASC;",
        rendered.sql
    );
    let mut stmt = conn.prepare(&sql)?;
    let stats = stmt
        .query_map(rendered.param_refs().as_slice(), |row| {
            Ok(ConfigFamilyStats {
                family: row.get(0)?,
                last_upload: row.get(1)?,
                count: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(stats)
}
