//! SQLite schema DDL and version stamp.

use rusqlite::{params, Connection, OptionalExtension};

use crate::errors::{VaultError, VaultResult};

/// Version stamped into `vault_meta` by [`ensure_version`].
pub const SCHEMA_VERSION: i32 = 1;

/// Core DDL statements: 16 CREATE TABLE + 9 CREATE INDEX.
///
/// Executed with `CREATE … IF NOT EXISTS` so they are safe to replay on an
/// already-initialised database.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    // ── tables (16) ─────────────────────────────────────────────────────
    "CREATE TABLE IF NOT EXISTS vault_meta (
        key TEXT PRIMARY KEY,
        value TEXT
    );",
    "CREATE TABLE IF NOT EXISTS objects (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        dhash TEXT NOT NULL UNIQUE,
        type TEXT NOT NULL CHECK (type IN ('file', 'config', 'blob')),
        upload_time TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS files (
        object_id INTEGER PRIMARY KEY REFERENCES objects(id),
        file_name TEXT NOT NULL,
        file_size INTEGER NOT NULL,
        file_type TEXT NOT NULL,
        md5 TEXT NOT NULL,
        sha1 TEXT NOT NULL,
        sha256 TEXT NOT NULL,
        sha512 TEXT NOT NULL,
        crc32 TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS configs (
        object_id INTEGER PRIMARY KEY REFERENCES objects(id),
        family TEXT NOT NULL,
        config_type TEXT NOT NULL,
        cfg TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS blobs (
        object_id INTEGER PRIMARY KEY REFERENCES objects(id),
        blob_name TEXT NOT NULL,
        blob_type TEXT NOT NULL,
        blob_size INTEGER NOT NULL,
        content TEXT NOT NULL,
        last_seen TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS relations (
        parent_id INTEGER NOT NULL REFERENCES objects(id),
        child_id INTEGER NOT NULL REFERENCES objects(id),
        creation_time TEXT NOT NULL,
        PRIMARY KEY(parent_id, child_id),
        CHECK (parent_id <> child_id)
    );",
    "CREATE TABLE IF NOT EXISTS access_groups (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        pending_group INTEGER NOT NULL DEFAULT 0,
        private INTEGER NOT NULL DEFAULT 0
    );",
    "CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        login TEXT NOT NULL UNIQUE,
        registered_on TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    "CREATE TABLE IF NOT EXISTS members (
        group_id INTEGER NOT NULL REFERENCES access_groups(id),
        user_id INTEGER NOT NULL REFERENCES users(id),
        PRIMARY KEY(group_id, user_id)
    );",
    "CREATE TABLE IF NOT EXISTS group_capabilities (
        group_id INTEGER NOT NULL REFERENCES access_groups(id),
        capability TEXT NOT NULL,
        PRIMARY KEY(group_id, capability)
    );",
    "CREATE TABLE IF NOT EXISTS permissions (
        object_id INTEGER NOT NULL REFERENCES objects(id),
        group_id INTEGER NOT NULL REFERENCES access_groups(id),
        access_time TEXT NOT NULL,
        reason_type TEXT NOT NULL,
        related_object_id INTEGER NOT NULL REFERENCES objects(id),
        related_user_id INTEGER NOT NULL REFERENCES users(id),
        PRIMARY KEY(object_id, group_id)
    );",
    "CREATE TABLE IF NOT EXISTS metakey_definitions (
        key TEXT PRIMARY KEY,
        label TEXT,
        description TEXT,
        url_template TEXT,
        hidden INTEGER NOT NULL DEFAULT 0
    );",
    "CREATE TABLE IF NOT EXISTS metakey_permissions (
        key TEXT NOT NULL REFERENCES metakey_definitions(key),
        group_id INTEGER NOT NULL REFERENCES access_groups(id),
        can_read INTEGER NOT NULL DEFAULT 0,
        can_set INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY(key, group_id)
    );",
    "CREATE TABLE IF NOT EXISTS metakeys (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        object_id INTEGER NOT NULL REFERENCES objects(id),
        key TEXT NOT NULL REFERENCES metakey_definitions(key),
        value TEXT NOT NULL,
        UNIQUE(object_id, key, value)
    );",
    "CREATE TABLE IF NOT EXISTS tags (
        object_id INTEGER NOT NULL REFERENCES objects(id),
        tag TEXT NOT NULL,
        PRIMARY KEY(object_id, tag)
    );",
    "CREATE TABLE IF NOT EXISTS comments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        object_id INTEGER NOT NULL REFERENCES objects(id),
        author_id INTEGER NOT NULL REFERENCES users(id),
        comment TEXT NOT NULL,
        timestamp TEXT NOT NULL
    );",
    // ── indexes (9) ─────────────────────────────────────────────────────
    "CREATE INDEX IF NOT EXISTS idx_objects_type_id ON objects(type, id DESC);",
    "CREATE INDEX IF NOT EXISTS idx_relations_child ON relations(child_id);",
    "CREATE INDEX IF NOT EXISTS idx_permissions_group ON permissions(group_id, object_id);",
    "CREATE INDEX IF NOT EXISTS idx_members_user ON members(user_id);",
    "CREATE INDEX IF NOT EXISTS idx_files_name ON files(file_name);",
    "CREATE INDEX IF NOT EXISTS idx_metakeys_key_value ON metakeys(key, value);",
    "CREATE INDEX IF NOT EXISTS idx_configs_family ON configs(family);",
    "CREATE INDEX IF NOT EXISTS idx_tags_tag ON tags(tag);",
    "CREATE INDEX IF NOT EXISTS idx_comments_object ON comments(object_id, id);",
];

/// Stored schema version, if the database was initialised before.
pub fn stored_version(conn: &Connection) -> VaultResult<Option<String>> {
    let version = conn
        .query_row(
            "SELECT value FROM vault_meta WHERE key = 'schema_version';",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(version)
}

/// Record [`SCHEMA_VERSION`] on a fresh database, or refuse one written by
/// another version.
pub fn ensure_version(conn: &Connection) -> VaultResult<()> {
    match stored_version(conn)? {
        None => {
            conn.execute(
                "INSERT INTO vault_meta(key, value) VALUES ('schema_version', ?1);",
                params![SCHEMA_VERSION.to_string()],
            )?;
        }
        Some(found) if found == SCHEMA_VERSION.to_string() => {}
        Some(found) => {
            return Err(VaultError::SchemaVersion {
                found,
                expected: SCHEMA_VERSION,
            })
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        for stmt in SCHEMA_STATEMENTS {
            conn.execute_batch(stmt).unwrap();
        }
        conn
    }

    #[test]
    fn schema_statement_counts() {
        // 16 tables + 9 indexes
        assert_eq!(SCHEMA_STATEMENTS.len(), 25);
    }

    #[test]
    fn version_is_stamped_once() {
        let conn = fresh();
        assert_eq!(stored_version(&conn).unwrap(), None);
        ensure_version(&conn).unwrap();
        ensure_version(&conn).unwrap();
        assert_eq!(
            stored_version(&conn).unwrap(),
            Some(SCHEMA_VERSION.to_string())
        );
    }

    #[test]
    fn foreign_version_is_refused() {
        let conn = fresh();
        conn.execute(
            "INSERT INTO vault_meta(key, value) VALUES ('schema_version', '99');",
            [],
        )
        .unwrap();
        let err = ensure_version(&conn).unwrap_err();
        assert!(matches!(err, VaultError::SchemaVersion { ref found, .. } if found == "99"));
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn self_loop_edges_are_rejected_by_the_table() {
        let conn = fresh();
        conn.execute(
            "INSERT INTO objects(dhash, type, upload_time) VALUES ('a', 'blob', 't');",
            [],
        )
        .unwrap();
        let err = conn.execute(
            "INSERT INTO relations(parent_id, child_id, creation_time) VALUES (1, 1, 't');",
            [],
        );
        assert!(err.is_err());
    }
}
