//! Metakey definitions, per-group permissions and per-object values.

use rusqlite::{params, Connection, OptionalExtension};

use crate::auth::has_capability;
use crate::errors::{VaultError, VaultResult};
use crate::models::{validate_metakey_name, Capability, Metakey, MetakeyDefinition, User};
use crate::store::sharing::resolve_group;

fn definition_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MetakeyDefinition> {
    Ok(MetakeyDefinition {
        key: row.get(0)?,
        label: row.get(1)?,
        description: row.get(2)?,
        url_template: row.get(3)?,
        hidden: row.get::<_, i64>(4)? != 0,
    })
}

/// Create or update a metakey definition.
pub fn define(conn: &Connection, definition: &MetakeyDefinition) -> VaultResult<()> {
    validate_metakey_name(&definition.key)?;
    conn.execute(
        "INSERT INTO metakey_definitions(key, label, description, url_template, hidden) \
         VALUES (?1, ?2, ?3, ?4, ?5) \
         ON CONFLICT(key) DO UPDATE SET label = excluded.label, \
             description = excluded.description, \
             url_template = excluded.url_template, \
             hidden = excluded.hidden;",
        params![
            definition.key,
            definition.label,
            definition.description,
            definition.url_template,
            definition.hidden as i64
        ],
    )?;
    Ok(())
}

pub fn get_definition(conn: &Connection, key: &str) -> VaultResult<Option<MetakeyDefinition>> {
    let definition = conn
        .query_row(
            "SELECT key, label, description, url_template, hidden \
             FROM metakey_definitions WHERE key = ?1;",
            params![key],
            definition_from_row,
        )
        .optional()?;
    Ok(definition)
}

/// Grant (or revoke) read/set permission on `key` to a group.
pub fn set_permission(
    conn: &Connection,
    key: &str,
    group_name: &str,
    can_read: bool,
    can_set: bool,
) -> VaultResult<()> {
    if get_definition(conn, key)?.is_none() {
        return Err(VaultError::not_found(format!("Metakey {key} is not defined")));
    }
    let group = resolve_group(conn, group_name)?
        .ok_or_else(|| VaultError::not_found(format!("Group {group_name} doesn't exist")))?;
    conn.execute(
        "INSERT INTO metakey_permissions(key, group_id, can_read, can_set) \
         VALUES (?1, ?2, ?3, ?4) \
         ON CONFLICT(key, group_id) DO UPDATE SET can_read = excluded.can_read, \
             can_set = excluded.can_set;",
        params![key, group.id, can_read as i64, can_set as i64],
    )?;
    Ok(())
}

fn group_grants(conn: &Connection, user: &User, key: &str, column: &str) -> VaultResult<bool> {
    let group_ids = user.group_ids();
    if group_ids.is_empty() {
        return Ok(false);
    }
    let placeholders: Vec<String> = (0..group_ids.len()).map(|i| format!("?{}", i + 2)).collect();
    let sql = format!(
        "SELECT EXISTS (SELECT 1 FROM metakey_permissions \
         WHERE key = ?1 AND {column} = 1 AND group_id IN ({}));",
        placeholders.join(", ")
    );
    let mut values: Vec<rusqlite::types::Value> = vec![key.to_string().into()];
    values.extend(group_ids.into_iter().map(rusqlite::types::Value::from));
    let granted: bool = conn.query_row(&sql, rusqlite::params_from_iter(values), |row| row.get(0))?;
    Ok(granted)
}

/// May `user` attach values of `key`? The key must be defined.
pub fn can_set(conn: &Connection, user: &User, key: &str) -> VaultResult<bool> {
    if get_definition(conn, key)?.is_none() {
        return Ok(false);
    }
    if has_capability(user, Capability::AddingAllAttributes) {
        return Ok(true);
    }
    group_grants(conn, user, key, "can_set")
}

/// May `user` read (and search by) `key`? The key must be defined.
///
/// Hidden keys are readable only with `reading_all_attributes`; a group
/// `can_read` grant is not enough.
pub fn can_read(conn: &Connection, user: &User, key: &str) -> VaultResult<bool> {
    let Some(definition) = get_definition(conn, key)? else {
        return Ok(false);
    };
    if has_capability(user, Capability::ReadingAllAttributes) {
        return Ok(true);
    }
    if definition.hidden {
        return Ok(false);
    }
    group_grants(conn, user, key, "can_read")
}

/// Fail unless `user` may set `key`. Undefined and forbidden keys are
/// reported alike.
pub fn require_settable(conn: &Connection, user: &User, key: &str) -> VaultResult<()> {
    if can_set(conn, user, key)? {
        Ok(())
    } else {
        Err(VaultError::not_found(format!(
            "Metakey {key} is not defined or you don't have permission to set it"
        )))
    }
}

/// Attach `value` under `key`. Repeating the same pair is a no-op.
pub fn add(conn: &Connection, object_id: i64, key: &str, value: &str) -> VaultResult<()> {
    conn.execute(
        "INSERT INTO metakeys(object_id, key, value) VALUES (?1, ?2, ?3) \
         ON CONFLICT(object_id, key, value) DO NOTHING;",
        params![object_id, key, value],
    )?;
    Ok(())
}

/// Values attached to an object whose keys `user` may read.
pub fn list_readable(conn: &Connection, user: &User, object_id: i64) -> VaultResult<Vec<Metakey>> {
    let mut stmt = conn.prepare(
        "SELECT m.key, m.value, d.url_template, d.label \
         FROM metakeys m JOIN metakey_definitions d ON d.key = m.key \
         WHERE m.object_id = ?1 ORDER BY m.key ASC, m.id ASC;",
    )?;
    let rows = stmt
        .query_map(params![object_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut readable_keys: Vec<(String, bool)> = Vec::new();
    let mut out = Vec::with_capacity(rows.len());
    for (key, value, url_template, label) in rows {
        let allowed = match readable_keys.iter().find(|(k, _)| *k == key) {
            Some((_, allowed)) => *allowed,
            None => {
                let allowed = can_read(conn, user, &key)?;
                readable_keys.push((key.clone(), allowed));
                allowed
            }
        };
        if !allowed {
            continue;
        }
        out.push(Metakey {
            url: url_template.map(|t| t.replace("$value", &value)),
            key,
            value,
            label,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewBlob, NewObject};
    use crate::store::database::test_support::temp_database;
    use crate::store::{objects, sharing};

    fn define_key(conn: &Connection, key: &str, hidden: bool) {
        define(
            conn,
            &MetakeyDefinition {
                key: key.into(),
                url_template: Some("https://tracker.example/$value".into()),
                hidden,
                ..Default::default()
            },
        )
        .unwrap();
    }

    #[test]
    fn invalid_key_names_cannot_be_defined() {
        let (_dir, db) = temp_database();
        let conn = db.connect().unwrap();
        let err = define(
            &conn,
            &MetakeyDefinition {
                key: "bad key".into(),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn permissions_come_from_groups_or_capabilities() {
        let (_dir, db) = temp_database();
        let conn = db.connect().unwrap();
        sharing::create_user(&conn, "alice", "public").unwrap();
        define_key(&conn, "campaign", false);
        let alice = sharing::load_user(&conn, "alice").unwrap().unwrap();
        assert!(!can_set(&conn, &alice, "campaign").unwrap());
        assert!(!can_read(&conn, &alice, "campaign").unwrap());
        assert!(require_settable(&conn, &alice, "campaign").is_err());

        set_permission(&conn, "campaign", "alice", true, false).unwrap();
        assert!(can_read(&conn, &alice, "campaign").unwrap());
        assert!(!can_set(&conn, &alice, "campaign").unwrap());

        sharing::grant_capability(&conn, "alice", Capability::AddingAllAttributes).unwrap();
        let alice = sharing::load_user(&conn, "alice").unwrap().unwrap();
        assert!(can_set(&conn, &alice, "campaign").unwrap());
        assert!(!can_set(&conn, &alice, "undefined").unwrap());
    }

    #[test]
    fn values_are_idempotent_and_filtered_for_readers() {
        let (_dir, db) = temp_database();
        let conn = db.connect().unwrap();
        sharing::create_user(&conn, "alice", "public").unwrap();
        define_key(&conn, "campaign", false);
        define_key(&conn, "internal", true);
        set_permission(&conn, "campaign", "alice", true, true).unwrap();
        set_permission(&conn, "internal", "alice", true, true).unwrap();
        let alice = sharing::load_user(&conn, "alice").unwrap().unwrap();

        let (record, _) = objects::create_or_reuse(
            &conn,
            &NewObject::Blob(NewBlob {
                blob_name: "b".into(),
                blob_type: "t".into(),
                content: "c".into(),
            }),
        )
        .unwrap();
        add(&conn, record.id, "campaign", "x1").unwrap();
        add(&conn, record.id, "campaign", "x1").unwrap();
        add(&conn, record.id, "internal", "secret").unwrap();

        let listed = list_readable(&conn, &alice, record.id).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].value, "x1");
        assert_eq!(listed[0].url.as_deref(), Some("https://tracker.example/x1"));

        sharing::grant_capability(&conn, "alice", Capability::ReadingAllAttributes).unwrap();
        let alice = sharing::load_user(&conn, "alice").unwrap().unwrap();
        assert_eq!(list_readable(&conn, &alice, record.id).unwrap().len(), 2);
    }

    #[test]
    fn hidden_keys_need_reading_all_attributes() {
        let (_dir, db) = temp_database();
        let conn = db.connect().unwrap();
        sharing::create_user(&conn, "alice", "public").unwrap();
        define_key(&conn, "internal", true);
        set_permission(&conn, "internal", "alice", true, false).unwrap();
        let alice = sharing::load_user(&conn, "alice").unwrap().unwrap();
        assert!(!can_read(&conn, &alice, "internal").unwrap());

        sharing::grant_capability(&conn, "alice", Capability::ReadingAllAttributes).unwrap();
        let alice = sharing::load_user(&conn, "alice").unwrap().unwrap();
        assert!(can_read(&conn, &alice, "internal").unwrap());
    }

    #[test]
    fn permission_on_unknown_key_is_not_found() {
        let (_dir, db) = temp_database();
        let conn = db.connect().unwrap();
        sharing::create_group(&conn, "teamA", false, false).unwrap();
        let err = set_permission(&conn, "ghost", "teamA", true, true).unwrap_err();
        assert_eq!(err.status_code(), 404);
    }
}
