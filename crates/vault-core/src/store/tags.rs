//! Per-object tags.

use rusqlite::{params, Connection};

use crate::errors::VaultResult;

/// Scalar subquery listing the tags of `o`, comma-joined (tags never
/// contain commas). Pair with [`split_tags`].
pub const TAGS_COLUMN: &str =
    "(SELECT GROUP_CONCAT(tg.tag, ',') FROM tags tg WHERE tg.object_id = o.id)";

/// Sorted tag list from a [`TAGS_COLUMN`] value.
pub fn split_tags(joined: Option<String>) -> Vec<String> {
    let mut tags: Vec<String> = joined
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect();
    tags.sort();
    tags
}

/// Attach `tag`. Returns whether it was new.
pub fn add(conn: &Connection, object_id: i64, tag: &str) -> VaultResult<bool> {
    let inserted = conn.execute(
        "INSERT INTO tags(object_id, tag) VALUES (?1, ?2) \
         ON CONFLICT(object_id, tag) DO NOTHING;",
        params![object_id, tag],
    )?;
    Ok(inserted == 1)
}

/// Detach `tag`. Returns whether it was attached.
pub fn remove(conn: &Connection, object_id: i64, tag: &str) -> VaultResult<bool> {
    let removed = conn.execute(
        "DELETE FROM tags WHERE object_id = ?1 AND tag = ?2;",
        params![object_id, tag],
    )?;
    Ok(removed == 1)
}

pub fn for_object(conn: &Connection, object_id: i64) -> VaultResult<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT tag FROM tags WHERE object_id = ?1 ORDER BY tag ASC;")?;
    let tags = stmt
        .query_map(params![object_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(tags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewBlob, NewObject};
    use crate::store::database::test_support::temp_database;
    use crate::store::objects;

    #[test]
    fn tags_are_a_set_per_object() {
        let (_dir, db) = temp_database();
        let conn = db.connect().unwrap();
        let (record, _) = objects::create_or_reuse(
            &conn,
            &NewObject::Blob(NewBlob {
                blob_name: "b".into(),
                blob_type: "t".into(),
                content: "tagged".into(),
            }),
        )
        .unwrap();

        assert!(add(&conn, record.id, "zeus").unwrap());
        assert!(add(&conn, record.id, "emotet").unwrap());
        assert!(!add(&conn, record.id, "zeus").unwrap());
        assert_eq!(for_object(&conn, record.id).unwrap(), ["emotet", "zeus"]);

        let reloaded = objects::get_by_dhash(&conn, &record.dhash).unwrap().unwrap();
        assert_eq!(reloaded.tags, ["emotet", "zeus"]);

        assert!(remove(&conn, record.id, "zeus").unwrap());
        assert!(!remove(&conn, record.id, "zeus").unwrap());
        assert_eq!(for_object(&conn, record.id).unwrap(), ["emotet"]);
    }

    #[test]
    fn split_handles_missing_and_unordered_lists() {
        assert!(split_tags(None).is_empty());
        assert_eq!(split_tags(Some("b,a".into())), ["a", "b"]);
    }
}
