//! Comments attached to objects.

use rusqlite::{params, Connection, OptionalExtension};

use crate::errors::{VaultError, VaultResult};
use crate::models::Comment;
use crate::store::database::timestamp_now;

fn comment_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: row.get(0)?,
        author: row.get(1)?,
        comment: row.get(2)?,
        timestamp: row.get(3)?,
    })
}

const COMMENT_SELECT: &str = "SELECT c.id, u.login, c.comment, c.timestamp \
     FROM comments c JOIN users u ON u.id = c.author_id";

/// Store a comment by `author_id`. Blank text is rejected.
pub fn add(conn: &Connection, object_id: i64, author_id: i64, text: &str) -> VaultResult<Comment> {
    if text.trim().is_empty() {
        return Err(VaultError::Validation("Comment cannot be empty".into()));
    }
    conn.execute(
        "INSERT INTO comments(object_id, author_id, comment, timestamp) VALUES (?1, ?2, ?3, ?4);",
        params![object_id, author_id, text, timestamp_now()],
    )?;
    let id = conn.last_insert_rowid();
    let comment = conn.query_row(
        &format!("{COMMENT_SELECT} WHERE c.id = ?1;"),
        params![id],
        comment_from_row,
    )?;
    Ok(comment)
}

/// Comments on `object_id`, oldest first.
pub fn for_object(conn: &Connection, object_id: i64) -> VaultResult<Vec<Comment>> {
    let mut stmt = conn.prepare(&format!(
        "{COMMENT_SELECT} WHERE c.object_id = ?1 ORDER BY c.id ASC;"
    ))?;
    let comments = stmt
        .query_map(params![object_id], comment_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(comments)
}

/// Delete comment `comment_id` of `object_id`. Returns whether it existed
/// on that object.
pub fn remove(conn: &Connection, object_id: i64, comment_id: i64) -> VaultResult<bool> {
    let found = conn
        .query_row(
            "SELECT id FROM comments WHERE id = ?1 AND object_id = ?2;",
            params![comment_id, object_id],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    if found.is_none() {
        return Ok(false);
    }
    conn.execute("DELETE FROM comments WHERE id = ?1;", params![comment_id])?;
    Ok(true)
}
