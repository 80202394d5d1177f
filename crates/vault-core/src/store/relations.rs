//! Parent→child relation edges between objects.

use rusqlite::{params, Connection};

use crate::auth::Viewer;
use crate::errors::{VaultError, VaultResult};
use crate::models::{ObjectRecord, ObjectRef, ObjectType};
use crate::query::predicate::Predicate;
use crate::store::database::timestamp_now;
use crate::store::objects::{object_from_row, OBJECT_COLUMNS, OBJECT_SOURCE};
use crate::store::tags::{split_tags, TAGS_COLUMN};

/// Insert the edge `parent_id → child_id`. Returns whether it was new.
///
/// Duplicate edges are a no-op; self-loops are rejected.
pub fn add_edge(conn: &Connection, parent_id: i64, child_id: i64) -> VaultResult<bool> {
    if parent_id == child_id {
        return Err(VaultError::Validation(
            "Object cannot be its own parent".into(),
        ));
    }
    let inserted = conn.execute(
        "INSERT INTO relations(parent_id, child_id, creation_time) VALUES (?1, ?2, ?3) \
         ON CONFLICT(parent_id, child_id) DO NOTHING;",
        params![parent_id, child_id, timestamp_now()],
    )?;
    Ok(inserted == 1)
}

#[derive(Clone, Copy)]
enum Direction {
    Parents,
    Children,
}

fn related(
    conn: &Connection,
    viewer: &Viewer,
    object_id: i64,
    direction: Direction,
) -> VaultResult<Vec<ObjectRef>> {
    let (join_col, anchor_col) = match direction {
        Direction::Parents => ("parent_id", "child_id"),
        Direction::Children => ("child_id", "parent_id"),
    };
    let mut rendered = Predicate::visible("o").render(viewer);
    let anchor = rendered.bind(object_id);
    let sql = format!(
        "SELECT o.dhash, o.type, o.upload_time, {TAGS_COLUMN} FROM relations r \
         JOIN objects o ON o.id = r.{join_col} \
         WHERE r.{anchor_col} = {anchor} AND {} \
         ORDER BY o.id DESC;",
        rendered.sql
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rendered.param_refs().as_slice(), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter()
        .map(|(dhash, kind, upload_time, tags)| {
            Ok(ObjectRef {
                dhash,
                object_type: ObjectType::try_from(kind.as_str())?,
                upload_time,
                tags: split_tags(tags),
            })
        })
        .collect()
}

/// Parents of `object_id` visible to `viewer`, newest first.
pub fn parents(conn: &Connection, viewer: &Viewer, object_id: i64) -> VaultResult<Vec<ObjectRef>> {
    related(conn, viewer, object_id, Direction::Parents)
}

/// Children of `object_id` visible to `viewer`, newest first.
pub fn children(conn: &Connection, viewer: &Viewer, object_id: i64) -> VaultResult<Vec<ObjectRef>> {
    related(conn, viewer, object_id, Direction::Children)
}

/// Most recently inserted config child of `object_id` visible to `viewer`.
pub fn latest_config(conn: &Connection, viewer: &Viewer, object_id: i64) -> VaultResult<Option<ObjectRecord>> {
    let mut rendered = Predicate::visible("o").render(viewer);
    let anchor = rendered.bind(object_id);
    let sql = format!(
        "SELECT {OBJECT_COLUMNS} FROM {OBJECT_SOURCE} \
         JOIN relations r ON r.child_id = o.id \
         WHERE r.parent_id = {anchor} AND o.type = 'config' AND {} \
         ORDER BY o.id DESC LIMIT 1;",
        rendered.sql
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query_map(rendered.param_refs().as_slice(), object_from_row)?;
    let record = rows.next().transpose()?;
    Ok(record)
}
