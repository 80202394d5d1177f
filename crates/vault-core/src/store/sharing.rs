//! Sharing/group registry: users, groups, memberships, capability grants and
//! per-object sharing grants.

use std::collections::BTreeSet;

use rusqlite::{params, Connection, OptionalExtension};

use crate::auth::has_capability;
use crate::errors::{VaultError, VaultResult};
use crate::models::{
    Capability, Group, GroupRef, ObjectType, ShareReason, ShareRecord, UploadTarget, User,
};
use crate::store::database::timestamp_now;

fn group_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Group> {
    Ok(Group {
        id: row.get(0)?,
        name: row.get(1)?,
        pending_group: row.get::<_, i64>(2)? != 0,
        private: row.get::<_, i64>(3)? != 0,
    })
}

// ---------------------------------------------------------------------------
// Groups
// ---------------------------------------------------------------------------

/// Look up a group by name, pending or not.
pub fn resolve_group(conn: &Connection, name: &str) -> VaultResult<Option<Group>> {
    let group = conn
        .query_row(
            "SELECT id, name, pending_group, private FROM access_groups WHERE name = ?1;",
            params![name],
            group_from_row,
        )
        .optional()?;
    Ok(group)
}

pub fn create_group(conn: &Connection, name: &str, pending: bool, private: bool) -> VaultResult<Group> {
    let name = name.trim();
    if name.is_empty() {
        return Err(VaultError::Validation("Group name cannot be empty".into()));
    }
    if resolve_group(conn, name)?.is_some() {
        return Err(VaultError::Validation(format!("Group {name} already exists")));
    }
    conn.execute(
        "INSERT INTO access_groups(name, pending_group, private) VALUES (?1, ?2, ?3);",
        params![name, pending as i64, private as i64],
    )?;
    Ok(Group {
        id: conn.last_insert_rowid(),
        name: name.to_string(),
        pending_group: pending,
        private,
    })
}

/// Clear the pending flag of a requested group.
pub fn approve_group(conn: &Connection, name: &str) -> VaultResult<Group> {
    let changed = conn.execute(
        "UPDATE access_groups SET pending_group = 0 WHERE name = ?1;",
        params![name],
    )?;
    if changed == 0 {
        return Err(VaultError::not_found(format!("Group {name} doesn't exist")));
    }
    resolve_group(conn, name)?
        .ok_or_else(|| VaultError::not_found(format!("Group {name} doesn't exist")))
}

/// Can `user` share objects into `group`?
///
/// Pending groups never qualify; otherwise membership or the
/// `sharing_objects` capability is required.
pub fn is_eligible_share_target(user: &User, group: &Group) -> bool {
    !group.pending_group
        && (user.is_member_of(group.id) || has_capability(user, Capability::SharingObjects))
}

/// Resolve a named share target, hiding pending or inaccessible groups
/// behind the same "doesn't exist" failure.
pub fn resolve_share_target(conn: &Connection, user: &User, name: &str) -> VaultResult<Group> {
    match resolve_group(conn, name)? {
        Some(group) if is_eligible_share_target(user, &group) => Ok(group),
        _ => Err(VaultError::not_found(format!("Group {name} doesn't exist"))),
    }
}

/// Group ids an upload must be shared with.
///
/// The uploader's private group is always part of the result.
pub fn upload_share_targets(
    conn: &Connection,
    user: &User,
    target: &UploadTarget,
    public_group: &str,
) -> VaultResult<Vec<i64>> {
    let private = user
        .private_group()
        .ok_or_else(|| VaultError::not_found(format!("Group {} doesn't exist", user.login)))?;
    let mut ids: BTreeSet<i64> = BTreeSet::new();
    ids.insert(private.id);
    match target {
        UploadTarget::Private => {}
        UploadTarget::AllGroups => {
            ids.extend(
                user.groups
                    .iter()
                    .filter(|g| g.name != public_group)
                    .map(|g| g.id),
            );
        }
        UploadTarget::Group(name) => {
            ids.insert(resolve_share_target(conn, user, name)?.id);
        }
    }
    Ok(ids.into_iter().collect())
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// Register a user with its private group; joins `public_group` when that
/// group exists and is not pending.
pub fn create_user(conn: &Connection, login: &str, public_group: &str) -> VaultResult<i64> {
    let login = login.trim();
    if login.is_empty() {
        return Err(VaultError::Validation("Login cannot be empty".into()));
    }
    let exists: Option<i64> = conn
        .query_row("SELECT id FROM users WHERE login = ?1;", params![login], |row| row.get(0))
        .optional()?;
    if exists.is_some() {
        return Err(VaultError::Validation(format!("User {login} already exists")));
    }
    conn.execute("INSERT INTO users(login) VALUES (?1);", params![login])?;
    let user_id = conn.last_insert_rowid();

    let private = create_group(conn, login, false, true)?;
    insert_membership(conn, private.id, user_id)?;

    if let Some(public) = resolve_group(conn, public_group)? {
        if !public.pending_group {
            insert_membership(conn, public.id, user_id)?;
        }
    }
    Ok(user_id)
}

fn insert_membership(conn: &Connection, group_id: i64, user_id: i64) -> VaultResult<()> {
    conn.execute(
        "INSERT INTO members(group_id, user_id) VALUES (?1, ?2) \
         ON CONFLICT(group_id, user_id) DO NOTHING;",
        params![group_id, user_id],
    )?;
    Ok(())
}

fn user_id(conn: &Connection, login: &str) -> VaultResult<i64> {
    conn.query_row("SELECT id FROM users WHERE login = ?1;", params![login], |row| row.get(0))
        .optional()?
        .ok_or_else(|| VaultError::not_found(format!("User {login} doesn't exist")))
}

pub fn add_member(conn: &Connection, group_name: &str, login: &str) -> VaultResult<()> {
    let group = resolve_group(conn, group_name)?
        .ok_or_else(|| VaultError::not_found(format!("Group {group_name} doesn't exist")))?;
    if group.private {
        return Err(VaultError::Validation(format!(
            "Group {group_name} is private"
        )));
    }
    let uid = user_id(conn, login)?;
    insert_membership(conn, group.id, uid)
}

pub fn grant_capability(conn: &Connection, group_name: &str, capability: Capability) -> VaultResult<()> {
    let group = resolve_group(conn, group_name)?
        .ok_or_else(|| VaultError::not_found(format!("Group {group_name} doesn't exist")))?;
    conn.execute(
        "INSERT INTO group_capabilities(group_id, capability) VALUES (?1, ?2) \
         ON CONFLICT(group_id, capability) DO NOTHING;",
        params![group.id, capability.as_str()],
    )?;
    Ok(())
}

/// Build the request context for `login`.
///
/// Pending groups are treated as nonexistent: they contribute neither
/// membership nor capabilities.
pub fn load_user(conn: &Connection, login: &str) -> VaultResult<Option<User>> {
    let id: Option<i64> = conn
        .query_row("SELECT id FROM users WHERE login = ?1;", params![login], |row| row.get(0))
        .optional()?;
    let Some(id) = id else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT g.id, g.name FROM access_groups g \
         JOIN members m ON m.group_id = g.id \
         WHERE m.user_id = ?1 AND g.pending_group = 0 \
         ORDER BY g.id;",
    )?;
    let groups = stmt
        .query_map(params![id], |row| {
            Ok(GroupRef {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut stmt = conn.prepare(
        "SELECT DISTINCT c.capability FROM group_capabilities c \
         JOIN members m ON m.group_id = c.group_id \
         JOIN access_groups g ON g.id = c.group_id \
         WHERE m.user_id = ?1 AND g.pending_group = 0;",
    )?;
    let names = stmt
        .query_map(params![id], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    let capabilities = names
        .iter()
        .filter_map(|name| Capability::try_from(name.as_str()).ok())
        .collect();

    Ok(Some(User {
        id,
        login: login.to_string(),
        capabilities,
        groups,
    }))
}

// ---------------------------------------------------------------------------
// Object shares
// ---------------------------------------------------------------------------

/// Grant `group_ids` access to `object_id`. Existing grants are kept as-is.
pub fn share(
    conn: &Connection,
    object_id: i64,
    group_ids: &[i64],
    reason: ShareReason,
    related_object_id: i64,
    related_user_id: i64,
) -> VaultResult<()> {
    let now = timestamp_now();
    let mut stmt = conn.prepare(
        "INSERT INTO permissions(object_id, group_id, access_time, reason_type, \
                                 related_object_id, related_user_id) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
         ON CONFLICT(object_id, group_id) DO NOTHING;",
    )?;
    for gid in group_ids {
        stmt.execute(params![
            object_id,
            gid,
            now,
            reason.as_str(),
            related_object_id,
            related_user_id
        ])?;
    }
    Ok(())
}

/// Share records of an object, restricted to `group_ids` unless `None`.
pub fn list_shares(
    conn: &Connection,
    object_id: i64,
    group_ids: Option<&[i64]>,
) -> VaultResult<Vec<ShareRecord>> {
    let mut stmt = conn.prepare(
        "SELECT p.group_id, g.name, p.access_time, p.reason_type, o.dhash, o.type, u.login \
         FROM permissions p \
         JOIN access_groups g ON g.id = p.group_id \
         JOIN objects o ON o.id = p.related_object_id \
         JOIN users u ON u.id = p.related_user_id \
         WHERE p.object_id = ?1 \
         ORDER BY p.access_time DESC, g.name ASC;",
    )?;
    let rows = stmt
        .query_map(params![object_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut records = Vec::with_capacity(rows.len());
    for (group_id, group_name, access_time, reason, dhash, kind, login) in rows {
        if let Some(allowed) = group_ids {
            if !allowed.contains(&group_id) {
                continue;
            }
        }
        records.push(ShareRecord {
            group_name,
            access_time,
            reason_type: ShareReason::from_db(&reason),
            related_object_dhash: dhash,
            related_object_type: ObjectType::try_from(kind.as_str())?,
            related_user_login: login,
        });
    }
    Ok(records)
}
