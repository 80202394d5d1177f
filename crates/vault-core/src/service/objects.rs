//! Object operations: get, list/search, upload, link, share, metakeys and
//! config statistics.

use chrono::{Duration, SecondsFormat, Utc};
use rusqlite::Connection;
use tracing::{debug, info, warn};

use super::Vault;
use crate::auth::{has_capability, require_capability, Viewer};
use crate::errors::{VaultError, VaultResult};
use crate::hooks::notify;
use crate::models::{
    normalize_tag, Capability, ConfigFamilyStats, ListRequest, Metakey, MetakeyValue, NewObject,
    ObjectDetail, ObjectRecord, ObjectType, ShareReason, ShareRecord, UploadOptions, UploadOutcome,
    User,
};
use crate::query::compiler::CompiledQuery;
use crate::query::guards::page_offset;
use crate::store::{metakeys, objects, relations, sharing, tags};

fn object_not_found(object_type: ObjectType, identifier: &str) -> VaultError {
    VaultError::not_found(format!("Object {identifier} ({object_type}) not found"))
}

/// Resolve an object visible to `user`, or fail with `NotFound`.
pub(super) fn require_object(
    conn: &Connection,
    user: &User,
    object_type: ObjectType,
    identifier: &str,
) -> VaultResult<ObjectRecord> {
    objects::access(conn, &Viewer::of(user), object_type, identifier)?
        .ok_or_else(|| object_not_found(object_type, identifier))
}

/// Assemble the full representation of a record visible to `user`.
fn load_detail(conn: &Connection, user: &User, object: ObjectRecord) -> VaultResult<ObjectDetail> {
    let viewer = Viewer::of(user);
    let parents = relations::parents(conn, &viewer, object.id)?;
    let children = relations::children(conn, &viewer, object.id)?;
    let metakeys = metakeys::list_readable(conn, user, object.id)?;
    let latest_config = match object.object_type() {
        ObjectType::File | ObjectType::Blob => relations::latest_config(conn, &viewer, object.id)?,
        _ => None,
    };
    Ok(ObjectDetail {
        object,
        parents,
        children,
        metakeys,
        latest_config,
    })
}

/// Parse a statistics range: `*`, `<N>h` or `<N>d`.
fn range_start(range: &str) -> VaultResult<Option<String>> {
    let range = range.trim();
    if range == "*" {
        return Ok(None);
    }
    let invalid = || VaultError::Validation(format!("Invalid range '{range}'"));
    let parse_amount = |digits: &str| -> VaultResult<i64> {
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        digits.parse().map_err(|_| invalid())
    };
    let span = if let Some(hours) = range.strip_suffix('h') {
        Duration::try_hours(parse_amount(hours)?)
    } else if let Some(days) = range.strip_suffix('d') {
        Duration::try_days(parse_amount(days)?)
    } else {
        None
    }
    .ok_or_else(invalid)?;
    let since = Utc::now()
        .checked_sub_signed(span)
        .ok_or_else(invalid)?;
    Ok(Some(since.to_rfc3339_opts(SecondsFormat::Micros, true)))
}

impl Vault {
    /// Full representation of a visible object.
    pub fn get_object(
        &self,
        user: &User,
        object_type: ObjectType,
        identifier: &str,
    ) -> VaultResult<ObjectDetail> {
        self.db.with_conn(|conn| {
            let object = require_object(conn, user, object_type, identifier)?;
            load_detail(conn, user, object)
        })
    }

    /// One page of visible objects, newest first.
    ///
    /// `older_than` continues a listing after the given (visible) object.
    /// The deprecated `page` is only honoured when `older_than` is absent.
    pub fn list(
        &self,
        user: &User,
        object_type: ObjectType,
        request: &ListRequest,
    ) -> VaultResult<Vec<ObjectRecord>> {
        let compiled = match request.query.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => {
                let (compiled, mode) = self.planner.get_or_compile(object_type, text)?;
                debug!(object_type = %object_type, mode = mode.as_str(), "query planned");
                compiled
            }
            _ => CompiledQuery::always(),
        };

        self.db.with_conn(|conn| {
            for key in &compiled.metakeys {
                if !metakeys::can_read(conn, user, key)? {
                    return Err(VaultError::QuerySemantics(format!(
                        "Unknown metakey '{key}'"
                    )));
                }
            }

            let viewer = Viewer::of(user);
            let mut cursor = None;
            let mut offset = None;
            match (&request.older_than, request.page) {
                (Some(older_than), page) => {
                    if page.is_some() {
                        warn!("'page' is deprecated and ignored when 'older_than' is given");
                    }
                    // Any visible object is a valid pivot, whatever type is listed.
                    let pivot = objects::access(conn, &viewer, ObjectType::Object, older_than)?
                        .ok_or_else(|| object_not_found(ObjectType::Object, older_than))?;
                    cursor = Some(pivot);
                }
                (None, Some(page)) => {
                    warn!(page, "'page' is deprecated, use 'older_than' instead");
                    offset = Some(page_offset(page)?);
                }
                (None, None) => {}
            }
            objects::list(
                conn,
                &viewer,
                object_type,
                compiled.predicate,
                cursor.as_ref(),
                offset,
            )
        })
    }

    /// Store `new` (or reuse the existing record with its fingerprint),
    /// share it, link it under `options.parent` and attach metakeys.
    ///
    /// All mutations commit together; hooks run after the commit.
    pub fn upload(
        &self,
        user: &User,
        new: NewObject,
        options: UploadOptions,
    ) -> VaultResult<UploadOutcome> {
        if options.parent.is_some() {
            require_capability(user, Capability::AddingParents, "add parents")?;
        }
        if !options.tags.is_empty() {
            require_capability(user, Capability::AddingTags, "add tags")?;
        }
        let new_tags = options
            .tags
            .iter()
            .map(|tag| normalize_tag(tag))
            .collect::<VaultResult<Vec<_>>>()?;
        let public_group = self.config.public_group.as_str();
        let viewer = Viewer::of(user);

        let (detail, is_new) = self.db.with_immediate_tx(|tx| {
            for MetakeyValue { key, .. } in &options.metakeys {
                metakeys::require_settable(tx, user, key)?;
            }
            let parent = match &options.parent {
                Some(identifier) => Some(
                    objects::access(tx, &viewer, ObjectType::Object, identifier)?
                        .ok_or_else(|| object_not_found(ObjectType::Object, identifier))?,
                ),
                None => None,
            };
            let targets =
                sharing::upload_share_targets(tx, user, &options.upload_as, public_group)?;

            let (mut record, is_new) = objects::create_or_reuse(tx, &new)?;
            sharing::share(tx, record.id, &targets, ShareReason::Added, record.id, user.id)?;
            if let Some(parent) = &parent {
                relations::add_edge(tx, parent.id, record.id)?;
            }
            for MetakeyValue { key, value } in &options.metakeys {
                metakeys::add(tx, record.id, key, value)?;
            }
            if !new_tags.is_empty() {
                for tag in &new_tags {
                    tags::add(tx, record.id, tag)?;
                }
                record.tags = tags::for_object(tx, record.id)?;
            }
            Ok((load_detail(tx, user, record)?, is_new))
        })?;

        info!(
            dhash = %detail.object.dhash,
            kind = %detail.object.object_type(),
            is_new,
            "{} added",
            detail.object.object_type()
        );
        notify(self.hooks.as_ref(), &detail, is_new);
        Ok(UploadOutcome {
            object: detail,
            is_new,
        })
    }

    /// Add the edge `parent → child`. Idempotent.
    ///
    /// A self-loop is a validation error even without `adding_parents`,
    /// including when both identifiers are different digests of one file.
    pub fn link(
        &self,
        user: &User,
        parent_type: ObjectType,
        parent_id: &str,
        child_id: &str,
    ) -> VaultResult<()> {
        let self_loop = || VaultError::Validation("Object cannot be its own parent".into());
        if parent_id.trim().eq_ignore_ascii_case(child_id.trim()) {
            return Err(self_loop());
        }
        if !has_capability(user, Capability::AddingParents) {
            let same_object = self.db.with_conn(|conn| {
                let viewer = Viewer::of(user);
                let parent = objects::access(conn, &viewer, parent_type, parent_id)?;
                let child = objects::access(conn, &viewer, ObjectType::Object, child_id)?;
                Ok(matches!((parent, child), (Some(p), Some(c)) if p.id == c.id))
            })?;
            if same_object {
                return Err(self_loop());
            }
        }
        require_capability(user, Capability::AddingParents, "add parents")?;
        let (parent, child) = self.db.with_immediate_tx(|tx| {
            let parent = require_object(tx, user, parent_type, parent_id)?;
            let child = require_object(tx, user, ObjectType::Object, child_id)?;
            relations::add_edge(tx, parent.id, child.id)?;
            Ok((parent, child))
        })?;
        info!(parent = %parent.dhash, child = %child.dhash, "child added");
        Ok(())
    }

    /// Share a visible object with `group_name`.
    pub fn share_object(
        &self,
        user: &User,
        object_type: ObjectType,
        identifier: &str,
        group_name: &str,
    ) -> VaultResult<Vec<ShareRecord>> {
        let object = self.db.with_immediate_tx(|tx| {
            let object = require_object(tx, user, object_type, identifier)?;
            let group = sharing::resolve_share_target(tx, user, group_name)?;
            sharing::share(tx, object.id, &[group.id], ShareReason::Shared, object.id, user.id)?;
            Ok(object)
        })?;
        info!(dhash = %object.dhash, group = group_name, "object shared");
        self.list_shares(user, object_type, identifier)
    }

    /// Share records of a visible object, limited to the caller's groups
    /// unless they hold `access_all_objects`.
    pub fn list_shares(
        &self,
        user: &User,
        object_type: ObjectType,
        identifier: &str,
    ) -> VaultResult<Vec<ShareRecord>> {
        self.db.with_conn(|conn| {
            let object = require_object(conn, user, object_type, identifier)?;
            if has_capability(user, Capability::AccessAllObjects) {
                sharing::list_shares(conn, object.id, None)
            } else {
                sharing::list_shares(conn, object.id, Some(&user.group_ids()))
            }
        })
    }

    pub fn add_metakey(
        &self,
        user: &User,
        object_type: ObjectType,
        identifier: &str,
        entry: &MetakeyValue,
    ) -> VaultResult<Vec<Metakey>> {
        self.db.with_immediate_tx(|tx| {
            let object = require_object(tx, user, object_type, identifier)?;
            metakeys::require_settable(tx, user, &entry.key)?;
            metakeys::add(tx, object.id, &entry.key, &entry.value)?;
            metakeys::list_readable(tx, user, object.id)
        })
    }

    pub fn get_metakeys(
        &self,
        user: &User,
        object_type: ObjectType,
        identifier: &str,
    ) -> VaultResult<Vec<Metakey>> {
        self.db.with_conn(|conn| {
            let object = require_object(conn, user, object_type, identifier)?;
            metakeys::list_readable(conn, user, object.id)
        })
    }

    /// Per-family config statistics over configs visible to `user`,
    /// uploaded within `range` (`*`, `<N>h` or `<N>d`).
    pub fn config_stats(&self, user: &User, range: &str) -> VaultResult<Vec<ConfigFamilyStats>> {
        let since = range_start(range)?;
        self.db
            .with_conn(|conn| objects::config_stats(conn, &Viewer::of(user), since.as_deref()))
    }
}
