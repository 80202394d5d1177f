//! Tags and comments on visible objects.

use tracing::info;

use super::objects::require_object;
use super::Vault;
use crate::auth::require_capability;
use crate::errors::{VaultError, VaultResult};
use crate::models::{normalize_tag, Capability, Comment, ObjectType, User};
use crate::store::{comments, tags};

impl Vault {
    pub fn get_tags(
        &self,
        user: &User,
        object_type: ObjectType,
        identifier: &str,
    ) -> VaultResult<Vec<String>> {
        self.db.with_conn(|conn| {
            let object = require_object(conn, user, object_type, identifier)?;
            tags::for_object(conn, object.id)
        })
    }

    /// Attach `tag` (lowercased) and return the object's tags.
    pub fn add_tag(
        &self,
        user: &User,
        object_type: ObjectType,
        identifier: &str,
        tag: &str,
    ) -> VaultResult<Vec<String>> {
        require_capability(user, Capability::AddingTags, "add tags")?;
        let tag = normalize_tag(tag)?;
        let (dhash, added, current) = self.db.with_immediate_tx(|tx| {
            let object = require_object(tx, user, object_type, identifier)?;
            let added = tags::add(tx, object.id, &tag)?;
            Ok((object.dhash, added, tags::for_object(tx, object.id)?))
        })?;
        if added {
            info!(dhash = %dhash, tag = %tag, "tag added");
        }
        Ok(current)
    }

    /// Detach `tag`. Removing a tag the object does not carry is a no-op.
    pub fn remove_tag(
        &self,
        user: &User,
        object_type: ObjectType,
        identifier: &str,
        tag: &str,
    ) -> VaultResult<Vec<String>> {
        require_capability(user, Capability::RemovingTags, "remove tags")?;
        let tag = tag.trim().to_lowercase();
        let (dhash, removed, current) = self.db.with_immediate_tx(|tx| {
            let object = require_object(tx, user, object_type, identifier)?;
            let removed = tags::remove(tx, object.id, &tag)?;
            Ok((object.dhash, removed, tags::for_object(tx, object.id)?))
        })?;
        if removed {
            info!(dhash = %dhash, tag = %tag, "tag removed");
        }
        Ok(current)
    }

    pub fn list_comments(
        &self,
        user: &User,
        object_type: ObjectType,
        identifier: &str,
    ) -> VaultResult<Vec<Comment>> {
        self.db.with_conn(|conn| {
            let object = require_object(conn, user, object_type, identifier)?;
            comments::for_object(conn, object.id)
        })
    }

    pub fn add_comment(
        &self,
        user: &User,
        object_type: ObjectType,
        identifier: &str,
        text: &str,
    ) -> VaultResult<Comment> {
        require_capability(user, Capability::AddingComments, "add comments")?;
        let (dhash, comment) = self.db.with_immediate_tx(|tx| {
            let object = require_object(tx, user, object_type, identifier)?;
            let comment = comments::add(tx, object.id, user.id, text)?;
            Ok((object.dhash, comment))
        })?;
        info!(dhash = %dhash, comment_id = comment.id, "comment added");
        Ok(comment)
    }

    /// Delete a comment of a visible object. A comment id belonging to
    /// another object is reported as not found.
    pub fn remove_comment(
        &self,
        user: &User,
        object_type: ObjectType,
        identifier: &str,
        comment_id: i64,
    ) -> VaultResult<()> {
        require_capability(user, Capability::RemovingComments, "remove comments")?;
        let dhash = self.db.with_immediate_tx(|tx| {
            let object = require_object(tx, user, object_type, identifier)?;
            if !comments::remove(tx, object.id, comment_id)? {
                return Err(VaultError::not_found(format!(
                    "Comment {comment_id} of {}",
                    object.dhash
                )));
            }
            Ok(object.dhash)
        })?;
        info!(dhash = %dhash, comment_id, "comment removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ListRequest, NewBlob, NewObject, UploadOptions};
    use crate::service::fixtures::fixture;

    fn blob(content: &str) -> NewObject {
        NewObject::Blob(NewBlob {
            blob_name: "notes".into(),
            blob_type: "dump".into(),
            content: content.into(),
        })
    }

    fn query(text: &str) -> ListRequest {
        ListRequest {
            query: Some(text.into()),
            ..Default::default()
        }
    }

    #[test]
    fn tagging_needs_capabilities_and_is_searchable() {
        let fx = fixture();
        let alice = fx.user("alice", &[]);
        let outcome = fx.vault.upload(&alice, blob("tagged"), UploadOptions::default()).unwrap();
        let dhash = outcome.object.object.dhash;

        let err = fx.vault.add_tag(&alice, ObjectType::Blob, &dhash, "emotet").unwrap_err();
        assert_eq!(err.status_code(), 403);

        let alice = fx.grant("alice", Capability::AddingTags);
        assert!(fx
            .vault
            .add_tag(&alice, ObjectType::Blob, &dhash, "bad tag")
            .unwrap_err()
            .is_validation());
        fx.vault.add_tag(&alice, ObjectType::Blob, &dhash, "Emotet").unwrap();
        let current = fx.vault.add_tag(&alice, ObjectType::Object, &dhash, "feed:spam").unwrap();
        assert_eq!(current, ["emotet", "feed:spam"]);

        let found = fx.vault.list(&alice, ObjectType::Blob, &query("tag:EMOTET")).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].tags, ["emotet", "feed:spam"]);
        assert!(fx
            .vault
            .list(&alice, ObjectType::Blob, &query("tag:zeus"))
            .unwrap()
            .is_empty());

        let err = fx.vault.remove_tag(&alice, ObjectType::Blob, &dhash, "emotet").unwrap_err();
        assert_eq!(err.status_code(), 403);
        let alice = fx.grant("alice", Capability::RemovingTags);
        let current = fx.vault.remove_tag(&alice, ObjectType::Blob, &dhash, "EMOTET").unwrap();
        assert_eq!(current, ["feed:spam"]);
        assert_eq!(
            fx.vault.get_tags(&alice, ObjectType::Blob, &dhash).unwrap(),
            ["feed:spam"]
        );
    }

    #[test]
    fn upload_tags_are_applied_with_the_object() {
        let fx = fixture();
        let alice = fx.user("alice", &[]);
        let options = UploadOptions {
            tags: vec!["Dropper".into()],
            ..Default::default()
        };
        let err = fx.vault.upload(&alice, blob("dropped"), options.clone()).unwrap_err();
        assert_eq!(err.status_code(), 403);

        let alice = fx.grant("alice", Capability::AddingTags);
        let outcome = fx.vault.upload(&alice, blob("dropped"), options).unwrap();
        assert_eq!(outcome.object.object.tags, ["dropper"]);

        let bad = UploadOptions {
            tags: vec!["has,comma".into()],
            ..Default::default()
        };
        assert!(fx.vault.upload(&alice, blob("other"), bad).unwrap_err().is_validation());
        assert_eq!(
            fx.vault
                .list(&alice, ObjectType::Blob, &ListRequest::default())
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn tags_of_invisible_objects_look_missing() {
        let fx = fixture();
        let alice = fx.user("alice", &[]);
        fx.user("bob", &[]);
        let bob = fx.grant("bob", Capability::AddingTags);
        let outcome = fx.vault.upload(&alice, blob("private"), UploadOptions::default()).unwrap();
        let dhash = outcome.object.object.dhash;

        assert_eq!(
            fx.vault.get_tags(&bob, ObjectType::Blob, &dhash).unwrap_err().status_code(),
            404
        );
        assert_eq!(
            fx.vault
                .add_tag(&bob, ObjectType::Blob, &dhash, "x")
                .unwrap_err()
                .status_code(),
            404
        );
    }

    #[test]
    fn comments_are_added_listed_searched_and_removed() {
        let fx = fixture();
        let alice = fx.user("alice", &["teamA"]);
        let bob = fx.user("bob", &["teamA"]);
        let options = UploadOptions {
            upload_as: crate::models::UploadTarget::Group("teamA".into()),
            ..Default::default()
        };
        let outcome = fx.vault.upload(&alice, blob("discussed"), options).unwrap();
        let dhash = outcome.object.object.dhash;

        let err = fx
            .vault
            .add_comment(&alice, ObjectType::Blob, &dhash, "looks packed")
            .unwrap_err();
        assert_eq!(err.status_code(), 403);

        let alice = fx.grant("alice", Capability::AddingComments);
        let comment = fx
            .vault
            .add_comment(&alice, ObjectType::Blob, &dhash, "looks packed")
            .unwrap();
        assert_eq!(comment.author, "alice");

        let listed = fx.vault.list_comments(&bob, ObjectType::Blob, &dhash).unwrap();
        assert_eq!(listed, vec![comment.clone()]);
        let found = fx.vault.list(&bob, ObjectType::Object, &query("comment:*packed*")).unwrap();
        assert_eq!(found.len(), 1);

        let bob = fx.grant("bob", Capability::RemovingComments);
        let err = fx
            .vault
            .remove_comment(&bob, ObjectType::Blob, &dhash, comment.id + 100)
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
        fx.vault.remove_comment(&bob, ObjectType::Blob, &dhash, comment.id).unwrap();
        assert!(fx.vault.list_comments(&bob, ObjectType::Blob, &dhash).unwrap().is_empty());
    }
}
