//! Shared typed models used across the store, query and service layers.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::{VaultError, VaultResult};

// ---------------------------------------------------------------------------
// Object type tags
// ---------------------------------------------------------------------------

/// Closed set of object type tags.
///
/// `Object` is the abstract supertype: it is a valid tag for lookups and
/// listings but never the stored type of a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    Object,
    File,
    Config,
    Blob,
}

impl ObjectType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Object => "object",
            Self::File => "file",
            Self::Config => "config",
            Self::Blob => "blob",
        }
    }

    /// True for the tags that can be stored as a record's type.
    pub fn is_concrete(self) -> bool {
        !matches!(self, Self::Object)
    }

    /// Whether a record of type `stored` satisfies a lookup for `self`.
    pub fn admits(self, stored: ObjectType) -> bool {
        self == ObjectType::Object || self == stored
    }
}

impl TryFrom<&str> for ObjectType {
    type Error = VaultError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "object" => Ok(Self::Object),
            "file" => Ok(Self::File),
            "config" => Ok(Self::Config),
            "blob" => Ok(Self::Blob),
            other => Err(VaultError::Validation(format!(
                "Incorrect object type '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Stored objects
// ---------------------------------------------------------------------------

/// File-specific attributes.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FileAttrs {
    pub file_name: String,
    pub file_size: i64,
    pub file_type: String,
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
    pub sha512: String,
    pub crc32: String,
}

/// Config-specific attributes. `cfg` is always a JSON object.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConfigAttrs {
    pub family: String,
    pub config_type: String,
    pub cfg: serde_json::Value,
}

/// Text blob attributes.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BlobAttrs {
    pub blob_name: String,
    pub blob_type: String,
    pub blob_size: i64,
    pub content: String,
    pub last_seen: String,
}

/// Variant payload of a stored object. Serialises with a `type` tag.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ObjectKind {
    File(FileAttrs),
    Config(ConfigAttrs),
    Blob(BlobAttrs),
}

impl ObjectKind {
    pub fn object_type(&self) -> ObjectType {
        match self {
            ObjectKind::File(_) => ObjectType::File,
            ObjectKind::Config(_) => ObjectType::Config,
            ObjectKind::Blob(_) => ObjectType::Blob,
        }
    }
}

/// A stored object with its variant attributes.
///
/// `id` is the insertion-ordered row id used for pagination and never leaves
/// the core; callers address objects by `dhash`, which is serialised as `id`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ObjectRecord {
    #[serde(skip)]
    pub id: i64,
    #[serde(rename = "id")]
    pub dhash: String,
    pub upload_time: String,
    /// Sorted tag names.
    pub tags: Vec<String>,
    #[serde(flatten)]
    pub kind: ObjectKind,
}

impl ObjectRecord {
    pub fn object_type(&self) -> ObjectType {
        self.kind.object_type()
    }
}

/// Short reference to an object, used for relation listings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ObjectRef {
    #[serde(rename = "id")]
    pub dhash: String,
    #[serde(rename = "type")]
    pub object_type: ObjectType,
    pub upload_time: String,
    pub tags: Vec<String>,
}

/// Full object representation: record, visible relations, readable metakeys.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ObjectDetail {
    #[serde(flatten)]
    pub object: ObjectRecord,
    pub parents: Vec<ObjectRef>,
    pub children: Vec<ObjectRef>,
    pub metakeys: Vec<Metakey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_config: Option<ObjectRecord>,
}

// ---------------------------------------------------------------------------
// Upload inputs
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct NewFile {
    pub file_name: String,
    pub content: Vec<u8>,
    pub file_type: Option<String>,
}

#[derive(Clone, Debug)]
pub struct NewConfig {
    pub family: String,
    pub config_type: Option<String>,
    pub cfg: serde_json::Value,
}

#[derive(Clone, Debug)]
pub struct NewBlob {
    pub blob_name: String,
    pub blob_type: String,
    pub content: String,
}

/// Variant-specific upload content.
#[derive(Clone, Debug)]
pub enum NewObject {
    File(NewFile),
    Config(NewConfig),
    Blob(NewBlob),
}

impl NewObject {
    pub fn object_type(&self) -> ObjectType {
        match self {
            NewObject::File(_) => ObjectType::File,
            NewObject::Config(_) => ObjectType::Config,
            NewObject::Blob(_) => ObjectType::Blob,
        }
    }
}

/// Group(s) an upload is shared with.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum UploadTarget {
    /// Only the uploader's private group.
    #[default]
    Private,
    /// Every group of the uploader except the public one (`*`).
    AllGroups,
    /// A named group plus the uploader's private group.
    Group(String),
}

impl UploadTarget {
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "*" => UploadTarget::AllGroups,
            name => UploadTarget::Group(name.to_string()),
        }
    }
}

/// Options shared by every upload.
#[derive(Clone, Debug, Default)]
pub struct UploadOptions {
    pub parent: Option<String>,
    pub metakeys: Vec<MetakeyValue>,
    /// Requires `adding_tags` when non-empty.
    pub tags: Vec<String>,
    pub upload_as: UploadTarget,
}

/// Outcome of an upload: the finalized object and whether it was created.
#[derive(Clone, Debug)]
pub struct UploadOutcome {
    pub object: ObjectDetail,
    pub is_new: bool,
}

// ---------------------------------------------------------------------------
// Users, groups, capabilities
// ---------------------------------------------------------------------------

/// Permission flags grantable to groups; a user holds the union of their
/// groups' capabilities.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ManageUsers,
    AccessAllObjects,
    SharingObjects,
    AddingParents,
    ReadingAllAttributes,
    AddingAllAttributes,
    AddingTags,
    RemovingTags,
    AddingComments,
    RemovingComments,
}

impl Capability {
    pub const ALL: [Capability; 10] = [
        Capability::ManageUsers,
        Capability::AccessAllObjects,
        Capability::SharingObjects,
        Capability::AddingParents,
        Capability::ReadingAllAttributes,
        Capability::AddingAllAttributes,
        Capability::AddingTags,
        Capability::RemovingTags,
        Capability::AddingComments,
        Capability::RemovingComments,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ManageUsers => "manage_users",
            Self::AccessAllObjects => "access_all_objects",
            Self::SharingObjects => "sharing_objects",
            Self::AddingParents => "adding_parents",
            Self::ReadingAllAttributes => "reading_all_attributes",
            Self::AddingAllAttributes => "adding_all_attributes",
            Self::AddingTags => "adding_tags",
            Self::RemovingTags => "removing_tags",
            Self::AddingComments => "adding_comments",
            Self::RemovingComments => "removing_comments",
        }
    }
}

impl TryFrom<&str> for Capability {
    type Error = VaultError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Capability::ALL
            .into_iter()
            .find(|cap| cap.as_str() == value)
            .ok_or_else(|| VaultError::Validation(format!("Unknown capability '{value}'")))
    }
}

/// A group as seen from a membership list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GroupRef {
    #[serde(skip)]
    pub id: i64,
    pub name: String,
}

/// A registered group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Group {
    #[serde(skip)]
    pub id: i64,
    pub name: String,
    pub pending_group: bool,
    pub private: bool,
}

/// Authenticated request context: identity, capabilities, memberships.
///
/// Built once per request by `Vault::authenticate` and passed explicitly to
/// every operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub login: String,
    pub capabilities: BTreeSet<Capability>,
    pub groups: Vec<GroupRef>,
}

impl User {
    pub fn group_ids(&self) -> Vec<i64> {
        self.groups.iter().map(|g| g.id).collect()
    }

    pub fn is_member_of(&self, group_id: i64) -> bool {
        self.groups.iter().any(|g| g.id == group_id)
    }

    /// The group named after the user's login.
    pub fn private_group(&self) -> Option<&GroupRef> {
        self.groups.iter().find(|g| g.name == self.login)
    }
}

// ---------------------------------------------------------------------------
// Metakeys and shares
// ---------------------------------------------------------------------------

/// Administratively defined attribute key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetakeyDefinition {
    pub key: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url_template: Option<String>,
    #[serde(default)]
    pub hidden: bool,
}

/// Requested metakey assignment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetakeyValue {
    pub key: String,
    pub value: String,
}

impl MetakeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Metakey attached to an object, as returned to readers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Metakey {
    pub key: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareReason {
    Added,
    Shared,
}

impl ShareReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ShareReason::Added => "added",
            ShareReason::Shared => "shared",
        }
    }

    pub(crate) fn from_db(value: &str) -> Self {
        match value {
            "shared" => ShareReason::Shared,
            _ => ShareReason::Added,
        }
    }
}

/// One sharing grant of an object to a group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ShareRecord {
    pub group_name: String,
    pub access_time: String,
    pub reason_type: ShareReason,
    pub related_object_dhash: String,
    pub related_object_type: ObjectType,
    pub related_user_login: String,
}

// ---------------------------------------------------------------------------
// Tags and comments
// ---------------------------------------------------------------------------

/// Free-text note attached to an object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Comment {
    pub id: i64,
    pub author: String,
    pub comment: String,
    pub timestamp: String,
}

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9_:.\-]{0,63}$").unwrap());

/// Lowercase `tag` and check it: 1-64 chars of letters, digits, `_`, `:`,
/// `.` and `-`, starting with a letter or digit.
pub fn normalize_tag(tag: &str) -> VaultResult<String> {
    let tag = tag.trim().to_lowercase();
    if TAG_RE.is_match(&tag) {
        Ok(tag)
    } else {
        Err(VaultError::Validation(format!("Invalid tag '{tag}'")))
    }
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

/// List/search request parameters.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ListRequest {
    #[serde(default)]
    pub older_than: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
    /// Deprecated offset pagination, ignored when `older_than` is given.
    #[serde(default)]
    pub page: Option<i64>,
}

/// Per-family config statistics.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ConfigFamilyStats {
    pub family: String,
    pub last_upload: String,
    pub count: i64,
}

static METAKEY_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,32}$").unwrap());

/// Validate a metakey name: 1-32 chars of letters, digits, `_` and `-`.
pub fn validate_metakey_name(key: &str) -> VaultResult<()> {
    if METAKEY_NAME_RE.is_match(key) {
        Ok(())
    } else {
        Err(VaultError::Validation(
            "Key should contain max 32 chars and include only letters, digits, underscores and dashes"
                .to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_type_round_trips_through_tag() {
        for tag in ["object", "file", "config", "blob"] {
            assert_eq!(ObjectType::try_from(tag).unwrap().as_str(), tag);
        }
        assert!(ObjectType::try_from("sample").is_err());
    }

    #[test]
    fn supertype_admits_every_variant() {
        assert!(ObjectType::Object.admits(ObjectType::Blob));
        assert!(ObjectType::File.admits(ObjectType::File));
        assert!(!ObjectType::File.admits(ObjectType::Config));
    }

    #[test]
    fn upload_target_parses_wildcard() {
        assert_eq!(UploadTarget::parse("*"), UploadTarget::AllGroups);
        assert_eq!(
            UploadTarget::parse("teamA"),
            UploadTarget::Group("teamA".into())
        );
        assert_eq!(UploadTarget::default(), UploadTarget::Private);
    }

    #[test]
    fn capability_names_parse() {
        assert_eq!(
            Capability::try_from("adding_parents").unwrap(),
            Capability::AddingParents
        );
        assert!(Capability::try_from("root").is_err());
    }

    #[test]
    fn metakey_names_are_restricted() {
        assert!(validate_metakey_name("family-tag_1").is_ok());
        assert!(validate_metakey_name("").is_err());
        assert!(validate_metakey_name("has space").is_err());
        assert!(validate_metakey_name(&"k".repeat(33)).is_err());
    }

    #[test]
    fn tags_are_lowercased_and_restricted() {
        assert_eq!(normalize_tag(" Ransomware:Lockbit ").unwrap(), "ransomware:lockbit");
        assert_eq!(normalize_tag("feed.2024-q1").unwrap(), "feed.2024-q1");
        assert!(normalize_tag("").is_err());
        assert!(normalize_tag("-leading").is_err());
        assert!(normalize_tag("a,b").is_err());
        assert!(normalize_tag(&"t".repeat(65)).is_err());
    }

    #[test]
    fn record_serialises_dhash_as_id() {
        let record = ObjectRecord {
            id: 7,
            dhash: "abc".into(),
            upload_time: "2024-01-01T00:00:00.000000Z".into(),
            tags: vec!["feed".into()],
            kind: ObjectKind::Blob(BlobAttrs {
                blob_name: "n".into(),
                blob_type: "t".into(),
                blob_size: 1,
                content: "x".into(),
                last_seen: "2024-01-01T00:00:00.000000Z".into(),
            }),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["id"], "abc");
        assert_eq!(json["type"], "blob");
        assert_eq!(json["blob_size"], 1);
        assert_eq!(json["tags"][0], "feed");
    }
}
