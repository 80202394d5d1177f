//! Per-type field registry and value coercion for the query compiler.

use std::sync::LazyLock;

use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Utc};
use regex::Regex;

use crate::errors::{VaultError, VaultResult};
use crate::models::{validate_metakey_name, ObjectType};

/// Value domain of a column field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    /// Case-sensitive text.
    Text,
    /// Hex digest: values are compared lowercased.
    Hash,
    Integer,
    /// RFC 3339 timestamp column.
    DateTime,
}

/// Relation direction of `parent:` / `child:` terms.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Relation {
    /// The object has a parent matching the value.
    Parent,
    /// The object has a child matching the value.
    Child,
}

/// A query field resolved against the queried object type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Field {
    Column {
        column: &'static str,
        kind: FieldKind,
    },
    /// `cfg.<path>` lookup inside a config payload.
    ConfigPath(String),
    /// `meta.<key>` attribute lookup.
    Metakey(String),
    Relation(Relation),
    /// `tag:` matches any tag of the object, case-insensitively.
    Tag,
    /// `comment:` matches the text of any comment on the object.
    Comment,
}

const COMMON_FIELDS: &[(&str, &str, FieldKind)] = &[
    ("dhash", "o.dhash", FieldKind::Hash),
    ("upload_time", "o.upload_time", FieldKind::DateTime),
    ("type", "o.type", FieldKind::Text),
];

const FILE_FIELDS: &[(&str, &str, FieldKind)] = &[
    ("file_name", "f.file_name", FieldKind::Text),
    ("file_size", "f.file_size", FieldKind::Integer),
    ("file_type", "f.file_type", FieldKind::Text),
    ("md5", "f.md5", FieldKind::Hash),
    ("sha1", "f.sha1", FieldKind::Hash),
    ("sha256", "f.sha256", FieldKind::Hash),
    ("sha512", "f.sha512", FieldKind::Hash),
    ("crc32", "f.crc32", FieldKind::Hash),
];

const CONFIG_FIELDS: &[(&str, &str, FieldKind)] = &[
    ("family", "c.family", FieldKind::Text),
    ("config_type", "c.config_type", FieldKind::Text),
];

const BLOB_FIELDS: &[(&str, &str, FieldKind)] = &[
    ("blob_name", "b.blob_name", FieldKind::Text),
    ("blob_type", "b.blob_type", FieldKind::Text),
    ("blob_size", "b.blob_size", FieldKind::Integer),
    ("content", "b.content", FieldKind::Text),
    ("last_seen", "b.last_seen", FieldKind::DateTime),
];

fn variant_fields(object_type: ObjectType) -> &'static [(&'static str, &'static str, FieldKind)] {
    match object_type {
        ObjectType::File => FILE_FIELDS,
        ObjectType::Config => CONFIG_FIELDS,
        ObjectType::Blob => BLOB_FIELDS,
        ObjectType::Object => &[],
    }
}

static CONFIG_PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+(\.[A-Za-z0-9_-]+)*$").unwrap());

/// Resolve `name` for a query over `object_type`.
pub fn resolve(name: &str, object_type: ObjectType) -> VaultResult<Field> {
    if let Some(key) = name.strip_prefix("meta.") {
        validate_metakey_name(key)
            .map_err(|_| VaultError::QuerySemantics(format!("Invalid metakey name '{key}'")))?;
        return Ok(Field::Metakey(key.to_string()));
    }
    if let Some(path) = name.strip_prefix("cfg.") {
        if object_type != ObjectType::Config {
            return Err(unknown_field(name, object_type));
        }
        if !CONFIG_PATH_RE.is_match(path) {
            return Err(VaultError::QuerySemantics(format!(
                "Invalid config path '{path}'"
            )));
        }
        return Ok(Field::ConfigPath(path.to_string()));
    }
    match name {
        "parent" => return Ok(Field::Relation(Relation::Parent)),
        "child" => return Ok(Field::Relation(Relation::Child)),
        "tag" => return Ok(Field::Tag),
        "comment" => return Ok(Field::Comment),
        _ => {}
    }
    COMMON_FIELDS
        .iter()
        .chain(variant_fields(object_type))
        .find(|(field, _, _)| *field == name)
        .map(|&(_, column, kind)| Field::Column { column, kind })
        .ok_or_else(|| unknown_field(name, object_type))
}

fn unknown_field(name: &str, object_type: ObjectType) -> VaultError {
    VaultError::QuerySemantics(format!(
        "Unknown field '{name}' for object type '{object_type}'"
    ))
}

/// JSON path expression for a dotted `cfg.` path.
pub fn json_path(path: &str) -> String {
    let mut out = String::from("$");
    for segment in path.split('.') {
        out.push_str(&format!(".\"{segment}\""));
    }
    out
}

pub fn coerce_integer(field: &str, value: &str) -> VaultResult<i64> {
    value.trim().parse::<i64>().map_err(|_| {
        VaultError::QuerySemantics(format!(
            "Field '{field}' expects an integer, got '{value}'"
        ))
    })
}

/// Half-open span of time named by a query value.
///
/// A date covers the whole day; an instant covers one microsecond, which is
/// the resolution of stored timestamps.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimeSpan {
    pub start: String,
    pub end: String,
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn coerce_datetime(field: &str, value: &str) -> VaultResult<TimeSpan> {
    let value = value.trim();
    let (start, length) = if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        let start = date
            .and_hms_opt(0, 0, 0)
            .map(|naive| naive.and_utc())
            .ok_or_else(|| invalid_date(field, value))?;
        (start, Duration::days(1))
    } else if let Ok(instant) = DateTime::parse_from_rfc3339(value) {
        (instant.with_timezone(&Utc), Duration::microseconds(1))
    } else {
        return Err(invalid_date(field, value));
    };
    let end = start
        .checked_add_signed(length)
        .ok_or_else(|| invalid_date(field, value))?;
    Ok(TimeSpan {
        start: format_ts(start),
        end: format_ts(end),
    })
}

fn invalid_date(field: &str, value: &str) -> VaultError {
    VaultError::QuerySemantics(format!(
        "Field '{field}' expects a date (YYYY-MM-DD) or RFC 3339 timestamp, got '{value}'"
    ))
}
