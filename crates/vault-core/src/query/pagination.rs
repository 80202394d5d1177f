//! Cursor pagination over insertion order.

use crate::models::ObjectRecord;
use crate::query::predicate::Predicate;

/// Strict upper bound for listings continuing after `pivot`.
///
/// Listings are ordered by descending `id`, so chaining the last returned
/// object as the next pivot never repeats or skips a record.
pub fn boundary(pivot: &ObjectRecord) -> Predicate {
    Predicate::sql("o.id < ").push_param(pivot.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Viewer;
    use crate::models::{BlobAttrs, ObjectKind, User};
    use rusqlite::types::Value;

    #[test]
    fn boundary_binds_pivot_row_id() {
        let pivot = ObjectRecord {
            id: 42,
            dhash: "ff".into(),
            upload_time: String::new(),
            tags: Vec::new(),
            kind: ObjectKind::Blob(BlobAttrs {
                blob_name: String::new(),
                blob_type: String::new(),
                blob_size: 0,
                content: String::new(),
                last_seen: String::new(),
            }),
        };
        let viewer = Viewer::of(&User {
            id: 1,
            login: "u".into(),
            capabilities: Default::default(),
            groups: Vec::new(),
        });
        let rendered = boundary(&pivot).render(&viewer);
        assert_eq!(rendered.sql, "o.id < ?1");
        assert_eq!(rendered.params, vec![Value::Integer(42)]);
    }
}
