//! Composable SQL predicates over the `objects o` row source.
//!
//! A [`Predicate`] is built without knowing who is asking: visibility checks
//! are kept as deferred parts and only bound to concrete group ids by
//! [`Predicate::render`]. This keeps compiled queries pure and cacheable.

use rusqlite::types::Value;

use crate::auth::Viewer;

#[derive(Clone, Debug, PartialEq)]
enum Part {
    Sql(String),
    Param(Value),
    /// "the object aliased `alias` is visible to the viewer"
    Visible(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Predicate {
    parts: Vec<Part>,
}

/// A predicate bound to a viewer: SQL text with `?N` placeholders and the
/// values to bind, in order.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderedSql {
    pub sql: String,
    pub params: Vec<Value>,
}

impl RenderedSql {
    /// Append a bind value and return its placeholder.
    pub fn bind(&mut self, value: impl Into<Value>) -> String {
        self.params.push(value.into());
        format!("?{}", self.params.len())
    }

    pub fn param_refs(&self) -> Vec<&dyn rusqlite::types::ToSql> {
        self.params
            .iter()
            .map(|p| p as &dyn rusqlite::types::ToSql)
            .collect()
    }
}

const ALWAYS: &str = "1 = 1";
const NEVER: &str = "0 = 1";

impl Predicate {
    /// The predicate that matches every row.
    pub fn always() -> Self {
        Self::sql(ALWAYS)
    }

    pub fn never() -> Self {
        Self::sql(NEVER)
    }

    pub fn sql(text: impl Into<String>) -> Self {
        Self {
            parts: vec![Part::Sql(text.into())],
        }
    }

    /// Visibility of the object aliased `alias` for the eventual viewer.
    pub fn visible(alias: &str) -> Self {
        Self {
            parts: vec![Part::Visible(alias.to_string())],
        }
    }

    pub fn push_sql(mut self, text: impl Into<String>) -> Self {
        self.parts.push(Part::Sql(text.into()));
        self
    }

    pub fn push_param(mut self, value: impl Into<Value>) -> Self {
        self.parts.push(Part::Param(value.into()));
        self
    }

    pub fn push_visible(mut self, alias: &str) -> Self {
        self.parts.push(Part::Visible(alias.to_string()));
        self
    }

    /// Append every part of `other` verbatim.
    pub fn push_predicate(mut self, other: Predicate) -> Self {
        self.parts.extend(other.parts);
        self
    }

    pub fn is_always(&self) -> bool {
        matches!(self.parts.as_slice(), [Part::Sql(s)] if s == ALWAYS)
    }

    pub fn and(self, other: Predicate) -> Predicate {
        Predicate::all([self, other])
    }

    pub fn or(self, other: Predicate) -> Predicate {
        Predicate::any([self, other])
    }

    /// Conjunction of `items` as one flat `(a) AND (b) AND ...` list.
    /// Always-true items are dropped; no items means always true.
    pub fn all(items: impl IntoIterator<Item = Predicate>) -> Predicate {
        let items: Vec<Predicate> = items.into_iter().filter(|p| !p.is_always()).collect();
        join(items, " AND ").unwrap_or_else(Predicate::always)
    }

    /// Disjunction of `items` as one flat `(a) OR (b) OR ...` list.
    /// An always-true item makes the whole disjunction true; no items
    /// means never true.
    pub fn any(items: impl IntoIterator<Item = Predicate>) -> Predicate {
        let items: Vec<Predicate> = items.into_iter().collect();
        if items.iter().any(Predicate::is_always) {
            return Predicate::always();
        }
        join(items, " OR ").unwrap_or_else(Predicate::never)
    }

    pub fn negate(self) -> Predicate {
        Predicate::sql("NOT (").push_predicate(self).push_sql(")")
    }

    /// Bind the predicate to `viewer`, numbering placeholders from 1.
    pub fn render(&self, viewer: &Viewer) -> RenderedSql {
        let mut out = RenderedSql {
            sql: String::new(),
            params: Vec::new(),
        };
        self.render_into(viewer, &mut out);
        out
    }

    /// Bind the predicate to `viewer`, appending to an existing rendering.
    pub fn render_into(&self, viewer: &Viewer, out: &mut RenderedSql) {
        for part in &self.parts {
            match part {
                Part::Sql(text) => out.sql.push_str(text),
                Part::Param(value) => {
                    let placeholder = out.bind(value.clone());
                    out.sql.push_str(&placeholder);
                }
                Part::Visible(alias) => render_visible(alias, viewer, out),
            }
        }
    }
}

fn join(mut items: Vec<Predicate>, operator: &str) -> Option<Predicate> {
    match items.len() {
        0 => None,
        1 => items.pop(),
        _ => {
            let mut out = Predicate::sql("(");
            for (i, item) in items.into_iter().enumerate() {
                if i > 0 {
                    out = out.push_sql(format!("){operator}("));
                }
                out = out.push_predicate(item);
            }
            Some(out.push_sql(")"))
        }
    }
}

fn render_visible(alias: &str, viewer: &Viewer, out: &mut RenderedSql) {
    if viewer.is_unrestricted() {
        out.sql.push_str(ALWAYS);
        return;
    }
    if viewer.group_ids().is_empty() {
        out.sql.push_str(NEVER);
        return;
    }
    let placeholders: Vec<String> = viewer
        .group_ids()
        .iter()
        .map(|gid| out.bind(*gid))
        .collect();
    out.sql.push_str(&format!(
        "EXISTS (SELECT 1 FROM permissions vp_{alias} WHERE vp_{alias}.object_id = {alias}.id \
         AND vp_{alias}.group_id IN ({}))",
        placeholders.join(", ")
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Capability, GroupRef, User};

    fn viewer(groups: &[i64], caps: &[Capability]) -> Viewer {
        Viewer::of(&User {
            id: 1,
            login: "u".into(),
            capabilities: caps.iter().copied().collect(),
            groups: groups
                .iter()
                .map(|id| GroupRef {
                    id: *id,
                    name: format!("g{id}"),
                })
                .collect(),
        })
    }

    #[test]
    fn always_is_identity_for_and() {
        let p = Predicate::sql("o.id < ").push_param(5i64);
        assert_eq!(Predicate::always().and(p.clone()), p);
        assert_eq!(p.clone().and(Predicate::always()), p);
    }

    #[test]
    fn lists_join_flat() {
        let terms = (1..=3i64).map(|n| Predicate::sql("x = ").push_param(n));
        let r = Predicate::all(terms).render(&viewer(&[], &[]));
        assert_eq!(r.sql, "(x = ?1) AND (x = ?2) AND (x = ?3)");

        let terms = (1..=3i64).map(|n| Predicate::sql("x = ").push_param(n));
        let r = Predicate::any(terms).render(&viewer(&[], &[]));
        assert_eq!(r.sql, "(x = ?1) OR (x = ?2) OR (x = ?3)");

        assert!(Predicate::all(Vec::new()).is_always());
        assert_eq!(Predicate::any(Vec::new()), Predicate::never());
        assert!(Predicate::any([Predicate::never(), Predicate::always()]).is_always());
    }

    #[test]
    fn params_are_numbered_in_order() {
        let p = Predicate::sql("a = ")
            .push_param("x".to_string())
            .and(Predicate::sql("b = ").push_param(2i64));
        let r = p.render(&viewer(&[], &[]));
        assert_eq!(r.sql, "(a = ?1) AND (b = ?2)");
        assert_eq!(r.params, vec![Value::Text("x".into()), Value::Integer(2)]);
    }

    #[test]
    fn visibility_binds_viewer_groups() {
        let p = Predicate::sql("x = ")
            .push_param(1i64)
            .and(Predicate::visible("o"));
        let r = p.render(&viewer(&[3, 4], &[]));
        assert!(r.sql.contains("vp_o.group_id IN (?2, ?3)"));
        assert_eq!(r.params[1..], [Value::Integer(3), Value::Integer(4)]);
    }

    #[test]
    fn visibility_degenerates_for_special_viewers() {
        let p = Predicate::visible("o");
        assert_eq!(p.render(&viewer(&[], &[])).sql, "0 = 1");
        assert_eq!(
            p.render(&viewer(&[1], &[Capability::AccessAllObjects])).sql,
            "1 = 1"
        );
    }

    #[test]
    fn rendering_continues_existing_numbering() {
        let mut out = RenderedSql {
            sql: "SELECT ?1".into(),
            params: vec![Value::Integer(0)],
        };
        out.sql.push_str(" WHERE ");
        Predicate::sql("a = ").push_param(9i64).render_into(&viewer(&[], &[]), &mut out);
        assert_eq!(out.sql, "SELECT ?1 WHERE a = ?2");
    }
}
