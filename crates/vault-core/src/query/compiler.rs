//! Compile query text into a viewer-independent [`Predicate`].

use tracing::debug;

use crate::errors::{VaultError, VaultResult};
use crate::models::ObjectType;
use crate::query::fields::{self, Field, FieldKind, Relation};
use crate::query::guards::{check_query_length, check_term_count};
use crate::query::parser::{self, Bound, Condition, Expr, Value};
use crate::query::predicate::Predicate;
use crate::query::tokenizer::{tokenize, CmpOp};

/// Result of compiling a query.
///
/// `metakeys` lists every `meta.<key>` the query reads; the caller must be
/// allowed to read all of them before the predicate is executed.
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledQuery {
    pub predicate: Predicate,
    pub metakeys: Vec<String>,
}

impl CompiledQuery {
    pub fn always() -> Self {
        Self {
            predicate: Predicate::always(),
            metakeys: Vec::new(),
        }
    }
}

/// Compile `text` for a listing of `object_type`.
///
/// Empty text yields the always-true predicate. Compilation never touches
/// the store.
pub fn compile(text: &str, object_type: ObjectType) -> VaultResult<CompiledQuery> {
    let text = check_query_length(text)?;
    if text.is_empty() {
        return Ok(CompiledQuery::always());
    }
    let tokens = tokenize(text)?;
    let expr = parser::parse(&tokens)?;
    let mut compiler = Compiler {
        object_type,
        metakeys: Vec::new(),
        terms: 0,
    };
    let predicate = compiler.compile_expr(&expr)?;
    debug!(object_type = %object_type, query = text, "compiled query");
    Ok(CompiledQuery {
        predicate,
        metakeys: compiler.metakeys,
    })
}

struct Compiler {
    object_type: ObjectType,
    metakeys: Vec<String>,
    terms: usize,
}

impl Compiler {
    fn compile_expr(&mut self, expr: &Expr) -> VaultResult<Predicate> {
        match expr {
            Expr::And(items) => Ok(Predicate::all(self.compile_all(items)?)),
            Expr::Or(items) => Ok(Predicate::any(self.compile_all(items)?)),
            Expr::Not(inner) => Ok(self.compile_expr(inner)?.negate()),
            Expr::Term { field, cond } => self.compile_term(field, cond),
        }
    }

    fn compile_all(&mut self, items: &[Expr]) -> VaultResult<Vec<Predicate>> {
        items.iter().map(|item| self.compile_expr(item)).collect()
    }

    fn compile_term(&mut self, name: &str, cond: &Condition) -> VaultResult<Predicate> {
        self.terms += 1;
        check_term_count(self.terms)?;
        match fields::resolve(name, self.object_type)? {
            Field::Column { column, kind } => column_condition(name, column, kind, cond),
            Field::ConfigPath(path) => config_condition(&path, cond),
            Field::Metakey(key) => {
                if !self.metakeys.contains(&key) {
                    self.metakeys.push(key.clone());
                }
                let inner = text_condition("mk.value", cond)?;
                Ok(Predicate::sql(
                    "EXISTS (SELECT 1 FROM metakeys mk WHERE mk.object_id = o.id AND mk.key = ",
                )
                .push_param(key)
                .push_sql(" AND ")
                .push_predicate(inner)
                .push_sql(")"))
            }
            Field::Relation(relation) => relation_condition(relation, cond),
            Field::Tag => Ok(attached(
                "tags",
                "tq",
                text_condition_with("tq.tag", cond, |v| v.to_lowercase())?,
            )),
            Field::Comment => Ok(attached("comments", "cq", text_condition("cq.comment", cond)?)),
        }
    }
}

/// `EXISTS` over the rows of `table` attached to `o`.
fn attached(table: &str, alias: &str, inner: Predicate) -> Predicate {
    Predicate::sql(format!(
        "EXISTS (SELECT 1 FROM {table} {alias} WHERE {alias}.object_id = o.id AND "
    ))
    .push_predicate(inner)
    .push_sql(")")
}

fn like(column: &str, pattern: &str) -> Predicate {
    Predicate::sql(format!("{column} LIKE "))
        .push_param(pattern.to_string())
        .push_sql(" ESCAPE '\\'")
}

fn compare(column: &str, op: &str, value: impl Into<rusqlite::types::Value>) -> Predicate {
    Predicate::sql(format!("{column} {op} ")).push_param(value)
}

fn is_not_null(column: &str) -> Predicate {
    Predicate::sql(format!("{column} IS NOT NULL"))
}

fn range<T, F>(column: &str, low: &Bound, high: &Bound, convert: F) -> VaultResult<Predicate>
where
    T: Into<rusqlite::types::Value>,
    F: Fn(&str) -> VaultResult<T>,
{
    let mut out = is_not_null(column);
    if let Some(value) = &low.value {
        let op = if low.inclusive { ">=" } else { ">" };
        out = out.and(compare(column, op, convert(value)?));
    }
    if let Some(value) = &high.value {
        let op = if high.inclusive { "<=" } else { "<" };
        out = out.and(compare(column, op, convert(value)?));
    }
    Ok(out)
}

/// Text semantics: exact match, `LIKE` for wildcards, lexical comparisons.
fn text_condition(column: &str, cond: &Condition) -> VaultResult<Predicate> {
    text_condition_with(column, cond, |v| v.to_string())
}

fn text_condition_with(
    column: &str,
    cond: &Condition,
    normalize: impl Fn(&str) -> String,
) -> VaultResult<Predicate> {
    Ok(match cond {
        Condition::Match(value) if value.is_any() => is_not_null(column),
        Condition::Match(Value::Exact(text)) => compare(column, "=", normalize(text)),
        Condition::Match(Value::Pattern { like: pattern, .. }) => like(column, &normalize(pattern)),
        Condition::Compare(op, text) => compare(column, op.as_sql(), normalize(text)),
        Condition::Range { low, high } => range(column, low, high, |v| Ok(normalize(v)))?,
    })
}

fn column_condition(
    field: &str,
    column: &str,
    kind: FieldKind,
    cond: &Condition,
) -> VaultResult<Predicate> {
    match kind {
        FieldKind::Text => text_condition(column, cond),
        FieldKind::Hash => text_condition_with(column, cond, |v| v.to_lowercase()),
        FieldKind::Integer => integer_condition(field, column, cond),
        FieldKind::DateTime => datetime_condition(field, column, cond),
    }
}

fn integer_condition(field: &str, column: &str, cond: &Condition) -> VaultResult<Predicate> {
    Ok(match cond {
        Condition::Match(value) if value.is_any() => is_not_null(column),
        Condition::Match(Value::Pattern { text, .. }) => {
            return Err(VaultError::QuerySemantics(format!(
                "Field '{field}' does not support wildcards: '{text}'"
            )))
        }
        Condition::Match(Value::Exact(text)) => {
            compare(column, "=", fields::coerce_integer(field, text)?)
        }
        Condition::Compare(op, text) => {
            compare(column, op.as_sql(), fields::coerce_integer(field, text)?)
        }
        Condition::Range { low, high } => {
            range(column, low, high, |v| fields::coerce_integer(field, v))?
        }
    })
}

fn datetime_condition(field: &str, column: &str, cond: &Condition) -> VaultResult<Predicate> {
    let since = |v: &str| -> VaultResult<Predicate> {
        Ok(compare(column, ">=", fields::coerce_datetime(field, v)?.start))
    };
    let after = |v: &str| -> VaultResult<Predicate> {
        Ok(compare(column, ">=", fields::coerce_datetime(field, v)?.end))
    };
    let before = |v: &str| -> VaultResult<Predicate> {
        Ok(compare(column, "<", fields::coerce_datetime(field, v)?.start))
    };
    let until = |v: &str| -> VaultResult<Predicate> {
        Ok(compare(column, "<", fields::coerce_datetime(field, v)?.end))
    };

    match cond {
        Condition::Match(value) if value.is_any() => Ok(is_not_null(column)),
        Condition::Match(Value::Pattern { text, .. }) => Err(VaultError::QuerySemantics(format!(
            "Field '{field}' does not support wildcards: '{text}'"
        ))),
        Condition::Match(Value::Exact(text)) => Ok(since(text)?.and(until(text)?)),
        Condition::Compare(op, text) => match op {
            CmpOp::Gt => after(text),
            CmpOp::Ge => since(text),
            CmpOp::Lt => before(text),
            CmpOp::Le => until(text),
        },
        Condition::Range { low, high } => {
            let mut out = is_not_null(column);
            if let Some(value) = &low.value {
                out = out.and(if low.inclusive { since(value)? } else { after(value)? });
            }
            if let Some(value) = &high.value {
                out = out.and(if high.inclusive { until(value)? } else { before(value)? });
            }
            Ok(out)
        }
    }
}

/// `cfg.<path>` terms match when the addressed value, or any element of the
/// addressed array, satisfies the condition.
fn config_condition(path: &str, cond: &Condition) -> VaultResult<Predicate> {
    const TEXT: &str = "CAST(je.value AS TEXT)";
    const NUMBER: &str = "je.value";
    const IS_NUMBER: &str = "je.type IN ('integer', 'real')";

    let numeric = |v: &str| v.trim().parse::<f64>().ok();
    let inner = match cond {
        Condition::Match(_) => text_condition(TEXT, cond)?,
        Condition::Compare(op, text) => match numeric(text) {
            Some(n) => Predicate::sql(IS_NUMBER).and(compare(NUMBER, op.as_sql(), n)),
            None => compare(TEXT, op.as_sql(), text.clone()),
        },
        Condition::Range { low, high } => {
            let all_numeric = [&low.value, &high.value]
                .into_iter()
                .flatten()
                .all(|v| numeric(v.as_str()).is_some());
            if all_numeric {
                let convert = |v: &str| {
                    numeric(v).ok_or_else(|| {
                        VaultError::QuerySemantics(format!("Expected a number, got '{v}'"))
                    })
                };
                Predicate::sql(IS_NUMBER).and(range(NUMBER, low, high, convert)?)
            } else {
                range(TEXT, low, high, |v| Ok(v.to_string()))?
            }
        }
    };
    Ok(Predicate::sql("EXISTS (SELECT 1 FROM json_each(c.cfg, ")
        .push_param(fields::json_path(path))
        .push_sql(") je WHERE ")
        .push_predicate(inner)
        .push_sql(")"))
}

/// `parent:` / `child:` terms match on the related object's fingerprint.
/// Related objects the viewer cannot see never match.
fn relation_condition(relation: Relation, cond: &Condition) -> VaultResult<Predicate> {
    let (alias, join_col, anchor_col) = match relation {
        Relation::Parent => ("po", "parent_id", "child_id"),
        Relation::Child => ("co", "child_id", "parent_id"),
    };
    let column = format!("{alias}.dhash");
    let inner = text_condition_with(&column, cond, |v| v.to_lowercase())?;
    Ok(Predicate::sql(format!(
        "EXISTS (SELECT 1 FROM relations r_{alias} JOIN objects {alias} ON {alias}.id = r_{alias}.{join_col} \
         WHERE r_{alias}.{anchor_col} = o.id AND "
    ))
    .push_predicate(inner)
    .push_sql(" AND ")
    .push_visible(alias)
    .push_sql(")"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Viewer;
    use crate::models::{Capability, User};
    use rusqlite::types::Value as SqlValue;

    fn unrestricted() -> Viewer {
        Viewer::of(&User {
            id: 1,
            login: "admin".into(),
            capabilities: [Capability::AccessAllObjects].into_iter().collect(),
            groups: Vec::new(),
        })
    }

    fn render(text: &str, object_type: ObjectType) -> (String, Vec<SqlValue>) {
        let compiled = compile(text, object_type).unwrap();
        let rendered = compiled.predicate.render(&unrestricted());
        (rendered.sql, rendered.params)
    }

    #[test]
    fn empty_query_is_always_true() {
        assert!(compile("", ObjectType::File).unwrap().predicate.is_always());
        assert!(compile("   ", ObjectType::Blob).unwrap().predicate.is_always());
    }

    #[test]
    fn integer_comparison() {
        let (sql, params) = render("file_size:>1000", ObjectType::File);
        assert_eq!(sql, "f.file_size > ?1");
        assert_eq!(params, vec![SqlValue::Integer(1000)]);
    }

    #[test]
    fn tags_match_case_insensitively_and_comments_by_text() {
        let (sql, params) = render("tag:Ransom*", ObjectType::File);
        assert_eq!(
            sql,
            "EXISTS (SELECT 1 FROM tags tq WHERE tq.object_id = o.id AND tq.tag LIKE ?1 ESCAPE '\\')"
        );
        assert_eq!(params, vec![SqlValue::Text("ransom%".into())]);

        let (sql, _) = render("comment:\"packed with upx\"", ObjectType::Object);
        assert!(sql.starts_with("EXISTS (SELECT 1 FROM comments cq WHERE cq.object_id = o.id"));
        assert!(sql.contains("cq.comment = ?1"));
    }

    #[test]
    fn integer_fields_reject_text() {
        let err = compile("file_size:big", ObjectType::File).unwrap_err();
        assert!(matches!(err, VaultError::QuerySemantics(_)));
        assert!(err.is_validation());
    }

    #[test]
    fn wildcards_compile_to_like() {
        let (sql, params) = render("file_name:*.exe", ObjectType::File);
        assert_eq!(sql, "f.file_name LIKE ?1 ESCAPE '\\'");
        assert_eq!(params, vec![SqlValue::Text("%.exe".into())]);
    }

    #[test]
    fn hashes_are_lowercased() {
        let (_, params) = render("md5:ABCDEF", ObjectType::File);
        assert_eq!(params, vec![SqlValue::Text("abcdef".into())]);
    }

    #[test]
    fn date_equality_covers_the_day() {
        let (sql, params) = render("upload_time:2024-03-01", ObjectType::Object);
        assert_eq!(sql, "(o.upload_time >= ?1) AND (o.upload_time < ?2)");
        assert_eq!(
            params,
            vec![
                SqlValue::Text("2024-03-01T00:00:00.000000Z".into()),
                SqlValue::Text("2024-03-02T00:00:00.000000Z".into()),
            ]
        );
    }

    #[test]
    fn open_range_bound_is_omitted() {
        let (sql, params) = render("blob_size:[10 TO *]", ObjectType::Blob);
        assert_eq!(sql, "(b.blob_size IS NOT NULL) AND (b.blob_size >= ?1)");
        assert_eq!(params, vec![SqlValue::Integer(10)]);
    }

    #[test]
    fn boolean_structure_is_preserved() {
        let (sql, _) = render("family:a OR NOT family:b", ObjectType::Config);
        assert_eq!(sql, "(c.family = ?1) OR (NOT (c.family = ?2))");
    }

    #[test]
    fn metakeys_are_collected() {
        let compiled = compile("meta.campaign:x OR meta.campaign:y", ObjectType::Object).unwrap();
        assert_eq!(compiled.metakeys, vec!["campaign".to_string()]);
    }

    #[test]
    fn relation_terms_defer_visibility() {
        let compiled = compile("parent:ABC", ObjectType::Blob).unwrap();
        let restricted = Viewer::of(&User {
            id: 2,
            login: "bob".into(),
            capabilities: Default::default(),
            groups: vec![crate::models::GroupRef {
                id: 5,
                name: "bob".into(),
            }],
        });
        let rendered = compiled.predicate.render(&restricted);
        assert!(rendered.sql.contains("vp_po.group_id IN (?2)"));
        assert_eq!(
            rendered.params,
            vec![SqlValue::Text("abc".into()), SqlValue::Integer(5)]
        );
    }

    #[test]
    fn unknown_fields_are_semantic_errors() {
        assert!(matches!(
            compile("family:x", ObjectType::File),
            Err(VaultError::QuerySemantics(_))
        ));
        assert!(matches!(
            compile("file_name:(a", ObjectType::File),
            Err(VaultError::QuerySyntax(_))
        ));
    }

    #[test]
    fn conjunctions_stay_flat() {
        let (sql, _) = render("blob_name:a blob_name:b blob_name:c", ObjectType::Blob);
        assert_eq!(
            sql,
            "(b.blob_name = ?1) AND (b.blob_name = ?2) AND (b.blob_name = ?3)"
        );
    }

    #[test]
    fn term_count_is_capped() {
        use crate::query::guards::MAX_QUERY_TERMS;

        let at_limit = format!("blob_name:({})", "a ".repeat(MAX_QUERY_TERMS));
        assert!(compile(&at_limit, ObjectType::Blob).is_ok());

        let too_many = format!("blob_name:({})", "a ".repeat(2000));
        assert!(too_many.len() < crate::query::guards::MAX_QUERY_LENGTH);
        assert!(matches!(
            compile(&too_many, ObjectType::Blob),
            Err(VaultError::QuerySyntax(_))
        ));
    }

    #[test]
    fn out_of_range_dates_are_semantic_errors() {
        assert!(matches!(
            compile("upload_time:+262142-12-31", ObjectType::Object),
            Err(VaultError::QuerySemantics(_))
        ));
    }
}
