//! Shared guardrails for query payload bounds and listing limits.

use crate::errors::{VaultError, VaultResult};

/// Longest accepted query text, in characters.
pub const MAX_QUERY_LENGTH: usize = 4096;
/// Objects returned per listing page.
pub const PAGE_SIZE: i64 = 10;
/// Nesting bound for parenthesised groups.
pub const MAX_QUERY_DEPTH: usize = 64;
/// Most field terms a query may contain, field groups counted per value.
/// Keeps the compiled SQL well inside SQLite's expression depth limit.
pub const MAX_QUERY_TERMS: usize = 256;

pub fn clamp_int(value: i64, minimum: i64, maximum: i64) -> i64 {
    value.max(minimum).min(maximum)
}

/// Trim `query` and reject it when it exceeds [`MAX_QUERY_LENGTH`].
pub fn check_query_length(query: &str) -> VaultResult<&str> {
    let stripped = query.trim();
    if stripped.chars().count() > MAX_QUERY_LENGTH {
        return Err(VaultError::QuerySyntax(format!(
            "Query is longer than {MAX_QUERY_LENGTH} characters"
        )));
    }
    Ok(stripped)
}

pub fn check_term_count(terms: usize) -> VaultResult<()> {
    if terms > MAX_QUERY_TERMS {
        return Err(VaultError::QuerySyntax(format!(
            "Query has more than {MAX_QUERY_TERMS} terms"
        )));
    }
    Ok(())
}

/// Row offset of a legacy 1-based `page`.
pub fn page_offset(page: i64) -> VaultResult<i64> {
    if page < 1 {
        return Err(VaultError::Validation("page must be greater than 0".into()));
    }
    Ok(clamp_int(page - 1, 0, i64::MAX / PAGE_SIZE) * PAGE_SIZE)
}
