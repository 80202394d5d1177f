//! Error types for the vault core library.

/// Top-level error enum for the vault core library.
///
/// `NotFound` deliberately covers both "does not exist" and "exists but is
/// not visible to the caller" so that no operation leaks object or group
/// existence.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("Not authenticated")]
    AuthenticationRequired,

    #[error("Forbidden: {0}")]
    AuthorizationDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Query syntax error: {0}")]
    QuerySyntax(String),

    #[error("Query error: {0}")]
    QuerySemantics(String),

    #[error("Object {dhash} already exists and is not a {expected}")]
    ObjectTypeConflict { dhash: String, expected: String },

    #[error("File cannot be empty")]
    EmptyFile,

    #[error("Database schema version {found} does not match {expected}")]
    SchemaVersion { found: String, expected: i32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl VaultError {
    /// HTTP-class status code the transport layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            VaultError::Validation(_)
            | VaultError::QuerySyntax(_)
            | VaultError::QuerySemantics(_)
            | VaultError::EmptyFile => 400,
            VaultError::AuthenticationRequired => 401,
            VaultError::AuthorizationDenied(_) => 403,
            VaultError::NotFound(_) => 404,
            VaultError::ObjectTypeConflict { .. } => 409,
            VaultError::SchemaVersion { .. }
            | VaultError::Io(_)
            | VaultError::Sqlite(_)
            | VaultError::Json(_) => 500,
        }
    }

    /// Compiler failures are a subtype of validation failure.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            VaultError::Validation(_) | VaultError::QuerySyntax(_) | VaultError::QuerySemantics(_)
        )
    }

    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        VaultError::NotFound(what.into())
    }
}

pub type VaultResult<T> = Result<T, VaultError>;
