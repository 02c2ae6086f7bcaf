//! Error types for the label store

use thiserror::Error;

/// Result type for label store operations
pub type LabelStoreResult<T> = Result<T, LabelStoreError>;

/// Errors that can occur while storing, signing or serving labels
#[derive(Error, Debug)]
pub enum LabelStoreError {
    /// Database operation failed (connection, query execution, etc.)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed on startup
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Signing key could not be decoded or used
    #[error("Signing error: {0}")]
    Signing(String),

    /// Label could not be serialized for signing
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Caller supplied an unusable label or query
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}
