use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// No user record resolvable for the presented identity.
    #[error("Unauthorized")]
    Unauthorized,

    /// The actor lacks rights for the operation (not a participant, not the
    /// message owner, not the group admin).
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The sender is not in the conversation's participant set.
    #[error("You are not part of this conversation")]
    NotAMember,

    /// A group-only operation was attempted on a 1:1 conversation.
    #[error("Not a group conversation")]
    NotAGroup,

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// UUID parsing error.
    #[error("UUID error: {0}")]
    Uuid(#[from] uuid::Error),

    /// Chrono parsing error.
    #[error("Timestamp parse error: {0}")]
    ChronoParse(#[from] chrono::ParseError),

    /// JSON (de)serialization error for stored descriptors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
