//! Error types for the indexing engine

use crate::error::AppError;
use crate::models::SettingsError;

/// Result type for engine operations
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Errors raised by shards, the index pipeline and search execution
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Index settings rejected at initialization
    #[error("Invalid index settings: {0}")]
    Settings(#[from] SettingsError),

    /// Shard directory lock is held elsewhere
    #[error("Shard {shard} of index '{index}' is locked by another writer")]
    ShardLocked { index: String, shard: usize },

    /// Shard could not be opened
    #[error("Failed to open shard {shard} of index '{index}': {message}")]
    ShardOpen {
        index: String,
        shard: usize,
        message: String,
    },

    /// Writer or reader already released
    #[error("Shard {0} is closed")]
    Closed(usize),

    /// Engine no longer accepts requests
    #[error("Index '{0}' is shut down")]
    ShutDown(String),

    /// A request could not be turned into a document
    #[error("Invalid document '{id}': {message}")]
    InvalidDocument { id: String, message: String },

    /// Query parsing failed
    #[error("Query parsing failed: {0}")]
    QueryParsing(String),

    /// Search execution failed
    #[error("Search execution failed: {0}")]
    SearchFailed(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Tantivy error
    #[error("Tantivy error: {0}")]
    Tantivy(String),
}

impl EngineError {
    /// Closed-writer conditions are expected during shutdown races
    pub fn is_closed(&self) -> bool {
        matches!(self, EngineError::Closed(_) | EngineError::ShutDown(_))
    }
}

impl From<tantivy::TantivyError> for EngineError {
    fn from(err: tantivy::TantivyError) -> Self {
        EngineError::Tantivy(err.to_string())
    }
}

impl From<tantivy::query::QueryParserError> for EngineError {
    fn from(err: tantivy::query::QueryParserError) -> Self {
        EngineError::QueryParsing(err.to_string())
    }
}

impl From<tantivy::directory::error::OpenDirectoryError> for EngineError {
    fn from(err: tantivy::directory::error::OpenDirectoryError) -> Self {
        EngineError::Tantivy(err.to_string())
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Settings(e) => AppError::Configuration(e.to_string()),
            EngineError::InvalidDocument { .. } | EngineError::QueryParsing(_) => {
                AppError::Validation(err.to_string())
            }
            EngineError::ShardLocked { .. }
            | EngineError::Closed(_)
            | EngineError::ShutDown(_) => AppError::Unavailable(err.to_string()),
            EngineError::Io(e) => AppError::Io(e),
            _ => AppError::Internal(err.to_string()),
        }
    }
}

impl From<SettingsError> for AppError {
    fn from(err: SettingsError) -> Self {
        AppError::Configuration(err.to_string())
    }
}
