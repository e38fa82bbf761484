use std::path::PathBuf;

use thiserror::Error;

/// Custom error type for the read path.
#[derive(Error, Debug)]
pub enum DbError {
    /// A tag key has no block in any source, or a predicate matched no tag value.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization Error: {0}")]
    Serialization(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("Invalid predicate: {0}")]
    InvalidPredicate(String),

    #[error("Configuration Error: {0}")]
    ConfigError(String),

    /// Structural corruption of a block: short buffer, out-of-order or out-of-bounds offsets,
    /// malformed catalogue, truncated stream.
    #[error("Corruption detected: {details}")]
    Corruption {
        details: String,
        path: Option<PathBuf>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DbError {
    /// Corruption with no file attached (tag blocks, nested indexes).
    pub fn corruption(details: impl Into<String>) -> Self {
        DbError::Corruption {
            details: details.into(),
            path: None,
        }
    }

    /// Corruption attributed to the block file at `path`.
    pub fn corruption_at(details: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        DbError::Corruption {
            details: details.into(),
            path: Some(path.into()),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DbError::NotFound(_))
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, DbError::Corruption { .. })
    }
}

// Implement conversion from lock poison errors for convenience
impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        DbError::LockError(format!("Mutex/RwLock poisoned: {}", err))
    }
}
