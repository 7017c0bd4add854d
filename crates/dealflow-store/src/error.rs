//! Error types for the store layer.

/// The result type used throughout dealflow-store.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in store operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A database operation failed.
    #[error("database error: {message}")]
    Database {
        /// Description of the database failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A uniqueness or state invariant was violated.
    #[error("conflict: {message}")]
    Conflict {
        /// Description of the conflicting state.
        message: String,
    },

    /// The requested row was not found.
    #[error("not found: {entity} {key}")]
    NotFound {
        /// The entity that was looked up.
        entity: &'static str,
        /// The lookup key.
        key: String,
    },

    /// A stored value could not be decoded.
    #[error("decode error: {message}")]
    Decode {
        /// Description of the decode failure.
        message: String,
    },
}

impl Error {
    /// Creates a new database error.
    #[must_use]
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new conflict error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a new not-found error.
    #[must_use]
    pub fn not_found(entity: &'static str, key: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    /// Creates a new decode error.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Returns true if this error is a unique-constraint conflict.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl From<sqlx::Error> for Error {
    fn from(value: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &value {
            if db_err.is_unique_violation() {
                return Self::Conflict {
                    message: db_err.message().to_string(),
                };
            }
        }
        Self::Database {
            message: value.to_string(),
            source: Some(Box::new(value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_display() {
        let err = Error::conflict("duplicate active channel");
        assert!(err.to_string().contains("conflict"));
        assert!(err.is_conflict());
    }

    #[test]
    fn not_found_display() {
        let err = Error::not_found("push_channel", "ch-1");
        assert!(err.to_string().contains("push_channel"));
        assert!(!err.is_conflict());
    }
}
