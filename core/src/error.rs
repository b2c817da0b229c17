use thiserror::Error;

/// Failure at the account-store boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed stored data in {what}: {source}")]
    Malformed {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("invalid data: {0}")]
    Invalid(String),

    /// The account has no workout-log document yet, so the one-time
    /// migration has not run for it.
    #[error("account {0} has not been set up yet; sign in first")]
    NotInitialized(String),

    #[error("store lock poisoned")]
    LockPoisoned,
}

impl StoreError {
    pub fn malformed(what: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Malformed {
            what: what.into(),
            source,
        }
    }

    /// Transient failures worth retrying on the next user action.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Unavailable(_) | Self::Database(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
