use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A referenced user, message or notification does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Input violates a constraint (blank content, duplicate username, ...).
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The acting user may not perform the requested mutation.
    #[error("Permission denied: {0}")]
    Permission(String),

    /// Stored state breaks an invariant, e.g. a reply chain that loops.
    #[error("Integrity violation: {0}")]
    Integrity(String),

    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// Another thread panicked while holding the store lock.
    #[error("Store lock poisoned")]
    LockPoisoned,
}

impl StoreError {
    /// `true` when the operation was rejected before anything changed, so the
    /// caller may retry with corrected input.  Integrity and infrastructure
    /// failures return `false`.
    pub fn is_retryable_with_new_input(&self) -> bool {
        matches!(
            self,
            StoreError::NotFound(_) | StoreError::Validation(_) | StoreError::Permission(_)
        )
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_rejections_are_retryable() {
        assert!(StoreError::NotFound("user x".into()).is_retryable_with_new_input());
        assert!(StoreError::Validation("blank".into()).is_retryable_with_new_input());
        assert!(StoreError::Permission("nope".into()).is_retryable_with_new_input());
    }

    #[test]
    fn integrity_is_not_retryable() {
        assert!(!StoreError::Integrity("cycle".into()).is_retryable_with_new_input());
        assert!(!StoreError::LockPoisoned.is_retryable_with_new_input());
    }
}
