//! Synchronization error types.

use thiserror::Error;

/// Errors surfaced by timeline and fence-export operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// A lookup or parameter was invalid (unknown context id, bad output
    /// destination).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// An allocation failed or a wait-point budget was exhausted.
    #[error("out of memory")]
    OutOfMemory,
    /// No descriptor slots are available in the table.
    #[error("descriptor table exhausted")]
    ResourceExhausted,
    /// Copying the descriptor back to the caller failed.
    #[error("user data copy fault")]
    Fault,
}

pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = SyncError::ResourceExhausted;
        assert_eq!(err.to_string(), "descriptor table exhausted");

        let err = SyncError::InvalidArgument("context 7 not found".to_string());
        assert_eq!(err.to_string(), "invalid argument: context 7 not found");
    }
}
