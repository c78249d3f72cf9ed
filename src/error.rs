//! Error types for the resource pool subsystem.
//!
//! Allocation and classification errors are returned to the immediate caller.
//! Diagnostics degrade to error-flagged results instead of failing, so only
//! `compare` surfaces a monitor error.

use thiserror::Error;

use crate::admission::Priority;

/// Coarse error classes shared by every [`PoolError`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller-fixable input problem.
    InvalidInput,
    /// Budget, reserve or pool capacity insufficient. Retry later or shed load.
    ResourceExhausted,
    /// Called before required setup. Indicates a usage bug.
    NotInitialized,
}

/// Errors produced by the pool, admission controller and monitor.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Invalid allocation size: {0} bytes")]
    InvalidSize(usize),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Pool exhausted: requested {requested} bytes, available {available} bytes")]
    ResourceExhausted { requested: usize, available: usize },

    #[error(
        "Insufficient resources for a {priority} operation needing {required_mb} MB, \
         try a smaller operation or wait"
    )]
    AdmissionDenied { required_mb: u64, priority: Priority },

    #[error("Not initialized: {0}")]
    NotInitialized(String),

    #[error("Invalid snapshot id {id}: {count} snapshots recorded")]
    InvalidSnapshotId { id: usize, count: usize },

    #[error("Memory sampling failed: {0}")]
    Sampling(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PoolError {
    /// Map this error onto the three-way taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidSize(_)
            | Self::InvalidInput(_)
            | Self::InvalidSnapshotId { .. }
            | Self::Config(_) => ErrorKind::InvalidInput,
            Self::ResourceExhausted { .. } | Self::AdmissionDenied { .. } => {
                ErrorKind::ResourceExhausted
            }
            Self::NotInitialized(_) | Self::Sampling(_) => ErrorKind::NotInitialized,
        }
    }

    /// Returns true if this error should be logged as a warning.
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::ResourceExhausted { .. } | Self::AdmissionDenied { .. })
    }

    /// Returns true if the caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::ResourceExhausted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(PoolError::InvalidSize(0).kind(), ErrorKind::InvalidInput);
        assert_eq!(
            PoolError::ResourceExhausted { requested: 10, available: 0 }.kind(),
            ErrorKind::ResourceExhausted
        );
        assert_eq!(
            PoolError::NotInitialized("pool".into()).kind(),
            ErrorKind::NotInitialized
        );
    }

    #[test]
    fn test_admission_denied_message_is_user_facing() {
        let err = PoolError::AdmissionDenied { required_mb: 512, priority: Priority::Low };
        let msg = err.to_string();
        assert!(msg.contains("Insufficient resources"));
        assert!(msg.contains("try a smaller operation or wait"));
        assert!(err.is_retryable());
    }
}
