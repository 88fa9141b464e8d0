//! Error types for report synchronization

use crate::ReportId;
use std::time::Duration;
use thiserror::Error;

/// Validation errors for report fields.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Master error type surfaced to callers of the sync layer.
///
/// Stale and duplicate change notifications are not represented here; merges
/// resolve them locally and never surface them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("Transport error during {operation}: {reason}")]
    Transport { operation: String, reason: String },

    #[error("Change channel disconnected: {reason}")]
    ChannelDisconnected { reason: String },

    #[error("Mutation of report {id} was not confirmed within {waited:?}")]
    ReconciliationTimeout { id: ReportId, waited: Duration },

    #[error("Report not found: {id}")]
    NotFound { id: ReportId },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Invalid patch: {reason}")]
    InvalidPatch { reason: String },

    #[error("Operation cancelled")]
    Cancelled,
}

impl SyncError {
    pub fn transport(operation: impl Into<String>, reason: impl ToString) -> Self {
        Self::Transport {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the caller may retry the same operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Transport { .. }
                | SyncError::ChannelDisconnected { .. }
                | SyncError::ReconciliationTimeout { .. }
        )
    }
}

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

// =============================================================================
// TESTS
// =============================================================================
