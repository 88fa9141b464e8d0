//! Error types for store operations

use civic_core::{ReportId, SyncError};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Report not found: {id}")]
    NotFound { id: ReportId },

    #[error("Report {id} is provisional and cannot be patched until confirmed")]
    Provisional { id: ReportId },

    #[error("Report already exists: {id}")]
    AlreadyExists { id: ReportId },

    #[error("Patch is empty")]
    EmptyPatch,
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { id } => SyncError::NotFound { id },
            other => SyncError::InvalidPatch {
                reason: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_maps_to_sync_not_found() {
        let id = ReportId::new_local();
        let err = SyncError::from(StoreError::NotFound { id });
        assert_eq!(err, SyncError::NotFound { id });
    }

    #[test]
    fn test_other_errors_map_to_invalid_patch() {
        let err = SyncError::from(StoreError::EmptyPatch);
        assert!(matches!(err, SyncError::InvalidPatch { .. }));
    }
}
