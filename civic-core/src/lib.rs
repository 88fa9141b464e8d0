//! Civic Core - Report Types
//!
//! Pure data structures shared by the store and sync crates: identifiers,
//! the report entity, patches, filter predicates, change notifications and
//! the error taxonomy. This crate holds no synchronization logic.

mod entities;
mod enums;
mod error;
mod event;
mod filter;
mod identity;

pub use entities::{GeoPoint, NewReport, Report, ReportPatch};
pub use enums::{ReportCategory, ReportStatus, SortOrder};
pub use error::{SyncError, SyncResult, ValidationError};
pub use event::ChangeEvent;
pub use filter::{DateRange, ReportFilter};
pub use identity::{MutationToken, ReportId, Timestamp};
