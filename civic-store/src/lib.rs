//! Civic Store - Entity Store and Derived Views
//!
//! The single in-memory authority for report state on a client, plus the pure
//! projections views compute from it.
//!
//! - [`EntityStore`]: last-write-wins merging of remote records, optimistic
//!   overlays, provisional creations, and a version watermark broadcast
//! - [`Snapshot`]: immutable point-in-time read
//! - [`query`]: filter/query engine
//! - [`Aggregates`]: dashboard statistics

pub mod aggregate;
pub mod error;
pub mod freshness;
pub mod query;
pub mod snapshot;
pub mod store;
pub mod watermark;

pub use aggregate::Aggregates;
pub use error::StoreError;
pub use freshness::{LoadSummary, MergeOutcome};
pub use query::{filtered, map_markers, MapMarker};
pub use snapshot::Snapshot;
pub use store::EntityStore;
pub use watermark::StoreVersion;
