//! Filter/query engine.
//!
//! Stateless projections from a [`Snapshot`] and a [`ReportFilter`]. Every
//! consumer brings its own filter, so any number of views can query the same
//! snapshot independently.

use crate::snapshot::Snapshot;
use civic_core::{GeoPoint, Report, ReportCategory, ReportFilter, ReportId, ReportStatus, SortOrder};

/// Records matching every active predicate of `filter`.
///
/// Keeps snapshot order (newest first) unless the filter asks for
/// oldest first, in which case the order is exactly reversed.
pub fn filtered(snapshot: &Snapshot, filter: &ReportFilter) -> Vec<Report> {
    let matching = snapshot.iter().filter(|r| filter.matches(r)).cloned();
    match filter.order {
        SortOrder::NewestFirst => matching.collect(),
        SortOrder::OldestFirst => {
            let mut records: Vec<Report> = matching.collect();
            records.reverse();
            records
        }
    }
}

/// Number of records matching `filter`, without cloning them.
pub fn count(snapshot: &Snapshot, filter: &ReportFilter) -> usize {
    snapshot.iter().filter(|r| filter.matches(r)).count()
}

/// A report reduced to what a map layer needs.
#[derive(Debug, Clone, PartialEq)]
pub struct MapMarker {
    pub id: ReportId,
    pub point: GeoPoint,
    pub status: ReportStatus,
    pub category: ReportCategory,
    pub title: String,
    pub pending: bool,
}

/// Map projection: matching records that have coordinates.
pub fn map_markers(snapshot: &Snapshot, filter: &ReportFilter) -> Vec<MapMarker> {
    let filter = ReportFilter {
        located_only: true,
        ..filter.clone()
    };
    filtered(snapshot, &filter)
        .into_iter()
        .filter_map(|report| {
            let point = report.location?;
            Some(MapMarker {
                id: report.id,
                point,
                status: report.status,
                category: report.category,
                pending: snapshot.is_pending(report.id) || snapshot.is_provisional(report.id),
                title: report.title,
            })
        })
        .collect()
}
