//! Per-consumer view models over the shared store.
//!
//! Each view owns its filter; many views read the same snapshots without
//! coordinating. A view recomputes only when it sees a new store version or
//! its filter changes.

use civic_core::{Report, ReportFilter};
use civic_store::{filtered, map_markers, MapMarker, Snapshot, StoreVersion};

/// List projection (citizen list, staff table).
#[derive(Debug, Clone, Default)]
pub struct FilteredView {
    filter: ReportFilter,
    version: Option<StoreVersion>,
    records: Vec<Report>,
}

impl FilteredView {
    pub fn new(filter: ReportFilter) -> Self {
        Self {
            filter,
            version: None,
            records: Vec::new(),
        }
    }

    pub fn filter(&self) -> &ReportFilter {
        &self.filter
    }

    /// Replace the filter. The next `refresh` recomputes.
    pub fn set_filter(&mut self, filter: ReportFilter) {
        if filter != self.filter {
            self.filter = filter;
            self.version = None;
        }
    }

    /// Recompute from `snapshot` if it is newer than what the view shows.
    /// Returns whether the records changed.
    pub fn refresh(&mut self, snapshot: &Snapshot) -> bool {
        if self.version == Some(snapshot.version()) {
            return false;
        }
        self.records = filtered(snapshot, &self.filter);
        self.version = Some(snapshot.version());
        true
    }

    pub fn records(&self) -> &[Report] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn version(&self) -> Option<StoreVersion> {
        self.version
    }
}

/// Map projection. Only records with coordinates become markers.
#[derive(Debug, Clone, Default)]
pub struct MapView {
    filter: ReportFilter,
    version: Option<StoreVersion>,
    markers: Vec<MapMarker>,
}

impl MapView {
    pub fn new(filter: ReportFilter) -> Self {
        Self {
            filter,
            version: None,
            markers: Vec::new(),
        }
    }

    pub fn filter(&self) -> &ReportFilter {
        &self.filter
    }

    pub fn set_filter(&mut self, filter: ReportFilter) {
        if filter != self.filter {
            self.filter = filter;
            self.version = None;
        }
    }

    pub fn refresh(&mut self, snapshot: &Snapshot) -> bool {
        if self.version == Some(snapshot.version()) {
            return false;
        }
        self.markers = map_markers(snapshot, &self.filter);
        self.version = Some(snapshot.version());
        true
    }

    pub fn markers(&self) -> &[MapMarker] {
        &self.markers
    }
}
