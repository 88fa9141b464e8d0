//! Immutable point-in-time reads of the store.

use crate::watermark::StoreVersion;
use civic_core::{Report, ReportId};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

/// Rendered records at one store version.
///
/// Records are confirmed state with any optimistic overlays applied, plus
/// provisional records from pending creations. Ordered by `created_at`
/// descending, ties broken by id descending. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct Snapshot {
    version: StoreVersion,
    records: Arc<[Report]>,
    pending: Arc<HashSet<ReportId>>,
    provisional: Arc<HashSet<ReportId>>,
}

impl Snapshot {
    pub(crate) fn new(
        version: StoreVersion,
        mut records: Vec<Report>,
        pending: HashSet<ReportId>,
        provisional: HashSet<ReportId>,
    ) -> Self {
        records.sort_by(newest_first);
        Self {
            version,
            records: records.into(),
            pending: Arc::new(pending),
            provisional: Arc::new(provisional),
        }
    }

    pub fn empty() -> Self {
        Self::new(StoreVersion::zero(), Vec::new(), HashSet::new(), HashSet::new())
    }

    pub fn version(&self) -> StoreVersion {
        self.version
    }

    pub fn records(&self) -> &[Report] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Report> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: ReportId) -> Option<&Report> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Whether the record carries an unconfirmed optimistic patch.
    pub fn is_pending(&self, id: ReportId) -> bool {
        self.pending.contains(&id)
    }

    /// Whether the record is a locally created report not yet confirmed.
    pub fn is_provisional(&self, id: ReportId) -> bool {
        self.provisional.contains(&id)
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a Report;
    type IntoIter = std::slice::Iter<'a, Report>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

fn newest_first(a: &Report, b: &Report) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.id.cmp(&a.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use civic_core::{NewReport, ReportCategory};

    #[test]
    fn test_snapshot_orders_newest_first() {
        let base = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let records: Vec<Report> = (0..4)
            .map(|i| {
                Report::from_submission(
                    ReportId::new_local(),
                    &NewReport::new(format!("r{}", i), "", ReportCategory::Other),
                    base + Duration::hours(i),
                )
            })
            .collect();
        let snapshot = Snapshot::new(
            StoreVersion::zero(),
            records,
            HashSet::new(),
            HashSet::new(),
        );
        let titles: Vec<&str> = snapshot.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["r3", "r2", "r1", "r0"]);
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = Snapshot::empty();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.version(), StoreVersion::zero());
        assert!(!snapshot.is_pending(ReportId::new_local()));
    }
}
