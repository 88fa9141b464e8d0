//! Aggregate statistics over a snapshot.
//!
//! Always computed from a complete snapshot. Callers that want to avoid
//! repeated work memoize by [`StoreVersion`]; since a snapshot is fully
//! determined by its version, that is identical to recomputing after every
//! store mutation.

use crate::snapshot::Snapshot;
use crate::watermark::StoreVersion;
use chrono::NaiveDate;
use civic_core::{ReportCategory, ReportStatus};
use std::collections::BTreeMap;

/// Dashboard statistics for one store version.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregates {
    pub version: StoreVersion,
    pub total: usize,
    /// Count per status. Every status is present, zero if unused.
    pub by_status: BTreeMap<ReportStatus, usize>,
    /// Count per category. Every category is present, zero if unused.
    pub by_category: BTreeMap<ReportCategory, usize>,
    /// Submissions per UTC calendar day of `created_at`. Only days with submissions.
    pub daily: BTreeMap<NaiveDate, usize>,
    /// Number of resolved or closed reports.
    pub resolved: usize,
    /// Mean of `updated_at - created_at` over resolved or closed reports.
    pub mean_resolution: Option<chrono::Duration>,
}

impl Aggregates {
    pub fn compute(snapshot: &Snapshot) -> Self {
        let mut by_status: BTreeMap<ReportStatus, usize> =
            ReportStatus::ALL.iter().map(|s| (*s, 0)).collect();
        let mut by_category: BTreeMap<ReportCategory, usize> =
            ReportCategory::ALL.iter().map(|c| (*c, 0)).collect();
        let mut daily: BTreeMap<NaiveDate, usize> = BTreeMap::new();
        let mut resolved = 0usize;
        let mut resolution_ms: i128 = 0;

        for report in snapshot {
            *by_status.entry(report.status).or_insert(0) += 1;
            *by_category.entry(report.category).or_insert(0) += 1;
            *daily.entry(report.created_at.date_naive()).or_insert(0) += 1;
            if let Some(elapsed) = report.resolution_time() {
                resolved += 1;
                resolution_ms += i128::from(elapsed.num_milliseconds());
            }
        }

        let mean_resolution = if resolved == 0 {
            None
        } else {
            let mean = resolution_ms / resolved as i128;
            Some(chrono::Duration::milliseconds(
                i64::try_from(mean).unwrap_or(i64::MAX),
            ))
        };

        Self {
            version: snapshot.version(),
            total: snapshot.len(),
            by_status,
            by_category,
            daily,
            resolved,
            mean_resolution,
        }
    }

    pub fn count(&self, status: ReportStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }

    pub fn count_category(&self, category: ReportCategory) -> usize {
        self.by_category.get(&category).copied().unwrap_or(0)
    }

    /// Fraction of reports that are resolved or closed.
    pub fn resolution_rate(&self) -> Option<f64> {
        if self.total == 0 {
            None
        } else {
            Some(self.resolved as f64 / self.total as f64)
        }
    }

    /// Daily submission counts for every day in `[start, end]`, zero-filled.
    pub fn daily_series(&self, start: NaiveDate, end: NaiveDate) -> Vec<(NaiveDate, usize)> {
        start
            .iter_days()
            .take_while(|day| *day <= end)
            .map(|day| (day, self.daily.get(&day).copied().unwrap_or(0)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::EntityStore;
    use chrono::{Duration, TimeZone, Utc};
    use civic_core::{MutationToken, NewReport, Report, ReportId, ReportPatch};

    fn seeded() -> EntityStore {
        let store = EntityStore::new();
        let day1 = Utc.with_ymd_and_hms(2024, 7, 1, 9, 0, 0).unwrap();
        let day3 = Utc.with_ymd_and_hms(2024, 7, 3, 9, 0, 0).unwrap();
        let mut records = Vec::new();

        let mut a = Report::from_submission(
            ReportId::new_local(),
            &NewReport::new("a", "", ReportCategory::Pothole),
            day1,
        );
        a.status = ReportStatus::Resolved;
        a.updated_at = day1 + Duration::hours(2);
        records.push(a);

        let mut b = Report::from_submission(
            ReportId::new_local(),
            &NewReport::new("b", "", ReportCategory::Garbage),
            day1,
        );
        b.status = ReportStatus::Closed;
        b.updated_at = day1 + Duration::hours(4);
        records.push(b);

        records.push(Report::from_submission(
            ReportId::new_local(),
            &NewReport::new("c", "", ReportCategory::Pothole),
            day3,
        ));

        store.load(records);
        store
    }

    #[test]
    fn test_counts_and_mean_resolution() {
        let store = seeded();
        let stats = Aggregates::compute(&store.snapshot());

        assert_eq!(stats.total, 3);
        assert_eq!(stats.count(ReportStatus::Open), 1);
        assert_eq!(stats.count(ReportStatus::InProgress), 0);
        assert_eq!(stats.count(ReportStatus::Resolved), 1);
        assert_eq!(stats.count(ReportStatus::Closed), 1);
        assert_eq!(stats.count_category(ReportCategory::Pothole), 2);
        assert_eq!(stats.count_category(ReportCategory::Vandalism), 0);
        assert_eq!(stats.resolved, 2);
        assert_eq!(stats.mean_resolution, Some(Duration::hours(3)));
        assert_eq!(stats.by_status.values().sum::<usize>(), stats.total);
    }

    #[test]
    fn test_daily_series_fills_gaps() {
        let store = seeded();
        let stats = Aggregates::compute(&store.snapshot());
        let start = NaiveDate::from_ymd_opt(2024, 7, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 7, 4).unwrap();
        let series: Vec<usize> = stats
            .daily_series(start, end)
            .into_iter()
            .map(|(_, n)| n)
            .collect();
        assert_eq!(series, vec![2, 0, 1, 0]);
    }

    #[test]
    fn test_empty_snapshot_has_no_rates() {
        let stats = Aggregates::compute(&Snapshot::empty());
        assert_eq!(stats.total, 0);
        assert!(stats.mean_resolution.is_none());
        assert!(stats.resolution_rate().is_none());
        assert_eq!(stats.by_status.len(), ReportStatus::ALL.len());
    }

    #[test]
    fn test_optimistic_overlay_is_reflected() {
        let store = seeded();
        let open = store
            .snapshot()
            .iter()
            .find(|r| r.status == ReportStatus::Open)
            .cloned()
            .unwrap();
        store
            .apply_optimistic_patch(
                open.id,
                ReportPatch::status(ReportStatus::InProgress),
                MutationToken::new(),
            )
            .unwrap();
        let stats = Aggregates::compute(&store.snapshot());
        assert_eq!(stats.count(ReportStatus::Open), 0);
        assert_eq!(stats.count(ReportStatus::InProgress), 1);
        assert!((stats.resolution_rate().unwrap() - 2.0 / 3.0).abs() < 1e-9);
    }
}
