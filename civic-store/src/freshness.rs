//! Last-write-wins merge decisions.
//!
//! `updated_at` is the only conflict-resolution signal. Arrival order carries
//! no meaning: a record older than the stored one is dropped no matter when it
//! shows up, and re-delivering a record already stored changes nothing.

use civic_core::{Report, Timestamp};

/// Result of merging one remote record into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// No entry existed for this id.
    Inserted,
    /// The incoming record was equal-or-newer and differed from the stored one.
    Replaced,
    /// The incoming record is identical to the stored one.
    Duplicate,
    /// The incoming record is strictly older than the stored one.
    Stale {
        stored: Timestamp,
        incoming: Timestamp,
    },
}

impl MergeOutcome {
    /// Whether the confirmed state changed.
    pub fn is_applied(&self) -> bool {
        matches!(self, MergeOutcome::Inserted | MergeOutcome::Replaced)
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, MergeOutcome::Stale { .. })
    }
}

/// Decide how `incoming` merges against the currently stored record.
pub fn decide(stored: Option<&Report>, incoming: &Report) -> MergeOutcome {
    match stored {
        None => MergeOutcome::Inserted,
        Some(current) if incoming.updated_at < current.updated_at => MergeOutcome::Stale {
            stored: current.updated_at,
            incoming: incoming.updated_at,
        },
        Some(current) if current == incoming => MergeOutcome::Duplicate,
        Some(_) => MergeOutcome::Replaced,
    }
}

/// Summary of a bulk load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadSummary {
    pub inserted: usize,
    pub replaced: usize,
    pub duplicates: usize,
    pub stale: usize,
}

impl LoadSummary {
    pub(crate) fn record(&mut self, outcome: MergeOutcome) {
        match outcome {
            MergeOutcome::Inserted => self.inserted += 1,
            MergeOutcome::Replaced => self.replaced += 1,
            MergeOutcome::Duplicate => self.duplicates += 1,
            MergeOutcome::Stale { .. } => self.stale += 1,
        }
    }

    pub fn applied(&self) -> usize {
        self.inserted + self.replaced
    }

    pub fn total(&self) -> usize {
        self.applied() + self.duplicates + self.stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use civic_core::{GeoPoint, NewReport, ReportCategory, ReportId, ReportStatus};
    use chrono::{Duration, TimeZone, Utc};

    fn report() -> Report {
        let at = Utc.with_ymd_and_hms(2024, 1, 10, 8, 0, 0).unwrap();
        Report::from_submission(
            ReportId::new_local(),
            &NewReport::new("Overflowing bin", "", ReportCategory::Garbage),
            at,
        )
    }

    #[test]
    fn test_missing_entry_inserts() {
        assert_eq!(decide(None, &report()), MergeOutcome::Inserted);
    }

    #[test]
    fn test_older_record_is_stale() {
        let stored = report();
        let mut older = stored.clone();
        older.updated_at = stored.updated_at - Duration::seconds(1);
        older.status = ReportStatus::Closed;
        let outcome = decide(Some(&stored), &older);
        assert!(outcome.is_stale());
        assert!(!outcome.is_applied());
    }

    #[test]
    fn test_identical_record_is_duplicate() {
        let stored = report();
        assert_eq!(decide(Some(&stored), &stored.clone()), MergeOutcome::Duplicate);
    }

    #[test]
    fn test_redelivered_nan_location_is_duplicate() {
        let mut stored = report();
        stored.location = Some(GeoPoint::new(f64::NAN, 12.5));
        assert_eq!(decide(Some(&stored), &stored.clone()), MergeOutcome::Duplicate);
    }

    #[test]
    fn test_equal_timestamp_with_new_content_replaces() {
        let stored = report();
        let mut same_time = stored.clone();
        same_time.status = ReportStatus::InProgress;
        assert_eq!(decide(Some(&stored), &same_time), MergeOutcome::Replaced);
    }

    #[test]
    fn test_newer_record_replaces() {
        let stored = report();
        let mut newer = stored.clone();
        newer.updated_at = stored.updated_at + Duration::minutes(5);
        assert_eq!(decide(Some(&stored), &newer), MergeOutcome::Replaced);
    }

    #[test]
    fn test_load_summary_counts() {
        let mut summary = LoadSummary::default();
        summary.record(MergeOutcome::Inserted);
        summary.record(MergeOutcome::Duplicate);
        summary.record(MergeOutcome::Replaced);
        assert_eq!(summary.applied(), 2);
        assert_eq!(summary.total(), 3);
    }
}
