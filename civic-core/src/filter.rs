//! Filter predicates for report projections
//!
//! A `ReportFilter` is plain data. Each view owns its own filter value, and the
//! same value doubles as a fetch hint for the remote bulk fetch.

use crate::{Report, ReportCategory, ReportStatus, SortOrder, Timestamp};
use serde::{Deserialize, Serialize};

/// Half-open `[start, end)` range over `created_at`. Missing bounds are open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<Timestamp>,
    pub end: Option<Timestamp>,
}

impl DateRange {
    pub fn new(start: Option<Timestamp>, end: Option<Timestamp>) -> Self {
        Self { start, end }
    }

    pub fn since(start: Timestamp) -> Self {
        Self::new(Some(start), None)
    }

    pub fn contains(&self, at: Timestamp) -> bool {
        self.start.map_or(true, |start| at >= start) && self.end.map_or(true, |end| at < end)
    }
}

/// Conjunction of the active predicates. `None` means "all".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportFilter {
    #[serde(default)]
    pub status: Option<ReportStatus>,
    #[serde(default)]
    pub category: Option<ReportCategory>,
    #[serde(default)]
    pub created: Option<DateRange>,
    /// Drop records without coordinates (map projections).
    #[serde(default)]
    pub located_only: bool,
    #[serde(default)]
    pub order: SortOrder,
}

impl ReportFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: ReportStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_category(mut self, category: ReportCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_created(mut self, range: DateRange) -> Self {
        self.created = Some(range);
        self
    }

    pub fn located(mut self) -> Self {
        self.located_only = true;
        self
    }

    pub fn ascending(mut self) -> Self {
        self.order = SortOrder::OldestFirst;
        self
    }

    pub fn matches(&self, report: &Report) -> bool {
        self.status.map_or(true, |status| report.status == status)
            && self.category.map_or(true, |category| report.category == category)
            && self
                .created
                .map_or(true, |range| range.contains(report.created_at))
            && (!self.located_only || report.location.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GeoPoint, NewReport, ReportId};
    use chrono::{Duration, TimeZone, Utc};

    fn report(status: ReportStatus, category: ReportCategory, day: u32) -> Report {
        let at = Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap();
        let mut r = Report::from_submission(
            ReportId::new_local(),
            &NewReport::new("t", "d", category),
            at,
        );
        r.status = status;
        r
    }

    #[test]
    fn test_default_filter_matches_everything() {
        let filter = ReportFilter::all();
        assert!(filter.matches(&report(ReportStatus::Closed, ReportCategory::Other, 1)));
    }

    #[test]
    fn test_predicates_are_conjunctive() {
        let filter = ReportFilter::all()
            .with_status(ReportStatus::Open)
            .with_category(ReportCategory::Garbage);
        assert!(filter.matches(&report(ReportStatus::Open, ReportCategory::Garbage, 1)));
        assert!(!filter.matches(&report(ReportStatus::Open, ReportCategory::Pothole, 1)));
        assert!(!filter.matches(&report(ReportStatus::Resolved, ReportCategory::Garbage, 1)));
    }

    #[test]
    fn test_date_range_is_half_open() {
        let start = Utc.with_ymd_and_hms(2024, 3, 2, 12, 0, 0).unwrap();
        let range = DateRange::new(Some(start), Some(start + Duration::days(1)));
        assert!(range.contains(start));
        assert!(!range.contains(start + Duration::days(1)));
        assert!(!range.contains(start - Duration::seconds(1)));

        let filter = ReportFilter::all().with_created(range);
        assert!(filter.matches(&report(ReportStatus::Open, ReportCategory::Other, 2)));
        assert!(!filter.matches(&report(ReportStatus::Open, ReportCategory::Other, 3)));
    }

    #[test]
    fn test_located_only_drops_records_without_coordinates() {
        let filter = ReportFilter::all().located();
        let mut r = report(ReportStatus::Open, ReportCategory::Other, 1);
        assert!(!filter.matches(&r));
        r.location = Some(GeoPoint::new(1.0, 2.0));
        assert!(filter.matches(&r));
    }
}
