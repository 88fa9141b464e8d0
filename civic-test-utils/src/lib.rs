//! Civic Test Utilities
//!
//! Shared test infrastructure for the civic workspace:
//! - Proptest generators for reports, patches and update histories
//! - Fixtures for common scenarios
//! - Assertions for sync-specific results

pub use civic_core::{
    ChangeEvent, GeoPoint, MutationToken, NewReport, Report, ReportCategory, ReportFilter,
    ReportId, ReportPatch, ReportStatus, SyncError, SyncResult, Timestamp, ValidationError,
};

use chrono::{Duration, TimeZone, Utc};
use uuid::Uuid;

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for civic report types.

    use super::*;
    use proptest::prelude::*;

    /// Generate a random ReportId.
    pub fn arb_report_id() -> impl Strategy<Value = ReportId> {
        any::<[u8; 16]>().prop_map(|bytes| ReportId::new(Uuid::from_bytes(bytes)))
    }

    /// Generate a Timestamp between 2020 and 2030, whole seconds.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
        })
    }

    pub fn arb_report_status() -> impl Strategy<Value = ReportStatus> {
        prop_oneof![
            Just(ReportStatus::Open),
            Just(ReportStatus::InProgress),
            Just(ReportStatus::Resolved),
            Just(ReportStatus::Closed),
        ]
    }

    pub fn arb_report_category() -> impl Strategy<Value = ReportCategory> {
        prop_oneof![
            Just(ReportCategory::Pothole),
            Just(ReportCategory::Streetlight),
            Just(ReportCategory::Garbage),
            Just(ReportCategory::Vandalism),
            Just(ReportCategory::Other),
        ]
    }

    /// Generate a coordinate pair inside the valid range.
    pub fn arb_geo_point() -> impl Strategy<Value = GeoPoint> {
        (-90.0f64..=90.0, -180.0f64..=180.0).prop_map(|(lat, lon)| GeoPoint::new(lat, lon))
    }

    /// Generate a Report with `updated_at >= created_at`.
    pub fn arb_report() -> impl Strategy<Value = Report> {
        (
            arb_report_id(),
            "[a-zA-Z0-9 ]{1,40}",
            "[a-zA-Z0-9 .,]{0,120}",
            arb_report_category(),
            arb_report_status(),
            prop::option::of(arb_geo_point()),
            prop::option::of("[a-zA-Z0-9 ]{1,40}"),
            arb_timestamp(),
            0i64..(90 * 86400),
        )
            .prop_map(
                |(id, title, description, category, status, location, address, created_at, age)| {
                    Report {
                        id,
                        title,
                        description,
                        category,
                        status,
                        location,
                        address,
                        image_reference: None,
                        client_token: None,
                        created_at,
                        updated_at: created_at + Duration::seconds(age),
                    }
                },
            )
    }

    /// Generate a batch of reports with distinct ids.
    pub fn arb_reports(max: usize) -> impl Strategy<Value = Vec<Report>> {
        prop::collection::vec(arb_report(), 0..max).prop_map(|mut reports| {
            let mut seen = std::collections::HashSet::new();
            reports.retain(|r| seen.insert(r.id));
            reports
        })
    }

    /// Generate a non-empty patch that passes validation.
    pub fn arb_report_patch() -> impl Strategy<Value = ReportPatch> {
        (
            prop::option::of("[a-zA-Z0-9]{1,30}"),
            prop::option::of(arb_report_category()),
            arb_report_status(),
        )
            .prop_map(|(title, category, status)| ReportPatch {
                title,
                category,
                status: Some(status),
                ..Default::default()
            })
    }

    /// Generate an update history for a single report: several versions of the
    /// same id with distinct `updated_at` values, in arbitrary order.
    pub fn arb_update_history() -> impl Strategy<Value = Vec<Report>> {
        (
            arb_report(),
            prop::collection::btree_set(1i64..100_000, 1..8),
            prop::collection::vec(arb_report_status(), 8),
        )
            .prop_flat_map(|(base, offsets, statuses)| {
                let history: Vec<Report> = offsets
                    .into_iter()
                    .zip(statuses)
                    .map(|(offset, status)| {
                        let mut version = base.clone();
                        version.status = status;
                        version.title = format!("{} #{}", base.title, offset);
                        version.updated_at = base.created_at + Duration::seconds(offset);
                        version
                    })
                    .collect();
                Just(history).prop_shuffle()
            })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built records for common scenarios.

    use super::*;

    /// Fixed instant used as the base for fixture timestamps.
    pub fn epoch() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    pub fn pothole_submission() -> NewReport {
        NewReport::new(
            "Pothole on Main St",
            "Deep pothole near the crosswalk",
            ReportCategory::Pothole,
        )
        .with_location(GeoPoint::new(40.7128, -74.0060))
        .with_address("100 Main St")
    }

    /// An open report created `hours` after [`epoch`].
    pub fn open_report(hours: i64) -> Report {
        Report::from_submission(
            ReportId::new_local(),
            &pothole_submission(),
            epoch() + Duration::hours(hours),
        )
    }

    /// A report with the given status, created at `created_at` and last
    /// updated one hour later.
    pub fn report_fixture(status: ReportStatus, created_at: Timestamp) -> Report {
        let mut report =
            Report::from_submission(ReportId::new_local(), &pothole_submission(), created_at);
        report.status = status;
        report.updated_at = created_at + Duration::hours(1);
        report
    }

    /// The next remote version of `report`: `patch` applied and `updated_at`
    /// advanced by `seconds`.
    pub fn remote_update(report: &Report, patch: &ReportPatch, seconds: i64) -> Report {
        let mut next = patch.apply_to(report);
        next.updated_at = report.updated_at + Duration::seconds(seconds);
        next
    }

    /// What the remote system would return for a submission.
    pub fn remote_copy(submission: &NewReport, now: Timestamp) -> Report {
        Report::from_submission(ReportId::new_local(), submission, now)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for sync-specific results.

    use super::*;

    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &SyncResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    #[track_caller]
    pub fn assert_err<T: std::fmt::Debug>(result: &SyncResult<T>) {
        assert!(result.is_err(), "Expected Err, got Ok: {:?}", result);
    }

    #[track_caller]
    pub fn assert_transport_error<T: std::fmt::Debug>(result: &SyncResult<T>) {
        match result {
            Err(SyncError::Transport { .. }) => {}
            other => panic!("Expected Transport error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_timeout<T: std::fmt::Debug>(result: &SyncResult<T>, expected_id: ReportId) {
        match result {
            Err(SyncError::ReconciliationTimeout { id, .. }) => {
                assert_eq!(*id, expected_id, "Timeout reported for wrong report");
            }
            other => panic!("Expected ReconciliationTimeout, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &SyncResult<T>, expected_id: ReportId) {
        match result {
            Err(SyncError::NotFound { id }) => {
                assert_eq!(*id, expected_id, "NotFound reported for wrong report");
            }
            other => panic!("Expected NotFound, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &SyncResult<T>) {
        match result {
            Err(SyncError::Validation(_)) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }

    /// Assert records are ordered by `created_at`, newest first.
    #[track_caller]
    pub fn assert_newest_first(records: &[Report]) {
        for pair in records.windows(2) {
            assert!(
                pair[0].created_at >= pair[1].created_at,
                "Records out of order: {} ({}) before {} ({})",
                pair[0].id,
                pair[0].created_at,
                pair[1].id,
                pair[1].created_at
            );
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_report_fixture() {
        let report = fixtures::report_fixture(ReportStatus::Resolved, fixtures::epoch());
        assert_eq!(report.status, ReportStatus::Resolved);
        assert_eq!(report.resolution_time(), Some(Duration::hours(1)));
    }

    #[test]
    fn test_remote_update_advances_timestamp() {
        let report = fixtures::open_report(0);
        let next = fixtures::remote_update(&report, &ReportPatch::status(ReportStatus::Closed), 30);
        assert_eq!(next.id, report.id);
        assert_eq!(next.status, ReportStatus::Closed);
        assert!(next.updated_at > report.updated_at);
    }

    #[test]
    fn test_assertion_timeout() {
        let id = ReportId::new_local();
        let result: SyncResult<()> = Err(SyncError::ReconciliationTimeout {
            id,
            waited: std::time::Duration::from_secs(5),
        });
        assertions::assert_timeout(&result, id);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_generated_report_is_well_formed(report in generators::arb_report()) {
            prop_assert!(report.updated_at >= report.created_at);
            if let Some(point) = report.location {
                prop_assert!(point.validate().is_ok());
            }
        }

        #[test]
        fn prop_generated_patch_is_valid(patch in generators::arb_report_patch()) {
            prop_assert!(!patch.is_empty());
            prop_assert!(patch.validate().is_ok());
        }

        #[test]
        fn prop_update_history_shares_one_id(history in generators::arb_update_history()) {
            prop_assert!(!history.is_empty());
            let id = history[0].id;
            prop_assert!(history.iter().all(|r| r.id == id));
            let stamps: std::collections::HashSet<_> =
                history.iter().map(|r| r.updated_at).collect();
            prop_assert_eq!(stamps.len(), history.len());
        }
    }
}
