//! Change notification types
//!
//! These are the messages the remote change channel pushes for the report
//! collection. Every notification carries the full resulting record.

use crate::{Report, ReportId};
use serde::{Deserialize, Serialize};

/// Insert or update notification for the report collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChangeEvent {
    /// A report was created remotely.
    ReportInserted {
        /// The created report
        report: Report,
    },

    /// An existing report was updated remotely.
    ReportUpdated {
        /// The updated report
        report: Report,
    },
}

impl ChangeEvent {
    pub fn report(&self) -> &Report {
        match self {
            ChangeEvent::ReportInserted { report } | ChangeEvent::ReportUpdated { report } => report,
        }
    }

    pub fn into_report(self) -> Report {
        match self {
            ChangeEvent::ReportInserted { report } | ChangeEvent::ReportUpdated { report } => report,
        }
    }

    pub fn report_id(&self) -> ReportId {
        self.report().id
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, ChangeEvent::ReportInserted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_event_wire_format() {
        let json = r#"{
            "type": "ReportUpdated",
            "report": {
                "id": "0190b3c8-0000-7000-8000-000000000002",
                "title": "Broken light",
                "description": "",
                "category": "streetlight",
                "status": "resolved",
                "location": {"latitude": 51.5, "longitude": -0.12},
                "created_at": "2024-05-01T09:00:00Z",
                "updated_at": "2024-05-03T17:30:00Z"
            }
        }"#;
        let event: ChangeEvent = serde_json::from_str(json).unwrap();
        assert!(!event.is_insert());
        assert_eq!(event.report().title, "Broken light");
        assert_eq!(
            event.report_id().to_string(),
            "0190b3c8-0000-7000-8000-000000000002"
        );
    }
}
