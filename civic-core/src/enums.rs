//! Enum types for civic reports

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// CORE ENUMS
// ============================================================================

/// Workflow status of a report.
///
/// Variants are declared in workflow order, so `Ord` follows the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Open,
    InProgress,
    Resolved,
    Closed,
}

impl ReportStatus {
    pub const ALL: [ReportStatus; 4] = [
        ReportStatus::Open,
        ReportStatus::InProgress,
        ReportStatus::Resolved,
        ReportStatus::Closed,
    ];

    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Open => "open",
            ReportStatus::InProgress => "in_progress",
            ReportStatus::Resolved => "resolved",
            ReportStatus::Closed => "closed",
        }
    }

    /// Whether the report counts toward resolution time statistics.
    pub fn is_resolved(&self) -> bool {
        matches!(self, ReportStatus::Resolved | ReportStatus::Closed)
    }
}

/// Closed set of issue categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportCategory {
    Pothole,
    Streetlight,
    Garbage,
    Vandalism,
    Other,
}

impl ReportCategory {
    pub const ALL: [ReportCategory; 5] = [
        ReportCategory::Pothole,
        ReportCategory::Streetlight,
        ReportCategory::Garbage,
        ReportCategory::Vandalism,
        ReportCategory::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportCategory::Pothole => "pothole",
            ReportCategory::Streetlight => "streetlight",
            ReportCategory::Garbage => "garbage",
            ReportCategory::Vandalism => "vandalism",
            ReportCategory::Other => "other",
        }
    }
}

/// Ordering of filtered projections by `created_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

// ============================================================================
// STRING CONVERSIONS
// ============================================================================

fn normalize_token(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ReportStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_token(s).as_str() {
            "open" | "new" => Ok(ReportStatus::Open),
            "inprogress" => Ok(ReportStatus::InProgress),
            "resolved" => Ok(ReportStatus::Resolved),
            "closed" => Ok(ReportStatus::Closed),
            _ => Err(format!("Invalid ReportStatus: {}", s)),
        }
    }
}

impl fmt::Display for ReportCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ReportCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_token(s).as_str() {
            "pothole" => Ok(ReportCategory::Pothole),
            "streetlight" => Ok(ReportCategory::Streetlight),
            "garbage" => Ok(ReportCategory::Garbage),
            "vandalism" => Ok(ReportCategory::Vandalism),
            "other" => Ok(ReportCategory::Other),
            _ => Err(format!("Invalid ReportCategory: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse_is_lenient() {
        assert_eq!("in_progress".parse::<ReportStatus>().unwrap(), ReportStatus::InProgress);
        assert_eq!("In Progress".parse::<ReportStatus>().unwrap(), ReportStatus::InProgress);
        assert_eq!("in-progress".parse::<ReportStatus>().unwrap(), ReportStatus::InProgress);
        assert_eq!("CLOSED".parse::<ReportStatus>().unwrap(), ReportStatus::Closed);
        assert!("archived".parse::<ReportStatus>().is_err());
    }

    #[test]
    fn test_status_display_matches_wire_format() {
        for status in ReportStatus::ALL {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status));
            assert_eq!(status.to_string().parse::<ReportStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_status_ordering_follows_workflow() {
        assert!(ReportStatus::Open < ReportStatus::InProgress);
        assert!(ReportStatus::InProgress < ReportStatus::Resolved);
        assert!(ReportStatus::Resolved < ReportStatus::Closed);
    }

    #[test]
    fn test_resolved_statuses() {
        assert!(!ReportStatus::Open.is_resolved());
        assert!(!ReportStatus::InProgress.is_resolved());
        assert!(ReportStatus::Resolved.is_resolved());
        assert!(ReportStatus::Closed.is_resolved());
    }

    #[test]
    fn test_category_round_trip() {
        for category in ReportCategory::ALL {
            assert_eq!(category.to_string().parse::<ReportCategory>().unwrap(), category);
        }
        assert!("graffiti".parse::<ReportCategory>().is_err());
    }
}
