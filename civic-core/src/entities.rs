//! Report entity, creation payload, and patches

use crate::{MutationToken, ReportCategory, ReportId, ReportStatus, Timestamp, ValidationError};
use serde::{Deserialize, Serialize};

/// Geographic coordinate pair.
///
/// Equality is bitwise, so a point always equals itself even when a remote
/// record carries a NaN coordinate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl PartialEq for GeoPoint {
    fn eq(&self, other: &Self) -> bool {
        self.latitude.to_bits() == other.latitude.to_bits()
            && self.longitude.to_bits() == other.longitude.to_bits()
    }
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(ValidationError::InvalidValue {
                field: "location.latitude".to_string(),
                reason: format!("{} is outside [-90, 90]", self.latitude),
            });
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(ValidationError::InvalidValue {
                field: "location.longitude".to_string(),
                reason: format!("{} is outside [-180, 180]", self.longitude),
            });
        }
        Ok(())
    }
}

/// A civic issue report as known to the remote system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: ReportId,
    pub title: String,
    pub description: String,
    pub category: ReportCategory,
    pub status: ReportStatus,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub image_reference: Option<String>,
    /// Token the submitting client attached, echoed back by the remote system.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_token: Option<MutationToken>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Report {
    /// Build the record a fresh submission would produce: status `open` and
    /// `created_at == updated_at == now`.
    pub fn from_submission(id: ReportId, submission: &NewReport, now: Timestamp) -> Self {
        Self {
            id,
            title: submission.title.clone(),
            description: submission.description.clone(),
            category: submission.category,
            status: ReportStatus::Open,
            location: submission.location,
            address: submission.address.clone(),
            image_reference: submission.image_reference.clone(),
            client_token: submission.client_token,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this record was created from the submission tagged `token`.
    ///
    /// Content is never compared: two citizens may submit identical reports.
    pub fn was_submitted_with(&self, token: MutationToken) -> bool {
        self.client_token == Some(token)
    }

    /// Time from submission until the last remote update, for resolved reports.
    pub fn resolution_time(&self) -> Option<chrono::Duration> {
        if self.status.is_resolved() {
            Some(self.updated_at - self.created_at)
        } else {
            None
        }
    }
}

/// Fields a citizen supplies when submitting a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewReport {
    pub title: String,
    pub description: String,
    pub category: ReportCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_token: Option<MutationToken>,
}

impl NewReport {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        category: ReportCategory,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            category,
            location: None,
            address: None,
            image_reference: None,
            client_token: None,
        }
    }

    pub fn with_location(mut self, point: GeoPoint) -> Self {
        self.location = Some(point);
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_image(mut self, reference: impl Into<String>) -> Self {
        self.image_reference = Some(reference.into());
        self
    }

    /// Tag the submission so the resulting insert can be told apart from
    /// identical reports filed by other clients.
    pub fn with_client_token(mut self, token: MutationToken) -> Self {
        self.client_token = Some(token);
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "title".to_string(),
            });
        }
        if let Some(point) = &self.location {
            point.validate()?;
        }
        Ok(())
    }
}

/// Partial update of a report. Unset fields are left untouched.
///
/// A patch is applied as a whole; there is no per-field merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<ReportCategory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ReportStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_reference: Option<String>,
}

impl ReportPatch {
    /// Patch that only changes the workflow status.
    pub fn status(status: ReportStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.category.is_none()
            && self.status.is_none()
            && self.location.is_none()
            && self.address.is_none()
            && self.image_reference.is_none()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if matches!(&self.title, Some(title) if title.trim().is_empty()) {
            return Err(ValidationError::InvalidValue {
                field: "title".to_string(),
                reason: "must not be blank".to_string(),
            });
        }
        if let Some(point) = &self.location {
            point.validate()?;
        }
        Ok(())
    }

    /// Return a copy of `report` with every set field replaced.
    ///
    /// Timestamps are not touched; only the remote system advances `updated_at`.
    pub fn apply_to(&self, report: &Report) -> Report {
        let mut patched = report.clone();
        if let Some(title) = &self.title {
            patched.title = title.clone();
        }
        if let Some(description) = &self.description {
            patched.description = description.clone();
        }
        if let Some(category) = self.category {
            patched.category = category;
        }
        if let Some(status) = self.status {
            patched.status = status;
        }
        if let Some(location) = self.location {
            patched.location = Some(location);
        }
        if let Some(address) = &self.address {
            patched.address = Some(address.clone());
        }
        if let Some(reference) = &self.image_reference {
            patched.image_reference = Some(reference.clone());
        }
        patched
    }

    /// Whether `report` already carries every value this patch sets.
    pub fn is_satisfied_by(&self, report: &Report) -> bool {
        self.title.as_ref().map_or(true, |v| *v == report.title)
            && self.description.as_ref().map_or(true, |v| *v == report.description)
            && self.category.map_or(true, |v| v == report.category)
            && self.status.map_or(true, |v| v == report.status)
            && self.location.map_or(true, |v| Some(v) == report.location)
            && self.address.as_ref().map_or(true, |v| Some(v) == report.address.as_ref())
            && self
                .image_reference
                .as_ref()
                .map_or(true, |v| Some(v) == report.image_reference.as_ref())
    }
}
