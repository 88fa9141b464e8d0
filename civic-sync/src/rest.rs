//! REST implementation of the fetch and write collaborators.

use crate::config::{AuthConfig, SyncConfig};
use crate::error::ClientResult;
use crate::remote::{ReportFetcher, ReportWriter};
use async_trait::async_trait;
use civic_core::{NewReport, Report, ReportFilter, ReportId, ReportPatch, SyncError, SyncResult};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;

const REPORTS_PATH: &str = "/api/v1/reports";

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
}

#[derive(Clone)]
pub struct RestClient {
    client: reqwest::Client,
    base_url: String,
    auth_header: HeaderMap,
}

impl RestClient {
    pub fn new(config: &SyncConfig) -> ClientResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        let auth_header = build_auth_headers(&config.auth)?;
        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            auth_header,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Decode a response. A 404 on a request addressed to `target` becomes
    /// `NotFound`.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        &self,
        operation: &str,
        target: Option<ReportId>,
        response: reqwest::Response,
    ) -> SyncResult<T> {
        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| SyncError::transport(operation, e));
        }
        let text = response
            .text()
            .await
            .map_err(|e| SyncError::transport(operation, e))?;
        if let (reqwest::StatusCode::NOT_FOUND, Some(id)) = (status, target) {
            return Err(SyncError::NotFound { id });
        }
        if let Ok(body) = serde_json::from_str::<ErrorBody>(&text) {
            return Err(SyncError::transport(
                operation,
                format!("{}: {}", body.code, body.message),
            ));
        }
        Err(SyncError::transport(
            operation,
            format!("HTTP {}: {}", status.as_u16(), text),
        ))
    }
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ReportFetcher for RestClient {
    async fn fetch_all(&self, hints: Option<&ReportFilter>) -> SyncResult<Vec<Report>> {
        let mut request = self
            .client
            .get(self.url(REPORTS_PATH))
            .headers(self.auth_header.clone());
        if let Some(hints) = hints {
            request = request.query(&query_params(hints));
        }
        let response = request
            .send()
            .await
            .map_err(|e| SyncError::transport("fetch_all", e))?;
        self.parse_response("fetch_all", None, response).await
    }
}

#[async_trait]
impl ReportWriter for RestClient {
    async fn write_patch(&self, id: ReportId, patch: &ReportPatch) -> SyncResult<Report> {
        let path = format!("{}/{}", REPORTS_PATH, id);
        let response = self
            .client
            .patch(self.url(&path))
            .headers(self.auth_header.clone())
            .json(patch)
            .send()
            .await
            .map_err(|e| SyncError::transport("write_patch", e))?;
        self.parse_response("write_patch", Some(id), response).await
    }

    async fn create_report(&self, report: &NewReport) -> SyncResult<Report> {
        let response = self
            .client
            .post(self.url(REPORTS_PATH))
            .headers(self.auth_header.clone())
            .json(report)
            .send()
            .await
            .map_err(|e| SyncError::transport("create_report", e))?;
        self.parse_response("create_report", None, response).await
    }
}

/// Server-side narrowing hints. Ordering and `located_only` stay client-side.
fn query_params(hints: &ReportFilter) -> Vec<(&'static str, String)> {
    let mut params = Vec::new();
    if let Some(status) = hints.status {
        params.push(("status", status.to_string()));
    }
    if let Some(category) = hints.category {
        params.push(("category", category.to_string()));
    }
    if let Some(range) = hints.created {
        if let Some(start) = range.start {
            params.push(("created_after", start.to_rfc3339()));
        }
        if let Some(end) = range.end {
            params.push(("created_before", end.to_rfc3339()));
        }
    }
    params
}

pub(crate) fn build_auth_headers(auth: &AuthConfig) -> ClientResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    if let Some(api_key) = &auth.api_key {
        headers.insert(
            HeaderName::from_static("x-api-key"),
            HeaderValue::from_str(api_key)?,
        );
    }
    if let Some(jwt) = &auth.jwt {
        let value = format!("Bearer {}", jwt);
        headers.insert(
            HeaderName::from_static("authorization"),
            HeaderValue::from_str(&value)?,
        );
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use civic_core::{DateRange, ReportCategory, ReportStatus};

    #[test]
    fn test_auth_headers() {
        let headers = build_auth_headers(&AuthConfig {
            api_key: Some("key".to_string()),
            jwt: Some("token".to_string()),
        })
        .unwrap();
        assert_eq!(headers.get("x-api-key").unwrap(), "key");
        assert_eq!(headers.get("authorization").unwrap(), "Bearer token");
    }

    #[test]
    fn test_invalid_header_value_rejected() {
        let result = build_auth_headers(&AuthConfig {
            api_key: Some("bad\nkey".to_string()),
            jwt: None,
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_query_params_from_hints() {
        let start = chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let hints = ReportFilter::all()
            .with_status(ReportStatus::InProgress)
            .with_category(ReportCategory::Garbage)
            .with_created(DateRange::since(start));
        let params = query_params(&hints);
        assert_eq!(params[0], ("status", "in_progress".to_string()));
        assert_eq!(params[1], ("category", "garbage".to_string()));
        assert_eq!(params[2].0, "created_after");
        assert_eq!(params.len(), 3);
        assert!(query_params(&ReportFilter::all()).is_empty());
    }
}
