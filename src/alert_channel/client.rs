//! NotificationClient - Notification Service REST Adapter
//!
//! ## Responsibilities
//!
//! - Fetch the pending alert set
//! - Acknowledge an alert
//! - Fetch the notification history (paged, filterable)

use crate::error::{Error, Result};
use crate::models::{parse_alert_records, Alert, NotificationHistory, NotificationHistoryResponse};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;

/// Default request timeout
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// History query parameters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    /// Incident type filter (`fire`, `fall`, `test_alert`)
    pub kind: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

impl HistoryQuery {
    pub fn page(page: u32, limit: u32) -> Self {
        Self {
            page: Some(page),
            limit: Some(limit),
            ..Default::default()
        }
    }

    fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(page) = self.page {
            params.push(("page", page.to_string()));
        }
        if let Some(limit) = self.limit {
            params.push(("limit", limit.to_string()));
        }
        if let Some(ref kind) = self.kind {
            params.push(("type", kind.clone()));
        }
        if let Some(ref start) = self.start_date {
            params.push(("startDate", start.clone()));
        }
        if let Some(ref end) = self.end_date {
            params.push(("endDate", end.clone()));
        }
        params
    }
}

/// Notification service operations used by the alert channel
#[async_trait]
pub trait NotificationApi: Send + Sync {
    /// Current pending set
    async fn pending(&self) -> Result<Vec<Alert>>;

    /// Acknowledge one alert; acknowledging twice is not an error
    async fn acknowledge(&self, id: &str) -> Result<()>;

    async fn history(&self, query: &HistoryQuery) -> Result<NotificationHistory>;
}

/// Notification service client
pub struct NotificationClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl NotificationClient {
    /// Create new notification client
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, DEFAULT_HTTP_TIMEOUT)
    }

    /// Create new notification client with custom timeout
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Map a request error; timeouts are reported as request failures
fn request_error(what: &str, e: reqwest::Error) -> Error {
    if e.is_timeout() || e.is_connect() {
        Error::RequestFailure(format!("{}: {}", what, e))
    } else {
        Error::Http(e)
    }
}

#[async_trait]
impl NotificationApi for NotificationClient {
    async fn pending(&self) -> Result<Vec<Alert>> {
        let url = format!("{}/api/notifications/pending", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| request_error("pending notifications", e))?;

        if !resp.status().is_success() {
            return Err(Error::RequestFailure(format!(
                "pending notifications failed: {}",
                resp.status()
            )));
        }

        let records: Vec<serde_json::Value> = resp.json().await?;
        Ok(parse_alert_records(records))
    }

    async fn acknowledge(&self, id: &str) -> Result<()> {
        let url = format!(
            "{}/api/notifications/{}/acknowledge",
            self.base_url,
            urlencoding::encode(id)
        );
        let resp = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| request_error("acknowledge", e))?;

        match resp.status() {
            status if status.is_success() => Ok(()),
            // Already acknowledged elsewhere
            StatusCode::CONFLICT => {
                tracing::debug!(alert_id = %id, "Alert already acknowledged on server");
                Ok(())
            }
            StatusCode::NOT_FOUND => Err(Error::NotFound(format!("alert {}", id))),
            status => Err(Error::RequestFailure(format!(
                "acknowledge {} failed: {}",
                id, status
            ))),
        }
    }

    async fn history(&self, query: &HistoryQuery) -> Result<NotificationHistory> {
        let url = format!("{}/api/notifications/history", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&query.to_params())
            .send()
            .await
            .map_err(|e| request_error("notification history", e))?;

        if !resp.status().is_success() {
            return Err(Error::RequestFailure(format!(
                "notification history failed: {}",
                resp.status()
            )));
        }

        let body: NotificationHistoryResponse = resp.json().await?;
        Ok(NotificationHistory {
            notifications: parse_alert_records(body.notifications),
            total: body.total,
        })
    }
}
