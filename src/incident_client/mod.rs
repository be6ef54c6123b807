//! IncidentClient - Incident Service REST Adapter
//!
//! ## Responsibilities
//!
//! - List recorded incidents (newest first)
//! - Fetch incident detail
//! - Resolve and download incident images

use crate::error::{Error, Result};
use crate::models::{parse_incident_timestamp, IncidentDetail, IncidentSummary};
use reqwest::StatusCode;
use std::time::Duration;

/// Incident service client
pub struct IncidentClient {
    client: reqwest::Client,
    base_url: String,
}

impl IncidentClient {
    /// Create new incident client
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, Duration::from_secs(10))
    }

    /// Create new incident client with custom timeout
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// List incidents, newest first
    ///
    /// Entries with an unparseable timestamp keep their server order at the end.
    pub async fn list(&self) -> Result<Vec<IncidentSummary>> {
        let url = format!("{}/api/incidents", self.base_url);
        let resp = self.client.get(&url).send().await?;

        if !resp.status().is_success() {
            return Err(Error::RequestFailure(format!(
                "incident list failed: {}",
                resp.status()
            )));
        }

        let mut incidents: Vec<IncidentSummary> = resp.json().await?;
        incidents.sort_by_cached_key(|i| {
            std::cmp::Reverse(parse_incident_timestamp(&i.timestamp).ok())
        });
        Ok(incidents)
    }

    /// Get one incident
    pub async fn get(&self, uuid: &str) -> Result<IncidentDetail> {
        let url = format!("{}/api/incidents/{}", self.base_url, urlencoding::encode(uuid));
        let resp = self.client.get(&url).send().await?;

        match resp.status() {
            status if status.is_success() => Ok(resp.json().await?),
            StatusCode::NOT_FOUND => Err(Error::NotFound(format!("incident {}", uuid))),
            status => Err(Error::RequestFailure(format!(
                "incident {} failed: {}",
                uuid, status
            ))),
        }
    }

    /// URL of an incident image reference
    pub fn image_url(&self, image: &str) -> String {
        format!(
            "{}/api/incidents/files/{}",
            self.base_url,
            urlencoding::encode(image)
        )
    }

    /// Download the image of an incident, if it has one
    pub async fn fetch_image(&self, incident: &IncidentDetail) -> Result<Option<Vec<u8>>> {
        let Some(ref image) = incident.image else {
            return Ok(None);
        };

        let resp = self.client.get(self.image_url(image)).send().await?;
        match resp.status() {
            status if status.is_success() => Ok(Some(resp.bytes().await?.to_vec())),
            StatusCode::NOT_FOUND => {
                tracing::warn!(incident = %incident.uuid, image = %image, "Incident image missing");
                Ok(None)
            }
            status => Err(Error::RequestFailure(format!(
                "incident image {} failed: {}",
                image, status
            ))),
        }
    }
}
