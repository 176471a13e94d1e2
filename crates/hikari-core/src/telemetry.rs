//! Watch-progress telemetry
//!
//! [`ViewTracker`] decides when a view counts; [`ViewCounter`] delivers it.
//! Delivery is best-effort and never feeds back into playback.

use crate::{config::TelemetryConfig, error::Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

/// Per-session "view already counted" flag
#[derive(Debug, Clone)]
pub struct ViewTracker {
    threshold: f64,
    counted: bool,
}

impl ViewTracker {
    pub fn new(threshold_secs: f64) -> Self {
        Self {
            threshold: threshold_secs,
            counted: false,
        }
    }

    /// Returns true exactly once: on the first tick past the threshold
    pub fn on_time_update(&mut self, position: f64) -> bool {
        if self.counted || position <= self.threshold {
            return false;
        }
        self.counted = true;
        true
    }

    pub fn counted(&self) -> bool {
        self.counted
    }
}

/// Receives "episode viewed" notifications
#[async_trait]
pub trait ViewCounter: Send + Sync {
    async fn record_view(&self, episode_id: &str) -> Result<()>;
}

/// Posts views to the catalog API
pub struct HttpViewCounter {
    client: Client,
    base_url: Url,
}

impl HttpViewCounter {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    /// Counter for the configured API, if one is set
    pub fn from_config(config: &TelemetryConfig) -> Result<Option<Self>> {
        match &config.api_base_url {
            Some(base) => Ok(Some(Self::new(
                base.clone(),
                Duration::from_millis(config.request_timeout_ms),
            )?)),
            None => Ok(None),
        }
    }

    /// `{base}/api/v1/episodes/{id}/view`
    pub fn endpoint(&self, episode_id: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::InvalidConfig(format!("{} cannot be a base URL", self.base_url)))?
            .pop_if_empty()
            .extend(["api", "v1", "episodes", episode_id, "view"]);
        Ok(url)
    }
}

#[async_trait]
impl ViewCounter for HttpViewCounter {
    #[instrument(skip(self))]
    async fn record_view(&self, episode_id: &str) -> Result<()> {
        let url = self.endpoint(episode_id)?;
        let response = self
            .client
            .post(url)
            .send()
            .await
            .map_err(|e| Error::ViewReport {
                episode_id: episode_id.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(Error::ViewReport {
                episode_id: episode_id.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }
        debug!("View recorded");
        Ok(())
    }
}
