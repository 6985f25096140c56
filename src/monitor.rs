//! Monitor mute window
//!
//! Pauses an external alerting system for a bounded window around the run so
//! planned maintenance does not page anyone. The monitoring vendor is a
//! non-critical collaborator: a vendor outage is logged and never blocks or
//! fails infrastructure maintenance.
//!
//! The resume guarantee (exactly one attempt per run, on every exit path) is
//! owned by the orchestrator, which releases the window after the phase loop
//! regardless of how it ended. The `Drop` impl here is only a backstop that
//! makes a missed release visible in logs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::error::{Error, Result};

/// Alerting-vendor operations the gate depends on.
#[async_trait]
pub trait AlertingApi: Send + Sync {
    async fn pause_all(&self, duration: Duration) -> Result<()>;
    async fn resume_all(&self) -> Result<()>;
}

/// The paused-alerting period for one run.
#[derive(Debug)]
pub struct MonitorWindow {
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    /// Whether a resume has been attempted. Set before the attempt so the
    /// attempt happens at most once even if it fails.
    pub resumed: bool,
    /// Pause failed because the vendor was unreachable.
    pub unavailable: bool,
    /// False when monitor integration is disabled; all calls are no-ops.
    pub enabled: bool,
}

impl MonitorWindow {
    fn disabled() -> Self {
        Self {
            started_at: Utc::now(),
            duration: Duration::ZERO,
            resumed: false,
            unavailable: false,
            enabled: false,
        }
    }
}

impl Drop for MonitorWindow {
    fn drop(&mut self) {
        if self.enabled && !self.unavailable && !self.resumed {
            // Alerting stays muted until the vendor-side window expires.
            error!(
                "monitor window dropped without resume; alerting remains muted for up to {:?}",
                self.duration
            );
        }
    }
}

/// Brackets a run with pause/resume calls against the alerting vendor.
pub struct MonitorGate {
    api: Arc<dyn AlertingApi>,
    enabled: bool,
    pause_for: Duration,
}

impl MonitorGate {
    pub fn new(api: Arc<dyn AlertingApi>, enabled: bool, pause_for: Duration) -> Self {
        Self {
            api,
            enabled,
            pause_for,
        }
    }

    /// Open the mute window. Never fails: when the integration is disabled
    /// this is a no-op, and a vendor outage only flags the window as
    /// unavailable so the report can surface it.
    pub async fn pause(&self) -> MonitorWindow {
        if !self.enabled {
            info!("monitor integration disabled, skipping alert pause");
            return MonitorWindow::disabled();
        }

        match self.api.pause_all(self.pause_for).await {
            Ok(()) => {
                info!(duration = ?self.pause_for, "alerting paused for maintenance");
                MonitorWindow {
                    started_at: Utc::now(),
                    duration: self.pause_for,
                    resumed: false,
                    unavailable: false,
                    enabled: true,
                }
            }
            Err(e) => {
                warn!(error = %e, "could not pause alerting; maintenance proceeds unmuted");
                MonitorWindow {
                    started_at: Utc::now(),
                    duration: self.pause_for,
                    resumed: false,
                    unavailable: true,
                    enabled: true,
                }
            }
        }
    }

    /// Close the mute window. Attempted at most once per window; a resume
    /// failure is logged and never escalated, since a monitoring outage must
    /// not turn a finished maintenance run into a failure.
    pub async fn resume(&self, window: &mut MonitorWindow) {
        if window.resumed {
            warn!("monitor window already resumed, ignoring duplicate release");
            return;
        }
        window.resumed = true;

        if !window.enabled {
            return;
        }

        match self.api.resume_all().await {
            Ok(()) => info!("alerting resumed"),
            Err(e) => warn!(error = %e, "could not resume alerting; vendor-side window will expire on its own"),
        }
    }
}

/// Alerting client for an HTTP mute API (Healthchecks/Datadog-style
/// maintenance endpoint): POST opens a mute window, DELETE closes it.
pub struct HttpAlertingApi {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpAlertingApi {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("fleetpatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(Error::HttpError)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn mute_url(&self) -> String {
        format!("{}/maintenance", self.base_url)
    }
}

#[async_trait]
impl AlertingApi for HttpAlertingApi {
    async fn pause_all(&self, duration: Duration) -> Result<()> {
        let body = serde_json::json!({ "pause_minutes": duration.as_secs() / 60 });

        let resp = self
            .client
            .post(self.mute_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::ExternalSystemUnavailable(format!("alerting pause: {e}")))?;

        if !resp.status().is_success() {
            return Err(Error::ExternalSystemUnavailable(format!(
                "alerting pause returned HTTP {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn resume_all(&self) -> Result<()> {
        let resp = self
            .client
            .delete(self.mute_url())
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| Error::ExternalSystemUnavailable(format!("alerting resume: {e}")))?;

        if !resp.status().is_success() {
            return Err(Error::ExternalSystemUnavailable(format!(
                "alerting resume returned HTTP {}",
                resp.status()
            )));
        }
        Ok(())
    }
}
