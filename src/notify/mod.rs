//! Cycle outcome reporting.
//!
//! Every cycle ends in a [`CycleReport`]; the [`Notifier`] logs it and, when a
//! webhook is configured and the per-outcome toggle allows it, posts a
//! [`NotificationEvent`] JSON payload. Delivery is fire-and-forget with its
//! own bounded retry; a failed delivery is a warning, never a cycle failure.

use std::time::Duration;

use chrono::Utc;
use derive_more::Display;

use crate::config::{Configuration, Webhook};
use crate::util::retry::{retry_with_backoff, RetryPolicy};
use crate::util::scrub::Scrubber;

#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// The cycle completed and every check passed.
    #[display("success")]
    Success,
    /// The cycle ran its course but the work itself failed.
    #[display("failure")]
    Failure,
    /// The cycle could not even attempt its work.
    #[display("error")]
    Error,
}

/// Outcome of one backup or restore cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub status: Status,
    pub message: String,
    pub artifact_key: Option<String>,
}

impl CycleReport {
    pub fn success(message: impl Into<String>, artifact_key: Option<String>) -> Self {
        Self {
            status: Status::Success,
            message: message.into(),
            artifact_key,
        }
    }

    pub fn failure(message: impl Into<String>, artifact_key: Option<String>) -> Self {
        Self {
            status: Status::Failure,
            message: message.into(),
            artifact_key,
        }
    }

    pub fn error(message: impl Into<String>, artifact_key: Option<String>) -> Self {
        Self {
            status: Status::Error,
            message: message.into(),
            artifact_key,
        }
    }
}

/// Webhook payload, see the external interface contract.
#[derive(Debug, serde::Serialize)]
struct NotificationEvent<'a> {
    status: Status,
    message: &'a str,
    backup_file: Option<&'a str>,
    duration_seconds: u64,
    timestamp: String,
    service: &'a str,
    host: &'a str,
}

pub struct Notifier {
    service: String,
    host: String,
    webhook: Option<Webhook>,
    scrubber: Scrubber,
    policy: RetryPolicy,
}

impl Notifier {
    pub fn new(cfg: &Configuration) -> Self {
        Self {
            service: cfg.service.clone(),
            host: cfg.host.clone(),
            webhook: cfg.webhook.clone(),
            scrubber: cfg.scrubber(),
            policy: RetryPolicy::default(),
        }
    }

    /// Logs the report and delivers it to the webhook when configured.
    pub fn emit(&self, report: &CycleReport, duration: Duration) {
        let message = self.scrubber.scrub(&report.message);
        match report.status {
            Status::Success => {
                log::info!(target: "notify", "cycle succeeded after {duration:?}: {message}")
            }
            Status::Failure | Status::Error => {
                log::warn!(target: "notify", "cycle ended in {} after {duration:?}: {message}", report.status)
            }
        }

        let Some(webhook) = self.webhook.as_ref().filter(|w| should_send(w, report.status))
        else {
            return;
        };

        let event = NotificationEvent {
            status: report.status,
            message: &message,
            backup_file: report.artifact_key.as_deref(),
            duration_seconds: duration.as_secs(),
            timestamp: Utc::now().to_rfc3339(),
            service: &self.service,
            host: &self.host,
        };

        if let Err(e) = retry_with_backoff(self.policy, "webhook delivery", || {
            post_event(&webhook.url, &event)
        }) {
            log::warn!(target: "notify", "webhook delivery abandoned: {e}");
        }
    }
}

fn should_send(webhook: &Webhook, status: Status) -> bool {
    match status {
        Status::Success => webhook.on_success,
        Status::Failure | Status::Error => webhook.on_failure,
    }
}

fn post_event(url: &str, event: &NotificationEvent<'_>) -> Result<(), String> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| format!("building http client: {e}"))?;

    let response = client
        .post(url)
        .json(event)
        .send()
        .map_err(|e| format!("request: {e}"))?;

    if !response.status().is_success() {
        return Err(format!("webhook answered {}", response.status()));
    }
    Ok(())
}
