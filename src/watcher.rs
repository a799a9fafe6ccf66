//! Per-target watcher: probe, count consecutive failures, notify.
//!
//! A [`Watcher`] exclusively owns its [`FailureTracker`]. [`Watcher::check`]
//! takes `&mut self`, so two checks on the same watcher can never overlap.
//! Nothing escapes `check`: probe failures are the expected input of the
//! throttle, and notification failures are routed to the [`ErrorSink`].

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::notifier::{Alert, Notifier, NotifyError};
use crate::policy::{select_recipients, RecipientPolicy};
use crate::prober::{ProbeError, Prober};
use crate::target::Target;

/// A notification for a named target could not be fully delivered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to notify about {target}: {source}")]
pub struct WatchError {
    /// Watcher name.
    pub target: String,
    /// Consecutive failures at the time of the attempt.
    pub consecutive_failures: u64,
    /// Underlying notification failure.
    #[source]
    pub source: NotifyError,
}

/// Receives every error that `check` would otherwise have to raise.
pub trait ErrorSink: Send + Sync {
    /// Handle one error.
    fn on_error(&self, error: &WatchError);
}

impl<F> ErrorSink for F
where
    F: Fn(&WatchError) + Send + Sync,
{
    fn on_error(&self, error: &WatchError) {
        self(error);
    }
}

/// [`ErrorSink`] that logs at `error` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogErrorSink;

impl ErrorSink for LogErrorSink {
    fn on_error(&self, err: &WatchError) {
        error!(
            service = %err.target,
            consecutive_failures = err.consecutive_failures,
            error = %err.source,
            "alert notification failed"
        );
    }
}

/// Consecutive-failure counter for one target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailureTracker {
    unreachable_count: u64,
}

impl FailureTracker {
    /// Tracker in the reachable state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Consecutive failures since the last success.
    pub fn count(&self) -> u64 {
        self.unreachable_count
    }

    /// Whether the last check failed.
    pub fn is_unreachable(&self) -> bool {
        self.unreachable_count > 0
    }

    /// Record a success, returning the count that was cleared.
    pub fn record_success(&mut self) -> u64 {
        std::mem::take(&mut self.unreachable_count)
    }

    /// Record a failure, returning the new count.
    pub fn record_failure(&mut self) -> u64 {
        self.unreachable_count = self.unreachable_count.saturating_add(1);
        self.unreachable_count
    }
}

/// Result of a single [`Watcher::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The probe saw a `200`.
    Reachable {
        /// Failure streak that this success ended (0 if none).
        recovered_after: u64,
    },
    /// The probe failed.
    Unreachable {
        /// Consecutive failures including this one.
        consecutive_failures: u64,
        /// Why the probe failed.
        error: ProbeError,
        /// Recipients selected for this failure.
        notified: Vec<String>,
        /// Whether delivery to all of them succeeded.
        delivered: bool,
    },
}

impl CheckOutcome {
    /// Whether the target answered `200`.
    pub fn is_reachable(&self) -> bool {
        matches!(self, Self::Reachable { .. })
    }
}

/// Serializable summary of a check, for CLI output.
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    /// Watcher name.
    pub target: String,
    /// Probed URL, or `host:port` if no URL could be built.
    pub endpoint: String,
    /// Whether the probe saw a `200`.
    pub reachable: bool,
    /// Consecutive failures after this check.
    pub consecutive_failures: u64,
    /// Probe error kind, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    /// Probe error message, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Recipients selected for notification.
    pub notified: Vec<String>,
}

/// Shared collaborators for building watchers.
#[derive(Clone)]
pub struct WatcherDeps {
    /// Probe implementation.
    pub prober: Arc<dyn Prober>,
    /// Alert sender.
    pub notifier: Arc<Notifier>,
    /// Destination for notification failures.
    pub error_sink: Arc<dyn ErrorSink>,
}

/// Watches one target.
pub struct Watcher {
    name: String,
    target: Target,
    subject: String,
    recipients: Vec<RecipientPolicy>,
    deps: WatcherDeps,
    tracker: FailureTracker,
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("name", &self.name)
            .field("target", &self.target)
            .field("recipients", &self.recipients)
            .field("tracker", &self.tracker)
            .finish_non_exhaustive()
    }
}

impl Watcher {
    /// Create a watcher in the reachable state.
    pub fn new(
        name: impl Into<String>,
        target: Target,
        subject: impl Into<String>,
        recipients: Vec<RecipientPolicy>,
        deps: WatcherDeps,
    ) -> Self {
        Self {
            name: name.into(),
            target,
            subject: subject.into(),
            recipients,
            deps,
            tracker: FailureTracker::new(),
        }
    }

    /// Watcher name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Watched endpoint.
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Current consecutive-failure count.
    pub fn unreachable_count(&self) -> u64 {
        self.tracker.count()
    }

    /// Probe once and advance the failure state. Never fails.
    pub async fn check(&mut self) -> CheckOutcome {
        match self.deps.prober.check(&self.target).await {
            Ok(()) => {
                let recovered_after = self.tracker.record_success();
                if recovered_after > 0 {
                    info!(
                        service = %self.name,
                        consecutive_failures = recovered_after,
                        "target reachable again"
                    );
                } else {
                    debug!(service = %self.name, "target reachable");
                }
                CheckOutcome::Reachable { recovered_after }
            }
            Err(probe_error) => self.handle_failure(probe_error).await,
        }
    }

    async fn handle_failure(&mut self, probe_error: ProbeError) -> CheckOutcome {
        let count = self.tracker.record_failure();

        // A refused connection repeats every tick while a service is down;
        // only the first one of a streak is worth a warning.
        if probe_error.is_connection_refused() && count > 1 {
            debug!(
                service = %self.name,
                consecutive_failures = count,
                error_kind = probe_error.kind(),
                error = %probe_error,
                "target unreachable"
            );
        } else {
            warn!(
                service = %self.name,
                consecutive_failures = count,
                error_kind = probe_error.kind(),
                error = %probe_error,
                "target unreachable"
            );
        }

        let recipients = select_recipients(count, &self.recipients);
        if recipients.is_empty() {
            debug!(service = %self.name, consecutive_failures = count, "no recipients due");
            return CheckOutcome::Unreachable {
                consecutive_failures: count,
                error: probe_error,
                notified: recipients,
                delivered: true,
            };
        }

        let alert = Alert {
            name: &self.name,
            target: &self.target,
            consecutive_failures: count,
            error: &probe_error,
            at: Utc::now(),
        };

        let delivered = match self
            .deps
            .notifier
            .notify(&recipients, &self.subject, &alert)
            .await
        {
            Ok(()) => {
                info!(
                    service = %self.name,
                    consecutive_failures = count,
                    recipients = ?recipients,
                    "alert sent"
                );
                true
            }
            Err(source) => {
                self.deps.error_sink.on_error(&WatchError {
                    target: self.name.clone(),
                    consecutive_failures: count,
                    source,
                });
                false
            }
        };

        CheckOutcome::Unreachable {
            consecutive_failures: count,
            error: probe_error,
            notified: recipients,
            delivered,
        }
    }

    /// Summarise `outcome` for display.
    pub fn report(&self, outcome: &CheckOutcome) -> CheckReport {
        let endpoint = self
            .target
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|_| self.target.to_string());
        let (error_kind, error, notified) = match outcome {
            CheckOutcome::Reachable { .. } => (None, None, Vec::new()),
            CheckOutcome::Unreachable {
                error, notified, ..
            } => (Some(error.kind()), Some(error.to_string()), notified.clone()),
        };
        CheckReport {
            target: self.name.clone(),
            endpoint,
            reachable: outcome.is_reachable(),
            consecutive_failures: self.tracker.count(),
            error_kind,
            error,
            notified,
        }
    }
}

/// Build one watcher per configured target, keyed by target name.
///
/// # Errors
///
/// Returns an error if any target's recipient policies are invalid.
pub fn build_watchers(
    config: &Config,
    deps: &WatcherDeps,
) -> anyhow::Result<BTreeMap<String, Watcher>> {
    let mut watchers = BTreeMap::new();
    for target_config in &config.targets {
        let policies = target_config
            .policies()
            .map_err(|e| anyhow::anyhow!("target {}: {e}", target_config.name))?;
        let watcher = Watcher::new(
            target_config.name.clone(),
            target_config.target(),
            target_config.subject(&config.report),
            policies,
            deps.clone(),
        );
        watchers.insert(target_config.name.clone(), watcher);
    }
    Ok(watchers)
}
