//! Downwatch: reachability watcher with throttled email alerts.
//!
//! Probes an HTTP(S) endpoint on a fixed interval, counts consecutive
//! failures, and emails each configured recipient according to their own
//! throttling policy so a long outage does not become an alert storm.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Configuration loading and validation.
pub mod config;
/// Secret loading from the runtime `.env` file.
pub mod credentials;
/// Tracing subscriber setup.
pub mod logging;
/// Alert rendering and mail delivery.
pub mod notifier;
/// Per-recipient notification throttling.
pub mod policy;
/// HTTP(S) reachability probe.
pub mod prober;
/// Interval-driven execution of watchers.
pub mod scheduler;
/// Monitored endpoint description.
pub mod target;
/// Failure tracking and notification orchestration.
pub mod watcher;
