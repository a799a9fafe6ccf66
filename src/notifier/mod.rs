//! Alert rendering and dispatch.
//!
//! [`Notifier`] turns a failure into a plain-text + HTML email and hands it
//! to a [`MailTransport`]. A transport that accepts the message but refuses
//! some recipients is still a failure: it surfaces as
//! [`NotifyError::PartialDelivery`].

pub mod smtp;
pub mod transport;

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use tracing::{debug, warn};

use crate::prober::ProbeError;
use crate::target::Target;

pub use transport::{
    DeliveryReport, LogTransport, MailTransport, OutgoingMail, Sender, TransportError,
};

/// Timestamp format used in alert bodies.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S %:z";

/// Notification failed, wholly or for some recipients.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotifyError {
    /// The transport could not be used.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The transport ran but refused these recipients.
    #[error("Failed to send to: {}", .rejected.join(","))]
    PartialDelivery {
        /// Refused addresses.
        rejected: Vec<String>,
    },
}

/// One failure event to report.
#[derive(Debug, Clone)]
pub struct Alert<'a> {
    /// Name of the watched service.
    pub name: &'a str,
    /// Endpoint that failed.
    pub target: &'a Target,
    /// Consecutive failures including this one.
    pub consecutive_failures: u64,
    /// Why the probe failed.
    pub error: &'a ProbeError,
    /// When the failure was observed.
    pub at: DateTime<Utc>,
}

impl Alert<'_> {
    /// Human-readable headline, e.g. `Couldn't reach api at host:443/health`.
    pub fn summary(&self) -> String {
        let path = if self.target.path == "/" {
            ""
        } else {
            self.target.path.as_str()
        };
        format!("Couldn't reach {} at {}{path}", self.name, self.target)
    }

    /// Observation time in the reporting offset.
    pub fn timestamp(&self, offset: &FixedOffset) -> String {
        self.at
            .with_timezone(offset)
            .format(TIMESTAMP_FORMAT)
            .to_string()
    }

    /// Plain-text body.
    pub fn render_text(&self, offset: &FixedOffset) -> String {
        format!(
            "{summary}. {error}\n\nTime: {time}\nConsecutive failures: {count}\n",
            summary = self.summary(),
            error = self.error,
            time = self.timestamp(offset),
            count = self.consecutive_failures,
        )
    }

    /// HTML body.
    pub fn render_html(&self, offset: &FixedOffset) -> String {
        format!(
            "<p><b>{summary}</b></p>\n\
             <p>{error}</p>\n\
             <p>Time: {time}<br>\nConsecutive failures: {count}</p>\n",
            summary = html_escape(&self.summary()),
            error = html_escape(&self.error.to_string()),
            time = html_escape(&self.timestamp(offset)),
            count = self.consecutive_failures,
        )
    }
}

/// Renders alerts and sends them through a [`MailTransport`].
#[derive(Clone)]
pub struct Notifier {
    transport: Arc<dyn MailTransport>,
    sender: Sender,
    offset: FixedOffset,
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("sender", &self.sender)
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

impl Notifier {
    /// Create a notifier stamping times in `offset`.
    pub fn new(transport: Arc<dyn MailTransport>, sender: Sender, offset: FixedOffset) -> Self {
        Self {
            transport,
            sender,
            offset,
        }
    }

    /// Reporting offset.
    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Build the message for `alert` addressed to `recipients`.
    pub fn compose(&self, recipients: &[String], subject: &str, alert: &Alert<'_>) -> OutgoingMail {
        OutgoingMail {
            from: self.sender.clone(),
            to: recipients.to_vec(),
            subject: subject.to_owned(),
            text: alert.render_text(&self.offset),
            html: alert.render_html(&self.offset),
        }
    }

    /// Send `alert` to `recipients`. An empty recipient list is a no-op and
    /// never touches the transport.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Transport`] when delivery could not be attempted
    /// and [`NotifyError::PartialDelivery`] when any recipient was refused.
    pub async fn notify(
        &self,
        recipients: &[String],
        subject: &str,
        alert: &Alert<'_>,
    ) -> Result<(), NotifyError> {
        if recipients.is_empty() {
            return Ok(());
        }

        let mail = self.compose(recipients, subject, alert);
        let report = self.transport.send(&mail).await?;

        if !report.rejected.is_empty() {
            warn!(rejected = ?report.rejected, "mail transport rejected recipients");
            return Err(NotifyError::PartialDelivery {
                rejected: report.rejected,
            });
        }

        debug!(recipients = ?recipients, "alert delivered");
        Ok(())
    }
}

/// Escape HTML special characters.
fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Parse a fixed UTC offset such as `+02:00`, `-0530`, or `Z`.
///
/// # Errors
///
/// Returns a description of the problem for malformed or out-of-range input.
pub fn parse_utc_offset(raw: &str) -> Result<FixedOffset, String> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0).ok_or_else(|| "invalid zero offset".to_owned());
    }

    let (sign, rest) = match raw.split_at_checked(1) {
        Some(("+", rest)) => (1_i32, rest),
        Some(("-", rest)) => (-1_i32, rest),
        _ => return Err(format!("utc offset {raw:?} must start with '+' or '-'")),
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!("utc offset {raw:?} must look like +HH:MM"));
    }
    let (hh, mm) = digits.split_at(2);
    let hours: i32 = hh.parse().map_err(|_| format!("bad hours in {raw:?}"))?;
    let minutes: i32 = mm.parse().map_err(|_| format!("bad minutes in {raw:?}"))?;
    if hours > 23 || minutes > 59 {
        return Err(format!("utc offset {raw:?} out of range"));
    }

    let seconds = hours
        .checked_mul(3600)
        .and_then(|h| minutes.checked_mul(60).and_then(|m| h.checked_add(m)))
        .and_then(|s| s.checked_mul(sign))
        .ok_or_else(|| format!("utc offset {raw:?} out of range"))?;
    FixedOffset::east_opt(seconds).ok_or_else(|| format!("utc offset {raw:?} out of range"))
}
