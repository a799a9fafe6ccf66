//! Mail transport contract and a log-only implementation.

use async_trait::async_trait;
use tracing::info;

/// Display name and address placed in the `From` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    /// Display name, e.g. `"Downwatch Notifier"`.
    pub name: String,
    /// Authenticated sending address.
    pub address: String,
}

impl Sender {
    /// `Name <address>` form.
    pub fn header_value(&self) -> String {
        format!("{} <{}>", self.name, self.address)
    }
}

/// A rendered message ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    /// Sender.
    pub from: Sender,
    /// Recipient addresses; never empty.
    pub to: Vec<String>,
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub text: String,
    /// HTML body.
    pub html: String,
}

/// What the transport did with each recipient.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Recipients the server accepted.
    pub accepted: Vec<String>,
    /// Recipients the server refused.
    pub rejected: Vec<String>,
}

/// The transport could not be used at all.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Transport misconfigured (bad relay host, unparsable sender).
    #[error("mail transport configuration error: {0}")]
    Config(String),
    /// The message itself could not be built.
    #[error("failed to build message: {0}")]
    Message(String),
    /// Connection, TLS, or authentication failure.
    #[error("mail delivery failed: {0}")]
    Delivery(String),
}

/// Delivers rendered mail.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Send `mail` to every address in `mail.to`.
    ///
    /// A successful return may still list refused recipients in
    /// [`DeliveryReport::rejected`].
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when nothing could be delivered because the
    /// transport itself failed.
    async fn send(&self, mail: &OutgoingMail) -> Result<DeliveryReport, TransportError>;
}

/// Transport that only logs. Used by `check --dry-run`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTransport;

#[async_trait]
impl MailTransport for LogTransport {
    async fn send(&self, mail: &OutgoingMail) -> Result<DeliveryReport, TransportError> {
        info!(
            from = %mail.from.header_value(),
            to = ?mail.to,
            subject = %mail.subject,
            body = %mail.text,
            "dry run: alert not sent"
        );
        Ok(DeliveryReport {
            accepted: mail.to.clone(),
            rejected: Vec::new(),
        })
    }
}
