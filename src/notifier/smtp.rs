//! SMTP delivery through `lettre`.
//!
//! Each recipient gets its own envelope so a refused address (a permanent
//! `5xx` reply) is reported individually instead of failing the whole batch.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, warn};

use super::transport::{DeliveryReport, MailTransport, OutgoingMail, TransportError};
use crate::config::{SmtpConfig, SmtpSecurity};

/// [`MailTransport`] that talks to an SMTP relay, authenticating when a
/// password is configured.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl std::fmt::Debug for SmtpMailer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpMailer").finish_non_exhaustive()
    }
}

impl SmtpMailer {
    /// Build a mailer for `config`. With a `password` the mailer
    /// authenticates as `config.username`; without one it never sends AUTH.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Config`] if the relay cannot be set up.
    pub fn new(
        config: &SmtpConfig,
        password: Option<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, TransportError> {
        let builder = match config.security {
            SmtpSecurity::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| TransportError::Config(e.to_string()))?,
            SmtpSecurity::Starttls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                    .map_err(|e| TransportError::Config(e.to_string()))?
            }
            SmtpSecurity::None => {
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(config.host.as_str())
            }
        };

        let mut builder = builder.port(config.port).timeout(timeout);
        if let Some(password) = password {
            builder = builder.credentials(Credentials::new(config.username.clone(), password));
        }
        let transport = builder.build();

        Ok(Self { transport })
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<DeliveryReport, TransportError> {
        let from_address: Address = mail
            .from
            .address
            .parse()
            .map_err(|e| TransportError::Config(format!("from address: {e}")))?;
        let from = Mailbox::new(Some(mail.from.name.clone()), from_address);

        let mut report = DeliveryReport::default();
        let mut transport_failure: Option<String> = None;

        for recipient in &mail.to {
            let to_address: Address = match recipient.parse() {
                Ok(address) => address,
                Err(e) => {
                    warn!(recipient = %recipient, error = %e, "unparsable recipient address");
                    report.rejected.push(recipient.clone());
                    continue;
                }
            };

            let message = Message::builder()
                .from(from.clone())
                .to(Mailbox::new(None, to_address))
                .subject(mail.subject.clone())
                .multipart(MultiPart::alternative_plain_html(
                    mail.text.clone(),
                    mail.html.clone(),
                ))
                .map_err(|e| TransportError::Message(e.to_string()))?;

            match self.transport.send(message).await {
                Ok(_) => {
                    debug!(recipient = %recipient, "smtp accepted message");
                    report.accepted.push(recipient.clone());
                }
                Err(e) if e.is_permanent() => {
                    warn!(recipient = %recipient, error = %e, "smtp rejected recipient");
                    report.rejected.push(recipient.clone());
                }
                Err(e) => {
                    warn!(recipient = %recipient, error = %e, "smtp delivery failed");
                    report.rejected.push(recipient.clone());
                    transport_failure.get_or_insert_with(|| e.to_string());
                }
            }
        }

        // Nothing got through and the relay itself failed: that is a
        // transport error, not a per-recipient rejection.
        if report.accepted.is_empty() {
            if let Some(reason) = transport_failure {
                return Err(TransportError::Delivery(reason));
            }
        }

        Ok(report)
    }
}
