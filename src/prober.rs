//! Reachability probe: one HTTP(S) GET per check.
//!
//! Only a `200` response counts as reachable. Certificate validation is
//! disabled so self-signed endpoints can be watched, and redirects are not
//! followed, so a `3xx` is reported as a failure like any other status.
//! Proxy environment variables are ignored: the probe always connects to the
//! target directly.

use std::error::Error as StdError;
use std::time::Duration;

use async_trait::async_trait;
use tracing::instrument;

use crate::target::Target;

/// Why a probe did not observe a `200`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    /// The endpoint answered with something other than `200`.
    #[error("Got status code {code}")]
    Status {
        /// HTTP status code received.
        code: u16,
    },
    /// Nothing is listening on the target port.
    #[error("connection refused: {0}")]
    ConnectionRefused(String),
    /// The request did not complete within the configured deadline.
    #[error("request timed out: {0}")]
    Timeout(String),
    /// DNS, TLS, reset, or any other transport-level failure.
    #[error("network error: {0}")]
    Network(String),
    /// The target could not be turned into a request URL.
    #[error("invalid target: {0}")]
    InvalidTarget(String),
}

impl ProbeError {
    /// Stable identifier for log fields and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::ConnectionRefused(_) => "connection_refused",
            Self::Timeout(_) => "timeout",
            Self::Network(_) => "network",
            Self::InvalidTarget(_) => "invalid_target",
        }
    }

    /// Whether the failure was a refused TCP connection.
    pub fn is_connection_refused(&self) -> bool {
        matches!(self, Self::ConnectionRefused(_))
    }
}

/// Checks whether a target is reachable.
///
/// Implementations must be `Send + Sync` so one prober can be shared by
/// watchers running on different tasks.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Probe `target` once.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError`] for any outcome other than an HTTP `200`.
    async fn check(&self, target: &Target) -> Result<(), ProbeError>;
}

/// [`Prober`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    /// Build a prober. `timeout` bounds the whole request; `None` waits
    /// indefinitely.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn new(timeout: Option<Duration>) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }
}

#[async_trait]
impl Prober for HttpProber {
    #[instrument(skip(self, target), fields(endpoint = %target))]
    async fn check(&self, target: &Target) -> Result<(), ProbeError> {
        let url = target
            .url()
            .map_err(|e| ProbeError::InvalidTarget(e.to_string()))?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        if status == reqwest::StatusCode::OK {
            Ok(())
        } else {
            Err(ProbeError::Status {
                code: status.as_u16(),
            })
        }
    }
}

/// Map a `reqwest` failure onto [`ProbeError`], keeping the full cause chain
/// in the message.
fn classify_request_error(err: reqwest::Error) -> ProbeError {
    let message = error_chain(&err);
    if err.is_timeout() {
        ProbeError::Timeout(message)
    } else if has_io_kind(&err, std::io::ErrorKind::ConnectionRefused) {
        ProbeError::ConnectionRefused(message)
    } else {
        ProbeError::Network(message)
    }
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !parts.iter().any(|p| p.contains(&text)) {
            parts.push(text);
        }
        source = cause.source();
    }
    parts.join(": ")
}

fn has_io_kind(err: &(dyn StdError + 'static), kind: std::io::ErrorKind) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e
            .downcast_ref::<std::io::Error>()
            .is_some_and(|io| io.kind() == kind)
        {
            return true;
        }
        current = e.source();
    }
    false
}
