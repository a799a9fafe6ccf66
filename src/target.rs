//! The monitored endpoint and how a probe URL is built from it.

use std::fmt;

use url::Url;

/// A single HTTP(S) endpoint to probe. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Hostname or IP address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Request path, always starting with `/`.
    pub path: String,
    /// Use HTTPS instead of HTTP.
    pub secure: bool,
}

impl Target {
    /// Create a target. A path without a leading `/` gets one, and an empty
    /// path becomes `/`.
    pub fn new(host: impl Into<String>, port: u16, path: impl Into<String>, secure: bool) -> Self {
        let path = path.into();
        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };
        Self {
            host: host.into(),
            port,
            path,
            secure,
        }
    }

    /// URL scheme for this target.
    pub fn scheme(&self) -> &'static str {
        if self.secure {
            "https"
        } else {
            "http"
        }
    }

    /// Build the probe URL.
    ///
    /// # Errors
    ///
    /// Returns a parse error if the host or path does not form a valid URL.
    pub fn url(&self) -> Result<Url, url::ParseError> {
        // Bare IPv6 literals need brackets in the authority.
        let host = if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        Url::parse(&format!(
            "{}://{host}:{}{}",
            self.scheme(),
            self.port,
            self.path
        ))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
