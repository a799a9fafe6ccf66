//! Credential loading from the runtime `.env` file.
//!
//! Secrets such as the SMTP password never live in `config.toml`. They are
//! read from `~/.downwatch/.env`, which must not be readable by other users,
//! with the process environment as a fallback.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::Context;

use crate::config::{SmtpConfig, SmtpSecurity};

/// Runtime credentials loaded from the `.env` file.
#[derive(Clone, Default)]
pub struct Credentials {
    vars: BTreeMap<String, String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("keys", &self.vars.keys().collect::<Vec<_>>())
            .field("values", &"[REDACTED]")
            .finish()
    }
}

impl Credentials {
    /// Build credentials from a key-value map.
    pub fn from_map(vars: BTreeMap<String, String>) -> Self {
        Self { vars }
    }

    /// Returns a credential value for a key, if present in the file.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Returns a non-empty credential from the file, falling back to the
    /// process environment.
    pub fn lookup(&self, key: &str) -> Option<String> {
        self.vars
            .get(key)
            .cloned()
            .or_else(|| std::env::var(key).ok())
            .filter(|value| !value.trim().is_empty())
    }

    /// Like [`Credentials::lookup`], but the credential must exist.
    ///
    /// # Errors
    ///
    /// Returns an error when the key is missing or empty in both places.
    pub fn require(&self, key: &str) -> anyhow::Result<String> {
        self.lookup(key)
            .ok_or_else(|| anyhow::anyhow!("missing required credential: {key}"))
    }

    /// SMTP password for `smtp`.
    ///
    /// Encrypted relays always authenticate, so the password is mandatory.
    /// A plain (`security = "none"`) relay is usually a local MTA without
    /// AUTH: the password is used when present and skipped otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error when an encrypted relay has no password configured.
    pub fn smtp_password(&self, smtp: &SmtpConfig) -> anyhow::Result<Option<String>> {
        match smtp.security {
            SmtpSecurity::None => Ok(self.lookup(&smtp.password_env)),
            SmtpSecurity::Tls | SmtpSecurity::Starttls => {
                self.require(&smtp.password_env).map(Some)
            }
        }
    }
}

/// Load credentials from a specific `.env` path.
///
/// A missing file yields empty credentials so the environment fallback still
/// works.
///
/// # Errors
///
/// Returns an error if the file permissions are too broad or parsing fails.
pub fn load_credentials(path: &Path) -> anyhow::Result<Credentials> {
    if !path.exists() {
        return Ok(Credentials::default());
    }

    validate_private_permissions(path)?;

    let mut vars = BTreeMap::new();
    let iter = dotenvy::from_path_iter(path)
        .with_context(|| format!("failed to read credentials at {}", path.display()))?;

    for item in iter {
        let (key, value) = item.with_context(|| {
            format!(
                "failed to parse key-value entry in credentials file {}",
                path.display()
            )
        })?;
        vars.insert(key, value);
    }

    Ok(Credentials { vars })
}

#[cfg(unix)]
fn validate_private_permissions(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = fs::metadata(path)
        .with_context(|| format!("failed to inspect credentials file {}", path.display()))?;
    let mode = metadata.permissions().mode() & 0o777;

    if mode & 0o077 != 0 {
        return Err(anyhow::anyhow!(
            "credentials file {} must be 0600, found {:o}",
            path.display(),
            mode
        ));
    }

    Ok(())
}

#[cfg(not(unix))]
fn validate_private_permissions(_path: &Path) -> anyhow::Result<()> {
    Ok(())
}
