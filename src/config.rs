//! Configuration loading and validation.
//!
//! Loads `config.toml` with per-section defaults. Every recipient policy is
//! validated at load time so an invalid throttle (e.g. `cooldown = 0`) stops
//! the process before the first probe, never in the middle of an outage.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::FixedOffset;
use serde::Deserialize;

use crate::notifier::parse_utc_offset;
use crate::policy::{collect_policies, PolicyConfigErrors, RecipientPolicy};
use crate::target::Target;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Check timing.
    #[serde(default)]
    pub checks: ChecksConfig,

    /// Alert wording and timestamps.
    #[serde(default)]
    pub report: ReportConfig,

    /// Outgoing mail server. Required when any target has recipients.
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,

    /// Endpoints to watch.
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

/// Timing for periodic checks.
#[derive(Debug, Clone, Deserialize)]
pub struct ChecksConfig {
    /// Seconds between checks of each target.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Deadline for a single probe or SMTP command. `0` disables the probe
    /// deadline.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ChecksConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Alert wording and the fixed reporting timezone.
#[derive(Debug, Clone, Deserialize)]
pub struct ReportConfig {
    /// Display name on the `From` header.
    #[serde(default = "default_from_name")]
    pub from_name: String,

    /// Subject used when a target has no override.
    #[serde(default = "default_error_subject")]
    pub error_subject: String,

    /// Offset used for alert timestamps (`+HH:MM` / `-HH:MM`).
    #[serde(default = "default_utc_offset")]
    pub utc_offset: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            from_name: default_from_name(),
            error_subject: default_error_subject(),
            utc_offset: default_utc_offset(),
        }
    }
}

/// How the SMTP connection is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmtpSecurity {
    /// Implicit TLS (usually port 465).
    #[default]
    Tls,
    /// Plain connection upgraded with STARTTLS (usually port 587).
    Starttls,
    /// No encryption. Only for local relays.
    None,
}

/// Outgoing mail server settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    /// Relay hostname.
    pub host: String,

    /// Relay port.
    #[serde(default = "default_smtp_port")]
    pub port: u16,

    /// Connection security.
    #[serde(default)]
    pub security: SmtpSecurity,

    /// Login user, also used as the from-address.
    pub username: String,

    /// Credential key holding the SMTP password. Optional for
    /// `security = "none"`, where a missing password disables AUTH.
    #[serde(default = "default_password_env")]
    pub password_env: String,
}

/// One watched endpoint and who hears about it.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    /// Unique name, used in alerts and logs.
    pub name: String,

    /// Hostname or IP.
    pub host: String,

    /// TCP port.
    pub port: u16,

    /// Request path.
    #[serde(default = "default_path")]
    pub path: String,

    /// Probe over HTTPS.
    #[serde(default)]
    pub secure: bool,

    /// Subject override for this target's alerts.
    #[serde(default)]
    pub error_subject: Option<String>,

    /// Alert recipients and their throttling.
    #[serde(default)]
    pub recipients: Vec<RecipientConfig>,
}

/// Throttling settings for one recipient.
#[derive(Debug, Clone, Deserialize)]
pub struct RecipientConfig {
    /// Address to notify.
    pub email: String,

    /// Consecutive failures before this recipient is eligible.
    #[serde(default)]
    pub min_attempts: Option<u64>,

    /// Failures notified back-to-back once eligible.
    pub max_consecutive: u64,

    /// After the initial run, notify every `cooldown`-th failure. Must be > 0.
    pub cooldown: u64,
}

impl RecipientConfig {
    /// Validate into a [`RecipientPolicy`].
    ///
    /// # Errors
    ///
    /// Returns every problem found for an invalid address or zero cooldown.
    pub fn policy(&self) -> Result<RecipientPolicy, PolicyConfigErrors> {
        RecipientPolicy::new(
            self.email.clone(),
            self.min_attempts,
            self.max_consecutive,
            self.cooldown,
        )
    }
}

impl TargetConfig {
    /// The endpoint to probe.
    pub fn target(&self) -> Target {
        Target::new(self.host.clone(), self.port, self.path.clone(), self.secure)
    }

    /// Validated policies for every recipient.
    ///
    /// # Errors
    ///
    /// Returns every invalid recipient, not just the first.
    pub fn policies(&self) -> Result<Vec<RecipientPolicy>, PolicyConfigErrors> {
        collect_policies(self.recipients.iter().map(RecipientConfig::policy))
    }

    /// Subject line for this target's alerts.
    pub fn subject<'a>(&'a self, report: &'a ReportConfig) -> &'a str {
        self.error_subject
            .as_deref()
            .unwrap_or(report.error_subject.as_str())
    }
}

impl Config {
    /// Validate that configuration values are within sane bounds.
    ///
    /// Recipient problems are gathered across all targets and reported in a
    /// single error.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first structural problem, or every
    /// invalid recipient policy.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.checks.interval_secs >= 1, "interval_secs must be >= 1");
        anyhow::ensure!(!self.targets.is_empty(), "at least one target is required");
        self.reporting_offset()?;

        let mut names = HashSet::new();
        for target in &self.targets {
            anyhow::ensure!(!target.name.trim().is_empty(), "target name must not be empty");
            anyhow::ensure!(
                names.insert(target.name.as_str()),
                "duplicate target name {:?}",
                target.name
            );
            anyhow::ensure!(
                !target.host.trim().is_empty(),
                "target {}: host must not be empty",
                target.name
            );
            anyhow::ensure!(target.port != 0, "target {}: port must not be 0", target.name);
            target
                .target()
                .url()
                .with_context(|| format!("target {}: cannot build probe url", target.name))?;
        }

        let invalid: Vec<String> = self
            .targets
            .iter()
            .filter_map(|t| t.policies().err().map(|errs| (t, errs)))
            .flat_map(|(t, errs)| {
                errs.0
                    .into_iter()
                    .map(move |e| format!("target {}: {e}", t.name))
            })
            .collect();
        anyhow::ensure!(
            invalid.is_empty(),
            "invalid recipient policies: {}",
            invalid.join("; ")
        );

        let needs_mail = self.targets.iter().any(|t| !t.recipients.is_empty());
        match &self.smtp {
            Some(smtp) => {
                anyhow::ensure!(!smtp.host.trim().is_empty(), "smtp.host must not be empty");
                anyhow::ensure!(smtp.port != 0, "smtp.port must not be 0");
                anyhow::ensure!(
                    smtp.username.contains('@'),
                    "smtp.username must be the sending email address"
                );
            }
            None => anyhow::ensure!(
                !needs_mail,
                "[smtp] section is required when targets have recipients"
            ),
        }
        Ok(())
    }

    /// Parsed reporting timezone.
    ///
    /// # Errors
    ///
    /// Returns an error if `report.utc_offset` is malformed.
    pub fn reporting_offset(&self) -> anyhow::Result<FixedOffset> {
        parse_utc_offset(&self.report.utc_offset)
            .map_err(|e| anyhow::anyhow!("report.utc_offset: {e}"))
    }

    /// Probe deadline, if any.
    pub fn probe_timeout(&self) -> Option<std::time::Duration> {
        (self.checks.timeout_secs > 0)
            .then(|| std::time::Duration::from_secs(self.checks.timeout_secs))
    }
}

/// Resolved filesystem paths for runtime state.
#[derive(Debug, Clone)]
pub struct RuntimePaths {
    /// Root directory (`~/.downwatch/`).
    pub root: PathBuf,

    /// Default configuration file.
    pub config_toml: PathBuf,

    /// Credentials file holding the SMTP password.
    pub env_file: PathBuf,

    /// Directory for rotated JSON logs.
    pub logs_dir: PathBuf,
}

/// Load configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed, or fails validation.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config at {}", path.display()))?;
    let config: Config = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config at {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

/// Resolve the default config directory (`~/.downwatch/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".downwatch"))
}

/// Resolve runtime paths under `~/.downwatch/`.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn runtime_paths() -> anyhow::Result<RuntimePaths> {
    let root = config_dir()?;
    Ok(RuntimePaths {
        config_toml: root.join("config.toml"),
        env_file: root.join(".env"),
        logs_dir: root.join("logs"),
        root,
    })
}

// Default value functions for serde.

fn default_interval_secs() -> u64 {
    60
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_from_name() -> String {
    "Downwatch Notifier".to_owned()
}

fn default_error_subject() -> String {
    "Service unreachable".to_owned()
}

fn default_utc_offset() -> String {
    "+00:00".to_owned()
}

fn default_smtp_port() -> u16 {
    465
}

fn default_password_env() -> String {
    "DOWNWATCH_SMTP_PASSWORD".to_owned()
}

fn default_path() -> String {
    "/".to_owned()
}
