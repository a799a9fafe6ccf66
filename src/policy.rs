//! Per-recipient notification throttling.
//!
//! Each recipient waits `min_attempts` consecutive failures before becoming
//! eligible, then hears about each of the next `max_consecutive` failures,
//! then only every `cooldown`-th failure after that. Decisions are pure
//! functions of the consecutive-failure count, so a prolonged outage produces
//! a bounded, predictable stream of alerts.

use std::fmt;
use std::num::NonZeroU64;

/// A recipient configuration that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyConfigError {
    /// `cooldown` is used as a modulus and must be positive.
    #[error("recipient {email}: cooldown must be a positive integer")]
    ZeroCooldown {
        /// Offending recipient.
        email: String,
    },
    /// The address is empty or has no `@`.
    #[error("recipient {email:?}: not a valid email address")]
    InvalidEmail {
        /// Offending address, as configured.
        email: String,
    },
}

/// Every invalid recipient found while validating a recipient list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyConfigErrors(pub Vec<PolicyConfigError>);

impl fmt::Display for PolicyConfigErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} invalid recipient(s)", self.0.len())?;
        for err in &self.0 {
            write!(f, "; {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for PolicyConfigErrors {}

/// Throttling policy for one recipient. Only constructible through
/// [`RecipientPolicy::new`], so `cooldown` is always non-zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientPolicy {
    email: String,
    min_attempts: u64,
    max_consecutive: u64,
    cooldown: NonZeroU64,
}

impl RecipientPolicy {
    /// Validate and build a policy. A missing `min_attempts` means 0.
    ///
    /// # Errors
    ///
    /// Returns every problem with the recipient:
    /// [`PolicyConfigError::InvalidEmail`] for an address without `@` and
    /// [`PolicyConfigError::ZeroCooldown`] when `cooldown` is 0.
    pub fn new(
        email: impl Into<String>,
        min_attempts: Option<u64>,
        max_consecutive: u64,
        cooldown: u64,
    ) -> Result<Self, PolicyConfigErrors> {
        let email = email.into();
        let trimmed = email.trim();

        let mut errors = Vec::new();
        if trimmed.is_empty() || !trimmed.contains('@') {
            errors.push(PolicyConfigError::InvalidEmail {
                email: email.clone(),
            });
        }
        let cooldown = NonZeroU64::new(cooldown);
        if cooldown.is_none() {
            errors.push(PolicyConfigError::ZeroCooldown {
                email: trimmed.to_owned(),
            });
        }

        match cooldown {
            Some(cooldown) if errors.is_empty() => Ok(Self {
                email: trimmed.to_owned(),
                min_attempts: min_attempts.unwrap_or(0),
                max_consecutive,
                cooldown,
            }),
            _ => Err(PolicyConfigErrors(errors)),
        }
    }

    /// Recipient address.
    pub fn email(&self) -> &str {
        &self.email
    }

    /// Consecutive failures required before any notification.
    pub fn min_attempts(&self) -> u64 {
        self.min_attempts
    }

    /// Failures notified back-to-back once eligible.
    pub fn max_consecutive(&self) -> u64 {
        self.max_consecutive
    }

    /// Re-notification interval, in failures, after the initial allotment.
    pub fn cooldown(&self) -> NonZeroU64 {
        self.cooldown
    }

    /// Whether this recipient hears about the `failures`-th consecutive failure.
    pub fn should_notify(&self, failures: u64) -> bool {
        let Some(after_min) = failures.checked_sub(self.min_attempts) else {
            return false;
        };
        if after_min < self.max_consecutive {
            return true;
        }
        after_min > 0 && after_min.checked_rem(self.cooldown.get()) == Some(0)
    }
}

/// Gather per-recipient validation results, keeping every failure rather
/// than stopping at the first.
///
/// # Errors
///
/// Returns all invalid recipients when at least one is invalid.
pub fn collect_policies<I>(results: I) -> Result<Vec<RecipientPolicy>, PolicyConfigErrors>
where
    I: IntoIterator<Item = Result<RecipientPolicy, PolicyConfigErrors>>,
{
    let mut policies = Vec::new();
    let mut errors = Vec::new();
    for result in results {
        match result {
            Ok(policy) => policies.push(policy),
            Err(PolicyConfigErrors(found)) => errors.extend(found),
        }
    }
    if errors.is_empty() {
        Ok(policies)
    } else {
        Err(PolicyConfigErrors(errors))
    }
}

/// Addresses to notify for the `failures`-th consecutive failure, in
/// configuration order with duplicates removed.
pub fn select_recipients(failures: u64, policies: &[RecipientPolicy]) -> Vec<String> {
    let mut selected: Vec<String> = Vec::new();
    for policy in policies.iter().filter(|p| p.should_notify(failures)) {
        if !selected.iter().any(|e| e.eq_ignore_ascii_case(policy.email())) {
            selected.push(policy.email().to_owned());
        }
    }
    selected
}
