//! Scripted fakes for driving a watcher without network or SMTP.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::FixedOffset;

use downwatch::notifier::{
    DeliveryReport, MailTransport, Notifier, OutgoingMail, Sender, TransportError,
};
use downwatch::policy::RecipientPolicy;
use downwatch::prober::{ProbeError, Prober};
use downwatch::target::Target;
use downwatch::watcher::{WatchError, Watcher, WatcherDeps};

/// Prober that replays a fixed sequence of outcomes, then reports success.
#[derive(Default)]
pub struct ScriptedProber {
    outcomes: Mutex<VecDeque<Result<(), ProbeError>>>,
    calls: Mutex<u64>,
}

impl ScriptedProber {
    pub fn new(outcomes: impl IntoIterator<Item = Result<(), ProbeError>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            calls: Mutex::new(0),
        }
    }

    /// Prober that fails `n` times with a 503.
    pub fn failing(n: usize) -> Self {
        Self::new(std::iter::repeat_with(|| Err(ProbeError::Status { code: 503 })).take(n))
    }

    pub fn calls(&self) -> u64 {
        *self.calls.lock().expect("calls lock")
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn check(&self, _target: &Target) -> Result<(), ProbeError> {
        {
            let mut calls = self.calls.lock().expect("calls lock");
            *calls = calls.saturating_add(1);
        }
        self.outcomes
            .lock()
            .expect("outcomes lock")
            .pop_front()
            .unwrap_or(Ok(()))
    }
}

/// How the recording transport should behave on `send`.
#[derive(Debug, Clone, Default)]
pub enum TransportMode {
    /// Accept every recipient.
    #[default]
    AcceptAll,
    /// Refuse the listed recipients, accept the rest.
    Reject(Vec<String>),
    /// Fail the whole send.
    Fail,
}

/// Transport that records every message it is handed.
#[derive(Default)]
pub struct RecordingTransport {
    mode: TransportMode,
    sent: Mutex<Vec<OutgoingMail>>,
}

impl RecordingTransport {
    pub fn new(mode: TransportMode) -> Self {
        Self {
            mode,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<OutgoingMail> {
        self.sent.lock().expect("sent lock").clone()
    }
}

#[async_trait]
impl MailTransport for RecordingTransport {
    async fn send(&self, mail: &OutgoingMail) -> Result<DeliveryReport, TransportError> {
        self.sent.lock().expect("sent lock").push(mail.clone());
        match &self.mode {
            TransportMode::AcceptAll => Ok(DeliveryReport {
                accepted: mail.to.clone(),
                rejected: Vec::new(),
            }),
            TransportMode::Reject(refused) => {
                let (rejected, accepted): (Vec<String>, Vec<String>) =
                    mail.to.iter().cloned().partition(|to| refused.contains(to));
                Ok(DeliveryReport { accepted, rejected })
            }
            TransportMode::Fail => Err(TransportError::Delivery("relay unavailable".to_owned())),
        }
    }
}

/// Everything a test needs to inspect after driving a watcher.
pub struct Harness {
    pub watcher: Watcher,
    pub prober: Arc<ScriptedProber>,
    pub transport: Arc<RecordingTransport>,
    pub errors: Arc<Mutex<Vec<WatchError>>>,
}

impl Harness {
    pub fn errors(&self) -> Vec<WatchError> {
        self.errors.lock().expect("errors lock").clone()
    }
}

pub fn policy(email: &str, min: Option<u64>, max: u64, cooldown: u64) -> RecipientPolicy {
    RecipientPolicy::new(email, min, max, cooldown).expect("valid policy")
}

pub fn harness(
    prober: ScriptedProber,
    mode: TransportMode,
    recipients: Vec<RecipientPolicy>,
) -> Harness {
    let prober = Arc::new(prober);
    let transport = Arc::new(RecordingTransport::new(mode));
    let errors: Arc<Mutex<Vec<WatchError>>> = Arc::new(Mutex::new(Vec::new()));

    let sink_errors = Arc::clone(&errors);
    let sink = move |e: &WatchError| {
        sink_errors.lock().expect("errors lock").push(e.clone());
    };

    let offset = FixedOffset::east_opt(0).expect("utc offset");
    let notifier = Notifier::new(
        transport.clone(),
        Sender {
            name: "Downwatch Notifier".to_owned(),
            address: "alerts@example.com".to_owned(),
        },
        offset,
    );

    let deps = WatcherDeps {
        prober: prober.clone(),
        notifier: Arc::new(notifier),
        error_sink: Arc::new(sink),
    };

    let watcher = Watcher::new(
        "api",
        Target::new("api.example.com", 443, "/health", true),
        "Service unreachable",
        recipients,
        deps,
    );

    Harness {
        watcher,
        prober,
        transport,
        errors,
    }
}
