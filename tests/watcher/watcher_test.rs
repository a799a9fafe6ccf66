//! Watcher behaviour: failure counting, throttled notification, error routing.

use downwatch::notifier::{NotifyError, TransportError};
use downwatch::prober::ProbeError;
use downwatch::watcher::CheckOutcome;

use super::support::{harness, policy, ScriptedProber, TransportMode};

/// Failure counts at which the watcher selected at least one recipient.
async fn notified_counts(h: &mut super::support::Harness, checks: u64) -> Vec<u64> {
    let mut counts = Vec::new();
    for _ in 0..checks {
        if let CheckOutcome::Unreachable {
            consecutive_failures,
            notified,
            ..
        } = h.watcher.check().await
        {
            if !notified.is_empty() {
                counts.push(consecutive_failures);
            }
        }
    }
    counts
}

#[tokio::test]
async fn failures_accumulate_and_success_resets() {
    let prober = ScriptedProber::new(vec![
        Err(ProbeError::Status { code: 503 }),
        Err(ProbeError::ConnectionRefused("tcp connect error".to_owned())),
        Ok(()),
        Err(ProbeError::Status { code: 500 }),
    ]);
    let mut h = harness(prober, TransportMode::AcceptAll, Vec::new());

    h.watcher.check().await;
    assert_eq!(h.watcher.unreachable_count(), 1);
    h.watcher.check().await;
    assert_eq!(h.watcher.unreachable_count(), 2);

    let outcome = h.watcher.check().await;
    assert_eq!(outcome, CheckOutcome::Reachable { recovered_after: 2 });
    assert_eq!(h.watcher.unreachable_count(), 0);

    h.watcher.check().await;
    assert_eq!(h.watcher.unreachable_count(), 1);
    assert_eq!(h.prober.calls(), 4);
}

#[tokio::test]
async fn reachable_target_sends_nothing() {
    let mut h = harness(
        ScriptedProber::new(Vec::new()),
        TransportMode::AcceptAll,
        vec![policy("ops@example.com", None, 5, 1)],
    );

    for _ in 0..3 {
        let outcome = h.watcher.check().await;
        assert_eq!(outcome, CheckOutcome::Reachable { recovered_after: 0 });
    }
    assert!(h.transport.sent().is_empty());
    assert!(h.errors().is_empty());
}

#[tokio::test]
async fn long_outage_is_throttled_by_allotment_then_cooldown() {
    let mut h = harness(
        ScriptedProber::failing(15),
        TransportMode::AcceptAll,
        vec![policy("ops@example.com", None, 3, 5)],
    );

    let counts = notified_counts(&mut h, 15).await;
    assert_eq!(counts, vec![1, 2, 5, 10, 15]);
    assert_eq!(h.transport.sent().len(), 5);
    assert_eq!(h.watcher.unreachable_count(), 15);
}

#[tokio::test]
async fn min_attempts_delays_first_alert() {
    let mut h = harness(
        ScriptedProber::failing(11),
        TransportMode::AcceptAll,
        vec![policy("oncall@example.com", Some(2), 1, 3)],
    );

    let counts = notified_counts(&mut h, 11).await;
    assert_eq!(counts, vec![2, 5, 8, 11]);
}

#[tokio::test]
async fn recovery_restarts_the_allotment() {
    let prober = ScriptedProber::new(vec![
        Err(ProbeError::Status { code: 503 }),
        Err(ProbeError::Status { code: 503 }),
        Err(ProbeError::Status { code: 503 }),
        Ok(()),
        Err(ProbeError::Status { code: 503 }),
    ]);
    let mut h = harness(
        prober,
        TransportMode::AcceptAll,
        vec![policy("ops@example.com", None, 2, 100)],
    );

    for _ in 0..5 {
        h.watcher.check().await;
    }

    let counts: Vec<String> = h
        .transport
        .sent()
        .iter()
        .map(|m| {
            m.text
                .lines()
                .find(|l| l.starts_with("Consecutive failures:"))
                .unwrap_or_default()
                .to_owned()
        })
        .collect();
    assert_eq!(
        counts,
        vec!["Consecutive failures: 1", "Consecutive failures: 1"]
    );
}

#[tokio::test]
async fn due_recipients_share_one_message() {
    let mut h = harness(
        ScriptedProber::failing(1),
        TransportMode::AcceptAll,
        vec![
            policy("ops@example.com", None, 3, 5),
            policy("dev@example.com", None, 2, 5),
            policy("manager@example.com", Some(5), 1, 1),
        ],
    );

    let outcome = h.watcher.check().await;
    match outcome {
        CheckOutcome::Unreachable {
            notified,
            delivered,
            ..
        } => {
            assert_eq!(notified, vec!["ops@example.com", "dev@example.com"]);
            assert!(delivered);
        }
        other => panic!("expected unreachable outcome, got {other:?}"),
    }

    let sent = h.transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, vec!["ops@example.com", "dev@example.com"]);
}

#[tokio::test]
async fn alert_content_describes_the_failure() {
    let mut h = harness(
        ScriptedProber::failing(1),
        TransportMode::AcceptAll,
        vec![policy("ops@example.com", None, 2, 5)],
    );
    h.watcher.check().await;

    let sent = h.transport.sent();
    let mail = &sent[0];
    assert_eq!(mail.subject, "Service unreachable");
    assert_eq!(
        mail.from.header_value(),
        "Downwatch Notifier <alerts@example.com>"
    );
    assert!(mail
        .text
        .starts_with("Couldn't reach api at api.example.com:443/health. Got status code 503"));
    assert!(mail.text.contains("Consecutive failures: 1"));
    assert!(mail.text.contains("+00:00"));
    assert!(mail.html.contains("<b>Couldn't reach api at api.example.com:443/health</b>"));
}

#[tokio::test]
async fn partial_delivery_is_reported_to_the_sink() {
    let mut h = harness(
        ScriptedProber::failing(2),
        TransportMode::Reject(vec!["dev@example.com".to_owned()]),
        vec![
            policy("ops@example.com", None, 3, 5),
            policy("dev@example.com", None, 3, 5),
        ],
    );

    let outcome = h.watcher.check().await;
    assert!(matches!(
        outcome,
        CheckOutcome::Unreachable {
            consecutive_failures: 1,
            delivered: false,
            ..
        }
    ));

    let errors = h.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].target, "api");
    assert_eq!(errors[0].consecutive_failures, 1);
    assert_eq!(
        errors[0].source,
        NotifyError::PartialDelivery {
            rejected: vec!["dev@example.com".to_owned()]
        }
    );
    assert_eq!(
        errors[0].source.to_string(),
        "Failed to send to: dev@example.com"
    );

    // The watcher keeps going after a delivery problem.
    h.watcher.check().await;
    assert_eq!(h.watcher.unreachable_count(), 2);
    assert_eq!(h.errors().len(), 2);
}

#[tokio::test]
async fn transport_failure_is_reported_not_raised() {
    let mut h = harness(
        ScriptedProber::failing(1),
        TransportMode::Fail,
        vec![policy("ops@example.com", None, 3, 5)],
    );

    let outcome = h.watcher.check().await;
    assert!(!outcome.is_reachable());

    let errors = h.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(
        errors[0].source,
        NotifyError::Transport(TransportError::Delivery("relay unavailable".to_owned()))
    );
}

#[tokio::test]
async fn no_due_recipients_never_touches_transport() {
    let mut h = harness(
        ScriptedProber::failing(4),
        TransportMode::Fail,
        vec![policy("ops@example.com", Some(10), 3, 5)],
    );

    for _ in 0..4 {
        h.watcher.check().await;
    }
    assert!(h.transport.sent().is_empty());
    assert!(h.errors().is_empty());
}

#[tokio::test]
async fn report_summarises_outcome() {
    let mut h = harness(
        ScriptedProber::failing(1),
        TransportMode::AcceptAll,
        vec![policy("ops@example.com", None, 2, 5)],
    );

    let outcome = h.watcher.check().await;
    let report = h.watcher.report(&outcome);
    assert_eq!(report.target, "api");
    assert_eq!(report.endpoint, "https://api.example.com/health");
    assert!(!report.reachable);
    assert_eq!(report.consecutive_failures, 1);
    assert_eq!(report.error_kind, Some("status"));
    assert_eq!(report.notified, vec!["ops@example.com"]);

    let json = serde_json::to_value(&report).expect("report serializes");
    assert_eq!(json["error"], "Got status code 503");
}
