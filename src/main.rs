//! Downwatch CLI entry point.
//!
//! Provides `start`, `check`, and `validate` subcommands for running the
//! watcher daemon, probing every target once, or checking a config file.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use downwatch::config::{load_config, runtime_paths, Config};
use downwatch::credentials::load_credentials;
use downwatch::notifier::smtp::SmtpMailer;
use downwatch::notifier::{LogTransport, MailTransport, Notifier, Sender};
use downwatch::prober::HttpProber;
use downwatch::watcher::{build_watchers, CheckReport, LogErrorSink, WatcherDeps};

/// Downwatch: emails throttled alerts when an HTTP(S) endpoint is unreachable.
#[derive(Parser)]
#[command(name = "downwatch", version, about)]
struct Cli {
    /// Path to config.toml (default: ~/.downwatch/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Watch every target until interrupted.
    Start,
    /// Probe every target once, notify as configured, and exit.
    Check {
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
        /// Log alerts instead of sending them.
        #[arg(long)]
        dry_run: bool,
    },
    /// Load and validate the configuration, then exit.
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let paths = runtime_paths()?;
    let config_path = cli.config.unwrap_or_else(|| paths.config_toml.clone());

    match cli.command {
        Command::Start => handle_start(&config_path, &paths.logs_dir, &paths.env_file).await,
        Command::Check { json, dry_run } => {
            handle_check(&config_path, &paths.env_file, json, dry_run).await
        }
        Command::Validate => handle_validate(&config_path),
    }
}

/// Run the watcher daemon until Ctrl-C.
async fn handle_start(config_path: &Path, logs_dir: &Path, env_file: &Path) -> anyhow::Result<()> {
    let _logging_guard = downwatch::logging::init_production(logs_dir)?;

    let config = load_config(config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    let deps = build_deps(&config, env_file, false)?;
    let watchers = build_watchers(&config, &deps)?;

    info!(
        config = %config_path.display(),
        targets = watchers.len(),
        "downwatch started"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown requested"),
            Err(e) => warn!(error = %e, "failed to listen for ctrl-c, shutting down"),
        }
        if shutdown_tx.send(true).is_err() {
            debug!("watchers already stopped");
        }
    });

    let interval = Duration::from_secs(config.checks.interval_secs);
    downwatch::scheduler::run_watchers(watchers, interval, shutdown_rx).await;

    info!("downwatch stopped");
    Ok(())
}

/// Probe every target once, concurrently.
async fn handle_check(
    config_path: &Path,
    env_file: &Path,
    json: bool,
    dry_run: bool,
) -> anyhow::Result<()> {
    downwatch::logging::init_cli()?;

    let config = load_config(config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    let deps = build_deps(&config, env_file, dry_run)?;
    let watchers = build_watchers(&config, &deps)?;

    let mut tasks = JoinSet::new();
    for (_, mut watcher) in watchers {
        tasks.spawn(async move {
            let outcome = watcher.check().await;
            watcher.report(&outcome)
        });
    }

    let mut reports: Vec<CheckReport> = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        reports.push(joined.context("check task panicked")?);
    }
    reports.sort_by(|a, b| a.target.cmp(&b.target));

    if json {
        let out = serde_json::to_string_pretty(&reports).context("failed to serialize report")?;
        println!("{out}");
    } else {
        for report in &reports {
            let status = if report.reachable { "up" } else { "DOWN" };
            match &report.error {
                Some(error) => println!("{status:<5} {} {} ({error})", report.target, report.endpoint),
                None => println!("{status:<5} {} {}", report.target, report.endpoint),
            }
            if !report.notified.is_empty() {
                println!("      notified: {}", report.notified.join(", "));
            }
        }
    }

    Ok(())
}

/// Validate the configuration and print a summary.
fn handle_validate(config_path: &Path) -> anyhow::Result<()> {
    downwatch::logging::init_cli()?;

    let config = load_config(config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    println!("{}: ok", config_path.display());
    for target in &config.targets {
        let endpoint = target
            .target()
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|_| target.target().to_string());
        println!(
            "  {} -> {} ({} recipient(s))",
            target.name,
            endpoint,
            target.recipients.len()
        );
    }
    Ok(())
}

/// Wire the prober, mail transport, and error sink for `config`.
fn build_deps(config: &Config, env_file: &Path, dry_run: bool) -> anyhow::Result<WatcherDeps> {
    let timeout = config.probe_timeout();
    let prober = HttpProber::new(timeout).context("failed to build HTTP client")?;

    let (transport, from_address): (Arc<dyn MailTransport>, String) =
        match (&config.smtp, dry_run) {
            (Some(smtp), false) => {
                let credentials = load_credentials(env_file)?;
                let password = credentials.smtp_password(smtp)?;
                let mailer = SmtpMailer::new(smtp, password, timeout)
                    .context("failed to configure SMTP transport")?;
                (Arc::new(mailer), smtp.username.clone())
            }
            (Some(smtp), true) => (Arc::new(LogTransport), smtp.username.clone()),
            (None, _) => (Arc::new(LogTransport), "downwatch@localhost".to_owned()),
        };

    let notifier = Notifier::new(
        transport,
        Sender {
            name: config.report.from_name.clone(),
            address: from_address,
        },
        config.reporting_offset()?,
    );

    Ok(WatcherDeps {
        prober: Arc::new(prober),
        notifier: Arc::new(notifier),
        error_sink: Arc::new(LogErrorSink),
    })
}
