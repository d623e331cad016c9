// src/main.rs
// Logwarden - error aggregation, deduplication and alerting

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::BufRead;
use std::sync::Arc;
use tracing::{Level, info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;

use logwarden::capture::{CaptureLayer, CaptureQueue, capture_channel, install_panic_hook};
use logwarden::config::LogwardenConfig;
use logwarden::store::BulkOutcome;
use logwarden::tasks::{TaskManager, purge_retention, run_cleanup, run_weekly_summary};
use logwarden::{AppState, ErrorEvent, Payload, RawEvent, Severity};

#[derive(Parser)]
#[command(name = "logwarden")]
#[command(about = "Error aggregation with deduplication, encryption at rest and alerting")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record one error occurrence
    Record {
        /// Message text; a JSON object or array is stored as structured data
        message: String,

        #[arg(short, long, default_value = "error")]
        severity: String,

        #[arg(short, long)]
        file: Option<String>,

        #[arg(short, long)]
        line: Option<u32>,

        /// Precomputed fingerprint (64 hex chars)
        #[arg(long)]
        fingerprint: Option<String>,

        /// Do not raise the new-error signal
        #[arg(long)]
        no_notify: bool,
    },

    /// Record events read as JSON lines from stdin
    Ingest,

    /// List stored errors, most recently seen first
    List {
        /// Include resolved errors
        #[arg(short, long)]
        all: bool,

        #[arg(long)]
        json: bool,
    },

    /// Show one error with its decrypted message
    Show {
        id: i64,

        #[arg(long)]
        json: bool,
    },

    /// Mark errors resolved
    Resolve { ids: Vec<i64> },

    /// Mark errors unresolved
    Reopen { ids: Vec<i64> },

    /// Delete errors
    Delete { ids: Vec<i64> },

    /// Remove errors not seen within the retention window
    Purge {
        /// Override the configured retention in days
        #[arg(long)]
        days: Option<i64>,
    },

    /// Send the weekly summary now
    WeeklySummary,

    /// Run scheduled purge and summary until interrupted
    Daemon,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = LogwardenConfig::from_env();

    let level = config.log_level.parse::<Level>().unwrap_or(Level::INFO);
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(LevelFilter::from_level(level));

    // Only the long-running process captures its own warnings and errors
    let capture_queue = if matches!(cli.command, Commands::Daemon) {
        let (handle, queue) = capture_channel();
        install_panic_hook(handle.clone());
        tracing_subscriber::registry()
            .with(fmt_layer)
            .with(CaptureLayer::new(handle))
            .try_init()?;
        Some(queue)
    } else {
        tracing_subscriber::registry().with(fmt_layer).try_init()?;
        None
    };

    let state = AppState::from_config(config)
        .await
        .context("failed to open error store")?;

    match cli.command {
        Commands::Record {
            message,
            severity,
            file,
            line,
            fingerprint,
            no_notify,
        } => {
            let mut raw = RawEvent::new(Payload::from_plaintext(&message), severity.parse::<Severity>()?);
            raw.file = file;
            raw.line = line;
            raw.fingerprint = fingerprint;

            match state.engine.record(raw, !no_notify).await? {
                Some(outcome) => println!(
                    "#{} {} (occurrences: {})",
                    outcome.id,
                    if outcome.is_new { "new" } else { "recurring" },
                    outcome.occurrence_count
                ),
                None => println!("logging is disabled; nothing recorded"),
            }
            state.notifier.flush().await;
        }

        Commands::Ingest => {
            let stdin = std::io::stdin();
            let (mut recorded, mut skipped) = (0u64, 0u64);

            for (n, line) in stdin.lock().lines().enumerate() {
                let line = line.context("failed to read stdin")?;
                if line.trim().is_empty() {
                    continue;
                }
                let raw: RawEvent = match serde_json::from_str(&line) {
                    Ok(raw) => raw,
                    Err(e) => {
                        warn!("Skipping line {}: {}", n + 1, e);
                        skipped += 1;
                        continue;
                    }
                };
                if state.engine.record(raw, true).await?.is_some() {
                    recorded += 1;
                }
            }

            state.notifier.flush().await;
            println!("recorded {} events, skipped {}", recorded, skipped);
        }

        Commands::List { all, json } => {
            let events = state.store.list(all).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&events)?);
            } else if events.is_empty() {
                println!("no errors");
            } else {
                for event in &events {
                    println!("{}", list_line(event));
                }
            }
        }

        Commands::Show { id, json } => {
            let event = state.store.require(id).await?;
            let payload = state.engine.decrypt_event(&event);

            if json {
                let view = serde_json::json!({ "event": event, "message": payload });
                println!("{}", serde_json::to_string_pretty(&view)?);
            } else {
                println!("{}", list_line(&event));
                println!("fingerprint: {}", event.fingerprint);
                println!("first seen:  {}", event.first_seen_at.to_rfc3339());
                println!("last seen:   {}", event.last_seen_at.to_rfc3339());
                if let Some(uri) = &event.context.request_uri {
                    println!(
                        "request:     {} {}",
                        event.context.request_method.as_deref().unwrap_or("-"),
                        uri
                    );
                }
                if let Some(actor) = event.context.actor_id {
                    println!("actor:       {}", actor);
                }
                if let Some(ip) = &event.context.client_ip {
                    println!("client ip:   {}", ip);
                }
                if let Some(agent) = &event.context.user_agent {
                    println!("user agent:  {}", agent);
                }
                println!();
                match payload {
                    Payload::Text(text) => println!("{}", text),
                    Payload::Structured(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                }
            }
        }

        Commands::Resolve { ids } => {
            report_bulk("resolved", state.store.bulk_set_resolved(&ids, true).await?);
        }

        Commands::Reopen { ids } => {
            report_bulk("reopened", state.store.bulk_set_resolved(&ids, false).await?);
        }

        Commands::Delete { ids } => {
            report_bulk("deleted", state.store.bulk_delete(&ids).await?);
        }

        Commands::Purge { days } => {
            let removed = match days {
                Some(days) => purge_retention(&state.store, days).await?,
                None => run_cleanup(&state.store, &state.settings).await?,
            };
            println!("purged {} errors", removed);
        }

        Commands::WeeklySummary => {
            let outcome = run_weekly_summary(&state.notifier).await?;
            state.notifier.flush().await;
            println!("weekly summary: {:?}", outcome);
        }

        Commands::Daemon => {
            let queue = capture_queue.context("capture queue is set up for the daemon")?;
            run_daemon(state, queue).await?
        }
    }

    Ok(())
}

async fn run_daemon(state: AppState, capture_queue: CaptureQueue) -> Result<()> {
    info!("{}", state.config.summary());

    let state = Arc::new(state);
    let worker = capture_queue.spawn_worker(state.engine.clone());

    let mut tasks = TaskManager::new(state.clone());
    tasks.start();

    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    tasks.shutdown().await;
    worker.abort();
    let delivered = state.notifier.flush().await;
    info!("Flushed {} pending notifications", delivered);
    Ok(())
}

fn list_line(event: &ErrorEvent) -> String {
    let location = match (&event.source_file, event.source_line) {
        (Some(file), Some(line)) => format!("{}:{}", file, line),
        (Some(file), None) => file.clone(),
        _ => "-".to_string(),
    };
    format!(
        "#{:<6} {:<16} x{:<6} {}  {}{}",
        event.id,
        event.severity.as_str().to_uppercase(),
        event.occurrence_count,
        event.last_seen_at.format("%Y-%m-%d %H:%M:%S"),
        location,
        if event.resolved { "  [resolved]" } else { "" }
    )
}

fn report_bulk(action: &str, outcome: BulkOutcome) {
    match outcome {
        BulkOutcome::NothingToDo => println!("no valid ids given; nothing {}", action),
        BulkOutcome::Affected(n) => println!("{} {} errors", action, n),
    }
}
