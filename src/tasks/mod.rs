// src/tasks/mod.rs

//! Scheduled maintenance: the daily retention purge and the weekly summary.
//! Each tick runs its operation once from scratch; failures are logged and
//! left for the next tick.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::config::SettingsHandle;
use crate::error::Result;
use crate::notify::{NotificationService, SummaryOutcome};
use crate::state::AppState;
use crate::store::ErrorStore;

pub mod config;
pub mod metrics;

use config::TaskConfig;
use metrics::TaskMetrics;

/// Cutoff for a retention window ending at `now`. `None` when retention is
/// disabled or reaches back past the representable range.
pub fn retention_threshold(retention_days: i64, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if retention_days <= 0 {
        return None;
    }
    ChronoDuration::try_days(retention_days).and_then(|window| now.checked_sub_signed(window))
}

/// Delete rows not seen within `retention_days`. Zero or negative retention
/// removes nothing, as does a window too large to have any row older than it.
pub async fn purge_retention(store: &ErrorStore, retention_days: i64) -> Result<u64> {
    if retention_days <= 0 {
        debug!("Retention disabled; skipping purge");
        return Ok(0);
    }

    let Some(threshold) = retention_threshold(retention_days, Utc::now()) else {
        warn!("Retention of {} days is out of range; nothing to purge", retention_days);
        return Ok(0);
    };

    let removed = store.purge_older_than(threshold).await?;
    if removed > 0 {
        info!("Purged {} error events older than {} days", removed, retention_days);
    }
    Ok(removed)
}

/// Purge with the retention from the current settings snapshot.
pub async fn run_cleanup(store: &ErrorStore, settings: &SettingsHandle) -> Result<u64> {
    purge_retention(store, settings.snapshot().retention_days).await
}

pub async fn run_weekly_summary(notifier: &NotificationService) -> Result<SummaryOutcome> {
    notifier.send_weekly_summary().await
}

/// Owns the scheduled task handles
pub struct TaskManager {
    app_state: Arc<AppState>,
    config: TaskConfig,
    metrics: Arc<TaskMetrics>,
    handles: Vec<JoinHandle<()>>,
}

impl TaskManager {
    pub fn new(app_state: Arc<AppState>) -> Self {
        Self::with_config(app_state, TaskConfig::from_env())
    }

    pub fn with_config(app_state: Arc<AppState>, config: TaskConfig) -> Self {
        Self {
            app_state,
            config,
            metrics: Arc::new(TaskMetrics::new()),
            handles: Vec::new(),
        }
    }

    pub fn metrics(&self) -> Arc<TaskMetrics> {
        self.metrics.clone()
    }

    pub fn running(&self) -> usize {
        self.handles.len()
    }

    /// Starts all enabled tasks
    pub fn start(&mut self) {
        info!("Starting task manager");
        debug!("{}", self.config.summary());

        if self.config.cleanup_enabled {
            let handle = self.spawn_cleanup();
            self.handles.push(handle);
        }

        if self.config.summary_enabled {
            let handle = self.spawn_weekly_summary();
            self.handles.push(handle);
        }

        let handle = self.spawn_metrics_reporter();
        self.handles.push(handle);

        info!("Started {} scheduled tasks", self.handles.len());
    }

    fn spawn_cleanup(&self) -> JoinHandle<()> {
        let store = self.app_state.store.clone();
        let settings = self.app_state.settings.clone();
        let interval = self.config.cleanup_interval;
        let metrics = self.metrics.clone();

        tokio::spawn(async move {
            info!("Retention purge scheduled (interval: {:?})", interval);

            let mut interval_timer = time::interval(interval);
            interval_timer.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

            loop {
                interval_timer.tick().await;

                let start = Instant::now();
                match run_cleanup(&store, &settings).await {
                    Ok(removed) => metrics.record_run("cleanup", removed, start.elapsed()),
                    Err(e) => {
                        error!("Retention purge failed: {}", e);
                        metrics.record_error("cleanup");
                    }
                }
            }
        })
    }

    fn spawn_weekly_summary(&self) -> JoinHandle<()> {
        let notifier = self.app_state.notifier.clone();
        let interval = self.config.summary_interval;
        let metrics = self.metrics.clone();

        tokio::spawn(async move {
            info!("Weekly summary scheduled (interval: {:?})", interval);

            let mut interval_timer = time::interval(interval);
            interval_timer.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
            // Skip the immediate first tick
            interval_timer.tick().await;

            loop {
                interval_timer.tick().await;

                let start = Instant::now();
                match run_weekly_summary(&notifier).await {
                    Ok(SummaryOutcome::Sent) => metrics.record_run("summary", 1, start.elapsed()),
                    Ok(outcome) => {
                        debug!("Weekly summary not sent: {:?}", outcome);
                        metrics.record_run("summary", 0, start.elapsed());
                    }
                    Err(e) => {
                        error!("Weekly summary failed: {}", e);
                        metrics.record_error("summary");
                    }
                }
            }
        })
    }

    fn spawn_metrics_reporter(&self) -> JoinHandle<()> {
        let metrics = self.metrics.clone();
        let interval = self.config.metrics_interval;

        tokio::spawn(async move {
            let mut interval_timer = time::interval(interval);
            interval_timer.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

            loop {
                interval_timer.tick().await;
                metrics.report();
            }
        })
    }

    /// Stops all tasks
    pub async fn shutdown(self) {
        info!("Shutting down {} scheduled tasks", self.handles.len());

        for handle in self.handles {
            handle.abort();
        }

        self.metrics.report();
    }
}
