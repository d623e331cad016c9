// src/tasks/metrics.rs

//! Per-task counters for scheduled runs

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Default, Clone, Copy)]
struct TaskStats {
    runs: u64,
    processed: u64,
    errors: u64,
    last_duration: Option<Duration>,
}

#[derive(Debug, Default)]
pub struct TaskMetrics {
    stats: RwLock<HashMap<&'static str, TaskStats>>,
}

impl TaskMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_run(&self, task: &'static str, processed: u64, duration: Duration) {
        let mut map = self.stats.write();
        let entry = map.entry(task).or_default();
        entry.runs += 1;
        entry.processed += processed;
        entry.last_duration = Some(duration);
    }

    pub fn record_error(&self, task: &'static str) {
        self.stats.write().entry(task).or_default().errors += 1;
    }

    pub fn runs(&self, task: &str) -> u64 {
        self.stats.read().get(task).map(|s| s.runs).unwrap_or(0)
    }

    pub fn processed(&self, task: &str) -> u64 {
        self.stats.read().get(task).map(|s| s.processed).unwrap_or(0)
    }

    pub fn errors(&self, task: &str) -> u64 {
        self.stats.read().get(task).map(|s| s.errors).unwrap_or(0)
    }

    pub fn report(&self) {
        for (task, stats) in self.stats.read().iter() {
            info!(
                "Task '{}': runs={}, processed={}, errors={}, last={:?}",
                task, stats.runs, stats.processed, stats.errors, stats.last_duration
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = TaskMetrics::new();
        metrics.record_run("cleanup", 3, Duration::from_millis(5));
        metrics.record_run("cleanup", 2, Duration::from_millis(7));
        metrics.record_error("summary");

        assert_eq!(metrics.runs("cleanup"), 2);
        assert_eq!(metrics.processed("cleanup"), 5);
        assert_eq!(metrics.errors("summary"), 1);
        assert_eq!(metrics.runs("summary"), 0);
    }
}
