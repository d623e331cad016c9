// src/tasks/config.rs
// Schedule for the retention purge and weekly summary

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct TaskConfig {
    // Retention purge
    pub cleanup_enabled: bool,
    pub cleanup_interval: Duration,

    // Weekly summary
    pub summary_enabled: bool,
    pub summary_interval: Duration,

    // Metrics report
    pub metrics_interval: Duration,
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default: u64) -> Duration {
    let secs = std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default);
    // tokio intervals panic on zero
    Duration::from_secs(secs.max(1))
}

impl TaskConfig {
    pub fn from_env() -> Self {
        Self {
            // Purge once a day
            cleanup_enabled: env_flag("TASK_CLEANUP_ENABLED", true),
            cleanup_interval: env_secs("TASK_CLEANUP_INTERVAL", 86_400),

            // Summary once a week
            summary_enabled: env_flag("TASK_SUMMARY_ENABLED", true),
            summary_interval: env_secs("TASK_SUMMARY_INTERVAL", 604_800),

            metrics_interval: env_secs("TASK_METRICS_INTERVAL", 3_600),
        }
    }

    /// Get a human-readable summary of the configuration
    pub fn summary(&self) -> String {
        format!(
            "Tasks Config:\n\
            - Retention purge: {} (every {} hours)\n\
            - Weekly summary: {} (every {} days)",
            if self.cleanup_enabled { "ON" } else { "OFF" },
            self.cleanup_interval.as_secs() / 3600,
            if self.summary_enabled { "ON" } else { "OFF" },
            self.summary_interval.as_secs() / 86_400,
        )
    }
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            cleanup_enabled: true,
            cleanup_interval: Duration::from_secs(86_400),
            summary_enabled: true,
            summary_interval: Duration::from_secs(604_800),
            metrics_interval: Duration::from_secs(3_600),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule() {
        let config = TaskConfig::default();
        assert_eq!(config.cleanup_interval.as_secs(), 86_400);
        assert_eq!(config.summary_interval.as_secs(), 604_800);
        assert!(config.summary().contains("every 7 days"));
    }
}
