// src/config/mod.rs
// Process configuration loaded from .env / environment, plus the runtime
// settings snapshot shared by the engine, notifier and scheduled tasks.

use parking_lot::RwLock;
use std::str::FromStr;

use crate::error::{Error, Result};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct LogwardenConfig {
    // ── Database
    pub database_url: String,
    pub sqlite_max_connections: u32,

    // ── Encryption
    pub encryption_key: Option<String>,
    pub site_secret: Option<String>,

    // ── Runtime toggles
    pub logging_enabled: bool,
    pub notifications_enabled: bool,
    pub notify_emails: String,
    pub admin_email: String,
    pub site_name: String,
    pub detail_url: String,
    pub retention_days: i64,

    // ── Mail dispatch
    pub mail_transport: String,
    pub sendmail_path: String,
    pub mail_timeout_secs: u64,
    pub dispatch_mode: DispatchMode,

    // ── Logging
    pub log_level: String,
}

/// How notification dispatch relates to the write that triggered it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Awaited right after the store commit, bounded by the mail timeout.
    /// The write path waits for the transport.
    Inline,
    /// Spawned onto the runtime; the write path never waits. Default.
    Background,
}

impl FromStr for DispatchMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inline" => Ok(DispatchMode::Inline),
            "background" => Ok(DispatchMode::Background),
            other => Err(format!("unknown dispatch mode '{}'", other)),
        }
    }
}

/// Drop a trailing "# comment". Only a `#` that starts the value or follows
/// whitespace opens a comment, so URL fragments and similar survive.
fn strip_inline_comment(val: &str) -> &str {
    let mut prev_is_space = true;
    for (i, c) in val.char_indices() {
        if c == '#' && prev_is_space {
            return val[..i].trim();
        }
        prev_is_space = c.is_whitespace();
    }
    val.trim()
}

fn env_var_or<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    match std::env::var(key) {
        Ok(val) => {
            let clean_val = strip_inline_comment(&val);
            match clean_val.parse::<T>() {
                Ok(parsed) => parsed,
                Err(_) => {
                    eprintln!("Config: {} = '{}' (parse failed, using default)", key, val);
                    default
                }
            }
        }
        Err(_) => default,
    }
}

fn env_secret(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl LogwardenConfig {
    pub fn from_env() -> Self {
        if dotenvy::dotenv().is_err() {
            eprintln!("Warning: .env file not found. Using environment variables and defaults.");
        }

        Self {
            database_url: env_var_or("DATABASE_URL", "sqlite://./logwarden.db".to_string()),
            sqlite_max_connections: env_var_or("SQLITE_MAX_CONNECTIONS", 5),
            encryption_key: env_secret("LOGWARDEN_KEY"),
            site_secret: env_secret("LOGWARDEN_SITE_SECRET"),
            logging_enabled: env_var_or("LOGWARDEN_LOGGING_ENABLED", true),
            notifications_enabled: env_var_or("LOGWARDEN_NOTIFY_ENABLED", false),
            notify_emails: env_var_or("LOGWARDEN_NOTIFY_EMAILS", String::new()),
            admin_email: env_var_or("LOGWARDEN_ADMIN_EMAIL", String::new()),
            site_name: env_var_or("LOGWARDEN_SITE_NAME", "Logwarden".to_string()),
            detail_url: env_var_or("LOGWARDEN_DETAIL_URL", "http://localhost/errors".to_string()),
            retention_days: env_var_or("LOGWARDEN_RETENTION_DAYS", 30),
            mail_transport: env_var_or("LOGWARDEN_MAIL_TRANSPORT", "log".to_string()),
            sendmail_path: env_var_or("LOGWARDEN_SENDMAIL_PATH", "/usr/sbin/sendmail".to_string()),
            mail_timeout_secs: env_var_or("LOGWARDEN_MAIL_TIMEOUT_SECS", 10),
            dispatch_mode: env_var_or("LOGWARDEN_DISPATCH_MODE", DispatchMode::Background),
            log_level: env_var_or("LOGWARDEN_LOG_LEVEL", "info".to_string()),
        }
    }

    /// Reject settings the service cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.database_url.trim().is_empty() {
            return Err(Error::Config("DATABASE_URL is empty".into()));
        }

        match self.mail_transport.trim().to_ascii_lowercase().as_str() {
            "log" => {}
            "sendmail" => {
                if self.sendmail_path.trim().is_empty() {
                    return Err(Error::Config(
                        "LOGWARDEN_SENDMAIL_PATH is empty but the sendmail transport is selected".into(),
                    ));
                }
            }
            other => {
                return Err(Error::Config(format!(
                    "unknown mail transport '{}' (expected 'log' or 'sendmail')",
                    other
                )));
            }
        }

        Ok(())
    }

    /// The runtime toggles as one immutable snapshot.
    pub fn settings(&self) -> Settings {
        Settings {
            logging_enabled: self.logging_enabled,
            notifications_enabled: self.notifications_enabled,
            notify_emails: self.notify_emails.clone(),
            admin_email: self.admin_email.clone(),
            site_name: self.site_name.clone(),
            detail_url: self.detail_url.clone(),
            retention_days: self.retention_days,
        }
    }

    pub fn mail_timeout(&self) -> Duration {
        Duration::from_secs(self.mail_timeout_secs.max(1))
    }

    /// Get a human-readable summary of the configuration
    pub fn summary(&self) -> String {
        format!(
            "Logwarden Config:\n\
            - Database: {}\n\
            - Encryption: {}\n\
            - Logging: {}\n\
            - Notifications: {} (transport: {}, mode: {:?})\n\
            - Retention: {}",
            self.database_url,
            if self.encryption_key.is_some() || self.site_secret.is_some() { "ON" } else { "OFF (plaintext)" },
            if self.logging_enabled { "ON" } else { "OFF" },
            if self.notifications_enabled { "ON" } else { "OFF" },
            self.mail_transport,
            self.dispatch_mode,
            if self.retention_days > 0 {
                format!("{} days", self.retention_days)
            } else {
                "disabled".to_string()
            },
        )
    }
}

impl Default for LogwardenConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://./logwarden.db".to_string(),
            sqlite_max_connections: 5,
            encryption_key: None,
            site_secret: None,
            logging_enabled: true,
            notifications_enabled: false,
            notify_emails: String::new(),
            admin_email: String::new(),
            site_name: "Logwarden".to_string(),
            detail_url: "http://localhost/errors".to_string(),
            retention_days: 30,
            mail_transport: "log".to_string(),
            sendmail_path: "/usr/sbin/sendmail".to_string(),
            mail_timeout_secs: 10,
            dispatch_mode: DispatchMode::Background,
            log_level: "info".to_string(),
        }
    }
}

/// Runtime toggles read once per operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub logging_enabled: bool,
    pub notifications_enabled: bool,
    /// Comma-separated recipient list, validated at dispatch time.
    pub notify_emails: String,
    pub admin_email: String,
    pub site_name: String,
    pub detail_url: String,
    /// Zero or negative disables the retention purge.
    pub retention_days: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            logging_enabled: true,
            notifications_enabled: false,
            notify_emails: String::new(),
            admin_email: String::new(),
            site_name: "Logwarden".to_string(),
            detail_url: "http://localhost/errors".to_string(),
            retention_days: 30,
        }
    }
}

/// Shared handle to the current settings snapshot. Readers always get a whole
/// snapshot; `replace` swaps it in one step.
#[derive(Debug, Clone)]
pub struct SettingsHandle {
    inner: Arc<RwLock<Arc<Settings>>>,
}

impl SettingsHandle {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(settings))),
        }
    }

    pub fn snapshot(&self) -> Arc<Settings> {
        self.inner.read().clone()
    }

    pub fn replace(&self, settings: Settings) {
        *self.inner.write() = Arc::new(settings);
    }

    /// Copy the current snapshot, apply `f`, and swap the result in.
    pub fn update(&self, f: impl FnOnce(&mut Settings)) {
        let mut guard = self.inner.write();
        let mut next = (**guard).clone();
        f(&mut next);
        *guard = Arc::new(next);
    }
}

impl Default for SettingsHandle {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}
