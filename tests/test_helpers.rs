// tests/test_helpers.rs
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use logwarden::{
    AppState, ErrorStore, Result,
    config::{DispatchMode, LogwardenConfig},
    notify::{MailMessage, MailTransport},
    store::connect,
};

/// Keeps every mail instead of sending it.
#[derive(Default)]
pub struct RecordingTransport {
    pub sent: Mutex<Vec<MailMessage>>,
}

impl RecordingTransport {
    pub fn count(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl MailTransport for RecordingTransport {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, message: &MailMessage) -> Result<()> {
        self.sent.lock().push(message.clone());
        Ok(())
    }
}

/// Takes `delay` for every send, then records it.
pub struct SlowTransport {
    pub delay: Duration,
    pub inner: RecordingTransport,
}

impl SlowTransport {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            inner: RecordingTransport::default(),
        }
    }
}

#[async_trait]
impl MailTransport for SlowTransport {
    fn name(&self) -> &str {
        "slow"
    }

    async fn send(&self, message: &MailMessage) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.send(message).await
    }
}

/// Inline dispatch so assertions can count mails right after `record`.
pub fn test_config() -> LogwardenConfig {
    LogwardenConfig {
        database_url: "sqlite::memory:".to_string(),
        encryption_key: Some("integration-secret".to_string()),
        notifications_enabled: true,
        notify_emails: "ops@example.com, not-an-address, dev@example.com".to_string(),
        admin_email: "admin@example.com".to_string(),
        site_name: "Test Shop".to_string(),
        dispatch_mode: DispatchMode::Inline,
        ..LogwardenConfig::default()
    }
}

/// In-memory state wired with a recording transport.
pub async fn create_test_app_state(config: LogwardenConfig) -> (Arc<AppState>, Arc<RecordingTransport>) {
    let pool = connect(&config.database_url, 1)
        .await
        .expect("create in-memory sqlite");
    let transport = Arc::new(RecordingTransport::default());
    let state = AppState::assemble(config, ErrorStore::new(pool), transport.clone());
    (Arc::new(state), transport)
}
