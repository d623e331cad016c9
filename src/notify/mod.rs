// src/notify/mod.rs
//! Notification policy: immediate alerts for new errors of an immediate
//! severity, and the weekly summary mail.
//!
//! Dispatch never fails the caller. Transport errors and timeouts are logged
//! and dropped; nothing is retried.

pub mod mailer;
pub mod recipients;
pub mod template;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::sync::Arc;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::bus::{BusError, EventSubscriber, LogEvent};
use crate::config::{DispatchMode, SettingsHandle};
use crate::error::Result;
use crate::store::ErrorStore;
use crate::types::Severity;

pub use mailer::{LogTransport, MailMessage, MailTransport, SendmailTransport, transport_from_name};
pub use recipients::{is_valid_email, resolve_recipients};

const SUMMARY_WINDOW_DAYS: i64 = 7;
const SUMMARY_TOP_N: usize = 5;

/// What `maybe_notify` did with a new-error signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyDecision {
    /// Notifications are switched off.
    Disabled,
    /// Severity is not in the immediate set.
    Deferred,
    /// No valid recipient and no valid admin address.
    NoRecipients,
    Sent,
    /// Transport failed or timed out; already logged.
    SendFailed,
    /// Handed to a background task.
    Spawned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryOutcome {
    Disabled,
    NoRecipients,
    Sent,
    SendFailed,
}

pub struct NotificationService {
    store: ErrorStore,
    transport: Arc<dyn MailTransport>,
    settings: SettingsHandle,
    mode: DispatchMode,
    timeout: Duration,
    pending: Mutex<JoinSet<()>>,
}

impl NotificationService {
    pub fn new(store: ErrorStore, transport: Arc<dyn MailTransport>, settings: SettingsHandle) -> Self {
        Self {
            store,
            transport,
            settings,
            mode: DispatchMode::Background,
            timeout: Duration::from_secs(10),
            pending: Mutex::new(JoinSet::new()),
        }
    }

    pub fn with_dispatch(mut self, mode: DispatchMode, timeout: Duration) -> Self {
        self.mode = mode;
        self.timeout = timeout;
        self
    }

    /// Alert the recipients about a newly seen error when policy allows.
    pub async fn maybe_notify(&self, id: i64, severity: &Severity) -> NotifyDecision {
        let settings = self.settings.snapshot();

        if !settings.notifications_enabled {
            return NotifyDecision::Disabled;
        }
        if !severity.is_immediate() {
            debug!("Severity {} is not immediate; no alert for #{}", severity, id);
            return NotifyDecision::Deferred;
        }

        let to = resolve_recipients(&settings.notify_emails, &settings.admin_email);
        if to.is_empty() {
            warn!("No valid notification recipient; alert for #{} dropped", id);
            return NotifyDecision::NoRecipients;
        }

        let message = MailMessage {
            to,
            subject: template::alert_subject(&settings, severity),
            html_body: template::render_alert(&settings, id, severity),
        };

        match self.mode {
            DispatchMode::Inline => {
                if deliver(self.transport.clone(), message, self.timeout).await {
                    NotifyDecision::Sent
                } else {
                    NotifyDecision::SendFailed
                }
            }
            DispatchMode::Background => {
                let transport = self.transport.clone();
                let timeout = self.timeout;
                {
                    let mut pending = self.pending.lock();
                    while pending.try_join_next().is_some() {}
                    pending.spawn(async move {
                        deliver(transport, message, timeout).await;
                    });
                }
                NotifyDecision::Spawned
            }
        }
    }

    /// Wait for background dispatches started so far. Each one is already
    /// bounded by the mail timeout.
    pub async fn flush(&self) -> usize {
        let mut pending = std::mem::take(&mut *self.pending.lock());
        let mut finished = 0;
        while let Some(joined) = pending.join_next().await {
            if let Err(e) = joined {
                warn!("Background mail dispatch aborted: {}", e);
            }
            finished += 1;
        }
        finished
    }

    /// Mail the last seven days of activity to the recipient set. Only store
    /// failures are returned.
    pub async fn send_weekly_summary(&self) -> Result<SummaryOutcome> {
        let settings = self.settings.snapshot();

        if !settings.notifications_enabled {
            debug!("Notifications disabled; skipping weekly summary");
            return Ok(SummaryOutcome::Disabled);
        }

        let to = resolve_recipients(&settings.notify_emails, &settings.admin_email);
        if to.is_empty() {
            warn!("No valid notification recipient; weekly summary dropped");
            return Ok(SummaryOutcome::NoRecipients);
        }

        let since = Utc::now() - ChronoDuration::days(SUMMARY_WINDOW_DAYS);
        let stats = self.store.stats_since(since, SUMMARY_TOP_N).await?;

        let message = MailMessage {
            to,
            subject: template::summary_subject(&settings),
            html_body: template::render_summary(&settings, &stats),
        };

        // Summaries are awaited regardless of dispatch mode
        if deliver(self.transport.clone(), message, self.timeout).await {
            info!(
                "Weekly summary sent ({} active, {} new, {} unresolved)",
                stats.active, stats.new, stats.unresolved
            );
            Ok(SummaryOutcome::Sent)
        } else {
            Ok(SummaryOutcome::SendFailed)
        }
    }
}

async fn deliver(transport: Arc<dyn MailTransport>, message: MailMessage, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, transport.send(&message)).await {
        Ok(Ok(())) => {
            info!(
                "Sent \"{}\" to {} recipient(s) via {}",
                message.subject,
                message.to.len(),
                transport.name()
            );
            true
        }
        Ok(Err(e)) => {
            warn!("Mail dispatch via {} failed: {}", transport.name(), e);
            false
        }
        Err(_) => {
            warn!("Mail dispatch via {} timed out after {:?}", transport.name(), timeout);
            false
        }
    }
}

#[async_trait]
impl EventSubscriber for NotificationService {
    fn name(&self) -> &str {
        "notifier"
    }

    async fn handle(&self, event: &LogEvent) -> std::result::Result<(), BusError> {
        if let LogEvent::NewError(signal) = event {
            let decision = self.maybe_notify(signal.id, &signal.severity).await;
            debug!("Notification decision for #{}: {:?}", signal.id, decision);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::error::Error;
    use crate::store::connect;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<MailMessage>>,
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

    struct FailingTransport;

    #[async_trait]
    impl MailTransport for FailingTransport {
        fn name(&self) -> &str {
            "failing"
        }

        async fn send(&self, _message: &MailMessage) -> Result<()> {
            Err(Error::Dispatch("smtp down".into()))
        }
    }

    fn enabled_settings() -> SettingsHandle {
        SettingsHandle::new(Settings {
            notifications_enabled: true,
            notify_emails: "a@x.com, bad, b@x.com".to_string(),
            admin_email: "admin@x.com".to_string(),
            ..Settings::default()
        })
    }

    async fn create_service(
        transport: Arc<dyn MailTransport>,
        settings: SettingsHandle,
    ) -> NotificationService {
        let pool = connect("sqlite::memory:", 1).await.expect("create in-memory sqlite");
        NotificationService::new(ErrorStore::new(pool), transport, settings)
            .with_dispatch(DispatchMode::Inline, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_warning_is_not_dispatched() {
        let transport = Arc::new(RecordingTransport::default());
        let service = create_service(transport.clone(), enabled_settings()).await;

        let decision = service.maybe_notify(1, &Severity::Warning).await;
        assert_eq!(decision, NotifyDecision::Deferred);
        assert!(transport.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_fatal_dispatches_once_to_resolved_recipients() {
        let transport = Arc::new(RecordingTransport::default());
        let service = create_service(transport.clone(), enabled_settings()).await;

        let decision = service.maybe_notify(7, &Severity::Fatal).await;
        assert_eq!(decision, NotifyDecision::Sent);

        let sent = transport.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, vec!["a@x.com", "b@x.com"]);
        assert_eq!(sent[0].subject, "System Alert: [FATAL] on Logwarden");
        assert!(sent[0].html_body.contains("http://localhost/errors/7"));
    }

    #[tokio::test]
    async fn test_disabled_notifications() {
        let transport = Arc::new(RecordingTransport::default());
        let service = create_service(transport.clone(), SettingsHandle::default()).await;

        assert_eq!(service.maybe_notify(1, &Severity::Fatal).await, NotifyDecision::Disabled);
        assert_eq!(service.send_weekly_summary().await.unwrap(), SummaryOutcome::Disabled);
        assert!(transport.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_admin_fallback_and_no_recipients() {
        let transport = Arc::new(RecordingTransport::default());
        let settings = enabled_settings();
        settings.update(|s| s.notify_emails = "nobody".to_string());
        let service = create_service(transport.clone(), settings.clone()).await;

        assert_eq!(service.maybe_notify(1, &Severity::Exception).await, NotifyDecision::Sent);
        assert_eq!(transport.sent.lock()[0].to, vec!["admin@x.com"]);

        settings.update(|s| s.admin_email = "not-an-address".to_string());
        assert_eq!(service.maybe_notify(2, &Severity::Exception).await, NotifyDecision::NoRecipients);
        assert_eq!(transport.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_is_swallowed() {
        let service = create_service(Arc::new(FailingTransport), enabled_settings()).await;
        assert_eq!(service.maybe_notify(1, &Severity::Error).await, NotifyDecision::SendFailed);
        assert_eq!(service.send_weekly_summary().await.unwrap(), SummaryOutcome::SendFailed);
    }

    #[tokio::test]
    async fn test_weekly_summary_carries_counts() {
        let transport = Arc::new(RecordingTransport::default());
        let service = create_service(transport.clone(), enabled_settings()).await;

        assert_eq!(service.send_weekly_summary().await.unwrap(), SummaryOutcome::Sent);

        let sent = transport.sent.lock();
        assert_eq!(sent[0].subject, "Weekly error summary - Logwarden");
        assert!(sent[0].html_body.contains("Unresolved errors: <strong>0</strong>"));
    }

    #[tokio::test]
    async fn test_subscriber_ignores_saved_events() {
        use crate::bus::{NewErrorSignal, SavedEvent};
        use crate::store::NewErrorEvent;

        let transport = Arc::new(RecordingTransport::default());
        let service = create_service(transport.clone(), enabled_settings()).await;

        let saved = LogEvent::Saved(SavedEvent {
            id: 1,
            is_new: true,
            occurrence_count: 1,
            data: NewErrorEvent {
                fingerprint: "f".repeat(64),
                severity: Severity::Fatal,
                encrypted_payload: "x".into(),
                source_file: None,
                source_line: None,
                context: Default::default(),
            },
        });
        service.handle(&saved).await.unwrap();
        assert!(transport.sent.lock().is_empty());

        let signal = LogEvent::NewError(NewErrorSignal {
            id: 1,
            severity: Severity::Fatal,
        });
        service.handle(&signal).await.unwrap();
        assert_eq!(transport.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_background_dispatch_is_spawned_then_sent_once() {
        let transport = Arc::new(RecordingTransport::default());
        let pool = connect("sqlite::memory:", 1).await.expect("create in-memory sqlite");
        let service = NotificationService::new(ErrorStore::new(pool), transport.clone(), enabled_settings())
            .with_dispatch(DispatchMode::Background, Duration::from_secs(5));

        let decision = service.maybe_notify(3, &Severity::Fatal).await;
        assert_eq!(decision, NotifyDecision::Spawned);

        assert_eq!(service.flush().await, 1);
        let sent = transport.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, vec!["a@x.com", "b@x.com"]);
    }

    struct SlowTransport;

    #[async_trait]
    impl MailTransport for SlowTransport {
        fn name(&self) -> &str {
            "slow"
        }

        async fn send(&self, _message: &MailMessage) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_default_dispatch_does_not_wait_for_transport() {
        let pool = connect("sqlite::memory:", 1).await.expect("create in-memory sqlite");
        let service = NotificationService::new(ErrorStore::new(pool), Arc::new(SlowTransport), enabled_settings());

        let started = std::time::Instant::now();
        assert_eq!(service.maybe_notify(4, &Severity::Error).await, NotifyDecision::Spawned);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
