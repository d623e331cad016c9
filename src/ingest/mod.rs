// src/ingest/mod.rs
//! The single write entry point: fingerprint, encrypt, upsert, announce.

pub mod context;

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::bus::{EventBus, LogEvent, NewErrorSignal, SavedEvent};
use crate::config::SettingsHandle;
use crate::crypto::Cipher;
use crate::error::Result;
use crate::fingerprint::{fingerprint, normalize_supplied};
use crate::store::{ErrorEvent, ErrorStore, NewErrorEvent};
use crate::types::{Payload, RawEvent, RequestContext, Severity};

pub use context::{ContextProvider, TaskLocalContext, with_request_context};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordOutcome {
    pub id: i64,
    pub is_new: bool,
    pub occurrence_count: i64,
    pub fingerprint: String,
}

pub struct IngestionEngine {
    store: ErrorStore,
    cipher: Arc<Cipher>,
    bus: Arc<EventBus>,
    settings: SettingsHandle,
    context: Arc<dyn ContextProvider>,
}

impl IngestionEngine {
    pub fn new(store: ErrorStore, cipher: Arc<Cipher>, bus: Arc<EventBus>, settings: SettingsHandle) -> Self {
        Self {
            store,
            cipher,
            bus,
            settings,
            context: Arc::new(TaskLocalContext),
        }
    }

    pub fn with_context_provider(mut self, provider: Arc<dyn ContextProvider>) -> Self {
        self.context = provider;
        self
    }

    pub fn store(&self) -> &ErrorStore {
        &self.store
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Record one occurrence. Returns `None` when logging is switched off.
    ///
    /// Only storage failures are returned; fingerprinting, encryption and
    /// context capture always degrade instead of failing.
    pub async fn record(&self, raw: RawEvent, notify_on_new: bool) -> Result<Option<RecordOutcome>> {
        let settings = self.settings.snapshot();
        if !settings.logging_enabled {
            debug!("Logging disabled; dropping {} event", raw.severity);
            return Ok(None);
        }

        let fingerprint = self.resolve_fingerprint(&raw);
        let encrypted_payload = self.cipher.encrypt(&raw.message);
        let context = match raw.context {
            Some(ctx) => ctx,
            None => self.capture_context(),
        };

        let data = NewErrorEvent {
            fingerprint: fingerprint.clone(),
            severity: raw.severity,
            encrypted_payload,
            source_file: raw.file,
            source_line: raw.line,
            context,
        };

        let outcome = self.store.upsert(&data, Utc::now()).await?;
        let severity = data.severity.clone();

        self.bus
            .publish(LogEvent::Saved(SavedEvent {
                id: outcome.id,
                is_new: outcome.is_new,
                occurrence_count: outcome.occurrence_count,
                data,
            }))
            .await;

        if outcome.is_new && notify_on_new {
            self.bus
                .publish(LogEvent::NewError(NewErrorSignal { id: outcome.id, severity }))
                .await;
        }

        Ok(Some(RecordOutcome {
            id: outcome.id,
            is_new: outcome.is_new,
            occurrence_count: outcome.occurrence_count,
            fingerprint,
        }))
    }

    /// Shorthand for the common capture-point call.
    pub async fn record_message(
        &self,
        message: impl Into<Payload>,
        severity: Severity,
        file: Option<&str>,
        line: Option<u32>,
    ) -> Result<Option<RecordOutcome>> {
        let mut raw = RawEvent::new(message, severity);
        raw.file = file.map(str::to_string);
        raw.line = line;
        self.record(raw, true).await
    }

    /// Plaintext view of a stored event for presentation.
    pub fn decrypt_event(&self, event: &ErrorEvent) -> Payload {
        self.cipher.decrypt(&event.encrypted_payload)
    }

    fn resolve_fingerprint(&self, raw: &RawEvent) -> String {
        if let Some(supplied) = raw.fingerprint.as_deref() {
            match normalize_supplied(supplied) {
                Some(fp) => return fp,
                None => debug!("Ignoring malformed supplied fingerprint '{}'", supplied),
            }
        }
        fingerprint(&raw.severity, &raw.message, raw.file.as_deref(), raw.line)
    }

    fn capture_context(&self) -> RequestContext {
        match self.context.capture() {
            Ok(ctx) => ctx.unwrap_or_default(),
            Err(e) => {
                warn!("Request context capture failed: {}", e);
                RequestContext::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::error::Error;
    use crate::store::connect;
    use serde_json::json;

    async fn create_engine(settings: SettingsHandle) -> IngestionEngine {
        let pool = connect("sqlite::memory:", 1).await.expect("create in-memory sqlite");
        IngestionEngine::new(
            ErrorStore::new(pool),
            Arc::new(Cipher::from_secrets(Some("engine-test"), None)),
            Arc::new(EventBus::new()),
            settings,
        )
    }

    #[tokio::test]
    async fn test_repeated_record_yields_single_row() {
        let engine = create_engine(SettingsHandle::default()).await;

        let mut last = None;
        for _ in 0..5 {
            last = engine
                .record_message("Division by zero", Severity::Error, Some("calc.ext"), Some(42))
                .await
                .unwrap();
        }

        let last = last.unwrap();
        assert_eq!(last.occurrence_count, 5);
        assert!(!last.is_new);

        let rows = engine.store().list(true).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].occurrence_count, 5);
    }

    #[tokio::test]
    async fn test_payload_is_encrypted_and_decryptable() {
        let engine = create_engine(SettingsHandle::default()).await;
        let message = json!({"error": "timeout", "upstream": "billing"});

        let outcome = engine
            .record(RawEvent::new(message.clone(), Severity::Exception), true)
            .await
            .unwrap()
            .unwrap();

        let row = engine.store().require(outcome.id).await.unwrap();
        assert!(!row.encrypted_payload.contains("billing"));
        assert_eq!(engine.decrypt_event(&row), Payload::Structured(message));
    }

    #[tokio::test]
    async fn test_disabled_logging_is_noop() {
        let settings = SettingsHandle::new(Settings {
            logging_enabled: false,
            ..Settings::default()
        });
        let engine = create_engine(settings).await;

        let outcome = engine.record_message("ignored", Severity::Fatal, None, None).await.unwrap();
        assert!(outcome.is_none());
        assert_eq!(engine.store().count(true).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_supplied_fingerprint_wins() {
        let engine = create_engine(SettingsHandle::default()).await;
        let supplied = "ab".repeat(32);

        let a = engine
            .record(RawEvent::new("first wording", Severity::Error).with_fingerprint(supplied.clone()), true)
            .await
            .unwrap()
            .unwrap();
        let b = engine
            .record(RawEvent::new("second wording", Severity::Error).with_fingerprint(supplied.clone()), true)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(a.fingerprint, supplied);
        assert_eq!(a.id, b.id);
        assert_eq!(b.occurrence_count, 2);
    }

    #[tokio::test]
    async fn test_ambient_context_captured_on_insert() {
        let engine = create_engine(SettingsHandle::default()).await;
        let ctx = RequestContext {
            request_uri: Some("/checkout".into()),
            request_method: Some("POST".into()),
            ..Default::default()
        }
        .with_actor(11);

        let outcome = with_request_context(ctx.clone(), async {
            engine.record_message("card declined", Severity::Error, None, None).await
        })
        .await
        .unwrap()
        .unwrap();

        let row = engine.store().require(outcome.id).await.unwrap();
        assert_eq!(row.context, ctx);
    }

    struct BrokenContext;

    impl ContextProvider for BrokenContext {
        fn capture(&self) -> Result<Option<RequestContext>> {
            Err(Error::Validation("session store unavailable".into()))
        }
    }

    #[tokio::test]
    async fn test_context_failure_does_not_fail_write() {
        let engine = create_engine(SettingsHandle::default())
            .await
            .with_context_provider(Arc::new(BrokenContext));

        let outcome = engine.record_message("still stored", Severity::Warning, None, None).await.unwrap();
        let row = engine.store().require(outcome.unwrap().id).await.unwrap();
        assert!(row.context.is_empty());
    }

    #[tokio::test]
    async fn test_new_error_signal_only_on_first_insert() {
        let engine = create_engine(SettingsHandle::default()).await;
        let mut rx = engine.bus().stream();

        engine.record_message("boom", Severity::Fatal, Some("a.rs"), Some(1)).await.unwrap();
        engine.record_message("boom", Severity::Fatal, Some("a.rs"), Some(1)).await.unwrap();
        engine
            .record(RawEvent::new("quiet", Severity::Fatal), false)
            .await
            .unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(match event {
                LogEvent::Saved(s) => format!("saved:{}", s.is_new),
                LogEvent::NewError(_) => "new".to_string(),
            });
        }
        assert_eq!(kinds, vec!["saved:true", "new", "saved:false", "saved:true"]);
    }
}
