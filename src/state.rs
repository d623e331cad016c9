// src/state.rs
// Shared application state: one pool, one cipher, one bus, and the services
// built on them.

use std::sync::Arc;

use crate::{
    bus::EventBus,
    config::{LogwardenConfig, SettingsHandle},
    crypto::Cipher,
    error::Result,
    ingest::IngestionEngine,
    notify::{MailTransport, NotificationService, transport_from_name},
    store::{ErrorStore, connect},
};

#[derive(Clone)]
pub struct AppState {
    // -------- Configuration --------
    pub config: Arc<LogwardenConfig>,
    pub settings: SettingsHandle,

    // -------- Storage --------
    pub store: ErrorStore,
    pub cipher: Arc<Cipher>,

    // -------- Services --------
    pub bus: Arc<EventBus>,
    pub engine: Arc<IngestionEngine>,
    pub notifier: Arc<NotificationService>,
}

impl AppState {
    /// Connect to the configured database and wire everything with the
    /// configured mail transport.
    pub async fn from_config(config: LogwardenConfig) -> Result<Self> {
        config.validate()?;
        let transport = transport_from_name(&config.mail_transport, &config.sendmail_path);
        Self::with_transport(config, transport).await
    }

    pub async fn with_transport(config: LogwardenConfig, transport: Arc<dyn MailTransport>) -> Result<Self> {
        let pool = connect(&config.database_url, config.sqlite_max_connections).await?;
        Ok(Self::assemble(config, ErrorStore::new(pool), transport))
    }

    /// Build the services over an existing store and subscribe the notifier
    /// to the bus.
    pub fn assemble(config: LogwardenConfig, store: ErrorStore, transport: Arc<dyn MailTransport>) -> Self {
        let settings = SettingsHandle::new(config.settings());
        let cipher = Arc::new(Cipher::from_secrets(
            config.encryption_key.as_deref(),
            config.site_secret.as_deref(),
        ));
        let bus = Arc::new(EventBus::new());

        let engine = Arc::new(IngestionEngine::new(
            store.clone(),
            cipher.clone(),
            bus.clone(),
            settings.clone(),
        ));

        let notifier = Arc::new(
            NotificationService::new(store.clone(), transport, settings.clone())
                .with_dispatch(config.dispatch_mode, config.mail_timeout()),
        );
        bus.subscribe(notifier.clone());

        Self {
            config: Arc::new(config),
            settings,
            store,
            cipher,
            bus,
            engine,
            notifier,
        }
    }
}
