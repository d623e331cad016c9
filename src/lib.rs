// src/lib.rs

pub mod bus;
pub mod capture;
pub mod config;
pub mod crypto;
pub mod error;
pub mod fingerprint;
pub mod ingest;
pub mod notify;
pub mod state;
pub mod store;
pub mod tasks;
pub mod types;

pub use error::{Error, Result};
pub use ingest::{IngestionEngine, RecordOutcome};
pub use state::AppState;
pub use store::{ErrorEvent, ErrorStore};
pub use types::{Payload, RawEvent, RequestContext, Severity};
