// src/error.rs
// Error taxonomy shared by the store, cipher, engine and notifier

use thiserror::Error;

/// Errors surfaced by the library.
///
/// Only `Storage` ever reaches callers of `record`. `Config` stops start-up
/// in `AppState::from_config`; the other variants are recovered where they
/// occur (filtered, degraded or swallowed) and exist so those paths can log
/// something precise.
#[derive(Debug, Error)]
pub enum Error {
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("dispatch failed: {0}")]
    Dispatch(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("error event {0} not found")]
    NotFound(i64),
}

pub type Result<T> = std::result::Result<T, Error>;
