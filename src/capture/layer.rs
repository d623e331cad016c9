// src/capture/layer.rs
//! Tracing layer that turns `WARN` and `ERROR` events into captured errors.
//!
//! `error!` maps to `error`, or to `exception` when the event carries an
//! `error` field; `warn!` maps to `warning`. A `severity` field overrides
//! both. The service's own diagnostics (`logwarden::*` targets) are never
//! captured.

use std::fmt;

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use super::CaptureHandle;
use crate::types::{RawEvent, Severity};

const OWN_TARGET: &str = "logwarden";

pub struct CaptureLayer {
    handle: CaptureHandle,
}

impl CaptureLayer {
    pub fn new(handle: CaptureHandle) -> Self {
        Self { handle }
    }
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if *meta.level() > Level::WARN || meta.target().starts_with(OWN_TARGET) {
            return;
        }

        let mut fields = CapturedFields::default();
        event.record(&mut fields);

        let raw = fields.into_event(*meta.level());
        let raw = match (meta.file(), meta.line()) {
            (Some(file), Some(line)) => raw.at(file, line),
            _ => raw,
        };
        self.handle.submit(raw);
    }
}

#[derive(Default)]
struct CapturedFields {
    message: Option<String>,
    error: Option<String>,
    severity: Option<String>,
}

impl CapturedFields {
    fn into_event(self, level: Level) -> RawEvent {
        let severity = match self.severity.as_deref() {
            Some(explicit) => explicit.parse::<Severity>().unwrap_or_default(),
            None if level == Level::WARN => Severity::Warning,
            None if self.error.is_some() => Severity::Exception,
            None => Severity::Error,
        };

        let message = match (self.message, self.error) {
            (Some(msg), Some(err)) => format!("{}: {}", msg, err),
            (Some(msg), None) => msg,
            (None, Some(err)) => err,
            (None, None) => String::new(),
        };
        RawEvent::new(message, severity)
    }
}

impl Visit for CapturedFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = Some(value.to_string()),
            "error" => self.error = Some(value.to_string()),
            "severity" => self.severity = Some(value.to_string()),
            _ => {}
        }
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        if field.name() == "error" {
            self.error = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        match field.name() {
            "message" => self.message = Some(format!("{:?}", value)),
            "error" => self.error = Some(format!("{:?}", value)),
            "severity" => self.severity = Some(format!("{:?}", value)),
            _ => {}
        }
    }
}
