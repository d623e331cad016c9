// src/capture/mod.rs
//! Capture points for runtime failures: panics through a panic hook, and
//! `WARN`/`ERROR` tracing events through [`CaptureLayer`].
//!
//! `CaptureHandle::submit` never blocks and is safe to call from synchronous
//! code, including a panic hook. Events are drained by a single worker task
//! into `IngestionEngine::record`. Anything raised while a capture is already
//! running on the same thread, or from inside the worker itself, is dropped.

pub mod layer;

use std::cell::Cell;
use std::panic::PanicHookInfo;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::ingest::{ContextProvider, IngestionEngine, TaskLocalContext};
use crate::types::{RawEvent, Severity};

pub use layer::CaptureLayer;

thread_local! {
    static CAPTURING: Cell<bool> = const { Cell::new(false) };
}

tokio::task_local! {
    static IN_CAPTURE_WORKER: ();
}

struct CaptureGuard;

impl CaptureGuard {
    fn enter() -> Option<Self> {
        if CAPTURING.with(|c| c.replace(true)) {
            None
        } else {
            Some(CaptureGuard)
        }
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        CAPTURING.with(|c| c.set(false));
    }
}

fn inside_worker() -> bool {
    IN_CAPTURE_WORKER.try_with(|_| ()).is_ok()
}

#[derive(Debug, Clone)]
pub struct CaptureHandle {
    tx: mpsc::UnboundedSender<RawEvent>,
    warned_closed: Arc<AtomicBool>,
}

impl CaptureHandle {
    /// Queue an event for recording. Returns false when it was dropped.
    pub fn submit(&self, mut event: RawEvent) -> bool {
        if inside_worker() {
            return false;
        }
        let Some(_guard) = CaptureGuard::enter() else {
            return false;
        };

        // The worker runs outside the caller's request scope
        if event.context.is_none() {
            event.context = TaskLocalContext.capture().ok().flatten();
        }

        if self.tx.send(event).is_err() {
            if !self.warned_closed.swap(true, Ordering::Relaxed) {
                warn!("Capture worker has stopped; captured events are dropped");
            }
            return false;
        }
        true
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving side of the capture channel, until a worker takes it over.
#[derive(Debug)]
pub struct CaptureQueue {
    rx: mpsc::UnboundedReceiver<RawEvent>,
}

/// Create the channel before anything can record, e.g. to hand the handle to
/// a logging layer that is installed ahead of the store.
pub fn capture_channel() -> (CaptureHandle, CaptureQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = CaptureHandle {
        tx,
        warned_closed: Arc::new(AtomicBool::new(false)),
    };
    (handle, CaptureQueue { rx })
}

impl CaptureQueue {
    /// Start the worker. It stops once every handle is dropped and returns
    /// how many events it stored.
    pub fn spawn_worker(mut self, engine: Arc<IngestionEngine>) -> JoinHandle<u64> {
        tokio::spawn(IN_CAPTURE_WORKER.scope((), async move {
            let mut recorded = 0u64;
            while let Some(event) = self.rx.recv().await {
                let engine = engine.clone();
                // Own task, so a panic while recording ends only this event
                let job = tokio::spawn(IN_CAPTURE_WORKER.scope((), async move {
                    engine.record(event, true).await
                }));

                match job.await {
                    Ok(Ok(Some(_))) => recorded += 1,
                    Ok(Ok(None)) => {}
                    // Logged only; a failure here must not produce another event
                    Ok(Err(e)) => warn!("Captured event could not be stored: {}", e),
                    Err(e) => warn!("Recording a captured event failed: {}", e),
                }
            }
            debug!("Capture worker stopped after {} events", recorded);
            recorded
        }))
    }

    #[cfg(test)]
    pub(crate) fn try_next(&mut self) -> Option<RawEvent> {
        self.rx.try_recv().ok()
    }
}

pub fn spawn_capture_worker(engine: Arc<IngestionEngine>) -> (CaptureHandle, JoinHandle<u64>) {
    let (handle, queue) = capture_channel();
    (handle, queue.spawn_worker(engine))
}

/// Record panics as `fatal` events, then run whatever hook was installed
/// before.
pub fn install_panic_hook(handle: CaptureHandle) {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        handle.submit(panic_event(info));
        previous(info);
    }));
}

fn panic_event(info: &PanicHookInfo<'_>) -> RawEvent {
    let payload = info.payload();
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    };

    let event = RawEvent::new(message, Severity::Fatal);
    match info.location() {
        Some(location) => event.at(location.file(), location.line()),
        None => event,
    }
}
