// src/ingest/context.rs
//! Best-effort capture of the request an error happened in.

use std::future::Future;

use crate::error::Result;
use crate::types::RequestContext;

tokio::task_local! {
    static REQUEST_CONTEXT: RequestContext;
}

/// Run `fut` with `ctx` as the ambient request context. Errors recorded from
/// inside the future pick it up automatically.
pub async fn with_request_context<F>(ctx: RequestContext, fut: F) -> F::Output
where
    F: Future,
{
    REQUEST_CONTEXT.scope(ctx, fut).await
}

/// Source of ambient request context for events that carry none.
pub trait ContextProvider: Send + Sync {
    /// `Ok(None)` means no request is in scope.
    fn capture(&self) -> Result<Option<RequestContext>>;
}

/// Reads the context installed by [`with_request_context`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TaskLocalContext;

impl ContextProvider for TaskLocalContext {
    fn capture(&self) -> Result<Option<RequestContext>> {
        Ok(REQUEST_CONTEXT.try_with(|ctx| ctx.clone()).ok())
    }
}
