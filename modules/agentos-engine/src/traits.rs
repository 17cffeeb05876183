//! Core traits for the event engine.

use std::future::Future;
use std::sync::Arc;

use agentos_events::{Event, PersistedEvent};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

/// A subscriber to a named event.
///
/// The returned value becomes the handler's entry in the publish outcome; an
/// `Err` is captured as `{error: message}` and never reaches other handlers.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Key used in keyed publish outcomes and for `unsubscribe`.
    fn name(&self) -> &str;

    async fn handle(&self, event: &Event) -> Result<Value>;
}

/// Durable destination for published events.
///
/// Implemented by `EventLog` (JSONL on disk) and `MemoryEventSink` (tests).
/// Also implemented for `Arc<P>` so the sink can be shared for assertions.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn persist(&self, record: &PersistedEvent) -> Result<()>;

    /// Free-form statistics about what has been persisted.
    async fn stats(&self) -> Result<Value> {
        Ok(serde_json::json!({ "persistenceEnabled": true }))
    }
}

// ---------------------------------------------------------------------------
// Closure handlers
// ---------------------------------------------------------------------------

pub struct FnHandler<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &Event) -> Result<Value> {
        (self.f)(event.clone()).await
    }
}

/// Wrap an async closure as a named handler.
///
/// ```ignore
/// let now = handler_fn("now", |_event| async { Ok(json!("2026-01-01T00:00:00Z")) });
/// ```
pub fn handler_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(FnHandler {
        name: name.into(),
        f,
    })
}
