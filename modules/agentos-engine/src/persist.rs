//! EventSink implementations.

use std::sync::{Arc, Mutex, PoisonError};

use agentos_events::{EventLog, PersistedEvent};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::traits::EventSink;

// ---------------------------------------------------------------------------
// EventLog adapter (JSONL files)
// ---------------------------------------------------------------------------

#[async_trait]
impl EventSink for EventLog {
    async fn persist(&self, record: &PersistedEvent) -> Result<()> {
        self.append(record).await?;
        Ok(())
    }

    async fn stats(&self) -> Result<Value> {
        let mut stats = serde_json::to_value(EventLog::stats(self).await?)?;
        if let Value::Object(map) = &mut stats {
            map.insert("persistenceEnabled".to_string(), Value::Bool(true));
        }
        Ok(stats)
    }
}

// ---------------------------------------------------------------------------
// MemoryEventSink (in memory)
// ---------------------------------------------------------------------------

/// In-memory event sink for testing. Thread-safe.
#[derive(Default)]
pub struct MemoryEventSink {
    records: Mutex<Vec<PersistedEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read all persisted records (for test assertions).
    pub fn records(&self) -> Vec<PersistedEvent> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn persist(&self, record: &PersistedEvent) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }

    async fn stats(&self) -> Result<Value> {
        Ok(json!({
            "persistenceEnabled": true,
            "totalEvents": self.records().len(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Arc<P> blanket, so callers can keep a handle to the sink
// ---------------------------------------------------------------------------

#[async_trait]
impl<P: EventSink + ?Sized> EventSink for Arc<P> {
    async fn persist(&self, record: &PersistedEvent) -> Result<()> {
        (**self).persist(record).await
    }

    async fn stats(&self) -> Result<Value> {
        (**self).stats().await
    }
}
