//! Core event types. Domain-agnostic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Published,
    Completed,
    Failed,
}

/// A named, timestamped occurrence with a payload and an outcome.
///
/// Created on publish with `status = Published`; advanced once to
/// `Completed` or `Failed`. Once appended to a thread it is never changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub data: Value,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub status: EventStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
}

impl Event {
    pub fn new(name: impl Into<String>, data: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            data,
            source: "system".to_string(),
            timestamp: Utc::now(),
            status: EventStatus::Published,
            result: None,
            error: None,
            completed_at: None,
            duration_ms: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Mark completed with `result`. Duration is measured from `timestamp`.
    pub fn complete(&mut self, result: Value) {
        self.result = Some(result);
        self.error = None;
        self.status = EventStatus::Completed;
        self.finish();
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
        self.status = EventStatus::Failed;
        self.finish();
    }

    pub fn is_terminal(&self) -> bool {
        self.status != EventStatus::Published
    }

    /// The trimmed record written to the durable log.
    pub fn to_record(&self) -> PersistedEvent {
        PersistedEvent {
            name: self.name.clone(),
            data: self.data.clone(),
            timestamp: self.timestamp,
            source: self.source.clone(),
        }
    }

    fn finish(&mut self) {
        let now = Utc::now().max(self.timestamp);
        self.completed_at = Some(now);
        self.duration_ms = (now - self.timestamp)
            .num_microseconds()
            .map(|us| us as f64 / 1000.0);
    }
}

/// One line of the durable event log: `{name, data, timestamp, source}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedEvent {
    pub name: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    pub source: String,
}

impl From<PersistedEvent> for Event {
    fn from(record: PersistedEvent) -> Self {
        Self {
            timestamp: record.timestamp,
            source: record.source,
            ..Event::new(record.name, record.data)
        }
    }
}
