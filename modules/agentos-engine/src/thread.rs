//! Conversation threads: an append-only event log plus free-form metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use agentos_events::Event;

use crate::interpolate::Interpolator;

/// Events consulted by `Thread::matches` beyond the summary.
const SEARCH_EVENT_WINDOW: usize = 20;

pub const THREAD_SOURCE: &str = "thread_store";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    Active,
    Archived,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub thread_id: String,
    pub summary: String,
    pub status: ThreadStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub events: Vec<Event>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Thread {
    /// A fresh active thread whose log starts with a completed `thread.created`.
    ///
    /// Without an id one is generated as `thread_<YYYYmmdd_HHMMSS>_<6 hex>`;
    /// without a summary a timestamped default is used.
    pub fn create(thread_id: Option<&str>, summary: Option<&str>) -> Self {
        let now = Utc::now();
        let thread_id = match thread_id {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => generate_id(now),
        };
        let summary = match summary {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => format!("Thread created at {}", now.format("%Y-%m-%d %H:%M")),
        };

        let mut thread = Self {
            thread_id,
            summary,
            status: ThreadStatus::Active,
            created_at: now,
            updated_at: now,
            events: Vec::new(),
            metadata: Map::new(),
        };
        let details = json!({ "threadId": thread.thread_id, "summary": thread.summary });
        thread.record("thread.created", details);
        thread
    }

    pub fn is_active(&self) -> bool {
        self.status == ThreadStatus::Active
    }

    /// Append an event. Events are never reordered or removed.
    pub fn push_event(&mut self, event: Event) {
        self.events.push(event);
        self.touch();
    }

    /// Mark archived and log `thread.archived`. Archiving twice is a no-op.
    pub fn archive(&mut self) -> bool {
        if self.status == ThreadStatus::Archived {
            return false;
        }
        self.status = ThreadStatus::Archived;
        self.record("thread.archived", json!({ "threadId": self.thread_id }));
        true
    }

    /// Shallow merge into `metadata`.
    pub fn merge_metadata(&mut self, patch: Map<String, Value>) {
        self.metadata.extend(patch);
        self.touch();
    }

    /// Case-insensitive match against the summary, then the results of the
    /// most recent events.
    pub fn matches(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        if self.summary.to_lowercase().contains(&query) {
            return true;
        }
        let start = self.events.len().saturating_sub(SEARCH_EVENT_WINDOW);
        self.events[start..].iter().any(|event| {
            event
                .result
                .as_ref()
                .is_some_and(|r| r.to_string().to_lowercase().contains(&query))
        })
    }

    /// The interpolation context a chain run starts from.
    ///
    /// ```text
    /// { threadId, summary, metadata,
    ///   thread: { <threadId>: { events, summary, metadata } },
    ///   <event.path>: { result } ... }
    /// ```
    ///
    /// Result leaves come from the last `recent` events whose name is dotted
    /// and that carry a result; later events overwrite earlier ones.
    pub fn context_view(&self, recent: usize) -> Value {
        let mut threads = Map::new();
        threads.insert(
            self.thread_id.clone(),
            json!({
                "events": self.events,
                "summary": self.summary,
                "metadata": self.metadata,
            }),
        );
        let base = json!({
            "threadId": self.thread_id,
            "summary": self.summary,
            "metadata": self.metadata,
            "thread": threads,
        });

        let mut context = Interpolator::new(base);
        let start = self.events.len().saturating_sub(recent);
        for event in &self.events[start..] {
            if !event.name.contains('.') {
                continue;
            }
            match &event.result {
                Some(result) if !result.is_null() => context.add_result(&event.name, result.clone()),
                _ => {}
            }
        }
        context.into_context()
    }

    fn record(&mut self, name: &str, details: Value) {
        let mut event = Event::new(name, details.clone()).with_source(THREAD_SOURCE);
        event.complete(details);
        self.push_event(event);
    }

    /// `updated_at` never moves backwards.
    fn touch(&mut self) {
        self.updated_at = Utc::now().max(self.updated_at);
    }
}

fn generate_id(now: DateTime<Utc>) -> String {
    let short = Uuid::new_v4().simple().to_string();
    format!("thread_{}_{}", now.format("%Y%m%d_%H%M%S"), &short[..6])
}
