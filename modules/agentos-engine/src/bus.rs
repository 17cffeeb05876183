//! In-memory event bus.
//!
//! publish → validate → record in history → forward to sink → fan out to
//! every handler concurrently → aggregate outcomes.

use std::any::Any;
use std::collections::{BTreeMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};

use agentos_common::EngineConfig;
use agentos_events::{Event, EventLog, PersistedEvent};
use anyhow::Result;
use futures::future::join_all;
use futures::FutureExt;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::error::BusError;
use crate::registry::{Registration, Registry, RegistryEntry};
use crate::traits::{EventHandler, EventSink};

pub const DEFAULT_HISTORY_CAP: usize = 1000;

/// What a single handler produced.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutcome {
    Ok(Value),
    Err(String),
}

impl HandlerOutcome {
    pub fn is_err(&self) -> bool {
        matches!(self, HandlerOutcome::Err(_))
    }

    /// Errors render as `{"error": message}`.
    pub fn into_value(self) -> Value {
        match self {
            HandlerOutcome::Ok(value) => value,
            HandlerOutcome::Err(message) => json!({ "error": message }),
        }
    }
}

/// Aggregated result of one publish.
#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    /// Nobody was listening.
    Empty,
    /// Exactly one handler; its outcome, unwrapped.
    Single(HandlerOutcome),
    /// Several handlers, keyed by handler name.
    Keyed(BTreeMap<String, HandlerOutcome>),
}

impl PublishOutcome {
    /// Flatten to JSON: `{}` for no handlers, the bare value for one,
    /// an object keyed by handler name for several.
    pub fn into_value(self) -> Value {
        match self {
            PublishOutcome::Empty => json!({}),
            PublishOutcome::Single(outcome) => outcome.into_value(),
            PublishOutcome::Keyed(map) => Value::Object(
                map.into_iter()
                    .map(|(name, outcome)| (name, outcome.into_value()))
                    .collect(),
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

pub struct EventBus {
    registry: Arc<Registry>,
    history: Mutex<VecDeque<Event>>,
    history_cap: usize,
    sink: Option<Arc<dyn EventSink>>,
}

impl EventBus {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            history: Mutex::new(VecDeque::new()),
            history_cap: DEFAULT_HISTORY_CAP,
            sink: None,
        }
    }

    /// Build from config. Attaches an `EventLog` sink when `[event_log]` is enabled.
    pub fn from_config(config: &EngineConfig, registry: Arc<Registry>) -> Self {
        let bus = Self::new(registry).with_history_cap(config.bus.history_cap);
        if !config.event_log.enabled {
            return bus;
        }
        let log = EventLog::new(config.event_log.dir.clone())
            .with_daily_partitions(config.event_log.daily_partitions)
            .with_retention_days(config.event_log.retention_days);
        bus.with_sink(Arc::new(log))
    }

    pub fn with_history_cap(mut self, cap: usize) -> Self {
        self.history_cap = cap;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn register(&self, registration: Registration) -> Option<Arc<RegistryEntry>> {
        self.registry.register(registration)
    }

    pub fn subscribe(&self, name: &str, handler: Arc<dyn EventHandler>) {
        self.registry.subscribe(name, handler);
    }

    pub fn unsubscribe(&self, name: &str, handler_name: &str) -> bool {
        self.registry.unsubscribe(name, handler_name)
    }

    /// Publish an event and wait for every handler.
    ///
    /// Only schema validation can fail the publish. Handler errors and
    /// panics are captured per handler; sink errors are logged.
    pub async fn publish(
        &self,
        name: &str,
        data: Value,
        source: &str,
    ) -> Result<PublishOutcome, BusError> {
        let (_, outcome) = self.publish_event(name, data, source).await?;
        Ok(outcome)
    }

    /// Like `publish`, also returning the event as it was recorded (status
    /// still `Published`, data normalised by the schema).
    pub async fn publish_event(
        &self,
        name: &str,
        data: Value,
        source: &str,
    ) -> Result<(Event, PublishOutcome), BusError> {
        let entry = self.registry.get(name);

        let data = match entry.as_ref().and_then(|e| e.schema.as_ref()) {
            Some(schema) => match schema.validate(&data) {
                Ok(normalised) => {
                    debug!(event = %name, "Event data validated");
                    normalised
                }
                Err(err) => {
                    warn!(event = %name, error = %err, "Event validation failed");
                    return Err(BusError::Validation {
                        event: name.to_string(),
                        source: err,
                    });
                }
            },
            None => {
                warn!(event = %name, "No schema registered, publishing without validation");
                data
            }
        };

        let event = Event::new(name, data).with_source(source);
        self.record(event.clone());

        if let Some(sink) = &self.sink {
            if let Err(e) = sink.persist(&event.to_record()).await {
                error!(event = %name, error = %e, "Failed to persist event");
            }
        }

        info!(event = %name, source = %source, "Publishing event");

        let handlers = entry.map(|e| e.handlers.clone()).unwrap_or_default();
        let results = join_all(
            handlers
                .iter()
                .map(|h| AssertUnwindSafe(h.handle(&event)).catch_unwind()),
        )
        .await;

        let mut outcomes: Vec<(String, HandlerOutcome)> = Vec::with_capacity(results.len());
        for (handler, result) in handlers.iter().zip(results) {
            let outcome = match result {
                Ok(Ok(value)) => HandlerOutcome::Ok(value),
                Ok(Err(e)) => {
                    error!(event = %name, handler = %handler.name(), error = %e, "Handler failed");
                    HandlerOutcome::Err(e.to_string())
                }
                Err(payload) => {
                    let message = format!("handler panicked: {}", panic_message(&*payload));
                    error!(event = %name, handler = %handler.name(), error = %message, "Handler panicked");
                    HandlerOutcome::Err(message)
                }
            };
            outcomes.push((handler.name().to_string(), outcome));
        }

        let outcome = match outcomes.len() {
            0 => PublishOutcome::Empty,
            1 => PublishOutcome::Single(outcomes.remove(0).1),
            _ => {
                let mut keyed = BTreeMap::new();
                for (handler_name, outcome) in outcomes {
                    let key = unique_key(&keyed, handler_name);
                    keyed.insert(key, outcome);
                }
                PublishOutcome::Keyed(keyed)
            }
        };
        Ok((event, outcome))
    }

    /// Most recent events, oldest first, optionally filtered by name.
    pub fn history(&self, name: Option<&str>) -> Vec<Event> {
        self.lock_history()
            .iter()
            .filter(|e| name.map_or(true, |n| e.name == n))
            .cloned()
            .collect()
    }

    pub fn clear_history(&self) {
        self.lock_history().clear();
    }

    /// Seed the history from durable records (e.g. the event log at start-up).
    /// Returns how many events the history holds afterwards.
    pub fn restore_history(&self, records: impl IntoIterator<Item = PersistedEvent>) -> usize {
        for record in records {
            self.record(Event::from(record));
        }
        let len = self.lock_history().len();
        info!(events = len, "Restored event history");
        len
    }

    pub fn list_events(&self) -> BTreeMap<String, Vec<String>> {
        self.registry.list()
    }

    /// JSON Schema description of `name`'s input, if it has one.
    pub fn schema(&self, name: &str) -> Option<Value> {
        self.registry.schema(name).map(|s| s.describe())
    }

    pub fn has_handler(&self, name: &str) -> bool {
        self.registry.has_handler(name)
    }

    pub async fn persistence_stats(&self) -> Result<Value> {
        match &self.sink {
            Some(sink) => sink.stats().await,
            None => Ok(json!({ "persistenceEnabled": false })),
        }
    }

    fn record(&self, event: Event) {
        let mut history = self.lock_history();
        history.push_back(event);
        while history.len() > self.history_cap {
            history.pop_front();
        }
    }

    fn lock_history(&self) -> std::sync::MutexGuard<'_, VecDeque<Event>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

/// `name`, then `name#2`, `name#3`, … for repeats.
fn unique_key(taken: &BTreeMap<String, HandlerOutcome>, name: String) -> String {
    if !taken.contains_key(&name) {
        return name;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{name}#{n}");
        if !taken.contains_key(&candidate) {
            return candidate;
        }
        n += 1;
    }
}
