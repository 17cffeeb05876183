//! Event registry: name → {input schema, handlers}.
//!
//! Entries are immutable snapshots. Every mutation builds a new entry and
//! swaps it in, so a publish that already looked up an entry keeps the handler
//! set it started with.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{info, warn};

use crate::schema::InputSchema;
use crate::traits::EventHandler;

/// What callers hand to `Registry::register`.
pub struct Registration {
    name: String,
    schema: Option<Arc<dyn InputSchema>>,
    handlers: Vec<Arc<dyn EventHandler>>,
    description: Option<String>,
    publisher: Option<String>,
}

impl Registration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: None,
            handlers: Vec::new(),
            description: None,
            publisher: None,
        }
    }

    pub fn with_schema(mut self, schema: impl InputSchema + 'static) -> Self {
        self.schema = Some(Arc::new(schema));
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Module that emits this event, for documentation.
    pub fn with_publisher(mut self, publisher: impl Into<String>) -> Self {
        self.publisher = Some(publisher.into());
        self
    }
}

#[derive(Clone)]
pub struct RegistryEntry {
    pub name: String,
    pub schema: Option<Arc<dyn InputSchema>>,
    pub handlers: Vec<Arc<dyn EventHandler>>,
    pub description: Option<String>,
    pub publisher: Option<String>,
}

impl RegistryEntry {
    pub fn handler_names(&self) -> Vec<String> {
        self.handlers.iter().map(|h| h.name().to_string()).collect()
    }
}

impl From<Registration> for RegistryEntry {
    fn from(reg: Registration) -> Self {
        Self {
            name: reg.name,
            schema: reg.schema,
            handlers: reg.handlers,
            description: reg.description,
            publisher: reg.publisher,
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct Registry {
    entries: RwLock<HashMap<String, Arc<RegistryEntry>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `registration`, replacing any entry with the same name.
    /// Returns the replaced entry.
    pub fn register(&self, registration: Registration) -> Option<Arc<RegistryEntry>> {
        let entry = Arc::new(RegistryEntry::from(registration));
        let name = entry.name.clone();
        let handlers = entry.handlers.len();
        let has_schema = entry.schema.is_some();

        let previous = self.write().insert(name.clone(), entry);
        if previous.is_some() {
            warn!(event = %name, "Event re-registered, previous entry replaced");
        }
        info!(event = %name, handlers, has_schema, "Registered event");
        previous
    }

    pub fn get(&self, name: &str) -> Option<Arc<RegistryEntry>> {
        self.read().get(name).cloned()
    }

    /// Add a handler to `name`, creating a schema-less entry if needed.
    pub fn subscribe(&self, name: &str, handler: Arc<dyn EventHandler>) {
        let handler_name = handler.name().to_string();
        let mut entries = self.write();
        let mut next = match entries.get(name) {
            Some(current) => RegistryEntry::clone(current),
            None => RegistryEntry::from(Registration::new(name)),
        };
        next.handlers.push(handler);
        entries.insert(name.to_string(), Arc::new(next));
        info!(event = %name, handler = %handler_name, "Subscribed handler");
    }

    /// Remove the first handler called `handler_name`. Returns whether one was removed.
    pub fn unsubscribe(&self, name: &str, handler_name: &str) -> bool {
        let mut entries = self.write();
        let Some(current) = entries.get(name) else {
            return false;
        };
        let Some(pos) = current.handlers.iter().position(|h| h.name() == handler_name) else {
            return false;
        };
        let mut next = RegistryEntry::clone(current);
        next.handlers.remove(pos);
        entries.insert(name.to_string(), Arc::new(next));
        info!(event = %name, handler = %handler_name, "Unsubscribed handler");
        true
    }

    pub fn schema(&self, name: &str) -> Option<Arc<dyn InputSchema>> {
        self.get(name).and_then(|entry| entry.schema.clone())
    }

    pub fn has_handler(&self, name: &str) -> bool {
        self.get(name).is_some_and(|entry| !entry.handlers.is_empty())
    }

    /// Event name → handler names, sorted by event name.
    pub fn list(&self) -> BTreeMap<String, Vec<String>> {
        self.read()
            .iter()
            .map(|(name, entry)| (name.clone(), entry.handler_names()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<RegistryEntry>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<RegistryEntry>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}
