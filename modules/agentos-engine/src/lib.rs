//! Event orchestration engine.
//!
//! Handlers register under dot-namespaced event names in a `Registry`. The
//! `EventBus` validates payloads against each event's input schema and fans
//! them out to every handler. A `ChainExecutor` runs chains of events,
//! sequentially or in parallel groups, threading each step's result into
//! later steps through `{path}` references, and records what ran in a
//! conversation `Thread`.

pub mod bus;
pub mod chain;
pub mod decision;
pub mod error;
pub mod executor;
pub mod interpolate;
pub mod persist;
pub mod registry;
pub mod schema;
pub mod thread;
pub mod thread_store;
pub mod traits;

pub use bus::{EventBus, HandlerOutcome, PublishOutcome};
pub use chain::{Chain, ChainBuilder, ChainElement, ChainStep, ExecutionResult};
pub use decision::{Decision, DecisionAction, DecisionRequest};
pub use error::{BusError, DecisionError, PathError, StoreError, ValidationError};
pub use executor::ChainExecutor;
pub use interpolate::{Interpolation, Interpolator, UnresolvedReference};
pub use persist::MemoryEventSink;
pub use registry::{Registration, Registry, RegistryEntry};
pub use schema::{InputSchema, JsonSchemaValidator, TypedSchema};
pub use thread::{Thread, ThreadStatus};
pub use thread_store::{FileThreadStore, MemoryThreadStore, ThreadStore};
pub use traits::{handler_fn, EventHandler, EventSink};

pub use agentos_events::{Event, EventStatus};
