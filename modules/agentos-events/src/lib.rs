//! Event records and the durable, append-only event log.
//!
//! `Event` is the unit that flows through the bus and into thread histories.
//! `PersistedEvent` is the trimmed record written to newline-delimited JSON,
//! optionally partitioned by UTC date. Zero knowledge of handlers or chains.

pub mod store;
pub mod types;

pub use store::{EventLog, EventLogStats};
pub use types::{Event, EventStatus, PersistedEvent};
