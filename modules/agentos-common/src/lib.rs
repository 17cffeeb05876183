//! Shared configuration and process bootstrap for the AgentOS engine crates.

pub mod config;
pub mod file_config;
pub mod telemetry;

pub use config::{BusConfig, ChainConfig, EngineConfig, EventLogConfig, ThreadsConfig};
pub use file_config::load_config;
