use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::file_config::load_config;

/// Engine configuration. Every section has defaults, so an empty TOML file
/// (or no file at all) yields a working in-memory setup.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub bus: BusConfig,
    pub event_log: EventLogConfig,
    pub threads: ThreadsConfig,
    pub chain: ChainConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BusConfig {
    /// Maximum number of events kept in the in-memory history.
    pub history_cap: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self { history_cap: 1000 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EventLogConfig {
    pub enabled: bool,
    pub dir: PathBuf,
    pub daily_partitions: bool,
    /// Partitions older than this many days are removed by cleanup. `None` keeps everything.
    pub retention_days: Option<u32>,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: PathBuf::from("data/events"),
            daily_partitions: true,
            retention_days: Some(30),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThreadsConfig {
    /// Write threads to `dir` as JSON documents. When false threads live in memory only.
    pub persist: bool,
    pub dir: PathBuf,
    /// How many trailing thread events contribute result leaves to the context view.
    pub recent_context_events: usize,
}

impl Default for ThreadsConfig {
    fn default() -> Self {
        Self {
            persist: false,
            dir: PathBuf::from("data/threads"),
            recent_context_events: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChainConfig {
    /// Event consulted for `decide` prompts and parameter repair.
    pub decision_event: String,
    /// `source` stamped on events published by chain steps.
    pub source: String,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            decision_event: "agent.decide".to_string(),
            source: "chain".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load from a TOML file.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        load_config(path)
    }

    /// Load configuration the way a process would at start-up.
    ///
    /// Env vars:
    /// - `AGENTOS_CONFIG`: TOML file to start from (optional)
    /// - `AGENTOS_DATA_DIR`: root for `events/` and `threads/`; enables both stores
    /// - `AGENTOS_HISTORY_CAP`: bus history cap
    /// - `AGENTOS_DECISION_EVENT`: decision handler event name
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = match std::env::var("AGENTOS_CONFIG") {
            Ok(path) => load_config(std::path::Path::new(&path))?,
            Err(_) => Self::default(),
        };

        if let Ok(dir) = std::env::var("AGENTOS_DATA_DIR") {
            let root = PathBuf::from(dir);
            config.event_log.enabled = true;
            config.event_log.dir = root.join("events");
            config.threads.persist = true;
            config.threads.dir = root.join("threads");
        }
        if let Ok(cap) = std::env::var("AGENTOS_HISTORY_CAP") {
            config.bus.history_cap = cap
                .parse()
                .with_context(|| format!("AGENTOS_HISTORY_CAP must be a number, got {cap:?}"))?;
        }
        if let Ok(name) = std::env::var("AGENTOS_DECISION_EVENT") {
            config.chain.decision_event = name;
        }

        config.log_summary();
        Ok(config)
    }

    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  bus.history_cap: {}", self.bus.history_cap);
        if self.event_log.enabled {
            tracing::info!(
                "  event_log: {} (daily_partitions={}, retention_days={:?})",
                self.event_log.dir.display(),
                self.event_log.daily_partitions,
                self.event_log.retention_days
            );
        } else {
            tracing::info!("  event_log: <disabled>");
        }
        if self.threads.persist {
            tracing::info!("  threads: {}", self.threads.dir.display());
        } else {
            tracing::info!("  threads: <in-memory>");
        }
        tracing::info!("  chain.decision_event: {}", self.chain.decision_event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.bus.history_cap, 1000);
        assert_eq!(config.threads.recent_context_events, 10);
        assert_eq!(config.chain.decision_event, "agent.decide");
        assert!(!config.event_log.enabled);
        assert_eq!(config.event_log.retention_days, Some(30));
    }

    #[test]
    fn partial_toml_keeps_defaults_for_missing_sections() {
        let config: EngineConfig = toml::from_str(
            r#"
            [bus]
            history_cap = 50

            [chain]
            decision_event = "planner.decide"
            "#,
        )
        .unwrap();

        assert_eq!(config.bus.history_cap, 50);
        assert_eq!(config.chain.decision_event, "planner.decide");
        assert_eq!(config.chain.source, "chain");
        assert!(!config.threads.persist);
    }

    #[test]
    fn rejects_unknown_keys() {
        let result: Result<EngineConfig, _> = toml::from_str(
            r#"
            [bus]
            history_size = 50
            "#,
        );
        assert!(result.is_err());
    }
}
