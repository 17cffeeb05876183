use anyhow::{Context, Result};
use std::path::Path;

use crate::config::EngineConfig;

/// Load and parse a TOML config file.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: EngineConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_config_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [event_log]
            enabled = true
            dir = "/tmp/agentos-events"
            retention_days = 7

            [threads]
            recent_context_events = 4
            "#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert!(config.event_log.enabled);
        assert_eq!(config.event_log.retention_days, Some(7));
        assert_eq!(config.threads.recent_context_events, 4);
        assert_eq!(config.bus.history_cap, 1000);
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = load_config(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.toml"));
    }
}
