//! Tracing bootstrap shared by binaries and tests.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to
/// `default_directive` (e.g. `"agentos=info"`) when `RUST_LOG` is unset or
/// does not parse.
///
/// Returns `Ok(false)` when a global subscriber was already installed.
pub fn init_tracing(default_directive: &str) -> Result<bool> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = build_filter(rust_log.as_deref(), default_directive)?;
    Ok(tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_ok())
}

fn build_filter(rust_log: Option<&str>, default_directive: &str) -> Result<EnvFilter> {
    if let Some(filter) = rust_log.and_then(|directives| EnvFilter::try_new(directives).ok()) {
        return Ok(filter);
    }
    Ok(EnvFilter::try_new(default_directive)?)
}
