use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::LoggingConfig;
use crate::error::{HarnessError, Result};

/// Installs the global subscriber. `RUST_LOG` overrides the configured filter.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let from_env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = resolve_filter(from_env.as_deref(), &config.filter)?;
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(config.ansi)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| HarnessError::Config(format!("logging already initialised: {}", e)))
}

/// An unparsable `RUST_LOG` falls back to the configured directives; a bad
/// `logging.filter` is a config error.
fn resolve_filter(from_env: Option<&str>, configured: &str) -> Result<EnvFilter> {
    if let Some(filter) = from_env.and_then(|raw| EnvFilter::try_new(raw).ok()) {
        return Ok(filter);
    }
    EnvFilter::try_new(configured)
        .map_err(|e| HarnessError::Config(format!("logging.filter {:?}: {}", configured, e)))
}
