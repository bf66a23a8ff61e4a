use crate::{LoggingConfig, ModGraphError, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format.as_str() {
        "pretty" => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init(),
        _ => registry
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init(),
    };

    installed.map_err(|e| ModGraphError::InvalidOperation(format!("logging already initialized: {}", e)))
}
