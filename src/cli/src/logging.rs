use anyhow::{Context, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Console logging for the CLI. `RUST_LOG` overrides the default info level.
pub fn setup_logging() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let console_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let subscriber = tracing_subscriber::registry().with(filter).with(console_layer);

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    Ok(())
}
