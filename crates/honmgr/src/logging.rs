//! Logging system setup.
//!
//! Initializes the tracing-based logging stack with configurable filtering
//! and an optional JSON layer for log aggregation systems.

use crate::config::LoggingSettings;
use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes the global tracing subscriber.
///
/// The `RUST_LOG` environment variable overrides the configured level.
pub fn setup_logging(config: &LoggingSettings) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let registry = tracing_subscriber::registry().with(filter);
    if config.json_format {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(true),
            )
            .init();
    } else {
        registry
            .with(fmt::layer().with_ansi(true).with_target(false))
            .init();
    }
    Ok(())
}
