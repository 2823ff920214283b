//! Logging for Atelier
//!
//! Installs a `tracing-subscriber` fmt layer filtered by `RUST_LOG` or the
//! configured directive.

use atelier_config::{LogFormat, TelemetryConfig};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the global subscriber from configuration
///
/// `RUST_LOG` wins over `log_filter`, which wins over the configured
/// directive. An unparsable directive falls back to `info`.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed
pub fn init(config: &TelemetryConfig, log_filter: Option<&str>) -> anyhow::Result<()> {
    let directive = filter_directive(config, log_filter, std::env::var("RUST_LOG").ok());
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format {
        LogFormat::Pretty => registry.with(fmt_layer).try_init(),
        LogFormat::Json => registry.with(fmt_layer.json()).try_init(),
    };

    installed.map_err(|e| anyhow::anyhow!("failed to install log subscriber: {e}"))
}

fn filter_directive(
    config: &TelemetryConfig,
    log_filter: Option<&str>,
    env: Option<String>,
) -> String {
    env.filter(|value| !value.trim().is_empty())
        .or_else(|| log_filter.map(str::to_owned))
        .unwrap_or_else(|| config.log_filter.clone())
}
