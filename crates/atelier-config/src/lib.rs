#![allow(clippy::must_use_candidate)]

pub mod download;
mod duration;
mod env;
pub mod gateway;
mod loader;
pub mod polling;
pub mod telemetry;

use serde::Deserialize;

pub use download::*;
pub use gateway::*;
pub use polling::*;
pub use telemetry::*;

/// Top-level Atelier configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Shared gateway that fronts every image backend
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// Per-backend-family overrides keyed by family name (e.g. `midjourney`)
    #[serde(default)]
    pub backends: indexmap::IndexMap<String, BackendConfig>,
    /// Poll policy overrides for asynchronous backends
    #[serde(default)]
    pub polling: PollingConfig,
    /// Retry policy for generated asset downloads
    #[serde(default)]
    pub download: DownloadConfig,
    /// Logging configuration
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}
