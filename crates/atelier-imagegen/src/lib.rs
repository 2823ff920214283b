#![allow(
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_const_for_fn,
    clippy::module_name_repetitions
)]

mod client;
mod error;
mod fetch;
mod handler;
mod job;
pub mod normalize;
mod registry;
mod server;
mod types;

use std::sync::Arc;

use atelier_config::Config;

pub use client::{BackendClient, BackendResponse};
pub use error::{DownloadError, ImageGenError, Result};
pub use fetch::{Fetcher, ImageRef, RetryPolicy};
pub use handler::{HandlerContext, ImageHandler};
pub use job::{AsyncJob, JobStatus, PollOutcome, PollPolicy};
pub use normalize::Normalized;
pub use registry::{BackendFamily, family_of, supported_models};
pub use server::{ImageGenServerBuilder, Server};
pub use types::{
    AspectRatio, GenerationRequest, GenerationResult, ImageSize, ParseValueError,
    ResponseMetadata, Warning, WarningKind,
};

/// Re-exported so callers can build a [`GenerationRequest`] without a direct dependency
pub use tokio_util::sync::CancellationToken;

/// Build the image generation facade from configuration
///
/// # Errors
///
/// Returns an error if the configuration names an unknown backend family or
/// the HTTP client cannot be created
pub fn build_server(config: &Config) -> anyhow::Result<Arc<Server>> {
    let server = Arc::new(
        ImageGenServerBuilder::new(config)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to initialize image generation server: {e}"))?,
    );
    Ok(server)
}
