use std::{num::NonZeroU32, path::PathBuf};

use anyhow::Context;
use atelier_imagegen::{AspectRatio, GenerationRequest, ImageSize};
use clap::Parser;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

/// Atelier image generation runner
#[derive(Debug, Parser)]
#[command(name = "atelier", about = "Generate images with any supported backend model")]
pub struct Args {
    /// Path to configuration file; built-in defaults are used when omitted
    #[arg(short, long, env = "ATELIER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Model identifier, e.g. `flux-pro` or `midjourney/7.0`
    #[arg(short, long, required_unless_present = "list_models")]
    pub model: Option<String>,

    /// Text prompt
    #[arg(short, long, required_unless_present = "list_models")]
    pub prompt: Option<String>,

    /// Requested pixel size, e.g. `1024x768`
    #[arg(long)]
    pub size: Option<ImageSize>,

    /// Requested aspect ratio, e.g. `16:9`
    #[arg(long)]
    pub aspect_ratio: Option<AspectRatio>,

    /// Number of images
    #[arg(short = 'n', long)]
    pub count: Option<NonZeroU32>,

    /// Seed for reproducible output
    #[arg(long, allow_negative_numbers = true)]
    pub seed: Option<i64>,

    /// Backend-specific options as a JSON object
    #[arg(long)]
    pub extra: Option<String>,

    /// Header forwarded to the backend, as `NAME=VALUE`; repeatable
    #[arg(long = "header", value_name = "NAME=VALUE")]
    pub headers: Vec<String>,

    /// Directory the images are written to
    #[arg(short, long, default_value = ".")]
    pub out: PathBuf,

    /// Override the log filter directive
    #[arg(long, env = "ATELIER_LOG")]
    pub log_filter: Option<String>,

    /// Print every supported model id and exit
    #[arg(long)]
    pub list_models: bool,
}

impl Args {
    /// The generation call described by the arguments
    ///
    /// # Errors
    ///
    /// Returns an error if `--extra` is not a JSON object or a header has no `=`
    pub fn request(&self, cancellation: CancellationToken) -> anyhow::Result<GenerationRequest> {
        let prompt = self.prompt.clone().context("--prompt is required")?;
        let mut request = GenerationRequest::new(prompt).with_cancellation(cancellation);

        if let Some(count) = self.count {
            request = request.with_count(count);
        }
        if let Some(size) = self.size {
            request = request.with_size(size);
        }
        if let Some(ratio) = self.aspect_ratio {
            request = request.with_aspect_ratio(ratio);
        }
        if let Some(seed) = self.seed {
            request = request.with_seed(seed);
        }

        if let Some(raw) = &self.extra {
            let extra: Map<String, Value> =
                serde_json::from_str(raw).context("--extra must be a JSON object")?;
            for (key, value) in extra {
                request = request.with_extra(key, value);
            }
        }

        for header in &self.headers {
            let (name, value) = header
                .split_once('=')
                .with_context(|| format!("invalid header '{header}', expected NAME=VALUE"))?;
            request = request.with_header(name.trim(), value.trim());
        }

        Ok(request)
    }
}
