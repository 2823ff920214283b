//! Synchronous Flux text-to-image models

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{
    HandlerContext, ImageHandler, ImageList, limit_count, requested_pixels, requested_ratio,
    with_extra,
};
use crate::{
    client::BackendResponse,
    error::Result,
    normalize::DEFAULT_GRANULARITY,
    types::{AspectRatio, GenerationRequest, GenerationResult, Warning},
};

const MIN_DIMENSION: u32 = 256;
const MAX_DIMENSION: u32 = 1440;
const MAX_IMAGES: u32 = 4;
const DEFAULT_RATIO: AspectRatio = AspectRatio::new(16, 9);

const ULTRA_RATIOS: &[AspectRatio] = &[
    AspectRatio::new(16, 9),
    AspectRatio::new(21, 9),
    AspectRatio::new(4, 3),
    AspectRatio::new(3, 2),
    AspectRatio::new(1, 1),
    AspectRatio::new(2, 3),
    AspectRatio::new(3, 4),
    AspectRatio::new(9, 16),
    AspectRatio::new(9, 21),
];

/// Flux models that take explicit pixel dimensions
pub(crate) struct FluxHandler {
    model_id: String,
    context: Arc<HandlerContext>,
}

pub(crate) fn create(model_id: String, context: Arc<HandlerContext>) -> Box<dyn ImageHandler> {
    Box::new(FluxHandler { model_id, context })
}

impl FluxHandler {
    fn body(request: &GenerationRequest) -> (Value, Vec<Warning>) {
        let mut warnings = Vec::new();
        let size = requested_pixels(
            request,
            DEFAULT_RATIO,
            (MIN_DIMENSION, MAX_DIMENSION, DEFAULT_GRANULARITY),
            &mut warnings,
        );
        let count = limit_count(request, MAX_IMAGES, &mut warnings);

        let mut body = json!({
            "prompt": request.prompt,
            "image_size": { "width": size.width, "height": size.height },
            "num_images": count,
        });
        if let Some(seed) = request.seed {
            body["seed"] = json!(seed);
        }

        (with_extra(body, &request.extra), warnings)
    }
}

#[async_trait]
impl ImageHandler for FluxHandler {
    async fn handle(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let (body, warnings) = Self::body(request);
        let path = format!("/302/submit/{}", self.model_id);

        let response: BackendResponse<ImageList> =
            self.context.client.post_json(&path, &body, request).await?;

        self.context
            .finish(&self.model_id, request, response.body.into_refs()?, warnings, response.headers)
            .await
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Flux 1.1 Ultra, which only takes an aspect ratio
pub(crate) struct FluxUltraHandler {
    model_id: String,
    context: Arc<HandlerContext>,
}

pub(crate) fn create_ultra(
    model_id: String,
    context: Arc<HandlerContext>,
) -> Box<dyn ImageHandler> {
    Box::new(FluxUltraHandler { model_id, context })
}

impl FluxUltraHandler {
    fn body(request: &GenerationRequest) -> (Value, Vec<Warning>) {
        let mut warnings = Vec::new();
        let ratio = requested_ratio(request, ULTRA_RATIOS, &mut warnings);
        limit_count(request, 1, &mut warnings);

        let mut body = json!({
            "prompt": request.prompt,
            "aspect_ratio": ratio.to_string(),
            "raw": false,
        });
        if let Some(seed) = request.seed {
            body["seed"] = json!(seed);
        }

        (with_extra(body, &request.extra), warnings)
    }
}

#[async_trait]
impl ImageHandler for FluxUltraHandler {
    async fn handle(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let (body, warnings) = Self::body(request);

        let response: BackendResponse<ImageList> = self
            .context
            .client
            .post_json("/302/submit/flux-v1.1-ultra", &body, request)
            .await?;

        self.context
            .finish(&self.model_id, request, response.body.into_refs()?, warnings, response.headers)
            .await
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
