use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{
    HandlerContext, ImageHandler, ImageList, ignore_seed, limit_count, requested_discrete_size,
    requested_ratio, with_extra,
};
use crate::{
    client::BackendResponse,
    error::Result,
    types::{AspectRatio, GenerationRequest, GenerationResult, ImageSize, Warning},
};

const SD3_SIZES: &[ImageSize] = &[
    ImageSize::new(1024, 1024),
    ImageSize::new(1024, 2048),
    ImageSize::new(1536, 1024),
    ImageSize::new(1536, 2048),
    ImageSize::new(2048, 1152),
    ImageSize::new(1152, 2048),
];

const SD3_MAX_BATCH: u32 = 4;

const RATIOS: &[AspectRatio] = &[
    AspectRatio::new(1, 1),
    AspectRatio::new(16, 9),
    AspectRatio::new(21, 9),
    AspectRatio::new(2, 3),
    AspectRatio::new(3, 2),
    AspectRatio::new(4, 5),
    AspectRatio::new(5, 4),
    AspectRatio::new(9, 16),
    AspectRatio::new(9, 21),
];

/// Stable Diffusion 3 family
///
/// `sd3` takes one of a fixed list of sizes and renders batches; the Ultra
/// and 3.5 models take an aspect ratio and render one image per call.
pub(crate) struct StabilityHandler {
    model_id: String,
    context: Arc<HandlerContext>,
}

pub(crate) fn create(model_id: String, context: Arc<HandlerContext>) -> Box<dyn ImageHandler> {
    Box::new(StabilityHandler { model_id, context })
}

impl StabilityHandler {
    fn path(&self) -> &'static str {
        match self.model_id.as_str() {
            "sd3" => "/302/submit/sd3",
            "sd3-ultra" => "/302/submit/sd3-ultra",
            _ => "/302/submit/sd35",
        }
    }

    fn body(&self, request: &GenerationRequest) -> (Value, Vec<Warning>) {
        let mut warnings = Vec::new();

        let body = if self.model_id == "sd3" {
            let size = requested_discrete_size(request, SD3_SIZES, &mut warnings);
            let batch_size = limit_count(request, SD3_MAX_BATCH, &mut warnings);
            ignore_seed(request, &mut warnings);

            json!({
                "prompt": request.prompt,
                "image_size": size.to_string(),
                "batch_size": batch_size,
            })
        } else {
            let ratio = requested_ratio(request, RATIOS, &mut warnings);
            limit_count(request, 1, &mut warnings);

            let mut body = json!({
                "prompt": request.prompt,
                "aspect_ratio": ratio.to_string(),
                "output_format": "png",
            });
            if self.model_id != "sd3-ultra" {
                body["model"] = json!(self.model_id);
                body["mode"] = json!("text-to-image");
            }
            if let Some(seed) = request.seed {
                body["seed"] = json!(seed);
            }
            body
        };

        (with_extra(body, &request.extra), warnings)
    }
}

#[async_trait]
impl ImageHandler for StabilityHandler {
    async fn handle(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let (body, warnings) = self.body(request);

        let response: BackendResponse<ImageList> =
            self.context.client.post_json(self.path(), &body, request).await?;

        self.context
            .finish(&self.model_id, request, response.body.into_refs()?, warnings, response.headers)
            .await
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
