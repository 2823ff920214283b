use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{HandlerContext, ImageHandler, limit_count, missing, requested_ratio, with_extra};
use crate::{
    client::BackendResponse,
    error::Result,
    fetch::ImageRef,
    types::{AspectRatio, GenerationRequest, GenerationResult, Warning},
};

const RATIOS: &[AspectRatio] = &[
    AspectRatio::new(1, 1),
    AspectRatio::new(10, 16),
    AspectRatio::new(16, 10),
    AspectRatio::new(9, 16),
    AspectRatio::new(16, 9),
    AspectRatio::new(3, 2),
    AspectRatio::new(2, 3),
    AspectRatio::new(4, 3),
    AspectRatio::new(3, 4),
    AspectRatio::new(1, 3),
    AspectRatio::new(3, 1),
];

/// Ideogram models, addressed as `ideogram/<version>`
pub(crate) struct IdeogramHandler {
    model_id: String,
    context: Arc<HandlerContext>,
}

pub(crate) fn create(model_id: String, context: Arc<HandlerContext>) -> Box<dyn ImageHandler> {
    Box::new(IdeogramHandler { model_id, context })
}

#[derive(Deserialize)]
struct IdeogramResponse {
    data: Option<Vec<IdeogramImage>>,
}

#[derive(Deserialize)]
struct IdeogramImage {
    url: Option<String>,
}

impl IdeogramHandler {
    fn version(&self) -> &str {
        self.model_id.split_once('/').map_or("V_2", |(_, version)| version)
    }

    fn body(&self, request: &GenerationRequest) -> (Value, Vec<Warning>) {
        let mut warnings = Vec::new();
        let ratio = requested_ratio(request, RATIOS, &mut warnings);
        limit_count(request, 1, &mut warnings);

        let mut image_request = json!({
            "prompt": request.prompt,
            "model": self.version(),
            "aspect_ratio": format!("ASPECT_{}_{}", ratio.width, ratio.height),
            "magic_prompt_option": "AUTO",
        });
        if let Some(seed) = request.seed {
            image_request["seed"] = json!(seed);
        }

        let image_request = with_extra(image_request, &request.extra);
        (json!({ "image_request": image_request }), warnings)
    }
}

#[async_trait]
impl ImageHandler for IdeogramHandler {
    async fn handle(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let (body, warnings) = self.body(request);

        let response: BackendResponse<IdeogramResponse> =
            self.context.client.post_json("/ideogram/generate", &body, request).await?;

        let refs = response
            .body
            .data
            .ok_or_else(|| missing("data"))?
            .into_iter()
            .filter_map(|image| image.url)
            .map(ImageRef::Url)
            .collect();

        self.context.finish(&self.model_id, request, refs, warnings, response.headers).await
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
