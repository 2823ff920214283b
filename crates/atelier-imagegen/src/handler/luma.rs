use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{
    HandlerContext, ImageHandler, ImageList, ignore_seed, limit_count, requested_ratio, with_extra,
};
use crate::{
    client::BackendResponse,
    error::Result,
    types::{AspectRatio, GenerationRequest, GenerationResult, Warning},
};

const RATIOS: &[AspectRatio] = &[
    AspectRatio::new(16, 9),
    AspectRatio::new(1, 1),
    AspectRatio::new(3, 4),
    AspectRatio::new(4, 3),
    AspectRatio::new(9, 16),
    AspectRatio::new(9, 21),
    AspectRatio::new(21, 9),
];

/// Luma Photon and Photon Flash
pub(crate) struct LumaHandler {
    model_id: String,
    context: Arc<HandlerContext>,
}

pub(crate) fn create(model_id: String, context: Arc<HandlerContext>) -> Box<dyn ImageHandler> {
    Box::new(LumaHandler { model_id, context })
}

impl LumaHandler {
    fn body(request: &GenerationRequest) -> (Value, Vec<Warning>) {
        let mut warnings = Vec::new();
        let ratio = requested_ratio(request, RATIOS, &mut warnings);
        limit_count(request, 1, &mut warnings);
        ignore_seed(request, &mut warnings);

        let body = json!({
            "prompt": request.prompt,
            "aspect_ratio": ratio.to_string(),
        });

        (with_extra(body, &request.extra), warnings)
    }
}

#[async_trait]
impl ImageHandler for LumaHandler {
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
