use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{
    HandlerContext, ImageHandler, ignore_seed, limit_count, missing, requested_ratio, with_extra,
};
use crate::{
    client::BackendResponse,
    error::{ImageGenError, Result},
    fetch::ImageRef,
    types::{AspectRatio, GenerationRequest, GenerationResult, Warning},
};

const MODEL: &str = "image-01";
const MAX_IMAGES: u32 = 9;

const RATIOS: &[AspectRatio] = &[
    AspectRatio::new(1, 1),
    AspectRatio::new(16, 9),
    AspectRatio::new(4, 3),
    AspectRatio::new(3, 2),
    AspectRatio::new(2, 3),
    AspectRatio::new(3, 4),
    AspectRatio::new(9, 16),
    AspectRatio::new(21, 9),
];

/// Minimax `image-01`, which reports failures in-band with HTTP 200
pub(crate) struct MinimaxHandler {
    model_id: String,
    context: Arc<HandlerContext>,
}

pub(crate) fn create(model_id: String, context: Arc<HandlerContext>) -> Box<dyn ImageHandler> {
    Box::new(MinimaxHandler { model_id, context })
}

#[derive(Deserialize)]
struct MinimaxResponse {
    base_resp: Option<BaseResp>,
    data: Option<MinimaxData>,
}

#[derive(Deserialize)]
struct BaseResp {
    status_code: i64,
    #[serde(default)]
    status_msg: String,
}

#[derive(Deserialize)]
struct MinimaxData {
    #[serde(default)]
    image_urls: Vec<String>,
}

impl MinimaxHandler {
    fn body(request: &GenerationRequest) -> (Value, Vec<Warning>) {
        let mut warnings = Vec::new();
        let ratio = requested_ratio(request, RATIOS, &mut warnings);
        let n = limit_count(request, MAX_IMAGES, &mut warnings);
        ignore_seed(request, &mut warnings);

        let body = json!({
            "model": MODEL,
            "prompt": request.prompt,
            "aspect_ratio": ratio.to_string(),
            "n": n,
            "prompt_optimizer": false,
            "response_format": "url",
        });

        (with_extra(body, &request.extra), warnings)
    }
}

fn image_refs(response: MinimaxResponse) -> Result<Vec<ImageRef>> {
    let status = response.base_resp.ok_or_else(|| missing("base_resp"))?;
    if status.status_code != 0 {
        return Err(ImageGenError::Backend {
            message: status.status_msg,
            code: Some(status.status_code.to_string()),
        });
    }

    let data = response.data.ok_or_else(|| missing("data"))?;
    Ok(data.image_urls.into_iter().map(ImageRef::Url).collect())
}

#[async_trait]
impl ImageHandler for MinimaxHandler {
    async fn handle(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let (body, warnings) = Self::body(request);

        let response: BackendResponse<MinimaxResponse> = self
            .context
            .client
            .post_json("/minimaxi/v1/image_generation", &body, request)
            .await?;

        let refs = image_refs(response.body)?;
        self.context.finish(&self.model_id, request, refs, warnings, response.headers).await
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
