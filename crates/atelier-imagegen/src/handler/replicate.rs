//! Replicate-hosted models that answer synchronously with a prediction record

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{
    HandlerContext, ImageHandler, ignore_seed, limit_count, missing, requested_pixels,
    requested_ratio, with_extra,
};
use crate::{
    client::BackendResponse,
    error::{ImageGenError, Result},
    fetch::ImageRef,
    types::{AspectRatio, GenerationRequest, GenerationResult, Warning},
};

const SDXL_BOUNDS: (u32, u32, u32) = (512, 1536, 64);

const QWEN_RATIOS: &[AspectRatio] = &[
    AspectRatio::new(1, 1),
    AspectRatio::new(16, 9),
    AspectRatio::new(9, 16),
    AspectRatio::new(3, 4),
    AspectRatio::new(4, 3),
];

pub(crate) struct ReplicateHandler {
    model_id: String,
    context: Arc<HandlerContext>,
}

pub(crate) fn create(model_id: String, context: Arc<HandlerContext>) -> Box<dyn ImageHandler> {
    Box::new(ReplicateHandler { model_id, context })
}

/// A finished prediction; `output` is a JSON-encoded list of URLs
#[derive(Deserialize)]
struct Prediction {
    status: Option<String>,
    #[serde(default)]
    output: Value,
    #[serde(default)]
    error: Option<String>,
}

impl ReplicateHandler {
    fn body(&self, request: &GenerationRequest) -> (Value, Vec<Warning>) {
        let mut warnings = Vec::new();
        limit_count(request, 1, &mut warnings);
        ignore_seed(request, &mut warnings);

        let body = if self.model_id == "sdxl" {
            let size = requested_pixels(request, AspectRatio::SQUARE, SDXL_BOUNDS, &mut warnings);
            json!({
                "prompt": request.prompt,
                "width": size.width.to_string(),
                "height": size.height.to_string(),
            })
        } else {
            let ratio = requested_ratio(request, QWEN_RATIOS, &mut warnings);
            json!({
                "prompt": request.prompt,
                "aspect_ratio": ratio.to_string(),
            })
        };

        (with_extra(body, &request.extra), warnings)
    }
}

fn image_refs(prediction: Prediction) -> Result<Vec<ImageRef>> {
    let status = prediction.status.ok_or_else(|| missing("status"))?;
    match status.as_str() {
        "succeeded" => {}
        "failed" | "canceled" => {
            return Err(ImageGenError::Backend {
                message: prediction.error.unwrap_or_else(|| "prediction failed".to_owned()),
                code: Some(status.clone()),
            });
        }
        other => {
            return Err(ImageGenError::InvalidResponse(format!(
                "unexpected prediction status `{other}`"
            )));
        }
    }

    let output = match prediction.output {
        Value::String(encoded) => serde_json::from_str(&encoded).unwrap_or(Value::String(encoded)),
        other => other,
    };

    let urls = match output {
        Value::String(url) => vec![url],
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| item.as_str().map(str::to_owned))
            .collect(),
        _ => return Err(missing("output")),
    };

    Ok(urls.into_iter().map(ImageRef::Url).collect())
}

#[async_trait]
impl ImageHandler for ReplicateHandler {
    async fn handle(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let (body, warnings) = self.body(request);
        let path = format!("/302/submit/{}", self.model_id);

        let response: BackendResponse<Prediction> =
            self.context.client.post_json(&path, &body, request).await?;

        let refs = image_refs(response.body)?;
        self.context.finish(&self.model_id, request, refs, warnings, response.headers).await
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
