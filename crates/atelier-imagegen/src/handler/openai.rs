use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{
    HandlerContext, ImageHandler, ignore_seed, limit_count, missing, requested_discrete_size,
    with_extra,
};
use crate::{
    client::BackendResponse,
    error::Result,
    fetch::ImageRef,
    types::{GenerationRequest, GenerationResult, ImageSize, Warning},
};

const GENERATIONS_PATH: &str = "/v1/images/generations";

/// Constraints of one model behind the `OpenAI`-compatible images endpoint
struct Profile {
    sizes: &'static [ImageSize],
    max_images: u32,
    seed: bool,
    response_format: Option<&'static str>,
}

const DALL_E_3: Profile = Profile {
    sizes: &[ImageSize::new(1024, 1024), ImageSize::new(1792, 1024), ImageSize::new(1024, 1792)],
    max_images: 1,
    seed: false,
    response_format: Some("url"),
};

const GPT_IMAGE: Profile = Profile {
    sizes: &[ImageSize::new(1024, 1024), ImageSize::new(1536, 1024), ImageSize::new(1024, 1536)],
    max_images: 10,
    seed: false,
    response_format: None,
};

const COGVIEW: Profile = Profile {
    sizes: &[
        ImageSize::new(1024, 1024),
        ImageSize::new(768, 1344),
        ImageSize::new(864, 1152),
        ImageSize::new(1344, 768),
        ImageSize::new(1152, 864),
        ImageSize::new(1440, 720),
        ImageSize::new(720, 1440),
    ],
    max_images: 1,
    seed: false,
    response_format: None,
};

const SEEDREAM: Profile = Profile {
    sizes: &[
        ImageSize::new(1024, 1024),
        ImageSize::new(864, 1152),
        ImageSize::new(1152, 864),
        ImageSize::new(1280, 720),
        ImageSize::new(720, 1280),
        ImageSize::new(832, 1248),
        ImageSize::new(1248, 832),
        ImageSize::new(1512, 648),
    ],
    max_images: 1,
    seed: true,
    response_format: Some("url"),
};

fn profile(model_id: &str) -> &'static Profile {
    if model_id.starts_with("gpt-image") {
        &GPT_IMAGE
    } else if model_id.starts_with("cogview") {
        &COGVIEW
    } else if model_id.starts_with("doubao-seedream") {
        &SEEDREAM
    } else {
        &DALL_E_3
    }
}

/// Models served through the `OpenAI`-compatible images endpoint
pub(crate) struct OpenAiHandler {
    model_id: String,
    context: Arc<HandlerContext>,
}

pub(crate) fn create(model_id: String, context: Arc<HandlerContext>) -> Box<dyn ImageHandler> {
    Box::new(OpenAiHandler { model_id, context })
}

/// Wire format for the images API response
#[derive(Deserialize)]
struct OpenAiImageResponse {
    data: Option<Vec<OpenAiImageData>>,
}

#[derive(Deserialize)]
struct OpenAiImageData {
    url: Option<String>,
    b64_json: Option<String>,
}

impl OpenAiHandler {
    fn body(&self, request: &GenerationRequest) -> (Value, Vec<Warning>) {
        let profile = profile(&self.model_id);
        let mut warnings = Vec::new();

        let size = requested_discrete_size(request, profile.sizes, &mut warnings);
        let n = limit_count(request, profile.max_images, &mut warnings);

        let mut body = json!({
            "model": self.model_id,
            "prompt": request.prompt,
            "n": n,
            "size": size.to_string(),
        });
        if let Some(format) = profile.response_format {
            body["response_format"] = json!(format);
        }
        match request.seed {
            Some(seed) if profile.seed => body["seed"] = json!(seed),
            _ => ignore_seed(request, &mut warnings),
        }

        (with_extra(body, &request.extra), warnings)
    }
}

#[async_trait]
impl ImageHandler for OpenAiHandler {
    async fn handle(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let (body, warnings) = self.body(request);

        tracing::debug!(model = %self.model_id, "sending image generation request");

        let response: BackendResponse<OpenAiImageResponse> =
            self.context.client.post_json(GENERATIONS_PATH, &body, request).await?;

        let data = response.body.data.ok_or_else(|| missing("data"))?;
        let refs = data
            .into_iter()
            .filter_map(|image| match (image.url, image.b64_json) {
                (Some(url), _) => Some(Ok(ImageRef::Url(url))),
                (None, Some(encoded)) => Some(ImageRef::from_base64(&encoded)),
                (None, None) => None,
            })
            .collect::<Result<Vec<_>>>()?;

        self.context.finish(&self.model_id, request, refs, warnings, response.headers).await
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU32;

    use super::*;
    use crate::{handler::test_support::context, types::WarningKind};

    fn handler(model_id: &str) -> OpenAiHandler {
        OpenAiHandler {
            model_id: model_id.to_owned(),
            context: Arc::new(context()),
        }
    }

    #[test]
    fn dall_e_rejects_seed_and_extra_images() {
        let request = GenerationRequest::new("a watercolor map")
            .with_seed(1)
            .with_count(NonZeroU32::new(2).unwrap());
        let (body, warnings) = handler("dall-e-3").body(&request);

        assert_eq!(
            body,
            json!({
                "model": "dall-e-3",
                "prompt": "a watercolor map",
                "n": 1,
                "size": "1024x1024",
                "response_format": "url",
            })
        );
        let subjects: Vec<_> = warnings.iter().map(|w| w.subject.as_str()).collect();
        assert_eq!(subjects, ["count", "seed"]);
        assert!(warnings.iter().all(|w| w.kind == WarningKind::UnsupportedSetting));
    }

    #[test]
    fn gpt_image_snaps_to_supported_size() {
        let request = GenerationRequest::new("x")
            .with_size(ImageSize::new(1600, 1000))
            .with_count(NonZeroU32::new(3).unwrap());
        let (body, warnings) = handler("gpt-image-1").body(&request);

        assert_eq!(body["size"], "1536x1024");
        assert_eq!(body["n"], 3);
        assert!(body.get("response_format").is_none());
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind, WarningKind::AdjustedValue);
    }

    #[test]
    fn seedream_keeps_seed() {
        let request = GenerationRequest::new("x").with_seed(1234);
        let (body, warnings) = handler("doubao-seedream-3-0-t2i-250415").body(&request);

        assert_eq!(body["seed"], 1234);
        assert!(warnings.is_empty());
    }

    #[test]
    fn cogview_profile_is_selected_by_prefix() {
        let request = GenerationRequest::new("x").with_size(ImageSize::new(1440, 720));
        let (body, warnings) = handler("cogview-4-250304").body(&request);

        assert_eq!(body["size"], "1440x720");
        assert!(warnings.is_empty());
    }
}
