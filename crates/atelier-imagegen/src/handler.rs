pub(crate) mod flux;
pub(crate) mod ideogram;
pub(crate) mod kling;
pub(crate) mod kontext;
pub(crate) mod luma;
pub(crate) mod midjourney;
pub(crate) mod minimax;
pub(crate) mod openai;
pub(crate) mod replicate;
pub(crate) mod soul;
pub(crate) mod stability;

use async_trait::async_trait;
use atelier_config::PollingConfig;
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::{
    client::BackendClient,
    error::{ImageGenError, Result},
    fetch::{Fetcher, ImageRef},
    job::PollPolicy,
    normalize::{
        DEFAULT_BASE_DIMENSION, closest_aspect_ratio, size_from_aspect_ratio,
        size_to_closest_aspect_ratio, snap_to_discrete_size_set, snap_to_granularity,
    },
    types::{
        AspectRatio, GenerationRequest, GenerationResult, ImageSize, ResponseMetadata, Warning,
    },
};

/// Translates the uniform request into one backend's protocol
#[async_trait]
pub trait ImageHandler: Send + Sync {
    /// Generate images for the given request
    async fn handle(&self, request: &GenerationRequest) -> Result<GenerationResult>;

    /// Model identifier this handler was resolved for
    fn model_id(&self) -> &str;
}

/// Collaborators shared by every handler of one backend family
#[derive(Debug)]
pub struct HandlerContext {
    pub client: BackendClient,
    pub fetcher: Fetcher,
    pub polling: PollingConfig,
}

impl HandlerContext {
    /// The family's built-in poll policy with configured overrides applied
    pub fn poll_policy(&self, defaults: PollPolicy) -> PollPolicy {
        defaults.with_overrides(&self.polling)
    }

    /// Materialize image references into the uniform result
    ///
    /// # Errors
    ///
    /// Returns [`ImageGenError::EmptyResult`] when the backend gave no image
    /// references, and propagates download failures
    pub async fn finish(
        &self,
        model_id: &str,
        request: &GenerationRequest,
        refs: Vec<ImageRef>,
        warnings: Vec<Warning>,
        headers: IndexMap<String, String>,
    ) -> Result<GenerationResult> {
        if refs.is_empty() {
            tracing::error!(model = model_id, "backend reported success without images");
            return Err(ImageGenError::EmptyResult);
        }

        let images = self.fetcher.materialize(refs, &request.cancellation).await?;
        if images.is_empty() {
            return Err(ImageGenError::EmptyResult);
        }

        for warning in &warnings {
            tracing::warn!(
                model = model_id,
                kind = %warning.kind,
                subject = %warning.subject,
                "{}",
                warning.detail
            );
        }
        tracing::info!(model = model_id, images = images.len(), "image generation complete");

        Ok(GenerationResult {
            images,
            warnings,
            response: ResponseMetadata {
                timestamp: jiff::Timestamp::now(),
                model_id: model_id.to_owned(),
                headers,
            },
        })
    }
}

/// `{"images": [{"url": ...}]}`, the response shape of fal-style backends
#[derive(Debug, Deserialize)]
pub(crate) struct ImageList {
    pub images: Option<Vec<ImageUrl>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ImageUrl {
    #[serde(default)]
    pub url: Option<String>,
}

impl ImageList {
    /// URL references in backend order
    ///
    /// A list without usable URLs yields no references; a body without the
    /// `images` field at all is malformed.
    pub fn into_refs(self) -> Result<Vec<ImageRef>> {
        let images = self.images.ok_or_else(|| missing("images"))?;
        Ok(images.into_iter().filter_map(|image| image.url).map(ImageRef::Url).collect())
    }
}

/// Clamp the requested count to what the backend can return in one call
pub(crate) fn limit_count(
    request: &GenerationRequest,
    max: u32,
    warnings: &mut Vec<Warning>,
) -> u32 {
    let requested = request.count();
    if requested <= max {
        return requested;
    }

    warnings.push(if max == 1 {
        Warning::unsupported(
            "count",
            format!("This model generates one image per call; {requested} were requested"),
        )
    } else {
        Warning::adjusted(
            "count",
            format!("{requested} images requested, this model returns at most {max}"),
        )
    });
    max
}

pub(crate) fn ignore_seed(request: &GenerationRequest, warnings: &mut Vec<Warning>) {
    if request.seed.is_some() {
        warnings.push(Warning::unsupported("seed", "This model does not support seeds"));
    }
}

pub(crate) fn ignore_size(request: &GenerationRequest, warnings: &mut Vec<Warning>) {
    if request.size.is_some() {
        warnings.push(Warning::unsupported("size", "This model does not support explicit sizes"));
    }
}

pub(crate) fn ignore_aspect_ratio(request: &GenerationRequest, warnings: &mut Vec<Warning>) {
    if request.aspect_ratio.is_some() {
        warnings.push(Warning::unsupported(
            "aspect_ratio",
            "This model does not support aspect ratios",
        ));
    }
}

/// Ratio for ratio-driven backends
///
/// An explicit ratio wins over a size; a size alone is converted to the
/// closest supported ratio; with neither the first supported ratio is used.
pub(crate) fn requested_ratio(
    request: &GenerationRequest,
    supported: &[AspectRatio],
    warnings: &mut Vec<Warning>,
) -> AspectRatio {
    match (request.aspect_ratio, request.size) {
        (Some(ratio), size) => {
            if size.is_some() {
                warnings.push(Warning::unsupported(
                    "size",
                    "This model uses aspect ratios; size is ignored when aspect_ratio is set",
                ));
            }
            closest_aspect_ratio(Some(ratio), supported).record(warnings)
        }
        (None, Some(size)) => size_to_closest_aspect_ratio(size, supported).record(warnings),
        (None, None) => closest_aspect_ratio(None, supported).record(warnings),
    }
}

/// Free-form pixel size for backends with a granularity constraint
///
/// A size wins over a ratio; a ratio alone is expanded around the
/// 1024 base; with neither `default_ratio` is used.
pub(crate) fn requested_pixels(
    request: &GenerationRequest,
    default_ratio: AspectRatio,
    (min, max, granularity): (u32, u32, u32),
    warnings: &mut Vec<Warning>,
) -> ImageSize {
    let size = match (request.size, request.aspect_ratio) {
        (Some(size), ratio) => {
            if ratio.is_some() {
                warnings.push(Warning::unsupported(
                    "aspect_ratio",
                    "This model uses pixel sizes; aspect_ratio is ignored when size is set",
                ));
            }
            size
        }
        (None, Some(ratio)) => size_from_aspect_ratio(ratio, DEFAULT_BASE_DIMENSION),
        (None, None) => size_from_aspect_ratio(default_ratio, DEFAULT_BASE_DIMENSION),
    };

    snap_to_granularity(size, min, max, granularity).record(warnings)
}

/// One of a backend's enumerated sizes
///
/// Without a size or ratio the first supported size is the default.
pub(crate) fn requested_discrete_size(
    request: &GenerationRequest,
    supported: &[ImageSize],
    warnings: &mut Vec<Warning>,
) -> ImageSize {
    let wanted = match (request.size, request.aspect_ratio) {
        (Some(size), ratio) => {
            if ratio.is_some() {
                warnings.push(Warning::unsupported(
                    "aspect_ratio",
                    "This model uses pixel sizes; aspect_ratio is ignored when size is set",
                ));
            }
            size
        }
        (None, Some(ratio)) => size_from_aspect_ratio(ratio, DEFAULT_BASE_DIMENSION),
        (None, None) => match supported.first() {
            Some(size) => return *size,
            None => ImageSize::new(DEFAULT_BASE_DIMENSION, DEFAULT_BASE_DIMENSION),
        },
    };

    snap_to_discrete_size_set(wanted, supported).record(warnings)
}

/// Merge the caller's backend-specific options into a request body
///
/// Keys from `extra` replace keys the handler set.
pub(crate) fn with_extra(mut body: Value, extra: &Map<String, Value>) -> Value {
    if let Value::Object(fields) = &mut body {
        fields.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    body
}

/// Read a string option from `extra`
pub(crate) fn extra_str<'a>(request: &'a GenerationRequest, key: &str) -> Option<&'a str> {
    request.extra.get(key).and_then(Value::as_str)
}

/// Missing-field error for a backend response
pub(crate) fn missing(field: &str) -> ImageGenError {
    ImageGenError::InvalidResponse(format!("response is missing `{field}`"))
}
