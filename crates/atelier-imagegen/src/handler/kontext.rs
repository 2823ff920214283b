//! Flux Kontext, which answers a submission with a URL to poll

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{HandlerContext, ImageHandler, limit_count, missing, with_extra};
use crate::{
    client::BackendResponse,
    error::Result,
    fetch::ImageRef,
    job::{AsyncJob, PollOutcome, PollPolicy},
    normalize::{clamp_aspect_ratio, size_to_closest_aspect_ratio},
    types::{AspectRatio, GenerationRequest, GenerationResult, Warning},
};

const MIN_RATIO: AspectRatio = AspectRatio::new(3, 7);
const MAX_RATIO: AspectRatio = AspectRatio::new(7, 3);

const POLL_POLICY: PollPolicy = PollPolicy::new(Duration::from_secs(2), Duration::from_secs(300))
    .with_request_timeout(Duration::from_secs(30));

pub(crate) struct KontextHandler {
    model_id: String,
    context: Arc<HandlerContext>,
}

pub(crate) fn create(model_id: String, context: Arc<HandlerContext>) -> Box<dyn ImageHandler> {
    Box::new(KontextHandler { model_id, context })
}

#[derive(Deserialize)]
struct SubmitResponse {
    id: Option<String>,
    #[serde(default)]
    polling_url: Option<String>,
}

#[derive(Deserialize)]
struct ResultResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    result: Option<ResultPayload>,
}

#[derive(Deserialize)]
struct ResultPayload {
    sample: Option<String>,
}

/// Sample URL of a ready result with the headers of its last poll
type Sample = BackendResponse<String>;

fn result_outcome(response: BackendResponse<ResultResponse>) -> Result<PollOutcome<Sample>> {
    let BackendResponse { body, headers } = response;

    let outcome = match body.status.as_str() {
        "Ready" => {
            let sample = body
                .result
                .and_then(|result| result.sample)
                .ok_or_else(|| missing("result.sample"))?;
            PollOutcome::Succeeded(BackendResponse { body: sample, headers })
        }
        status @ ("Error" | "Failed" | "Content Moderated" | "Request Moderated") => {
            PollOutcome::Failed {
                message: format!("generation ended with status `{status}`"),
                code: Some(status.to_owned()),
            }
        }
        _ => PollOutcome::Pending,
    };
    Ok(outcome)
}

impl KontextHandler {
    fn body(request: &GenerationRequest) -> (Value, Vec<Warning>) {
        let mut warnings = Vec::new();
        limit_count(request, 1, &mut warnings);

        let ratio = match (request.aspect_ratio, request.size) {
            (Some(ratio), size) => {
                if size.is_some() {
                    warnings.push(Warning::unsupported(
                        "size",
                        "This model uses aspect ratios; size is ignored when aspect_ratio is set",
                    ));
                }
                ratio
            }
            (None, Some(size)) => size_to_closest_aspect_ratio(size, &[]).value,
            (None, None) => AspectRatio::SQUARE,
        };
        let ratio = clamp_aspect_ratio(ratio, MIN_RATIO, MAX_RATIO).record(&mut warnings);

        let mut body = json!({
            "prompt": request.prompt,
            "aspect_ratio": ratio.to_string(),
            "output_format": "png",
        });
        if let Some(seed) = request.seed {
            body["seed"] = json!(seed);
        }

        (with_extra(body, &request.extra), warnings)
    }

    async fn fetch_result(
        &self,
        url: &str,
        request: &GenerationRequest,
    ) -> Result<PollOutcome<Sample>> {
        let response = self.context.client.get_json(url, request).await?;
        result_outcome(response)
    }
}

#[async_trait]
impl ImageHandler for KontextHandler {
    async fn handle(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let (body, warnings) = Self::body(request);
        let path = format!("/flux/v1/{}", self.model_id);

        let submitted: BackendResponse<SubmitResponse> =
            self.context.client.post_json(&path, &body, request).await?;
        let SubmitResponse { id, polling_url } = submitted.body;
        let id = id.filter(|id| !id.is_empty()).ok_or_else(|| missing("id"))?;

        let poll_url = polling_url
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| format!("/flux/v1/get_result?id={id}"));
        tracing::debug!(model = %self.model_id, job_id = %id, "kontext job submitted");

        let policy = self.context.poll_policy(POLL_POLICY);
        let sample = AsyncJob::wait(id, &policy, &request.cancellation, || {
            self.fetch_result(&poll_url, request)
        })
        .await?;

        let refs = vec![ImageRef::Url(sample.body)];
        self.context.finish(&self.model_id, request, refs, warnings, sample.headers).await
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::*;
    use crate::types::{ImageSize, WarningKind};

    fn outcome(value: Value) -> Result<PollOutcome<Sample>> {
        result_outcome(BackendResponse {
            body: serde_json::from_value(value).unwrap(),
            headers: IndexMap::new(),
        })
    }

    #[test]
    fn in_range_ratio_passes_through() {
        let request = GenerationRequest::new("x")
            .with_aspect_ratio(AspectRatio::new(16, 9))
            .with_seed(3);
        let (body, warnings) = KontextHandler::body(&request);

        assert_eq!(
            body,
            json!({
                "prompt": "x",
                "aspect_ratio": "16:9",
                "output_format": "png",
                "seed": 3,
            })
        );
        assert!(warnings.is_empty());
    }

    #[test]
    fn extreme_ratio_is_clamped() {
        let request = GenerationRequest::new("x").with_size(ImageSize::new(3000, 1000));
        let (body, warnings) = KontextHandler::body(&request);

        assert_eq!(body["aspect_ratio"], "21:9");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind, WarningKind::AdjustedValue);
    }

    #[test]
    fn defaults_to_square() {
        let (body, warnings) = KontextHandler::body(&GenerationRequest::new("x"));

        assert_eq!(body["aspect_ratio"], "1:1");
        assert!(warnings.is_empty());
    }

    #[test]
    fn statuses_map_to_outcomes() {
        assert!(matches!(outcome(json!({ "status": "Pending" })), Ok(PollOutcome::Pending)));
        assert!(matches!(outcome(json!({ "status": "Processing" })), Ok(PollOutcome::Pending)));
        assert!(matches!(
            outcome(json!({ "status": "Ready", "result": { "sample": "https://cdn/s.png" } })),
            Ok(PollOutcome::Succeeded(BackendResponse { body, .. })) if body == "https://cdn/s.png"
        ));
        assert!(matches!(
            outcome(json!({ "status": "Content Moderated" })),
            Ok(PollOutcome::Failed { code: Some(code), .. }) if code == "Content Moderated"
        ));
    }

    #[test]
    fn ready_without_sample_is_invalid() {
        let err = outcome(json!({ "status": "Ready", "result": {} })).unwrap_err();

        assert_eq!(err.kind(), "invalid_response");
        insta::assert_snapshot!(err, @"invalid backend response: response is missing `result.sample`");
    }
}
