//! Higgsfield Soul
//!
//! A submission fans out into jobs on the backend; the call is done once
//! every job completed, and fails as soon as one of them failed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{
    HandlerContext, ImageHandler, extra_str, limit_count, missing, requested_ratio, with_extra,
};
use crate::{
    client::BackendResponse,
    error::Result,
    fetch::ImageRef,
    job::{AsyncJob, PollOutcome, PollPolicy},
    types::{AspectRatio, GenerationRequest, GenerationResult, Warning},
};

const DEFAULT_QUALITY: &str = "1080p";
const QUALITIES: &[&str] = &["720p", "1080p"];

const RATIOS: &[AspectRatio] = &[
    AspectRatio::new(1, 1),
    AspectRatio::new(9, 16),
    AspectRatio::new(3, 4),
    AspectRatio::new(2, 3),
    AspectRatio::new(4, 3),
    AspectRatio::new(16, 9),
    AspectRatio::new(3, 2),
];

const POLL_POLICY: PollPolicy = PollPolicy::new(Duration::from_secs(2), Duration::from_secs(300))
    .with_request_timeout(Duration::from_secs(30));

pub(crate) struct SoulHandler {
    model_id: String,
    context: Arc<HandlerContext>,
}

pub(crate) fn create(model_id: String, context: Arc<HandlerContext>) -> Box<dyn ImageHandler> {
    Box::new(SoulHandler { model_id, context })
}

#[derive(Deserialize)]
struct SubmitResponse {
    id: Option<String>,
}

#[derive(Deserialize)]
struct TaskResponse {
    #[serde(default)]
    jobs: Vec<Job>,
}

#[derive(Deserialize)]
struct Job {
    #[serde(default)]
    status: String,
    #[serde(default)]
    results: Option<JobResults>,
}

#[derive(Deserialize)]
struct JobResults {
    raw: Option<RawResult>,
}

#[derive(Deserialize)]
struct RawResult {
    url: Option<String>,
}

type Images = BackendResponse<Vec<ImageRef>>;

fn task_outcome(response: BackendResponse<TaskResponse>) -> PollOutcome<Images> {
    let BackendResponse { body, headers } = response;

    let failed = body
        .jobs
        .iter()
        .map(|job| job.status.as_str())
        .find(|status| matches!(*status, "failed" | "nsfw"));
    if let Some(status) = failed {
        return PollOutcome::Failed {
            message: format!("a generation job ended with status `{status}`"),
            code: Some(status.to_owned()),
        };
    }

    if body.jobs.is_empty() || body.jobs.iter().any(|job| job.status != "completed") {
        return PollOutcome::Pending;
    }

    let refs = body
        .jobs
        .into_iter()
        .filter_map(|job| job.results?.raw?.url)
        .map(ImageRef::Url)
        .collect();
    PollOutcome::Succeeded(BackendResponse { body: refs, headers })
}

impl SoulHandler {
    fn body(request: &GenerationRequest) -> (Value, Vec<Warning>) {
        let mut warnings = Vec::new();
        let ratio = requested_ratio(request, RATIOS, &mut warnings);
        limit_count(request, 1, &mut warnings);

        let quality = match extra_str(request, "quality") {
            Some(quality) if QUALITIES.contains(&quality) => quality,
            Some(quality) => {
                warnings.push(Warning::adjusted(
                    "quality",
                    format!("quality {quality} is not supported, using {DEFAULT_QUALITY}"),
                ));
                DEFAULT_QUALITY
            }
            None => DEFAULT_QUALITY,
        };
        let seed = request.seed.unwrap_or_else(|| rand::rng().random_range(1..1_000_000));

        let mut extra = request.extra.clone();
        extra.remove("quality");

        let body = json!({
            "prompt": request.prompt,
            "aspect_ratio": ratio.to_string(),
            "quality": quality,
            "seed": seed,
            "enhance_prompt": false,
        });

        (with_extra(body, &extra), warnings)
    }

    async fn fetch_task(
        &self,
        path: &str,
        request: &GenerationRequest,
    ) -> Result<PollOutcome<Images>> {
        let response = self.context.client.get_json(path, request).await?;
        Ok(task_outcome(response))
    }
}

#[async_trait]
impl ImageHandler for SoulHandler {
    async fn handle(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let (body, warnings) = Self::body(request);

        let submitted: BackendResponse<SubmitResponse> = self
            .context
            .client
            .post_json("/higgsfield/text2image/soul", &body, request)
            .await?;
        let id = submitted.body.id.filter(|id| !id.is_empty()).ok_or_else(|| missing("id"))?;
        tracing::debug!(model = %self.model_id, job_id = %id, "soul task submitted");

        let path = format!("/higgsfield/task/{id}/fetch");
        let policy = self.context.poll_policy(POLL_POLICY);
        let images = AsyncJob::wait(id, &policy, &request.cancellation, || {
            self.fetch_task(&path, request)
        })
        .await?;

        self.context.finish(&self.model_id, request, images.body, warnings, images.headers).await
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
