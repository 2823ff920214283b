use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{
    HandlerContext, ImageHandler, ImageUrl, ignore_seed, limit_count, missing, requested_ratio,
    with_extra,
};
use crate::{
    client::BackendResponse,
    error::{ImageGenError, Result},
    fetch::ImageRef,
    job::{AsyncJob, PollOutcome, PollPolicy},
    types::{AspectRatio, GenerationRequest, GenerationResult, Warning},
};

const GENERATIONS_PATH: &str = "/klingai/v1/images/generations";
const MAX_IMAGES: u32 = 9;

const RATIOS: &[AspectRatio] = &[
    AspectRatio::new(16, 9),
    AspectRatio::new(9, 16),
    AspectRatio::new(1, 1),
    AspectRatio::new(4, 3),
    AspectRatio::new(3, 4),
    AspectRatio::new(3, 2),
    AspectRatio::new(2, 3),
];

const POLL_POLICY: PollPolicy = PollPolicy::new(Duration::from_secs(3), Duration::from_secs(600))
    .with_request_timeout(Duration::from_secs(30));

/// Kling image models
pub(crate) struct KlingHandler {
    model_id: String,
    context: Arc<HandlerContext>,
}

pub(crate) fn create(model_id: String, context: Arc<HandlerContext>) -> Box<dyn ImageHandler> {
    Box::new(KlingHandler { model_id, context })
}

/// Envelope shared by submit and status responses
#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<TaskData>,
}

#[derive(Deserialize)]
struct TaskData {
    task_id: Option<String>,
    #[serde(default)]
    task_status: String,
    #[serde(default)]
    task_status_msg: Option<String>,
    #[serde(default)]
    task_result: Option<TaskResult>,
}

#[derive(Deserialize)]
struct TaskResult {
    #[serde(default)]
    images: Vec<ImageUrl>,
}

impl Envelope {
    /// Task payload of an envelope the backend accepted
    fn into_data(self) -> Result<TaskData> {
        if self.code != 0 {
            return Err(ImageGenError::Backend {
                message: self.message,
                code: Some(self.code.to_string()),
            });
        }
        self.data.ok_or_else(|| missing("data"))
    }
}

/// Image references of a finished task with the headers of its last poll
type Images = BackendResponse<Vec<ImageRef>>;

fn task_outcome(response: BackendResponse<Envelope>) -> Result<PollOutcome<Images>> {
    let BackendResponse { body, headers } = response;
    let data = body.into_data()?;

    Ok(match data.task_status.as_str() {
        "succeed" => {
            let refs = data
                .task_result
                .map(|result| result.images)
                .unwrap_or_default()
                .into_iter()
                .filter_map(|image| image.url)
                .map(ImageRef::Url)
                .collect();
            PollOutcome::Succeeded(BackendResponse { body: refs, headers })
        }
        "failed" => PollOutcome::Failed {
            message: data.task_status_msg.unwrap_or_else(|| "task failed".to_owned()),
            code: None,
        },
        _ => PollOutcome::Pending,
    })
}

impl KlingHandler {
    fn body(&self, request: &GenerationRequest) -> (Value, Vec<Warning>) {
        let mut warnings = Vec::new();
        let ratio = requested_ratio(request, RATIOS, &mut warnings);
        let n = limit_count(request, MAX_IMAGES, &mut warnings);
        ignore_seed(request, &mut warnings);

        let body = json!({
            "model_name": self.model_id,
            "prompt": request.prompt,
            "n": n,
            "aspect_ratio": ratio.to_string(),
        });

        (with_extra(body, &request.extra), warnings)
    }

    async fn fetch_task(
        &self,
        path: &str,
        request: &GenerationRequest,
    ) -> Result<PollOutcome<Images>> {
        task_outcome(self.context.client.get_json(path, request).await?)
    }
}

#[async_trait]
impl ImageHandler for KlingHandler {
    async fn handle(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let (body, warnings) = self.body(request);

        let submitted: BackendResponse<Envelope> =
            self.context.client.post_json(GENERATIONS_PATH, &body, request).await?;
        let task_id = submitted
            .body
            .into_data()?
            .task_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| missing("data.task_id"))?;
        tracing::debug!(model = %self.model_id, job_id = %task_id, "kling task submitted");

        let path = format!("{GENERATIONS_PATH}/{task_id}");
        let policy = self.context.poll_policy(POLL_POLICY);
        let images = AsyncJob::wait(task_id, &policy, &request.cancellation, || {
            self.fetch_task(&path, request)
        })
        .await?;

        self.context.finish(&self.model_id, request, images.body, warnings, images.headers).await
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
