//! Midjourney and Niji Journey
//!
//! Generation happens in two stages. The imagine job renders a grid of four
//! drafts; each requested image is then an upscale action (`U1`..`U4`) on
//! that grid, tracked as its own job.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{HandlerContext, ImageHandler, limit_count, missing, with_extra};
use crate::{
    client::BackendResponse,
    error::{ImageGenError, Result},
    fetch::ImageRef,
    job::{AsyncJob, PollOutcome, PollPolicy},
    normalize::size_to_closest_aspect_ratio,
    types::{GenerationRequest, GenerationResult, Warning},
};

const MAX_UPSCALES: u32 = 4;

/// Submit codes meaning the task was accepted (submitted, queued)
const ACCEPTED_CODES: [i64; 2] = [1, 22];

const POLL_POLICY: PollPolicy = PollPolicy::new(Duration::from_secs(3), Duration::from_secs(600))
    .with_request_timeout(Duration::from_secs(30));

pub(crate) struct MidjourneyHandler {
    model_id: String,
    context: Arc<HandlerContext>,
}

pub(crate) fn create(model_id: String, context: Arc<HandlerContext>) -> Box<dyn ImageHandler> {
    Box::new(MidjourneyHandler { model_id, context })
}

#[derive(Deserialize)]
struct SubmitResponse {
    code: i64,
    #[serde(default)]
    description: String,
    #[serde(default)]
    result: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Task {
    #[serde(default)]
    status: String,
    #[serde(default)]
    fail_reason: Option<String>,
    #[serde(default)]
    image_url: Option<String>,
    #[serde(default)]
    buttons: Vec<Button>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Button {
    custom_id: String,
    #[serde(default)]
    label: String,
}

impl Task {
    fn upscale_button(&self, index: u32) -> Result<&str> {
        let label = format!("U{index}");
        self.buttons
            .iter()
            .find(|button| button.label == label)
            .map(|button| button.custom_id.as_str())
            .ok_or_else(|| ImageGenError::InvalidResponse(format!("task has no {label} button")))
    }
}

fn task_outcome(response: BackendResponse<Task>) -> PollOutcome<BackendResponse<Task>> {
    match response.body.status.as_str() {
        "SUCCESS" => PollOutcome::Succeeded(response),
        "FAILED" => PollOutcome::Failed {
            message: response
                .body
                .fail_reason
                .filter(|reason| !reason.is_empty())
                .unwrap_or_else(|| "task failed".to_owned()),
            code: None,
        },
        _ => PollOutcome::Pending,
    }
}

/// The job id returned by an imagine or action submission
fn accepted_task_id(response: SubmitResponse) -> Result<String> {
    if !ACCEPTED_CODES.contains(&response.code) {
        return Err(ImageGenError::Backend {
            message: response.description,
            code: Some(response.code.to_string()),
        });
    }

    match response.result {
        Some(Value::String(id)) if !id.is_empty() => Ok(id),
        Some(Value::Number(id)) => Ok(id.to_string()),
        _ => Err(missing("result")),
    }
}

impl MidjourneyHandler {
    fn is_niji(&self) -> bool {
        self.model_id.starts_with("nijijourney/")
    }

    fn version_flag(&self) -> String {
        let version = self.model_id.split_once('/').map_or("7.0", |(_, version)| version);
        if self.is_niji() {
            let major = version.split('.').next().unwrap_or(version);
            format!("--niji {major}")
        } else {
            format!("--v {version}")
        }
    }

    fn body(&self, request: &GenerationRequest) -> (Value, u32, Vec<Warning>) {
        let mut warnings = Vec::new();
        let upscales = limit_count(request, MAX_UPSCALES, &mut warnings);

        let ratio = match (request.aspect_ratio, request.size) {
            (Some(ratio), _) => Some(ratio),
            (None, Some(size)) => Some(size_to_closest_aspect_ratio(size, &[]).value),
            (None, None) => None,
        };

        let mut prompt = request.prompt.trim().to_owned();
        if let Some(ratio) = ratio {
            prompt.push_str(&format!(" --ar {ratio}"));
        }
        if let Some(seed) = request.seed {
            prompt.push_str(&format!(" --seed {seed}"));
        }
        prompt.push(' ');
        prompt.push_str(&self.version_flag());

        let body = json!({
            "prompt": prompt,
            "botType": if self.is_niji() { "NIJI_JOURNEY" } else { "MID_JOURNEY" },
        });

        (with_extra(body, &request.extra), upscales, warnings)
    }

    async fn submit(
        &self,
        path: &str,
        body: &Value,
        request: &GenerationRequest,
    ) -> Result<String> {
        let response: BackendResponse<SubmitResponse> =
            self.context.client.post_json(path, body, request).await?;
        accepted_task_id(response.body)
    }

    async fn fetch_task(
        &self,
        path: &str,
        request: &GenerationRequest,
    ) -> Result<PollOutcome<BackendResponse<Task>>> {
        let response = self.context.client.get_json(path, request).await?;
        Ok(task_outcome(response))
    }

    async fn wait_for_task(
        &self,
        task_id: String,
        request: &GenerationRequest,
    ) -> Result<BackendResponse<Task>> {
        let policy = self.context.poll_policy(POLL_POLICY);
        let path = format!("/mj/task/{task_id}/fetch");

        AsyncJob::wait(task_id, &policy, &request.cancellation, || {
            self.fetch_task(&path, request)
        })
        .await
    }

    async fn upscale(
        &self,
        grid_task_id: &str,
        custom_id: &str,
        index: u32,
        request: &GenerationRequest,
    ) -> Result<BackendResponse<Task>> {
        let body = json!({ "customId": custom_id, "taskId": grid_task_id });
        let task_id = self.submit("/mj/submit/action", &body, request).await?;

        tracing::info!(model = %self.model_id, job_id = %task_id, index, "upscale submitted");

        self.wait_for_task(task_id, request).await
    }
}

#[async_trait]
impl ImageHandler for MidjourneyHandler {
    async fn handle(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let (body, upscales, warnings) = self.body(request);

        let grid_id = self.submit("/mj/submit/imagine", &body, request).await?;
        tracing::debug!(model = %self.model_id, job_id = %grid_id, "imagine submitted");

        let grid = self.wait_for_task(grid_id.clone(), request).await?;

        let buttons = (1..=upscales)
            .map(|index| grid.body.upscale_button(index).map(|id| (index, id.to_owned())))
            .collect::<Result<Vec<_>>>()?;

        let upscaled = try_join_all(
            buttons
                .iter()
                .map(|(index, custom_id)| self.upscale(&grid_id, custom_id, *index, request)),
        )
        .await?;

        let headers = upscaled
            .last()
            .map_or_else(|| grid.headers.clone(), |task| task.headers.clone());
        let refs = upscaled
            .into_iter()
            .map(|task| task.body.image_url.filter(|url| !url.is_empty()).map(ImageRef::Url))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| missing("imageUrl"))?;

        self.context.finish(&self.model_id, request, refs, warnings, headers).await
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU32;

    use indexmap::IndexMap;

    use super::*;
    use crate::{
        handler::test_support::context,
        types::{AspectRatio, ImageSize},
    };

    fn handler(model_id: &str) -> MidjourneyHandler {
        MidjourneyHandler {
            model_id: model_id.to_owned(),
            context: Arc::new(context()),
        }
    }

    fn task(value: Value) -> BackendResponse<Task> {
        BackendResponse {
            body: serde_json::from_value(value).unwrap(),
            headers: IndexMap::new(),
        }
    }

    #[test]
    fn prompt_carries_ratio_seed_and_version() {
        let request = GenerationRequest::new("a koi pond ")
            .with_aspect_ratio(AspectRatio::new(16, 9))
            .with_seed(77);
        let (body, upscales, warnings) = handler("midjourney/6.1").body(&request);

        assert_eq!(
            body,
            json!({
                "prompt": "a koi pond --ar 16:9 --seed 77 --v 6.1",
                "botType": "MID_JOURNEY",
            })
        );
        assert_eq!(upscales, 1);
        assert!(warnings.is_empty());
    }

    #[test]
    fn niji_uses_its_own_bot_and_flag() {
        let request = GenerationRequest::new("x").with_size(ImageSize::new(1920, 1080));
        let (body, _, _) = handler("nijijourney/6.0").body(&request);

        assert_eq!(body["prompt"], "x --ar 16:9 --niji 6");
        assert_eq!(body["botType"], "NIJI_JOURNEY");
    }

    #[test]
    fn upscales_are_capped_at_four() {
        let request = GenerationRequest::new("x").with_count(NonZeroU32::new(6).unwrap());
        let (_, upscales, warnings) = handler("midjourney/7.0").body(&request);

        assert_eq!(upscales, 4);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn submit_codes() {
        let accepted = |code, result: Value| {
            accepted_task_id(SubmitResponse {
                code,
                description: "Submit success".to_owned(),
                result: Some(result),
            })
        };

        assert_eq!(accepted(1, json!("1712345")).unwrap(), "1712345");
        assert_eq!(accepted(22, json!(1_712_346)).unwrap(), "1712346");

        let err = accepted(24, json!(null)).unwrap_err();
        insta::assert_snapshot!(err, @"backend error (24): Submit success");
    }

    #[test]
    fn task_statuses_map_to_outcomes() {
        let outcome = |value| task_outcome(task(value));

        assert!(matches!(outcome(json!({ "status": "IN_PROGRESS" })), PollOutcome::Pending));
        assert!(matches!(outcome(json!({ "status": "NOT_START" })), PollOutcome::Pending));
        assert!(matches!(outcome(json!({ "status": "SUCCESS" })), PollOutcome::Succeeded(_)));
        assert!(matches!(
            outcome(json!({ "status": "FAILED", "failReason": "banned prompt" })),
            PollOutcome::Failed { message, code: None } if message == "banned prompt"
        ));
    }

    #[test]
    fn finds_upscale_buttons_by_label() {
        let grid = task(json!({
            "status": "SUCCESS",
            "buttons": [
                { "customId": "MJ::JOB::upsample::1::abc", "label": "U1" },
                { "customId": "MJ::JOB::variation::1::abc", "label": "V1" },
                { "customId": "MJ::JOB::upsample::2::abc", "label": "U2" },
            ]
        }));

        assert_eq!(grid.body.upscale_button(2).unwrap(), "MJ::JOB::upsample::2::abc");
        assert_eq!(grid.body.upscale_button(3).unwrap_err().kind(), "invalid_response");
    }
}
