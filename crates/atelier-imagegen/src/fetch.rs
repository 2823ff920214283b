//! Resilient download of generated assets

use std::future::Future;
use std::time::Duration;

use atelier_config::DownloadConfig;
use base64::Engine;
use bytes::Bytes;
use rand::Rng;
use reqwest::{
    Client,
    header::{ACCEPT, USER_AGENT},
};
use tokio_util::sync::CancellationToken;

use crate::error::{DownloadError, ImageGenError, Result};

/// Bounded retry schedule for a single asset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_jitter: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&DownloadConfig::default())
    }
}

impl From<&DownloadConfig> for RetryPolicy {
    fn from(config: &DownloadConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay,
            max_delay: config.max_delay,
            max_jitter: config.max_jitter,
            attempt_timeout: config.attempt_timeout,
        }
    }
}

impl RetryPolicy {
    /// Delay after the failed attempt with zero-based index `attempt`,
    /// before jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn delay(&self, attempt: u32) -> Duration {
        let jitter_ms = self.max_jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.backoff(attempt);
        }
        let jitter = Duration::from_millis(rand::rng().random_range(0..=jitter_ms));
        self.backoff(attempt) + jitter
    }
}

/// A generated image as returned by a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef {
    /// Remote asset to download
    Url(String),
    /// Bytes the backend returned inline
    Inline(Bytes),
}

impl ImageRef {
    /// Decode a base64 payload returned inline by the backend
    pub fn from_base64(encoded: &str) -> Result<Self> {
        base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map(|raw| Self::Inline(Bytes::from(raw)))
            .map_err(|e| ImageGenError::InvalidResponse(format!("undecodable inline image: {e}")))
    }
}

/// Downloads assets with bounded retries and batch partial-failure tolerance
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    policy: RetryPolicy,
    user_agent: String,
}

impl Fetcher {
    pub fn new(client: Client, policy: RetryPolicy, user_agent: impl Into<String>) -> Self {
        Self {
            client,
            policy,
            user_agent: user_agent.into(),
        }
    }

    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Download one asset, retrying transport failures and non-2xx statuses
    ///
    /// # Errors
    ///
    /// Returns [`ImageGenError::Download`] once every attempt failed, or
    /// [`ImageGenError::Cancelled`] as soon as `cancel` fires
    pub async fn fetch_one(&self, url: &str, cancel: &CancellationToken) -> Result<Bytes> {
        with_retries(&self.policy, cancel, url, move |attempt| self.attempt(url, attempt)).await
    }

    /// Download every asset concurrently, keeping the successes in request order
    ///
    /// # Errors
    ///
    /// Returns [`ImageGenError::AllDownloadsFailed`] only when no asset could
    /// be downloaded, or [`ImageGenError::Cancelled`] when `cancel` fires
    pub async fn fetch_all(
        &self,
        urls: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Bytes>> {
        let refs: Vec<_> = urls.iter().cloned().map(ImageRef::Url).collect();
        self.materialize(refs, cancel).await
    }

    /// Resolve backend image references into payloads, preserving order
    ///
    /// Inline payloads are taken as they are. Failed downloads are dropped
    /// as long as at least one image remains.
    ///
    /// # Errors
    ///
    /// Returns [`ImageGenError::AllDownloadsFailed`] when no image remains, or
    /// [`ImageGenError::Cancelled`] when `cancel` fires
    pub async fn materialize(
        &self,
        refs: Vec<ImageRef>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Bytes>> {
        let pending = refs.iter().map(|image| async move {
            match image {
                ImageRef::Inline(bytes) => Ok(bytes.clone()),
                ImageRef::Url(url) => self.fetch_one(url, cancel).await,
            }
        });

        let outcomes = futures::future::join_all(pending).await;

        let mut images = Vec::with_capacity(outcomes.len());
        let mut failed = Vec::new();

        for outcome in outcomes {
            match outcome {
                Ok(bytes) => images.push(bytes),
                Err(ImageGenError::Download(e)) => {
                    tracing::warn!(
                        url = %e.url,
                        error = %e.last_error,
                        "dropping image that failed to download"
                    );
                    failed.push(e.url);
                }
                Err(e) => return Err(e),
            }
        }

        if images.is_empty() && !failed.is_empty() {
            return Err(ImageGenError::AllDownloadsFailed { urls: failed });
        }

        Ok(images)
    }

    async fn attempt(&self, url: &str, attempt: u32) -> std::result::Result<Bytes, String> {
        tracing::debug!(url, attempt = attempt + 1, "downloading image");

        let response = self
            .client
            .get(url)
            .header(ACCEPT, "image/*")
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP status {}", status.as_u16()));
        }

        response.bytes().await.map_err(|e| e.to_string())
    }
}

/// Run `attempt` until it succeeds or the policy's attempt budget is spent
///
/// Each attempt is bounded by the policy's per-attempt timeout; a timed out
/// attempt counts against the budget like any other failure.
pub(crate) async fn with_retries<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    url: &str,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, String>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut index = 0;

    loop {
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ImageGenError::Cancelled),
            outcome = tokio::time::timeout(policy.attempt_timeout, attempt(index)) => outcome,
        };

        let last_error = match outcome {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => e,
            Err(_) => format!("attempt timed out after {:?}", policy.attempt_timeout),
        };

        if index + 1 >= max_attempts {
            return Err(DownloadError {
                url: url.to_owned(),
                last_error,
            }
            .into());
        }

        let delay = policy.delay(index);
        tracing::warn!(
            url,
            attempt = index + 1,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %last_error,
            "image download failed, retrying"
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ImageGenError::Cancelled),
            () = tokio::time::sleep(delay) => {}
        }

        index += 1;
    }
}
