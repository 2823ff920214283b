//! Submit-then-poll job tracking for asynchronous backends

use std::future::Future;
use std::time::Duration;

use atelier_config::PollingConfig;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{ImageGenError, Result};

/// Lifecycle of a submitted job
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl JobStatus {
    /// Terminal states have no outgoing transitions
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// What a single status request observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// Still running
    Pending,
    /// Finished with a usable payload
    Succeeded(T),
    /// Finished with a backend-reported failure
    Failed { message: String, code: Option<String> },
}

/// Fixed-interval schedule with a wall-clock ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay between the end of one status request and the next
    pub interval: Duration,
    /// Ceiling measured from job submission
    pub timeout: Duration,
    /// Bound on each individual status request
    pub request_timeout: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(300),
            request_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl PollPolicy {
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            request_timeout: None,
        }
    }

    #[must_use]
    pub const fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = Some(request_timeout);
        self
    }

    /// Replace built-in values with the ones set in configuration
    #[must_use]
    pub fn with_overrides(self, config: &PollingConfig) -> Self {
        Self {
            interval: config.interval.unwrap_or(self.interval),
            timeout: config.timeout.unwrap_or(self.timeout),
            request_timeout: config.request_timeout.or(self.request_timeout),
        }
    }
}

/// A backend job tracked from submission to a terminal state
#[derive(Debug)]
pub struct AsyncJob<T> {
    id: String,
    status: JobStatus,
    submitted_at: Instant,
    result: Option<T>,
}

impl<T> AsyncJob<T> {
    /// Start tracking a job the backend just accepted
    pub fn submitted(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: JobStatus::Pending,
            submitted_at: Instant::now(),
            result: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub const fn status(&self) -> JobStatus {
        self.status
    }

    pub const fn submitted_at(&self) -> Instant {
        self.submitted_at
    }

    pub const fn result(&self) -> Option<&T> {
        self.result.as_ref()
    }

    pub fn into_result(self) -> Option<T> {
        self.result
    }

    /// Move to `next` unless the job already reached a terminal state
    pub fn transition(&mut self, next: JobStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = next;
        true
    }

    /// Poll until the job reaches a terminal state
    ///
    /// `fetch` issues one status request. Polls are strictly sequential and
    /// separated by the policy interval. The ceiling is checked before every
    /// poll and the wait in between is cut short so the ceiling is observed
    /// the moment it elapses. Cancellation aborts an in-flight status request
    /// as well as a pending wait.
    ///
    /// A job that already reached a terminal state is not polled again: a
    /// succeeded job returns `Ok` and any other terminal state is reported
    /// as its error.
    ///
    /// # Errors
    ///
    /// - [`ImageGenError::Backend`] when the backend reports a failure
    /// - [`ImageGenError::PollTimeout`] when the ceiling elapses first
    /// - [`ImageGenError::Cancelled`] when `cancel` fires
    /// - any error returned by `fetch`, which ends the job immediately
    pub async fn run<F, Fut>(
        &mut self,
        policy: &PollPolicy,
        cancel: &CancellationToken,
        mut fetch: F,
    ) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<PollOutcome<T>>>,
    {
        if let Some(err) = self.ended_error() {
            return Err(err);
        }

        let mut polls = 0u32;

        while !self.status.is_terminal() {
            let elapsed = self.submitted_at.elapsed();
            if elapsed >= policy.timeout {
                return Err(self.time_out(elapsed));
            }

            let remaining = policy.timeout - elapsed;
            let budget = policy.request_timeout.map_or(remaining, |t| t.min(remaining));

            polls += 1;
            tracing::debug!(job_id = %self.id, poll = polls, "polling job status");

            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(self.cancel()),
                outcome = tokio::time::timeout(budget, fetch()) => outcome,
            };

            match outcome {
                Err(_) => {
                    let elapsed = self.submitted_at.elapsed();
                    if elapsed >= policy.timeout {
                        return Err(self.time_out(elapsed));
                    }
                    self.transition(JobStatus::Failed);
                    return Err(ImageGenError::Transport {
                        status: None,
                        body: format!("status request timed out after {budget:?}"),
                    });
                }
                Ok(Err(e)) => {
                    self.transition(JobStatus::Failed);
                    return Err(e);
                }
                Ok(Ok(PollOutcome::Succeeded(payload))) => {
                    self.transition(JobStatus::Succeeded);
                    self.result = Some(payload);
                    tracing::info!(
                        job_id = %self.id,
                        polls,
                        elapsed_ms = millis(self.submitted_at.elapsed()),
                        "job succeeded"
                    );
                    return Ok(());
                }
                Ok(Ok(PollOutcome::Failed { message, code })) => {
                    self.transition(JobStatus::Failed);
                    tracing::error!(job_id = %self.id, error = %message, "job failed");
                    return Err(ImageGenError::Backend { message, code });
                }
                Ok(Ok(PollOutcome::Pending)) => {}
            }

            let remaining = policy.timeout.saturating_sub(self.submitted_at.elapsed());
            let wait = policy.interval.min(remaining);

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(self.cancel()),
                () = tokio::time::sleep(wait) => {}
            }
        }

        Ok(())
    }

    /// Poll a freshly submitted job and hand back its payload
    ///
    /// # Errors
    ///
    /// See [`AsyncJob::run`]
    pub async fn wait<F, Fut>(
        id: impl Into<String>,
        policy: &PollPolicy,
        cancel: &CancellationToken,
        fetch: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<PollOutcome<T>>>,
    {
        let mut job = Self::submitted(id);
        job.run(policy, cancel, fetch).await?;
        job.into_result()
            .ok_or_else(|| ImageGenError::InvalidResponse("job finished without a result".into()))
    }

    /// Error describing a job that already ended without a result
    fn ended_error(&self) -> Option<ImageGenError> {
        match self.status {
            JobStatus::Pending | JobStatus::Succeeded => None,
            JobStatus::Failed => Some(ImageGenError::Backend {
                message: format!("job {} already failed", self.id),
                code: None,
            }),
            JobStatus::TimedOut => Some(ImageGenError::PollTimeout {
                job_id: self.id.clone(),
                elapsed: self.submitted_at.elapsed(),
            }),
            JobStatus::Cancelled => Some(ImageGenError::Cancelled),
        }
    }

    fn time_out(&mut self, elapsed: Duration) -> ImageGenError {
        self.transition(JobStatus::TimedOut);
        tracing::error!(job_id = %self.id, elapsed_ms = millis(elapsed), "job timed out");
        ImageGenError::PollTimeout {
            job_id: self.id.clone(),
            elapsed,
        }
    }

    fn cancel(&mut self) -> ImageGenError {
        self.transition(JobStatus::Cancelled);
        tracing::debug!(job_id = %self.id, "job cancelled");
        ImageGenError::Cancelled
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
