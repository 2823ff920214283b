use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ImageGenError>;

/// Terminal failures of an image generation call
///
/// Non-fatal adjustments never appear here; they are reported as
/// [`Warning`](crate::Warning)s on the result instead.
#[derive(Debug, Error)]
pub enum ImageGenError {
    /// No handler is registered for the model identifier
    #[error("model '{model_id}' is not supported")]
    NotSupported { model_id: String },

    /// Backend response did not have the expected structure
    #[error("invalid backend response: {0}")]
    InvalidResponse(String),

    /// Backend explicitly reported a failure
    #[error("backend error{suffix}: {message}", suffix = code_suffix(.code))]
    Backend { message: String, code: Option<String> },

    /// Asynchronous job exceeded its wall-clock ceiling
    #[error("job {job_id} did not finish within {elapsed:?}")]
    PollTimeout { job_id: String, elapsed: Duration },

    /// Caller cancelled the call
    #[error("request cancelled")]
    Cancelled,

    /// A single asset exhausted its retry budget
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// Every asset of a batch failed to download
    #[error("all {count} image downloads failed", count = .urls.len())]
    AllDownloadsFailed { urls: Vec<String> },

    /// Backend reported success without any usable image
    #[error("backend reported success but returned no images")]
    EmptyResult,

    /// HTTP-layer failure of a submit, poll, or action request
    #[error("transport error{suffix}: {body}", suffix = status_suffix(.status))]
    Transport { status: Option<u16>, body: String },

    /// Facade was built from an inconsistent configuration
    #[error("configuration error: {0}")]
    Config(String),
}

/// A single asset download that failed on every attempt
#[derive(Debug, Clone, Error)]
#[error("failed to download {url}: {last_error}")]
pub struct DownloadError {
    pub url: String,
    pub last_error: String,
}

impl ImageGenError {
    /// Stable identifier for the error kind
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotSupported { .. } => "not_supported",
            Self::InvalidResponse(_) => "invalid_response",
            Self::Backend { .. } => "backend_error",
            Self::PollTimeout { .. } => "poll_timeout",
            Self::Cancelled => "cancelled",
            Self::Download(_) => "download_error",
            Self::AllDownloadsFailed { .. } => "all_downloads_failed",
            Self::EmptyResult => "empty_result",
            Self::Transport { .. } => "transport_error",
            Self::Config(_) => "config_error",
        }
    }

    /// Whether a caller may reasonably resubmit the same call
    ///
    /// The core itself never retries on this signal.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. }
                | Self::PollTimeout { .. }
                | Self::AllDownloadsFailed { .. }
                | Self::Download(_)
        )
    }

    pub(crate) fn transport(err: &reqwest::Error) -> Self {
        Self::Transport {
            status: err.status().map(|s| s.as_u16()),
            body: err.to_string(),
        }
    }
}

fn code_suffix(code: &Option<String>) -> String {
    code.as_ref().map(|c| format!(" ({c})")).unwrap_or_default()
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({s})")).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_display_includes_code() {
        let err = ImageGenError::Backend {
            message: "insufficient credits".into(),
            code: Some("1008".into()),
        };
        insta::assert_snapshot!(err, @"backend error (1008): insufficient credits");

        let err = ImageGenError::Backend {
            message: "job failed".into(),
            code: None,
        };
        insta::assert_snapshot!(err, @"backend error: job failed");
    }

    #[test]
    fn transport_error_display() {
        let err = ImageGenError::Transport {
            status: Some(502),
            body: "bad gateway".into(),
        };
        insta::assert_snapshot!(err, @"transport error (502): bad gateway");
    }

    #[test]
    fn download_failures_display() {
        let err = ImageGenError::from(DownloadError {
            url: "https://cdn.example/a.png".into(),
            last_error: "HTTP status 404".into(),
        });
        insta::assert_snapshot!(
            err,
            @"failed to download https://cdn.example/a.png: HTTP status 404"
        );

        let err = ImageGenError::AllDownloadsFailed {
            urls: vec!["a".into(), "b".into()],
        };
        insta::assert_snapshot!(err, @"all 2 image downloads failed");
    }

    #[test]
    fn kinds_are_distinct_for_timeout_and_cancel() {
        let timeout = ImageGenError::PollTimeout {
            job_id: "job-1".into(),
            elapsed: Duration::from_secs(300),
        };
        assert_eq!(timeout.kind(), "poll_timeout");
        assert_eq!(ImageGenError::Cancelled.kind(), "cancelled");
        assert_eq!(
            ImageGenError::NotSupported {
                model_id: "nope".into()
            }
            .kind(),
            "not_supported"
        );
    }

    #[test]
    fn retryability() {
        assert!(
            ImageGenError::Transport {
                status: Some(503),
                body: String::new()
            }
            .is_retryable()
        );
        assert!(ImageGenError::AllDownloadsFailed { urls: vec![] }.is_retryable());
        assert!(!ImageGenError::Cancelled.is_retryable());
        assert!(!ImageGenError::EmptyResult.is_retryable());
        assert!(
            !ImageGenError::Backend {
                message: "nsfw".into(),
                code: None
            }
            .is_retryable()
        );
    }
}
