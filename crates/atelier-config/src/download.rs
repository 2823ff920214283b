use std::time::Duration;

use serde::Deserialize;

/// Retry policy for downloading generated assets
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DownloadConfig {
    /// Total attempts per asset, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles on every further attempt
    #[serde(default = "default_base_delay", deserialize_with = "crate::duration::deserialize")]
    pub base_delay: Duration,
    /// Upper bound for the exponential delay, before jitter
    #[serde(default = "default_max_delay", deserialize_with = "crate::duration::deserialize")]
    pub max_delay: Duration,
    /// Upper bound for the random jitter added to every delay
    #[serde(default = "default_max_jitter", deserialize_with = "crate::duration::deserialize")]
    pub max_jitter: Duration,
    /// Time budget of a single attempt
    #[serde(default = "default_attempt_timeout", deserialize_with = "crate::duration::deserialize")]
    pub attempt_timeout: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            max_jitter: default_max_jitter(),
            attempt_timeout: default_attempt_timeout(),
        }
    }
}

const fn default_max_attempts() -> u32 {
    5
}

const fn default_base_delay() -> Duration {
    Duration::from_secs(2)
}

const fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

const fn default_max_jitter() -> Duration {
    Duration::from_secs(1)
}

const fn default_attempt_timeout() -> Duration {
    Duration::from_secs(120)
}
