use std::time::Duration;

use serde::Deserialize;

/// Overrides for the poll policy of asynchronous backends
///
/// Every backend family ships its own interval and ceiling. Any value set
/// here replaces the built-in value for all families.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PollingConfig {
    /// Fixed delay between status requests (e.g. "2s")
    #[serde(default, deserialize_with = "crate::duration::deserialize_option")]
    pub interval: Option<Duration>,
    /// Wall-clock ceiling measured from job submission (e.g. "5m")
    #[serde(default, deserialize_with = "crate::duration::deserialize_option")]
    pub timeout: Option<Duration>,
    /// Timeout applied to each individual status request
    #[serde(default, deserialize_with = "crate::duration::deserialize_option")]
    pub request_timeout: Option<Duration>,
}
