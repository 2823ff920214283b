//! Programmatic configuration builder for integration tests

use std::time::Duration;

use atelier_config::{BackendConfig, Config, DownloadConfig, GatewayConfig, PollingConfig};
use secrecy::SecretString;

/// Builder for constructing test configurations
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Point every backend at `base_url` with fast polling and retries
    pub fn new(base_url: &str) -> Self {
        Self {
            config: Config {
                gateway: GatewayConfig {
                    base_url: base_url.parse().expect("valid URL"),
                    api_key: Some(SecretString::from("test-key")),
                    user_agent: Some("atelier-tests".to_owned()),
                },
                polling: PollingConfig {
                    interval: Some(Duration::from_millis(20)),
                    timeout: Some(Duration::from_secs(10)),
                    request_timeout: Some(Duration::from_secs(5)),
                },
                download: DownloadConfig {
                    max_attempts: 2,
                    base_delay: Duration::from_millis(10),
                    max_delay: Duration::from_millis(20),
                    max_jitter: Duration::ZERO,
                    attempt_timeout: Duration::from_secs(2),
                },
                ..Config::default()
            },
        }
    }

    /// Set the wall-clock ceiling of asynchronous jobs
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.config.polling.timeout = Some(timeout);
        self
    }

    /// Route one backend family to a different address
    pub fn with_backend(mut self, family: &str, base_url: &str) -> Self {
        self.config.backends.insert(
            family.to_owned(),
            BackendConfig {
                base_url: Some(base_url.parse().expect("valid URL")),
                api_key: Some(SecretString::from("family-key")),
            },
        );
        self
    }

    /// Build the final configuration
    pub fn build(self) -> Config {
        self.config
    }
}
