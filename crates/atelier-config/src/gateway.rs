use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

/// Default gateway base URL
pub const DEFAULT_GATEWAY_URL: &str = "https://api.302.ai";

/// Browser-like user agent sent when downloading generated assets
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Gateway configuration shared by every backend family
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Base URL all backend paths are resolved against
    #[serde(default = "default_base_url")]
    pub base_url: Url,
    /// API key sent as a bearer token
    #[serde(default)]
    pub api_key: Option<SecretString>,
    /// User agent override for asset downloads
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            user_agent: None,
        }
    }
}

impl GatewayConfig {
    /// User agent for asset downloads, falling back to the built-in default
    pub fn user_agent(&self) -> &str {
        self.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT)
    }
}

#[allow(clippy::expect_used)]
fn default_base_url() -> Url {
    Url::parse(DEFAULT_GATEWAY_URL).expect("valid default URL")
}

/// Override for a single backend family
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    /// Base URL override
    #[serde(default)]
    pub base_url: Option<Url>,
    /// API key override
    #[serde(default)]
    pub api_key: Option<SecretString>,
}
