use std::{collections::HashMap, sync::Arc, time::Duration};

use atelier_config::Config;
use reqwest::Client;
use strum::IntoEnumIterator;

use crate::{
    client::BackendClient,
    error::{ImageGenError, Result},
    fetch::{Fetcher, RetryPolicy},
    handler::{HandlerContext, ImageHandler},
    registry::{self, BackendFamily},
    types::{GenerationRequest, GenerationResult},
};

/// Uniform entry point that routes a generation call to its backend handler
pub struct Server {
    contexts: HashMap<BackendFamily, Arc<HandlerContext>>,
}

impl Server {
    /// Generate images with the handler registered for `model_id`
    ///
    /// Unknown model ids fail with [`ImageGenError::NotSupported`] before
    /// any network call is made.
    pub async fn generate(
        &self,
        model_id: &str,
        request: &GenerationRequest,
    ) -> Result<GenerationResult> {
        let handler = self.handler(model_id)?;

        tracing::debug!(model = model_id, "image generation handler resolved");

        handler.handle(request).await.inspect_err(|e| {
            tracing::error!(
                model = model_id,
                kind = e.kind(),
                error = %e,
                "image generation failed"
            );
        })
    }

    /// Handler for `model_id`, bound to its family's backend
    pub fn handler(&self, model_id: &str) -> Result<Box<dyn ImageHandler>> {
        registry::resolve(model_id, |family| {
            self.contexts.get(&family).cloned().ok_or_else(|| {
                ImageGenError::Config(format!("backend family {family} is not configured"))
            })
        })
    }
}

/// Builder for constructing the facade from configuration
pub struct ImageGenServerBuilder<'a> {
    config: &'a Config,
}

impl<'a> ImageGenServerBuilder<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    pub fn build(self) -> Result<Server> {
        let config = self.config;

        for name in config.backends.keys() {
            if name.parse::<BackendFamily>().is_err() {
                return Err(ImageGenError::Config(format!(
                    "unknown backend family '{name}' in [backends]"
                )));
            }
        }

        let http = http_client()?;
        let policy = RetryPolicy::from(&config.download);

        let mut contexts = HashMap::new();
        for family in BackendFamily::iter() {
            let overrides = config.backends.get(family.as_ref());

            let base_url = overrides
                .and_then(|backend| backend.base_url.clone())
                .unwrap_or_else(|| config.gateway.base_url.clone());
            let api_key = overrides
                .and_then(|backend| backend.api_key.clone())
                .or_else(|| config.gateway.api_key.clone());

            if overrides.is_some() {
                tracing::debug!(family = %family, base_url = %base_url, "using backend override");
            }

            let context = HandlerContext {
                client: BackendClient::new(http.clone(), base_url, api_key),
                fetcher: Fetcher::new(http.clone(), policy.clone(), config.gateway.user_agent()),
                polling: config.polling.clone(),
            };
            contexts.insert(family, Arc::new(context));
        }

        tracing::debug!(
            "Image generation server initialized with {} backend families",
            contexts.len()
        );

        Ok(Server { contexts })
    }
}

fn http_client() -> Result<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .pool_idle_timeout(Some(Duration::from_secs(30)))
        .tcp_nodelay(true)
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .build()
        .map_err(|e| ImageGenError::Config(format!("failed to build HTTP client: {e}")))
}
