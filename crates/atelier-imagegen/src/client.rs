use indexmap::IndexMap;
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::{Serialize, de::DeserializeOwned};
use url::Url;

use crate::{
    error::{ImageGenError, Result},
    types::GenerationRequest,
};

/// A decoded backend response plus its headers
#[derive(Debug, Clone)]
pub struct BackendResponse<T> {
    pub body: T,
    pub headers: IndexMap<String, String>,
}

/// JSON client for one backend family
///
/// Submit, poll, and action calls go through here. They fail fast: no call
/// is retried, and every call observes the request's cancellation token.
#[derive(Debug, Clone)]
pub struct BackendClient {
    http: Client,
    base_url: Url,
    api_key: Option<SecretString>,
}

impl BackendClient {
    pub const fn new(http: Client, base_url: Url, api_key: Option<SecretString>) -> Self {
        Self {
            http,
            base_url,
            api_key,
        }
    }

    /// Resolve `path` against the base URL; absolute URLs pass through
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_owned();
        }
        format!("{}{path}", self.base_url.as_str().trim_end_matches('/'))
    }

    /// POST a JSON body and decode the JSON response
    pub async fn post_json<B, T>(
        &self,
        path: &str,
        body: &B,
        request: &GenerationRequest,
    ) -> Result<BackendResponse<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(path);
        tracing::debug!(url = %url, "submitting backend request");
        self.send(self.http.post(&url).json(body), request).await
    }

    /// GET a JSON document
    pub async fn get_json<T>(
        &self,
        path: &str,
        request: &GenerationRequest,
    ) -> Result<BackendResponse<T>>
    where
        T: DeserializeOwned,
    {
        let url = self.url(path);
        tracing::debug!(url = %url, "fetching backend status");
        self.send(self.http.get(&url), request).await
    }

    async fn send<T>(
        &self,
        mut builder: RequestBuilder,
        request: &GenerationRequest,
    ) -> Result<BackendResponse<T>>
    where
        T: DeserializeOwned,
    {
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = tokio::select! {
            biased;
            () = request.cancellation.cancelled() => return Err(ImageGenError::Cancelled),
            response = builder.send() => response.map_err(|e| {
                tracing::error!(error = %e, "backend request failed");
                ImageGenError::transport(&e)
            })?,
        };

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| Some((name.to_string(), value.to_str().ok()?.to_owned())))
            .collect();

        let body = tokio::select! {
            biased;
            () = request.cancellation.cancelled() => return Err(ImageGenError::Cancelled),
            body = response.bytes() => body.map_err(|e| ImageGenError::transport(&e))?,
        };

        if !status.is_success() {
            let text = String::from_utf8_lossy(&body).into_owned();
            tracing::error!(status = %status, "backend returned an error status");
            return Err(ImageGenError::Transport {
                status: Some(status.as_u16()),
                body: text,
            });
        }

        let body = serde_json::from_slice(&body)
            .map_err(|e| ImageGenError::InvalidResponse(format!("unexpected response body: {e}")))?;

        Ok(BackendResponse { body, headers })
    }
}
