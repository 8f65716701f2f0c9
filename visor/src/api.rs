//! HTTP client for the Visor server API.
//!
//! All endpoints live under `/api/v1/`. Non-streaming calls use a 120 s
//! timeout; streamed build logs get an hour. Any non-2xx response surfaces
//! as [`ApiError::Status`] with the body attached — nothing here retries.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const API_PREFIX: &str = "/api/v1/";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
const STREAM_TIMEOUT: Duration = Duration::from_secs(3600);

/// A failed API call.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server responded {status}: {body}")]
    Status { status: u16, body: String },
}

/// Client bound to one server URL.
pub struct ApiClient {
    base: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(server_url: &str) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()?;
        Ok(Self {
            base: server_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}{}", self.base, API_PREFIX, path)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::Status {
            status: status.as_u16(),
            body,
        })
    }

    /// POST a JSON body, decode a JSON response.
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.post_json_with_timeout(path, body, None).await
    }

    /// [`ApiClient::post_json`] with a per-request timeout override.
    pub async fn post_json_with_timeout<B, T>(
        &self,
        path: &str,
        body: &B,
        timeout: Option<Duration>,
    ) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(path);
        debug!(%url, "post");
        let mut request = self.http.post(&url).json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = Self::check(request.send().await?).await?;
        Ok(response.json().await?)
    }

    /// GET a JSON response.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.url(path);
        debug!(%url, "get");
        let response = Self::check(self.http.get(&url).send().await?).await?;
        Ok(response.json().await?)
    }

    /// GET with a JSON body (the server reads selector arguments from the
    /// body on a few endpoints).
    pub async fn get_json_with_body<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(path);
        debug!(%url, "get");
        let response = Self::check(self.http.get(&url).json(body).send().await?).await?;
        Ok(response.json().await?)
    }

    /// GET a plain-text response.
    pub async fn get_text(&self, path: &str) -> Result<String, ApiError> {
        let url = self.url(path);
        debug!(%url, "get");
        let response = Self::check(self.http.get(&url).send().await?).await?;
        Ok(response.text().await?)
    }

    /// POST a JSON body and hand back the raw (status-checked) response for
    /// SSE consumption.
    pub async fn post_stream<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, ApiError> {
        let url = self.url(path);
        debug!(%url, "post (stream)");
        let response = self
            .http
            .post(&url)
            .json(body)
            .timeout(STREAM_TIMEOUT)
            .send()
            .await?;
        Self::check(response).await
    }
}
