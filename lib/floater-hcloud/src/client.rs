//! HTTP client for the Hetzner Cloud API

use std::time::Duration;

use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{HcloudError, Result};

/// Public Hetzner Cloud API endpoint
pub const DEFAULT_ENDPOINT: &str = "https://api.hetzner.cloud/v1";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HcloudClient wraps an authenticated HTTP client for the Hetzner Cloud API
pub struct HcloudClient {
    http: reqwest::Client,
    endpoint: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
}

impl HcloudClient {
    /// Create a client for the public API
    pub fn new(token: impl Into<String>) -> Result<Self> {
        Self::with_endpoint(token, DEFAULT_ENDPOINT)
    }

    /// Create a client against a custom API endpoint
    pub fn with_endpoint(token: impl Into<String>, endpoint: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("hcloud-metallb-floater/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    /// Base URL requests are issued against
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, path.trim_start_matches('/'))
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = self.url(path);
        debug!(url = %url, "GET");
        self.send(self.http.get(&url).query(query)).await
    }

    pub(crate) async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = self.url(path);
        debug!(url = %url, "POST");
        self.send(self.http.post(&url).json(body)).await
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.bearer_auth(&self.token).send().await?;
        let response = check_status(response).await?;
        Ok(response.json::<T>().await?)
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let (code, message) = match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(parsed) => (parsed.error.code, parsed.error.message),
        Err(_) => ("unknown".to_string(), body),
    };

    Err(HcloudError::Api {
        status: status.as_u16(),
        code,
        message,
    })
}
