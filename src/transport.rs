use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::ClientError;
use crate::settings::AppConfig;
use crate::shapes::GENERIC_FAILURE;

/// Uniform result of one backend call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// HTTP status of a failed call; `None` when the server never answered.
    #[serde(skip)]
    pub status: Option<u16>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self { success: true, data: Some(data), error: None, status: None }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self { success: false, data: None, error: Some(error.into()), status: None }
    }

    pub fn rejected(status: u16, error: impl Into<String>) -> Self {
        Self { status: Some(status), ..Self::fail(error) }
    }

    pub fn into_result(self) -> Result<T, ClientError> {
        match (self.success, self.data) {
            (true, Some(data)) => Ok(data),
            (true, None) => Err(ClientError::Decode("empty response body".into())),
            (false, _) => {
                let message = self.error.unwrap_or_else(|| GENERIC_FAILURE.into());
                Err(match self.status {
                    Some(status) => ClientError::Api { status: Some(status), message },
                    None => ClientError::Network(message),
                })
            }
        }
    }
}

fn accepts_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

#[derive(Clone)]
pub struct Transport {
    http: Client,
    base_url: String,
}

impl Transport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Network(e.to_string()))?;
        Ok(Self { http, base_url: base_url.into() })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, ClientError> {
        Self::new(config.api_base_url.clone(), config.request_timeout())
    }

    pub fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), endpoint.trim_start_matches('/'))
    }

    /// Issue one call. Never fails: transport and parse errors come back as
    /// `success: false` with a message.
    pub async fn request(&self, endpoint: &str, method: Method, body: Option<&Value>) -> ApiResponse<Value> {
        let url = self.url(endpoint);
        debug!(%method, %url, "request: called");
        let mut rb = self.http.request(method.clone(), &url).header("Content-Type", "application/json");
        if let Some(body) = body
            && accepts_body(&method)
        {
            rb = rb.json(body);
        }
        let resp = match rb.send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(%url, error = %e, "request: transport failure");
                return ApiResponse::fail(network_message(&e));
            }
        };
        let status = resp.status();
        let data: Value = match resp.json().await {
            Ok(v) => v,
            Err(e) => {
                warn!(%url, %status, error = %e, "request: body was not JSON");
                if status.is_success() {
                    return ApiResponse::rejected(status.as_u16(), network_message(&e));
                }
                Value::Null
            }
        };
        if !status.is_success() {
            let message = data
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or(GENERIC_FAILURE)
                .to_string();
            debug!(%url, %status, %message, "request: logical failure");
            return ApiResponse::rejected(status.as_u16(), message);
        }
        ApiResponse::ok(data)
    }
}

fn network_message(e: &reqwest::Error) -> String {
    let text = e.to_string();
    if text.is_empty() { "Network error".into() } else { text }
}
