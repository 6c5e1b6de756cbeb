//! HTTP client for the OpenAI-compatible model service

use super::types::ApiErrorBody;
use engram_core::{EngramError, EngramResult, ModelError};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

const PROVIDER: &str = "model-service";

/// Model-service HTTP client.
///
/// Connections are pooled and reused across calls; idle connections are
/// dropped after the keep-alive window so stale sockets are not reused.
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiClient {
    /// Create a new client.
    ///
    /// # Arguments
    /// * `base_url` - Service base URL, e.g. "http://localhost:11434/v1"
    /// * `api_key` - Optional bearer credential from the configuration channel
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> EngramResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(32)
            .pool_idle_timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| {
                EngramError::Model(ModelError::Unavailable {
                    reason: format!("Failed to build HTTP client: {}", e),
                })
            })?;

        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }

        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    /// Make an API request against an endpoint path.
    pub async fn request<Req: Serialize, Res: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: Req,
    ) -> EngramResult<Res> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body);

        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request.send().await.map_err(|e| {
            EngramError::Model(ModelError::Unavailable {
                reason: format!("HTTP request failed: {}", e),
            })
        })?;

        let status = response.status();

        if status.is_success() {
            response.json().await.map_err(|e| {
                EngramError::Model(ModelError::InvalidResponse {
                    provider: PROVIDER.to_string(),
                    reason: format!("Failed to parse response: {}", e),
                })
            })
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            let message = match serde_json::from_str::<ApiErrorBody>(&error_text) {
                Ok(api_error) => api_error.error.message,
                Err(_) => error_text,
            };

            Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    EngramError::Model(ModelError::RequestFailed {
                        provider: PROVIDER.to_string(),
                        status: status.as_u16() as i32,
                        message: "Authentication rejected".to_string(),
                    })
                }
                _ => EngramError::Model(ModelError::RequestFailed {
                    provider: PROVIDER.to_string(),
                    status: status.as_u16() as i32,
                    message,
                }),
            })
        }
    }
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}
