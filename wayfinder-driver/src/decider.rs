use crate::error::{DriverError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, warn};

/// One request to an LLM-backed decider.
#[derive(Debug, Clone)]
pub struct DeciderRequest {
    pub system: String,
    pub user: String,
    pub timeout: Duration,
}

/// Text in, JSON out. Callers wrap every call in their own retry and timeout
/// handling and never assume low latency.
#[async_trait]
pub trait Decider: Send + Sync {
    async fn decide(&self, request: DeciderRequest) -> Result<Value>;
}

/// Decider backed by an OpenAI-compatible `/chat/completions` endpoint.
pub struct HttpDecider {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
}

impl HttpDecider {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: None,
            temperature: 0.2,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

#[async_trait]
impl Decider for HttpDecider {
    async fn decide(&self, request: DeciderRequest) -> Result<Value> {
        let mut builder = self
            .client
            .post(&self.endpoint)
            .timeout(request.timeout)
            .json(&json!({
                "model": self.model,
                "temperature": self.temperature,
                "messages": [
                    {"role": "system", "content": request.system},
                    {"role": "user", "content": request.user},
                ],
            }));
        if let Some(ref key) = self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                DriverError::Timeout {
                    operation: "decider call".to_string(),
                    ms: request.timeout.as_millis() as u64,
                }
            } else {
                DriverError::Http(e)
            }
        })?;

        let status = response.status();
        let body: Value = response.json().await?;

        if !status.is_success() {
            let message = body["error"]["message"]
                .as_str()
                .unwrap_or("unknown API error");
            warn!("Decider API error ({}): {}", status, message);
            return Err(DriverError::Decider(format!("{}: {}", status, message)));
        }

        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| DriverError::Decider(format!("no content in response: {}", body)))?;
        debug!("Decider replied with {} chars", content.len());

        parse_json_reply(content)
    }
}

/// Parses a model reply as JSON, tolerating markdown code fences.
pub fn parse_json_reply(content: &str) -> Result<Value> {
    let cleaned = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    serde_json::from_str(cleaned)
        .map_err(|e| DriverError::Parse(format!("decider reply is not JSON: {}", e)))
}
