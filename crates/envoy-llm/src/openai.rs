//! Responses-API client.
//!
//! One non-streaming request per completion: the system prompt and the user
//! text go in as two input messages, and every `output_text` part of every
//! `message` output item comes back newline-joined.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use envoy_core::completion::CompletionService;
use envoy_core::errors::CompletionError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub model: String,
    pub service_tier: String,
}

pub struct OpenAiCompletion {
    client: Client,
    api_key: SecretString,
    config: OpenAiConfig,
}

impl OpenAiCompletion {
    pub fn new(api_key: SecretString, config: OpenAiConfig) -> Result<Self, CompletionError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| CompletionError::InvalidRequest(format!("http client: {e}")))?;
        Ok(Self {
            client,
            api_key,
            config,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/responses", self.config.base_url.trim_end_matches('/'))
    }

    fn request_body(&self, system_prompt: &str, user_text: &str) -> serde_json::Value {
        json!({
            "model": self.config.model,
            "input": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_text},
            ],
            "service_tier": self.config.service_tier,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ResponsesBody {
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: Vec<ContentPart>,
}

#[derive(Debug, Deserialize)]
struct ContentPart {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

/// Join the `output_text` parts of all `message` items.
fn extract_output_text(body: &ResponsesBody) -> String {
    body.output
        .iter()
        .filter(|item| item.kind == "message")
        .flat_map(|item| item.content.iter())
        .filter(|part| part.kind == "output_text")
        .map(|part| part.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[async_trait]
impl CompletionService for OpenAiCompletion {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    #[instrument(skip_all, fields(model = %self.config.model))]
    async fn complete(
        &self,
        system_prompt: &str,
        user_text: &str,
    ) -> Result<String, CompletionError> {
        let resp = self
            .client
            .post(self.endpoint())
            .bearer_auth(self.api_key.expose_secret())
            .header("content-type", "application/json")
            .json(&self.request_body(system_prompt, user_text))
            .send()
            .await
            .map_err(|e| CompletionError::NetworkError(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(CompletionError::from_status(status, body));
        }

        let body: ResponsesBody = resp
            .json()
            .await
            .map_err(|e| CompletionError::MalformedResponse(e.to_string()))?;
        let text = extract_output_text(&body);
        debug!(chars = text.len(), "completion received");
        Ok(text)
    }
}
