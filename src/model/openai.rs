// SPDX-License-Identifier: MIT

//! OpenAI Model - chat completions API

use super::{GenerationConfig, Model, ModelError};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::env;

const PROVIDER: &str = "OpenAI";

/// OpenAI chat completions model
pub struct OpenAIModel {
    client: Client,
    api_key: String,
    model_name: String,
    base_url: String,
}

impl OpenAIModel {
    /// Create a new OpenAIModel
    ///
    /// Requires `OPENAI_API_KEY` environment variable to be set.
    /// Optionally uses `OPENAI_BASE_URL` for custom endpoints.
    pub fn new(model_name: impl Into<String>) -> Result<Self, ModelError> {
        let api_key =
            env::var("OPENAI_API_KEY").map_err(|_| ModelError::ApiKeyMissing("OPENAI_API_KEY"))?;
        let base_url =
            env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string());

        Ok(Self {
            client: Client::new(),
            api_key,
            model_name: model_name.into(),
            base_url,
        })
    }

    fn request_body(&self, prompt: &str, config: &GenerationConfig) -> Value {
        let mut body = json!({
            "model": self.model_name,
            "messages": [{ "role": "user", "content": prompt }]
        });
        if let Some(temp) = config.temperature {
            body["temperature"] = json!(temp);
        }
        if let Some(max_tokens) = config.max_output_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        body
    }

    /// Extract the first choice's message text
    fn parse_response(response: &Value) -> Result<String, ModelError> {
        let choice = response["choices"]
            .as_array()
            .and_then(|c| c.first())
            .ok_or_else(|| ModelError::invalid(PROVIDER, "no choices in response"))?;

        choice["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ModelError::invalid(PROVIDER, "choice has no text content"))
    }
}

#[async_trait]
impl Model for OpenAIModel {
    fn name(&self) -> &str {
        &self.model_name
    }

    async fn generate(
        &self,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<String, ModelError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(prompt, config);
        log::debug!(
            "OpenAI request body: {}",
            serde_json::to_string_pretty(&body).unwrap_or_default()
        );

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ModelError::Api {
                provider: PROVIDER,
                status: status.as_u16(),
                message: resp.text().await?,
            });
        }

        let resp_json: Value = resp.json().await?;
        log::debug!("OpenAI response: {}", resp_json);
        Self::parse_response(&resp_json)
    }
}
