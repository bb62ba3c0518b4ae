// SPDX-License-Identifier: MIT

//! Gemini Model - Google's generateContent API

use super::{GenerationConfig, Model, ModelError};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::env;

const PROVIDER: &str = "Gemini";

/// Google Gemini model implementation
pub struct GeminiModel {
    client: Client,
    api_key: String,
    model_name: String,
    base_url: String,
}

impl GeminiModel {
    /// Create a new GeminiModel
    ///
    /// Requires `GEMINI_API_KEY` environment variable to be set.
    /// Optionally uses `GEMINI_BASE_URL` for custom endpoints.
    pub fn new(model_name: impl Into<String>) -> Result<Self, ModelError> {
        let api_key =
            env::var("GEMINI_API_KEY").map_err(|_| ModelError::ApiKeyMissing("GEMINI_API_KEY"))?;
        let base_url = env::var("GEMINI_BASE_URL")
            .unwrap_or_else(|_| "https://generativelanguage.googleapis.com/v1beta".to_string());

        // Accept both "gemini-1.5-pro" and "models/gemini-1.5-pro"
        let model_name = model_name.into();
        let model_name = model_name
            .strip_prefix("models/")
            .map(str::to_string)
            .unwrap_or(model_name);

        Ok(Self {
            client: Client::new(),
            api_key,
            model_name,
            base_url,
        })
    }

    fn request_body(prompt: &str, config: &GenerationConfig) -> Value {
        let mut body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }]
        });
        let mut generation = serde_json::Map::new();
        if let Some(temp) = config.temperature {
            generation.insert("temperature".to_string(), json!(temp));
        }
        if let Some(max_tokens) = config.max_output_tokens {
            generation.insert("maxOutputTokens".to_string(), json!(max_tokens));
        }
        if !generation.is_empty() {
            body["generationConfig"] = Value::Object(generation);
        }
        body
    }

    /// Concatenate the text parts of the first candidate
    fn parse_response(response: &Value) -> Result<String, ModelError> {
        let candidate = response["candidates"]
            .as_array()
            .and_then(|c| c.first())
            .ok_or_else(|| ModelError::invalid(PROVIDER, "no candidates in response"))?;

        if let Some(finish_reason) = candidate.get("finishReason").and_then(Value::as_str) {
            log::debug!("Gemini finish reason: {}", finish_reason);
            if finish_reason == "SAFETY" {
                return Err(ModelError::invalid(
                    PROVIDER,
                    "response blocked by safety filters",
                ));
            }
        }

        let parts = candidate["content"]["parts"].as_array().ok_or_else(|| {
            ModelError::invalid(PROVIDER, format!("no parts in candidate: {}", candidate))
        })?;

        Ok(parts
            .iter()
            .filter_map(|p| p["text"].as_str())
            .collect::<Vec<_>>()
            .join(""))
    }
}

#[async_trait]
impl Model for GeminiModel {
    fn name(&self) -> &str {
        &self.model_name
    }

    async fn generate(
        &self,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<String, ModelError> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url, self.model_name
        );
        let body = Self::request_body(prompt, config);
        log::debug!(
            "Gemini request body: {}",
            serde_json::to_string_pretty(&body).unwrap_or_default()
        );

        let resp = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
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
        log::debug!("Gemini response: {}", resp_json);
        Self::parse_response(&resp_json)
    }
}
