// SPDX-License-Identifier: MIT

//! Model module - text-generation backends used inside node bodies
//!
//! The engine never talks to a backend itself; these are plugged into nodes
//! through [`prompt_node`] or captured by hand-written node closures.
//! - [openai] - OpenAI chat completions
//! - [gemini] - Google's Gemini generateContent

pub mod gemini;
pub mod openai;
mod prompt;

pub use prompt::{prompt_node, render};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::env;
use std::sync::Arc;
use thiserror::Error;

/// Configuration for model generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GenerationConfig {
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
}

/// Backend errors
#[derive(Debug, Error)]
pub enum ModelError {
    /// API key not configured
    #[error("API key not configured: set {0}")]
    ApiKeyMissing(&'static str),

    /// Non-success status from the provider
    #[error("API error from {provider} ({status}): {message}")]
    Api {
        provider: &'static str,
        status: u16,
        message: String,
    },

    /// Response did not have the expected shape
    #[error("Invalid response from {provider}: {message}")]
    InvalidResponse {
        provider: &'static str,
        message: String,
    },

    /// HTTP request errors
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl ModelError {
    pub(crate) fn invalid(provider: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            provider,
            message: message.into(),
        }
    }
}

/// Core trait for text-generation backends
#[async_trait]
pub trait Model: Send + Sync {
    /// Model identifier sent to the provider
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str, config: &GenerationConfig)
        -> Result<String, ModelError>;
}

/// Supported providers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAI,
    Gemini,
}

impl Provider {
    /// Infer the provider from a model name, honouring `MODEL_PROVIDER`
    pub fn for_model(model_name: &str) -> Self {
        match env::var("MODEL_PROVIDER").ok().as_deref() {
            Some(p) if p.eq_ignore_ascii_case("openai") => Self::OpenAI,
            Some(p) if p.eq_ignore_ascii_case("gemini") => Self::Gemini,
            _ => Self::infer(model_name),
        }
    }

    fn infer(model_name: &str) -> Self {
        let openai_prefixes = ["gpt", "o1", "o3", "o4", "chatgpt"];
        if openai_prefixes.iter().any(|p| model_name.starts_with(p)) {
            Self::OpenAI
        } else {
            Self::Gemini
        }
    }
}

/// Build the backend for `model_name` from environment credentials
pub fn connect(model_name: &str) -> Result<Arc<dyn Model>, ModelError> {
    let provider = Provider::for_model(model_name);
    log::info!("Using provider {:?} for model {}", provider, model_name);
    Ok(match provider {
        Provider::OpenAI => Arc::new(openai::OpenAIModel::new(model_name)?),
        Provider::Gemini => Arc::new(gemini::GeminiModel::new(model_name)?),
    })
}
