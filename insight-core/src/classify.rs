//! Weather description classification through a language model.
//!
//! The model is an untrusted text generator; the value of this module is the
//! validation gate between its output and the closed `Category` enum. A raw
//! model string never leaves this module.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::ClassificationError;
use crate::model::Category;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Total attempts per description, counting the first one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait CategoryClassifier: Send + Sync {
    /// Classify a free-text weather description into one of the six fixed
    /// categories, or fail with a typed error.
    async fn classify(&self, description: &str) -> Result<Category, ClassificationError>;
}

#[derive(Debug, Clone)]
pub struct LlmClassifier {
    api_key: String,
    model: String,
    base_url: String,
    max_attempts: u32,
    http: Client,
}

impl LlmClassifier {
    pub fn new(api_key: String, model: String) -> Self {
        Self::with_base_url(api_key, model, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(api_key: String, model: String, base_url: String) -> Self {
        Self {
            api_key,
            model,
            base_url,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            http: Client::new(),
        }
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    fn prompt(description: &str) -> String {
        format!(
            "Classify the following weather description as one of: \
             Clear, Cloudy, Rainy, Stormy, Snowy, or Extreme.\n\
             Description: {description}\nAnswer:"
        )
    }

    /// One round trip: request, read, validate. An answer outside the
    /// category set is `InvalidOutput`, which the caller may retry.
    async fn request_label(&self, description: &str) -> Result<Category, ClassificationError> {
        let url = format!("{}/chat/completions", self.base_url);

        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: Self::prompt(description),
            }],
            max_tokens: 10,
        };

        let res = self
            .http
            .post(&url)
            .timeout(REQUEST_TIMEOUT)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ClassificationError::BackendUnavailable(e.to_string()))?;

        let status = res.status();
        if !status.is_success() {
            return Err(ClassificationError::BackendUnavailable(format!(
                "status {status}"
            )));
        }

        let parsed: ChatResponse = res
            .json()
            .await
            .map_err(|e| ClassificationError::InvalidOutput(format!("unparseable body: {e}")))?;

        let raw = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        Category::from_label(&raw).ok_or(ClassificationError::InvalidOutput(raw))
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[async_trait]
impl CategoryClassifier for LlmClassifier {
    async fn classify(&self, description: &str) -> Result<Category, ClassificationError> {
        for attempt in 1..=self.max_attempts {
            match self.request_label(description).await {
                Ok(category) => {
                    debug!(%category, attempt, "classified description");
                    return Ok(category);
                }
                // Invalid output is worth one more try with the same input;
                // a dead backend is not.
                Err(ClassificationError::InvalidOutput(raw)) => {
                    warn!(attempt, raw = %raw, "model returned an invalid label");
                }
                Err(e) => return Err(e),
            }
        }

        Err(ClassificationError::Unclassifiable {
            attempts: self.max_attempts,
        })
    }
}
