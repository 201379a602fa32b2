//! Vision-model describer over an OpenAI-style chat-completions endpoint.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::errors::PipelineError;

use super::DescribeService;

const SYSTEM_PROMPT: &str = "You are a helpful assistant whose aim is to give \
the best possible description of any given image, with particular focus on \
identifying content and position of any text appearing in the image";

const USER_PROMPT: &str =
    "Describe the provided image. What is written on the image and where is it located?";

const DEFAULT_MODEL: &str = "Qwen/Qwen3-VL-235B-A22B-Instruct";
const MAX_TOKENS: u32 = 100;

/// Chat-completions response shape, reduced to what we read.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// [`DescribeService`] backed by a vision chat model.
#[derive(Debug, Clone)]
pub struct ChatDescriber {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl ChatDescriber {
    /// Creates a describer against `base_url` using `api_key`.
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Overrides the model name.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[async_trait]
impl DescribeService for ChatDescriber {
    async fn describe(&self, image_url: &str) -> Result<String, PipelineError> {
        debug!(model = %self.model, "requesting image description");

        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "messages": [
                {
                    "role": "system",
                    "content": [{ "type": "text", "text": SYSTEM_PROMPT }],
                },
                {
                    "role": "user",
                    "content": [
                        { "type": "image_url", "image_url": { "url": image_url } },
                        { "type": "text", "text": USER_PROMPT },
                    ],
                },
            ],
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| PipelineError::Remote(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::Remote(format!(
                "describer returned {status}"
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|err| PipelineError::Remote(err.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(PipelineError::EmptyResult)
    }
}
