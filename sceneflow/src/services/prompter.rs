//! Prompt generation over an OpenAI-style chat-completions endpoint.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::errors::PipelineError;

use super::PromptService;

const USER_PROMPT_TEMPLATE: &str = "\
Your job is to create a prompt that I'm going to pass to an image editing model
based on the description of the image.

The goal of the prompt is to get the model to replace any item with text on it
with the object described in the text.

For example, if the original image had a woman holding a sign up to their head
that says \"red curly wig\", you would instruct the model to put a red curly wig
on the woman.

Here is a description you've received:

---
{description}
---

Make it a model-friendly version that often works best for diffusion/image-editing models.
Only include the prompt and nothing else.
";

const DEFAULT_MODEL: &str = "Qwen/Qwen3-14B";

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

/// [`PromptService`] backed by a text chat model.
#[derive(Debug, Clone)]
pub struct ChatPrompter {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl ChatPrompter {
    /// Creates a prompter against `base_url` using `api_key`.
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
impl PromptService for ChatPrompter {
    async fn generate(&self, description: &str) -> Result<String, PipelineError> {
        debug!(model = %self.model, "requesting edit prompt");

        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {
                    "role": "user",
                    "content": [{
                        "type": "text",
                        "text": USER_PROMPT_TEMPLATE.replace("{description}", description),
                    }],
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
            return Err(PipelineError::Remote(format!("prompter returned {status}")));
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
            .map(|content| content.trim_start_matches('\n').to_string())
            .filter(|content| !content.trim().is_empty())
            .ok_or(PipelineError::EmptyResult)
    }
}
