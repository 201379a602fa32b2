//! Image-edit client for a `/predict`-style diffusion endpoint.
//!
//! The endpoint answers with data-URL images; the payload after the last
//! comma is base64-decoded into raw bytes before handing back to the
//! pipeline.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use tracing::debug;

use crate::errors::PipelineError;

use super::ImageEditService;

const OUTPUT_WIDTH: u32 = 1920;
const OUTPUT_HEIGHT: u32 = 1080;

#[derive(Debug, Deserialize)]
struct PredictResponse {
    #[serde(default)]
    images: Vec<String>,
}

/// [`ImageEditService`] backed by a hosted image-editing model.
#[derive(Debug, Clone)]
pub struct PredictImageEditor {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl PredictImageEditor {
    /// Creates an editor against `base_url` using `api_key`.
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

fn decode_data_url(raw: &str) -> Result<Vec<u8>, PipelineError> {
    let payload = raw.rsplit_once(',').map_or(raw, |(_, tail)| tail);
    BASE64
        .decode(payload.trim())
        .map_err(|err| PipelineError::Decode(err.to_string()))
}

#[async_trait]
impl ImageEditService for PredictImageEditor {
    async fn edit(&self, image_url: &str, prompt: &str) -> Result<Vec<u8>, PipelineError> {
        debug!("requesting image edit");

        let body = serde_json::json!({
            "prompt": prompt,
            "input_image_url": image_url,
            "width": OUTPUT_WIDTH,
            "height": OUTPUT_HEIGHT,
        });

        let response = self
            .http
            .post(format!("{}/predict", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| PipelineError::Remote(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::Remote(format!("editor returned {status}")));
        }

        let parsed: PredictResponse = response
            .json()
            .await
            .map_err(|err| PipelineError::Remote(err.to_string()))?;

        let first = parsed
            .images
            .into_iter()
            .next()
            .filter(|image| !image.is_empty())
            .ok_or(PipelineError::EmptyResult)?;

        decode_data_url(&first)
    }
}
