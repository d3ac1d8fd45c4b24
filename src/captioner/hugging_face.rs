//! Hugging Face inference API backend.
//!
//! Serves `Salesforce/blip-image-captioning-large` by default. The raw JPEG goes in the request
//! body and the API answers with `[{"generated_text": "..."}]`.

use async_trait::async_trait;
use image::RgbImage;
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use serde::Deserialize;

use super::{clean_caption, encode_jpeg, CaptionError, CaptionModel};
use crate::config::ModelConfig;

pub struct HuggingFaceCaptioner {
    client: reqwest::Client,
    url: Url,
    model: String,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InferenceResponse {
    Generated(Vec<GeneratedText>),
    Error { error: String },
}

#[derive(Debug, Deserialize)]
struct GeneratedText {
    generated_text: String,
}

impl HuggingFaceCaptioner {
    pub fn new(config: &ModelConfig) -> anyhow::Result<Self> {
        let model = config.model_name().to_string();
        let base = config.endpoint();
        let url = Url::parse(&format!("{}/models/{}", base.trim_end_matches('/'), model))?;
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            url,
            model,
            token: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl CaptionModel for HuggingFaceCaptioner {
    fn name(&self) -> &str {
        &self.model
    }

    async fn caption(&self, image: &RgbImage) -> Result<String, CaptionError> {
        let jpeg_bytes = encode_jpeg(image)?;

        let mut request = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, "image/jpeg")
            .body(jpeg_bytes);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        tracing::debug!(url = %self.url, "Sending image to Hugging Face inference API");
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            // Error bodies are usually `{"error": "..."}`; fall back to the raw text.
            let message = match serde_json::from_str::<InferenceResponse>(&body) {
                Ok(InferenceResponse::Error { error }) => error,
                _ => body,
            };
            return Err(CaptionError::Api { status, message });
        }

        let parsed: InferenceResponse = serde_json::from_str(&body).map_err(|e| CaptionError::Api {
            status,
            message: format!("unexpected response body: {e}"),
        })?;

        match parsed {
            InferenceResponse::Generated(outputs) => {
                let first = outputs.into_iter().next().ok_or(CaptionError::EmptyCaption)?;
                clean_caption(&first.generated_text)
            }
            InferenceResponse::Error { error } => Err(CaptionError::Api { status, message: error }),
        }
    }
}
