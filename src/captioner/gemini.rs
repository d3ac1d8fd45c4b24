//! Google Gemini `generateContent` backend.
//!
//! The prompt and the JPEG travel as two parts of one content block; the caption is the text of
//! the first part of the first candidate.

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use image::RgbImage;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use super::{clean_caption, encode_jpeg, CaptionError, CaptionModel};
use crate::config::ModelConfig;

pub struct GeminiCaptioner {
    client: reqwest::Client,
    url: Url,
    model: String,
    api_key: String,
    prompt: String,
    temperature: f32,
}

#[derive(Serialize)]
struct GenerateContentRequest<'a> {
    contents: [Content<'a>; 1],
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 2],
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text { text: &'a str },
    InlineData { inline_data: InlineData },
}

#[derive(Serialize)]
struct InlineData {
    mime_type: &'static str,
    data: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<TextPart>,
}

#[derive(Deserialize)]
struct TextPart {
    text: Option<String>,
}

impl GeminiCaptioner {
    pub fn new(config: &ModelConfig) -> anyhow::Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| anyhow::anyhow!("the gemini backend requires model.api_key or GEMINI_API_KEY"))?;
        let model = config.model_name().to_string();
        let url = Url::parse(&format!(
            "{}/v1beta/models/{}:generateContent",
            config.endpoint().trim_end_matches('/'),
            model
        ))?;
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            url,
            model,
            api_key,
            prompt: config.prompt.clone(),
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl CaptionModel for GeminiCaptioner {
    fn name(&self) -> &str {
        &self.model
    }

    async fn caption(&self, image: &RgbImage) -> Result<String, CaptionError> {
        let jpeg_bytes = encode_jpeg(image)?;

        let payload = GenerateContentRequest {
            contents: [Content {
                parts: [
                    Part::Text { text: &self.prompt },
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: "image/jpeg",
                            data: general_purpose::STANDARD.encode(&jpeg_bytes),
                        },
                    },
                ],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
            },
        };

        tracing::debug!(model = %self.model, "Sending request to Gemini");

        let response = self
            .client
            .post(self.url.clone())
            .query(&[("key", self.api_key.as_str())])
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        let response_text = response.text().await?;

        if !status.is_success() {
            // Keep the logged body short, error pages can be large.
            let message: String = response_text.chars().take(500).collect();
            return Err(CaptionError::Api { status, message });
        }

        let result: GenerateContentResponse = serde_json::from_str(&response_text).map_err(|e| CaptionError::Api {
            status,
            message: format!("unexpected response body: {e}"),
        })?;

        let text = result
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .and_then(|content| content.parts.into_iter().next())
            .and_then(|part| part.text)
            .ok_or(CaptionError::EmptyCaption)?;

        clean_caption(&text)
    }
}
