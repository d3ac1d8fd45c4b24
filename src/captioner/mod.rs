//! Caption model backends.
//!
//! The request handler only sees the [`CaptionModel`] trait: an RGB pixel grid goes in, a caption
//! comes out. Concrete backends call hosted inference APIs over HTTP and are selected once at
//! startup from [`ModelConfig`].

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use image::{ImageOutputFormat, RgbImage};
use thiserror::Error as ThisError;

use crate::config::{Backend, ModelConfig};

pub mod gemini;
pub mod hugging_face;

pub use gemini::GeminiCaptioner;
pub use hugging_face::HuggingFaceCaptioner;

/// JPEG quality used when shipping pixels to a remote model.
const JPEG_QUALITY: u8 = 85;

#[derive(ThisError, Debug)]
pub enum CaptionError {
    /// Re-encoding the pixel grid for transport failed
    #[error("failed to encode image for the caption model")]
    Encode(#[from] image::ImageError),

    /// Transport failure, including timeouts
    #[error("caption model request failed")]
    Http(#[from] reqwest::Error),

    /// The backend answered but rejected the request
    #[error("caption model returned {status}: {message}")]
    Api {
        status: reqwest::StatusCode,
        message: String,
    },

    #[error("caption model returned an empty caption")]
    EmptyCaption,
}

/// An image-to-text model.
///
/// Implementations are built once and shared across requests, so `caption` takes `&self` and
/// must not rely on per-call mutable state.
#[async_trait]
pub trait CaptionModel: Send + Sync {
    /// Human readable model identifier, used in logs.
    fn name(&self) -> &str;

    async fn caption(&self, image: &RgbImage) -> Result<String, CaptionError>;
}

/// Build the configured backend.
pub fn from_config(config: &ModelConfig) -> anyhow::Result<Arc<dyn CaptionModel>> {
    let model: Arc<dyn CaptionModel> = match config.backend {
        Backend::HuggingFace => Arc::new(HuggingFaceCaptioner::new(config)?),
        Backend::Gemini => Arc::new(GeminiCaptioner::new(config)?),
    };
    tracing::info!(backend = ?config.backend, model = model.name(), "Caption model ready");
    Ok(model)
}

/// Encode an RGB grid as JPEG bytes.
pub(crate) fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>, CaptionError> {
    let mut jpeg_bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut jpeg_bytes), ImageOutputFormat::Jpeg(JPEG_QUALITY))?;
    Ok(jpeg_bytes)
}

/// Trim a generated caption, rejecting captions that are blank.
pub(crate) fn clean_caption(raw: &str) -> Result<String, CaptionError> {
    let caption = raw.trim();
    if caption.is_empty() {
        return Err(CaptionError::EmptyCaption);
    }
    Ok(caption.to_string())
}
