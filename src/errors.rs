use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error as ThisError;

use crate::captioner::CaptionError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(ThisError, Debug)]
pub enum Error {
    /// The multipart stream was malformed or exceeded the body limit
    #[error("Failed to read upload")]
    Multipart(#[from] MultipartError),

    /// Uploaded bytes are not a decodable image
    #[error("Failed to decode uploaded image")]
    ImageDecode(#[source] image::ImageError),

    #[error("Failed to generate caption")]
    Caption(#[from] CaptionError),

    #[error("Failed to render page")]
    Render(#[from] minijinja::Error),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Multipart(e) => e.status(),
            // Undecodable uploads are treated like any other processing failure.
            Error::ImageDecode(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Caption(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Render(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::Multipart(e) => e.body_text(),
            Error::ImageDecode(_) | Error::Caption(_) | Error::Render(_) | Error::Other(_) => {
                "Internal server error".to_string()
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self.to_string_chain(), "Request failed");
        } else {
            tracing::debug!("Client error: {}", self);
        }

        (status, self.user_message()).into_response()
    }
}

impl Error {
    /// Render the error and its sources as a single `a: b: c` line.
    fn to_string_chain(&self) -> String {
        let mut message = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        message
    }
}
