//! The upload form and the caption pipeline behind it.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{multipart::MultipartRejection, Multipart, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use image::RgbImage;

use crate::captioner::CaptionModel;
use crate::errors::{Error, Result};
use crate::page::{IndexPage, Templates};

pub const NO_FILE_PART: &str = "No file part";
pub const NO_SELECTED_FILE: &str = "No selected file";

/// Name of the multipart field carrying the image.
const FILE_FIELD: &str = "file";

#[derive(Clone)]
pub struct AppState {
    pub captioner: Arc<dyn CaptionModel>,
    pub templates: Arc<Templates>,
}

impl AppState {
    pub fn new(captioner: Arc<dyn CaptionModel>) -> std::result::Result<Self, minijinja::Error> {
        Ok(Self {
            captioner,
            templates: Arc::new(Templates::new()?),
        })
    }
}

struct Upload {
    file_name: String,
    bytes: Bytes,
}

enum FileField {
    Missing,
    EmptyFileName,
    Present(Upload),
}

/// `GET /` - the bare upload form.
#[tracing::instrument(skip_all)]
pub async fn index(State(state): State<AppState>) -> Result<Html<String>> {
    Ok(Html(state.templates.render_index(&IndexPage::empty())?))
}

/// `POST /` - caption one uploaded image.
///
/// A missing file part and an empty file name are answered with plain text and a 200, matching
/// what a browser form submission expects. Anything that goes wrong after that is an [`Error`].
#[tracing::instrument(skip_all)]
pub async fn upload(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Response> {
    let Ok(mut multipart) = multipart else {
        tracing::debug!("Request body is not multipart/form-data");
        return Ok(NO_FILE_PART.into_response());
    };

    let upload = match read_file_field(&mut multipart).await? {
        FileField::Missing => return Ok(NO_FILE_PART.into_response()),
        FileField::EmptyFileName => return Ok(NO_SELECTED_FILE.into_response()),
        FileField::Present(upload) => upload,
    };

    tracing::info!(
        file_name = %upload.file_name,
        size = upload.bytes.len(),
        "Captioning uploaded image"
    );

    let image = decode_rgb(upload.bytes.clone()).await?;

    let started = Instant::now();
    let caption = state.captioner.caption(&image).await?;
    tracing::debug!(
        model = state.captioner.name(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        caption = %caption,
        "Caption generated"
    );

    let page = IndexPage::captioned(caption, &upload.bytes);
    Ok(Html(state.templates.render_index(&page)?).into_response())
}

/// Find the first `file` part that is an actual file upload.
///
/// A `file` field sent without a `filename` is a plain form value and does not count. A body
/// that cannot be parsed as multipart carries no file either; only the size limit is an error.
async fn read_file_field(multipart: &mut Multipart) -> Result<FileField> {
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) if e.status() == StatusCode::PAYLOAD_TOO_LARGE => return Err(e.into()),
            Err(e) => {
                tracing::debug!("Unreadable multipart body, treating as no file: {}", e);
                break;
            }
        };
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        if file_name.is_empty() {
            return Ok(FileField::EmptyFileName);
        }

        let bytes = field.bytes().await?;
        return Ok(FileField::Present(Upload { file_name, bytes }));
    }

    Ok(FileField::Missing)
}

/// Decode uploaded bytes into an RGB8 grid off the async workers.
async fn decode_rgb(bytes: Bytes) -> Result<RgbImage> {
    tokio::task::spawn_blocking(move || image::load_from_memory(&bytes).map(|image| image.to_rgb8()))
        .await
        .map_err(|e| anyhow::anyhow!("image decode task failed: {e}"))?
        .map_err(Error::ImageDecode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::captioner::CaptionError;
    use crate::config::Config;
    use async_trait::async_trait;
    use axum_test::multipart::{MultipartForm, Part};
    use axum_test::TestServer;
    use base64::{engine::general_purpose, Engine as _};
    use image::{ImageOutputFormat, Rgb};
    use std::io::Cursor;

    /// Deterministic stand-in for a real model.
    struct DimensionsCaptioner;

    #[async_trait]
    impl CaptionModel for DimensionsCaptioner {
        fn name(&self) -> &str {
            "dimensions"
        }

        async fn caption(&self, image: &RgbImage) -> std::result::Result<String, CaptionError> {
            let Rgb([r, g, b]) = *image.get_pixel(0, 0);
            Ok(format!("a {}x{} picture starting with rgb({r}, {g}, {b})", image.width(), image.height()))
        }
    }

    struct FailingCaptioner;

    #[async_trait]
    impl CaptionModel for FailingCaptioner {
        fn name(&self) -> &str {
            "failing"
        }

        async fn caption(&self, _image: &RgbImage) -> std::result::Result<String, CaptionError> {
            Err(CaptionError::EmptyCaption)
        }
    }

    fn server_with(captioner: Arc<dyn CaptionModel>, config: &Config) -> TestServer {
        let state = AppState::new(captioner).unwrap();
        TestServer::new(crate::build_router(state, config)).unwrap()
    }

    fn test_server() -> TestServer {
        server_with(Arc::new(DimensionsCaptioner), &Config::default())
    }

    fn encoded(width: u32, height: u32, format: ImageOutputFormat) -> Vec<u8> {
        let image = RgbImage::from_pixel(width, height, Rgb([200, 30, 30]));
        let mut bytes = Vec::new();
        image.write_to(&mut Cursor::new(&mut bytes), format).unwrap();
        bytes
    }

    fn file_form(bytes: Vec<u8>, file_name: &str) -> MultipartForm {
        MultipartForm::new().add_part(FILE_FIELD, Part::bytes(bytes).file_name(file_name).mime_type("image/png"))
    }

    fn embedded_image(html: &str) -> Vec<u8> {
        let prefix = "data:image/jpeg;base64,";
        let start = html.find(prefix).expect("no inline image") + prefix.len();
        let end = start + html[start..].find('"').expect("unterminated src");
        general_purpose::STANDARD.decode(&html[start..end]).unwrap()
    }

    #[tokio::test]
    async fn test_get_returns_empty_form() {
        let server = test_server();

        let response = server.get("/").await;

        response.assert_status_ok();
        let content_type = response.headers().get("content-type").unwrap().to_str().unwrap();
        assert!(content_type.starts_with("text/html"));
        let html = response.text();
        assert!(html.contains("<h1>Upload an image</h1>"));
        assert!(!html.contains("<h2>Caption:</h2>"));
        assert!(!html.contains("<img"));
    }

    #[tokio::test]
    async fn test_post_without_file_part() {
        let server = test_server();

        let response = server
            .post("/")
            .multipart(MultipartForm::new().add_text("comment", "hello"))
            .await;

        response.assert_status_ok();
        response.assert_text(NO_FILE_PART);
    }

    #[tokio::test]
    async fn test_post_file_field_without_filename_is_not_a_file() {
        let server = test_server();

        let response = server
            .post("/")
            .multipart(MultipartForm::new().add_text(FILE_FIELD, "just text"))
            .await;

        response.assert_status_ok();
        response.assert_text(NO_FILE_PART);
    }

    #[tokio::test]
    async fn test_post_non_multipart_body() {
        let server = test_server();

        let response = server.post("/").text("not a form").await;

        response.assert_status_ok();
        response.assert_text(NO_FILE_PART);
    }

    #[tokio::test]
    async fn test_post_empty_multipart_body() {
        let server = test_server();

        let response = server
            .post("/")
            .bytes(Bytes::new())
            .content_type("multipart/form-data; boundary=XYZ")
            .await;

        response.assert_status_ok();
        response.assert_text(NO_FILE_PART);
    }

    #[tokio::test]
    async fn test_post_garbage_multipart_body() {
        let server = test_server();

        let response = server
            .post("/")
            .bytes(Bytes::from_static(b"hello world"))
            .content_type("multipart/form-data; boundary=XYZ")
            .await;

        response.assert_status_ok();
        response.assert_text(NO_FILE_PART);
    }

    #[tokio::test]
    async fn test_post_empty_filename() {
        let server = test_server();

        let response = server.post("/").multipart(file_form(Vec::new(), "")).await;

        response.assert_status_ok();
        response.assert_text(NO_SELECTED_FILE);
    }

    #[tokio::test]
    async fn test_post_png_renders_caption_and_original_bytes() {
        let server = test_server();
        let png = encoded(4, 3, ImageOutputFormat::Png);

        let response = server.post("/").multipart(file_form(png.clone(), "red.png")).await;

        response.assert_status_ok();
        let html = response.text();
        assert!(html.contains("<h2>Caption:</h2>"));
        assert!(html.contains("<p>a 4x3 picture starting with rgb(200, 30, 30)</p>"));
        assert_eq!(embedded_image(&html), png);
    }

    #[tokio::test]
    async fn test_post_jpeg_round_trips_exact_bytes() {
        let server = test_server();
        let jpeg = encoded(16, 9, ImageOutputFormat::Jpeg(90));

        let response = server.post("/").multipart(file_form(jpeg.clone(), "photo.jpg")).await;

        response.assert_status_ok();
        let html = response.text();
        assert!(html.contains("<p>a 16x9 picture"));
        assert_eq!(embedded_image(&html), jpeg);
    }

    #[tokio::test]
    async fn test_same_image_twice_gives_same_caption() {
        let server = test_server();
        let png = encoded(5, 5, ImageOutputFormat::Png);

        let first = server.post("/").multipart(file_form(png.clone(), "a.png")).await.text();
        let second = server.post("/").multipart(file_form(png, "a.png")).await.text();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_corrupt_image_is_server_error() {
        let server = test_server();

        let response = server
            .post("/")
            .multipart(file_form(b"this is not an image".to_vec(), "broken.png"))
            .await;

        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        response.assert_text("Internal server error");
    }

    #[tokio::test]
    async fn test_caption_failure_is_server_error() {
        let server = server_with(Arc::new(FailingCaptioner), &Config::default());
        let png = encoded(2, 2, ImageOutputFormat::Png);

        let response = server.post("/").multipart(file_form(png, "ok.png")).await;

        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        response.assert_text("Internal server error");
    }

    #[tokio::test]
    async fn test_upload_over_limit_is_rejected() {
        let config = Config {
            max_upload_size: 256,
            ..Config::default()
        };
        let server = server_with(Arc::new(DimensionsCaptioner), &config);

        let response = server
            .post("/")
            .multipart(file_form(vec![0u8; 4096], "big.png"))
            .await;

        response.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_put_is_not_allowed() {
        let server = test_server();

        let response = server.put("/").await;

        response.assert_status(StatusCode::METHOD_NOT_ALLOWED);
    }
}
