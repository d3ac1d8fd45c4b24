//! Image captioning web service.
//!
//! `GET /` serves an upload form. `POST /` takes one multipart `file`, captions it with the
//! configured [`captioner::CaptionModel`], and renders the caption next to the original image.

use axum::{extract::DefaultBodyLimit, routing::get, Router};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

pub mod captioner;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod page;
pub mod telemetry;

pub use config::Config;
use handlers::AppState;

/// Build the HTTP router around an already-initialized state.
pub fn build_router(state: AppState, config: &Config) -> Router {
    let mut router = Router::new()
        .route("/", get(handlers::index).post(handlers::upload))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(DefaultBodyLimit::max(config.max_upload_size)),
        );

    if config.enable_cors {
        router = router.layer(CorsLayer::permissive());
    }

    router.with_state(state)
}

pub struct Application {
    router: Router,
    config: Config,
}

impl Application {
    /// Load the caption model and compile templates. The model is shared read-only by every
    /// request from here on.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        tracing::debug!(
            bind_address = %config.bind_address(),
            max_upload_size = config.max_upload_size,
            enable_cors = config.enable_cors,
            "Starting image captioner"
        );

        let captioner = captioner::from_config(&config.model)?;
        let state = AppState::new(captioner)?;
        let router = build_router(state, &config);

        Ok(Self { router, config })
    }

    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("Image captioner listening on http://{}", listener.local_addr()?);

        axum::serve(listener, self.router).with_graceful_shutdown(shutdown).await?;

        info!("Server stopped");
        Ok(())
    }
}
