//! moodcam - live mood detection stream server
//!
//! Main entry point.

use moodcam::{
    camera::{CameraSource, FrameSource},
    detector::DetectionLoop,
    inference::InferenceClient,
    state::{AppConfig, AppState, MoodState},
    web_api,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long shutdown waits for the in-flight detection iteration
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "moodcam=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting moodcam v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration (host/port and device come from the environment)
    let config = AppConfig::default();
    tracing::info!(
        host = %config.host,
        port = config.port,
        camera_device = %config.camera_device,
        inference_url = %config.inference_url,
        frame_skip = config.frame_skip,
        "Configuration loaded"
    );

    let mood = Arc::new(MoodState::new());
    let inference = Arc::new(InferenceClient::new(config.inference_url.clone()));

    // Open the camera. A fatal failure here is reported once and the server
    // continues in degraded mode: /mood serves the default label and
    // /video_feed is inert.
    let camera: Option<Arc<dyn FrameSource>> = match CameraSource::open(&config).await {
        Ok(source) => Some(Arc::new(source)),
        Err(e) => {
            tracing::error!(error = %e, "Cannot open camera, continuing in degraded mode");
            None
        }
    };

    // Start the detection loop only when a camera exists
    let detection_handle = camera.as_ref().map(|camera| {
        DetectionLoop::new(
            camera.clone(),
            inference.clone(),
            inference.clone(),
            mood.clone(),
            config.frame_skip,
        )
        .start()
    });

    let state = AppState {
        config: config.clone(),
        mood: mood.clone(),
        camera: camera.clone(),
        inference,
        started_at: Utc::now(),
    };

    let app = web_api::create_router(state)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    // The shutdown signal flips the running flag before serve starts
    // draining, so feed publishers stop, their bodies end, and open
    // /video_feed connections can close instead of pinning serve open.
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(mood.clone()))
        .await?;

    if let Some(handle) = detection_handle {
        if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
            tracing::warn!("Detection loop did not stop within grace period");
        }
    }

    if let Some(camera) = camera {
        camera.release().await;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal(mood: Arc<MoodState>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    // Stop the loops before serve begins draining connections; the stream
    // publishers observe the flag, end their bodies, and let serve return.
    mood.request_shutdown();
}
