//! Resolver service: optional HTTP wrapper exposing the frame extractor and
//! inference client as `POST /analyze` (spec.md 6). Lets the analyzer
//! worker delegate extraction to a separately-scaled process instead of
//! running the fallback ladder in its own process
//! (`Config::extraction_mode == ExtractionMode::Resolver`).
//!
//! Router/state/CORS/security-header shape grounded on the teacher's own
//! `main.rs`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderName, HeaderValue, Method, header};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;

use doomscroller::config::Config;
use doomscroller::extractor::{self, ExtractorConfig};
use doomscroller::http_client::InferenceClient;
use doomscroller::models::InferenceResponse;

#[derive(Clone)]
struct AppState {
    inference: InferenceClient,
    extractor_config: ExtractorConfig,
}

#[derive(Debug, Deserialize)]
struct AnalyzeRequest {
    url: String,
    #[serde(default)]
    #[allow(dead_code)]
    title: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    channel: Option<String>,
    #[serde(default = "default_target_frames")]
    target_frames: u32,
    #[serde(default = "default_timeout_secs")]
    timeout: u64,
}

fn default_target_frames() -> u32 {
    16
}

fn default_timeout_secs() -> u64 {
    180
}

#[derive(Debug, Serialize)]
struct AnalyzeResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    inference: Option<InferenceResponse>,
    frames_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}

async fn analyze(State(state): State<Arc<AppState>>, Json(request): Json<AnalyzeRequest>) -> Json<AnalyzeResponse> {
    let timeout = Duration::from_secs(request.timeout);

    let frames = match extractor::extract(&request.url, request.target_frames, timeout, &state.extractor_config).await {
        Ok(frames) => frames,
        Err(e) => {
            eprintln!("[resolver] extraction failed for {}: {e}", request.url);
            return Json(AnalyzeResponse { success: false, inference: None, frames_count: 0, error: Some(e.to_string()) });
        }
    };
    let frames_count = frames.len();

    match state.inference.infer(&frames).await {
        Ok(inference) => Json(AnalyzeResponse { success: true, inference: Some(inference), frames_count, error: None }),
        Err(e) => {
            eprintln!("[resolver] inference failed for {}: {e}", request.url);
            Json(AnalyzeResponse { success: false, inference: None, frames_count, error: Some(e.to_string()) })
        }
    }
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    let state = Arc::new(AppState {
        inference: InferenceClient::new(&config),
        extractor_config: ExtractorConfig {
            cookies_file: config.ytdlp_cookies_file.clone(),
            cookies_browser: config.ytdlp_cookies_browser.clone(),
            http_proxy: config.http_proxy.clone(),
        },
    });

    let cors = CorsLayer::new()
        .allow_origin(std::env::var("CORS_ORIGIN").ok().and_then(|v| v.parse::<HeaderValue>().ok()).unwrap_or(HeaderValue::from_static("*")))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT]);

    let x_content_type_options =
        SetResponseHeaderLayer::overriding(HeaderName::from_static("x-content-type-options"), HeaderValue::from_static("nosniff"));

    let app = Router::new()
        .route("/health", get(health))
        .route("/analyze", post(analyze))
        .layer(cors)
        .layer(x_content_type_options)
        .with_state(state);

    let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap_or_else(|e| panic!("failed to bind to {addr}: {e}"));

    println!("[resolver] listening on http://{addr}");
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .expect("resolver server failed");
}
