//! Analyzer worker + scheduler entry point. Wires `Config`, the cache and
//! database pools, the inference/resolver clients, and spawns the analyzer
//! worker loop alongside the scheduler's cron jobs, the same way the
//! teacher's own `main.rs` wires its `AppState` and spawns
//! `thumbnails::run_thumbnail_worker` / `frames::run_frame_worker` as
//! background tasks before serving.

use std::sync::Arc;

use doomscroller::analyzer::{self, AnalyzerContext};
use doomscroller::cache::Cache;
use doomscroller::config::{Config, ExtractionMode};
use doomscroller::db;
use doomscroller::discovery::ProviderRegistry;
use doomscroller::extractor::ExtractorConfig;
use doomscroller::http_client::InferenceClient;
use doomscroller::resolver_client::ResolverClient;
use doomscroller::scheduler;

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    println!("[startup] connecting to database");
    let pool = db::connect(&config.database_url).await.expect("failed to connect to database");

    println!("[startup] connecting to cache");
    let cache = Cache::connect(&config.redis_url).await.expect("failed to connect to cache");

    let inference = InferenceClient::new(&config);
    let resolver = config.resolver_url.clone().map(ResolverClient::new);

    if config.extraction_mode == ExtractionMode::Resolver {
        println!("[startup] extraction mode: resolver ({})", config.resolver_url.as_deref().unwrap_or(""));
    } else {
        println!("[startup] extraction mode: in-process");
    }

    let extractor_config = ExtractorConfig {
        cookies_file: config.ytdlp_cookies_file.clone(),
        cookies_browser: config.ytdlp_cookies_browser.clone(),
        http_proxy: config.http_proxy.clone(),
    };

    if config.gemini.is_some() {
        println!("[startup] GEMINI_API_KEY found, deep-scan enabled");
    } else {
        println!("[startup] GEMINI_API_KEY not set, deep-scan disabled");
    }

    let registry = ProviderRegistry::from_config(&config);

    let analyzer_ctx = Arc::new(AnalyzerContext {
        pool: pool.clone(),
        cache,
        inference: inference.clone(),
        resolver,
        extractor_config,
        config: config.clone(),
    });

    println!("[startup] starting analyzer worker");
    let analyzer_handle = tokio::spawn(analyzer::run_analyzer_worker(analyzer_ctx));

    println!("[startup] starting scheduler (wake_inference + run_discovery_job)");
    let scheduler_handle = tokio::spawn(scheduler::run_scheduler(pool, inference, registry, config));

    let _ = tokio::join!(analyzer_handle, scheduler_handle);
}
