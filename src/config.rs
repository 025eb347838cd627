//! Runtime configuration, loaded once from the environment at startup.
//!
//! Required variables fail fast with a message naming the missing variable,
//! the same convention `main.rs` used for `JWT_SECRET` and friends. Optional
//! numeric variables fall back to the defaults spec.md documents.

use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMode {
    /// Run the fallback ladder in-process.
    InProcess,
    /// Delegate to a resolver HTTP service at the given base URL index
    /// stored separately on `Config::resolver_url`.
    Resolver,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,

    pub infer_api_url: String,
    pub infer_api_key: String,
    pub hugging_face_api_key: String,

    pub resolver_url: Option<String>,
    pub extraction_mode: ExtractionMode,

    pub infer_target_frames: u32,
    pub infer_request_timeout: Duration,
    pub frame_extract_timeout: Duration,

    pub idempotency_ttl_seconds: u64,
    pub idempotency_stamp_ttl_seconds: u64,
    pub discovery_dedupe_ttl_seconds: u64,

    pub health_check_interval_seconds: u64,
    pub health_check_timeout: Duration,

    pub discovery_interval_seconds: u64,
    pub discovery_limit_per_provider: u32,
    pub discovery_total_limit: u32,
    pub discovery_priority: i16,
    pub discovery_since_hours: Option<i64>,
    pub discovery_retry_delay_seconds: u64,
    pub discovery_max_retries: u32,

    pub youtube_api_key: Option<String>,
    pub youtube_regions: Vec<String>,
    pub youtube_max_results: u32,
    pub youtube_max_pages_per_sweep: u32,
    pub youtube_request_timeout: Duration,
    pub youtube_hours_back: i64,
    pub youtube_search_query: String,
    pub youtube_top_per_region: u32,
    /// Seconds between paged YouTube API calls; the original's
    /// `POLITE_DELAY_SECONDS` is a float (`youtube.py:34`), so this stays
    /// sub-second-capable rather than rounding up to a whole second.
    pub youtube_polite_delay_seconds: f64,

    pub ytdlp_cookies_file: Option<String>,
    pub ytdlp_cookies_browser: Option<String>,
    pub http_proxy: Option<String>,

    /// [SUPPLEMENT] deep-scan: present only when `GEMINI_API_KEY` is set, so
    /// the deep-scan path is opt-in the same way the background agent in
    /// `main.rs` is opt-in on `GOOGLE_GEMINI_API_KEY`.
    pub gemini: Option<GeminiConfig>,
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub api_version: String,
    pub job_ttl_seconds: u64,
    pub lock_ttl_seconds: u64,
}

fn env_var(name: &str) -> String {
    env::var(name).unwrap_or_else(|_| panic!("{name} must be set"))
}

fn env_opt(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        let resolver_url = env_opt("DOOMSCROLLER_RESOLVER_URL");
        let extraction_mode = if resolver_url.is_some() {
            ExtractionMode::Resolver
        } else {
            ExtractionMode::InProcess
        };

        let youtube_regions = env_opt("YOUTUBE_REGIONS")
            .map(|s| {
                s.split(',')
                    .map(|r| r.trim().to_uppercase())
                    .filter(|r| !r.is_empty())
                    .collect()
            })
            .unwrap_or_else(|| vec!["US".to_string()]);

        Config {
            database_url: env_var("DATABASE_URL"),
            redis_url: env::var("REDIS_APP_URL")
                .or_else(|_| env::var("CELERY_BROKER_URL"))
                .unwrap_or_else(|_| panic!("REDIS_APP_URL must be set")),

            infer_api_url: env_var("INFER_API_URL"),
            infer_api_key: env_var("INFER_API_KEY"),
            hugging_face_api_key: env_var("HUGGING_FACE_API_KEY"),

            resolver_url,
            extraction_mode,

            infer_target_frames: env_parsed("INFER_TARGET_FRAMES", 16),
            infer_request_timeout: Duration::from_secs(env_parsed("INFER_REQUEST_TIMEOUT", 180)),
            frame_extract_timeout: Duration::from_secs(env_parsed("FRAME_EXTRACT_TIMEOUT", 180)),

            idempotency_ttl_seconds: env_parsed("IDEMPOTENCY_TTL_SECONDS", 86_400),
            idempotency_stamp_ttl_seconds: env_parsed("IDEMPOTENCY_STAMP_TTL_SECONDS", 259_200),
            discovery_dedupe_ttl_seconds: env_parsed("DISCOVERY_DEDUPE_TTL_SECONDS", 86_400),

            health_check_interval_seconds: env_parsed("HEALTH_CHECK_INTERVAL_SECONDS", 30),
            health_check_timeout: Duration::from_secs(env_parsed("HEALTH_CHECK_TIMEOUT", 5)),

            discovery_interval_seconds: env_parsed("DISCOVERY_INTERVAL_SECONDS", 120),
            discovery_limit_per_provider: env_parsed("DISCOVERY_LIMIT_PER_PROVIDER", 100),
            discovery_total_limit: env_parsed("DISCOVERY_TOTAL_LIMIT", 100),
            discovery_priority: env_parsed("DISCOVERY_PRIORITY", 5),
            discovery_since_hours: env::var("DISCOVERY_SINCE_HOURS").ok().and_then(|s| s.parse().ok()),
            discovery_retry_delay_seconds: env_parsed("DISCOVERY_RETRY_DELAY_SECONDS", 90),
            discovery_max_retries: env_parsed("DISCOVERY_MAX_RETRIES", 3),

            youtube_api_key: env_opt("YOUTUBE_API_KEY"),
            youtube_regions,
            youtube_max_results: env_parsed("YOUTUBE_MAX_RESULTS", 50),
            youtube_max_pages_per_sweep: env_parsed("YOUTUBE_MAX_PAGES_PER_SWEEP", 2),
            youtube_request_timeout: Duration::from_secs(env_parsed("YOUTUBE_REQUEST_TIMEOUT", 20)),
            youtube_hours_back: env_parsed("YOUTUBE_HOURS_BACK", 48),
            youtube_search_query: env::var("YOUTUBE_SEARCH_QUERY").unwrap_or_else(|_| "#shorts".to_string()),
            youtube_top_per_region: env_parsed("YOUTUBE_TOP_PER_REGION", 75),
            youtube_polite_delay_seconds: env_parsed("YOUTUBE_POLITE_DELAY_SECONDS", 0.2),

            ytdlp_cookies_file: env_opt("YTDLP_COOKIES_FILE"),
            ytdlp_cookies_browser: env_opt("YTDLP_COOKIES_BROWSER"),
            http_proxy: env::var("HTTPS_PROXY").ok().or_else(|| env::var("HTTP_PROXY").ok()),

            gemini: env_opt("GEMINI_API_KEY").map(|api_key| GeminiConfig {
                api_key,
                model: env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-2.5-flash".to_string()),
                api_version: env::var("GEMINI_API_VERSION").unwrap_or_else(|_| "v1beta".to_string()),
                job_ttl_seconds: env_parsed("DEEP_SCAN_JOB_TTL_SECONDS", 3_600),
                lock_ttl_seconds: env_parsed("DEEP_SCAN_LOCK_TTL_SECONDS", 300),
            }),
        }
    }
}
