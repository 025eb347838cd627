//! Typed errors at each component boundary. Background loops bottom out in
//! `Box<dyn Error + Send + Sync>` at the task-spawn boundary, same as the
//! teacher's `frames.rs`/`thumbnails.rs` worker loops.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionErrorKind {
    Forbidden403,
    AuthRequired,
    RateLimit,
    HlsParse,
    ToolNotFound,
    Unknown,
}

impl ExtractionErrorKind {
    /// Classify the last-stage stderr by case-insensitive substring scan,
    /// per spec.md 4.1.
    pub fn classify(stderr: &str) -> Self {
        let lower = stderr.to_lowercase();
        if lower.contains("tool_not_found") {
            ExtractionErrorKind::ToolNotFound
        } else if lower.contains("403") || lower.contains("forbidden") {
            ExtractionErrorKind::Forbidden403
        } else if lower.contains("401") || lower.contains("unauthorized") {
            ExtractionErrorKind::AuthRequired
        } else if lower.contains("429") || lower.contains("rate limit") {
            ExtractionErrorKind::RateLimit
        } else if lower.contains("m3u8") || lower.contains("hls") || lower.contains("dash") {
            ExtractionErrorKind::HlsParse
        } else {
            ExtractionErrorKind::Unknown
        }
    }
}

#[derive(Debug, Error)]
#[error("extraction failed at stage {stage}: {kind:?}: {message}")]
pub struct ExtractionError {
    pub kind: ExtractionErrorKind,
    pub stage: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferenceErrorKind {
    Network,
    ServerError,
    ClientError,
}

#[derive(Debug, Error)]
#[error("inference failed ({kind:?}): {message}")]
pub struct InferenceError {
    pub kind: InferenceErrorKind,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error("database error: {0}")]
    Sql(#[from] sqlx::Error),
    #[error("cache error: {0}")]
    Cache(#[from] redis::RedisError),
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider auth/quota error: {0}")]
    Auth(String),
    #[error("provider returned malformed response: {0}")]
    Malformed(String),
    /// 429/5xx — retried automatically by the caller (spec.md 4.6), surfaced
    /// only once retries are exhausted.
    #[error("provider request transiently failed: {0}")]
    Transient(String),
}

#[derive(Debug, Error)]
pub enum DeepScanError {
    #[error("gemini request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("gemini returned no usable text")]
    EmptyResponse,
    #[error("gemini response could not be parsed as the expected schema: {0}")]
    Parse(String),
    #[error("no frames provided")]
    NoFrames,
    #[error("frame directory not found or empty: {0}")]
    FrameDirMissing(String),
    #[error("job is locked by another worker")]
    DuplicateInProgress,
    #[error("cache error: {0}")]
    Cache(#[from] redis::RedisError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
