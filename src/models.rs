//! Shared record types, mirroring the `#[derive(Debug, Clone, Serialize,
//! Deserialize)]` / `sqlx::FromRow` convention the teacher used for its own
//! shared structs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const MODEL_VERSION: &str = "doom_v1";

/// A candidate video surfaced by a discovery provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoCandidate {
    pub platform: String,
    pub video_id: String,
    pub url: String,
    pub title: Option<String>,
    pub channel: Option<String>,
    pub region: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub view_count: u64,
    pub views_per_hour: f64,
}

impl VideoCandidate {
    pub fn key(&self) -> (String, String) {
        (self.platform.clone(), self.video_id.clone())
    }
}

/// Broker message: a `VideoCandidate` plus an assigned priority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub platform: String,
    pub video_id: String,
    pub url: String,
    pub title: Option<String>,
    pub channel: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub region: Option<String>,
    pub views_per_hour: Option<f64>,
    pub priority: i16,
}

impl From<(VideoCandidate, i16)> for AnalysisJob {
    fn from((c, priority): (VideoCandidate, i16)) -> Self {
        AnalysisJob {
            platform: c.platform,
            video_id: c.video_id,
            url: c.url,
            title: c.title,
            channel: c.channel,
            published_at: c.published_at,
            region: c.region,
            views_per_hour: Some(c.views_per_hour),
            priority,
        }
    }
}

/// One frame's raw bytes plus its position in the sequence.
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: u32,
    pub bytes: Vec<u8>,
}

/// Result of the inference call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceResult {
    pub label_scores: HashMap<String, f64>,
    pub inference_time_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceModelInfo {
    pub id: String,
    pub device: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceResponse {
    pub results: Vec<InferenceResult>,
    pub batch_time_ms: f64,
    pub model: InferenceModelInfo,
}

impl InferenceResult {
    pub fn real(&self) -> f64 {
        self.label_scores.get("real").copied().unwrap_or(0.0)
    }

    pub fn artificial(&self) -> f64 {
        self.label_scores.get("artificial").copied().unwrap_or(0.0)
    }
}

/// External verdict label, as persisted and cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Label {
    Verified,
    Suspicious,
    AiDetected,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Verified => "verified",
            Label::Suspicious => "suspicious",
            Label::AiDetected => "ai-detected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteShare {
    pub real: f64,
    pub artificial: f64,
}

impl Default for VoteShare {
    fn default() -> Self {
        VoteShare { real: 0.5, artificial: 0.5 }
    }
}

/// Diagnostic feature bag, not consulted for decisions downstream of the
/// aggregator itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerdictFeatures {
    pub total_frames: usize,
    pub real_votes: usize,
    pub artificial_votes: usize,
    pub max_artificial: f64,
    pub top3_mean_artificial: f64,
    pub frac_a80: f64,
    pub frac_a90: f64,
    pub frac_a95: f64,
    pub count_a80: usize,
    pub count_a90: usize,
    pub count_a95: usize,
    pub has_ai_keywords: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub label: Label,
    pub confidence: f64,
    pub reason: String,
    pub vote_share: VoteShare,
    pub features: VerdictFeatures,
}

/// A fully assembled record ready to persist + cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub platform: String,
    pub video_id: String,
    pub title: Option<String>,
    pub channel: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub region: Option<String>,
    pub source_url: String,
    pub views_per_hour: Option<f64>,
    pub verdict: Verdict,
    pub frames_count: usize,
    pub batch_time_ms: f64,
    pub frame_policy: String,
}

/// Cache key builders, process-wide namespace (spec.md 3).
pub fn dedup_key(platform: &str, video_id: &str, target_frames: u32) -> String {
    format!("analyzed:{platform}:{video_id}@{MODEL_VERSION}@even_{target_frames}")
}

pub fn snapshot_key(platform: &str, video_id: &str) -> String {
    format!("video:{platform}:{video_id}")
}

pub fn deep_job_key(job_id: &uuid::Uuid) -> String {
    format!("deep:job:{job_id}")
}

pub fn deep_lock_key(platform: &str, video_id: &str) -> String {
    format!("deep:lock:{platform}:{video_id}")
}

pub fn frame_policy(target_frames: u32) -> String {
    format!("even_{target_frames}")
}
