//! Deep-scan: a secondary, Gemini-backed verdict path with its own label
//! precedence and job-status/lock cache keys. Grounded on
//! `original_source/scrollsafe-backend/deep_scan/tasks.py`. Kept separate
//! from `aggregator::aggregate` per spec.md 9 Open Questions — see
//! DESIGN.md.

use std::collections::HashMap;
use std::path::Path;

use base64::Engine;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::cache::Cache;
use crate::config::{Config, GeminiConfig};
use crate::discovery::youtube;
use crate::errors::DeepScanError;
use crate::heuristics::{self, HeuristicVerdict};
use crate::models::{self, Label, VoteShare, MODEL_VERSION};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeepScanLabel {
    AiDetected,
    Real,
    Suspicious,
}

impl DeepScanLabel {
    fn from_str_lossy(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "ai-detected" => DeepScanLabel::AiDetected,
            "real" => DeepScanLabel::Real,
            _ => DeepScanLabel::Suspicious,
        }
    }

    /// Precedence for majority-vote tie-breaking: `ai-detected` > `suspicious` > `real`.
    fn precedence(&self) -> u8 {
        match self {
            DeepScanLabel::AiDetected => 2,
            DeepScanLabel::Suspicious => 1,
            DeepScanLabel::Real => 0,
        }
    }

    fn as_external(&self) -> Label {
        match self {
            DeepScanLabel::AiDetected => Label::AiDetected,
            DeepScanLabel::Real => Label::Verified,
            DeepScanLabel::Suspicious => Label::Suspicious,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeepScanFrameVerdict {
    pub frame: u32,
    pub verdict: DeepScanLabel,
    pub confidence: f64,
    pub reason: String,
}

/// Everything the caller (an HTTP handler, typically) needs to enqueue a
/// deep-scan job. `frame_dir` must already contain `frame_NNN.jpg` files
/// written by the extractor (spec.md 4.1's naming convention).
#[derive(Debug, Clone, Deserialize)]
pub struct DeepScanJob {
    pub job_id: Uuid,
    pub platform: String,
    pub video_id: String,
    pub url: String,
    pub frame_dir: String,
    pub client_hints: Option<Value>,
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeepScanResult {
    pub platform: String,
    pub video_id: String,
    pub label: Label,
    pub confidence: f64,
    pub reason: String,
    pub vote_share: VoteShare,
    pub features: Value,
    pub frames_count: usize,
    pub batch_time_ms: f64,
    pub analyzed_at: chrono::DateTime<Utc>,
    pub model_version: &'static str,
}

struct GeminiAggregate {
    label: DeepScanLabel,
    confidence: f64,
    reason: String,
    vote_share: VoteShare,
    features: Value,
}

/// Thin REST wrapper: no official Gemini SDK appears anywhere in the
/// retrieval pack, so this hand-rolls the `generateContent` call the same
/// way `http_client::InferenceClient` hand-rolls its own POST.
pub struct GeminiClient {
    http: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Self {
        GeminiClient { http: reqwest::Client::new(), config }
    }

    fn endpoint(&self) -> String {
        format!(
            "https://generativelanguage.googleapis.com/{}/models/{}:generateContent?key={}",
            self.config.api_version, self.config.model, self.config.api_key
        )
    }

    async fn generate(&self, contents: Value) -> Result<String, DeepScanError> {
        let body = json!({
            "contents": contents,
            "generationConfig": {
                "temperature": 0.0,
                "maxOutputTokens": 1400,
                "responseMimeType": "application/json",
                "responseSchema": response_schema(),
            },
        });

        let response = self.http.post(self.endpoint()).json(&body).send().await?;
        let status = response.status();
        let payload: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            return Err(DeepScanError::Parse(format!("gemini returned {status}: {payload}")));
        }
        extract_text(&payload).ok_or(DeepScanError::EmptyResponse)
    }

    /// One call, with a single repair-retry on parse failure, matching
    /// `_call_gemini`'s two-attempt shape in the original.
    async fn call(&self, frames: &[Vec<u8>]) -> Result<Value, DeepScanError> {
        if frames.is_empty() {
            return Err(DeepScanError::NoFrames);
        }

        let prompt = build_prompt(frames.len());
        let mut parts = vec![json!({"text": prompt})];
        for frame in frames {
            parts.push(json!({
                "inline_data": {
                    "mime_type": "image/jpeg",
                    "data": base64::engine::general_purpose::STANDARD.encode(frame),
                }
            }));
        }
        let contents = json!([{"parts": parts}]);

        let raw = self.generate(contents).await?;
        if let Ok(parsed) = parse_payload(&raw) {
            return Ok(parsed);
        }

        eprintln!("[deep_scan] gemini parse failed on first pass; attempting repair retry");
        let repair_prompt = format!(
            "Convert the following content into valid JSON with this schema only: \
            {{\"frames\":[{{\"frame\":1,\"verdict\":\"ai-detected|real|suspicious\",\"confidence\":0.0,\"reason\":\"...\"}}],\
            \"summary\":{{\"overall\":\"...\"}}}}. Return JSON only.\n\nCONTENT:\n{raw}"
        );
        let repair_raw = self.generate(json!([{"parts": [{"text": repair_prompt}]}])).await?;
        parse_payload(&repair_raw)
    }
}

fn response_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "frames": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "frame": {"type": "integer"},
                        "verdict": {"type": "string", "enum": ["ai-detected", "real", "suspicious"]},
                        "confidence": {"type": "number"},
                        "reason": {"type": "string"},
                    },
                    "required": ["frame", "verdict", "confidence", "reason"],
                },
            },
            "summary": {
                "type": "object",
                "properties": {"overall": {"type": "string"}},
                "required": ["overall"],
            },
        },
        "required": ["frames", "summary"],
    })
}

fn build_prompt(frame_count: usize) -> String {
    format!(
        "You are a forensic visual analyst. You will be given video frames (in order).\n\
        There are {frame_count} frames.\n\
        Task: for EACH frame, output (1) a verdict and (2) a confidence score.\n\
        Then output ONE short overall summary that synthesizes the evidence across all frames.\n\n\
        Verdict must be exactly one of: \"ai-detected\", \"real\", \"suspicious\".\n\
        Confidence must be a number from 0.0 to 1.0.\n\n\
        Be conservative and filter-aware:\n\
        - Do NOT classify as \"ai-detected\" based only on smooth skin, beauty filters, denoise, \
        compression artifacts, bokeh, cinematic color grading, motion blur, or shallow depth of field.\n\
        - Use \"ai-detected\" only when there are clear structural/semantic clues such as impossible \
        anatomy, warped or unstable text, object merging, identity drift, impossible causality, or \
        scene-logic contradictions.\n\
        - Evaluate temporal consistency AND semantic/context plausibility together. A video can be \
        temporally consistent but still synthetic due to implausible context/physics.\n\
        - If evidence is weak or explainable by filters/compression, prefer \"suspicious\" over \"ai-detected\".\n\
        - If cues are mostly soft visual style cues, cap confidence at 0.7.\n\n\
        Return a structured response matching this shape:\n\
        {{\n  \"frames\": [{{\"frame\": 1, \"verdict\": \"...\", \"confidence\": 0.0, \"reason\": \"max 16 words\"}}],\n  \
        \"summary\": {{\"overall\": \"max 140 words\"}}\n}}\n"
    )
}

fn extract_text(response: &Value) -> Option<String> {
    response
        .get("candidates")?
        .as_array()?
        .first()?
        .get("content")?
        .get("parts")?
        .as_array()?
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
        .into()
}

fn sanitize_json_like(text: &str) -> String {
    let mut s = text.trim().to_string();
    if let Some(rest) = s.strip_prefix("```json") {
        s = rest.to_string();
    } else if let Some(rest) = s.strip_prefix("```") {
        s = rest.to_string();
    }
    if let Some(rest) = s.strip_suffix("```") {
        s = rest.to_string();
    }
    s.trim().to_string()
}

fn parse_payload(raw: &str) -> Result<Value, DeepScanError> {
    let sanitized = sanitize_json_like(raw);
    let parsed: Value = serde_json::from_str(&sanitized).map_err(|e| DeepScanError::Parse(e.to_string()))?;
    if parsed.get("frames").is_some() {
        Ok(parsed)
    } else {
        Err(DeepScanError::Parse("response missing 'frames'".to_string()))
    }
}

/// Majority vote across per-frame verdicts, ties broken by precedence
/// `ai-detected > suspicious > real`. `vote_share` counts only `real`/
/// `ai-detected` votes, ignoring `suspicious`, matching the original's tally.
fn aggregate_gemini(payload: &Value, frame_count: usize) -> GeminiAggregate {
    let frames_raw = payload.get("frames").and_then(|v| v.as_array()).cloned().unwrap_or_default();

    let mut normalized = Vec::new();
    for (idx, entry) in frames_raw.iter().enumerate() {
        let verdict_str = entry.get("verdict").and_then(|v| v.as_str()).unwrap_or("suspicious");
        let verdict = DeepScanLabel::from_str_lossy(verdict_str);
        let confidence = entry.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.0).clamp(0.0, 1.0);
        let reason: String = entry.get("reason").and_then(|v| v.as_str()).unwrap_or("").chars().take(140).collect();
        let frame = entry.get("frame").and_then(|v| v.as_u64()).map(|n| n as u32).unwrap_or((idx + 1) as u32);
        normalized.push(DeepScanFrameVerdict { frame, verdict, confidence, reason });
    }

    if normalized.len() != frame_count {
        eprintln!("[deep_scan] gemini returned {} frame entries for {frame_count} frames", normalized.len());
    }

    let mut counts: HashMap<DeepScanLabel, usize> = HashMap::new();
    for f in &normalized {
        *counts.entry(f.verdict).or_insert(0) += 1;
    }

    let chosen = counts
        .iter()
        .max_by_key(|(label, count)| (**count, label.precedence()))
        .map(|(label, _)| *label)
        .unwrap_or(DeepScanLabel::Suspicious);

    let chosen_confs: Vec<f64> = normalized.iter().filter(|f| f.verdict == chosen).map(|f| f.confidence).collect();
    let confidence = if chosen_confs.is_empty() { 0.0 } else { chosen_confs.iter().sum::<f64>() / chosen_confs.len() as f64 };

    let real_votes = *counts.get(&DeepScanLabel::Real).unwrap_or(&0) as f64;
    let artificial_votes = *counts.get(&DeepScanLabel::AiDetected).unwrap_or(&0) as f64;
    let total = real_votes + artificial_votes;
    let vote_share = if total > 0.0 {
        VoteShare { real: real_votes / total, artificial: artificial_votes / total }
    } else {
        VoteShare::default()
    };

    let overall = payload
        .get("summary")
        .and_then(|s| s.get("overall"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .trim()
        .to_string();

    let features = json!({
        "gemini": {
            "model": "gemini",
            "frames": normalized,
            "summary": {"overall": overall},
        }
    });

    GeminiAggregate {
        label: chosen,
        confidence,
        reason: format!("gemini: {}", if overall.is_empty() { "model_vote".to_string() } else { overall }),
        vote_share,
        features,
    }
}

fn fallback_aggregate() -> GeminiAggregate {
    GeminiAggregate {
        label: DeepScanLabel::Suspicious,
        confidence: 0.55,
        reason: "gemini:parse_fallback".to_string(),
        vote_share: VoteShare::default(),
        features: json!({
            "gemini": {"frames": [], "summary": {"overall": "Model response parsing failed; returned cautious fallback."}}
        }),
    }
}

/// Merge the Gemini aggregate with the metadata heuristic and any
/// client-supplied hints, matching `_apply_heuristics`'s precedence: a
/// client hint of `ai-detected` always wins; a client hint of `suspicious`
/// only escalates a `verified` gemini result.
fn apply_heuristics(aggregate: GeminiAggregate, heuristic: Option<&HeuristicVerdict>, client_hints: Option<&Value>) -> (Label, f64, String, Value) {
    let mut label = aggregate.label.as_external();
    let mut confidence = aggregate.confidence;
    let mut reasons = vec![aggregate.reason.clone()];
    let mut features = aggregate.features;

    if let Some(h) = heuristic {
        if let Some(obj) = features.as_object_mut() {
            obj.insert("heuristics".to_string(), json!({"result": h.result, "confidence": h.confidence, "reason": h.reason}));
        }
        reasons.push(format!("metadata:{}", h.reason));
        if h.result == "ai-detected" && label == Label::AiDetected {
            confidence = confidence.max(h.confidence);
        }
    }

    if let Some(hints) = client_hints {
        if let Some(obj) = features.as_object_mut() {
            obj.insert("client_hints".to_string(), hints.clone());
        }
        let hint_label = hints.get("result").and_then(|v| v.as_str());
        let hint_conf = hints.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.0);
        if let Some(reason) = hints.get("reason").and_then(|v| v.as_str()) {
            reasons.push(format!("client:{reason}"));
        }
        match hint_label {
            Some("ai-detected") => {
                label = Label::AiDetected;
                confidence = confidence.max(hint_conf);
            }
            Some("suspicious") if label == Label::Verified => {
                label = Label::Suspicious;
                confidence = confidence.max(hint_conf.max(0.6));
            }
            _ => {}
        }
    }

    (label, confidence.clamp(0.0, 1.0), reasons.into_iter().filter(|r| !r.is_empty()).collect::<Vec<_>>().join("; "), features)
}

async fn load_saved_frames(frame_dir: &str) -> Result<Vec<Vec<u8>>, DeepScanError> {
    let dir = Path::new(frame_dir);
    if !dir.exists() {
        return Err(DeepScanError::FrameDirMissing(frame_dir.to_string()));
    }
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if name.starts_with("frame_") && name.ends_with(".jpg") {
            paths.push(path);
        }
    }
    if paths.is_empty() {
        return Err(DeepScanError::FrameDirMissing(frame_dir.to_string()));
    }
    paths.sort();

    let mut frames = Vec::with_capacity(paths.len());
    for path in paths {
        frames.push(tokio::fs::read(&path).await?);
    }
    Ok(frames)
}

async fn cleanup_frame_dir(frame_dir: &str) {
    if let Err(e) = tokio::fs::remove_dir_all(frame_dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            eprintln!("[deep_scan] failed to remove frame directory {frame_dir}: {e}");
        }
    }
}

async fn store_job_status(cache: &Cache, job_id: &Uuid, ttl_seconds: u64, status: &str, result: Option<&DeepScanResult>, error: Option<&str>) {
    let mut payload = json!({"status": status, "updated_at": Utc::now()});
    if let Some(result) = result {
        payload["result"] = serde_json::to_value(result).unwrap_or(Value::Null);
    }
    if let Some(error) = error {
        payload["error"] = json!(error);
    }
    if let Err(e) = cache.set_json(&models::deep_job_key(job_id), &payload, ttl_seconds).await {
        eprintln!("[deep_scan] failed to write job status for {job_id}: {e}");
    }
}

/// Full lifecycle: lock -> load frames -> heuristics -> gemini -> aggregate
/// -> merge -> status write -> unlock. Any Gemini call/parse failure falls
/// back to a fixed suspicious verdict rather than failing the job outright,
/// matching the original's broad `except Exception` fallback.
pub async fn process_deep_scan_job(
    client: &GeminiClient,
    cache: &Cache,
    config: &Config,
    gemini: &GeminiConfig,
    job: &DeepScanJob,
) -> Result<DeepScanResult, DeepScanError> {
    let lock_key = models::deep_lock_key(&job.platform, &job.video_id);
    let acquired = cache.claim(&lock_key, gemini.lock_ttl_seconds).await?;
    if !acquired {
        println!("[deep_scan] skip {}:{} (job {}): lock held", job.platform, job.video_id, job.job_id);
        store_job_status(cache, &job.job_id, gemini.job_ttl_seconds, "failed", None, Some("duplicate_in_progress")).await;
        return Err(DeepScanError::DuplicateInProgress);
    }

    store_job_status(cache, &job.job_id, gemini.job_ttl_seconds, "running", None, None).await;

    let result = run_job(client, config, job).await;

    cache.release(&lock_key).await?;
    cleanup_frame_dir(&job.frame_dir).await;

    match &result {
        Ok(record) => store_job_status(cache, &job.job_id, gemini.job_ttl_seconds, "done", Some(record), None).await,
        Err(e) => store_job_status(cache, &job.job_id, gemini.job_ttl_seconds, "failed", None, Some(&e.to_string())).await,
    }

    result
}

async fn run_job(client: &GeminiClient, config: &Config, job: &DeepScanJob) -> Result<DeepScanResult, DeepScanError> {
    let heuristic_source = if job.platform == "youtube" {
        match youtube::fetch_video_metadata(config, &job.video_id).await {
            Ok(Some(meta)) => Some((meta.title, meta.channel)),
            _ => metadata_title_channel(job.metadata.as_ref()),
        }
    } else {
        metadata_title_channel(job.metadata.as_ref())
    };
    let heuristic = heuristic_source.map(|(title, channel)| heuristics::scan(title.as_deref(), channel.as_deref()));

    let frames = load_saved_frames(&job.frame_dir).await?;
    let frame_count = frames.len();

    let started = std::time::Instant::now();
    let gemini_payload = match client.call(&frames).await {
        Ok(payload) => payload,
        Err(e) => {
            eprintln!("[deep_scan] gemini call/parse failed for job {}: {e}; using suspicious fallback", job.job_id);
            json!({"frames": [], "summary": {"overall": "Model response could not be parsed reliably."}})
        }
    };
    let batch_time_ms = started.elapsed().as_secs_f64() * 1000.0;

    let aggregate = if gemini_payload.get("frames").and_then(|v| v.as_array()).is_some_and(|a| !a.is_empty()) {
        aggregate_gemini(&gemini_payload, frame_count)
    } else {
        fallback_aggregate()
    };
    let vote_share = VoteShare { real: aggregate.vote_share.real, artificial: aggregate.vote_share.artificial };
    let (label, confidence, reason, features) = apply_heuristics(aggregate, heuristic.as_ref(), job.client_hints.as_ref());

    Ok(DeepScanResult {
        platform: job.platform.clone(),
        video_id: job.video_id.clone(),
        label,
        confidence,
        reason,
        vote_share,
        features,
        frames_count: frame_count,
        batch_time_ms,
        analyzed_at: Utc::now(),
        model_version: MODEL_VERSION,
    })
}

fn metadata_title_channel(metadata: Option<&Value>) -> Option<(Option<String>, Option<String>)> {
    let metadata = metadata?;
    let title = metadata.get("title").and_then(|v| v.as_str()).map(|s| s.to_string());
    let channel = metadata
        .get("channel")
        .or_else(|| metadata.get("description"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    Some((title, channel))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_clean_json_payload() {
        let raw = r#"{"frames":[{"frame":1,"verdict":"real","confidence":0.9,"reason":"ok"}],"summary":{"overall":"fine"}}"#;
        let parsed = parse_payload(raw).unwrap();
        assert_eq!(parsed["frames"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn strips_markdown_fence() {
        let raw = "```json\n{\"frames\":[{\"frame\":1,\"verdict\":\"real\",\"confidence\":0.5,\"reason\":\"x\"}],\"summary\":{\"overall\":\"y\"}}\n```";
        let parsed = parse_payload(raw).unwrap();
        assert!(parsed.get("frames").is_some());
    }

    #[test]
    fn aggregate_prefers_ai_detected_on_tie() {
        let payload = json!({
            "frames": [
                {"frame": 1, "verdict": "ai-detected", "confidence": 0.8, "reason": "a"},
                {"frame": 2, "verdict": "real", "confidence": 0.8, "reason": "b"},
            ],
            "summary": {"overall": "mixed"}
        });
        let aggregate = aggregate_gemini(&payload, 2);
        assert_eq!(aggregate.label, DeepScanLabel::AiDetected);
    }

    #[test]
    fn aggregate_ignores_suspicious_in_vote_share() {
        let payload = json!({
            "frames": [
                {"frame": 1, "verdict": "real", "confidence": 0.6, "reason": "a"},
                {"frame": 2, "verdict": "suspicious", "confidence": 0.5, "reason": "b"},
                {"frame": 3, "verdict": "suspicious", "confidence": 0.5, "reason": "c"},
            ],
            "summary": {"overall": ""}
        });
        let aggregate = aggregate_gemini(&payload, 3);
        assert_eq!(aggregate.vote_share.real, 1.0);
        assert_eq!(aggregate.vote_share.artificial, 0.0);
    }

    #[test]
    fn client_hint_ai_detected_always_wins() {
        let aggregate = GeminiAggregate {
            label: DeepScanLabel::Real,
            confidence: 0.4,
            reason: "gemini: calm".to_string(),
            vote_share: VoteShare::default(),
            features: json!({}),
        };
        let hints = json!({"result": "ai-detected", "confidence": 0.95, "reason": "client says so"});
        let (label, confidence, _, _) = apply_heuristics(aggregate, None, Some(&hints));
        assert_eq!(label, Label::AiDetected);
        assert_eq!(confidence, 0.95);
    }

    #[test]
    fn fallback_is_suspicious_at_fixed_confidence() {
        let fallback = fallback_aggregate();
        assert_eq!(fallback.label, DeepScanLabel::Suspicious);
        assert_eq!(fallback.confidence, 0.55);
    }
}
