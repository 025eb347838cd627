//! Frame extractor: fallback ladder around `yt-dlp` + `ffmpeg` producing an
//! ordered set of JPEG frames (spec.md 4.1).
//!
//! Grounded on `frames.rs::extract_and_upload_video_frames` for the
//! subprocess + temp-dir-per-job shape; the piped-stdin stages and their
//! concurrent stderr drain are new relative to the teacher and are grounded
//! on the original resolver's `_try_fast_path`/`_drain_stderr`.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};

use crate::errors::{ExtractionError, ExtractionErrorKind};
use crate::models::Frame;

/// Cookie/proxy configuration, read once at startup and passed down as an
/// immutable value (spec.md 9 Design Notes).
#[derive(Debug, Clone, Default)]
pub struct ExtractorConfig {
    pub cookies_file: Option<String>,
    pub cookies_browser: Option<String>,
    pub http_proxy: Option<String>,
}

impl ExtractorConfig {
    fn cookie_args(&self) -> Vec<String> {
        if let Some(file) = &self.cookies_file {
            vec!["--cookies".to_string(), file.clone()]
        } else if let Some(spec) = &self.cookies_browser {
            vec!["--cookies-from-browser".to_string(), spec.clone()]
        } else {
            Vec::new()
        }
    }
}

/// True if spawning a subprocess failed because the executable itself is
/// missing from `PATH`, as opposed to it running and failing.
fn is_tool_missing(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::NotFound
}

/// Tags a spawn/output failure that's actually a missing-executable error
/// with a sentinel prefix `classify_stage_error` recognizes, so the ladder
/// can bubble `ToolNotFound` instead of grinding through every stage.
fn tag_spawn_err(tool: &str, err: std::io::Error) -> String {
    if is_tool_missing(&err) {
        format!("TOOL_NOT_FOUND: {tool}: {err}")
    } else {
        format!("{tool} spawn failed: {err}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Fast,
    A,
    B,
    C,
}

impl Stage {
    fn name(self) -> &'static str {
        match self {
            Stage::Fast => "fast",
            Stage::A => "a",
            Stage::B => "b",
            Stage::C => "c",
        }
    }

    fn format_selector(self) -> &'static str {
        match self {
            Stage::Fast => "bestvideo*[ext=mp4]/bestvideo*/best[ext=mp4]/best",
            Stage::A | Stage::B | Stage::C => "best[ext=mp4]/best",
        }
    }
}

/// `fps = target_frames / max(duration, eps)`, clamped to `[0.01, 1.0]`.
pub fn compute_fps(duration_secs: f64, target_frames: u32) -> f64 {
    let eps = 1e-6;
    let raw = target_frames as f64 / duration_secs.max(eps);
    raw.clamp(0.01, 1.0)
}

/// Default duration when the probe fails: `target_frames` seconds, i.e.
/// ~1 fps (spec.md 4.1).
fn default_duration(target_frames: u32) -> f64 {
    target_frames as f64
}

fn parse_duration(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    let parts: Vec<&str> = raw.split(':').collect();
    match parts.len() {
        1 => parts[0].parse::<f64>().ok(),
        2 => {
            let m: f64 = parts[0].parse().ok()?;
            let s: f64 = parts[1].parse().ok()?;
            Some(m * 60.0 + s)
        }
        3 => {
            let h: f64 = parts[0].parse().ok()?;
            let m: f64 = parts[1].parse().ok()?;
            let s: f64 = parts[2].parse().ok()?;
            Some(h * 3600.0 + m * 60.0 + s)
        }
        _ => None,
    }
}

/// Probe duration via `yt-dlp --get-duration`, 30 s timeout. Falls back to
/// `target_frames` seconds on any failure.
async fn probe_duration(url: &str, config: &ExtractorConfig, target_frames: u32) -> f64 {
    let mut args = vec!["--get-duration".to_string(), "--quiet".to_string(), "--no-warnings".to_string()];
    args.extend(config.cookie_args());
    args.push(url.to_string());

    let mut cmd = Command::new("yt-dlp");
    cmd.args(&args).stdout(Stdio::piped()).stderr(Stdio::null());
    apply_proxy(&mut cmd, config);

    let result = tokio::time::timeout(Duration::from_secs(30), async {
        let mut child = cmd.spawn().ok()?;
        let mut stdout = child.stdout.take()?;
        let mut buf = String::new();
        stdout.read_to_string(&mut buf).await.ok()?;
        let _ = child.wait().await;
        parse_duration(&buf)
    })
    .await;

    match result {
        Ok(Some(d)) if d > 0.0 => d,
        _ => default_duration(target_frames),
    }
}

fn apply_proxy(cmd: &mut Command, config: &ExtractorConfig) {
    if let Some(proxy) = &config.http_proxy {
        cmd.env("HTTPS_PROXY", proxy);
        cmd.env("HTTP_PROXY", proxy);
    }
}

/// Drains a child's stderr concurrently so its pipe buffer never fills and
/// deadlocks the writer, accumulating the text for error classification.
fn spawn_stderr_drain(child: &mut Child) -> tokio::task::JoinHandle<String> {
    let stderr = child.stderr.take().expect("stderr must be piped");
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr).lines();
        let mut collected = String::new();
        while let Ok(Some(line)) = reader.next_line().await {
            collected.push_str(&line);
            collected.push('\n');
        }
        collected
    })
}

async fn kill_and_drain(mut child: Child, drain: tokio::task::JoinHandle<String>) -> String {
    let _ = child.start_kill();
    drop(child.stdout.take());
    let _ = tokio::time::timeout(Duration::from_secs(5), child.wait()).await;
    tokio::time::timeout(Duration::from_secs(1), drain)
        .await
        .ok()
        .and_then(|r| r.ok())
        .unwrap_or_default()
}

fn ffmpeg_base_args(fps: f64, target_frames: u32, output_pattern: &str) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-nostdin".to_string(),
        "-an".to_string(),
        "-vf".to_string(),
        format!("fps=fps={fps:.8}:round=up,scale=-2:1080:force_original_aspect_ratio=decrease"),
        "-vsync".to_string(),
        "vfr".to_string(),
        "-frames:v".to_string(),
        target_frames.to_string(),
        "-q:v".to_string(),
        "2".to_string(),
        "-y".to_string(),
        output_pattern.to_string(),
    ]
}

/// Stage Fast/A: pipe `yt-dlp` stdout into `ffmpeg` stdin.
async fn try_piped_stage(
    stage: Stage,
    url: &str,
    fps: f64,
    target_frames: u32,
    output_pattern: &str,
    config: &ExtractorConfig,
    timeout: Duration,
) -> Result<(), String> {
    let mut ytdlp_args = vec![
        "-f".to_string(),
        stage.format_selector().to_string(),
        "-o".to_string(),
        "-".to_string(),
        "--quiet".to_string(),
        "--no-warnings".to_string(),
    ];
    ytdlp_args.extend(config.cookie_args());
    ytdlp_args.push(url.to_string());

    let mut ytdlp_cmd = Command::new("yt-dlp");
    ytdlp_cmd.args(&ytdlp_args).stdout(Stdio::piped()).stderr(Stdio::piped());
    apply_proxy(&mut ytdlp_cmd, config);

    let mut ytdlp_child = ytdlp_cmd.spawn().map_err(|e| tag_spawn_err("yt-dlp", e))?;
    let stderr_drain = spawn_stderr_drain(&mut ytdlp_child);
    let mut ytdlp_stdout = ytdlp_child.stdout.take().ok_or("yt-dlp stdout missing")?;

    let mut ffmpeg_cmd = Command::new("ffmpeg");
    ffmpeg_cmd
        .args(ffmpeg_base_args(fps, target_frames, output_pattern))
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    let ffmpeg_result = tokio::time::timeout(timeout, async {
        let mut ffmpeg_child = ffmpeg_cmd.spawn().map_err(|e| tag_spawn_err("ffmpeg", e))?;
        let mut ffmpeg_stdin = ffmpeg_child.stdin.take().ok_or("ffmpeg stdin missing")?;
        // Relay yt-dlp's stdout into ffmpeg's stdin; a broken pipe here just
        // means ffmpeg stopped reading once it had enough frames.
        let _ = tokio::io::copy(&mut ytdlp_stdout, &mut ffmpeg_stdin).await;
        drop(ffmpeg_stdin);
        ffmpeg_child.wait_with_output().await.map_err(|e| format!("ffmpeg wait failed: {e}"))
    })
    .await;

    let stderr_text = kill_and_drain(ytdlp_child, stderr_drain).await;

    match ffmpeg_result {
        Ok(Ok(output)) if output.status.success() => Ok(()),
        Ok(Ok(output)) => Err(format!(
            "ffmpeg exited {}: {}\nyt-dlp: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr),
            stderr_text
        )),
        Ok(Err(e)) => Err(format!("{e}\nyt-dlp: {stderr_text}")),
        Err(_) => Err(format!("ffmpeg timed out\nyt-dlp: {stderr_text}")),
    }
}

/// Stage B: resolve the direct media URL + headers, feed the URL to
/// `ffmpeg` directly (no piping).
async fn try_resolved_stage(
    url: &str,
    fps: f64,
    target_frames: u32,
    output_pattern: &str,
    config: &ExtractorConfig,
    timeout: Duration,
) -> Result<(), String> {
    let mut dump_args = vec!["-j".to_string(), "--no-warnings".to_string(), "--quiet".to_string()];
    dump_args.extend(config.cookie_args());
    dump_args.push(url.to_string());

    let mut cmd = Command::new("yt-dlp");
    cmd.args(&dump_args).stdout(Stdio::piped()).stderr(Stdio::piped());
    apply_proxy(&mut cmd, config);

    let output = cmd.output().await.map_err(|e| tag_spawn_err("yt-dlp", e))?;
    if !output.status.success() {
        return Err(format!("yt-dlp -j exited {}: {}", output.status, String::from_utf8_lossy(&output.stderr)));
    }

    let info: serde_json::Value = serde_json::from_slice(&output.stdout)
        .map_err(|e| format!("yt-dlp -j produced unparsable json: {e}"))?;
    let media_url = info.get("url").and_then(|v| v.as_str()).ok_or("no direct url in yt-dlp info")?;
    let headers = info.get("http_headers").and_then(|v| v.as_object());

    let mut ffmpeg_args = Vec::new();
    let is_hls = media_url.contains(".m3u8");
    if is_hls {
        ffmpeg_args.push("-protocol_whitelist".to_string());
        ffmpeg_args.push("file,http,https,tcp,tls,crypto".to_string());
    }
    if let Some(headers) = headers {
        let header_lines: Vec<String> = headers
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|v| format!("{k}: {v}")))
            .collect();
        if !header_lines.is_empty() {
            ffmpeg_args.push("-headers".to_string());
            ffmpeg_args.push(format!("{}\r\n", header_lines.join("\r\n")));
        }
    }
    ffmpeg_args.push("-i".to_string());
    ffmpeg_args.push(media_url.to_string());
    ffmpeg_args.extend(ffmpeg_base_args(fps, target_frames, output_pattern));

    let mut ffmpeg_cmd = Command::new("ffmpeg");
    ffmpeg_cmd.args(&ffmpeg_args).stdout(Stdio::null()).stderr(Stdio::piped());

    let result = tokio::time::timeout(timeout, ffmpeg_cmd.output())
        .await
        .map_err(|_| "ffmpeg timed out".to_string())?
        .map_err(|e| tag_spawn_err("ffmpeg", e))?;

    if result.status.success() {
        Ok(())
    } else {
        Err(format!("ffmpeg exited {}: {}", result.status, String::from_utf8_lossy(&result.stderr)))
    }
}

/// Stage C: full download to a temp file, probe duration with `ffprobe`,
/// transcode locally.
async fn try_download_stage(
    url: &str,
    target_frames: u32,
    output_pattern: &str,
    config: &ExtractorConfig,
    timeout: Duration,
    work_dir: &std::path::Path,
) -> Result<(), String> {
    let download_path = work_dir.join("source.mp4");
    let mut dl_args = vec![
        "-f".to_string(),
        Stage::C.format_selector().to_string(),
        "-o".to_string(),
        download_path.to_string_lossy().to_string(),
        "--quiet".to_string(),
        "--no-warnings".to_string(),
    ];
    dl_args.extend(config.cookie_args());
    dl_args.push(url.to_string());

    let mut dl_cmd = Command::new("yt-dlp");
    dl_cmd.args(&dl_args).stdout(Stdio::null()).stderr(Stdio::piped());
    apply_proxy(&mut dl_cmd, config);

    let dl_output = tokio::time::timeout(timeout, dl_cmd.output())
        .await
        .map_err(|_| "yt-dlp download timed out".to_string())?
        .map_err(|e| tag_spawn_err("yt-dlp", e))?;
    if !dl_output.status.success() {
        return Err(format!("yt-dlp download exited {}: {}", dl_output.status, String::from_utf8_lossy(&dl_output.stderr)));
    }

    let probe_output = Command::new("ffprobe")
        .args([
            "-v", "error",
            "-show_entries", "format=duration",
            "-of", "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(&download_path)
        .output()
        .await
        .map_err(|e| tag_spawn_err("ffprobe", e))?;
    let duration = String::from_utf8_lossy(&probe_output.stdout)
        .trim()
        .parse::<f64>()
        .unwrap_or_else(|_| default_duration(target_frames));
    let fps = compute_fps(duration, target_frames);

    let mut ffmpeg_args = vec!["-i".to_string(), download_path.to_string_lossy().to_string()];
    ffmpeg_args.extend(ffmpeg_base_args(fps, target_frames, output_pattern));

    let mut ffmpeg_cmd = Command::new("ffmpeg");
    ffmpeg_cmd.args(&ffmpeg_args).stdout(Stdio::null()).stderr(Stdio::piped());

    let result = tokio::time::timeout(timeout, ffmpeg_cmd.output())
        .await
        .map_err(|_| "ffmpeg timed out".to_string())?
        .map_err(|e| tag_spawn_err("ffmpeg", e))?;

    if result.status.success() {
        Ok(())
    } else {
        Err(format!("ffmpeg exited {}: {}", result.status, String::from_utf8_lossy(&result.stderr)))
    }
}

/// Read back the numbered frame files from `dir`, sorted lexicographically,
/// capped to `target_frames`.
async fn collect_frames(dir: &std::path::Path, target_frames: u32) -> Result<Vec<Frame>, String> {
    let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| e.to_string())?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| e.to_string())? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("jpg") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut frames = Vec::new();
    for (i, path) in paths.into_iter().take(target_frames as usize).enumerate() {
        let bytes = tokio::fs::read(&path).await.map_err(|e| e.to_string())?;
        frames.push(Frame { index: (i + 1) as u32, bytes });
    }
    Ok(frames)
}

/// Run the fallback ladder end to end: duration probe, fps computation,
/// Fast -> A -> B -> C, stopping at the first stage that yields frames.
pub async fn extract(
    url: &str,
    target_frames: u32,
    timeout: Duration,
    config: &ExtractorConfig,
) -> Result<Vec<Frame>, ExtractionError> {
    let duration = probe_duration(url, config, target_frames).await;
    let fps = compute_fps(duration, target_frames);

    let work_dir = std::env::temp_dir().join(format!("doomscroller_{}", rand::random::<u64>()));
    tokio::fs::create_dir_all(&work_dir).await.map_err(|e| ExtractionError {
        kind: ExtractionErrorKind::Unknown,
        stage: "setup",
        message: e.to_string(),
    })?;
    let output_pattern = work_dir.join("frame_%03d.jpg").to_string_lossy().to_string();

    let mut last_errors: Vec<(Stage, String)> = Vec::new();

    for stage in [Stage::Fast, Stage::A] {
        match try_piped_stage(stage, url, fps, target_frames, &output_pattern, config, timeout).await {
            Ok(()) => {
                let frames = collect_frames(&work_dir, target_frames).await;
                let _ = tokio::fs::remove_dir_all(&work_dir).await;
                return frames_or_error(frames, stage, &last_errors);
            }
            Err(msg) => last_errors.push((stage, msg)),
        }
    }

    match try_resolved_stage(url, fps, target_frames, &output_pattern, config, timeout).await {
        Ok(()) => {
            let frames = collect_frames(&work_dir, target_frames).await;
            let _ = tokio::fs::remove_dir_all(&work_dir).await;
            return frames_or_error(frames, Stage::B, &last_errors);
        }
        Err(msg) => last_errors.push((Stage::B, msg)),
    }

    match try_download_stage(url, target_frames, &output_pattern, config, timeout, &work_dir).await {
        Ok(()) => {
            let frames = collect_frames(&work_dir, target_frames).await;
            let _ = tokio::fs::remove_dir_all(&work_dir).await;
            return frames_or_error(frames, Stage::C, &last_errors);
        }
        Err(msg) => last_errors.push((Stage::C, msg)),
    }

    let _ = tokio::fs::remove_dir_all(&work_dir).await;
    let (last_stage, last_message) = last_errors.last().cloned().unwrap_or((Stage::C, "no attempts made".to_string()));
    Err(ExtractionError {
        kind: ExtractionErrorKind::classify(&last_message),
        stage: last_stage.name(),
        message: last_errors
            .into_iter()
            .map(|(stage, msg)| format!("[{}] {}", stage.name(), msg))
            .collect::<Vec<_>>()
            .join("; "),
    })
}

fn frames_or_error(
    frames: Result<Vec<Frame>, String>,
    stage: Stage,
    last_errors: &[(Stage, String)],
) -> Result<Vec<Frame>, ExtractionError> {
    match frames {
        Ok(frames) if !frames.is_empty() => Ok(frames),
        Ok(_) => Err(ExtractionError {
            kind: ExtractionErrorKind::Unknown,
            stage: stage.name(),
            message: "stage reported success but produced no frames".to_string(),
        }),
        Err(msg) => Err(ExtractionError {
            kind: ExtractionErrorKind::classify(&msg),
            stage: stage.name(),
            message: format!("{msg}; prior: {last_errors:?}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fps_clamped_to_one_when_duration_is_tiny() {
        assert_eq!(compute_fps(0.0001, 16), 1.0);
    }

    #[test]
    fn fps_floored_at_point_zero_one() {
        assert_eq!(compute_fps(100_000.0, 16), 0.01);
    }

    #[test]
    fn fps_matches_formula_in_normal_range() {
        let fps = compute_fps(16.0, 16);
        assert!((fps - 1.0).abs() < 1e-9);
    }

    #[test]
    fn parses_hms_mmss_and_seconds() {
        assert_eq!(parse_duration("01:02:03"), Some(3723.0));
        assert_eq!(parse_duration("02:03"), Some(123.0));
        assert_eq!(parse_duration("42"), Some(42.0));
    }

    #[test]
    fn classification_prefers_more_specific_substrings() {
        assert_eq!(ExtractionErrorKind::classify("HTTP Error 403: Forbidden"), ExtractionErrorKind::Forbidden403);
        assert_eq!(ExtractionErrorKind::classify("401 Unauthorized"), ExtractionErrorKind::AuthRequired);
        assert_eq!(ExtractionErrorKind::classify("429 Too Many Requests"), ExtractionErrorKind::RateLimit);
        assert_eq!(ExtractionErrorKind::classify("Failed to parse m3u8 manifest"), ExtractionErrorKind::HlsParse);
        assert_eq!(ExtractionErrorKind::classify("connection reset"), ExtractionErrorKind::Unknown);
    }

    #[test]
    fn missing_executable_classifies_as_tool_not_found() {
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "No such file or directory");
        let tagged = tag_spawn_err("yt-dlp", err);
        assert_eq!(ExtractionErrorKind::classify(&tagged), ExtractionErrorKind::ToolNotFound);
    }
}
