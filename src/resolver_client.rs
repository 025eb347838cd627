//! Analyzer-side client for the optional Resolver HTTP service (spec.md 6).
//! Used when `Config::extraction_mode` is `ExtractionMode::Resolver`
//! instead of running the fallback ladder in-process.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::errors::{ExtractionError, ExtractionErrorKind};
use crate::models::InferenceResponse;

#[derive(Clone)]
pub struct ResolverClient {
    http: Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    channel: Option<&'a str>,
    target_frames: u32,
    timeout: u64,
}

#[derive(Debug, Deserialize)]
struct AnalyzeResponse {
    success: bool,
    inference: Option<InferenceResponse>,
    frames_count: usize,
    error: Option<String>,
}

impl ResolverClient {
    pub fn new(base_url: String) -> Self {
        ResolverClient { http: Client::new(), base_url }
    }

    pub async fn analyze(
        &self,
        url: &str,
        title: Option<&str>,
        channel: Option<&str>,
        target_frames: u32,
        timeout: Duration,
    ) -> Result<(InferenceResponse, usize), ExtractionError> {
        let request = AnalyzeRequest {
            url,
            title,
            channel,
            target_frames,
            timeout: timeout.as_secs(),
        };

        let response = self
            .http
            .post(format!("{}/analyze", self.base_url))
            .json(&request)
            .timeout(timeout + Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| ExtractionError {
                kind: ExtractionErrorKind::Unknown,
                stage: "resolver",
                message: e.to_string(),
            })?;

        let body: AnalyzeResponse = response.json().await.map_err(|e| ExtractionError {
            kind: ExtractionErrorKind::Unknown,
            stage: "resolver",
            message: format!("malformed resolver response: {e}"),
        })?;

        if !body.success {
            let message = body.error.unwrap_or_else(|| "resolver reported failure with no message".to_string());
            return Err(ExtractionError {
                kind: ExtractionErrorKind::classify(&message),
                stage: "resolver",
                message,
            });
        }

        let inference = body.inference.ok_or_else(|| ExtractionError {
            kind: ExtractionErrorKind::Unknown,
            stage: "resolver",
            message: "resolver reported success but omitted inference".to_string(),
        })?;

        Ok((inference, body.frames_count))
    }
}
