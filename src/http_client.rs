//! Inference HTTP client: retrying multipart POST, plus the health GET the
//! scheduler uses to keep a scale-to-zero service warm.

use reqwest::{Client, StatusCode};
use std::time::Duration;

use crate::config::Config;
use crate::errors::{InferenceError, InferenceErrorKind};
use crate::models::{Frame, InferenceResponse};
use crate::retry::{retry_with_backoff, BackoffPolicy};

#[derive(Clone)]
pub struct InferenceClient {
    http: Client,
    api_url: String,
    api_key: String,
    hf_token: String,
    request_timeout: Duration,
}

impl InferenceClient {
    pub fn new(config: &Config) -> Self {
        InferenceClient {
            http: Client::new(),
            api_url: config.infer_api_url.clone(),
            api_key: config.infer_api_key.clone(),
            hf_token: config.hugging_face_api_key.clone(),
            request_timeout: config.infer_request_timeout,
        }
    }

    /// `POST {api_url}/v1/infer`, multipart `files[]`, retried up to 3
    /// attempts with exponential jitter backoff (spec.md 4.3 step 3).
    pub async fn infer(&self, frames: &[Frame]) -> Result<InferenceResponse, InferenceError> {
        let policy = BackoffPolicy::inference_default();
        retry_with_backoff(
            policy,
            || self.infer_once(frames),
            |err| err.kind != InferenceErrorKind::ClientError,
        )
        .await
    }

    async fn infer_once(&self, frames: &[Frame]) -> Result<InferenceResponse, InferenceError> {
        let mut form = reqwest::multipart::Form::new();
        for frame in frames {
            let filename = format!("frame_{:03}.jpg", frame.index);
            let part = reqwest::multipart::Part::bytes(frame.bytes.clone())
                .file_name(filename)
                .mime_str("image/jpeg")
                .map_err(|e| InferenceError {
                    kind: InferenceErrorKind::Network,
                    message: e.to_string(),
                })?;
            form = form.part("files", part);
        }

        let response = self
            .http
            .post(format!("{}/v1/infer", self.api_url))
            .bearer_auth(&self.hf_token)
            .header("X-API-Key", &self.api_key)
            .timeout(self.request_timeout)
            .multipart(form)
            .send()
            .await
            .map_err(|e| InferenceError {
                kind: InferenceErrorKind::Network,
                message: e.to_string(),
            })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(InferenceError {
                kind: InferenceErrorKind::ServerError,
                message: format!("server error: {status}"),
            });
        }
        if status.is_client_error() {
            return Err(InferenceError {
                kind: InferenceErrorKind::ClientError,
                message: format!("client error: {status}"),
            });
        }

        response.json::<InferenceResponse>().await.map_err(|e| InferenceError {
            kind: InferenceErrorKind::Network,
            message: format!("malformed inference response: {e}"),
        })
    }

    /// `GET {api_url}/healthz`, bearer auth, used by the scheduler to keep
    /// the classifier warm (spec.md 4.4).
    pub async fn health_check(&self, timeout: Duration) -> Result<(), InferenceError> {
        let response = self
            .http
            .get(format!("{}/healthz", self.api_url))
            .bearer_auth(&self.hf_token)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| InferenceError {
                kind: InferenceErrorKind::Network,
                message: e.to_string(),
            })?;

        if response.status() == StatusCode::OK {
            Ok(())
        } else {
            Err(InferenceError {
                kind: InferenceErrorKind::ServerError,
                message: format!("health check returned {}", response.status()),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Frame;

    fn client_for(server: &mockito::ServerGuard) -> InferenceClient {
        InferenceClient {
            http: Client::new(),
            api_url: server.url(),
            api_key: "test-infer-key".to_string(),
            hf_token: "test-hf-token".to_string(),
            request_timeout: Duration::from_secs(5),
        }
    }

    fn one_frame() -> Vec<Frame> {
        vec![Frame { index: 1, bytes: vec![0xFF, 0xD8, 0xFF] }]
    }

    #[tokio::test]
    async fn infer_parses_a_successful_response() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/infer")
            .match_header("authorization", "Bearer test-hf-token")
            .match_header("x-api-key", "test-infer-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"results":[{"label_scores":{"real":0.9,"artificial":0.1},"inference_time_ms":12.0}],
                    "batch_time_ms":12.0,"model":{"id":"m","device":"cpu"}}"#,
            )
            .create_async()
            .await;

        let client = client_for(&server);
        let response = client.infer(&one_frame()).await.unwrap();
        assert_eq!(response.results.len(), 1);
        assert!((response.results[0].real() - 0.9).abs() < 1e-9);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn infer_does_not_retry_on_4xx() {
        let mut server = mockito::Server::new_async().await;
        let mock = server.mock("POST", "/v1/infer").with_status(401).expect(1).create_async().await;

        let client = client_for(&server);
        let err = client.infer(&one_frame()).await.unwrap_err();
        assert_eq!(err.kind, InferenceErrorKind::ClientError);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn infer_retries_5xx_then_succeeds() {
        let mut server = mockito::Server::new_async().await;
        let fail_mock = server.mock("POST", "/v1/infer").with_status(503).expect(1).create_async().await;
        let ok_mock = server
            .mock("POST", "/v1/infer")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"results":[{"label_scores":{"real":0.5,"artificial":0.5},"inference_time_ms":1.0}],
                    "batch_time_ms":1.0,"model":{"id":"m","device":"cpu"}}"#,
            )
            .expect(1)
            .create_async()
            .await;

        let client = client_for(&server);
        let response = client.infer(&one_frame()).await.unwrap();
        assert_eq!(response.results.len(), 1);
        fail_mock.assert_async().await;
        ok_mock.assert_async().await;
    }

    #[tokio::test]
    async fn health_check_ok_on_200() {
        let mut server = mockito::Server::new_async().await;
        let mock = server.mock("GET", "/healthz").with_status(200).create_async().await;

        let client = client_for(&server);
        client.health_check(Duration::from_secs(5)).await.unwrap();
        mock.assert_async().await;
    }
}
