//! Thin JSON-over-HTTPS client for the backend file-storage API.
//!
//! `ApiClient` owns the `reqwest::Client`, the bearer token, and the
//! shared [`RateGate`]. Every public method maps one logical operation
//! from the backend's API onto exactly one retrying request: the retry
//! loop lives here rather than in the gate, so the gate stays a pure
//! concurrency/cooldown primitive.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::error::ApiError;
use crate::fileinfo::FileInfo;
use crate::rate_gate::RateGate;
use crate::retry::{classify, FailureClass, RetryPolicy};

/// Header the backend sets on a response to signal it is throttling us.
/// Its presence, not its value, is what matters.
const RATE_LIMIT_HEADER: &str = "x-envoy-ratelimited";

#[derive(Debug, Deserialize)]
struct StatusResponse {
    is_dir: bool,
    file_size: i64,
    modification_time: i64,
    path: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    files: Vec<StatusResponse>,
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    handle: i64,
}

#[derive(Debug, Deserialize)]
struct ReadResponse {
    bytes_read: i64,
    data: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error_code: String,
    message: String,
}

fn status_to_fileinfo(resp: StatusResponse) -> FileInfo {
    FileInfo::from_remote(resp.is_dir, resp.file_size, resp.modification_time, &resp.path)
}

/// Client for the DBFS-style backend. Clone is cheap: the underlying
/// `reqwest::Client` and the gate are both reference-counted internally.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    token: String,
    gate: RateGate,
    retry_policy: RetryPolicy,
}

impl ApiClient {
    #[must_use]
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, workers: usize) -> Self {
        Self::with_retry_policy(base_url, token, workers, RetryPolicy::default())
    }

    #[must_use]
    pub fn with_retry_policy(
        base_url: impl Into<String>,
        token: impl Into<String>,
        workers: usize,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
            token: token.into(),
            gate: RateGate::new(workers),
            retry_policy,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Runs one logical operation through the gate and the retry loop.
    /// `attempt_fn` performs exactly one HTTP round trip and maps its
    /// outcome to `Result<T, ApiError>`.
    async fn call_with_retry<T, F, Fut>(&self, op: &'static str, mut attempt_fn: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, ApiError>>,
    {
        let mut transient_attempts: u32 = 0;
        loop {
            let _permit = self.gate.acquire().await;
            match attempt_fn().await {
                Ok(value) => return Ok(value),
                Err(err) => match classify(&err) {
                    FailureClass::RateLimited => {
                        debug!(op, "rate limited, retrying without counting attempt");
                        self.gate.report_rate_limited().await;
                    }
                    FailureClass::Transient => {
                        transient_attempts += 1;
                        if !self.retry_policy.should_retry_transient(transient_attempts) {
                            warn!(op, attempts = transient_attempts, "giving up after transient errors");
                            return Err(err);
                        }
                        let delay = self.retry_policy.delay_for(transient_attempts);
                        warn!(op, attempt = transient_attempts, delay_ms = delay.as_millis() as u64, "transient error, retrying");
                        tokio::time::sleep(delay).await;
                    }
                    FailureClass::Fatal => return Err(err),
                },
            }
        }
    }

    async fn send_once(&self, builder: reqwest::RequestBuilder) -> Result<Value, ApiError> {
        let response = builder
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(ApiError::transient)?;

        if response.headers().contains_key(RATE_LIMIT_HEADER) {
            return Err(ApiError::rate_limited());
        }

        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.starts_with("application/json") {
            return Err(ApiError::protocol(format!(
                "expected application/json, got `{content_type}`"
            )));
        }

        let body: Value = response.json().await.map_err(|e| {
            if e.is_decode() {
                ApiError::protocol(format!("malformed JSON body: {e}"))
            } else {
                ApiError::Transient { source: e }
            }
        })?;

        if status == StatusCode::OK {
            return Ok(body);
        }

        let err_body: ApiErrorBody = serde_json::from_value(body).map_err(|e| {
            ApiError::protocol(format!("error response missing error_code/message: {e}"))
        })?;
        Err(ApiError::from_code(err_body.error_code, err_body.message))
    }

    #[instrument(skip(self))]
    pub async fn get_status(&self, path: &str) -> Result<FileInfo, ApiError> {
        let body = self
            .call_with_retry("get-status", || async {
                let req = self
                    .http
                    .get(self.url("/api/2.0/dbfs/get-status"))
                    .query(&[("path", path)]);
                self.send_once(req).await
            })
            .await?;
        let resp: StatusResponse =
            serde_json::from_value(body).map_err(|e| ApiError::protocol(e.to_string()))?;
        Ok(status_to_fileinfo(resp))
    }

    #[instrument(skip(self))]
    pub async fn list(&self, path: &str) -> Result<Vec<FileInfo>, ApiError> {
        let body = self
            .call_with_retry("list", || async {
                let req = self
                    .http
                    .get(self.url("/api/2.0/dbfs/list"))
                    .query(&[("path", path)]);
                self.send_once(req).await
            })
            .await?;
        let resp: ListResponse = match serde_json::from_value(body) {
            Ok(r) => r,
            Err(_) => return Ok(Vec::new()),
        };
        Ok(resp.files.into_iter().map(status_to_fileinfo).collect())
    }

    #[instrument(skip(self))]
    pub async fn mkdirs(&self, path: &str) -> Result<(), ApiError> {
        self.call_with_retry("mkdirs", || async {
            let req = self
                .http
                .post(self.url("/api/2.0/dbfs/mkdirs"))
                .json(&serde_json::json!({ "path": path }));
            self.send_once(req).await.map(|_| ())
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, path: &str, recursive: bool) -> Result<(), ApiError> {
        self.call_with_retry("delete", || async {
            let req = self.http.post(self.url("/api/2.0/dbfs/delete")).json(
                &serde_json::json!({ "path": path, "recursive": recursive }),
            );
            self.send_once(req).await.map(|_| ())
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn move_path(&self, src: &str, dst: &str) -> Result<(), ApiError> {
        self.call_with_retry("move", || async {
            let req = self
                .http
                .post(self.url("/api/2.0/dbfs/move"))
                .json(&serde_json::json!({ "source_path": src, "destination_path": dst }));
            self.send_once(req).await.map(|_| ())
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn create(&self, path: &str, overwrite: bool) -> Result<i64, ApiError> {
        let body = self
            .call_with_retry("create", || async {
                let req = self.http.post(self.url("/api/2.0/dbfs/create")).json(
                    &serde_json::json!({ "path": path, "overwrite": overwrite }),
                );
                self.send_once(req).await
            })
            .await?;
        let resp: CreateResponse =
            serde_json::from_value(body).map_err(|e| ApiError::protocol(e.to_string()))?;
        Ok(resp.handle)
    }

    #[instrument(skip(self, block))]
    pub async fn add_block(&self, handle: i64, block: &[u8]) -> Result<(), ApiError> {
        let encoded = BASE64.encode(block);
        self.call_with_retry("add-block", || async {
            let req = self.http.post(self.url("/api/2.0/dbfs/add-block")).json(
                &serde_json::json!({ "handle": handle, "data": encoded }),
            );
            self.send_once(req).await.map(|_| ())
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn close(&self, handle: i64) -> Result<(), ApiError> {
        self.call_with_retry("close", || async {
            let req = self
                .http
                .post(self.url("/api/2.0/dbfs/close"))
                .json(&serde_json::json!({ "handle": handle }));
            self.send_once(req).await.map(|_| ())
        })
        .await
    }

    #[instrument(skip(self, contents))]
    pub async fn put(&self, path: &str, contents: &[u8], overwrite: bool) -> Result<(), ApiError> {
        let encoded = BASE64.encode(contents);
        self.call_with_retry("put", || async {
            let req = self.http.post(self.url("/api/2.0/dbfs/put")).json(
                &serde_json::json!({ "path": path, "contents": encoded, "overwrite": overwrite }),
            );
            self.send_once(req).await.map(|_| ())
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn read(&self, path: &str, offset: i64, length: i64) -> Result<(i64, Vec<u8>), ApiError> {
        let offset_s = offset.to_string();
        let length_s = length.to_string();
        let body = self
            .call_with_retry("read", || async {
                let req = self
                    .http
                    .get(self.url("/api/2.0/dbfs/read"))
                    .query(&[("path", path), ("offset", offset_s.as_str()), ("length", length_s.as_str())]);
                self.send_once(req).await
            })
            .await?;
        let resp: ReadResponse =
            serde_json::from_value(body).map_err(|e| ApiError::protocol(e.to_string()))?;
        let decoded = BASE64
            .decode(resp.data.as_bytes())
            .map_err(|e| ApiError::protocol(format!("invalid base64 in read response: {e}")))?;
        if decoded.len() as i64 != resp.bytes_read {
            return Err(ApiError::protocol(format!(
                "bytes_read {} does not match decoded length {}",
                resp.bytes_read,
                decoded.len()
            )));
        }
        Ok((resp.bytes_read, decoded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> ApiClient {
        ApiClient::with_retry_policy(
            server.uri(),
            "test-token",
            4,
            RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(1)),
        )
    }

    #[tokio::test]
    async fn get_status_parses_successful_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/2.0/dbfs/get-status"))
            .and(header("Authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "path": "/d/a", "is_dir": false, "file_size": 42, "modification_time": 1000
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let fi = client.get_status("/d/a").await.unwrap();
        assert_eq!(fi.size(), 42);
        assert!(!fi.is_dir());
    }

    #[tokio::test]
    async fn get_status_not_found_maps_to_typed_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/2.0/dbfs/get-status"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "error_code": "RESOURCE_DOES_NOT_EXIST", "message": "nope"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client.get_status("/missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn rate_limit_header_triggers_retry_without_exhausting_budget() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/2.0/dbfs/get-status"))
            .respond_with(ResponseTemplate::new(200).insert_header("x-envoy-ratelimited", "true"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/2.0/dbfs/get-status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "path": "/d/a", "is_dir": false, "file_size": 1, "modification_time": 0
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let fi = client.get_status("/d/a").await.unwrap();
        assert_eq!(fi.size(), 1);
    }

    #[tokio::test]
    async fn non_json_200_is_a_protocol_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/2.0/dbfs/get-status"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json").insert_header("content-type", "text/plain"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client.get_status("/d/a").await.unwrap_err();
        assert!(matches!(err, ApiError::Protocol(_)));
    }
}
