//! Reqwest implementation of [`ThreadsApi`] against the hub's HTTP surface.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use uuid::Uuid;

use agenthub_types::{Message, NewMessage, Run, Thread};

use crate::api::{ApiError, CreateThreadRequest, StartRunRequest, ThreadsApi};
use crate::config::HubClientConfig;

#[derive(Debug, Clone)]
pub struct HubClient {
    base_url: String,
    timeout: Duration,
    request_attempts: usize,
    http: reqwest::Client,
}

impl HubClient {
    pub fn new(config: HubClientConfig) -> Result<Self, ApiError> {
        let base_url = normalize_base_url(&config.base_url)?;
        Ok(Self {
            base_url,
            timeout: Duration::from_millis(config.timeout_ms.max(250)),
            request_attempts: config.request_attempts.max(1),
            http: reqwest::Client::new(),
        })
    }

    #[must_use]
    pub fn endpoint(&self, path: &str) -> Option<String> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed.starts_with('/') {
            Some(format!("{}{}", self.base_url, trimmed))
        } else {
            Some(format!("{}/{}", self.base_url, trimmed))
        }
    }

    #[must_use]
    pub fn threads_path() -> &'static str {
        "/v1/threads"
    }

    #[must_use]
    pub fn thread_path(thread_id: &str) -> String {
        format!("/v1/threads/{}", thread_id.trim())
    }

    #[must_use]
    pub fn thread_metadata_path(thread_id: &str) -> String {
        format!("/v1/threads/{}/metadata", thread_id.trim())
    }

    #[must_use]
    pub fn messages_path(thread_id: &str, after: Option<&str>) -> String {
        match after {
            Some(cursor) => format!(
                "/v1/threads/{}/messages?after={}",
                thread_id.trim(),
                cursor.trim()
            ),
            None => format!("/v1/threads/{}/messages", thread_id.trim()),
        }
    }

    #[must_use]
    pub fn runs_path(thread_id: &str) -> String {
        format!("/v1/threads/{}/runs", thread_id.trim())
    }

    #[must_use]
    pub fn run_path(thread_id: &str, run_id: &str) -> String {
        format!("/v1/threads/{}/runs/{}", thread_id.trim(), run_id.trim())
    }

    #[must_use]
    pub fn run_artifact_path(thread_id: &str, run_id: &str) -> String {
        format!(
            "/v1/threads/{}/runs/{}/artifact",
            thread_id.trim(),
            run_id.trim()
        )
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.send(Method::GET, path, None::<&()>).await?;
        decode_json_response(response).await
    }

    async fn get_bytes(&self, path: &str) -> Result<Vec<u8>, ApiError> {
        let response = self.send(Method::GET, path, None::<&()>).await?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|error| ApiError::Read {
                message: error.to_string(),
            })?;
        if !status.is_success() {
            return Err(status_error(status, &bytes));
        }
        Ok(bytes.to_vec())
    }

    async fn request_json<Req, Res>(
        &self,
        method: Method,
        path: &str,
        payload: &Req,
    ) -> Result<Res, ApiError>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let response = self.send(method, path, Some(payload)).await?;
        decode_json_response(response).await
    }

    async fn send<Req>(
        &self,
        method: Method,
        path: &str,
        payload: Option<&Req>,
    ) -> Result<reqwest::Response, ApiError>
    where
        Req: Serialize + ?Sized,
    {
        let url = self.endpoint(path).ok_or(ApiError::InvalidPath)?;
        let mut last_error: Option<String> = None;

        for attempt in 0..self.request_attempts {
            let mut request = self
                .http
                .request(method.clone(), url.as_str())
                .header("x-request-id", format!("req_{}", Uuid::new_v4().simple()))
                .timeout(self.timeout);
            if let Some(payload) = payload {
                request = request.json(payload);
            }

            match request.send().await {
                Ok(response) => return Ok(response),
                Err(error) => {
                    last_error = Some(error.to_string());
                    if attempt + 1 >= self.request_attempts {
                        break;
                    }
                }
            }
        }

        Err(ApiError::Request {
            message: last_error.unwrap_or_else(|| "unknown".to_string()),
        })
    }
}

#[async_trait]
impl ThreadsApi for HubClient {
    async fn create_thread(&self, request: &CreateThreadRequest) -> Result<Thread, ApiError> {
        self.request_json(Method::POST, Self::threads_path(), request)
            .await
    }

    async fn get_thread(&self, thread_id: &str) -> Result<Thread, ApiError> {
        self.get_json(Self::thread_path(thread_id).as_str()).await
    }

    async fn list_threads(&self) -> Result<Vec<Thread>, ApiError> {
        self.get_json(Self::threads_path()).await
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<(), ApiError> {
        let response = self
            .send(Method::DELETE, Self::thread_path(thread_id).as_str(), None::<&()>)
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let bytes = response.bytes().await.map_err(|error| ApiError::Read {
            message: error.to_string(),
        })?;
        Err(status_error(status, &bytes))
    }

    async fn update_thread_metadata(
        &self,
        thread_id: &str,
        patch: &BTreeMap<String, Value>,
    ) -> Result<Thread, ApiError> {
        self.request_json(
            Method::PATCH,
            Self::thread_metadata_path(thread_id).as_str(),
            patch,
        )
        .await
    }

    async fn add_message(&self, thread_id: &str, message: &NewMessage) -> Result<Message, ApiError> {
        self.request_json(
            Method::POST,
            Self::messages_path(thread_id, None).as_str(),
            message,
        )
        .await
    }

    async fn create_run(
        &self,
        thread_id: &str,
        request: &StartRunRequest,
    ) -> Result<Run, ApiError> {
        self.request_json(Method::POST, Self::runs_path(thread_id).as_str(), request)
            .await
    }

    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<Run, ApiError> {
        self.get_json(Self::run_path(thread_id, run_id).as_str())
            .await
    }

    async fn list_messages(
        &self,
        thread_id: &str,
        after: Option<&str>,
    ) -> Result<Vec<Message>, ApiError> {
        self.get_json(Self::messages_path(thread_id, after).as_str())
            .await
    }

    async fn fetch_artifact(&self, run: &Run) -> Result<Vec<u8>, ApiError> {
        self.get_bytes(Self::run_artifact_path(&run.thread_id, &run.id).as_str())
            .await
    }
}

fn normalize_base_url(base_url: &str) -> Result<String, ApiError> {
    let trimmed = base_url.trim();
    if trimmed.is_empty() {
        return Err(ApiError::BaseUrlMissing);
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

fn status_error(status: StatusCode, body: &[u8]) -> ApiError {
    match status {
        StatusCode::FORBIDDEN => ApiError::Forbidden,
        StatusCode::NOT_FOUND => ApiError::NotFound,
        _ => {
            let body = String::from_utf8_lossy(body).trim().to_string();
            let body = if body.is_empty() {
                "<empty>".to_string()
            } else {
                body
            };
            ApiError::Http { status, body }
        }
    }
}

async fn decode_json_response<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ApiError> {
    let status = response.status();
    let bytes = response.bytes().await.map_err(|error| ApiError::Read {
        message: error.to_string(),
    })?;

    if !status.is_success() {
        return Err(status_error(status, &bytes));
    }

    serde_json::from_slice::<T>(&bytes).map_err(|error| ApiError::Decode {
        message: error.to_string(),
    })
}
