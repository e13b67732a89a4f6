//! Abstract contract for the remote hub services consumed by the pipeline.
//! The HTTP implementation lives in [`crate::client`]; tests substitute
//! in-memory doubles.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use agenthub_types::{AgentRef, Message, NewMessage, Run, Thread};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("hub_base_url_missing")]
    BaseUrlMissing,
    #[error("hub_invalid_path")]
    InvalidPath,
    #[error("hub_request_failed:{message}")]
    Request { message: String },
    #[error("hub_read_failed:{message}")]
    Read { message: String },
    #[error("hub_http_{status}:{body}")]
    Http { status: StatusCode, body: String },
    #[error("hub_json_decode_failed:{message}")]
    Decode { message: String },
    /// Fatal for the affected thread: the caller must drop the thread
    /// reference and stop polling it.
    #[error("hub_forbidden")]
    Forbidden,
    /// Fatal for the targeted thread or run; unrelated threads are unaffected.
    #[error("hub_not_found")]
    NotFound,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateThreadRequest {
    pub agent: AgentRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRunRequest {
    pub agent: AgentRef,
    pub max_iterations: u32,
    /// Already-merged environment overlay (caller values win collisions).
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Remote hub services consumed by the pipeline. Wire shapes are the hub's
/// concern; this trait carries the full consumed surface so the store has a
/// caller for every thread lifecycle event.
#[async_trait]
pub trait ThreadsApi: Send + Sync {
    async fn create_thread(&self, request: &CreateThreadRequest) -> Result<Thread, ApiError>;
    async fn get_thread(&self, thread_id: &str) -> Result<Thread, ApiError>;
    async fn list_threads(&self) -> Result<Vec<Thread>, ApiError>;
    /// Explicit user action; terminal for the thread.
    async fn delete_thread(&self, thread_id: &str) -> Result<(), ApiError>;
    async fn update_thread_metadata(
        &self,
        thread_id: &str,
        patch: &BTreeMap<String, Value>,
    ) -> Result<Thread, ApiError>;
    async fn add_message(&self, thread_id: &str, message: &NewMessage) -> Result<Message, ApiError>;
    async fn create_run(&self, thread_id: &str, request: &StartRunRequest)
    -> Result<Run, ApiError>;
    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<Run, ApiError>;
    /// Messages created after `after` (cursor-based, monotonic); all
    /// messages when `after` is `None`.
    async fn list_messages(
        &self,
        thread_id: &str,
        after: Option<&str>,
    ) -> Result<Vec<Message>, ApiError>;
    /// Compressed archive bytes for a completed run.
    async fn fetch_artifact(&self, run: &Run) -> Result<Vec<u8>, ApiError>;
}
