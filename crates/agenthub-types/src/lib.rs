//! Shared data model for the agenthub run pipeline: threads, runs, messages,
//! archive file artifacts, and the optimistic-message bookkeeping that the
//! thread state store reconciles against authoritative data.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Server-assigned opaque identifiers. The hub mints these; clients never
/// fabricate them.
pub type ThreadId = String;
pub type RunId = String;
pub type MessageId = String;

pub const METADATA_KEY_TOPIC: &str = "topic";
pub const METADATA_KEY_AGENT: &str = "agent";

/// `namespace/name/version` reference to a registry agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRef {
    pub namespace: String,
    pub name: String,
    pub version: String,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid agent reference `{raw}`: expected namespace/name/version")]
pub struct AgentRefParseError {
    pub raw: String,
}

impl AgentRef {
    #[must_use]
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for AgentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.name, self.version)
    }
}

impl FromStr for AgentRef {
    type Err = AgentRefParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let parts = raw.split('/').collect::<Vec<_>>();
        match parts.as_slice() {
            [namespace, name, version]
                if !namespace.is_empty() && !name.is_empty() && !version.is_empty() =>
            {
                Ok(Self::new(*namespace, *name, *version))
            }
            _ => Err(AgentRefParseError {
                raw: raw.to_string(),
            }),
        }
    }
}

/// A persistent conversation scoped to one caller and one primary agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: ThreadId,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl Thread {
    #[must_use]
    pub fn topic(&self) -> Option<&str> {
        self.metadata.get(METADATA_KEY_TOPIC).and_then(Value::as_str)
    }

    #[must_use]
    pub fn agent(&self) -> Option<AgentRef> {
        self.metadata
            .get(METADATA_KEY_AGENT)
            .and_then(Value::as_str)
            .and_then(|raw| raw.parse().ok())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::RequiresAction => "requires_action",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Merge ordering for racing status updates: a more-terminal status always
    /// wins, and a terminal status is never downgraded.
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::InProgress => 1,
            Self::RequiresAction => 2,
            Self::Completed | Self::Failed | Self::Cancelled => 3,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One invocation of a remote agent against a thread. Mutated only by the hub;
/// immutable once terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub thread_id: ThreadId,
    pub status: RunStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// One content item of a message. Plain strings stay text; anything
/// structured is carried verbatim for downstream protocol classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Json(Value),
}

impl MessageContent {
    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            Self::Json(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub thread_id: ThreadId,
    pub role: MessageRole,
    pub content: Vec<MessageContent>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
}

/// Message body for an append call; the hub assigns the id and timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    pub role: MessageRole,
    pub content: Vec<MessageContent>,
}

impl NewMessage {
    #[must_use]
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: vec![MessageContent::text(text)],
        }
    }
}

/// One user-visible output file extracted from a run archive. Scoped to the
/// producing run; immutable once decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileArtifact {
    pub name: String,
    pub size: u64,
    pub content: String,
}

/// A locally-rendered message the hub has not confirmed yet. Tagged with a
/// local-only correlation key; retired once a matching authoritative message
/// arrives, discarded if the owning run fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimisticMessage {
    pub client_key: Uuid,
    pub thread_id: ThreadId,
    pub content: Vec<MessageContent>,
    pub submitted_at: DateTime<Utc>,
}

impl OptimisticMessage {
    #[must_use]
    pub fn new(thread_id: ThreadId, content: Vec<MessageContent>) -> Self {
        Self {
            client_key: Uuid::new_v4(),
            thread_id,
            content,
            submitted_at: Utc::now(),
        }
    }

    /// An authoritative message retires this one when it lands on the same
    /// thread with exactly-equal content.
    #[must_use]
    pub fn is_confirmed_by(&self, message: &Message) -> bool {
        message.thread_id == self.thread_id && message.content == self.content
    }
}

/// Sink for locally-registered optimistic messages. The dispatcher registers
/// the outgoing message here before its network calls resolve, so callers
/// always have an immediate un-confirmed view.
pub trait OptimisticSink: Send + Sync {
    fn register(&self, message: OptimisticMessage);
}

/// Environment variable overlays passed to a run: the agent-level defaults
/// and the caller-level overrides, caller winning on key collision.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvOverlay {
    #[serde(default)]
    pub agent: BTreeMap<String, String>,
    #[serde(default)]
    pub caller: BTreeMap<String, String>,
}

impl EnvOverlay {
    #[must_use]
    pub fn resolve(&self) -> BTreeMap<String, String> {
        let mut merged = self.agent.clone();
        for (key, value) in &self.caller {
            merged.insert(key.clone(), value.clone());
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn agent_ref_round_trips_through_display() {
        let agent: AgentRef = "acme/researcher/0.0.3".parse().expect("agent ref");
        assert_eq!(agent.namespace, "acme");
        assert_eq!(agent.name, "researcher");
        assert_eq!(agent.version, "0.0.3");
        assert_eq!(agent.to_string(), "acme/researcher/0.0.3");
    }

    #[test]
    fn agent_ref_rejects_malformed_references() {
        for raw in ["", "acme", "acme/researcher", "acme//0.0.3", "a/b/c/d"] {
            assert!(raw.parse::<AgentRef>().is_err(), "should reject `{raw}`");
        }
    }

    #[test]
    fn run_status_rank_orders_toward_terminal() {
        assert!(RunStatus::Queued.rank() < RunStatus::InProgress.rank());
        assert!(RunStatus::InProgress.rank() < RunStatus::RequiresAction.rank());
        assert!(RunStatus::RequiresAction.rank() < RunStatus::Completed.rank());
        assert_eq!(RunStatus::Failed.rank(), RunStatus::Cancelled.rank());
        for status in [RunStatus::Completed, RunStatus::Failed, RunStatus::Cancelled] {
            assert!(status.is_terminal());
        }
        for status in [
            RunStatus::Queued,
            RunStatus::InProgress,
            RunStatus::RequiresAction,
        ] {
            assert!(!status.is_terminal());
        }
    }

    #[test]
    fn message_content_keeps_strings_and_structures_apart() {
        let text: MessageContent = serde_json::from_value(json!("hello")).expect("text");
        assert_eq!(text.as_text(), Some("hello"));

        let structured: MessageContent =
            serde_json::from_value(json!({"$schema": "https://example.com"})).expect("json");
        assert!(structured.as_text().is_none());
    }

    #[test]
    fn optimistic_message_confirmation_requires_thread_and_content() {
        let optimistic =
            OptimisticMessage::new("thread_1".to_string(), vec![MessageContent::text("hi")]);
        let confirm = Message {
            id: "msg_1".to_string(),
            thread_id: "thread_1".to_string(),
            role: MessageRole::User,
            content: vec![MessageContent::text("hi")],
            created_at: Utc::now(),
            run_id: None,
        };
        assert!(optimistic.is_confirmed_by(&confirm));

        let other_thread = Message {
            thread_id: "thread_2".to_string(),
            ..confirm.clone()
        };
        assert!(!optimistic.is_confirmed_by(&other_thread));

        let other_content = Message {
            content: vec![MessageContent::text("bye")],
            ..confirm
        };
        assert!(!optimistic.is_confirmed_by(&other_content));
    }

    #[test]
    fn env_overlay_caller_wins_on_collision() {
        let mut overlay = EnvOverlay::default();
        overlay.agent.insert("MODEL".to_string(), "base".to_string());
        overlay.agent.insert("REGION".to_string(), "us".to_string());
        overlay
            .caller
            .insert("MODEL".to_string(), "override".to_string());

        let merged = overlay.resolve();
        assert_eq!(merged.get("MODEL").map(String::as_str), Some("override"));
        assert_eq!(merged.get("REGION").map(String::as_str), Some("us"));
    }

    #[test]
    fn thread_metadata_helpers_read_topic_and_agent() {
        let mut metadata = BTreeMap::new();
        metadata.insert(METADATA_KEY_TOPIC.to_string(), json!("travel plans"));
        metadata.insert(METADATA_KEY_AGENT.to_string(), json!("acme/planner/1.0.0"));
        let thread = Thread {
            id: "thread_1".to_string(),
            created_at: Utc::now(),
            metadata,
        };
        assert_eq!(thread.topic(), Some("travel plans"));
        assert_eq!(
            thread.agent().map(|agent| agent.to_string()),
            Some("acme/planner/1.0.0".to_string())
        );
    }
}
