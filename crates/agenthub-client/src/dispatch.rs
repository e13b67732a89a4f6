//! Turns a user message into a run: create-or-fetch the thread, append the
//! message, start the run. Returns as soon as the run exists; completion is
//! the poller's job.

use std::sync::Arc;

use tracing::info;

use agenthub_types::{
    AgentRef, EnvOverlay, MessageContent, NewMessage, OptimisticMessage, OptimisticSink, Run,
    Thread, ThreadId,
};

use crate::api::{ApiError, CreateThreadRequest, StartRunRequest, ThreadsApi};

/// Threads created on first message take their topic from that message.
const TOPIC_MAX_CHARS: usize = 60;

#[derive(Debug, Clone)]
pub struct DispatchRequest {
    /// Absent for a first message: a new thread is created for the caller
    /// and the target agent.
    pub thread_id: Option<ThreadId>,
    pub agent: AgentRef,
    pub message_text: String,
    pub max_iterations: u32,
    pub env: EnvOverlay,
}

#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub thread: Thread,
    /// Freshly created; `queued` or `in_progress`, never terminal.
    pub run: Run,
    pub optimistic: OptimisticMessage,
}

pub struct RunDispatcher {
    api: Arc<dyn ThreadsApi>,
    optimistic: Arc<dyn OptimisticSink>,
}

impl RunDispatcher {
    pub fn new(api: Arc<dyn ThreadsApi>, optimistic: Arc<dyn OptimisticSink>) -> Self {
        Self { api, optimistic }
    }

    /// Dispatches `message_text` to the target agent. Fails with
    /// [`ApiError::NotFound`] when `thread_id` names a thread that does not
    /// exist or the caller cannot access.
    pub async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchOutcome, ApiError> {
        let content = vec![MessageContent::text(request.message_text.clone())];

        // With a known thread the optimistic message is registered before any
        // network call resolves. A brand-new thread has no id to tag it with
        // until creation returns, so registration happens right after.
        let (thread, optimistic) = match &request.thread_id {
            Some(thread_id) => {
                let optimistic = OptimisticMessage::new(thread_id.clone(), content.clone());
                self.optimistic.register(optimistic.clone());
                (self.api.get_thread(thread_id).await?, optimistic)
            }
            None => {
                let thread = self
                    .api
                    .create_thread(&CreateThreadRequest {
                        agent: request.agent.clone(),
                        topic: Some(derive_topic(&request.message_text)),
                    })
                    .await?;
                let optimistic = OptimisticMessage::new(thread.id.clone(), content.clone());
                self.optimistic.register(optimistic.clone());
                (thread, optimistic)
            }
        };

        self.api
            .add_message(&thread.id, &NewMessage::user_text(request.message_text))
            .await?;

        let run = self
            .api
            .create_run(
                &thread.id,
                &StartRunRequest {
                    agent: request.agent,
                    max_iterations: request.max_iterations,
                    env: request.env.resolve(),
                },
            )
            .await?;

        info!(
            thread_id = %thread.id,
            run_id = %run.id,
            status = %run.status,
            "dispatched run"
        );

        Ok(DispatchOutcome {
            thread,
            run,
            optimistic,
        })
    }
}

/// First-message topic: the message text, truncated on a char boundary.
#[must_use]
pub fn derive_topic(message_text: &str) -> String {
    let trimmed = message_text.trim();
    if trimmed.chars().count() <= TOPIC_MAX_CHARS {
        return trimmed.to_string();
    }
    let cut = trimmed.chars().take(TOPIC_MAX_CHARS).collect::<String>();
    format!("{}…", cut.trim_end())
}
