use std::sync::Arc;

use agenthub_archive as archive;
use agenthub_client::{
    ActiveThread, ApiError, DispatchOutcome, DispatchRequest, PollEvent, PollerConfig, RunDispatcher,
    RunPoller, ThreadsApi,
};
use agenthub_thread_state::{StoreUpdate, ThreadSnapshot, ThreadStateHandle};
use agenthub_types::{RunStatus, ThreadId};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// End-to-end wiring: a dispatch creates the run, a poller follows it, and
/// every observation lands in the shared thread-state store. One pipeline
/// serves one caller; each dispatched run gets its own poller task.
pub struct Pipeline {
    api: Arc<dyn ThreadsApi>,
    store: ThreadStateHandle,
    active: ActiveThread,
    poller_config: PollerConfig,
}

impl Pipeline {
    #[must_use]
    pub fn new(api: Arc<dyn ThreadsApi>, poller_config: PollerConfig) -> Self {
        Self {
            api,
            store: ThreadStateHandle::spawn(),
            active: ActiveThread::new(None),
            poller_config,
        }
    }

    /// The thread currently being attended. Poll results for other threads
    /// are buffered but never surface in the active snapshot.
    pub fn switch_thread(&self, thread_id: Option<ThreadId>) {
        self.active.switch_to(thread_id.clone());
        self.store.set_active(thread_id);
    }

    #[must_use]
    pub fn current_thread(&self) -> Option<ThreadId> {
        self.active.current()
    }

    pub async fn snapshot(&self, thread_id: &str) -> Option<ThreadSnapshot> {
        self.store.snapshot(thread_id).await
    }

    /// Snapshot feed for the active thread; recomputed after every store
    /// update and thread switch.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<ThreadSnapshot>> {
        self.store.subscribe()
    }

    /// Dispatches a message as a run, switches attention to its thread, and
    /// spawns a poller whose events flow into the store until the run
    /// terminates and its artifact (if any) has been decoded.
    pub async fn send_message(
        &self,
        request: DispatchRequest,
    ) -> Result<DispatchOutcome, ApiError> {
        let dispatcher =
            RunDispatcher::new(Arc::clone(&self.api), Arc::new(self.store.clone()));
        let outcome = dispatcher.dispatch(request).await?;

        self.switch_thread(Some(outcome.thread.id.clone()));
        self.store.apply(StoreUpdate::Dispatched {
            thread: outcome.thread.clone(),
            run: outcome.run.clone(),
        });

        let (poller, events) = RunPoller::new(
            Arc::clone(&self.api),
            self.poller_config.clone(),
            self.active.clone(),
        );
        poller.spawn(outcome.run.clone());
        self.spawn_forwarder(events);

        Ok(outcome)
    }

    /// Routes poller events into the store. Lives as long as the poller's
    /// sender side; exits when the poller stops.
    fn spawn_forwarder(&self, mut events: mpsc::UnboundedReceiver<PollEvent>) {
        let api = Arc::clone(&self.api);
        let store = self.store.clone();
        let active = self.active.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    PollEvent::Messages {
                        thread_id,
                        messages,
                    } => {
                        store.apply(StoreUpdate::Messages {
                            thread_id,
                            messages,
                        });
                    }
                    PollEvent::StatusChanged { run } => {
                        store.apply(StoreUpdate::RunStatus { run });
                    }
                    PollEvent::Terminal { run } => {
                        let completed = run.status == RunStatus::Completed;
                        store.apply(StoreUpdate::RunStatus { run: run.clone() });
                        if completed {
                            resolve_artifact(api.as_ref(), &store, &run).await;
                        }
                    }
                    PollEvent::Error { thread_id, error } => {
                        if error.is_fatal() {
                            warn!(
                                thread_id = %thread_id,
                                error = %error,
                                "run_halted_on_fatal_error"
                            );
                            if active.is_active(&thread_id) {
                                active.switch_to(None);
                                store.set_active(None);
                            }
                        } else {
                            debug!(
                                thread_id = %thread_id,
                                error = %error,
                                "poll_error_will_retry"
                            );
                        }
                    }
                }
            }
        });
    }
}

/// Fetches and decodes a completed run's artifact. A missing artifact is
/// normal (not every run produces one); a corrupt one is dropped whole, so
/// the snapshot never holds partial archive output.
async fn resolve_artifact(
    api: &dyn ThreadsApi,
    store: &ThreadStateHandle,
    run: &agenthub_types::Run,
) {
    let bytes = match api.fetch_artifact(run).await {
        Ok(bytes) => bytes,
        Err(ApiError::NotFound) => {
            debug!(run_id = %run.id, "run_produced_no_artifact");
            return;
        }
        Err(error) => {
            warn!(run_id = %run.id, error = %error, "artifact_fetch_failed");
            return;
        }
    };
    match archive::decode(&bytes) {
        Ok(decoded) => {
            store.apply(StoreUpdate::Archive {
                thread_id: run.thread_id.clone(),
                run_id: run.id.clone(),
                archive: decoded,
            });
        }
        Err(error) => {
            warn!(run_id = %run.id, error = %error, "artifact_decode_failed");
        }
    }
}
