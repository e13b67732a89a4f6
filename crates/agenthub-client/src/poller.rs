//! Drives a run to its terminal state on a fixed cadence, independent of any
//! presentation layer. One poller task per run; stopping is explicit: switch
//! the active thread away, or drop the event receiver.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use agenthub_types::{Message, MessageId, Run, ThreadId};

use crate::api::{ApiError, ThreadsApi};

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 150;
pub const DEFAULT_IDLE_POLL_INTERVAL_MS: u64 = 1_500;
pub const DEFAULT_POLL_DEADLINE_MS: u64 = 10_000;

#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Cadence while the run is live (queued/in_progress/requires_action).
    pub interval: Duration,
    /// Slower cadence for following an otherwise idle thread after terminal.
    pub idle_interval: Duration,
    /// A poll not back within this window counts as a non-fatal poll error;
    /// the next scheduled poll proceeds independently.
    pub deadline: Duration,
    /// Keep appending newly observed messages at the idle cadence after the
    /// terminal event instead of stopping.
    pub follow_idle: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            idle_interval: Duration::from_millis(DEFAULT_IDLE_POLL_INTERVAL_MS),
            deadline: Duration::from_millis(DEFAULT_POLL_DEADLINE_MS),
            follow_idle: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("poll exceeded {0:?} deadline")]
    Deadline(Duration),
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl PollError {
    /// Forbidden halts polling for the thread; everything else is transient.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Api(ApiError::Forbidden))
    }
}

#[derive(Debug)]
pub enum PollEvent {
    /// Messages created after the last-seen cursor, in creation order.
    Messages {
        thread_id: ThreadId,
        messages: Vec<Message>,
    },
    StatusChanged { run: Run },
    /// Emitted exactly once per run, on the first observation of a terminal
    /// status. Later polls never re-emit it.
    Terminal { run: Run },
    Error {
        thread_id: ThreadId,
        error: PollError,
    },
}

/// The currently attended thread, shared between the UI side and every live
/// poller. Poll results are checked against it at arrival time, so a thread
/// switch mid-flight drops the stale result instead of leaking it.
#[derive(Debug, Clone, Default)]
pub struct ActiveThread {
    inner: Arc<Mutex<Option<ThreadId>>>,
}

impl ActiveThread {
    #[must_use]
    pub fn new(thread_id: Option<ThreadId>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(thread_id)),
        }
    }

    pub fn switch_to(&self, thread_id: Option<ThreadId>) {
        let mut guard = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = thread_id;
    }

    #[must_use]
    pub fn is_active(&self, thread_id: &str) -> bool {
        let guard = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.as_deref() == Some(thread_id)
    }

    #[must_use]
    pub fn current(&self) -> Option<ThreadId> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

pub struct RunPoller {
    api: Arc<dyn ThreadsApi>,
    config: PollerConfig,
    active: ActiveThread,
    events: mpsc::UnboundedSender<PollEvent>,
}

impl RunPoller {
    pub fn new(
        api: Arc<dyn ThreadsApi>,
        config: PollerConfig,
        active: ActiveThread,
    ) -> (Self, mpsc::UnboundedReceiver<PollEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        (
            Self {
                api,
                config,
                active,
                events,
            },
            receiver,
        )
    }

    pub fn spawn(self, run: Run) -> JoinHandle<()> {
        tokio::spawn(self.drive(run))
    }

    async fn drive(self, mut run: Run) {
        let thread_id = run.thread_id.clone();
        let run_id = run.id.clone();
        let mut cursor: Option<MessageId> = None;
        let mut terminal_emitted = false;

        loop {
            let tick = timeout(self.config.deadline, async {
                let status = self.api.get_run(&thread_id, &run_id).await?;
                let messages = self
                    .api
                    .list_messages(&thread_id, cursor.as_deref())
                    .await?;
                Ok::<(Run, Vec<Message>), ApiError>((status, messages))
            })
            .await;

            // Stale-response guard, evaluated at arrival time: a thread
            // switch while the poll was in flight means this result belongs
            // to a thread nobody is attending. Drop it and stop.
            if !self.active.is_active(&thread_id) {
                debug!(thread_id = %thread_id, "dropping stale poll result after thread switch");
                return;
            }

            match tick {
                Err(_elapsed) => {
                    warn!(thread_id = %thread_id, deadline = ?self.config.deadline, "poll deadline exceeded");
                    if self.emit_error(&thread_id, PollError::Deadline(self.config.deadline)) {
                        return;
                    }
                }
                Ok(Err(ApiError::Forbidden)) => {
                    warn!(thread_id = %thread_id, "forbidden; halting polling for this thread");
                    self.emit_error(&thread_id, PollError::Api(ApiError::Forbidden));
                    return;
                }
                Ok(Err(error)) => {
                    warn!(thread_id = %thread_id, error = %error, "poll attempt failed");
                    if self.emit_error(&thread_id, PollError::Api(error)) {
                        return;
                    }
                }
                Ok(Ok((fetched, messages))) => {
                    if !messages.is_empty() {
                        cursor = messages.last().map(|message| message.id.clone());
                        let event = PollEvent::Messages {
                            thread_id: thread_id.clone(),
                            messages,
                        };
                        if self.events.send(event).is_err() {
                            return;
                        }
                    }
                    if fetched.status != run.status
                        && self
                            .events
                            .send(PollEvent::StatusChanged {
                                run: fetched.clone(),
                            })
                            .is_err()
                    {
                        return;
                    }
                    run = fetched;
                    if run.status.is_terminal() && !terminal_emitted {
                        terminal_emitted = true;
                        info!(
                            thread_id = %thread_id,
                            run_id = %run.id,
                            status = %run.status,
                            "run reached terminal state"
                        );
                        if self
                            .events
                            .send(PollEvent::Terminal { run: run.clone() })
                            .is_err()
                            || !self.config.follow_idle
                        {
                            return;
                        }
                    }
                }
            }

            let cadence = if terminal_emitted {
                self.config.idle_interval
            } else {
                self.config.interval
            };
            tokio::time::sleep(cadence).await;
        }
    }

    /// Returns true when the receiver is gone and the poller should stop.
    fn emit_error(&self, thread_id: &str, error: PollError) -> bool {
        self.events
            .send(PollEvent::Error {
                thread_id: thread_id.to_string(),
                error,
            })
            .is_err()
    }
}
