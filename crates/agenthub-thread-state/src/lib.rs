//! Single source of truth for thread views.
//!
//! Inputs arrive from three directions: the dispatcher (optimistic messages
//! registered before the network resolves), the poller (authoritative
//! messages and run status), and the archive decoder (the transcript plus the
//! file tree of a completed run). The store merges them into one
//! monotonically-improving snapshot per thread. Merging is additive and
//! idempotent; nothing here uses last-writer-wins.
//!
//! Concurrency model: the sync [`ThreadStateStore`] is the mutation point and
//! is driven by a single writer. [`ThreadStateHandle`] wraps it in a spawned
//! task fed over an mpsc queue, so concurrent producers serialize without a
//! global lock, and publishes the active thread's snapshot over a watch
//! channel.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};

use agenthub_archive::DecodedArchive;
use agenthub_types::{
    FileArtifact, Message, MessageContent, MessageId, MessageRole, OptimisticMessage,
    OptimisticSink, Run, RunId, RunStatus, Thread, ThreadId,
};

/// One input to the store, tagged with the thread it belongs to. Updates for
/// threads other than the active one are buffered in that thread's own state,
/// never merged into a different thread's view.
#[derive(Debug)]
pub enum StoreUpdate {
    /// A dispatch resolved: the thread exists and a run was created.
    Dispatched { thread: Thread, run: Run },
    /// A locally-registered message awaiting server confirmation.
    Optimistic { message: OptimisticMessage },
    /// Authoritative messages from a poll, in creation order.
    Messages {
        thread_id: ThreadId,
        messages: Vec<Message>,
    },
    /// Run status observation (poll status change or terminal event).
    RunStatus { run: Run },
    /// Decoded artifact of a completed run.
    Archive {
        thread_id: ThreadId,
        run_id: RunId,
        archive: DecodedArchive,
    },
    /// Explicit user deletion; terminal for the thread.
    ThreadDeleted { thread_id: ThreadId },
}

/// Immutable view of one thread, cheap to clone for watch subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct ThreadSnapshot {
    pub thread_id: ThreadId,
    pub thread: Option<Thread>,
    pub run_status: Option<RunStatus>,
    /// Authoritative messages in creation order.
    pub messages: Vec<Message>,
    /// Remaining optimistic messages in submission order; always rendered
    /// after the authoritative list.
    pub optimistic: Vec<OptimisticMessage>,
    pub files: BTreeMap<String, FileArtifact>,
}

impl ThreadSnapshot {
    /// Visible message count: authoritative then remaining optimistic.
    #[must_use]
    pub fn visible_len(&self) -> usize {
        self.messages.len() + self.optimistic.len()
    }
}

#[derive(Debug, Default)]
struct ThreadState {
    thread: Option<Thread>,
    messages: Vec<Message>,
    seen_message_ids: HashSet<MessageId>,
    optimistic: Vec<OptimisticMessage>,
    files: BTreeMap<String, FileArtifact>,
    run_id: Option<RunId>,
    run_status: Option<RunStatus>,
}

impl ThreadState {
    fn snapshot(&self, thread_id: &str) -> ThreadSnapshot {
        ThreadSnapshot {
            thread_id: thread_id.to_string(),
            thread: self.thread.clone(),
            run_status: self.run_status,
            messages: self.messages.clone(),
            optimistic: self.optimistic.clone(),
            files: self.files.clone(),
        }
    }

    /// Appends an authoritative message unless its id was already merged,
    /// then retires any optimistic message it confirms. Pure with respect to
    /// re-application: the same payload twice changes nothing the second
    /// time.
    fn merge_message(&mut self, message: Message) {
        if !self.seen_message_ids.insert(message.id.clone()) {
            return;
        }
        self.optimistic
            .retain(|optimistic| !optimistic.is_confirmed_by(&message));
        self.messages.push(message);
    }

    /// True when a (role, content) match exists outside the given transcript,
    /// e.g. a poll-delivered echo. Earlier lines of the same transcript never
    /// match, so a transcript that legitimately repeats a line keeps every
    /// occurrence.
    fn has_equivalent_message(
        &self,
        role: MessageRole,
        content: &[MessageContent],
        transcript_prefix: &str,
    ) -> bool {
        self.messages.iter().any(|message| {
            message.role == role
                && message.content == content
                && !message.id.starts_with(transcript_prefix)
        })
    }

    /// More-terminal status wins; a terminal status is never downgraded.
    fn merge_status(&mut self, status: RunStatus) {
        match self.run_status {
            Some(current) if status.rank() < current.rank() => {}
            _ => self.run_status = Some(status),
        }
    }

    fn drop_optimistic(&mut self) -> usize {
        let dropped = self.optimistic.len();
        self.optimistic.clear();
        dropped
    }
}

#[derive(Debug, Default)]
pub struct ThreadStateStore {
    active: Option<ThreadId>,
    threads: HashMap<ThreadId, ThreadState>,
}

impl ThreadStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Switches attention to another thread. The departed thread's optimistic
    /// set is reset so a switch never leaks un-confirmed state; its merged
    /// authoritative data stays buffered for when the caller switches back.
    pub fn set_active(&mut self, next: Option<ThreadId>) {
        if self.active == next {
            return;
        }
        if let Some(previous) = self.active.take() {
            if let Some(state) = self.threads.get_mut(&previous) {
                let dropped = state.drop_optimistic();
                if dropped > 0 {
                    debug!(
                        thread_id = %previous,
                        dropped,
                        "reset optimistic messages on thread switch"
                    );
                }
            }
        }
        self.active = next;
    }

    #[must_use]
    pub fn active(&self) -> Option<&ThreadId> {
        self.active.as_ref()
    }

    pub fn apply(&mut self, update: StoreUpdate) {
        match update {
            StoreUpdate::Dispatched { thread, run } => {
                let state = self.threads.entry(thread.id.clone()).or_default();
                state.thread = Some(thread);
                state.run_id = Some(run.id);
                state.merge_status(run.status);
            }
            StoreUpdate::Optimistic { message } => {
                let state = self.threads.entry(message.thread_id.clone()).or_default();
                // Registration is idempotent on the correlation key.
                if state
                    .optimistic
                    .iter()
                    .all(|existing| existing.client_key != message.client_key)
                {
                    state.optimistic.push(message);
                }
            }
            StoreUpdate::Messages {
                thread_id,
                messages,
            } => {
                let state = self.threads.entry(thread_id).or_default();
                for message in messages {
                    state.merge_message(message);
                }
            }
            StoreUpdate::RunStatus { run } => {
                let state = self.threads.entry(run.thread_id.clone()).or_default();
                state.run_id = Some(run.id.clone());
                state.merge_status(run.status);
                if matches!(run.status, RunStatus::Failed | RunStatus::Cancelled) {
                    let dropped = state.drop_optimistic();
                    if dropped > 0 {
                        info!(
                            thread_id = %run.thread_id,
                            run_id = %run.id,
                            status = %run.status,
                            dropped,
                            "discarded optimistic messages for failed run"
                        );
                    }
                }
            }
            StoreUpdate::Archive {
                thread_id,
                run_id,
                archive,
            } => {
                let state = self.threads.entry(thread_id.clone()).or_default();
                state.files.extend(archive.files);
                let transcript_prefix = format!("{run_id}:transcript:");
                for (index, entry) in archive.transcript.into_iter().enumerate() {
                    let content = vec![entry.content];
                    // The transcript echoes messages the poller may already
                    // have delivered under their real ids; an equivalent
                    // (role, content) pair is not merged twice.
                    if state.has_equivalent_message(entry.role, &content, &transcript_prefix) {
                        continue;
                    }
                    // Synthetic id, stable across re-decodes of the same
                    // archive, so double-applying an archive is a no-op.
                    state.merge_message(Message {
                        id: format!("{transcript_prefix}{index}"),
                        thread_id: thread_id.clone(),
                        role: entry.role,
                        content,
                        created_at: Utc::now(),
                        run_id: Some(run_id.clone()),
                    });
                }
            }
            StoreUpdate::ThreadDeleted { thread_id } => {
                self.threads.remove(&thread_id);
                if self.active.as_deref() == Some(thread_id.as_str()) {
                    self.active = None;
                }
            }
        }
    }

    /// Snapshot of any thread, active or buffered.
    #[must_use]
    pub fn snapshot(&self, thread_id: &str) -> Option<ThreadSnapshot> {
        self.threads
            .get(thread_id)
            .map(|state| state.snapshot(thread_id))
    }

    #[must_use]
    pub fn active_snapshot(&self) -> Option<ThreadSnapshot> {
        let active = self.active.as_ref()?;
        self.snapshot(active)
    }
}

enum StoreCommand {
    Update(StoreUpdate),
    SetActive(Option<ThreadId>),
    Query {
        thread_id: ThreadId,
        reply: oneshot::Sender<Option<ThreadSnapshot>>,
    },
}

/// Handle to the store's single-writer task. Clones share the same store.
#[derive(Clone)]
pub struct ThreadStateHandle {
    commands: mpsc::UnboundedSender<StoreCommand>,
    snapshots: watch::Receiver<Option<ThreadSnapshot>>,
}

impl ThreadStateHandle {
    /// Spawns the store task on the current tokio runtime.
    #[must_use]
    pub fn spawn() -> Self {
        let (commands, mut receiver) = mpsc::unbounded_channel();
        let (publisher, snapshots) = watch::channel(None);
        tokio::spawn(async move {
            let mut store = ThreadStateStore::new();
            while let Some(command) = receiver.recv().await {
                match command {
                    StoreCommand::Update(update) => store.apply(update),
                    StoreCommand::SetActive(thread_id) => store.set_active(thread_id),
                    StoreCommand::Query { thread_id, reply } => {
                        let _ = reply.send(store.snapshot(&thread_id));
                        continue;
                    }
                }
                let _ = publisher.send(store.active_snapshot());
            }
        });
        Self {
            commands,
            snapshots,
        }
    }

    pub fn apply(&self, update: StoreUpdate) {
        let _ = self.commands.send(StoreCommand::Update(update));
    }

    pub fn set_active(&self, thread_id: Option<ThreadId>) {
        let _ = self.commands.send(StoreCommand::SetActive(thread_id));
    }

    /// Point-in-time snapshot of any thread, including buffered ones. Returns
    /// `None` when the thread is unknown or the store task is gone.
    pub async fn snapshot(&self, thread_id: &str) -> Option<ThreadSnapshot> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(StoreCommand::Query {
                thread_id: thread_id.to_string(),
                reply,
            })
            .ok()?;
        response.await.ok().flatten()
    }

    /// Watch channel carrying the active thread's latest snapshot.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<ThreadSnapshot>> {
        self.snapshots.clone()
    }
}

impl OptimisticSink for ThreadStateHandle {
    fn register(&self, message: OptimisticMessage) {
        self.apply(StoreUpdate::Optimistic { message });
    }
}
