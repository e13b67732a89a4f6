//! Agent run & artifact resolution pipeline.
//!
//! Facade over the pipeline's crates: dispatch a user message as a remote
//! agent run ([`client`]), poll the run to a terminal state ([`client`]),
//! decode its compressed artifact ([`archive`]), classify embedded structured
//! payloads ([`aitp`]), and reconcile everything into per-thread snapshots
//! ([`store`]). [`Pipeline`] wires the pieces together.

pub use agenthub_aitp as aitp;
pub use agenthub_archive as archive;
pub use agenthub_client as client;
pub use agenthub_thread_state as store;
pub use agenthub_types as types;

mod pipeline;

pub use pipeline::Pipeline;

use agenthub_types::MessageContent;

/// Classifies one message content item against the protocol schema union.
/// Text items carry no structured payload and return `None`.
#[must_use]
pub fn classify_content(content: &MessageContent) -> Option<aitp::Classification> {
    match content {
        MessageContent::Json(value) => Some(aitp::classify(value)),
        MessageContent::Text(_) => None,
    }
}
