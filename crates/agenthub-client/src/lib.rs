//! Hub-facing side of the run pipeline: the remote service contract
//! ([`api::ThreadsApi`]), its HTTP implementation ([`client::HubClient`]),
//! the dispatcher that turns a user message into a run, and the poller that
//! drives a run to its terminal state.

pub mod api;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod poller;

pub use api::{ApiError, CreateThreadRequest, StartRunRequest, ThreadsApi};
pub use client::HubClient;
pub use config::HubClientConfig;
pub use dispatch::{DispatchOutcome, DispatchRequest, RunDispatcher};
pub use poller::{ActiveThread, PollError, PollEvent, PollerConfig, RunPoller};
