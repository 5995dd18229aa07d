//! Transport runtime: HTTP backend, request helper, adaptive poll loop and
//! send pipeline.

/// Poll cadence selection.
pub mod cadence;
/// JSON-over-HTTP backend.
pub mod http;
/// Adaptive poll loop.
pub mod poller;
/// Credential, timeout and conditional-fetch wrapper around backend calls.
pub mod request;
/// Service facade wiring tracker, poller and pipeline together.
pub mod runtime;
/// Ordered outbound delivery with retry and offline queueing.
pub mod sender;

mod shared;

#[cfg(test)]
mod testing;

pub use cadence::{Cadence, CadenceInputs, CadenceReason, next_poll_delay};
pub use http::HttpChatBackend;
pub use poller::{PollReport, Poller};
pub use request::{ListResult, RequestHelper, SendResult};
pub use runtime::Transport;
pub use sender::SendPipeline;
