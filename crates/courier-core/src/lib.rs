//! Core transport contract shared between the runtime and UI consumers.
//!
//! This crate defines the message data model, the connection state tracker,
//! retry/backoff policy, the session cache and duplicate-suppression helpers,
//! the backend trait and the event channel abstraction.

/// User activity timestamps feeding poll cadence.
pub mod activity;
/// Backend operations consumed by the transport.
pub mod backend;
/// Per-session conditional-fetch cache.
pub mod cache;
/// Broadcast event channel primitives.
pub mod channel;
/// Environment-backed configuration.
pub mod config;
/// Connection state tracker and status observers.
pub mod connection;
/// Bounded retained-id set for duplicate suppression.
pub mod dedupe;
/// Stable transport error types and HTTP classification helpers.
pub mod error;
/// Conversions between backend payloads and local messages.
pub mod normalization;
/// Backoff policy used by retry loops.
pub mod retry;
/// Session-scoped message log.
pub mod timeline;
/// Data model and event payloads.
pub mod types;

pub use activity::{ActivitySnapshot, ActivityTracker};
pub use backend::{ChatBackend, FetchOutcome};
pub use cache::{CacheEntry, SessionCache};
pub use channel::{EventStream, TransportChannels};
pub use config::{ConfigError, PollConfig, TransportConfig};
pub use connection::{ConnectionTracker, ObserverId, StatusObserver, TrackerThresholds};
pub use dedupe::RetainedIds;
pub use error::{TransportError, TransportErrorCategory, classify_http_status};
pub use normalization::{SendOutcome, new_client_id, normalize_send_outcome, unix_time_ms};
pub use retry::RetryPolicy;
pub use timeline::{LogOp, MessageLog, MessageLogError};
pub use types::{
    ActivityKind, AssistantReply, CacheValidators, ConnectionState, ConnectionStatus, ListQuery,
    Message, MessagePage, MessageRole, MessageStatus, PollStatus, QueuedMessage, RemoteMessage,
    SendMessageResponse, SendRequest, TransportEvent,
};
