use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

/// Author of a chat message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Message typed by the local user.
    User,
    /// Message produced by the backend response generator.
    Assistant,
    /// Service notice injected by the backend.
    System,
}

/// Client-side delivery status of a message.
///
/// Outbound messages move `Sending -> Sent -> Delivered`, or end in `Failed`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Optimistically shown, not yet acknowledged by the backend.
    Sending,
    /// Backend accepted the request.
    Sent,
    /// Backend assigned an id and the message is part of the session history.
    Delivered,
    /// Delivery was abandoned; the message stays visible for manual resend.
    Failed,
}

impl MessageStatus {
    /// `true` once no further delivery attempt will happen for the message.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Failed)
    }
}

/// Chat message as tracked by the transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Client-generated unique id (also used for inbound messages that were
    /// first seen through a poll, where it equals the server id).
    pub id: String,
    /// Backend-assigned id once known.
    pub server_id: Option<String>,
    /// Message origin.
    pub role: MessageRole,
    /// Display-ready text body.
    pub body: String,
    /// Creation timestamp in milliseconds since Unix epoch.
    pub timestamp_ms: u64,
    /// Session (conversation) the message belongs to.
    pub session_id: String,
    /// Delivery status.
    pub status: MessageStatus,
    /// Stable error code when `status == Failed`.
    pub error_code: Option<String>,
}

/// Outbound send request accepted by the send pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendRequest {
    /// Caller-provided client id. A fresh id is generated when absent.
    pub client_id: Option<String>,
    /// Target session.
    pub session_id: String,
    /// Message body.
    pub body: String,
    /// Optional opaque context forwarded to the backend.
    pub context: Option<Value>,
}

impl SendRequest {
    /// Build a request without context or explicit client id.
    pub fn new(session_id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            client_id: None,
            session_id: session_id.into(),
            body: body.into(),
            context: None,
        }
    }

    /// Pin the client id, e.g. when the UI retries the same intent.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Attach backend context.
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }
}

/// Message waiting in the offline/retry queue.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub message: Message,
    pub request: SendRequest,
    /// Delivery attempts already made.
    pub attempts: u32,
    /// Earliest instant at which the next attempt may run.
    pub next_attempt_at: Instant,
}

impl QueuedMessage {
    pub fn new(message: Message, request: SendRequest, now: Instant) -> Self {
        Self {
            message,
            request,
            attempts: 0,
            next_attempt_at: now,
        }
    }

    pub fn is_eligible(&self, now: Instant) -> bool {
        self.next_attempt_at <= now
    }
}

/// Liveness classification maintained by the connection tracker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Host reports no network, or the transport is stopped.
    Offline,
    /// Transport started; no poll outcome yet.
    Connecting,
    /// Polls succeed but not yet enough in a row to call the link stable.
    Polling,
    /// Consecutive successes reached the promotion threshold.
    Connected,
    /// Recent requests failed; retrying with backoff.
    Degraded,
}

/// Snapshot of the status surface exposed to the UI layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionStatus {
    /// Current liveness classification.
    pub state: ConnectionState,
    /// Human-readable status line.
    pub message: String,
    /// Health flag (see `ConnectionTracker::is_healthy`).
    pub healthy: bool,
    /// Latency of the last successful request.
    pub latency_ms: Option<u64>,
    /// Polls issued while errors were outstanding since the last success.
    pub reconnect_attempts: u32,
    /// Consecutive failed requests.
    pub consecutive_errors: u32,
    /// Wall-clock time of the last successful request.
    pub last_success_ms: Option<u64>,
    /// Set once the backend rejected the bearer credential.
    pub auth_required: bool,
}

/// Kinds of user activity reported by the host environment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ActivityKind {
    Keystroke,
    PointerMove,
    MessageSent,
    FocusChange,
}

/// Assistant reply embedded in a send response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssistantReply {
    pub content: String,
    #[serde(default = "assistant_role")]
    pub role: MessageRole,
}

fn assistant_role() -> MessageRole {
    MessageRole::Assistant
}

/// Backend response to the send operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendMessageResponse {
    pub success: bool,
    /// Backend-assigned message id.
    #[serde(default)]
    pub message_id: Option<String>,
    /// Immediately available assistant reply, if the backend produced one
    /// synchronously.
    #[serde(default)]
    pub reply: Option<AssistantReply>,
}

/// Message as returned by the list-since operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteMessage {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(default)]
    pub timestamp_ms: u64,
}

/// One page of the list-since operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct MessagePage {
    /// New messages in backend order.
    #[serde(default)]
    pub messages: Vec<RemoteMessage>,
    #[serde(default)]
    pub has_more: bool,
}

/// Query for the list-since operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub session_id: String,
    /// Last backend message id already seen by the client.
    pub since_id: Option<String>,
    pub limit: u16,
    pub offset: Option<u32>,
}

/// Opaque cache validators returned by (and echoed to) the backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheValidators {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl CacheValidators {
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }
}

/// Poll loop status updates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollStatus {
    /// Whether the poll loop is currently running.
    pub running: bool,
    /// Delay until the next scheduled poll.
    pub next_poll_ms: Option<u64>,
}

/// Event channel output emitted by the transport runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum TransportEvent {
    /// Connection status changed.
    StatusChanged(ConnectionStatus),
    /// An outbound (or reply) message was created or changed status.
    MessageUpdated(Message),
    /// A message was dropped from the log (superseded by a manual resend).
    MessageRemoved { session_id: String, id: String },
    /// New messages arrived through a poll, in backend order.
    MessagesReceived {
        session_id: String,
        messages: Vec<Message>,
    },
    /// Poll loop status update.
    PollStatus(PollStatus),
    /// The backend rejected the bearer credential; re-authentication needed.
    AuthRequired,
}
