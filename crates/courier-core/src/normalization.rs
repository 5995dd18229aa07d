use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

use crate::{
    error::TransportError,
    timeline::LogOp,
    types::{AssistantReply, Message, MessageRole, MessageStatus, RemoteMessage, SendRequest},
};

/// Final outcome of delivering one outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Backend accepted the message and assigned `server_id`.
    Delivered {
        server_id: Option<String>,
        reply: Option<AssistantReply>,
    },
    /// Delivery was abandoned.
    Failed { error: TransportError },
}

/// Wall-clock milliseconds since Unix epoch.
pub fn unix_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// Fresh client-generated message id.
pub fn new_client_id() -> String {
    Uuid::new_v4().to_string()
}

/// Optimistic `Sending` message materialized before any network I/O.
pub fn optimistic_message(client_id: impl Into<String>, request: &SendRequest) -> Message {
    Message {
        id: client_id.into(),
        server_id: None,
        role: MessageRole::User,
        body: request.body.clone(),
        timestamp_ms: unix_time_ms(),
        session_id: request.session_id.clone(),
        status: MessageStatus::Sending,
        error_code: None,
    }
}

/// Convert a polled backend message into a delivered local message.
pub fn message_from_remote(session_id: &str, remote: RemoteMessage) -> Message {
    let timestamp_ms = if remote.timestamp_ms == 0 {
        unix_time_ms()
    } else {
        remote.timestamp_ms
    };
    Message {
        id: remote.id.clone(),
        server_id: Some(remote.id),
        role: remote.role,
        body: remote.content,
        timestamp_ms,
        session_id: session_id.to_owned(),
        status: MessageStatus::Delivered,
        error_code: None,
    }
}

/// Materialize an assistant reply embedded in a send response.
pub fn reply_message(session_id: &str, request_client_id: &str, reply: AssistantReply) -> Message {
    Message {
        id: format!("{request_client_id}:reply"),
        server_id: None,
        role: reply.role,
        body: reply.content,
        timestamp_ms: unix_time_ms(),
        session_id: session_id.to_owned(),
        status: MessageStatus::Delivered,
        error_code: None,
    }
}

/// Log operations recording a send outcome for `client_id`, including the
/// intermediate `Sent` step of a successful delivery.
pub fn normalize_send_outcome(
    session_id: &str,
    client_id: &str,
    outcome: SendOutcome,
) -> Vec<LogOp> {
    match outcome {
        SendOutcome::Delivered { server_id, reply } => {
            let mut ops = vec![
                LogOp::UpdateStatus {
                    id: client_id.to_owned(),
                    status: MessageStatus::Sent,
                    server_id: None,
                    error_code: None,
                },
                LogOp::UpdateStatus {
                    id: client_id.to_owned(),
                    status: MessageStatus::Delivered,
                    server_id,
                    error_code: None,
                },
            ];
            if let Some(reply) = reply {
                ops.push(LogOp::Upsert(reply_message(session_id, client_id, reply)));
            }
            ops
        }
        SendOutcome::Failed { error } => vec![LogOp::UpdateStatus {
            id: client_id.to_owned(),
            status: MessageStatus::Failed,
            server_id: None,
            error_code: Some(error.code),
        }],
    }
}
