use std::collections::HashMap;

use thiserror::Error;

use crate::types::{Message, MessageRole, MessageStatus};

/// Errors that can occur while applying message log operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessageLogError {
    /// An operation referenced a message id that is not present in the log.
    #[error("message with id '{0}' was not found")]
    MissingMessage(String),
}

/// Incremental operation applied to a session's message log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOp {
    /// Append a message, or replace the entry with the same id in place.
    Upsert(Message),
    /// Update the delivery status of an existing message.
    UpdateStatus {
        id: String,
        status: MessageStatus,
        server_id: Option<String>,
        error_code: Option<String>,
    },
    /// Remove an existing message.
    Remove { id: String },
}

/// Session-scoped in-memory message history with bounded retention.
#[derive(Debug, Clone)]
pub struct MessageLog {
    sessions: HashMap<String, Vec<Message>>,
    max_items: usize,
}

impl MessageLog {
    /// Create a log keeping at most `max_items` messages per session (`>= 1`).
    pub fn new(max_items: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            max_items: max_items.max(1),
        }
    }

    /// Messages of a session in display order.
    pub fn messages(&self, session_id: &str) -> &[Message] {
        self.sessions
            .get(session_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn get(&self, session_id: &str, id: &str) -> Option<&Message> {
        self.messages(session_id).iter().find(|m| m.id == id)
    }

    /// Look a message up by client id across sessions.
    pub fn find(&self, id: &str) -> Option<&Message> {
        self.sessions
            .values()
            .flat_map(|messages| messages.iter())
            .find(|m| m.id == id)
    }

    /// Backend id of the newest message the session has seen, used to seed
    /// the poll marker.
    pub fn last_server_id(&self, session_id: &str) -> Option<&str> {
        self.messages(session_id)
            .iter()
            .rev()
            .find_map(|m| m.server_id.as_deref())
    }

    pub fn contains_server_id(&self, session_id: &str, server_id: &str) -> bool {
        self.messages(session_id)
            .iter()
            .any(|m| m.server_id.as_deref() == Some(server_id))
    }

    /// Oldest delivered message of the given role and body that has no
    /// backend id yet, such as a reply materialized from a send response.
    pub fn find_unlinked(&self, session_id: &str, role: MessageRole, body: &str) -> Option<&str> {
        self.messages(session_id)
            .iter()
            .find(|m| {
                m.server_id.is_none()
                    && m.status == MessageStatus::Delivered
                    && m.role == role
                    && m.body == body
            })
            .map(|m| m.id.as_str())
    }

    /// Apply operations to a session in order.
    pub fn apply_ops(&mut self, session_id: &str, ops: &[LogOp]) -> Result<(), MessageLogError> {
        let max_items = self.max_items;
        let items = self.sessions.entry(session_id.to_owned()).or_default();

        for op in ops {
            match op {
                LogOp::Upsert(message) => {
                    match items.iter_mut().find(|it| it.id == message.id) {
                        Some(existing) => *existing = message.clone(),
                        None => items.push(message.clone()),
                    }
                }
                LogOp::UpdateStatus {
                    id,
                    status,
                    server_id,
                    error_code,
                } => {
                    let item = items
                        .iter_mut()
                        .find(|it| &it.id == id)
                        .ok_or_else(|| MessageLogError::MissingMessage(id.clone()))?;
                    item.status = *status;
                    if server_id.is_some() {
                        item.server_id = server_id.clone();
                    }
                    item.error_code = error_code.clone();
                }
                LogOp::Remove { id } => {
                    let idx = items
                        .iter()
                        .position(|it| &it.id == id)
                        .ok_or_else(|| MessageLogError::MissingMessage(id.clone()))?;
                    items.remove(idx);
                }
            }
            trim_to_max(items, max_items);
        }

        Ok(())
    }
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new(1_000)
    }
}

fn trim_to_max(items: &mut Vec<Message>, max_items: usize) {
    if items.len() <= max_items {
        return;
    }

    let excess = items.len() - max_items;
    items.drain(0..excess);
}
