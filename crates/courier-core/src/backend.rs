use async_trait::async_trait;

use crate::{
    error::TransportError,
    types::{CacheValidators, ListQuery, MessagePage, SendMessageResponse, SendRequest},
};

/// Result of a (possibly conditional) list-since request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Backend returned a fresh page, with any validators it attached.
    Modified {
        page: MessagePage,
        validators: CacheValidators,
    },
    /// Backend confirmed the cached page is still current.
    NotModified,
}

/// The two backend operations the transport consumes.
///
/// Implementations perform exactly one request per call. Credential injection,
/// timeouts and caching are layered on top by the request helper.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Submit one outbound message. `request.client_id` is always set.
    async fn send_message(
        &self,
        request: &SendRequest,
        bearer: Option<&str>,
    ) -> Result<SendMessageResponse, TransportError>;

    /// Fetch messages newer than `query.since_id`.
    async fn list_messages_since(
        &self,
        query: &ListQuery,
        bearer: Option<&str>,
        validators: Option<&CacheValidators>,
    ) -> Result<FetchOutcome, TransportError>;
}
