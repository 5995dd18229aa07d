use std::{
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use courier_core::{
    ChatBackend, FetchOutcome, ListQuery, MessagePage, SendMessageResponse, SendRequest,
    SessionCache, TransportError, TransportErrorCategory,
};
use courier_platform::CredentialProvider;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Result of a list-since call after cache resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListResult {
    pub page: MessagePage,
    /// The backend confirmed the cached page; `page` came from the cache.
    pub not_modified: bool,
    pub latency: Duration,
}

/// Accepted send together with its round-trip latency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendResult {
    pub response: SendMessageResponse,
    pub latency: Duration,
}

/// Wraps every backend call with the bearer credential, the fixed request
/// timeout and conditional-fetch caching.
///
/// An authentication rejection discards the stored credential before the
/// error is returned.
pub struct RequestHelper {
    backend: Arc<dyn ChatBackend>,
    credentials: Arc<dyn CredentialProvider>,
    cache: Mutex<SessionCache>,
    request_timeout: Duration,
}

impl RequestHelper {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        credentials: Arc<dyn CredentialProvider>,
        cache_ttl: Duration,
        request_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            credentials,
            cache: Mutex::new(SessionCache::new(cache_ttl)),
            request_timeout,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Fetch messages newer than `query.since_id`, sending validators of a
    /// matching cache entry. A "not modified" answer yields the cached page.
    pub async fn list_since(&self, query: &ListQuery) -> Result<ListResult, TransportError> {
        let validators = {
            let mut cache = self.cache();
            cache.purge_expired();
            cache.validators_for(&query.session_id, query.since_id.as_deref())
        };
        let bearer = self.credentials.bearer_token();

        let started = Instant::now();
        let outcome = self
            .with_timeout(
                "list_messages_since",
                self.backend
                    .list_messages_since(query, bearer.as_deref(), validators.as_ref()),
            )
            .await
            .inspect_err(|err| self.on_error(err))?;
        let latency = started.elapsed();

        match outcome {
            FetchOutcome::Modified { page, validators } => {
                self.cache().store(
                    query.session_id.clone(),
                    query.since_id.clone(),
                    page.clone(),
                    validators,
                );
                Ok(ListResult {
                    page,
                    not_modified: false,
                    latency,
                })
            }
            FetchOutcome::NotModified => {
                let page = self
                    .cache()
                    .get(&query.session_id, query.since_id.as_deref())
                    .map(|entry| entry.page.clone())
                    .unwrap_or_default();
                debug!(session_id = %query.session_id, "using cached page");
                Ok(ListResult {
                    page,
                    not_modified: true,
                    latency,
                })
            }
        }
    }

    /// Submit one message. An accepted send invalidates the session cache.
    pub async fn send(&self, request: &SendRequest) -> Result<SendResult, TransportError> {
        let bearer = self.credentials.bearer_token();

        let started = Instant::now();
        let response = self
            .with_timeout(
                "send_message",
                self.backend.send_message(request, bearer.as_deref()),
            )
            .await
            .and_then(|response| {
                if response.success {
                    Ok(response)
                } else {
                    Err(TransportError::new(
                        TransportErrorCategory::Server,
                        "send_unsuccessful",
                        "backend did not accept the message",
                    ))
                }
            })
            .inspect_err(|err| self.on_error(err))?;

        self.invalidate(&request.session_id);
        Ok(SendResult {
            response,
            latency: started.elapsed(),
        })
    }

    /// Drop the cached page of a session.
    pub fn invalidate(&self, session_id: &str) {
        if self.cache().invalidate(session_id) {
            debug!(session_id, "session cache invalidated");
        }
    }

    async fn with_timeout<T>(
        &self,
        operation: &str,
        call: impl Future<Output = Result<T, TransportError>>,
    ) -> Result<T, TransportError> {
        match tokio::time::timeout(self.request_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::timeout(operation, self.request_timeout)),
        }
    }

    fn on_error(&self, err: &TransportError) {
        if err.is_auth_rejection() {
            warn!(code = %err.code, "backend rejected credential; discarding it");
            self.credentials.discard();
        }
    }

    fn cache(&self) -> MutexGuard<'_, SessionCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
