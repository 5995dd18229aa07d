use std::{
    collections::VecDeque,
    sync::{Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use courier_core::{
    CacheValidators, ChatBackend, FetchOutcome, ListQuery, MessagePage, SendMessageResponse,
    SendRequest, TransportError,
};

#[derive(Default)]
struct FakeState {
    send_script: VecDeque<Result<SendMessageResponse, TransportError>>,
    list_script: VecDeque<Result<FetchOutcome, TransportError>>,
    sent: Vec<SendRequest>,
    queries: Vec<ListQuery>,
    bearers: Vec<Option<String>>,
    validators: Vec<Option<CacheValidators>>,
    latency: Duration,
}

/// Scripted in-memory backend.
///
/// Queued results are returned in order; once a script runs dry sends succeed
/// with `srv-{n}` ids and lists return an empty page.
#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<FakeState>,
}

impl FakeBackend {
    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push_send(&self, result: Result<SendMessageResponse, TransportError>) {
        self.lock().send_script.push_back(result);
    }

    pub fn push_send_error(&self, error: TransportError) {
        self.push_send(Err(error));
    }

    pub fn push_list(&self, result: Result<FetchOutcome, TransportError>) {
        self.lock().list_script.push_back(result);
    }

    pub fn push_list_error(&self, error: TransportError) {
        self.push_list(Err(error));
    }

    pub fn push_page(&self, page: MessagePage) {
        self.push_list(Ok(FetchOutcome::Modified {
            page,
            validators: CacheValidators::default(),
        }));
    }

    /// Delay every call by `latency` (virtual time under paused tests).
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    pub fn send_calls(&self) -> usize {
        self.lock().sent.len()
    }

    pub fn list_calls(&self) -> usize {
        self.lock().queries.len()
    }

    pub fn sent_requests(&self) -> Vec<SendRequest> {
        self.lock().sent.clone()
    }

    pub fn sent_bodies(&self) -> Vec<String> {
        self.lock().sent.iter().map(|r| r.body.clone()).collect()
    }

    pub fn list_queries(&self) -> Vec<ListQuery> {
        self.lock().queries.clone()
    }

    pub fn list_bearers(&self) -> Vec<Option<String>> {
        self.lock().bearers.clone()
    }

    pub fn list_validators(&self) -> Vec<Option<CacheValidators>> {
        self.lock().validators.clone()
    }
}

#[async_trait]
impl ChatBackend for FakeBackend {
    async fn send_message(
        &self,
        request: &SendRequest,
        _bearer: Option<&str>,
    ) -> Result<SendMessageResponse, TransportError> {
        let (result, latency) = {
            let mut state = self.lock();
            state.sent.push(request.clone());
            let n = state.sent.len();
            let result = state.send_script.pop_front().unwrap_or_else(|| {
                Ok(SendMessageResponse {
                    success: true,
                    message_id: Some(format!("srv-{n}")),
                    reply: None,
                })
            });
            (result, state.latency)
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        result
    }

    async fn list_messages_since(
        &self,
        query: &ListQuery,
        bearer: Option<&str>,
        validators: Option<&CacheValidators>,
    ) -> Result<FetchOutcome, TransportError> {
        let (result, latency) = {
            let mut state = self.lock();
            state.queries.push(query.clone());
            state.bearers.push(bearer.map(str::to_owned));
            state.validators.push(validators.cloned());
            let result = state.list_script.pop_front().unwrap_or_else(|| {
                Ok(FetchOutcome::Modified {
                    page: MessagePage::default(),
                    validators: CacheValidators::default(),
                })
            });
            (result, state.latency)
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        result
    }
}
