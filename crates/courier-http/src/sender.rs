use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use courier_core::{
    ActivityKind, LogOp, QueuedMessage, RetainedIds, SendOutcome, SendRequest, TransportError,
    TransportEvent, new_client_id, normalization::optimistic_message, normalize_send_outcome,
};
use futures::{StreamExt, future::BoxFuture, stream::FuturesUnordered};
use tokio::{
    sync::{Notify, mpsc},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at, sleep_until},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    request::SendResult,
    shared::TransportShared,
};

#[derive(Debug)]
enum PipelineSignal {
    Enqueued,
    NetworkChanged(bool),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AttemptKey {
    session_id: String,
    message_id: String,
}

type AttemptFuture = BoxFuture<'static, (AttemptKey, Result<SendResult, TransportError>)>;

struct PipelineState {
    /// Ids whose outcome is final (delivered or permanently failed).
    retained: RetainedIds,
    /// Ids accepted but not yet final.
    pending: HashSet<String>,
    queues: BTreeMap<String, VecDeque<QueuedMessage>>,
    /// Sessions with an attempt on the wire.
    in_flight: HashSet<String>,
    failed: FailedPayloads,
}

impl PipelineState {
    fn new(dedupe_capacity: usize) -> Self {
        Self {
            retained: RetainedIds::new(dedupe_capacity),
            pending: HashSet::new(),
            queues: BTreeMap::new(),
            in_flight: HashSet::new(),
            failed: FailedPayloads::new(dedupe_capacity),
        }
    }

    fn retire(&mut self, id: &str) {
        self.pending.remove(id);
        self.retained.insert(id);
    }
}

/// Payloads of permanently failed messages, kept for manual resend. Once
/// full, the oldest payload is evicted first.
struct FailedPayloads {
    order: VecDeque<String>,
    payloads: HashMap<String, SendRequest>,
    capacity: usize,
}

impl FailedPayloads {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            payloads: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    fn insert(&mut self, id: String, request: SendRequest) {
        if self.payloads.insert(id.clone(), request).is_none() {
            self.order.push_back(id);
        }
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.payloads.remove(&evicted);
            }
        }
    }

    fn take(&mut self, id: &str) -> Option<SendRequest> {
        let request = self.payloads.remove(id)?;
        self.order.retain(|existing| existing != id);
        Some(request)
    }
}

/// What to do after an attempt resolved, decided under the state lock.
enum Resolution {
    Delivered(SendResult),
    Failed {
        error: TransportError,
        auth_rejected: bool,
    },
    Retry,
}

/// Ordered, deduplicated delivery of outbound messages with retry and an
/// offline queue.
///
/// Messages of one session go out strictly one at a time in submission order.
/// A worker task owns timers and in-flight attempts; shutting it down drops
/// every attempt future, which aborts the request.
pub struct SendPipeline {
    shared: Arc<TransportShared>,
    state: Arc<Mutex<PipelineState>>,
    signal_tx: mpsc::UnboundedSender<PipelineSignal>,
    stop: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SendPipeline {
    /// Spawn the pipeline worker. Must be called within a tokio runtime.
    pub(crate) fn spawn(shared: Arc<TransportShared>, poll_nudge: Arc<Notify>) -> Self {
        let state = Arc::new(Mutex::new(PipelineState::new(
            shared.config.dedupe_capacity,
        )));
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let stop = CancellationToken::new();

        let worker = PipelineWorker {
            shared: shared.clone(),
            state: state.clone(),
            poll_nudge,
        };
        let task = tokio::spawn(worker.run(signal_rx, stop.child_token()));

        Self {
            shared,
            state,
            signal_tx,
            stop,
            worker: Mutex::new(Some(task)),
        }
    }

    /// Accept a message for delivery and return its client id.
    ///
    /// The message is shown as `Sending` before any network I/O. A client id
    /// that is already pending or final is a no-op returning the same id.
    pub fn send_message(&self, request: SendRequest) -> String {
        let client_id = request
            .client_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(new_client_id);
        let session_id = request.session_id.clone();

        let message = {
            let mut state = lock(&self.state);
            if state.retained.contains(&client_id) || state.pending.contains(&client_id) {
                debug!(message_id = %client_id, "duplicate send ignored");
                return client_id;
            }

            let request = SendRequest {
                client_id: Some(client_id.clone()),
                ..request
            };
            let message = optimistic_message(client_id.clone(), &request);
            state.pending.insert(client_id.clone());
            state
                .queues
                .entry(session_id.clone())
                .or_default()
                .push_back(QueuedMessage::new(message.clone(), request, Instant::now()));
            message
        };

        self.shared
            .apply_and_emit(&session_id, vec![LogOp::Upsert(message)]);
        self.shared.activity.record(ActivityKind::MessageSent);

        if self.shared.env.is_online() {
            let _ = self.signal_tx.send(PipelineSignal::Enqueued);
        } else {
            info!(session_id = %session_id, message_id = %client_id, "offline; message queued");
        }
        client_id
    }

    /// Re-submit a permanently failed message under a fresh client id.
    ///
    /// The failed entry is removed from the log. Returns `None` if `id` is not
    /// a failed message.
    pub fn resend(&self, id: &str) -> Option<String> {
        let request = lock(&self.state).failed.take(id)?;
        let session_id = request.session_id.clone();
        self.shared.apply_and_emit(
            &session_id,
            vec![LogOp::Remove { id: id.to_owned() }],
        );

        let fresh = self.send_message(SendRequest {
            client_id: None,
            ..request
        });
        info!(session_id = %session_id, failed_id = id, message_id = %fresh, "resending failed message");
        Some(fresh)
    }

    /// Host reachability changed. Going online drains eligible messages.
    pub fn network_changed(&self, online: bool) {
        let _ = self.signal_tx.send(PipelineSignal::NetworkChanged(online));
    }

    /// Messages not yet delivered or failed.
    pub fn queued_count(&self) -> usize {
        lock(&self.state).queues.values().map(VecDeque::len).sum()
    }

    /// Ids of queued messages, per session in delivery order.
    pub fn pending_ids(&self) -> Vec<String> {
        lock(&self.state)
            .queues
            .values()
            .flat_map(|queue| queue.iter().map(|entry| entry.message.id.clone()))
            .collect()
    }

    /// Stop the worker, abandoning in-flight attempts. Queued messages stay
    /// `Sending`.
    pub async fn shutdown(&self) {
        self.stop.cancel();
        let task = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            let _ = task.await;
            info!("send pipeline stopped");
        }
    }
}

impl Drop for SendPipeline {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

struct PipelineWorker {
    shared: Arc<TransportShared>,
    state: Arc<Mutex<PipelineState>>,
    poll_nudge: Arc<Notify>,
}

impl PipelineWorker {
    async fn run(
        self,
        mut signals: mpsc::UnboundedReceiver<PipelineSignal>,
        stop: CancellationToken,
    ) {
        let drain_every = self.shared.config.drain_interval;
        let mut drain = interval_at(Instant::now() + drain_every, drain_every);
        drain.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut in_flight: FuturesUnordered<AttemptFuture> = FuturesUnordered::new();

        loop {
            self.dispatch(&mut in_flight);
            let retry_at = self.next_retry_at();

            tokio::select! {
                _ = stop.cancelled() => break,
                signal = signals.recv() => match signal {
                    Some(PipelineSignal::NetworkChanged(online)) => {
                        debug!(online, "send pipeline saw network change");
                    }
                    Some(PipelineSignal::Enqueued) => {}
                    None => break,
                },
                _ = drain.tick() => {}
                Some((key, result)) = in_flight.next(), if !in_flight.is_empty() => {
                    self.finish(key, result);
                }
                _ = sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {}
            }
        }

        if !in_flight.is_empty() {
            warn!(count = in_flight.len(), "abandoning in-flight send attempts");
        }
    }

    /// Start an attempt for every session whose queue head is eligible and
    /// has nothing on the wire.
    fn dispatch(&self, in_flight: &mut FuturesUnordered<AttemptFuture>) {
        if !self.shared.env.is_online() {
            return;
        }

        let now = Instant::now();
        let mut state = lock(&self.state);
        let PipelineState {
            queues,
            in_flight: busy,
            ..
        } = &mut *state;

        for (session_id, queue) in queues.iter_mut() {
            if busy.contains(session_id) {
                continue;
            }
            let Some(head) = queue.front_mut() else {
                continue;
            };
            if !head.is_eligible(now) {
                continue;
            }

            head.attempts = head.attempts.saturating_add(1);
            busy.insert(session_id.clone());
            debug!(
                session_id = %session_id,
                message_id = %head.message.id,
                attempt = head.attempts,
                "send attempt"
            );

            let key = AttemptKey {
                session_id: session_id.clone(),
                message_id: head.message.id.clone(),
            };
            let request = head.request.clone();
            let shared = self.shared.clone();
            in_flight.push(Box::pin(async move {
                let result = shared.helper.send(&request).await;
                (key, result)
            }));
        }
    }

    /// Earliest backoff deadline among idle queue heads, while online.
    fn next_retry_at(&self) -> Option<Instant> {
        if !self.shared.env.is_online() {
            return None;
        }
        let state = lock(&self.state);
        state
            .queues
            .iter()
            .filter(|(session_id, _)| !state.in_flight.contains(*session_id))
            .filter_map(|(_, queue)| queue.front().map(|head| head.next_attempt_at))
            .min()
    }

    fn finish(&self, key: AttemptKey, result: Result<SendResult, TransportError>) {
        let policy = &self.shared.config.send_retry;

        let mut degraded_by = None;
        let resolution = {
            let mut state = lock(&self.state);
            state.in_flight.remove(&key.session_id);

            let Some(queue) = state.queues.get_mut(&key.session_id) else {
                return;
            };
            let Some(head) = queue.front_mut().filter(|head| head.message.id == key.message_id)
            else {
                warn!(message_id = %key.message_id, "attempt finished for a message no longer queued");
                return;
            };

            let resolution = match result {
                Ok(sent) => Resolution::Delivered(sent),
                Err(error) if error.is_auth_rejection() => Resolution::Failed {
                    error,
                    auth_rejected: true,
                },
                Err(error) if !error.is_retryable() => Resolution::Failed {
                    error,
                    auth_rejected: false,
                },
                Err(error) => {
                    degraded_by = Some(error.code.clone());
                    if policy.is_exhausted(head.attempts) {
                        warn!(
                            message_id = %key.message_id,
                            attempts = head.attempts,
                            error = %error,
                            "send retries exhausted"
                        );
                        Resolution::Failed {
                            error,
                            auth_rejected: false,
                        }
                    } else {
                        let delay = policy.jittered_delay_for_attempt(
                            head.attempts,
                            error.retry_after_ms,
                            &mut rand::thread_rng(),
                        );
                        head.next_attempt_at = Instant::now() + delay;
                        debug!(
                            message_id = %key.message_id,
                            attempt = head.attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            "send failed; retry scheduled"
                        );
                        Resolution::Retry
                    }
                }
            };

            if !matches!(resolution, Resolution::Retry) {
                let entry = queue.pop_front();
                if queue.is_empty() {
                    state.queues.remove(&key.session_id);
                }
                state.retire(&key.message_id);
                if let (Resolution::Failed { .. }, Some(entry)) = (&resolution, entry) {
                    state.failed.insert(key.message_id.clone(), entry.request);
                }
            }
            resolution
        };

        if let Some(code) = degraded_by {
            self.shared.tracker.record_error(&code);
        }

        let outcome = match resolution {
            Resolution::Delivered(sent) => {
                self.shared.tracker.record_success(sent.latency);
                info!(
                    session_id = %key.session_id,
                    message_id = %key.message_id,
                    server_id = ?sent.response.message_id,
                    "message delivered"
                );
                self.poll_nudge.notify_one();
                SendOutcome::Delivered {
                    server_id: sent.response.message_id,
                    reply: sent.response.reply,
                }
            }
            Resolution::Failed {
                error,
                auth_rejected,
            } => {
                if auth_rejected {
                    self.shared.tracker.set_auth_required();
                    self.shared.emit(TransportEvent::AuthRequired);
                }
                warn!(
                    session_id = %key.session_id,
                    message_id = %key.message_id,
                    error = %error,
                    "message failed"
                );
                SendOutcome::Failed { error }
            }
            Resolution::Retry => return,
        };

        self.shared.apply_and_emit(
            &key.session_id,
            normalize_send_outcome(&key.session_id, &key.message_id, outcome),
        );
    }
}

fn lock(state: &Mutex<PipelineState>) -> MutexGuard<'_, PipelineState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use courier_core::{
        AssistantReply, ConnectionStatus, Message, MessageRole, MessageStatus,
        SendMessageResponse, TransportConfig, TransportErrorCategory,
    };
    use courier_platform::{
        BearerCredentials, CredentialProvider, HostSignals, InMemorySecretStore,
    };

    use super::*;
    use crate::testing::FakeBackend;

    struct Harness {
        backend: Arc<FakeBackend>,
        credentials: Arc<BearerCredentials<InMemorySecretStore>>,
        env: HostSignals,
        shared: Arc<TransportShared>,
        pipeline: SendPipeline,
    }

    fn harness(env: HostSignals) -> Harness {
        let backend = Arc::new(FakeBackend::default());
        let credentials = Arc::new(BearerCredentials::new(
            InMemorySecretStore::default(),
            "courier",
            "test",
        ));
        credentials.store("tok-1").expect("store token");
        let shared = Arc::new(TransportShared::new(
            TransportConfig::default(),
            backend.clone(),
            credentials.clone(),
            Arc::new(env.clone()),
        ));
        let pipeline = SendPipeline::spawn(shared.clone(), Arc::new(Notify::new()));
        Harness {
            backend,
            credentials,
            env,
            shared,
            pipeline,
        }
    }

    fn message(h: &Harness, id: &str) -> Message {
        h.shared.log().find(id).cloned().expect("message in log")
    }

    fn error(category: TransportErrorCategory, code: &str) -> TransportError {
        TransportError::new(category, code, "scripted failure")
    }

    #[tokio::test(start_paused = true)]
    async fn delivers_through_sent_to_delivered() {
        let h = harness(HostSignals::default());
        let mut events = h.shared.channels.subscribe();

        let id = h.pipeline.send_message(SendRequest::new("s1", "hello"));
        assert_eq!(message(&h, &id).status, MessageStatus::Sending);

        tokio::time::sleep(Duration::from_millis(10)).await;

        let delivered = message(&h, &id);
        assert_eq!(delivered.status, MessageStatus::Delivered);
        assert_eq!(delivered.server_id.as_deref(), Some("srv-1"));
        assert_eq!(h.pipeline.queued_count(), 0);
        assert_eq!(h.shared.tracker.consecutive_errors(), 0);

        let mut statuses = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let TransportEvent::MessageUpdated(message) = event {
                statuses.push(message.status);
            }
        }
        assert_eq!(
            statuses,
            vec![
                MessageStatus::Sending,
                MessageStatus::Sent,
                MessageStatus::Delivered
            ]
        );
        assert!(h.shared.activity.snapshot().last_message_sent.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_client_id_is_sent_once() {
        let h = harness(HostSignals::default());
        let request = SendRequest::new("s1", "hello").with_client_id("c1");

        assert_eq!(h.pipeline.send_message(request.clone()), "c1");
        assert_eq!(h.pipeline.send_message(request.clone()), "c1");
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.pipeline.send_message(request), "c1");
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(h.backend.send_calls(), 1);
        assert_eq!(h.shared.log().messages("s1").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn preserves_order_across_retryable_failure() {
        let h = harness(HostSignals::default());
        h.backend
            .push_send_error(error(TransportErrorCategory::Server, "server_error"));

        let a = h.pipeline.send_message(SendRequest::new("s1", "a"));
        let b = h.pipeline.send_message(SendRequest::new("s1", "b"));
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(h.backend.sent_bodies(), vec!["a"]);
        assert_eq!(h.pipeline.pending_ids(), vec![a.clone(), b.clone()]);
        assert_eq!(h.shared.tracker.consecutive_errors(), 1);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(h.backend.sent_bodies(), vec!["a", "a", "b"]);
        assert_eq!(message(&h, &a).status, MessageStatus::Delivered);
        assert_eq!(message(&h, &b).status, MessageStatus::Delivered);
        assert_eq!(h.shared.tracker.consecutive_errors(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn status_observers_run_after_pipeline_state_is_released() {
        let h = harness(HostSignals::default());
        h.backend
            .push_send_error(error(TransportErrorCategory::Server, "server_error"));
        let state = h.pipeline.state.clone();
        let unlocked = Arc::new(Mutex::new(Vec::new()));
        let sink = unlocked.clone();
        h.shared
            .tracker
            .subscribe(Arc::new(move |_status: &ConnectionStatus| {
                let free = state.try_lock().is_ok();
                sink.lock().expect("lock").push(free);
            }));

        h.pipeline.send_message(SendRequest::new("s1", "a"));
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(h.shared.tracker.consecutive_errors(), 1);
        let seen = unlocked.lock().expect("lock").clone();
        assert!(!seen.is_empty());
        assert!(seen.iter().all(|free| *free));
    }

    #[test]
    fn failed_payloads_evict_oldest_first() {
        let mut failed = FailedPayloads::new(2);
        failed.insert("c1".into(), SendRequest::new("s1", "one"));
        failed.insert("c2".into(), SendRequest::new("s1", "two"));
        failed.insert("c3".into(), SendRequest::new("s1", "three"));

        assert!(failed.take("c1").is_none());
        assert_eq!(failed.take("c2").map(|request| request.body), Some("two".into()));
        assert_eq!(failed.order.len(), 1);

        failed.insert("c4".into(), SendRequest::new("s1", "four"));
        assert!(failed.take("c3").is_some());
        assert!(failed.take("c4").is_some());
        assert!(failed.payloads.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sessions_do_not_block_each_other() {
        let h = harness(HostSignals::default());
        h.backend
            .push_send_error(error(TransportErrorCategory::Timeout, "request_timeout"));

        h.pipeline.send_message(SendRequest::new("s1", "first"));
        h.pipeline.send_message(SendRequest::new("s2", "second"));
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(h.backend.send_calls(), 2);
        assert_eq!(h.pipeline.queued_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_mark_failed_and_retire_id() {
        let h = harness(HostSignals::default());
        for _ in 0..5 {
            h.backend
                .push_send_error(error(TransportErrorCategory::Network, "network_unreachable"));
        }

        let request = SendRequest::new("s1", "doomed").with_client_id("c1");
        h.pipeline.send_message(request.clone());
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(h.backend.send_calls(), 5);
        let failed = message(&h, "c1");
        assert_eq!(failed.status, MessageStatus::Failed);
        assert_eq!(failed.error_code.as_deref(), Some("network_unreachable"));
        assert_eq!(h.pipeline.queued_count(), 0);

        h.pipeline.send_message(request);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.backend.send_calls(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn client_error_fails_immediately_without_degrading() {
        let h = harness(HostSignals::default());
        h.backend
            .push_send_error(error(TransportErrorCategory::Client, "bad_request"));

        let id = h.pipeline.send_message(SendRequest::new("s1", "bad"));
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(h.backend.send_calls(), 1);
        assert_eq!(message(&h, &id).status, MessageStatus::Failed);
        assert_eq!(h.shared.tracker.consecutive_errors(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_rejection_fails_message_and_discards_credential() {
        let h = harness(HostSignals::default());
        h.backend
            .push_send_error(error(TransportErrorCategory::Auth, "unauthorized"));

        let id = h.pipeline.send_message(SendRequest::new("s1", "hi"));
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(h.backend.send_calls(), 1);
        let failed = message(&h, &id);
        assert_eq!(failed.status, MessageStatus::Failed);
        assert_eq!(failed.error_code.as_deref(), Some("unauthorized"));
        assert_eq!(h.credentials.bearer_token(), None);
        assert!(h.shared.tracker.is_auth_required());
    }

    #[tokio::test(start_paused = true)]
    async fn offline_messages_wait_for_network_then_drain_once() {
        let h = harness(HostSignals::new(false, true));

        let id = h.pipeline.send_message(SendRequest::new("s1", "later"));
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(h.backend.send_calls(), 0);
        assert_eq!(h.pipeline.queued_count(), 1);
        assert_eq!(message(&h, &id).status, MessageStatus::Sending);

        h.env.set_online(true);
        h.pipeline.network_changed(true);
        tokio::time::sleep(h.shared.config.drain_interval).await;

        assert_eq!(h.backend.send_calls(), 1);
        assert_eq!(message(&h, &id).status, MessageStatus::Delivered);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_timer_picks_up_messages_without_a_signal() {
        let h = harness(HostSignals::new(false, true));

        h.pipeline.send_message(SendRequest::new("s1", "later"));
        h.env.set_online(true);
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert_eq!(h.backend.send_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn resend_uses_fresh_id_and_replaces_failed_entry() {
        let h = harness(HostSignals::default());
        h.backend
            .push_send_error(error(TransportErrorCategory::Client, "bad_request"));

        let failed_id = h.pipeline.send_message(SendRequest::new("s1", "retry me"));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(message(&h, &failed_id).status, MessageStatus::Failed);

        let fresh = h.pipeline.resend(&failed_id).expect("failed message resends");
        assert_ne!(fresh, failed_id);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(h.shared.log().find(&failed_id).is_none());
        assert_eq!(message(&h, &fresh).status, MessageStatus::Delivered);
        assert_eq!(h.backend.sent_bodies(), vec!["retry me", "retry me"]);
        assert_eq!(h.pipeline.resend(&failed_id), None);
        assert_eq!(h.pipeline.resend(&fresh), None);
    }

    #[tokio::test(start_paused = true)]
    async fn materializes_embedded_reply() {
        let h = harness(HostSignals::default());
        h.backend.push_send(Ok(SendMessageResponse {
            success: true,
            message_id: Some("m-1".into()),
            reply: Some(AssistantReply {
                content: "hello back".into(),
                role: MessageRole::Assistant,
            }),
        }));

        let id = h.pipeline.send_message(SendRequest::new("s1", "hello"));
        tokio::time::sleep(Duration::from_millis(10)).await;

        let log = h.shared.log();
        let messages = log.messages("s1");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, id);
        assert_eq!(messages[1].id, format!("{id}:reply"));
        assert_eq!(messages[1].role, MessageRole::Assistant);
        assert_eq!(messages[1].status, MessageStatus::Delivered);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_abandons_in_flight_attempt() {
        let h = harness(HostSignals::default());
        h.backend.set_latency(Duration::from_secs(5));

        let id = h.pipeline.send_message(SendRequest::new("s1", "slow"));
        tokio::time::sleep(Duration::from_secs(1)).await;
        h.pipeline.shutdown().await;
        h.pipeline.shutdown().await;
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(h.backend.send_calls(), 1);
        assert_eq!(message(&h, &id).status, MessageStatus::Sending);
    }
}
