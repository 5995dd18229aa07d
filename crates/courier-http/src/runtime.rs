use std::sync::{Arc, Mutex, PoisonError};

use courier_core::{
    ChatBackend, ConnectionStatus, EventStream, Message, ObserverId, SendRequest, StatusObserver,
    TransportConfig, TransportError, TransportErrorCategory, TransportEvent,
};
use courier_platform::{CredentialProvider, EnvironmentSignals, ListenerId};
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::{http::HttpChatBackend, poller::Poller, sender::SendPipeline, shared::TransportShared};

/// The client transport: connection tracker, poll loop and send pipeline
/// wired to one backend, one credential source and one host environment.
///
/// Construct within a tokio runtime; the send pipeline worker is spawned
/// immediately.
pub struct Transport {
    shared: Arc<TransportShared>,
    poller: Poller,
    pipeline: Arc<SendPipeline>,
    listeners: Mutex<Vec<ListenerId>>,
    bridge_observer: ObserverId,
}

impl Transport {
    pub fn new(
        config: TransportConfig,
        backend: Arc<dyn ChatBackend>,
        credentials: Arc<dyn CredentialProvider>,
        env: Arc<dyn EnvironmentSignals>,
    ) -> Self {
        let shared = Arc::new(TransportShared::new(
            config,
            backend,
            credentials,
            env.clone(),
        ));
        let nudge = Arc::new(Notify::new());
        let poller = Poller::new(shared.clone(), nudge.clone());
        let pipeline = Arc::new(SendPipeline::spawn(shared.clone(), nudge.clone()));

        let channels = shared.channels.clone();
        let bridge_observer =
            shared
                .tracker
                .subscribe(Arc::new(move |status: &ConnectionStatus| {
                    channels.emit(TransportEvent::StatusChanged(status.clone()));
                }));

        let activity = shared.activity.clone();
        let activity_listener = env.on_activity(Arc::new(move |kind| activity.record(kind)));

        let tracker = shared.tracker.clone();
        let network_pipeline = Arc::downgrade(&pipeline);
        let network_nudge = nudge.clone();
        let network_listener = env.on_network_change(Arc::new(move |online| {
            if online {
                info!("network restored");
                tracker.set_online();
                network_nudge.notify_one();
            } else {
                info!("network lost");
                tracker.set_offline();
            }
            if let Some(pipeline) = network_pipeline.upgrade() {
                pipeline.network_changed(online);
            }
        }));

        if !env.is_online() {
            shared.tracker.set_offline();
        }

        Self {
            shared,
            poller,
            pipeline,
            listeners: Mutex::new(vec![activity_listener, network_listener]),
            bridge_observer,
        }
    }

    /// Transport over the JSON/HTTP backend at `config.base_url`.
    pub fn http(
        config: TransportConfig,
        credentials: Arc<dyn CredentialProvider>,
        env: Arc<dyn EnvironmentSignals>,
    ) -> Result<Self, TransportError> {
        let base_url = config.base_url.clone().ok_or_else(|| {
            TransportError::new(
                TransportErrorCategory::Client,
                "missing_base_url",
                "COURIER_BASE_URL is not configured",
            )
        })?;
        let backend = HttpChatBackend::new(&base_url, config.request_timeout)?;
        Ok(Self::new(config, Arc::new(backend), credentials, env))
    }

    pub fn config(&self) -> &TransportConfig {
        &self.shared.config
    }

    /// Start polling `session_id`. Idempotent; restarts after an
    /// authentication rejection.
    pub async fn start(&self, session_id: &str) {
        self.poller.start(session_id).await;
    }

    /// Stop polling. Idempotent.
    pub async fn stop(&self) {
        self.poller.stop().await;
    }

    pub async fn is_polling(&self) -> bool {
        self.poller.is_running().await
    }

    /// Submit a message; see [`SendPipeline::send_message`].
    pub fn send_message(&self, request: SendRequest) -> String {
        self.pipeline.send_message(request)
    }

    /// Re-submit a failed message under a fresh id.
    pub fn resend(&self, failed_id: &str) -> Option<String> {
        self.pipeline.resend(failed_id)
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.tracker.status()
    }

    pub fn is_healthy(&self) -> bool {
        self.shared.tracker.is_healthy()
    }

    /// Subscribe to transport events.
    pub fn subscribe(&self) -> EventStream {
        self.shared.channels.subscribe()
    }

    /// Register a synchronous status observer.
    pub fn observe_status(&self, observer: StatusObserver) -> ObserverId {
        self.shared.tracker.subscribe(observer)
    }

    pub fn unobserve_status(&self, id: ObserverId) -> bool {
        self.shared.tracker.unsubscribe(id)
    }

    /// Messages of a session in display order.
    pub fn messages(&self, session_id: &str) -> Vec<Message> {
        self.shared.log().messages(session_id).to_vec()
    }

    pub fn queued_count(&self) -> usize {
        self.pipeline.queued_count()
    }

    pub fn pending_ids(&self) -> Vec<String> {
        self.pipeline.pending_ids()
    }

    /// Stop polling and the send pipeline, and detach from the environment.
    /// Pending timers and in-flight requests are cancelled.
    pub async fn shutdown(&self) {
        self.poller.stop().await;
        self.pipeline.shutdown().await;

        let listeners: Vec<ListenerId> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for id in listeners {
            self.shared.env.remove_listener(id);
        }
        self.shared.tracker.unsubscribe(self.bridge_observer);
        debug!("transport shut down");
    }
}
