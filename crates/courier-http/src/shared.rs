use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use courier_core::{
    ActivityTracker, ChatBackend, ConnectionTracker, LogOp, MessageLog, TransportChannels,
    TransportConfig, TransportEvent,
};
use courier_platform::{CredentialProvider, EnvironmentSignals};
use tracing::warn;

use crate::request::RequestHelper;

/// State shared by the poll loop, the send pipeline and the facade.
pub(crate) struct TransportShared {
    pub(crate) config: TransportConfig,
    pub(crate) helper: RequestHelper,
    pub(crate) tracker: ConnectionTracker,
    pub(crate) activity: ActivityTracker,
    pub(crate) env: Arc<dyn EnvironmentSignals>,
    pub(crate) channels: TransportChannels,
    log: Mutex<MessageLog>,
}

impl TransportShared {
    pub(crate) fn new(
        config: TransportConfig,
        backend: Arc<dyn ChatBackend>,
        credentials: Arc<dyn CredentialProvider>,
        env: Arc<dyn EnvironmentSignals>,
    ) -> Self {
        let helper = RequestHelper::new(
            backend,
            credentials,
            config.cache_ttl,
            config.request_timeout,
        );
        Self {
            helper,
            tracker: ConnectionTracker::new(config.tracker),
            activity: ActivityTracker::new(),
            env,
            channels: TransportChannels::new(config.event_buffer),
            log: Mutex::new(MessageLog::new(config.message_log_max_items)),
            config,
        }
    }

    pub(crate) fn log(&self) -> MutexGuard<'_, MessageLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn emit(&self, event: TransportEvent) {
        self.channels.emit(event);
    }

    /// Apply log operations one by one and emit the resulting message
    /// updates after the log lock is released.
    pub(crate) fn apply_and_emit(&self, session_id: &str, ops: Vec<LogOp>) {
        let mut events = Vec::with_capacity(ops.len());
        {
            let mut log = self.log();
            for op in ops {
                if let Err(err) = log.apply_ops(session_id, std::slice::from_ref(&op)) {
                    warn!(session_id, error = %err, "dropping message log update");
                    continue;
                }
                match op {
                    LogOp::Upsert(message) => events.push(TransportEvent::MessageUpdated(message)),
                    LogOp::UpdateStatus { id, .. } => {
                        if let Some(message) = log.get(session_id, &id) {
                            events.push(TransportEvent::MessageUpdated(message.clone()));
                        }
                    }
                    LogOp::Remove { id } => events.push(TransportEvent::MessageRemoved {
                        session_id: session_id.to_owned(),
                        id,
                    }),
                }
            }
        }

        for event in events {
            self.emit(event);
        }
    }
}
