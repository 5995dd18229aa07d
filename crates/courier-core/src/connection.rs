use std::{
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::time::Instant;

use crate::{
    normalization::unix_time_ms,
    types::{ConnectionState, ConnectionStatus},
};

const STATUS_CONNECTING: &str = "Connecting...";
const STATUS_CONNECTED: &str = "Connected";
const STATUS_OFFLINE: &str = "Offline - messages will be sent when the connection returns";
const STATUS_STOPPED: &str = "Disconnected";
const STATUS_AUTH_REQUIRED: &str = "Authentication required";
const STATUS_TRANSIENT: &str = "Connection interrupted, retrying...";
const STATUS_UNSTABLE: &str = "Connection unstable, retrying...";
const STATUS_FAILED: &str = "Connection failed, retrying automatically";

/// Callback invoked synchronously after every tracker mutation.
///
/// Observers run on the mutating task and must not call back into the tracker.
pub type StatusObserver = Arc<dyn Fn(&ConnectionStatus) + Send + Sync + 'static>;

/// Handle returned by [`ConnectionTracker::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Thresholds controlling promotion, status escalation and health.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerThresholds {
    /// Consecutive successes needed before `Polling` is promoted to `Connected`.
    pub promote_after: u32,
    /// Error count from which the status reads "unstable".
    pub unstable_after: u32,
    /// Error count from which the status reads "failed, retrying automatically".
    pub failed_after: u32,
    /// A `Polling` link counts as healthy if it succeeded within this window.
    pub healthy_window: Duration,
}

impl Default for TrackerThresholds {
    fn default() -> Self {
        Self {
            promote_after: 2,
            unstable_after: 3,
            failed_after: 5,
            healthy_window: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
struct TrackerState {
    state: ConnectionState,
    message: String,
    host_online: bool,
    auth_required: bool,
    consecutive_errors: u32,
    consecutive_successes: u32,
    reconnect_attempts: u32,
    latency_ms: Option<u64>,
    last_success_at: Option<Instant>,
    last_success_ms: Option<u64>,
}

impl Default for TrackerState {
    fn default() -> Self {
        Self {
            state: ConnectionState::Offline,
            message: STATUS_STOPPED.to_owned(),
            host_online: true,
            auth_required: false,
            consecutive_errors: 0,
            consecutive_successes: 0,
            reconnect_attempts: 0,
            latency_ms: None,
            last_success_at: None,
            last_success_ms: None,
        }
    }
}

/// Connection state tracker shared by the poll loop and the send pipeline.
///
/// Cloning yields another handle to the same state. Every mutation notifies
/// registered observers with a fresh [`ConnectionStatus`] snapshot.
#[derive(Clone)]
pub struct ConnectionTracker {
    inner: Arc<Mutex<TrackerState>>,
    observers: Arc<Mutex<Vec<(ObserverId, StatusObserver)>>>,
    next_observer_id: Arc<AtomicU64>,
    thresholds: TrackerThresholds,
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new(TrackerThresholds::default())
    }
}

impl std::fmt::Debug for ConnectionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionTracker")
            .field("status", &self.status())
            .field("thresholds", &self.thresholds)
            .finish()
    }
}

impl ConnectionTracker {
    pub fn new(thresholds: TrackerThresholds) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TrackerState::default())),
            observers: Arc::new(Mutex::new(Vec::new())),
            next_observer_id: Arc::new(AtomicU64::new(1)),
            thresholds,
        }
    }

    pub fn thresholds(&self) -> TrackerThresholds {
        self.thresholds
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.lock().consecutive_errors
    }

    pub fn is_auth_required(&self) -> bool {
        self.lock().auth_required
    }

    /// Current status snapshot.
    pub fn status(&self) -> ConnectionStatus {
        let state = self.lock();
        self.snapshot(&state)
    }

    /// `true` when connected, when polling with a recent success, or while
    /// fewer than `unstable_after` errors are outstanding. Never healthy while
    /// offline or waiting for re-authentication.
    pub fn is_healthy(&self) -> bool {
        let state = self.lock();
        self.healthy(&state)
    }

    /// Record a successful request and its latency.
    pub fn record_success(&self, latency: Duration) {
        let promote_after = self.thresholds.promote_after;
        self.mutate(|s| {
            s.consecutive_errors = 0;
            s.reconnect_attempts = 0;
            s.consecutive_successes = s.consecutive_successes.saturating_add(1);
            s.latency_ms = Some(latency.as_millis() as u64);
            s.last_success_at = Some(Instant::now());
            s.last_success_ms = Some(unix_time_ms());
            s.auth_required = false;
            if !s.host_online {
                s.state = ConnectionState::Offline;
                s.message = STATUS_OFFLINE.to_owned();
                return;
            }
            s.state = if s.consecutive_successes >= promote_after {
                ConnectionState::Connected
            } else {
                ConnectionState::Polling
            };
            s.message = STATUS_CONNECTED.to_owned();
        });
    }

    /// Record a failed request. The status text escalates with the error count.
    pub fn record_error(&self, reason: &str) {
        let thresholds = self.thresholds;
        self.mutate(|s| {
            s.consecutive_errors = s.consecutive_errors.saturating_add(1);
            s.consecutive_successes = 0;
            if s.auth_required {
                return;
            }
            if s.host_online {
                s.state = ConnectionState::Degraded;
            }
            let tier = if s.consecutive_errors >= thresholds.failed_after {
                STATUS_FAILED
            } else if s.consecutive_errors >= thresholds.unstable_after {
                STATUS_UNSTABLE
            } else {
                STATUS_TRANSIENT
            };
            s.message = if reason.is_empty() || s.consecutive_errors >= thresholds.failed_after {
                tier.to_owned()
            } else {
                format!("{tier} ({reason})")
            };
            if !s.host_online {
                s.message = STATUS_OFFLINE.to_owned();
            }
        });
    }

    /// Count a poll issued while errors are outstanding.
    pub fn record_reconnect_attempt(&self) {
        self.mutate(|s| {
            s.reconnect_attempts = s.reconnect_attempts.saturating_add(1);
        });
    }

    /// Host reports that the network went away.
    pub fn set_offline(&self) {
        self.mutate(|s| {
            s.host_online = false;
            s.consecutive_successes = 0;
            s.state = ConnectionState::Offline;
            s.message = STATUS_OFFLINE.to_owned();
        });
    }

    /// Host reports that the network is back.
    pub fn set_online(&self) {
        self.mutate(|s| {
            s.host_online = true;
            if s.auth_required {
                return;
            }
            if s.state == ConnectionState::Offline {
                s.state = ConnectionState::Connecting;
                s.message = STATUS_CONNECTING.to_owned();
            }
        });
    }

    /// The poll loop started and has not seen an outcome yet.
    pub fn set_connecting(&self) {
        self.mutate(|s| {
            s.auth_required = false;
            s.consecutive_successes = 0;
            if s.host_online {
                s.state = ConnectionState::Connecting;
                s.message = STATUS_CONNECTING.to_owned();
            } else {
                s.state = ConnectionState::Offline;
                s.message = STATUS_OFFLINE.to_owned();
            }
        });
    }

    /// The poll loop was stopped explicitly.
    pub fn set_stopped(&self) {
        self.mutate(|s| {
            s.consecutive_successes = 0;
            s.state = ConnectionState::Offline;
            if !s.auth_required {
                s.message = STATUS_STOPPED.to_owned();
            }
        });
    }

    /// The backend rejected the bearer credential.
    pub fn set_auth_required(&self) {
        self.mutate(|s| {
            s.auth_required = true;
            s.consecutive_successes = 0;
            s.state = ConnectionState::Offline;
            s.message = STATUS_AUTH_REQUIRED.to_owned();
        });
    }

    /// Register an observer; returns the id used to unsubscribe.
    pub fn subscribe(&self, observer: StatusObserver) -> ObserverId {
        let id = ObserverId(self.next_observer_id.fetch_add(1, Ordering::Relaxed));
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, observer));
        id
    }

    /// Remove an observer. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    fn mutate(&self, apply: impl FnOnce(&mut TrackerState)) {
        let status = {
            let mut state = self.lock();
            apply(&mut state);
            self.snapshot(&state)
        };

        let observers: Vec<StatusObserver> = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();
        for observer in observers {
            observer(&status);
        }
    }

    fn snapshot(&self, state: &TrackerState) -> ConnectionStatus {
        ConnectionStatus {
            state: state.state,
            message: state.message.clone(),
            healthy: self.healthy(state),
            latency_ms: state.latency_ms,
            reconnect_attempts: state.reconnect_attempts,
            consecutive_errors: state.consecutive_errors,
            last_success_ms: state.last_success_ms,
            auth_required: state.auth_required,
        }
    }

    fn healthy(&self, state: &TrackerState) -> bool {
        if state.auth_required || state.state == ConnectionState::Offline {
            return false;
        }

        let recent_success = state
            .last_success_at
            .is_some_and(|at| at.elapsed() <= self.thresholds.healthy_window);

        state.state == ConnectionState::Connected
            || (state.state == ConnectionState::Polling && recent_success)
            || state.consecutive_errors < self.thresholds.unstable_after
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
