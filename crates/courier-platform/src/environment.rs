use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use courier_core::ActivityKind;
use tracing::debug;

/// Callback receiving user activity reports.
pub type ActivityListener = Arc<dyn Fn(ActivityKind) + Send + Sync + 'static>;
/// Callback receiving network reachability changes (`true` = online).
pub type NetworkListener = Arc<dyn Fn(bool) + Send + Sync + 'static>;

/// Registration handle returned by listener subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Host environment signals consumed by the transport scheduling logic.
pub trait EnvironmentSignals: Send + Sync {
    fn is_online(&self) -> bool;

    fn is_page_visible(&self) -> bool;

    fn on_activity(&self, listener: ActivityListener) -> ListenerId;

    fn on_network_change(&self, listener: NetworkListener) -> ListenerId;

    fn remove_listener(&self, id: ListenerId);
}

struct HostSignalsInner {
    online: AtomicBool,
    visible: AtomicBool,
    next_id: AtomicU64,
    activity: Mutex<Vec<(ListenerId, ActivityListener)>>,
    network: Mutex<Vec<(ListenerId, NetworkListener)>>,
}

/// Signal source fed explicitly by the embedding host (UI shell, tests, CLI).
#[derive(Clone)]
pub struct HostSignals {
    inner: Arc<HostSignalsInner>,
}

impl Default for HostSignals {
    fn default() -> Self {
        Self::new(true, true)
    }
}

impl HostSignals {
    pub fn new(online: bool, visible: bool) -> Self {
        Self {
            inner: Arc::new(HostSignalsInner {
                online: AtomicBool::new(online),
                visible: AtomicBool::new(visible),
                next_id: AtomicU64::new(1),
                activity: Mutex::new(Vec::new()),
                network: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Update reachability; listeners fire only on an actual change.
    pub fn set_online(&self, online: bool) {
        let previous = self.inner.online.swap(online, Ordering::SeqCst);
        if previous == online {
            return;
        }
        debug!(online, "host network state changed");

        let listeners: Vec<NetworkListener> = self
            .inner
            .network
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(online);
        }
    }

    /// Update page visibility. Becoming visible counts as a focus change.
    pub fn set_page_visible(&self, visible: bool) {
        let previous = self.inner.visible.swap(visible, Ordering::SeqCst);
        if !previous && visible {
            self.report_activity(ActivityKind::FocusChange);
        }
    }

    pub fn report_activity(&self, kind: ActivityKind) {
        let listeners: Vec<ActivityListener> = self
            .inner
            .activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(kind);
        }
    }

    fn next_id(&self) -> ListenerId {
        ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

impl EnvironmentSignals for HostSignals {
    fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    fn is_page_visible(&self) -> bool {
        self.inner.visible.load(Ordering::SeqCst)
    }

    fn on_activity(&self, listener: ActivityListener) -> ListenerId {
        let id = self.next_id();
        self.inner
            .activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    fn on_network_change(&self, listener: NetworkListener) -> ListenerId {
        let id = self.next_id();
        self.inner
            .network
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        self.inner
            .activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(existing, _)| *existing != id);
        self.inner
            .network
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(existing, _)| *existing != id);
    }
}
