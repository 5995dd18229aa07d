use std::sync::{Arc, Mutex, PoisonError};

use tokio::time::Instant;

use crate::types::ActivityKind;

/// Most recent instant of each activity kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActivitySnapshot {
    pub last_keystroke: Option<Instant>,
    pub last_pointer_move: Option<Instant>,
    pub last_message_sent: Option<Instant>,
    pub last_focus_change: Option<Instant>,
}

impl ActivitySnapshot {
    /// Latest instant across every kind.
    pub fn last_any(&self) -> Option<Instant> {
        [
            self.last_keystroke,
            self.last_pointer_move,
            self.last_message_sent,
            self.last_focus_change,
        ]
        .into_iter()
        .flatten()
        .max()
    }
}

/// Ephemeral activity timestamps used for poll cadence. Never persisted.
#[derive(Debug, Clone, Default)]
pub struct ActivityTracker {
    inner: Arc<Mutex<ActivitySnapshot>>,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, kind: ActivityKind) {
        self.record_at(kind, Instant::now());
    }

    pub fn record_at(&self, kind: ActivityKind, at: Instant) {
        let mut snapshot = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = match kind {
            ActivityKind::Keystroke => &mut snapshot.last_keystroke,
            ActivityKind::PointerMove => &mut snapshot.last_pointer_move,
            ActivityKind::MessageSent => &mut snapshot.last_message_sent,
            ActivityKind::FocusChange => &mut snapshot.last_focus_change,
        };
        if slot.is_none_or(|previous| previous < at) {
            *slot = Some(at);
        }
    }

    pub fn snapshot(&self) -> ActivitySnapshot {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
