use std::{collections::HashMap, time::Duration};

use tokio::time::Instant;

use crate::types::{CacheValidators, MessagePage};

/// Cached list-since response for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Marker the cached page was fetched with.
    pub since_id: Option<String>,
    pub page: MessagePage,
    pub validators: CacheValidators,
    stored_at: Instant,
}

/// Per-session cache of list-since responses with conditional re-fetch
/// validators.
///
/// Entries expire after a fixed TTL and are invalidated by a successful send
/// in the same session.
#[derive(Debug, Clone)]
pub struct SessionCache {
    entries: HashMap<String, CacheEntry>,
    ttl: Duration,
}

impl SessionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh entry for `session_id` fetched with the same marker.
    pub fn get(&self, session_id: &str, since_id: Option<&str>) -> Option<&CacheEntry> {
        self.entries
            .get(session_id)
            .filter(|entry| entry.since_id.as_deref() == since_id)
            .filter(|entry| entry.stored_at.elapsed() < self.ttl)
    }

    /// Validators to send with a conditional request, if a usable entry exists.
    pub fn validators_for(&self, session_id: &str, since_id: Option<&str>) -> Option<CacheValidators> {
        self.get(session_id, since_id)
            .map(|entry| entry.validators.clone())
            .filter(|validators| !validators.is_empty())
    }

    pub fn store(
        &mut self,
        session_id: impl Into<String>,
        since_id: Option<String>,
        page: MessagePage,
        validators: CacheValidators,
    ) {
        self.entries.insert(
            session_id.into(),
            CacheEntry {
                since_id,
                page,
                validators,
                stored_at: Instant::now(),
            },
        );
    }

    /// Drop the entry of a session. Returns `true` if one existed.
    pub fn invalidate(&mut self, session_id: &str) -> bool {
        self.entries.remove(session_id).is_some()
    }

    /// Drop every expired entry.
    pub fn purge_expired(&mut self) {
        let ttl = self.ttl;
        self.entries.retain(|_, entry| entry.stored_at.elapsed() < ttl);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}
