use std::collections::{HashSet, VecDeque};

/// Bounded set of message ids whose delivery outcome is final.
///
/// Once full, the oldest id is evicted first.
#[derive(Debug, Clone)]
pub struct RetainedIds {
    order: VecDeque<String>,
    members: HashSet<String>,
    capacity: usize,
}

impl RetainedIds {
    /// Create a set holding at most `capacity` ids (`capacity >= 1`).
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            members: HashSet::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.members.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Retain `id`. Returns `false` if it was already present.
    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        let id = id.into();
        if !self.members.insert(id.clone()) {
            return false;
        }
        self.order.push_back(id);
        self.trim_to_capacity();
        true
    }

    fn trim_to_capacity(&mut self) {
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.members.remove(&evicted);
            }
        }
    }
}

impl Default for RetainedIds {
    fn default() -> Self {
        Self::new(1_000)
    }
}
