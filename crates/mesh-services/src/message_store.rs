use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use mesh_core::MessageEnvelope;

/// In-memory log of delivered messages, oldest first. Holds at most
/// `capacity` entries, older ones are dropped. A capacity of 0 keeps
/// everything.
#[derive(Clone)]
pub struct MessageStore {
    messages: Arc<Mutex<VecDeque<MessageEnvelope>>>,
    capacity: usize,
}

impl MessageStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: Arc::new(Mutex::new(VecDeque::new())),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<MessageEnvelope>> {
        self.messages.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a message
    pub fn add(&self, envelope: MessageEnvelope) {
        let mut messages = self.lock();
        if self.capacity > 0 && messages.len() == self.capacity {
            messages.pop_front();
        }
        messages.push_back(envelope);
    }

    /// All stored messages
    pub fn all(&self) -> Vec<MessageEnvelope> {
        self.lock().iter().cloned().collect()
    }

    /// Messages created after `since_ms` (unix millis)
    pub fn since(&self, since_ms: i64) -> Vec<MessageEnvelope> {
        self.lock()
            .iter()
            .filter(|m| m.timestamp.timestamp_millis() > since_ms)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new(1000)
    }
}
