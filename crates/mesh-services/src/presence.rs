//! Shared presence registry.
//!
//! A key-value store every local candidate peer can see. Keys are
//! `namespace:peer_id`, values are JSON [`PresenceRecord`](mesh_core::PresenceRecord)s.
//! Other processes write to it concurrently, so readers must cope with
//! missing or half-written values.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::RegistryError;

pub trait PresenceRegistry: Send + Sync {
    fn set(&self, key: &str, value: &str) -> Result<(), RegistryError>;

    fn get(&self, key: &str) -> Result<Option<String>, RegistryError>;

    /// All keys starting with `prefix`, in no particular order.
    fn keys(&self, prefix: &str) -> Result<Vec<String>, RegistryError>;

    /// Remove `key`. Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> Result<(), RegistryError>;
}

pub type SharedRegistry = Arc<dyn PresenceRegistry>;

/// In-process registry, shared between nodes by cloning.
#[derive(Clone, Default)]
pub struct MemoryRegistry {
    entries: Arc<DashMap<String, String>>,
    failing: Arc<AtomicBool>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn check(&self) -> Result<(), RegistryError> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(RegistryError::Unavailable("memory registry offline".to_string()));
        }
        Ok(())
    }
}

impl PresenceRegistry for MemoryRegistry {
    fn set(&self, key: &str, value: &str) -> Result<(), RegistryError> {
        self.check()?;
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>, RegistryError> {
        self.check()?;
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>, RegistryError> {
        self.check()?;
        Ok(self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect())
    }

    fn delete(&self, key: &str) -> Result<(), RegistryError> {
        self.check()?;
        self.entries.remove(key);
        Ok(())
    }
}
