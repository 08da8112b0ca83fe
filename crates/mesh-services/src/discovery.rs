//! Presence discovery: advertise, scan and sweep.
//!
//! Three independent loops over the shared registry:
//! - advertise rewrites our own record so it never ages past the TTL
//! - scan reports fresh records we have not seen yet to the node
//! - sweep deletes anyone's record once it is older than the TTL
//!
//! Registry failures skip the current cycle; the next tick retries.

use std::collections::HashSet;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use mesh_core::config::DiscoveryConfig;
use mesh_core::presence::{key_prefix, now_ms, presence_key};
use mesh_core::{PeerId, PresenceRecord};

use crate::error::RegistryError;
use crate::node::NodeHandle;
use crate::presence::SharedRegistry;

#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    pub namespace: String,
    pub ttl: Duration,
    pub advertise_interval: Duration,
    pub scan_interval: Duration,
    pub sweep_interval: Duration,
    pub capabilities: Vec<String>,
    /// Transport address published in our record.
    pub addr: Option<String>,
}

impl DiscoverySettings {
    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self {
            namespace: config.namespace.clone(),
            ttl: config.ttl(),
            advertise_interval: config.advertise_interval(),
            scan_interval: config.scan_interval(),
            sweep_interval: config.sweep_interval(),
            capabilities: config.capabilities.clone(),
            addr: None,
        }
    }
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self::from_config(&DiscoveryConfig::default())
    }
}

pub struct Discovery {
    registry: SharedRegistry,
    settings: DiscoverySettings,
    local: PeerId,
    /// Peers already reported. Forgotten when their record goes away.
    known: HashSet<PeerId>,
}

impl Discovery {
    pub fn new(registry: SharedRegistry, settings: DiscoverySettings, local: PeerId) -> Self {
        Self {
            registry,
            settings,
            local,
            known: HashSet::new(),
        }
    }

    fn own_key(&self) -> String {
        presence_key(&self.settings.namespace, &self.local)
    }

    /// Write a fresh record for ourselves stamped `now`.
    pub fn advertise_at(&self, now: u64) -> Result<(), RegistryError> {
        let record = PresenceRecord::new(
            self.local.clone(),
            now,
            self.settings.capabilities.clone(),
            self.settings.addr.clone(),
        );
        let json = record
            .to_json()
            .map_err(|e| RegistryError::Unavailable(format!("encode presence: {e}")))?;
        self.registry.set(&self.own_key(), &json)
    }

    /// Fresh, foreign peers not reported before, sorted.
    pub fn scan_at(&mut self, now: u64) -> Result<Vec<PeerId>, RegistryError> {
        let prefix = key_prefix(&self.settings.namespace);
        let mut live = HashSet::new();

        for key in self.registry.keys(&prefix)? {
            let Some(text) = self.registry.get(&key)? else {
                continue;
            };
            let Some(record) = PresenceRecord::parse(&text) else {
                debug!(key = %key, "ignoring malformed presence record");
                continue;
            };
            if record.peer_id == self.local || record.is_stale(now, self.settings.ttl) {
                continue;
            }
            live.insert(record.peer_id);
        }

        self.known.retain(|peer| live.contains(peer));
        let mut fresh: Vec<PeerId> = live
            .into_iter()
            .filter(|peer| self.known.insert(peer.clone()))
            .collect();
        fresh.sort();
        Ok(fresh)
    }

    /// Delete every parseable record older than the TTL. Malformed values
    /// may be a writer mid-update, so they are left alone.
    pub fn sweep_at(&self, now: u64) -> Result<usize, RegistryError> {
        let prefix = key_prefix(&self.settings.namespace);
        let mut removed = 0;
        for key in self.registry.keys(&prefix)? {
            let Some(record) = self
                .registry
                .get(&key)?
                .and_then(|text| PresenceRecord::parse(&text))
            else {
                continue;
            };
            if record.is_stale(now, self.settings.ttl) {
                self.registry.delete(&key)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Remove our own record.
    pub fn withdraw(&self) -> Result<(), RegistryError> {
        self.registry.delete(&self.own_key())
    }

    pub fn is_known(&self, peer: &PeerId) -> bool {
        self.known.contains(peer)
    }

    /// Drive the three loops until `stop` fires, then withdraw.
    pub async fn run(mut self, node: NodeHandle, mut stop: broadcast::Receiver<()>) {
        let mut advertise = tokio::time::interval(self.settings.advertise_interval);
        let mut scan = tokio::time::interval(self.settings.scan_interval);
        let mut sweep = tokio::time::interval(self.settings.sweep_interval);

        info!(
            namespace = %self.settings.namespace,
            ttl_secs = self.settings.ttl.as_secs(),
            "discovery started"
        );

        loop {
            tokio::select! {
                _ = stop.recv() => break,

                _ = advertise.tick() => {
                    if let Err(e) = self.advertise_at(now_ms()) {
                        warn!(error = %e, "advertise skipped");
                    }
                }

                _ = scan.tick() => {
                    match self.scan_at(now_ms()) {
                        Ok(peers) => {
                            for peer in peers {
                                info!(peer = %peer.short(), "peer discovered");
                                node.peer_discovered(peer);
                            }
                        }
                        Err(e) => warn!(error = %e, "scan skipped"),
                    }
                }

                _ = sweep.tick() => {
                    match self.sweep_at(now_ms()) {
                        Ok(0) => {}
                        Ok(n) => debug!(removed = n, "swept stale presence records"),
                        Err(e) => warn!(error = %e, "sweep skipped"),
                    }
                }
            }
        }

        match self.withdraw() {
            Ok(()) => info!("presence withdrawn"),
            Err(e) => warn!(error = %e, "failed to withdraw presence"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::{MemoryRegistry, PresenceRegistry};
    use std::sync::Arc;

    const NS: &str = "test-mesh";

    fn settings(ttl_secs: u64) -> DiscoverySettings {
        DiscoverySettings {
            namespace: NS.to_string(),
            ttl: Duration::from_secs(ttl_secs),
            advertise_interval: Duration::from_secs(20),
            scan_interval: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(10),
            capabilities: vec!["messaging".to_string()],
            addr: None,
        }
    }

    fn node(reg: &MemoryRegistry, id: &str, ttl_secs: u64) -> Discovery {
        Discovery::new(Arc::new(reg.clone()), settings(ttl_secs), PeerId::from(id))
    }

    const SEC: u64 = 1000;

    #[test]
    fn scan_reports_each_peer_once_and_skips_self() {
        let reg = MemoryRegistry::new();
        let a = node(&reg, "a", 60);
        let mut b = node(&reg, "b", 60);
        a.advertise_at(0).unwrap();
        b.advertise_at(0).unwrap();

        assert_eq!(b.scan_at(SEC).unwrap(), vec![PeerId::from("a")]);
        assert!(b.scan_at(2 * SEC).unwrap().is_empty());
        assert!(b.is_known(&PeerId::from("a")));
    }

    #[test]
    fn record_survives_to_fifty_and_is_gone_by_seventy() {
        let reg = MemoryRegistry::new();
        let a = node(&reg, "a", 60);
        let mut b = node(&reg, "b", 60);
        a.advertise_at(0).unwrap();

        assert_eq!(b.scan_at(50 * SEC).unwrap(), vec![PeerId::from("a")]);

        // sweeps at 10 s intervals
        for t in (10..=70).step_by(10) {
            b.sweep_at(t * SEC).unwrap();
        }
        assert!(reg.get(&presence_key(NS, &PeerId::from("a"))).unwrap().is_none());
        assert!(b.scan_at(70 * SEC).unwrap().is_empty());
        assert!(!b.is_known(&PeerId::from("a")));
    }

    #[test]
    fn stale_record_is_ignored_by_scan() {
        let reg = MemoryRegistry::new();
        let a = node(&reg, "a", 60);
        let mut b = node(&reg, "b", 60);
        a.advertise_at(0).unwrap();

        assert!(b.scan_at(60 * SEC + 1).unwrap().is_empty());
        // exactly at the TTL the record still counts
        assert_eq!(b.scan_at(60 * SEC).unwrap(), vec![PeerId::from("a")]);
    }

    #[test]
    fn returning_peer_is_reported_again() {
        let reg = MemoryRegistry::new();
        let a = node(&reg, "a", 60);
        let mut b = node(&reg, "b", 60);
        a.advertise_at(0).unwrap();
        assert_eq!(b.scan_at(SEC).unwrap().len(), 1);

        a.withdraw().unwrap();
        assert!(b.scan_at(2 * SEC).unwrap().is_empty());

        a.advertise_at(3 * SEC).unwrap();
        assert_eq!(b.scan_at(4 * SEC).unwrap(), vec![PeerId::from("a")]);
    }

    #[test]
    fn malformed_entries_are_treated_as_absent() {
        let reg = MemoryRegistry::new();
        reg.set(&format!("{NS}:junk"), "{not json").unwrap();
        reg.set(&format!("{NS}:half"), r#"{"peerId":"h""#).unwrap();
        let a = node(&reg, "a", 60);
        let mut b = node(&reg, "b", 60);
        a.advertise_at(0).unwrap();

        assert_eq!(b.scan_at(SEC).unwrap(), vec![PeerId::from("a")]);
        assert_eq!(b.sweep_at(100 * SEC).unwrap(), 1);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn other_namespaces_are_invisible() {
        let reg = MemoryRegistry::new();
        let record = PresenceRecord::new(PeerId::from("x"), 0, vec![], None);
        reg.set("elsewhere:x", &record.to_json().unwrap()).unwrap();
        let mut b = node(&reg, "b", 60);
        assert!(b.scan_at(SEC).unwrap().is_empty());
    }

    #[test]
    fn withdraw_removes_own_record() {
        let reg = MemoryRegistry::new();
        let a = node(&reg, "a", 60);
        a.advertise_at(0).unwrap();
        assert_eq!(reg.len(), 1);
        a.withdraw().unwrap();
        assert!(reg.is_empty());
    }

    #[test]
    fn registry_outage_surfaces_as_error() {
        let reg = MemoryRegistry::new();
        let mut b = node(&reg, "b", 60);
        reg.set_failing(true);
        assert!(b.scan_at(0).is_err());
        assert!(b.sweep_at(0).is_err());
        assert!(b.advertise_at(0).is_err());
    }
}
