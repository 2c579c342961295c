//! In-memory reference implementation of [`Store`].
//!
//! Backs the engine's test suite and doubles as executable documentation
//! of the contract: identity keys, merge policy, and replace-per-pass
//! semantics live here in their simplest form.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::store::Store;
use crate::types::{
    normalize_address, AddressRecord, Hop, Host, HostAttrs, HostId, HostType, HostnameRecord,
    OsDetected, OsGeneric, PortRecord, Scan, ScanId, ScanPatch,
};

#[derive(Default)]
struct Inner {
    scans: BTreeMap<i64, Scan>,
    scan_hosts: HashSet<(i64, HostId)>,
    hosts: HashMap<String, Host>,
    addresses: Vec<AddressRecord>,
    hostnames: Vec<HostnameRecord>,
    os_detected: Vec<OsDetected>,
    ports: Vec<PortRecord>,
    hops: Vec<Hop>,
    os_generics: Vec<OsGeneric>,
    next_os_generic_id: i64,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Inspection accessors (used by tests) ─────────────────────

    pub fn scan(&self, id: ScanId) -> Option<Scan> {
        self.lock().scans.get(&id.0).cloned()
    }

    pub fn hosts(&self) -> Vec<Host> {
        self.lock().hosts.values().cloned().collect()
    }

    pub fn host_by_address(&self, address: &str) -> Option<Host> {
        self.lock().hosts.get(&normalize_address(address)).cloned()
    }

    pub fn addresses_for(&self, host_id: HostId) -> Vec<AddressRecord> {
        self.lock()
            .addresses
            .iter()
            .filter(|r| r.host_id == host_id)
            .cloned()
            .collect()
    }

    pub fn hostnames_for(&self, host_id: HostId) -> Vec<HostnameRecord> {
        self.lock()
            .hostnames
            .iter()
            .filter(|r| r.host_id == host_id)
            .cloned()
            .collect()
    }

    pub fn os_detected_for(&self, host_id: HostId) -> Vec<OsDetected> {
        self.lock()
            .os_detected
            .iter()
            .filter(|r| r.host_id == host_id)
            .cloned()
            .collect()
    }

    pub fn ports_for(&self, host_id: HostId) -> Vec<PortRecord> {
        self.lock()
            .ports
            .iter()
            .filter(|r| r.host_id == host_id)
            .cloned()
            .collect()
    }

    pub fn hops_for_scan(&self, scan_id: ScanId) -> Vec<Hop> {
        self.lock()
            .hops
            .iter()
            .filter(|h| h.scan_id == scan_id)
            .cloned()
            .collect()
    }

    pub fn attached_hosts(&self, scan_id: ScanId) -> Vec<HostId> {
        self.lock()
            .scan_hosts
            .iter()
            .filter(|(sid, _)| *sid == scan_id.0)
            .map(|(_, hid)| *hid)
            .collect()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn last_scan_id(&self) -> Result<Option<i64>, StoreError> {
        Ok(self.lock().scans.keys().next_back().copied())
    }

    async fn create_scan(&self, scan: &Scan) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if inner.scans.contains_key(&scan.id.0) {
            return Err(StoreError::Backend(format!(
                "scan {} already exists",
                scan.id
            )));
        }
        inner.scans.insert(scan.id.0, scan.clone());
        Ok(())
    }

    async fn find_scan(&self, id: ScanId) -> Result<Option<Scan>, StoreError> {
        Ok(self.lock().scans.get(&id.0).cloned())
    }

    async fn update_scan(&self, id: ScanId, patch: ScanPatch) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let scan = inner
            .scans
            .get_mut(&id.0)
            .ok_or_else(|| StoreError::Backend(format!("scan {id} not found")))?;
        if let Some(state) = patch.state {
            scan.state = state;
        }
        if let Some(end) = patch.end {
            scan.end = Some(end);
        }
        if let Some(total) = patch.total_discovered {
            scan.total_discovered = total;
        }
        Ok(())
    }

    async fn find_or_create_host(
        &self,
        address: &str,
        attrs: HostAttrs,
    ) -> Result<Host, StoreError> {
        let key = normalize_address(address);
        let mut inner = self.lock();
        if let Some(host) = inner.hosts.get_mut(&key) {
            if let Some(state) = attrs.state {
                host.state = state;
            }
            if let Some(start) = attrs.start {
                host.start = Some(start);
            }
            if let Some(end) = attrs.end {
                host.end = Some(end);
            }
            // Type hints only upgrade the default classification.
            if let Some(host_type) = attrs.host_type {
                if host.host_type == HostType::Node {
                    host.host_type = host_type;
                }
            }
            return Ok(host.clone());
        }
        let host = Host {
            id: HostId::from_address(&key),
            address: key.clone(),
            state: attrs.state.unwrap_or_default(),
            host_type: attrs.host_type.unwrap_or_default(),
            start: attrs.start,
            end: attrs.end,
            os_generic_id: None,
        };
        inner.hosts.insert(key, host.clone());
        Ok(host)
    }

    async fn set_host_type(&self, id: HostId, host_type: HostType) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let host = inner
            .hosts
            .values_mut()
            .find(|h| h.id == id)
            .ok_or_else(|| StoreError::Backend(format!("host {id} not found")))?;
        host.host_type = host_type;
        Ok(())
    }

    async fn set_host_os_generic(
        &self,
        id: HostId,
        os_generic_id: i64,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let host = inner
            .hosts
            .values_mut()
            .find(|h| h.id == id)
            .ok_or_else(|| StoreError::Backend(format!("host {id} not found")))?;
        if host.os_generic_id.is_none() {
            host.os_generic_id = Some(os_generic_id);
        }
        Ok(())
    }

    async fn find_or_create_address(&self, record: &AddressRecord) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let exists = inner.addresses.iter().any(|r| {
            r.host_id == record.host_id
                && r.address == record.address
                && r.addr_type == record.addr_type
        });
        if !exists {
            inner.addresses.push(record.clone());
        }
        Ok(())
    }

    async fn find_or_create_hostname(&self, record: &HostnameRecord) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let exists = inner.hostnames.iter().any(|r| {
            r.host_id == record.host_id
                && r.name == record.name
                && r.name_type == record.name_type
        });
        if !exists {
            inner.hostnames.push(record.clone());
        }
        Ok(())
    }

    async fn clear_os_detected(&self, host_id: HostId) -> Result<(), StoreError> {
        self.lock().os_detected.retain(|r| r.host_id != host_id);
        Ok(())
    }

    async fn create_os_detected(&self, record: &OsDetected) -> Result<(), StoreError> {
        self.lock().os_detected.push(record.clone());
        Ok(())
    }

    async fn clear_ports(&self, host_id: HostId) -> Result<(), StoreError> {
        self.lock().ports.retain(|r| r.host_id != host_id);
        Ok(())
    }

    async fn create_port(&self, record: &PortRecord) -> Result<(), StoreError> {
        self.lock().ports.push(record.clone());
        Ok(())
    }

    async fn find_or_create_hop(
        &self,
        first: HostId,
        second: HostId,
        scan_id: ScanId,
        rtt: f64,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let exists = inner.hops.iter().any(|h| {
            h.first_host_id == first && h.second_host_id == second && h.scan_id == scan_id
        });
        if !exists {
            inner.hops.push(Hop {
                first_host_id: first,
                second_host_id: second,
                scan_id,
                rtt,
            });
        }
        Ok(())
    }

    async fn attach_host(&self, scan_id: ScanId, host_id: HostId) -> Result<(), StoreError> {
        self.lock().scan_hosts.insert((scan_id.0, host_id));
        Ok(())
    }

    async fn find_os_generic(&self, family: &str) -> Result<Option<OsGeneric>, StoreError> {
        let needle = family.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(None);
        }
        Ok(self
            .lock()
            .os_generics
            .iter()
            .find(|g| g.family.to_lowercase().contains(&needle))
            .cloned())
    }

    async fn create_os_generic(&self, family: &str, name: &str) -> Result<i64, StoreError> {
        let mut inner = self.lock();
        inner.next_os_generic_id += 1;
        let id = inner.next_os_generic_id;
        inner.os_generics.push(OsGeneric {
            id,
            family: family.to_string(),
            name: name.to_string(),
        });
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HostState;

    #[tokio::test]
    async fn find_or_create_host_is_idempotent() {
        let store = MemoryStore::new();
        let a = store
            .find_or_create_host("10.0.0.1", HostAttrs::default())
            .await
            .unwrap();
        let b = store
            .find_or_create_host("10.0.0.1", HostAttrs::default())
            .await
            .unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(store.hosts().len(), 1);
    }

    #[tokio::test]
    async fn type_hint_never_downgrades() {
        let store = MemoryStore::new();
        let host = store
            .find_or_create_host("10.0.0.1", HostAttrs::typed(HostType::Router))
            .await
            .unwrap();
        assert_eq!(host.host_type, HostType::Router);

        let host = store
            .find_or_create_host("10.0.0.1", HostAttrs::typed(HostType::Node))
            .await
            .unwrap();
        assert_eq!(host.host_type, HostType::Router);
    }

    #[tokio::test]
    async fn state_refreshes_on_match() {
        let store = MemoryStore::new();
        store
            .find_or_create_host("10.0.0.1", HostAttrs::default().with_state(HostState::Down))
            .await
            .unwrap();
        let host = store
            .find_or_create_host("10.0.0.1", HostAttrs::default().with_state(HostState::Up))
            .await
            .unwrap();
        assert_eq!(host.state, HostState::Up);
    }

    #[tokio::test]
    async fn os_generic_reference_is_set_once() {
        let store = MemoryStore::new();
        let linux = store.create_os_generic("linux", "Linux").await.unwrap();
        let windows = store.create_os_generic("windows", "Windows").await.unwrap();

        let host = store
            .find_or_create_host("10.0.0.1", HostAttrs::default())
            .await
            .unwrap();
        store.set_host_os_generic(host.id, linux).await.unwrap();
        store.set_host_os_generic(host.id, windows).await.unwrap();

        let host = store.host_by_address("10.0.0.1").unwrap();
        assert_eq!(host.os_generic_id, Some(linux));
    }

    #[tokio::test]
    async fn os_generic_lookup_is_case_insensitive_substring() {
        let store = MemoryStore::new();
        store
            .create_os_generic("embedded linux", "Linux")
            .await
            .unwrap();
        assert!(store.find_os_generic("Linux").await.unwrap().is_some());
        assert!(store.find_os_generic("LINUX").await.unwrap().is_some());
        assert!(store.find_os_generic("bsd").await.unwrap().is_none());
        assert!(store.find_os_generic("").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn hop_rtt_is_not_overwritten() {
        let store = MemoryStore::new();
        let a = store
            .find_or_create_host("10.0.0.1", HostAttrs::default())
            .await
            .unwrap();
        let b = store
            .find_or_create_host("10.0.0.2", HostAttrs::default())
            .await
            .unwrap();

        store
            .find_or_create_hop(a.id, b.id, ScanId(1), 1.5)
            .await
            .unwrap();
        store
            .find_or_create_hop(a.id, b.id, ScanId(1), 9.9)
            .await
            .unwrap();

        let hops = store.hops_for_scan(ScanId(1));
        assert_eq!(hops.len(), 1);
        assert_eq!(hops[0].rtt, 1.5);
    }

    #[tokio::test]
    async fn last_scan_id_tracks_the_highest_row() {
        let store = MemoryStore::new();
        assert_eq!(store.last_scan_id().await.unwrap(), None);

        let scan = Scan {
            id: ScanId(4),
            ranges: vec!["10.0.0.0/24".to_string()],
            port_scan: true,
            os_detection: true,
            start: chrono::Utc::now(),
            end: None,
            total_discovered: 0,
            state: crate::types::ScanState::Pending,
            user_id: 1,
        };
        store.create_scan(&scan).await.unwrap();
        assert_eq!(store.last_scan_id().await.unwrap(), Some(4));
    }
}
