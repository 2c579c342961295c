//! The persistence collaborator contract.
//!
//! The engine only ever talks to a [`Store`]; backends decide how rows
//! are kept. All find-or-create operations are keyed by natural identity
//! (normalized address, `(host, address, type)`, `(first, second, scan)`),
//! not by backend-assigned ids, so repeating a pass upserts instead of
//! duplicating.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::{
    AddressRecord, Host, HostAttrs, HostId, HostType, HostnameRecord, OsDetected, OsGeneric,
    PortRecord, Scan, ScanId, ScanPatch,
};

#[async_trait]
pub trait Store: Send + Sync {
    /// Highest persisted scan id, or `None` when no scan exists yet.
    async fn last_scan_id(&self) -> Result<Option<i64>, StoreError>;

    async fn create_scan(&self, scan: &Scan) -> Result<(), StoreError>;

    async fn find_scan(&self, id: ScanId) -> Result<Option<Scan>, StoreError>;

    async fn update_scan(&self, id: ScanId, patch: ScanPatch) -> Result<(), StoreError>;

    /// Find a host by normalized address or create it.
    ///
    /// On match, `attrs.state`/`start`/`end` refresh the row when present;
    /// `attrs.host_type` only replaces the default `Node` classification.
    async fn find_or_create_host(
        &self,
        address: &str,
        attrs: HostAttrs,
    ) -> Result<Host, StoreError>;

    /// Unconditional type promotion (OS router match, switch device port).
    async fn set_host_type(&self, id: HostId, host_type: HostType) -> Result<(), StoreError>;

    /// Set the generic OS back-reference. A value already present wins;
    /// this call is then a no-op.
    async fn set_host_os_generic(&self, id: HostId, os_generic_id: i64)
        -> Result<(), StoreError>;

    async fn find_or_create_address(&self, record: &AddressRecord) -> Result<(), StoreError>;

    async fn find_or_create_hostname(&self, record: &HostnameRecord) -> Result<(), StoreError>;

    /// Drop all OS matches recorded for a host (replace-per-pass).
    async fn clear_os_detected(&self, host_id: HostId) -> Result<(), StoreError>;

    async fn create_os_detected(&self, record: &OsDetected) -> Result<(), StoreError>;

    /// Drop all ports recorded for a host (replace-per-pass).
    async fn clear_ports(&self, host_id: HostId) -> Result<(), StoreError>;

    async fn create_port(&self, record: &PortRecord) -> Result<(), StoreError>;

    /// Create the hop `(first, second, scan)` unless it already exists.
    /// The rtt of an existing hop is left untouched.
    async fn find_or_create_hop(
        &self,
        first: HostId,
        second: HostId,
        scan_id: ScanId,
        rtt: f64,
    ) -> Result<(), StoreError>;

    /// Record that a host was observed in a scan. Append-only per scan.
    async fn attach_host(&self, scan_id: ScanId, host_id: HostId) -> Result<(), StoreError>;

    /// Case-insensitive substring lookup against the OS classification
    /// table, e.g. family `"Linux"` matches a row with family `"linux"`.
    async fn find_os_generic(&self, family: &str) -> Result<Option<OsGeneric>, StoreError>;

    async fn create_os_generic(&self, family: &str, name: &str) -> Result<i64, StoreError>;
}
