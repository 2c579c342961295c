//! Domain types for the reconstructed network topology graph.
//!
//! Host identity is address-based: every host carries a [`HostId`] derived
//! deterministically from its normalized address, so find-or-create against
//! any backend is idempotent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for address-derived host ids.
const NTM_NS: Uuid = Uuid::from_bytes([
    0x2f, 0x1c, 0x5a, 0x90, 0x4e, 0x7b, 0x4d, 0x21, 0x9a, 0x03, 0x6d, 0x8e, 0x41, 0xb2, 0x7c, 0x55,
]);

/// Normalize an address into its canonical string key.
///
/// IP addresses are reformatted through `IpAddr` so equivalent spellings
/// collapse to one key; anything else (MAC addresses, subnet labels) is
/// trimmed and lowercased.
pub fn normalize_address(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.parse::<std::net::IpAddr>() {
        Ok(ip) => ip.to_string(),
        Err(_) => trimmed.to_ascii_lowercase(),
    }
}

// ── Identifiers ───────────────────────────────────────────────────

/// Monotonic scan identifier, assigned by the lifecycle controller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScanId(pub i64);

impl std::fmt::Display for ScanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Host identifier, derived from the normalized address.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct HostId(pub Uuid);

impl HostId {
    /// Deterministic id for an address: same address, same id, any backend.
    pub fn from_address(address: &str) -> Self {
        Self(Uuid::new_v5(&NTM_NS, normalize_address(address).as_bytes()))
    }
}

impl std::fmt::Display for HostId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

// ── Enums ─────────────────────────────────────────────────────────

/// Lifecycle state of a scan run.
///
/// `Done`, `Fatal` and `FatalStoring` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    Pending,
    Running,
    Storing,
    Done,
    Fatal,
    FatalStoring,
}

impl ScanState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Storing => "storing",
            Self::Done => "done",
            Self::Fatal => "fatal",
            Self::FatalStoring => "fatal_storing",
        }
    }
}

impl std::str::FromStr for ScanState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "storing" => Ok(Self::Storing),
            "done" => Ok(Self::Done),
            "fatal" => Ok(Self::Fatal),
            "fatal_storing" => Ok(Self::FatalStoring),
            other => Err(format!("unknown scan state: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HostState {
    Up,
    #[default]
    Down,
}

impl HostState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

impl std::str::FromStr for HostState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down),
            other => Err(format!("unknown host state: {other}")),
        }
    }
}

/// Classification of a host in the topology.
///
/// `Node` is the default; `Router` and `Switch` are stronger
/// classifications inferred during reconstruction.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HostType {
    #[default]
    Node,
    Router,
    Switch,
}

impl HostType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Router => "router",
            Self::Switch => "switch",
        }
    }
}

impl std::str::FromStr for HostType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "node" => Ok(Self::Node),
            "router" => Ok(Self::Router),
            "switch" => Ok(Self::Switch),
            other => Err(format!("unknown host type: {other}")),
        }
    }
}

// ── Entities ──────────────────────────────────────────────────────

/// One discovery run and its recorded outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scan {
    pub id: ScanId,
    pub ranges: Vec<String>,
    pub port_scan: bool,
    pub os_detection: bool,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub total_discovered: u32,
    pub state: ScanState,
    pub user_id: i64,
}

/// Partial update applied to a persisted scan row.
#[derive(Debug, Clone, Default)]
pub struct ScanPatch {
    pub state: Option<ScanState>,
    pub end: Option<DateTime<Utc>>,
    pub total_discovered: Option<u32>,
}

impl ScanPatch {
    pub fn state(state: ScanState) -> Self {
        Self {
            state: Some(state),
            ..Default::default()
        }
    }

    pub fn with_end(mut self, end: DateTime<Utc>) -> Self {
        self.end = Some(end);
        self
    }

    pub fn with_total_discovered(mut self, total: u32) -> Self {
        self.total_discovered = Some(total);
        self
    }
}

/// A discovered (or synthesized) network host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub id: HostId,
    /// Normalized primary address, the deduplication key.
    pub address: String,
    pub state: HostState,
    pub host_type: HostType,
    /// Scan-reported start timestamp (epoch seconds).
    pub start: Option<i64>,
    /// Scan-reported end timestamp (epoch seconds).
    pub end: Option<i64>,
    /// Back-reference to the generic OS classification, set at most once.
    pub os_generic_id: Option<i64>,
}

/// Attributes merged into a host on find-or-create.
///
/// `state`/`start`/`end` refresh the row when present. `host_type` is a
/// hint: it applies on create, and on match only upgrades the default
/// `Node` classification, never a stronger one.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostAttrs {
    pub state: Option<HostState>,
    pub host_type: Option<HostType>,
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl HostAttrs {
    pub fn typed(host_type: HostType) -> Self {
        Self {
            host_type: Some(host_type),
            ..Default::default()
        }
    }

    pub fn with_state(mut self, state: HostState) -> Self {
        self.state = Some(state);
        self
    }
}

/// Secondary address owned by a host (MAC, extra IPv4, ...).
/// Deduplicated by `(host, address, type)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AddressRecord {
    pub host_id: HostId,
    pub address: String,
    pub addr_type: String,
    pub vendor: Option<String>,
}

/// DNS name associated with a host. Deduplicated by `(host, name, type)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostnameRecord {
    pub host_id: HostId,
    pub name: String,
    pub name_type: String,
}

/// One OS-match result for a host, replaced wholesale on every parse pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OsDetected {
    pub host_id: HostId,
    pub name: String,
    pub os_type: String,
    pub vendor: String,
    pub os_family: String,
    pub os_gen: String,
    /// Match accuracy, 0-100.
    pub accuracy: f32,
}

/// One discovered port for a host, replaced wholesale on every parse pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortRecord {
    pub host_id: HostId,
    pub protocol: String,
    pub number: u16,
    pub state: String,
    pub reason: String,
    pub service: String,
    pub method: String,
    pub confidence: String,
    pub product: Option<String>,
    pub version: Option<String>,
    pub extra_info: Option<String>,
}

/// Directed edge between two hosts observed during one scan's traceroute.
/// Deduplicated by `(first, second, scan)`; rtt is set only at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hop {
    pub first_host_id: HostId,
    pub second_host_id: HostId,
    pub scan_id: ScanId,
    pub rtt: f64,
}

/// Row of the generic OS classification table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OsGeneric {
    pub id: i64,
    pub family: String,
    pub name: String,
}
