//! Configuration for the ntm scan engine.

use std::path::PathBuf;

use ipnet::IpNet;
use serde::Deserialize;

use ntm_core::types::ScanId;

use crate::error::{Result, ScanError};

/// Scan engine configuration.
///
/// Loaded from the `[scan]` section of `ntm.toml` or `NTM_SCAN__`
/// environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    /// Path to the nmap binary (default: "nmap").
    #[serde(default = "default_nmap_path")]
    pub nmap_path: String,

    /// Address of the host running the scans. Always appended to the
    /// target ranges so local-segment topology is captured.
    #[serde(default = "default_scanner_address")]
    pub scanner_address: String,

    /// Prefix length for the scanner's subnet. Used for the
    /// unreachable-artifact discard rule and for the addresses of
    /// synthesized switch hosts.
    #[serde(default = "default_prefix_len")]
    pub prefix_len: u8,

    /// Directory the scanner writes its XML reports into.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Wall-clock timeout for one scan process, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Optional per-host timeout passed through to the scanner.
    #[serde(default)]
    pub host_timeout_secs: Option<u64>,

    #[serde(default = "default_true")]
    pub port_scan: bool,

    #[serde(default = "default_true")]
    pub os_detection: bool,

    #[serde(default = "default_true")]
    pub service_info: bool,

    #[serde(default)]
    pub verbose: bool,

    #[serde(default)]
    pub treat_hosts_as_online: bool,

    #[serde(default)]
    pub reverse_dns: bool,

    #[serde(default = "default_true")]
    pub traceroute: bool,
}

impl ScanConfig {
    /// The scanner's local subnet at the configured prefix length.
    pub fn local_net(&self) -> Result<IpNet> {
        let ip = self
            .scanner_address
            .parse()
            .map_err(|_| ScanError::Config(format!(
                "invalid scanner address: {}",
                self.scanner_address
            )))?;
        let net = IpNet::new(ip, self.prefix_len)
            .map_err(|_| ScanError::Config(format!("invalid prefix length: {}", self.prefix_len)))?;
        Ok(net.trunc())
    }

    /// Report file path for a scan id.
    pub fn output_file(&self, scan_id: ScanId) -> PathBuf {
        self.output_dir.join(format!("{scan_id}.xml"))
    }
}

fn default_nmap_path() -> String {
    "nmap".to_string()
}

fn default_scanner_address() -> String {
    "127.0.0.1".to_string()
}

fn default_prefix_len() -> u8 {
    24
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./scans")
}

fn default_timeout_secs() -> u64 {
    3600
}

fn default_true() -> bool {
    true
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            nmap_path: default_nmap_path(),
            scanner_address: default_scanner_address(),
            prefix_len: default_prefix_len(),
            output_dir: default_output_dir(),
            timeout_secs: default_timeout_secs(),
            host_timeout_secs: None,
            port_scan: true,
            os_detection: true,
            service_info: true,
            verbose: false,
            treat_hosts_as_online: false,
            reverse_dns: false,
            traceroute: true,
        }
    }
}
