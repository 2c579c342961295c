//! ntm-scan: scan orchestration and topology reconstruction engine.
//!
//! Drives the external scanner as a subprocess, parses its XML report,
//! and rebuilds the persistent graph of hosts, ports, operating systems
//! and hop relationships across successive scans.

pub mod command;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod process;
pub mod report;
pub mod topology;
