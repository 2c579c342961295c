//! Scan lifecycle orchestration.
//!
//! Drives a scan through its states: `pending` on creation, `running`
//! while the process executes, `storing` during report persistence, then
//! `done`. Failures land in `fatal` (process) or `fatal_storing` (parse
//! or persistence), and those states stick.

use std::time::Duration;

use chrono::Utc;
use tracing::{error, info};

use ntm_core::types::{Scan, ScanId, ScanPatch, ScanState};
use ntm_core::Store;

use crate::command::build_scan_command;
use crate::config::ScanConfig;
use crate::error::{Result, ScanError};
use crate::process::ProcessRunner;
use crate::report::parse_report;
use crate::topology::Reconstructor;

pub struct ScanController<S: Store> {
    store: S,
    config: ScanConfig,
    runner: ProcessRunner,
    last_scan_id: Option<i64>,
}

impl<S: Store> ScanController<S> {
    /// Create a controller, resuming the id sequence from the store.
    pub async fn new(store: S, config: ScanConfig) -> Result<Self> {
        let last_scan_id = store.last_scan_id().await?;
        Ok(Self {
            store,
            config,
            runner: ProcessRunner::new(),
            last_scan_id,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn next_scan_id(&self) -> ScanId {
        ScanId(self.last_scan_id.map_or(0, |id| id + 1))
    }

    /// Execute the scan process for the given ranges.
    ///
    /// Returns the id of the new scan. On process failure the scan is
    /// left in `fatal` with no end timestamp.
    pub async fn run_scan(&mut self, ranges: &[String], user_id: i64) -> Result<ScanId> {
        let scan_id = self.next_scan_id();
        // Validate the command first so a builder failure never leaves
        // a scan row behind.
        let command = build_scan_command(&self.config, scan_id, ranges)?;

        let scan = Scan {
            id: scan_id,
            ranges: ranges.to_vec(),
            port_scan: self.config.port_scan,
            os_detection: self.config.os_detection,
            start: Utc::now(),
            end: None,
            total_discovered: 0,
            state: ScanState::Pending,
            user_id,
        };
        self.store.create_scan(&scan).await?;
        self.last_scan_id = Some(scan_id.0);

        info!(scan_id = %scan_id, command = %command, "Starting scan");
        self.store
            .update_scan(scan_id, ScanPatch::state(ScanState::Running))
            .await?;

        let timeout = Duration::from_secs(self.config.timeout_secs);
        if let Err(e) = self.runner.execute(&command, timeout).await {
            error!(scan_id = %scan_id, error = %e, "Scan process failed");
            self.store
                .update_scan(scan_id, ScanPatch::state(ScanState::Fatal))
                .await?;
            return Err(e);
        }

        info!(scan_id = %scan_id, "Scan process finished");
        Ok(scan_id)
    }

    /// Parse and persist the report of a finished scan.
    ///
    /// Fails with [`ScanError::ScanNotFound`] when the scan or its report
    /// file does not exist; any parse or storage failure leaves the scan
    /// in `fatal_storing`.
    pub async fn parse_report(&self, scan_id: ScanId) -> Result<Scan> {
        if self.store.find_scan(scan_id).await?.is_none() {
            return Err(ScanError::ScanNotFound { id: scan_id });
        }
        let report_path = self.config.output_file(scan_id);
        if !report_path.exists() {
            return Err(ScanError::ScanNotFound { id: scan_id });
        }

        self.store
            .update_scan(scan_id, ScanPatch::state(ScanState::Storing))
            .await?;

        match self.store_report(scan_id).await {
            Ok(total) => {
                self.store
                    .update_scan(
                        scan_id,
                        ScanPatch::state(ScanState::Done)
                            .with_end(Utc::now())
                            .with_total_discovered(total),
                    )
                    .await?;
                info!(scan_id = %scan_id, total_discovered = total, "Report stored");
                self.store
                    .find_scan(scan_id)
                    .await?
                    .ok_or(ScanError::ScanNotFound { id: scan_id })
            }
            Err(e) => {
                error!(scan_id = %scan_id, error = %e, "Storing report failed");
                self.store
                    .update_scan(
                        scan_id,
                        ScanPatch::state(ScanState::FatalStoring).with_end(Utc::now()),
                    )
                    .await?;
                Err(e)
            }
        }
    }

    async fn store_report(&self, scan_id: ScanId) -> Result<u32> {
        let bytes = tokio::fs::read(self.config.output_file(scan_id)).await?;
        let report = parse_report(&bytes)?;
        let local_net = self.config.local_net()?;

        let reconstructor = Reconstructor::new(
            &self.store,
            scan_id,
            &self.config.scanner_address,
            self.config.prefix_len,
        );
        let mut persisted_up = 0u32;
        for parsed in report.parsed_hosts(&local_net) {
            reconstructor.persist_host(&parsed).await?;
            if parsed.up {
                persisted_up += 1;
            }
        }

        Ok(report.hosts_up().unwrap_or(persisted_up))
    }

    /// Run a scan end to end: execute the process, then store the report.
    pub async fn run(&mut self, ranges: &[String], user_id: i64) -> Result<Scan> {
        let scan_id = self.run_scan(ranges, user_id).await?;
        self.parse_report(scan_id).await
    }
}
