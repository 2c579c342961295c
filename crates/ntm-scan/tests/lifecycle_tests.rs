//! Lifecycle tests: state machine and report persistence end to end,
//! against the in-memory store and a temp output directory.

use chrono::Utc;

use ntm_core::memory::MemoryStore;
use ntm_core::types::{HostState, Scan, ScanId, ScanState};
use ntm_core::Store;

use ntm_scan::config::ScanConfig;
use ntm_scan::error::ScanError;
use ntm_scan::lifecycle::ScanController;

const REPORT: &str = r#"<?xml version="1.0"?>
<nmaprun scanner="nmap">
  <host starttime="1700000001" endtime="1700000050">
    <status state="up" reason="arp-response"/>
    <address addr="10.0.0.7" addrtype="ipv4"/>
    <ports>
      <port protocol="tcp" portid="22">
        <state state="open" reason="syn-ack"/>
        <service name="ssh" method="probed" conf="10"/>
      </port>
      <port protocol="tcp" portid="23">
        <state state="closed" reason="reset"/>
      </port>
    </ports>
    <os>
      <osmatch name="Linux 5.4" accuracy="95">
        <osclass type="general purpose" vendor="Linux" osfamily="Linux" osgen="5.X" accuracy="95"/>
      </osmatch>
    </os>
  </host>
  <host>
    <status state="down" reason="no-response"/>
    <address addr="10.0.0.8" addrtype="ipv4"/>
  </host>
  <runstats>
    <hosts up="1" down="1" total="2"/>
  </runstats>
</nmaprun>"#;

fn test_config(dir: &std::path::Path) -> ScanConfig {
    ScanConfig {
        scanner_address: "10.0.0.5".to_string(),
        output_dir: dir.to_path_buf(),
        timeout_secs: 10,
        ..Default::default()
    }
}

async fn seed_scan(store: &MemoryStore, id: i64) {
    store
        .create_scan(&Scan {
            id: ScanId(id),
            ranges: vec!["10.0.0.0/24".to_string()],
            port_scan: true,
            os_detection: true,
            start: Utc::now(),
            end: None,
            total_discovered: 0,
            state: ScanState::Running,
            user_id: 1,
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn parse_report_drives_the_scan_to_done() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());

    let store = MemoryStore::new();
    seed_scan(&store, 0).await;
    std::fs::write(config.output_file(ScanId(0)), REPORT).unwrap();

    let controller = ScanController::new(store, config).await.unwrap();
    let scan = controller.parse_report(ScanId(0)).await.unwrap();

    assert_eq!(scan.state, ScanState::Done);
    assert_eq!(scan.total_discovered, 1);
    assert!(scan.end.is_some());

    let store = controller.store();
    let host = store.host_by_address("10.0.0.7").unwrap();
    assert_eq!(host.start, Some(1700000001));
    assert_eq!(host.state, HostState::Up);
    assert_eq!(store.ports_for(host.id).len(), 2);
    assert_eq!(store.os_detected_for(host.id).len(), 1);
    assert!(store.host_by_address("10.0.0.8").is_some());
}

#[tokio::test]
async fn parse_report_of_unknown_scan_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let controller = ScanController::new(MemoryStore::new(), test_config(dir.path()))
        .await
        .unwrap();

    let err = controller.parse_report(ScanId(42)).await.unwrap_err();
    assert!(matches!(err, ScanError::ScanNotFound { id: ScanId(42) }));
}

#[tokio::test]
async fn missing_report_file_is_not_found_and_leaves_state_alone() {
    let dir = tempfile::tempdir().unwrap();
    let store = MemoryStore::new();
    seed_scan(&store, 0).await;

    let controller = ScanController::new(store, test_config(dir.path()))
        .await
        .unwrap();
    let err = controller.parse_report(ScanId(0)).await.unwrap_err();
    assert!(matches!(err, ScanError::ScanNotFound { .. }));

    let scan = controller.store().scan(ScanId(0)).unwrap();
    assert_eq!(scan.state, ScanState::Running);
}

#[tokio::test]
async fn broken_report_lands_in_fatal_storing() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());

    let store = MemoryStore::new();
    seed_scan(&store, 0).await;
    std::fs::write(config.output_file(ScanId(0)), "<nmaprun><host>").unwrap();

    let controller = ScanController::new(store, config).await.unwrap();
    let err = controller.parse_report(ScanId(0)).await.unwrap_err();
    assert!(matches!(err, ScanError::MalformedReport(_)));

    let scan = controller.store().scan(ScanId(0)).unwrap();
    assert_eq!(scan.state, ScanState::FatalStoring);
    assert!(scan.end.is_some());
}

#[tokio::test]
async fn failed_process_lands_in_fatal_without_end() {
    let dir = tempfile::tempdir().unwrap();
    let config = ScanConfig {
        nmap_path: "/nonexistent/ntm-no-such-scanner".to_string(),
        ..test_config(dir.path())
    };

    let mut controller = ScanController::new(MemoryStore::new(), config).await.unwrap();
    let err = controller
        .run_scan(&["10.0.0.0/24".to_string()], 1)
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::ExecutionFailed { .. }));

    let scan = controller.store().scan(ScanId(0)).unwrap();
    assert_eq!(scan.state, ScanState::Fatal);
    assert!(scan.end.is_none());
}

#[tokio::test]
async fn scan_ids_continue_from_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let config = ScanConfig {
        // `true` exits 0 and ignores the scanner flags.
        nmap_path: "true".to_string(),
        ..test_config(dir.path())
    };

    let store = MemoryStore::new();
    seed_scan(&store, 6).await;

    let mut controller = ScanController::new(store, config).await.unwrap();
    let id = controller
        .run_scan(&["10.0.0.0/24".to_string()], 1)
        .await
        .unwrap();
    assert_eq!(id, ScanId(7));

    let id = controller
        .run_scan(&["10.0.0.0/24".to_string()], 1)
        .await
        .unwrap();
    assert_eq!(id, ScanId(8));

    let scan = controller.store().scan(ScanId(8)).unwrap();
    assert_eq!(scan.state, ScanState::Running);
    assert_eq!(scan.user_id, 1);
}

#[tokio::test]
async fn rejected_ranges_leave_no_scan_row_behind() {
    let dir = tempfile::tempdir().unwrap();
    let mut controller = ScanController::new(MemoryStore::new(), test_config(dir.path()))
        .await
        .unwrap();

    let err = controller.run_scan(&["   ".to_string()], 1).await.unwrap_err();
    assert!(matches!(err, ScanError::Config(_)));
    assert!(controller.store().scan(ScanId(0)).is_none());

    // The id was not consumed either.
    let config = ScanConfig {
        nmap_path: "true".to_string(),
        ..test_config(dir.path())
    };
    let mut controller = ScanController::new(MemoryStore::new(), config).await.unwrap();
    let _ = controller.run_scan(&["   ".to_string()], 1).await;
    let id = controller
        .run_scan(&["10.0.0.0/24".to_string()], 1)
        .await
        .unwrap();
    assert_eq!(id, ScanId(0));
}

#[tokio::test]
async fn first_scan_ever_gets_id_zero() {
    let dir = tempfile::tempdir().unwrap();
    let config = ScanConfig {
        nmap_path: "true".to_string(),
        ..test_config(dir.path())
    };

    let mut controller = ScanController::new(MemoryStore::new(), config).await.unwrap();
    let id = controller
        .run_scan(&["10.0.0.0/24".to_string()], 1)
        .await
        .unwrap();
    assert_eq!(id, ScanId(0));
}
