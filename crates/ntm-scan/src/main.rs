//! CLI entry point for the ntm scan engine.

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use ntm_graph::{GraphConfig, GraphStore};

use ntm_scan::config::ScanConfig;
use ntm_scan::lifecycle::ScanController;

#[derive(Parser)]
#[command(name = "ntm-scan")]
#[command(about = "Network scan orchestration and topology reconstruction")]
struct Cli {
    /// Ranges to scan (CIDR or nmap target notation), comma-separated.
    #[arg(short, long, value_delimiter = ',', required = true)]
    ranges: Vec<String>,

    /// Id of the user the scan is recorded for.
    #[arg(short, long, default_value_t = 0)]
    user_id: i64,

    /// Ping sweep only, no port scan.
    #[arg(long)]
    no_port_scan: bool,

    /// Skip OS detection.
    #[arg(long)]
    no_os_detection: bool,

    /// Config file prefix (default: ntm).
    #[arg(short, long, default_value = "ntm")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();

    let cli = Cli::parse();
    let mut scan_config = load_scan_config(&cli.config)?;
    if cli.no_port_scan {
        scan_config.port_scan = false;
    }
    if cli.no_os_detection {
        scan_config.os_detection = false;
    }

    let graph_config = load_graph_config(&cli.config);
    let store = GraphStore::connect(&graph_config).await?;

    let mut controller = ScanController::new(store, scan_config).await?;
    let scan = controller.run(&cli.ranges, cli.user_id).await?;

    tracing::info!(
        scan_id = %scan.id,
        state = scan.state.as_str(),
        total_discovered = scan.total_discovered,
        "Scan complete"
    );
    Ok(())
}

fn load_scan_config(file_prefix: &str) -> anyhow::Result<ScanConfig> {
    let cfg = config::Config::builder()
        .add_source(config::File::with_name(file_prefix).required(false))
        .add_source(
            config::Environment::with_prefix("NTM_SCAN")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    scan_config_from(&cfg)
}

/// Defaults apply only when no `[scan]` section exists; a section that
/// fails to deserialize is a hard error.
fn scan_config_from(cfg: &config::Config) -> anyhow::Result<ScanConfig> {
    match cfg.get::<ScanConfig>("scan") {
        Ok(c) => Ok(c),
        Err(config::ConfigError::NotFound(_)) => Ok(ScanConfig::default()),
        Err(e) => Err(e.into()),
    }
}

fn load_graph_config(file_prefix: &str) -> GraphConfig {
    let cfg = config::Config::builder()
        .add_source(config::File::with_name(file_prefix).required(false))
        .add_source(
            config::Environment::with_prefix("NTM")
                .separator("__")
                .try_parsing(true),
        )
        .build();

    match cfg {
        Ok(c) => GraphConfig {
            uri: c
                .get_string("neo4j.uri")
                .unwrap_or_else(|_| "bolt://localhost:7687".to_string()),
            user: c
                .get_string("neo4j.user")
                .unwrap_or_else(|_| "neo4j".to_string()),
            password: c
                .get_string("neo4j.password")
                .unwrap_or_else(|_| "ntm-dev".to_string()),
            ..Default::default()
        },
        Err(_) => GraphConfig::default(),
    }
}
