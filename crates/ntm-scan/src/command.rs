//! Scanner command construction.
//!
//! Targets and flags are passed as discrete argv entries, never through a
//! shell, so a hostile range string cannot smuggle extra commands in. The
//! `Display` impl shell-quotes arguments for log output only.

use std::fmt;
use std::fs;

use crate::config::ScanConfig;
use crate::error::{Result, ScanError};

use ntm_core::types::ScanId;

/// A fully assembled scanner invocation.
#[derive(Debug, Clone)]
pub struct ScanCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl fmt::Display for ScanCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", quote(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", quote(arg))?;
        }
        Ok(())
    }
}

fn quote(arg: &str) -> String {
    shlex::try_quote(arg)
        .map(|q| q.into_owned())
        .unwrap_or_else(|_| format!("'{arg}'"))
}

/// Build the scanner command line for one scan.
///
/// The scanner's own address is always appended to the targets so the
/// local segment shows up in the report. The output directory is created
/// if it does not exist yet.
pub fn build_scan_command(
    config: &ScanConfig,
    scan_id: ScanId,
    ranges: &[String],
) -> Result<ScanCommand> {
    let targets: Vec<String> = ranges
        .iter()
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .collect();
    if targets.is_empty() {
        return Err(ScanError::Config("no scan ranges given".to_string()));
    }

    fs::create_dir_all(&config.output_dir)?;

    let mut args = Vec::new();
    if !config.port_scan {
        args.push("-sn".to_string());
    }
    if config.os_detection {
        args.push("-O".to_string());
    }
    if config.service_info {
        args.push("-sV".to_string());
    }
    if config.verbose {
        args.push("-v".to_string());
    }
    if config.treat_hosts_as_online {
        args.push("-Pn".to_string());
    }
    args.push(if config.reverse_dns { "-R" } else { "-n" }.to_string());
    if config.traceroute {
        args.push("--traceroute".to_string());
    }
    if let Some(secs) = config.host_timeout_secs {
        args.push("--host-timeout".to_string());
        args.push(format!("{secs}s"));
    }
    args.push("-oX".to_string());
    args.push(config.output_file(scan_id).to_string_lossy().into_owned());

    args.extend(targets);
    args.push(config.scanner_address.clone());

    Ok(ScanCommand {
        program: config.nmap_path.clone(),
        args,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &std::path::Path) -> ScanConfig {
        ScanConfig {
            scanner_address: "10.0.0.5".to_string(),
            output_dir: dir.to_path_buf(),
            ..Default::default()
        }
    }

    #[test]
    fn default_flags_are_mapped() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let cmd =
            build_scan_command(&config, ScanId(1), &["192.168.1.0/24".to_string()]).unwrap();

        assert_eq!(cmd.program, "nmap");
        assert!(cmd.args.contains(&"-O".to_string()));
        assert!(cmd.args.contains(&"-sV".to_string()));
        assert!(cmd.args.contains(&"-n".to_string()));
        assert!(cmd.args.contains(&"--traceroute".to_string()));
        assert!(!cmd.args.contains(&"-sn".to_string()));
        assert!(!cmd.args.contains(&"-v".to_string()));
    }

    #[test]
    fn ping_sweep_when_port_scan_is_off() {
        let dir = tempfile::tempdir().unwrap();
        let config = ScanConfig {
            port_scan: false,
            os_detection: false,
            service_info: false,
            ..test_config(dir.path())
        };
        let cmd =
            build_scan_command(&config, ScanId(1), &["192.168.1.0/24".to_string()]).unwrap();
        assert!(cmd.args.contains(&"-sn".to_string()));
        assert!(!cmd.args.contains(&"-O".to_string()));
        assert!(!cmd.args.contains(&"-sV".to_string()));
    }

    #[test]
    fn scanner_address_is_the_last_target() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let cmd =
            build_scan_command(&config, ScanId(3), &["192.168.1.0/24".to_string()]).unwrap();
        assert_eq!(cmd.args.last().unwrap(), "10.0.0.5");
        let ox = cmd.args.iter().position(|a| a == "-oX").unwrap();
        assert!(cmd.args[ox + 1].ends_with("3.xml"));
    }

    #[test]
    fn host_timeout_is_rendered_in_seconds() {
        let dir = tempfile::tempdir().unwrap();
        let config = ScanConfig {
            host_timeout_secs: Some(90),
            ..test_config(dir.path())
        };
        let cmd =
            build_scan_command(&config, ScanId(1), &["10.0.0.0/24".to_string()]).unwrap();
        let pos = cmd
            .args
            .iter()
            .position(|a| a == "--host-timeout")
            .unwrap();
        assert_eq!(cmd.args[pos + 1], "90s");
    }

    #[test]
    fn empty_ranges_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        assert!(build_scan_command(&config, ScanId(1), &[]).is_err());
        assert!(build_scan_command(&config, ScanId(1), &["   ".to_string()]).is_err());
    }

    #[test]
    fn hostile_range_stays_a_single_argument() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let payload = "10.0.0.0/24; rm -rf /".to_string();
        let cmd = build_scan_command(&config, ScanId(1), &[payload.clone()]).unwrap();

        // The payload is one argv entry, and quoting survives a shell split.
        assert!(cmd.args.contains(&payload));
        let rendered = cmd.to_string();
        let split = shlex::split(&rendered).unwrap();
        assert!(split.contains(&payload));
    }
}
