//! Scan report parsing.
//!
//! The raw XML is deserialized with serde into a faithful mirror of the
//! scanner's document, then flattened into an intermediate representation
//! the reconstructor consumes. Numeric attributes stay `String` in the
//! mirror and are parsed leniently during flattening, so one mangled port
//! or hop is skipped with a warning instead of failing the whole report.

use ipnet::IpNet;
use serde::Deserialize;
use tracing::warn;

use crate::error::{Result, ScanError};

// ── XML mirror ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename = "nmaprun")]
pub struct ScanReport {
    #[serde(rename = "host", default)]
    pub hosts: Vec<XmlHost>,
    pub runstats: Option<RunStats>,
}

#[derive(Debug, Deserialize)]
pub struct XmlHost {
    #[serde(rename = "@starttime")]
    pub start_time: Option<String>,
    #[serde(rename = "@endtime")]
    pub end_time: Option<String>,
    pub status: Option<XmlStatus>,
    #[serde(rename = "address", default)]
    pub addresses: Vec<XmlAddress>,
    pub hostnames: Option<XmlHostnames>,
    pub os: Option<XmlOs>,
    pub ports: Option<XmlPorts>,
    pub trace: Option<XmlTrace>,
}

impl XmlHost {
    pub fn is_up(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| s.state.eq_ignore_ascii_case("up"))
    }
}

#[derive(Debug, Deserialize)]
pub struct XmlStatus {
    #[serde(rename = "@state")]
    pub state: String,
    #[serde(rename = "@reason")]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct XmlAddress {
    #[serde(rename = "@addr")]
    pub addr: String,
    #[serde(rename = "@addrtype")]
    pub addr_type: String,
    #[serde(rename = "@vendor")]
    pub vendor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct XmlHostnames {
    #[serde(rename = "hostname", default)]
    pub hostnames: Vec<XmlHostname>,
}

#[derive(Debug, Deserialize)]
pub struct XmlHostname {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@type")]
    pub name_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct XmlOs {
    #[serde(rename = "osmatch", default)]
    pub os_matches: Vec<XmlOsMatch>,
}

#[derive(Debug, Deserialize)]
pub struct XmlOsMatch {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@accuracy")]
    pub accuracy: Option<String>,
    #[serde(rename = "osclass", default)]
    pub os_classes: Vec<XmlOsClass>,
}

#[derive(Debug, Deserialize)]
pub struct XmlOsClass {
    #[serde(rename = "@type")]
    pub os_type: Option<String>,
    #[serde(rename = "@vendor")]
    pub vendor: Option<String>,
    #[serde(rename = "@osfamily")]
    pub os_family: Option<String>,
    #[serde(rename = "@osgen")]
    pub os_gen: Option<String>,
    #[serde(rename = "@accuracy")]
    pub accuracy: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct XmlPorts {
    #[serde(rename = "port", default)]
    pub ports: Vec<XmlPort>,
}

#[derive(Debug, Deserialize)]
pub struct XmlPort {
    #[serde(rename = "@protocol")]
    pub protocol: String,
    #[serde(rename = "@portid")]
    pub port_id: String,
    pub state: Option<XmlPortState>,
    pub service: Option<XmlService>,
}

#[derive(Debug, Deserialize)]
pub struct XmlPortState {
    #[serde(rename = "@state")]
    pub state: String,
    #[serde(rename = "@reason")]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct XmlService {
    #[serde(rename = "@name")]
    pub name: Option<String>,
    #[serde(rename = "@method")]
    pub method: Option<String>,
    #[serde(rename = "@conf")]
    pub conf: Option<String>,
    #[serde(rename = "@devicetype")]
    pub device_type: Option<String>,
    #[serde(rename = "@product")]
    pub product: Option<String>,
    #[serde(rename = "@version")]
    pub version: Option<String>,
    #[serde(rename = "@extrainfo")]
    pub extra_info: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct XmlTrace {
    #[serde(rename = "hop", default)]
    pub hops: Vec<XmlHop>,
}

#[derive(Debug, Deserialize)]
pub struct XmlHop {
    #[serde(rename = "@ttl")]
    pub ttl: Option<String>,
    #[serde(rename = "@ipaddr")]
    pub ip_addr: Option<String>,
    #[serde(rename = "@rtt")]
    pub rtt: Option<String>,
    #[serde(rename = "@host")]
    pub host: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RunStats {
    pub hosts: Option<RunStatsHosts>,
}

#[derive(Debug, Deserialize)]
pub struct RunStatsHosts {
    #[serde(rename = "@up")]
    pub up: Option<String>,
    #[serde(rename = "@down")]
    pub down: Option<String>,
    #[serde(rename = "@total")]
    pub total: Option<String>,
}

/// Parse a raw XML report.
pub fn parse_report(bytes: &[u8]) -> Result<ScanReport> {
    quick_xml::de::from_reader(bytes).map_err(|e| ScanError::MalformedReport(e.to_string()))
}

// ── Intermediate representation ───────────────────────────────────

/// One report host flattened for reconstruction.
#[derive(Debug, Clone)]
pub struct ParsedHost {
    /// Primary (first) address of the host.
    pub address: String,
    pub up: bool,
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub addresses: Vec<ParsedAddress>,
    pub hostnames: Vec<ParsedHostname>,
    pub os_matches: Vec<ParsedOsMatch>,
    pub ports: Vec<ParsedPort>,
    pub hops: Vec<ParsedHop>,
}

#[derive(Debug, Clone)]
pub struct ParsedAddress {
    pub address: String,
    pub addr_type: String,
    pub vendor: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ParsedHostname {
    pub name: String,
    pub name_type: String,
}

/// One OS match with the fields of its first osclass folded in.
#[derive(Debug, Clone)]
pub struct ParsedOsMatch {
    pub name: String,
    pub os_type: String,
    pub vendor: String,
    pub os_family: String,
    pub os_gen: String,
    pub accuracy: f32,
}

#[derive(Debug, Clone)]
pub struct ParsedPort {
    pub protocol: String,
    pub number: u16,
    pub state: String,
    pub reason: String,
    pub service: String,
    pub method: String,
    pub confidence: String,
    pub device_type: Option<String>,
    pub product: Option<String>,
    pub version: Option<String>,
    pub extra_info: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ParsedHop {
    pub address: String,
    pub rtt: f64,
}

impl ScanReport {
    /// Up-host count from the run statistics, when the scanner wrote them.
    pub fn hosts_up(&self) -> Option<u32> {
        self.runstats
            .as_ref()
            .and_then(|r| r.hosts.as_ref())
            .and_then(|h| h.up.as_deref())
            .and_then(|up| up.parse().ok())
    }

    /// Flatten report hosts, applying the unreachable-artifact rule: a
    /// host with no trace hops that is outside the scanner's local subnet
    /// was only seen through intermediaries and is discarded.
    pub fn parsed_hosts<'a>(
        &'a self,
        local_net: &'a IpNet,
    ) -> impl Iterator<Item = ParsedHost> + 'a {
        self.hosts
            .iter()
            .filter_map(move |host| flatten_host(host, local_net))
    }
}

fn flatten_host(host: &XmlHost, local_net: &IpNet) -> Option<ParsedHost> {
    let Some(primary) = host.addresses.first() else {
        warn!("Skipping report host without an address");
        return None;
    };
    let address = primary.addr.clone();

    let hops: Vec<ParsedHop> = host
        .trace
        .as_ref()
        .map(|t| t.hops.iter().filter_map(flatten_hop).collect())
        .unwrap_or_default();

    if hops.is_empty() && !in_net(&address, local_net) {
        warn!(address = %address, "Discarding host with no route outside the local subnet");
        return None;
    }

    let addresses = host
        .addresses
        .iter()
        .map(|a| ParsedAddress {
            address: a.addr.clone(),
            addr_type: a.addr_type.clone(),
            vendor: a.vendor.clone(),
        })
        .collect();

    let hostnames = host
        .hostnames
        .as_ref()
        .map(|h| {
            h.hostnames
                .iter()
                .map(|n| ParsedHostname {
                    name: n.name.clone(),
                    name_type: n.name_type.clone().unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default();

    let os_matches = host
        .os
        .as_ref()
        .map(|os| os.os_matches.iter().map(flatten_os_match).collect())
        .unwrap_or_default();

    let ports = host
        .ports
        .as_ref()
        .map(|p| {
            p.ports
                .iter()
                .filter_map(|port| flatten_port(&address, port))
                .collect()
        })
        .unwrap_or_default();

    Some(ParsedHost {
        up: host.is_up(),
        start: parse_epoch(host.start_time.as_deref()),
        end: parse_epoch(host.end_time.as_deref()),
        address,
        addresses,
        hostnames,
        os_matches,
        ports,
        hops,
    })
}

fn flatten_os_match(m: &XmlOsMatch) -> ParsedOsMatch {
    let class = m.os_classes.first();
    ParsedOsMatch {
        name: m.name.clone(),
        os_type: opt_field(class.and_then(|c| c.os_type.as_deref())),
        vendor: opt_field(class.and_then(|c| c.vendor.as_deref())),
        os_family: opt_field(class.and_then(|c| c.os_family.as_deref())),
        os_gen: opt_field(class.and_then(|c| c.os_gen.as_deref())),
        accuracy: m
            .accuracy
            .as_deref()
            .and_then(|a| a.parse().ok())
            .unwrap_or(0.0),
    }
}

fn flatten_port(host_address: &str, port: &XmlPort) -> Option<ParsedPort> {
    let number = match port.port_id.parse::<u16>() {
        Ok(n) => n,
        Err(_) => {
            warn!(host = %host_address, portid = %port.port_id, "Skipping port with unparsable id");
            return None;
        }
    };
    let service = port.service.as_ref();
    Some(ParsedPort {
        protocol: port.protocol.clone(),
        number,
        state: port
            .state
            .as_ref()
            .map(|s| s.state.clone())
            .unwrap_or_default(),
        reason: port
            .state
            .as_ref()
            .and_then(|s| s.reason.clone())
            .unwrap_or_default(),
        service: opt_field(service.and_then(|s| s.name.as_deref())),
        method: opt_field(service.and_then(|s| s.method.as_deref())),
        confidence: opt_field(service.and_then(|s| s.conf.as_deref())),
        device_type: service.and_then(|s| s.device_type.clone()),
        product: service.and_then(|s| s.product.clone()),
        version: service.and_then(|s| s.version.clone()),
        extra_info: service.and_then(|s| s.extra_info.clone()),
    })
}

fn flatten_hop(hop: &XmlHop) -> Option<ParsedHop> {
    let address = hop.ip_addr.clone()?;
    let rtt = hop
        .rtt
        .as_deref()
        .and_then(|r| r.parse().ok())
        .unwrap_or(0.0);
    Some(ParsedHop { address, rtt })
}

fn opt_field(value: Option<&str>) -> String {
    value.unwrap_or_default().to_string()
}

fn parse_epoch(value: Option<&str>) -> Option<i64> {
    value.and_then(|v| v.parse().ok())
}

fn in_net(address: &str, net: &IpNet) -> bool {
    address
        .parse::<std::net::IpAddr>()
        .map(|ip| net.contains(&ip))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<nmaprun scanner="nmap" start="1700000000" version="7.94">
  <host starttime="1700000001" endtime="1700000060">
    <status state="up" reason="echo-reply"/>
    <address addr="192.168.1.10" addrtype="ipv4"/>
    <address addr="AA:BB:CC:DD:EE:FF" addrtype="mac" vendor="Acme"/>
    <hostnames>
      <hostname name="printer.lan" type="PTR"/>
    </hostnames>
    <ports>
      <port protocol="tcp" portid="22">
        <state state="open" reason="syn-ack"/>
        <service name="ssh" method="probed" conf="10" product="OpenSSH" version="9.4"/>
      </port>
      <port protocol="tcp" portid="9100">
        <state state="open" reason="syn-ack"/>
        <service name="jetdirect" method="table" conf="3" devicetype="printer"/>
      </port>
    </ports>
    <os>
      <osmatch name="Linux 5.4" accuracy="96">
        <osclass type="general purpose" vendor="Linux" osfamily="Linux" osgen="5.X" accuracy="96"/>
      </osmatch>
      <osmatch name="Linux 4.15" accuracy="92"/>
    </os>
    <trace>
      <hop ttl="1" ipaddr="10.0.0.1" rtt="0.52"/>
      <hop ttl="2" ipaddr="192.168.1.10" rtt="1.33"/>
    </trace>
  </host>
  <runstats>
    <hosts up="1" down="254" total="255"/>
  </runstats>
</nmaprun>"#;

    fn local_net() -> IpNet {
        "10.0.0.0/24".parse().unwrap()
    }

    #[test]
    fn parses_a_full_host() {
        let report = parse_report(FIXTURE.as_bytes()).unwrap();
        assert_eq!(report.hosts_up(), Some(1));

        let net = local_net();
        let hosts: Vec<_> = report.parsed_hosts(&net).collect();
        assert_eq!(hosts.len(), 1);

        let host = &hosts[0];
        assert_eq!(host.address, "192.168.1.10");
        assert!(host.up);
        assert_eq!(host.start, Some(1700000001));
        assert_eq!(host.addresses.len(), 2);
        assert_eq!(host.addresses[1].vendor.as_deref(), Some("Acme"));
        assert_eq!(host.hostnames[0].name, "printer.lan");

        assert_eq!(host.ports.len(), 2);
        assert_eq!(host.ports[0].number, 22);
        assert_eq!(host.ports[0].product.as_deref(), Some("OpenSSH"));
        assert_eq!(host.ports[1].device_type.as_deref(), Some("printer"));

        assert_eq!(host.os_matches.len(), 2);
        assert_eq!(host.os_matches[0].os_family, "Linux");
        assert_eq!(host.os_matches[0].accuracy, 96.0);
        // Second match has no osclass; folded fields default to empty.
        assert_eq!(host.os_matches[1].os_family, "");

        assert_eq!(host.hops.len(), 2);
        assert_eq!(host.hops[0].address, "10.0.0.1");
        assert!((host.hops[0].rtt - 0.52).abs() < f64::EPSILON);
    }

    #[test]
    fn remote_host_without_trace_is_discarded() {
        let xml = r#"<nmaprun>
  <host>
    <status state="up" reason="reset"/>
    <address addr="203.0.113.9" addrtype="ipv4"/>
  </host>
  <host>
    <status state="up" reason="arp-response"/>
    <address addr="10.0.0.7" addrtype="ipv4"/>
  </host>
</nmaprun>"#;
        let report = parse_report(xml.as_bytes()).unwrap();
        let net = local_net();
        let hosts: Vec<_> = report.parsed_hosts(&net).collect();
        // The remote host has no hops and is outside 10.0.0.0/24.
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].address, "10.0.0.7");
    }

    #[test]
    fn empty_report_is_valid() {
        let xml = r#"<nmaprun scanner="nmap"><runstats><hosts up="0" down="0" total="0"/></runstats></nmaprun>"#;
        let report = parse_report(xml.as_bytes()).unwrap();
        assert!(report.hosts.is_empty());
        assert_eq!(report.hosts_up(), Some(0));
    }

    #[test]
    fn malformed_port_is_skipped_not_fatal() {
        let xml = r#"<nmaprun>
  <host>
    <status state="up" reason="arp-response"/>
    <address addr="10.0.0.7" addrtype="ipv4"/>
    <ports>
      <port protocol="tcp" portid="not-a-number">
        <state state="open" reason="syn-ack"/>
      </port>
      <port protocol="tcp" portid="80">
        <state state="open" reason="syn-ack"/>
        <service name="http"/>
      </port>
    </ports>
  </host>
</nmaprun>"#;
        let report = parse_report(xml.as_bytes()).unwrap();
        let net = local_net();
        let hosts: Vec<_> = report.parsed_hosts(&net).collect();
        assert_eq!(hosts[0].ports.len(), 1);
        assert_eq!(hosts[0].ports[0].number, 80);
    }

    #[test]
    fn truncated_xml_is_malformed() {
        let err = parse_report(b"<nmaprun><host>").unwrap_err();
        assert!(matches!(err, ScanError::MalformedReport(_)));
    }
}
