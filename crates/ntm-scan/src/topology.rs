//! Topology reconstruction.
//!
//! Takes flattened report hosts and upserts them into the store: hosts,
//! secondary addresses, hostnames, OS matches, ports, and the hop chain.
//! Along the way it promotes host classifications (router from the best
//! OS match, switch from service device types) and synthesizes switch
//! hosts on the first and last segment of every traced route.

use ipnet::IpNet;
use tracing::{debug, warn};

use ntm_core::types::{
    AddressRecord, HostAttrs, HostId, HostState, HostType, HostnameRecord, OsDetected, PortRecord,
    ScanId,
};
use ntm_core::Store;

use crate::error::Result;
use crate::report::ParsedHost;

/// Network address of the subnet containing `address`, used as the
/// identity of a synthesized switch. `None` for non-IP addresses.
pub fn subnet_address(address: &str, prefix_len: u8) -> Option<String> {
    let ip: std::net::IpAddr = address.parse().ok()?;
    let net = IpNet::new(ip, prefix_len).ok()?;
    Some(net.network().to_string())
}

/// Upserts one scan's parsed hosts into a store.
pub struct Reconstructor<'a, S: Store> {
    store: &'a S,
    scan_id: ScanId,
    scanner_address: &'a str,
    prefix_len: u8,
}

impl<'a, S: Store> Reconstructor<'a, S> {
    pub fn new(store: &'a S, scan_id: ScanId, scanner_address: &'a str, prefix_len: u8) -> Self {
        Self {
            store,
            scan_id,
            scanner_address,
            prefix_len,
        }
    }

    /// Persist one report host and everything hanging off it.
    pub async fn persist_host(&self, parsed: &ParsedHost) -> Result<()> {
        let attrs = HostAttrs {
            state: Some(if parsed.up {
                HostState::Up
            } else {
                HostState::Down
            }),
            host_type: None,
            start: parsed.start,
            end: parsed.end,
        };
        let host = self.store.find_or_create_host(&parsed.address, attrs).await?;
        self.store.attach_host(self.scan_id, host.id).await?;
        debug!(address = %host.address, host_id = %host.id, "Persisting report host");

        for address in &parsed.addresses {
            self.store
                .find_or_create_address(&AddressRecord {
                    host_id: host.id,
                    address: address.address.clone(),
                    addr_type: address.addr_type.clone(),
                    vendor: address.vendor.clone(),
                })
                .await?;
        }

        for hostname in &parsed.hostnames {
            self.store
                .find_or_create_hostname(&HostnameRecord {
                    host_id: host.id,
                    name: hostname.name.clone(),
                    name_type: hostname.name_type.clone(),
                })
                .await?;
        }

        self.persist_os_matches(host.id, parsed).await?;
        self.persist_ports(host.id, parsed).await?;
        self.persist_hops(parsed).await?;

        Ok(())
    }

    /// Replace the host's OS matches with this pass's results. The best
    /// match drives router promotion; each match may resolve the generic
    /// OS back-reference, which sticks once set.
    async fn persist_os_matches(&self, host_id: HostId, parsed: &ParsedHost) -> Result<()> {
        // Clear unconditionally: an empty result set still replaces the
        // previous pass's rows.
        self.store.clear_os_detected(host_id).await?;

        let mut linked = false;
        for (index, os) in parsed.os_matches.iter().enumerate() {
            if index == 0 && os.os_type.eq_ignore_ascii_case("router") {
                self.store.set_host_type(host_id, HostType::Router).await?;
            }
            if !linked && !os.os_family.is_empty() {
                if let Some(generic) = self.store.find_os_generic(&os.os_family).await? {
                    self.store.set_host_os_generic(host_id, generic.id).await?;
                    linked = true;
                }
            }
            self.store
                .create_os_detected(&OsDetected {
                    host_id,
                    name: os.name.clone(),
                    os_type: os.os_type.clone(),
                    vendor: os.vendor.clone(),
                    os_family: os.os_family.clone(),
                    os_gen: os.os_gen.clone(),
                    accuracy: os.accuracy,
                })
                .await?;
        }
        Ok(())
    }

    /// Replace the host's ports with this pass's results. A service that
    /// identifies a switch device promotes the host classification.
    async fn persist_ports(&self, host_id: HostId, parsed: &ParsedHost) -> Result<()> {
        self.store.clear_ports(host_id).await?;

        for port in &parsed.ports {
            if port
                .device_type
                .as_deref()
                .is_some_and(|d| d.eq_ignore_ascii_case("switch"))
            {
                self.store.set_host_type(host_id, HostType::Switch).await?;
            }
            self.store
                .create_port(&PortRecord {
                    host_id,
                    protocol: port.protocol.clone(),
                    number: port.number,
                    state: port.state.clone(),
                    reason: port.reason.clone(),
                    service: port.service.clone(),
                    method: port.method.clone(),
                    confidence: port.confidence.clone(),
                    product: port.product.clone(),
                    version: port.version.clone(),
                    extra_info: port.extra_info.clone(),
                })
                .await?;
        }
        Ok(())
    }

    /// Walk the traced route, creating hop edges from the scanner to the
    /// target. The first and last segment each get a synthesized switch
    /// host, addressed by its endpoint's subnet, spliced into the chain.
    async fn persist_hops(&self, parsed: &ParsedHost) -> Result<()> {
        if parsed.hops.is_empty() {
            return Ok(());
        }
        let last = parsed.hops.len() - 1;
        let mut first_address = self.scanner_address.to_string();

        for (index, hop) in parsed.hops.iter().enumerate() {
            // Endpoints in the middle of a route forwarded packets, so
            // they default to routers; the ends are plain nodes.
            let first_type = if index == 0 {
                HostType::Node
            } else {
                HostType::Router
            };
            let second_type = if index == last {
                HostType::Node
            } else {
                HostType::Router
            };

            let first = self
                .store
                .find_or_create_host(&first_address, HostAttrs::typed(first_type))
                .await?;
            let second = self
                .store
                .find_or_create_host(&hop.address, HostAttrs::typed(second_type))
                .await?;
            self.store.attach_host(self.scan_id, first.id).await?;
            self.store.attach_host(self.scan_id, second.id).await?;

            let mut chain_head = first.id;
            if index == 0 || index == last {
                if let Some(switch_id) = self.splice_switch(&hop.address, chain_head).await? {
                    chain_head = switch_id;
                }
            }
            self.store
                .find_or_create_hop(chain_head, second.id, self.scan_id, hop.rtt)
                .await?;

            first_address = hop.address.clone();
        }
        Ok(())
    }

    /// Insert a switch between `from` and the segment's far endpoint.
    /// Returns the switch id, or `None` when the endpoint has no subnet.
    async fn splice_switch(&self, endpoint: &str, from: HostId) -> Result<Option<HostId>> {
        let Some(segment) = subnet_address(endpoint, self.prefix_len) else {
            warn!(endpoint = %endpoint, "No subnet for hop endpoint, skipping switch");
            return Ok(None);
        };
        let switch = self
            .store
            .find_or_create_host(
                &segment,
                HostAttrs::typed(HostType::Switch).with_state(HostState::Up),
            )
            .await?;
        self.store.attach_host(self.scan_id, switch.id).await?;
        self.store
            .find_or_create_hop(from, switch.id, self.scan_id, 0.0)
            .await?;
        Ok(Some(switch.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subnet_address_truncates_host_bits() {
        assert_eq!(
            subnet_address("192.168.1.77", 24).as_deref(),
            Some("192.168.1.0")
        );
        assert_eq!(subnet_address("10.5.9.3", 16).as_deref(), Some("10.5.0.0"));
        assert_eq!(subnet_address("aa:bb:cc:dd:ee:ff", 24), None);
    }
}
