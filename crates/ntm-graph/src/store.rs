//! Store contract implemented as Cypher MERGE upserts.
//!
//! Every find-or-create MERGEs on the entity's natural key. Optional
//! values are written as placeholders (`''` for strings, `-1` for
//! integers) so row decoding stays total and MERGE keys never contain
//! nulls.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use neo4rs::{query, Row};

use ntm_core::store::Store;
use ntm_core::types::{
    normalize_address, AddressRecord, Host, HostAttrs, HostId, HostType, HostnameRecord,
    OsDetected, OsGeneric, PortRecord, Scan, ScanId, ScanPatch, ScanState,
};
use ntm_core::StoreError;

use crate::client::GraphStore;

fn corrupt<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Corrupt(e.to_string())
}

fn get_string(row: &Row, col: &str) -> Result<String, StoreError> {
    row.get::<String>(col).map_err(corrupt)
}

fn get_i64(row: &Row, col: &str) -> Result<i64, StoreError> {
    row.get::<i64>(col).map_err(corrupt)
}

fn opt_str(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

/// `-1` stands in for "unset" on integer columns.
fn opt_epoch(value: Option<i64>) -> i64 {
    value.unwrap_or(-1)
}

fn decode_host(row: &Row) -> Result<Host, StoreError> {
    let id = get_string(row, "id")?.parse().map_err(corrupt)?;
    let start = get_i64(row, "start")?;
    let end = get_i64(row, "end")?;
    let os_generic = get_i64(row, "os_generic_id")?;
    Ok(Host {
        id: HostId(id),
        address: get_string(row, "address")?,
        state: get_string(row, "state")?.parse().map_err(corrupt)?,
        host_type: get_string(row, "type")?.parse().map_err(corrupt)?,
        start: (start >= 0).then_some(start),
        end: (end >= 0).then_some(end),
        os_generic_id: (os_generic >= 0).then_some(os_generic),
    })
}

fn decode_scan(row: &Row) -> Result<Scan, StoreError> {
    let start = DateTime::parse_from_rfc3339(&get_string(row, "start")?)
        .map_err(corrupt)?
        .with_timezone(&Utc);
    let end_raw = get_string(row, "end")?;
    let end = if end_raw.is_empty() {
        None
    } else {
        Some(
            DateTime::parse_from_rfc3339(&end_raw)
                .map_err(corrupt)?
                .with_timezone(&Utc),
        )
    };
    let ranges = get_string(row, "ranges")?;
    Ok(Scan {
        id: ScanId(get_i64(row, "id")?),
        ranges: ranges.split_whitespace().map(String::from).collect(),
        port_scan: row.get::<bool>("port_scan").map_err(corrupt)?,
        os_detection: row.get::<bool>("os_detection").map_err(corrupt)?,
        start,
        end,
        total_discovered: get_i64(row, "total_discovered")? as u32,
        state: get_string(row, "state")?.parse::<ScanState>().map_err(corrupt)?,
        user_id: get_i64(row, "user_id")?,
    })
}

#[async_trait]
impl Store for GraphStore {
    async fn last_scan_id(&self) -> Result<Option<i64>, StoreError> {
        let q = query("MATCH (s:Scan) RETURN s.id AS id ORDER BY s.id DESC LIMIT 1");
        match self.query_one(q).await? {
            Some(row) => Ok(Some(get_i64(&row, "id")?)),
            None => Ok(None),
        }
    }

    async fn create_scan(&self, scan: &Scan) -> Result<(), StoreError> {
        let q = query(
            "CREATE (s:Scan {
               id: $id, ranges: $ranges, port_scan: $port_scan,
               os_detection: $os_detection, start: $start, end: $end,
               total_discovered: $total_discovered, state: $state,
               user_id: $user_id
             })",
        )
        .param("id", scan.id.0)
        .param("ranges", scan.ranges.join(" "))
        .param("port_scan", scan.port_scan)
        .param("os_detection", scan.os_detection)
        .param("start", scan.start.to_rfc3339())
        .param("end", scan.end.map(|e| e.to_rfc3339()).unwrap_or_default())
        .param("total_discovered", scan.total_discovered as i64)
        .param("state", scan.state.as_str().to_string())
        .param("user_id", scan.user_id);

        self.run(q).await
    }

    async fn find_scan(&self, id: ScanId) -> Result<Option<Scan>, StoreError> {
        let q = query(
            "MATCH (s:Scan {id: $id})
             RETURN s.id AS id, s.ranges AS ranges, s.port_scan AS port_scan,
                    s.os_detection AS os_detection, s.start AS start,
                    s.end AS end, s.total_discovered AS total_discovered,
                    s.state AS state, s.user_id AS user_id",
        )
        .param("id", id.0);

        match self.query_one(q).await? {
            Some(row) => Ok(Some(decode_scan(&row)?)),
            None => Ok(None),
        }
    }

    async fn update_scan(&self, id: ScanId, patch: ScanPatch) -> Result<(), StoreError> {
        let mut sets = Vec::new();
        if patch.state.is_some() {
            sets.push("s.state = $state");
        }
        if patch.end.is_some() {
            sets.push("s.end = $end");
        }
        if patch.total_discovered.is_some() {
            sets.push("s.total_discovered = $total_discovered");
        }
        if sets.is_empty() {
            return Ok(());
        }

        let cypher = format!("MATCH (s:Scan {{id: $id}}) SET {}", sets.join(", "));
        let mut q = query(&cypher).param("id", id.0);
        if let Some(state) = patch.state {
            q = q.param("state", state.as_str().to_string());
        }
        if let Some(end) = patch.end {
            q = q.param("end", end.to_rfc3339());
        }
        if let Some(total) = patch.total_discovered {
            q = q.param("total_discovered", total as i64);
        }

        self.run(q).await
    }

    async fn find_or_create_host(
        &self,
        address: &str,
        attrs: HostAttrs,
    ) -> Result<Host, StoreError> {
        let key = normalize_address(address);
        let id = HostId::from_address(&key);

        let q = query(
            "MERGE (h:Host {address: $address})
             ON CREATE SET
               h.id = $id,
               h.state = CASE WHEN $state = '' THEN 'down' ELSE $state END,
               h.type = CASE WHEN $type = '' THEN 'node' ELSE $type END,
               h.start = $start, h.end = $end, h.os_generic_id = -1
             ON MATCH SET
               h.state = CASE WHEN $state = '' THEN h.state ELSE $state END,
               h.start = CASE WHEN $start = -1 THEN h.start ELSE $start END,
               h.end = CASE WHEN $end = -1 THEN h.end ELSE $end END,
               h.type = CASE WHEN h.type = 'node' AND $type <> ''
                        THEN $type ELSE h.type END
             RETURN h.id AS id, h.address AS address, h.state AS state,
                    h.type AS type, h.start AS start, h.end AS end,
                    h.os_generic_id AS os_generic_id",
        )
        .param("address", key)
        .param("id", id.0.to_string())
        .param("state", attrs.state.map(|s| s.as_str()).unwrap_or("").to_string())
        .param("type", attrs.host_type.map(|t| t.as_str()).unwrap_or("").to_string())
        .param("start", opt_epoch(attrs.start))
        .param("end", opt_epoch(attrs.end));

        match self.query_one(q).await? {
            Some(row) => decode_host(&row),
            None => Err(StoreError::Backend(
                "host MERGE returned no row".to_string(),
            )),
        }
    }

    async fn set_host_type(&self, id: HostId, host_type: HostType) -> Result<(), StoreError> {
        let q = query("MATCH (h:Host {id: $id}) SET h.type = $type")
            .param("id", id.0.to_string())
            .param("type", host_type.as_str().to_string());
        self.run(q).await
    }

    async fn set_host_os_generic(
        &self,
        id: HostId,
        os_generic_id: i64,
    ) -> Result<(), StoreError> {
        // Set-once: rows with a real reference are never touched.
        let q = query(
            "MATCH (h:Host {id: $id})
             WHERE h.os_generic_id = -1
             SET h.os_generic_id = $os_generic_id",
        )
        .param("id", id.0.to_string())
        .param("os_generic_id", os_generic_id);
        self.run(q).await
    }

    async fn find_or_create_address(&self, record: &AddressRecord) -> Result<(), StoreError> {
        let q = query(
            "MATCH (h:Host {id: $host_id})
             MERGE (h)-[:HAS_ADDRESS]->(a:Address {address: $address, type: $type})
             ON CREATE SET a.vendor = $vendor",
        )
        .param("host_id", record.host_id.0.to_string())
        .param("address", record.address.clone())
        .param("type", record.addr_type.clone())
        .param("vendor", opt_str(&record.vendor));
        self.run(q).await
    }

    async fn find_or_create_hostname(&self, record: &HostnameRecord) -> Result<(), StoreError> {
        let q = query(
            "MATCH (h:Host {id: $host_id})
             MERGE (h)-[:HAS_NAME]->(n:Hostname {name: $name, type: $type})",
        )
        .param("host_id", record.host_id.0.to_string())
        .param("name", record.name.clone())
        .param("type", record.name_type.clone());
        self.run(q).await
    }

    async fn clear_os_detected(&self, host_id: HostId) -> Result<(), StoreError> {
        let q = query(
            "MATCH (:Host {id: $host_id})-[:DETECTED_OS]->(o:OsDetected)
             DETACH DELETE o",
        )
        .param("host_id", host_id.0.to_string());
        self.run(q).await
    }

    async fn create_os_detected(&self, record: &OsDetected) -> Result<(), StoreError> {
        let q = query(
            "MATCH (h:Host {id: $host_id})
             CREATE (h)-[:DETECTED_OS]->(:OsDetected {
               name: $name, type: $type, vendor: $vendor,
               os_family: $os_family, os_gen: $os_gen, accuracy: $accuracy
             })",
        )
        .param("host_id", record.host_id.0.to_string())
        .param("name", record.name.clone())
        .param("type", record.os_type.clone())
        .param("vendor", record.vendor.clone())
        .param("os_family", record.os_family.clone())
        .param("os_gen", record.os_gen.clone())
        .param("accuracy", record.accuracy as f64);
        self.run(q).await
    }

    async fn clear_ports(&self, host_id: HostId) -> Result<(), StoreError> {
        let q = query(
            "MATCH (:Host {id: $host_id})-[:HAS_PORT]->(p:Port)
             DETACH DELETE p",
        )
        .param("host_id", host_id.0.to_string());
        self.run(q).await
    }

    async fn create_port(&self, record: &PortRecord) -> Result<(), StoreError> {
        let q = query(
            "MATCH (h:Host {id: $host_id})
             CREATE (h)-[:HAS_PORT]->(:Port {
               protocol: $protocol, number: $number, state: $state,
               reason: $reason, service: $service, method: $method,
               confidence: $confidence, product: $product,
               version: $version, extra_info: $extra_info
             })",
        )
        .param("host_id", record.host_id.0.to_string())
        .param("protocol", record.protocol.clone())
        .param("number", record.number as i64)
        .param("state", record.state.clone())
        .param("reason", record.reason.clone())
        .param("service", record.service.clone())
        .param("method", record.method.clone())
        .param("confidence", record.confidence.clone())
        .param("product", opt_str(&record.product))
        .param("version", opt_str(&record.version))
        .param("extra_info", opt_str(&record.extra_info));
        self.run(q).await
    }

    async fn find_or_create_hop(
        &self,
        first: HostId,
        second: HostId,
        scan_id: ScanId,
        rtt: f64,
    ) -> Result<(), StoreError> {
        let q = query(
            "MATCH (a:Host {id: $first})
             MATCH (b:Host {id: $second})
             MERGE (a)-[r:HOP {scan_id: $scan_id}]->(b)
             ON CREATE SET r.rtt = $rtt",
        )
        .param("first", first.0.to_string())
        .param("second", second.0.to_string())
        .param("scan_id", scan_id.0)
        .param("rtt", rtt);
        self.run(q).await
    }

    async fn attach_host(&self, scan_id: ScanId, host_id: HostId) -> Result<(), StoreError> {
        let q = query(
            "MATCH (s:Scan {id: $scan_id})
             MATCH (h:Host {id: $host_id})
             MERGE (s)-[:OBSERVED]->(h)",
        )
        .param("scan_id", scan_id.0)
        .param("host_id", host_id.0.to_string());
        self.run(q).await
    }

    async fn find_os_generic(&self, family: &str) -> Result<Option<OsGeneric>, StoreError> {
        let needle = family.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(None);
        }

        let q = query(
            "MATCH (g:OsGeneric)
             WHERE toLower(g.family) CONTAINS $needle
             RETURN g.id AS id, g.family AS family, g.name AS name
             ORDER BY g.id LIMIT 1",
        )
        .param("needle", needle);

        match self.query_one(q).await? {
            Some(row) => Ok(Some(OsGeneric {
                id: get_i64(&row, "id")?,
                family: get_string(&row, "family")?,
                name: get_string(&row, "name")?,
            })),
            None => Ok(None),
        }
    }

    async fn create_os_generic(&self, family: &str, name: &str) -> Result<i64, StoreError> {
        let q = query(
            "OPTIONAL MATCH (g:OsGeneric)
             WITH coalesce(max(g.id), 0) + 1 AS next
             CREATE (n:OsGeneric {id: next, family: $family, name: $name})
             RETURN n.id AS id",
        )
        .param("family", family.to_string())
        .param("name", name.to_string());

        match self.query_one(q).await? {
            Some(row) => get_i64(&row, "id"),
            None => Err(StoreError::Backend(
                "OsGeneric CREATE returned no row".to_string(),
            )),
        }
    }
}
