//! ntm-graph: Neo4j-backed implementation of the ntm store contract.
//!
//! Hosts are MERGEd on their normalized address, so repeated scans of
//! overlapping ranges upsert instead of duplicating.

pub mod client;
pub mod store;

pub use client::{GraphConfig, GraphStore};
