//! ntm-core: shared domain types and the store contract for the ntm
//! network topology mapper.
//!
//! This crate defines:
//! - Entity types (Scan, Host, Address, Hostname, OsDetected, Port, Hop)
//!   for the reconstructed topology graph
//! - The [`Store`] trait every persistence backend implements
//! - [`memory::MemoryStore`], the in-memory reference backend used by tests

pub mod error;
pub mod memory;
pub mod store;
pub mod types;

pub use error::StoreError;
pub use store::Store;
