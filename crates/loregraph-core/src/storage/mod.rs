//! Graph storage
//!
//! The production graph database is an external collaborator; this module
//! provides the in-process store used by the CLI and by tests.

mod graph_store;

pub use graph_store::{GraphSnapshot, GraphStats, InMemoryGraphStore, SNAPSHOT_VERSION};
