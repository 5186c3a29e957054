mod memory;
mod redb_graph;

pub use memory::InMemoryGraph;
pub use redb_graph::{RedbGraph, RedbOptions, CURRENT_SCHEMA_VERSION, DEFAULT_SCAN_PAGE_SIZE};
