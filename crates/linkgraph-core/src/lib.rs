//! Link graph storage for a distributed crawler.
//!
//! Links (crawled or to-be-crawled URLs) and the directed edges between
//! them live behind the [`Graph`] trait. Scans take a half-open
//! `[from, to)` slice of the link ID space so independent workers can each
//! own one [`Range`] partition.

pub mod types;
pub mod error;
pub mod graph;
pub mod partition;
pub mod storage;
pub mod config;

pub use error::{BackendError, GraphError, Result};
pub use types::*;
pub use graph::{EdgeIterator, Graph, GraphIterator, Items, LinkIterator};
pub use partition::{Range, MAX_ID};
pub use storage::{InMemoryGraph, RedbGraph, RedbOptions, CURRENT_SCHEMA_VERSION};
pub use config::{BackendConfig, GraphConfig};
