use crate::error::{GraphError, Result};
use crate::graph::Graph;
use crate::storage::{InMemoryGraph, RedbGraph, RedbOptions, DEFAULT_SCAN_PAGE_SIZE};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Selects and tunes the link graph backend.
///
/// ```toml
/// [backend]
/// type = "redb"
/// path = "./data/linkgraph.redb"
/// scan_page_size = 512
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct GraphConfig {
    #[serde(default)]
    pub backend: BackendConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    /// Volatile graph, lost on drop.
    #[default]
    Memory,
    /// Graph persisted in a redb file.
    Redb {
        path: PathBuf,
        /// Member keys a scan pulls from its snapshot at a time. Default: 256.
        #[serde(default = "default_scan_page_size")]
        scan_page_size: usize,
    },
}

fn default_scan_page_size() -> usize {
    DEFAULT_SCAN_PAGE_SIZE
}

impl GraphConfig {
    pub fn memory() -> Self {
        Self {
            backend: BackendConfig::Memory,
        }
    }

    pub fn redb(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: BackendConfig::Redb {
                path: path.into(),
                scan_page_size: DEFAULT_SCAN_PAGE_SIZE,
            },
        }
    }

    /// Set the scan batch size. No effect on the memory backend.
    pub fn with_scan_page_size(mut self, size: usize) -> Self {
        if let BackendConfig::Redb { scan_page_size, .. } = &mut self.backend {
            *scan_page_size = size;
        }
        self
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(s).map_err(|e| GraphError::Config(format!("invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            GraphError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| GraphError::Config(format!("cannot serialize config: {}", e)))
    }

    pub fn validate(&self) -> Result<()> {
        match &self.backend {
            BackendConfig::Memory => Ok(()),
            BackendConfig::Redb {
                path,
                scan_page_size,
            } => {
                if path.as_os_str().is_empty() {
                    return Err(GraphError::Config("redb path must not be empty".to_string()));
                }
                if *scan_page_size == 0 {
                    return Err(GraphError::Config(
                        "scan_page_size must be greater than zero".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Build the configured backend.
    pub fn open(&self) -> Result<Box<dyn Graph>> {
        self.validate()?;
        match &self.backend {
            BackendConfig::Memory => {
                log::info!("using in-memory link graph");
                Ok(Box::new(InMemoryGraph::new()))
            }
            BackendConfig::Redb {
                path,
                scan_page_size,
            } => {
                let options = RedbOptions {
                    scan_page_size: *scan_page_size,
                };
                Ok(Box::new(RedbGraph::open_with(path, options)?))
            }
        }
    }
}
