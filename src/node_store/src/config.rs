use log::warn;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{StoreError, StoreResult};

pub const DEFAULT_DB_FILE: &str = "node_store.db";
pub const DEFAULT_MAX_ANCESTOR_DEPTH: u32 = 4096;
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NodeStoreConfig {
    pub db_path: Option<PathBuf>,
    /// Upper bound on parent hops while propagating statistics.
    /// A longer walk means the parent chain contains a cycle.
    pub max_ancestor_depth: u32,
    pub busy_timeout_ms: u64,
}

impl Default for NodeStoreConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            max_ancestor_depth: DEFAULT_MAX_ANCESTOR_DEPTH,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

impl NodeStoreConfig {
    pub fn load(config_path: &Path) -> StoreResult<Self> {
        let content = std::fs::read_to_string(config_path).map_err(|e| {
            warn!(
                "NodeStoreConfig: read config {} failed! {}",
                config_path.display(),
                e
            );
            StoreError::IoError(format!("read config failed: {}", e))
        })?;
        serde_json::from_str::<NodeStoreConfig>(&content).map_err(|e| {
            warn!("NodeStoreConfig: parse config failed! {}", e);
            StoreError::InvalidParam(format!("node store config invalid: {}", e))
        })
    }

    /// Database file, defaulting to `node_store.db` under `root_dir`.
    pub fn resolve_db_path(&self, root_dir: &Path) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| root_dir.join(DEFAULT_DB_FILE))
    }
}
