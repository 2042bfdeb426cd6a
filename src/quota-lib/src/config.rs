use log::warn;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{QuotaError, QuotaResult};

pub const DEFAULT_SERIAL_DB_FILE: &str = "quota_serials.db";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QuotaConfig {
    /// Base url of the quotaholder ledger service.
    pub ledger_url: String,
    pub service_token: String,
    /// Tag put in every commission name.
    pub client_name: String,
    /// Extra attempts for transient ledger failures.
    pub retry: u32,
    pub timeout_secs: u64,
    pub reconcile_interval_secs: u64,
    pub db_path: Option<PathBuf>,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            ledger_url: "http://127.0.0.1:8000/quotaholder".to_string(),
            service_token: String::new(),
            client_name: "api".to_string(),
            retry: 3,
            timeout_secs: 30,
            reconcile_interval_secs: 300,
            db_path: None,
        }
    }
}

impl QuotaConfig {
    pub fn load(config_path: &Path) -> QuotaResult<Self> {
        let content = std::fs::read_to_string(config_path).map_err(|e| {
            warn!(
                "QuotaConfig: read config {} failed! {}",
                config_path.display(),
                e
            );
            QuotaError::IoError(format!("read config failed: {}", e))
        })?;
        let config = serde_json::from_str::<QuotaConfig>(&content).map_err(|e| {
            warn!("QuotaConfig: parse config failed! {}", e);
            QuotaError::InvalidParam(format!("quota config invalid: {}", e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> QuotaResult<()> {
        if self.ledger_url.is_empty() {
            return Err(QuotaError::InvalidParam("ledger_url is empty".to_string()));
        }
        if self.timeout_secs == 0 || self.reconcile_interval_secs == 0 {
            return Err(QuotaError::InvalidParam(
                "timeout_secs and reconcile_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn resolve_db_path(&self, root_dir: &Path) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| root_dir.join(DEFAULT_SERIAL_DB_FILE))
    }
}
