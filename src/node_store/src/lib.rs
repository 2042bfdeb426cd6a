// node_store keeps a path-indexed namespace of nodes, the append-only version
// history of every node, per-version attributes and recursive per-cluster
// statistics, all inside one SQLite database.

mod attribute;
mod config;
mod filter;
mod listing;
mod node;
mod path_range;
mod store_db;
mod version;


pub use config::NodeStoreConfig;
pub use filter::{construct_filters, parse_filters, FilterComparison, FilterOp, FilterQuery};
pub use listing::{ListOptions, ListResult, ListedVersion};
pub use node::{NodeRecord, NodeStatistics};
pub use path_range::{strnextling, strprevling};
pub use store_db::NodeStore;
pub use version::{FieldValue, VersionField, VersionRecord};

use thiserror::Error;

pub type NodeId = u64;
pub type VersionSerial = u64;
pub type Cluster = u32;

/// Identifier of the root node. The root is its own parent.
pub const ROOT_NODE: NodeId = 0;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
    #[error("data integrity error: {0}")]
    DataIntegrity(String),
    #[error("invalid param: {0}")]
    InvalidParam(String),
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    #[error("db error: {0}")]
    DbError(String),
    #[error("I/O error: {0}")]
    IoError(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, StoreError::ConstraintViolation(_))
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::IoError(err.to_string())
    }
}

pub(crate) fn map_db_err(err: rusqlite::Error) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StoreError::ConstraintViolation(err.to_string())
        }
        _ => StoreError::DbError(err.to_string()),
    }
}
