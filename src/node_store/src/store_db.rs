use log::{debug, warn};
use rusqlite::{params, Connection, TransactionBehavior};
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::NodeStoreConfig;
use crate::{map_db_err, StoreError, StoreResult, ROOT_NODE};

/// Current time as fractional UNIX seconds, the unit of every `mtime`.
pub(crate) fn now_mtime() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Nodes store path organization.
/// Versions store object history.
/// Attributes store metadata.
/// Statistics store per-cluster population and size rollups.
pub struct NodeStore {
    pub db_path: String,
    pub(crate) max_ancestor_depth: u32,
    conn: Mutex<Connection>,
}

impl NodeStore {
    pub fn new(db_path: impl Into<String>) -> StoreResult<Self> {
        Self::open(db_path.into(), &NodeStoreConfig::default())
    }

    pub fn from_config(root_dir: &Path, config: &NodeStoreConfig) -> StoreResult<Self> {
        std::fs::create_dir_all(root_dir).map_err(|e| {
            warn!(
                "NodeStore: create root dir {} failed! {}",
                root_dir.display(),
                e
            );
            StoreError::IoError(format!("create root dir failed: {}", e))
        })?;
        let db_path = config.resolve_db_path(root_dir);
        Self::open(db_path.to_string_lossy().to_string(), config)
    }

    fn open(db_path: String, config: &NodeStoreConfig) -> StoreResult<Self> {
        debug!("NodeStore: open db path: {}", db_path);
        if config.max_ancestor_depth == 0 {
            return Err(StoreError::InvalidParam(
                "max_ancestor_depth must be positive".to_string(),
            ));
        }

        let conn = Connection::open(&db_path).map_err(|e| {
            warn!("NodeStore: open db failed! {}", e);
            map_db_err(e)
        })?;
        Self::init_connection(&conn, config.busy_timeout_ms)?;
        Self::create_schema(&conn)?;
        Self::ensure_root_node(&conn)?;

        Ok(Self {
            db_path,
            max_ancestor_depth: config.max_ancestor_depth,
            conn: Mutex::new(conn),
        })
    }

    fn init_connection(conn: &Connection, busy_timeout_ms: u64) -> StoreResult<()> {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(|e| {
            warn!("NodeStore: pragma failed! {}", e);
            map_db_err(e)
        })?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })
        .map_err(|e| {
            warn!("NodeStore: set journal mode failed! {}", e);
            map_db_err(e)
        })?;
        conn.busy_timeout(Duration::from_millis(busy_timeout_ms))
            .map_err(map_db_err)?;
        Ok(())
    }

    fn create_schema(conn: &Connection) -> StoreResult<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS nodes (
                node INTEGER PRIMARY KEY,
                parent INTEGER NOT NULL DEFAULT 0,
                path TEXT NOT NULL DEFAULT '',
                FOREIGN KEY (parent) REFERENCES nodes(node)
                    ON UPDATE CASCADE ON DELETE CASCADE
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_nodes_path ON nodes(path);
            CREATE INDEX IF NOT EXISTS idx_nodes_parent ON nodes(parent);

            CREATE TABLE IF NOT EXISTS statistics (
                node INTEGER NOT NULL,
                cluster INTEGER NOT NULL DEFAULT 0,
                population INTEGER NOT NULL DEFAULT 0,
                size INTEGER NOT NULL DEFAULT 0,
                mtime REAL,
                muser TEXT NOT NULL DEFAULT '',
                PRIMARY KEY (node, cluster),
                FOREIGN KEY (node) REFERENCES nodes(node)
                    ON UPDATE CASCADE ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS versions (
                serial INTEGER PRIMARY KEY AUTOINCREMENT,
                node INTEGER NOT NULL,
                size INTEGER NOT NULL DEFAULT 0,
                source INTEGER,
                mtime REAL NOT NULL,
                muser TEXT NOT NULL DEFAULT '',
                cluster INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (node) REFERENCES nodes(node)
                    ON UPDATE CASCADE ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_versions_node_mtime ON versions(node, mtime);

            CREATE TABLE IF NOT EXISTS attributes (
                serial INTEGER NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL DEFAULT '',
                PRIMARY KEY (serial, key),
                FOREIGN KEY (serial) REFERENCES versions(serial)
                    ON UPDATE CASCADE ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_attributes_key ON attributes(key, value);",
        )
        .map_err(|e| {
            warn!("NodeStore: create schema failed! {}", e);
            map_db_err(e)
        })?;
        Ok(())
    }

    fn ensure_root_node(conn: &Connection) -> StoreResult<()> {
        conn.execute(
            "INSERT OR IGNORE INTO nodes (node, parent, path) VALUES (?1, ?2, '')",
            params![ROOT_NODE as i64, ROOT_NODE as i64],
        )
        .map_err(|e| {
            warn!("NodeStore: init root node failed! {}", e);
            map_db_err(e)
        })?;
        Ok(())
    }

    /// Run `f` against the shared connection without opening a transaction.
    pub(crate) fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Internal(format!("conn lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Run `f` inside one IMMEDIATE transaction. The write lock is taken up
    /// front, so read-modify-write sequences in `f` cannot interleave with
    /// another writer. Any error rolls the whole transaction back.
    pub(crate) fn with_write_txn<T, F>(&self, op: &str, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Internal(format!("conn lock poisoned: {}", e)))?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| {
                warn!("NodeStore: {} begin transaction failed! {}", op, e);
                map_db_err(e)
            })?;

        let result = match f(&tx) {
            Ok(v) => v,
            Err(e) => {
                debug!("NodeStore: {} rolled back: {}", op, e);
                return Err(e);
            }
        };

        tx.commit().map_err(|e| {
            warn!("NodeStore: {} commit failed! {}", op, e);
            map_db_err(e)
        })?;
        Ok(result)
    }

    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> StoreResult<()> {
        self.with_conn(|conn| conn.execute_batch(sql).map_err(map_db_err))
    }
}
