use log::{debug, warn};
use rusqlite::{params, Connection, OptionalExtension};

use crate::store_db::NodeStore;
use crate::{map_db_err, Cluster, NodeId, StoreError, StoreResult, ROOT_NODE};

#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub node: NodeId,
    pub parent: NodeId,
    pub path: String,
}

/// Rollup of the versions accounted under a node for one cluster.
/// `muser` is the user of the last change that reached this row; it is
/// empty for aggregates computed on the fly (`path_statistics`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeStatistics {
    pub population: i64,
    pub size: i64,
    pub mtime: f64,
    pub muser: String,
}

/// Walk from `node` up to the root applying the delta to every statistics row
/// of `cluster`. Population is not recursive: only the first row gets it.
/// Must run inside the caller's write transaction.
pub(crate) fn update_ancestors_in(
    conn: &Connection,
    node: NodeId,
    population: i64,
    size: i64,
    mtime: f64,
    muser: Option<&str>,
    cluster: Cluster,
    max_depth: u32,
) -> StoreResult<()> {
    let mut current = node;
    let mut population = population;
    let mut hops = 0u32;

    loop {
        let prev = conn
            .query_row(
                "SELECT population, size, muser FROM statistics WHERE node = ?1 AND cluster = ?2",
                params![current as i64, cluster],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(map_db_err)?;

        match prev {
            Some((pre_population, pre_size, pre_muser)) => {
                conn.execute(
                    "UPDATE statistics SET population = ?1, size = ?2, mtime = ?3, muser = ?4
                     WHERE node = ?5 AND cluster = ?6",
                    params![
                        pre_population + population,
                        pre_size + size,
                        mtime,
                        muser.unwrap_or(pre_muser.as_str()),
                        current as i64,
                        cluster
                    ],
                )
                .map_err(map_db_err)?;
            }
            None => {
                conn.execute(
                    "INSERT INTO statistics (node, cluster, population, size, mtime, muser)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        current as i64,
                        cluster,
                        population,
                        size,
                        mtime,
                        muser.unwrap_or("")
                    ],
                )
                .map_err(map_db_err)?;
            }
        }

        if current == ROOT_NODE {
            return Ok(());
        }

        population = 0;
        hops += 1;
        if hops > max_depth {
            warn!(
                "NodeStore: ancestor walk from node {} exceeded {} hops, parent chain has a cycle",
                node, max_depth
            );
            return Err(StoreError::DataIntegrity(format!(
                "ancestor chain of node {} exceeds {} hops",
                node, max_depth
            )));
        }

        let parent = conn
            .query_row(
                "SELECT n.parent, p.node FROM nodes n LEFT JOIN nodes p ON p.node = n.parent
                 WHERE n.node = ?1",
                params![current as i64],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Option<i64>>(1)?)),
            )
            .optional()
            .map_err(map_db_err)?;
        current = match parent {
            Some((parent, Some(_))) => parent as NodeId,
            _ => {
                warn!(
                    "NodeStore: node {} on the ancestor chain of {} has no parent row",
                    current, node
                );
                return Err(StoreError::DataIntegrity(format!(
                    "node {} has no resolvable parent",
                    current
                )));
            }
        };
    }
}

impl NodeStore {
    /// Create a new node under `parent` and return its identifier.
    pub fn node_create(&self, parent: NodeId, path: &str) -> StoreResult<NodeId> {
        let node = self.with_write_txn("node_create", |conn| {
            conn.execute(
                "INSERT INTO nodes (parent, path) VALUES (?1, ?2)",
                params![parent as i64, path],
            )
            .map_err(|e| {
                warn!("NodeStore: create node {} failed! {}", path, e);
                map_db_err(e)
            })?;
            Ok(conn.last_insert_rowid() as NodeId)
        })?;
        debug!("NodeStore: created node {} path={} parent={}", node, path, parent);
        Ok(node)
    }

    /// Lookup the node of the given path.
    pub fn node_lookup(&self, path: &str) -> StoreResult<Option<NodeId>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT node FROM nodes WHERE path = ?1",
                params![path],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .map(|node| node.map(|v| v as NodeId))
            .map_err(map_db_err)
        })
    }

    pub fn node_get_properties(&self, node: NodeId) -> StoreResult<Option<NodeRecord>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT node, parent, path FROM nodes WHERE node = ?1",
                params![node as i64],
                |row| {
                    Ok(NodeRecord {
                        node: row.get::<_, i64>(0)? as NodeId,
                        parent: row.get::<_, i64>(1)? as NodeId,
                        path: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(map_db_err)
        })
    }

    /// Apply a population/size delta to `node` and all of its ancestors.
    pub fn node_update_ancestors(
        &self,
        node: NodeId,
        population: i64,
        size: i64,
        mtime: f64,
        cluster: Cluster,
    ) -> StoreResult<()> {
        let max_depth = self.max_ancestor_depth;
        self.with_write_txn("node_update_ancestors", |conn| {
            update_ancestors_in(conn, node, population, size, mtime, None, cluster, max_depth)
        })
    }

    /// Population, total size and last mtime of all versions under `node`
    /// that belong to `cluster`. Zeros when nothing was ever recorded.
    pub fn node_statistics(&self, node: NodeId, cluster: Cluster) -> StoreResult<NodeStatistics> {
        self.with_conn(|conn| {
            let stats = conn
                .query_row(
                    "SELECT population, size, mtime, muser FROM statistics
                     WHERE node = ?1 AND cluster = ?2",
                    params![node as i64, cluster],
                    |row| {
                        Ok(NodeStatistics {
                            population: row.get(0)?,
                            size: row.get(1)?,
                            mtime: row.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
                            muser: row.get(3)?,
                        })
                    },
                )
                .optional()
                .map_err(map_db_err)?;
            Ok(stats.unwrap_or_default())
        })
    }

    /// Number of direct children. The root does not count itself.
    pub fn node_children(&self, node: NodeId) -> StoreResult<u64> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(node) FROM nodes WHERE parent = ?1 AND node != ?1",
                params![node as i64],
                |row| row.get::<_, i64>(0),
            )
            .map(|count| count as u64)
            .map_err(map_db_err)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeStoreConfig;
    use tempfile::TempDir;

    fn create_test_store() -> (NodeStore, TempDir) {
        let tmp_dir = TempDir::new().unwrap();
        let db_path = tmp_dir.path().join("test.db");
        let store = NodeStore::new(db_path.to_str().unwrap()).unwrap();
        (store, tmp_dir)
    }

    #[test]
    fn test_node_create_and_lookup() {
        let (store, _tmp) = create_test_store();
        let account = store.node_create(ROOT_NODE, "alice").unwrap();
        let container = store.node_create(account, "alice/photos").unwrap();
        assert_ne!(account, ROOT_NODE);
        assert_ne!(account, container);

        assert_eq!(store.node_lookup("alice").unwrap(), Some(account));
        assert_eq!(store.node_lookup("alice/photos").unwrap(), Some(container));
        assert_eq!(store.node_lookup("bob").unwrap(), None);

        let props = store.node_get_properties(container).unwrap().unwrap();
        assert_eq!(props.parent, account);
        assert_eq!(props.path, "alice/photos");
        assert!(store.node_get_properties(9999).unwrap().is_none());
    }

    #[test]
    fn test_node_create_duplicate_path() {
        let (store, _tmp) = create_test_store();
        store.node_create(ROOT_NODE, "alice").unwrap();
        let err = store.node_create(ROOT_NODE, "alice").unwrap_err();
        assert!(err.is_constraint_violation());
    }

    #[test]
    fn test_node_create_missing_parent() {
        let (store, _tmp) = create_test_store();
        let err = store.node_create(4242, "orphan").unwrap_err();
        assert!(err.is_constraint_violation());
        assert_eq!(store.node_lookup("orphan").unwrap(), None);
    }

    #[test]
    fn test_node_children() {
        let (store, _tmp) = create_test_store();
        assert_eq!(store.node_children(ROOT_NODE).unwrap(), 0);
        let a = store.node_create(ROOT_NODE, "a").unwrap();
        store.node_create(ROOT_NODE, "b").unwrap();
        store.node_create(a, "a/1").unwrap();
        assert_eq!(store.node_children(ROOT_NODE).unwrap(), 2);
        assert_eq!(store.node_children(a).unwrap(), 1);
    }

    #[test]
    fn test_statistics_default_zero() {
        let (store, _tmp) = create_test_store();
        let stats = store.node_statistics(ROOT_NODE, 0).unwrap();
        assert_eq!(stats, NodeStatistics::default());
        let stats = store.node_statistics(777, 3).unwrap();
        assert_eq!(stats.population, 0);
        assert_eq!(stats.size, 0);
    }

    #[test]
    fn test_update_ancestors_population_not_recursive() {
        let (store, _tmp) = create_test_store();
        let a = store.node_create(ROOT_NODE, "a").unwrap();
        let b = store.node_create(a, "a/b").unwrap();

        store.node_update_ancestors(b, 1, 100, 10.0, 0).unwrap();
        store.node_update_ancestors(b, 1, 50, 11.0, 0).unwrap();

        let sb = store.node_statistics(b, 0).unwrap();
        assert_eq!((sb.population, sb.size), (2, 150));
        assert_eq!(sb.mtime, 11.0);

        let sa = store.node_statistics(a, 0).unwrap();
        assert_eq!((sa.population, sa.size), (0, 150));
        let sr = store.node_statistics(ROOT_NODE, 0).unwrap();
        assert_eq!((sr.population, sr.size), (0, 150));

        // other clusters are independent
        assert_eq!(store.node_statistics(a, 1).unwrap().size, 0);
    }

    #[test]
    fn test_update_ancestors_detects_cycle() {
        let tmp_dir = TempDir::new().unwrap();
        let config = NodeStoreConfig {
            max_ancestor_depth: 8,
            ..Default::default()
        };
        let store = NodeStore::from_config(tmp_dir.path(), &config).unwrap();
        let a = store.node_create(ROOT_NODE, "a").unwrap();
        let b = store.node_create(a, "a/b").unwrap();
        store
            .execute_raw(&format!("UPDATE nodes SET parent = {} WHERE node = {}", b, a))
            .unwrap();

        let err = store.node_update_ancestors(b, 1, 10, 1.0, 0).unwrap_err();
        assert!(matches!(err, StoreError::DataIntegrity(_)));

        // the failed walk was rolled back as a whole
        assert_eq!(store.node_statistics(b, 0).unwrap().size, 0);
    }

    #[test]
    fn test_update_ancestors_broken_chain() {
        let (store, _tmp) = create_test_store();
        let a = store.node_create(ROOT_NODE, "a").unwrap();
        let b = store.node_create(a, "a/b").unwrap();
        store
            .execute_raw(&format!(
                "PRAGMA foreign_keys = OFF; UPDATE nodes SET parent = 5000 WHERE node = {}; PRAGMA foreign_keys = ON;",
                b
            ))
            .unwrap();

        let err = store.node_update_ancestors(b, 1, 10, 1.0, 0).unwrap_err();
        assert!(matches!(err, StoreError::DataIntegrity(_)));
        assert_eq!(store.node_statistics(b, 0).unwrap().population, 0);
    }
}
