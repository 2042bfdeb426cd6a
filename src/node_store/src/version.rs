use log::{debug, info, warn};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::str::FromStr;

use crate::attribute::attribute_copy_in;
use crate::node::{update_ancestors_in, NodeStatistics};
use crate::path_range::strnextling;
use crate::store_db::{now_mtime, NodeStore};
use crate::{map_db_err, Cluster, NodeId, StoreError, StoreResult, VersionSerial};

pub(crate) const VERSION_COLUMNS: &str = "serial, node, size, source, mtime, muser, cluster";

#[derive(Debug, Clone, PartialEq)]
pub struct VersionRecord {
    pub serial: VersionSerial,
    pub node: NodeId,
    pub size: i64,
    pub source: Option<VersionSerial>,
    pub mtime: f64,
    pub muser: String,
    pub cluster: Cluster,
}

/// Stored version columns, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionField {
    Serial,
    Node,
    Size,
    Source,
    Mtime,
    Muser,
    Cluster,
}

impl VersionField {
    pub const ALL: [VersionField; 7] = [
        VersionField::Serial,
        VersionField::Node,
        VersionField::Size,
        VersionField::Source,
        VersionField::Mtime,
        VersionField::Muser,
        VersionField::Cluster,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VersionField::Serial => "serial",
            VersionField::Node => "node",
            VersionField::Size => "size",
            VersionField::Source => "source",
            VersionField::Mtime => "mtime",
            VersionField::Muser => "muser",
            VersionField::Cluster => "cluster",
        }
    }
}

impl FromStr for VersionField {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VersionField::ALL
            .iter()
            .find(|field| field.as_str() == s)
            .copied()
            .ok_or_else(|| StoreError::InvalidParam(format!("unknown version field: {}", s)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Integer(i64),
    Real(f64),
    Text(String),
    Null,
}

impl VersionRecord {
    pub(crate) fn from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            serial: row.get::<_, i64>(offset)? as VersionSerial,
            node: row.get::<_, i64>(offset + 1)? as NodeId,
            size: row.get(offset + 2)?,
            source: row
                .get::<_, Option<i64>>(offset + 3)?
                .map(|v| v as VersionSerial),
            mtime: row.get(offset + 4)?,
            muser: row.get(offset + 5)?,
            cluster: row.get(offset + 6)?,
        })
    }

    pub fn field(&self, field: VersionField) -> FieldValue {
        match field {
            VersionField::Serial => FieldValue::Integer(self.serial as i64),
            VersionField::Node => FieldValue::Integer(self.node as i64),
            VersionField::Size => FieldValue::Integer(self.size),
            VersionField::Source => match self.source {
                Some(source) => FieldValue::Integer(source as i64),
                None => FieldValue::Null,
            },
            VersionField::Mtime => FieldValue::Real(self.mtime),
            VersionField::Muser => FieldValue::Text(self.muser.clone()),
            VersionField::Cluster => FieldValue::Integer(self.cluster as i64),
        }
    }

    /// Values of `keys` in the order given; all columns when `keys` is empty.
    pub fn project(&self, keys: &[VersionField]) -> Vec<FieldValue> {
        let keys = if keys.is_empty() {
            &VersionField::ALL[..]
        } else {
            keys
        };
        keys.iter().map(|key| self.field(*key)).collect()
    }
}

pub(crate) fn version_get_in(
    conn: &Connection,
    serial: VersionSerial,
) -> StoreResult<Option<VersionRecord>> {
    conn.query_row(
        &format!("SELECT {} FROM versions WHERE serial = ?1", VERSION_COLUMNS),
        params![serial as i64],
        |row| VersionRecord::from_row(row, 0),
    )
    .optional()
    .map_err(map_db_err)
}

fn version_insert_in(
    conn: &Connection,
    node: NodeId,
    size: i64,
    source: Option<VersionSerial>,
    muser: &str,
    cluster: Cluster,
    max_depth: u32,
) -> StoreResult<(VersionSerial, f64)> {
    if size < 0 {
        return Err(StoreError::InvalidParam(format!(
            "version size must not be negative: {}",
            size
        )));
    }

    let mtime = now_mtime();
    conn.execute(
        "INSERT INTO versions (node, size, source, mtime, muser, cluster)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            node as i64,
            size,
            source.map(|v| v as i64),
            mtime,
            muser,
            cluster
        ],
    )
    .map_err(|e| {
        warn!("NodeStore: insert version for node {} failed! {}", node, e);
        map_db_err(e)
    })?;
    let serial = conn.last_insert_rowid() as VersionSerial;
    update_ancestors_in(conn, node, 1, size, mtime, Some(muser), cluster, max_depth)?;
    Ok((serial, mtime))
}

impl NodeStore {
    /// Append a new version of `node` and account it in the statistics of
    /// the node and all its ancestors. Both happen in one transaction.
    pub fn version_create(
        &self,
        node: NodeId,
        size: i64,
        source: Option<VersionSerial>,
        muser: &str,
        cluster: Cluster,
    ) -> StoreResult<(VersionSerial, f64)> {
        let max_depth = self.max_ancestor_depth;
        let (serial, mtime) = self.with_write_txn("version_create", |conn| {
            version_insert_in(conn, node, size, source, muser, cluster, max_depth)
        })?;
        debug!(
            "NodeStore: created version {} node={} size={} cluster={}",
            serial, node, size, cluster
        );
        Ok((serial, mtime))
    }

    /// The version of `node` that was current as of `before` (the latest
    /// version when `None`), provided it belongs to `cluster`.
    pub fn version_lookup(
        &self,
        node: NodeId,
        before: Option<f64>,
        cluster: Cluster,
    ) -> StoreResult<Option<VersionRecord>> {
        self.with_conn(|conn| {
            let mut args: Vec<Value> = vec![Value::Integer(node as i64)];
            let mut q = format!(
                "SELECT {} FROM versions
                 WHERE serial = (SELECT MAX(serial) FROM versions WHERE node = ?1",
                VERSION_COLUMNS
            );
            if let Some(before) = before {
                q.push_str(" AND mtime < ?2) AND cluster = ?3");
                args.push(Value::Real(before));
            } else {
                q.push_str(") AND cluster = ?2");
            }
            args.push(Value::Integer(cluster as i64));

            conn.query_row(&q, params_from_iter(args.iter()), |row| {
                VersionRecord::from_row(row, 0)
            })
            .optional()
            .map_err(map_db_err)
        })
    }

    pub fn version_get(&self, serial: VersionSerial) -> StoreResult<Option<VersionRecord>> {
        self.with_conn(|conn| version_get_in(conn, serial))
    }

    /// Values for `keys` of the version, in the order given.
    /// An empty `keys` returns every column in canonical order.
    pub fn version_get_properties(
        &self,
        serial: VersionSerial,
        keys: &[VersionField],
    ) -> StoreResult<Option<Vec<FieldValue>>> {
        let record = self.version_get(serial)?;
        Ok(record.map(|r| r.project(keys)))
    }

    /// Move the version into another cluster, moving its statistics
    /// contribution along with it.
    pub fn version_recluster(&self, serial: VersionSerial, cluster: Cluster) -> StoreResult<()> {
        let max_depth = self.max_ancestor_depth;
        let moved = self.with_write_txn("version_recluster", |conn| {
            let record = version_get_in(conn, serial)?
                .ok_or_else(|| StoreError::NotFound(format!("version not found: {}", serial)))?;
            if record.cluster == cluster {
                return Ok(None);
            }

            update_ancestors_in(
                conn,
                record.node,
                -1,
                -record.size,
                record.mtime,
                None,
                record.cluster,
                max_depth,
            )?;
            update_ancestors_in(
                conn,
                record.node,
                1,
                record.size,
                record.mtime,
                None,
                cluster,
                max_depth,
            )?;
            conn.execute(
                "UPDATE versions SET cluster = ?1 WHERE serial = ?2",
                params![cluster, serial as i64],
            )
            .map_err(map_db_err)?;
            Ok(Some(record.cluster))
        })?;

        if let Some(from) = moved {
            info!(
                "NodeStore: version {} moved from cluster {} to {}",
                serial, from, cluster
            );
        }
        Ok(())
    }

    /// Copy the version into a new version of `node`, optionally with its
    /// attributes. Returns `None` when the source version does not exist.
    pub fn version_copy(
        &self,
        serial: VersionSerial,
        node: NodeId,
        muser: &str,
        copy_attributes: bool,
    ) -> StoreResult<Option<(VersionSerial, f64)>> {
        let max_depth = self.max_ancestor_depth;
        self.with_write_txn("version_copy", |conn| {
            let Some(source) = version_get_in(conn, serial)? else {
                return Ok(None);
            };
            let (new_serial, mtime) = version_insert_in(
                conn,
                node,
                source.size,
                Some(serial),
                muser,
                source.cluster,
                max_depth,
            )?;
            if copy_attributes {
                attribute_copy_in(conn, serial, new_serial)?;
            }
            Ok(Some((new_serial, mtime)))
        })
    }

    /// Population, total size and last mtime of the latest versions of every
    /// path under `prefix` that do not belong to `except_cluster`.
    pub fn path_statistics(
        &self,
        prefix: &str,
        before: Option<f64>,
        except_cluster: Cluster,
    ) -> StoreResult<NodeStatistics> {
        self.with_conn(|conn| {
            let mut args: Vec<Value> = Vec::new();
            let mut q = String::from(
                "SELECT COUNT(serial), SUM(size), MAX(mtime) FROM versions v
                 WHERE serial = (SELECT MAX(serial) FROM versions WHERE node = v.node",
            );
            if let Some(before) = before {
                q.push_str(" AND mtime < ?");
                args.push(Value::Real(before));
            }
            q.push_str(") AND cluster != ? AND node IN (SELECT node FROM nodes WHERE path >= ?");
            args.push(Value::Integer(except_cluster as i64));
            args.push(Value::Text(prefix.to_string()));
            if let Some(upper) = strnextling(prefix) {
                q.push_str(" AND path < ?");
                args.push(Value::Text(upper));
            }
            q.push(')');

            conn.query_row(&q, params_from_iter(args.iter()), |row| {
                Ok(NodeStatistics {
                    population: row.get(0)?,
                    size: row.get::<_, Option<i64>>(1)?.unwrap_or(0),
                    mtime: row.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
                    muser: String::new(),
                })
            })
            .map_err(map_db_err)
        })
    }
}
