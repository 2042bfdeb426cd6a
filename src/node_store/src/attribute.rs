use log::warn;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};

use crate::store_db::NodeStore;
use crate::{map_db_err, NodeId, StoreResult, VersionSerial};

pub(crate) fn attribute_copy_in(
    conn: &Connection,
    source: VersionSerial,
    dest: VersionSerial,
) -> StoreResult<usize> {
    conn.execute(
        "INSERT OR REPLACE INTO attributes (serial, key, value)
         SELECT ?1, key, value FROM attributes WHERE serial = ?2",
        params![dest as i64, source as i64],
    )
    .map_err(|e| {
        warn!(
            "NodeStore: copy attributes {} -> {} failed! {}",
            source, dest, e
        );
        map_db_err(e)
    })
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(",")
}

impl NodeStore {
    /// Key/value pairs of the version, ordered by key.
    /// An empty `keys` returns every attribute.
    pub fn attribute_get(
        &self,
        serial: VersionSerial,
        keys: &[&str],
    ) -> StoreResult<Vec<(String, String)>> {
        self.with_conn(|conn| {
            let mut args: Vec<Value> = vec![Value::Integer(serial as i64)];
            let mut q = String::from("SELECT key, value FROM attributes WHERE serial = ?");
            if !keys.is_empty() {
                q.push_str(&format!(" AND key IN ({})", placeholders(keys.len())));
                args.extend(keys.iter().map(|k| Value::Text(k.to_string())));
            }
            q.push_str(" ORDER BY key");

            let mut stmt = conn.prepare(&q).map_err(map_db_err)?;
            let rows = stmt
                .query_map(params_from_iter(args.iter()), |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })
                .map_err(map_db_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(map_db_err)
        })
    }

    /// Upsert the given attributes of the version.
    pub fn attribute_set(&self, serial: VersionSerial, items: &[(&str, &str)]) -> StoreResult<()> {
        self.with_write_txn("attribute_set", |conn| {
            let mut stmt = conn
                .prepare(
                    "INSERT OR REPLACE INTO attributes (serial, key, value) VALUES (?1, ?2, ?3)",
                )
                .map_err(map_db_err)?;
            for (key, value) in items {
                stmt.execute(params![serial as i64, key, value]).map_err(|e| {
                    warn!(
                        "NodeStore: set attribute {} of version {} failed! {}",
                        key, serial, e
                    );
                    map_db_err(e)
                })?;
            }
            Ok(())
        })
    }

    /// Delete the given attributes of the version, or all of them when
    /// `keys` is empty. Returns the number of removed attributes.
    pub fn attribute_del(&self, serial: VersionSerial, keys: &[&str]) -> StoreResult<usize> {
        self.with_write_txn("attribute_del", |conn| {
            if keys.is_empty() {
                return conn
                    .execute(
                        "DELETE FROM attributes WHERE serial = ?1",
                        params![serial as i64],
                    )
                    .map_err(map_db_err);
            }

            let mut stmt = conn
                .prepare("DELETE FROM attributes WHERE serial = ?1 AND key = ?2")
                .map_err(map_db_err)?;
            let mut removed = 0;
            for key in keys {
                removed += stmt
                    .execute(params![serial as i64, key])
                    .map_err(map_db_err)?;
            }
            Ok(removed)
        })
    }

    /// Copy every attribute of `source` onto `dest`, replacing equal keys.
    pub fn attribute_copy(&self, source: VersionSerial, dest: VersionSerial) -> StoreResult<usize> {
        self.with_write_txn("attribute_copy", |conn| {
            attribute_copy_in(conn, source, dest)
        })
    }

    /// Distinct attribute keys used by any version of the direct children
    /// of `parent`.
    pub fn attribute_keys_under(&self, parent: NodeId) -> StoreResult<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT DISTINCT a.key FROM attributes a
                     JOIN versions v ON a.serial = v.serial
                     JOIN nodes n ON v.node = n.node
                     WHERE n.parent = ?1 AND n.node != ?1
                     ORDER BY a.key",
                )
                .map_err(map_db_err)?;
            let rows = stmt
                .query_map(params![parent as i64], |row| row.get::<_, String>(0))
                .map_err(map_db_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(map_db_err)
        })
    }
}
