use log::{debug, warn};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, TransactionBehavior};
use std::sync::Mutex;
use std::time::Duration;

use crate::ledger::Serial;
use crate::{QuotaError, QuotaResult};

/// Local mirror of one ledger commission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialRecord {
    pub serial: Serial,
    /// Not yet decided locally.
    pub pending: bool,
    pub accept: bool,
    /// The decision reached the ledger.
    pub resolved: bool,
}

impl SerialRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            serial: row.get::<_, i64>(0)? as Serial,
            pending: row.get(1)?,
            accept: row.get(2)?,
            resolved: row.get(3)?,
        })
    }

    pub fn is_undecided(&self) -> bool {
        self.pending && !self.resolved
    }
}

pub(crate) fn map_db_err(err: rusqlite::Error) -> QuotaError {
    QuotaError::DbError(err.to_string())
}

fn serial_args(serials: &[Serial]) -> (String, Vec<Value>) {
    let marks = vec!["?"; serials.len()].join(",");
    let args = serials.iter().map(|s| Value::Integer(*s as i64)).collect();
    (marks, args)
}

/// Serial records and the resource each unresolved serial is attached to.
pub struct SerialDB {
    pub db_path: String,
    conn: Mutex<Connection>,
}

impl SerialDB {
    pub fn new(db_path: impl Into<String>) -> QuotaResult<Self> {
        let db_path = db_path.into();
        debug!("SerialDB: open db path: {}", db_path);
        let conn = Connection::open(&db_path).map_err(|e| {
            warn!("SerialDB: open db failed! {}", e);
            map_db_err(e)
        })?;
        Self::init_connection(&conn)?;
        Self::create_schema(&conn)?;
        Ok(Self {
            db_path,
            conn: Mutex::new(conn),
        })
    }

    fn init_connection(conn: &Connection) -> QuotaResult<()> {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(|e| {
            warn!("SerialDB: pragma failed! {}", e);
            map_db_err(e)
        })?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })
        .map_err(map_db_err)?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(map_db_err)?;
        Ok(())
    }

    fn create_schema(conn: &Connection) -> QuotaResult<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS serials (
                serial INTEGER PRIMARY KEY,
                pending INTEGER NOT NULL DEFAULT 1,
                accept INTEGER NOT NULL DEFAULT 0,
                resolved INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS resource_serials (
                resource_id TEXT PRIMARY KEY,
                serial INTEGER NOT NULL,
                FOREIGN KEY (serial) REFERENCES serials(serial)
                    ON UPDATE CASCADE ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_resource_serials_serial ON resource_serials(serial);",
        )
        .map_err(|e| {
            warn!("SerialDB: create schema failed! {}", e);
            map_db_err(e)
        })?;
        Ok(())
    }

    fn lock(&self) -> QuotaResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| QuotaError::Internal(format!("conn lock poisoned: {}", e)))
    }

    /// Record a freshly issued serial. Auto accepted serials are stored as
    /// already resolved.
    pub fn create_serial(&self, serial: Serial, auto_accept: bool) -> QuotaResult<SerialRecord> {
        let record = SerialRecord {
            serial,
            pending: !auto_accept,
            accept: auto_accept,
            resolved: auto_accept,
        };
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO serials (serial, pending, accept, resolved) VALUES (?1, ?2, ?3, ?4)",
            params![
                serial as i64,
                record.pending,
                record.accept,
                record.resolved
            ],
        )
        .map_err(|e| {
            warn!("SerialDB: insert serial {} failed! {}", serial, e);
            map_db_err(e)
        })?;
        Ok(record)
    }

    pub fn get_serial(&self, serial: Serial) -> QuotaResult<Option<SerialRecord>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT serial, pending, accept, resolved FROM serials WHERE serial = ?1",
            params![serial as i64],
            SerialRecord::from_row,
        )
        .optional()
        .map_err(map_db_err)
    }

    /// The serial currently attached to the resource.
    pub fn resource_serial(&self, resource_id: &str) -> QuotaResult<Option<SerialRecord>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT s.serial, s.pending, s.accept, s.resolved
             FROM resource_serials r JOIN serials s ON s.serial = r.serial
             WHERE r.resource_id = ?1",
            params![resource_id],
            SerialRecord::from_row,
        )
        .optional()
        .map_err(map_db_err)
    }

    pub fn attach(&self, resource_id: &str, serial: Serial) -> QuotaResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO resource_serials (resource_id, serial) VALUES (?1, ?2)",
            params![resource_id, serial as i64],
        )
        .map_err(|e| {
            warn!(
                "SerialDB: attach serial {} to {} failed! {}",
                serial, resource_id, e
            );
            map_db_err(e)
        })?;
        Ok(())
    }

    pub fn detach(&self, resource_id: &str) -> QuotaResult<bool> {
        let conn = self.lock()?;
        let removed = conn
            .execute(
                "DELETE FROM resource_serials WHERE resource_id = ?1",
                params![resource_id],
            )
            .map_err(map_db_err)?;
        Ok(removed > 0)
    }

    /// Detach every resource holding one of `serials`.
    pub fn detach_serials(&self, serials: &[Serial]) -> QuotaResult<usize> {
        if serials.is_empty() {
            return Ok(0);
        }
        let (marks, args) = serial_args(serials);
        let conn = self.lock()?;
        conn.execute(
            &format!("DELETE FROM resource_serials WHERE serial IN ({})", marks),
            params_from_iter(args.iter()),
        )
        .map_err(|e| {
            warn!("SerialDB: detach serials failed! {}", e);
            map_db_err(e)
        })
    }

    /// Record the local decision without resolving it at the ledger.
    pub fn decide(&self, serial: Serial, accept: bool) -> QuotaResult<()> {
        let conn = self.lock()?;
        let updated = conn
            .execute(
                "UPDATE serials SET pending = 0, accept = ?1 WHERE serial = ?2",
                params![accept, serial as i64],
            )
            .map_err(map_db_err)?;
        if updated == 0 {
            return Err(QuotaError::NotFound(format!("serial {}", serial)));
        }
        Ok(())
    }

    pub fn mark_resolved(&self, serials: &[Serial], accept: bool) -> QuotaResult<usize> {
        if serials.is_empty() {
            return Ok(0);
        }
        let (marks, mut args) = serial_args(serials);
        args.insert(0, Value::Integer(accept as i64));
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(map_db_err)?;
        let updated = tx
            .execute(
                &format!(
                    "UPDATE serials SET accept = ?, pending = 0, resolved = 1 WHERE serial IN ({})",
                    marks
                ),
                params_from_iter(args.iter()),
            )
            .map_err(|e| {
                warn!("SerialDB: mark serials resolved failed! {}", e);
                map_db_err(e)
            })?;
        tx.commit().map_err(map_db_err)?;
        Ok(updated)
    }

    /// Decided serials numerically at or above `min_serial`.
    pub fn decided_since(&self, min_serial: Serial) -> QuotaResult<Vec<SerialRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT serial, pending, accept, resolved FROM serials
                 WHERE serial >= ?1 AND pending = 0 ORDER BY serial",
            )
            .map_err(map_db_err)?;
        let rows = stmt
            .query_map(params![min_serial as i64], SerialRecord::from_row)
            .map_err(map_db_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(map_db_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_db() -> (SerialDB, TempDir) {
        let tmp_dir = TempDir::new().unwrap();
        let db_path = tmp_dir.path().join("serials.db");
        let db = SerialDB::new(db_path.to_str().unwrap()).unwrap();
        (db, tmp_dir)
    }

    #[test]
    fn test_create_and_attach() {
        let (db, _tmp) = create_test_db();
        let record = db.create_serial(10, false).unwrap();
        assert!(record.is_undecided());
        db.attach("vm:1", 10).unwrap();

        assert_eq!(db.resource_serial("vm:1").unwrap(), Some(record));
        assert_eq!(db.resource_serial("vm:2").unwrap(), None);

        let auto = db.create_serial(11, true).unwrap();
        assert!(auto.resolved && auto.accept && !auto.pending);
        assert_eq!(db.get_serial(11).unwrap(), Some(auto));

        assert!(db.detach("vm:1").unwrap());
        assert!(!db.detach("vm:1").unwrap());
        assert!(db.resource_serial("vm:1").unwrap().is_none());
        // the serial record outlives the attachment
        assert!(db.get_serial(10).unwrap().is_some());
    }

    #[test]
    fn test_duplicate_serial_fails() {
        let (db, _tmp) = create_test_db();
        db.create_serial(1, false).unwrap();
        assert!(matches!(
            db.create_serial(1, false).unwrap_err(),
            QuotaError::DbError(_)
        ));
        assert!(db.attach("vm:1", 99).is_err());
    }

    #[test]
    fn test_decide_and_resolve() {
        let (db, _tmp) = create_test_db();
        for serial in [3, 4, 5] {
            db.create_serial(serial, false).unwrap();
        }
        db.decide(3, true).unwrap();
        let decided = db.get_serial(3).unwrap().unwrap();
        assert!(!decided.pending && decided.accept && !decided.resolved);
        assert!(db.decide(42, true).unwrap_err().to_string().contains("42"));

        assert_eq!(db.mark_resolved(&[3, 4], false).unwrap(), 2);
        let rejected = db.get_serial(4).unwrap().unwrap();
        assert!(rejected.resolved && !rejected.accept && !rejected.pending);
        assert_eq!(db.mark_resolved(&[], true).unwrap(), 0);

        let since: Vec<Serial> = db
            .decided_since(4)
            .unwrap()
            .into_iter()
            .map(|r| r.serial)
            .collect();
        assert_eq!(since, vec![4]);
    }

    #[test]
    fn test_detach_serials() {
        let (db, _tmp) = create_test_db();
        for serial in [1, 2, 3] {
            db.create_serial(serial, false).unwrap();
            db.attach(&format!("vm:{}", serial), serial).unwrap();
        }
        assert_eq!(db.detach_serials(&[1, 3, 7]).unwrap(), 2);
        assert!(db.resource_serial("vm:1").unwrap().is_none());
        assert!(db.resource_serial("vm:2").unwrap().is_some());
        assert_eq!(db.detach_serials(&[]).unwrap(), 0);
    }
}
