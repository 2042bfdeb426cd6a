use log::debug;
use rusqlite::params_from_iter;
use rusqlite::types::Value;

use crate::filter::parse_filters;
use crate::path_range::{strnextling, strprevling};
use crate::store_db::NodeStore;
use crate::version::VersionRecord;
use crate::{map_db_err, Cluster, NodeId, StoreError, StoreResult};

pub const DEFAULT_LIST_LIMIT: usize = 10000;

#[derive(Debug, Clone, PartialEq)]
pub struct ListOptions {
    /// Only paths starting with this prefix are listed.
    pub prefix: String,
    /// Only paths strictly after this one are listed.
    pub start: String,
    /// Paths with the delimiter after the prefix are folded into one
    /// virtual directory, which is reported once in `ListResult::prefixes`.
    pub delimiter: Option<String>,
    /// List the versions that were current at this time; latest when `None`.
    pub before: Option<f64>,
    pub cluster: Cluster,
    pub filterq: Option<String>,
    /// Upper bound on listed versions plus prefixes.
    pub limit: usize,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            start: String::new(),
            delimiter: None,
            before: None,
            cluster: 0,
            filterq: None,
            limit: DEFAULT_LIST_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListedVersion {
    pub path: String,
    pub version: VersionRecord,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListResult {
    pub versions: Vec<ListedVersion>,
    pub prefixes: Vec<String>,
}

enum LowerBound {
    Exclusive(String),
    Inclusive(String),
}

impl NodeStore {
    /// List the current versions of the children of `parent`, ordered by path.
    pub fn latest_version_list(
        &self,
        parent: NodeId,
        opts: &ListOptions,
    ) -> StoreResult<ListResult> {
        if opts.delimiter.as_deref() == Some("") {
            return Err(StoreError::InvalidParam(
                "delimiter must not be empty".to_string(),
            ));
        }
        let filter = match opts.filterq.as_deref() {
            Some(q) => parse_filters(q)?.compile("v.serial"),
            None => None,
        };

        let mut result = ListResult::default();
        if opts.limit == 0 {
            return Ok(result);
        }

        let prefix = opts.prefix.as_str();
        let upper = strnextling(prefix);
        let mut lower = if opts.start.as_str() < prefix {
            LowerBound::Exclusive(strprevling(prefix))
        } else {
            LowerBound::Exclusive(opts.start.clone())
        };

        self.with_conn(|conn| {
            let mut count = 0usize;
            'scan: loop {
                let mut args: Vec<Value> = vec![Value::Integer(parent as i64)];
                let mut q = String::from(
                    "SELECT n.path, v.serial, v.node, v.size, v.source, v.mtime, v.muser, v.cluster
                     FROM nodes n JOIN versions v ON v.node = n.node
                     WHERE n.parent = ? AND n.node != n.parent",
                );
                match &lower {
                    LowerBound::Exclusive(s) => {
                        q.push_str(" AND n.path > ?");
                        args.push(Value::Text(s.clone()));
                    }
                    LowerBound::Inclusive(s) => {
                        q.push_str(" AND n.path >= ?");
                        args.push(Value::Text(s.clone()));
                    }
                }
                if let Some(upper) = &upper {
                    q.push_str(" AND n.path < ?");
                    args.push(Value::Text(upper.clone()));
                }
                q.push_str(" AND v.serial = (SELECT MAX(serial) FROM versions WHERE node = n.node");
                if let Some(before) = opts.before {
                    q.push_str(" AND mtime < ?");
                    args.push(Value::Real(before));
                }
                q.push_str(") AND v.cluster = ?");
                args.push(Value::Integer(opts.cluster as i64));
                if let Some((pred, filter_args)) = &filter {
                    q.push_str(" AND ");
                    q.push_str(pred);
                    args.extend(filter_args.iter().cloned());
                }
                q.push_str(" ORDER BY n.path");

                let mut stmt = conn.prepare(&q).map_err(map_db_err)?;
                let mut rows = stmt
                    .query(params_from_iter(args.iter()))
                    .map_err(map_db_err)?;

                let mut next_start = None;
                while let Some(row) = rows.next().map_err(map_db_err)? {
                    let path: String = row.get(0).map_err(map_db_err)?;
                    let Some(rest) = path.strip_prefix(prefix) else {
                        continue;
                    };
                    let split = opts
                        .delimiter
                        .as_deref()
                        .and_then(|d| rest.find(d).map(|idx| prefix.len() + idx + d.len()));
                    let version = VersionRecord::from_row(row, 1).map_err(map_db_err)?;

                    match split {
                        None => {
                            result.versions.push(ListedVersion { path, version });
                            count += 1;
                            if count >= opts.limit {
                                break 'scan;
                            }
                        }
                        Some(end) => {
                            let pf = path[..end].to_string();
                            result.prefixes.push(pf.clone());
                            count += 1;
                            // the path is the virtual directory itself
                            if end == path.len() {
                                result.versions.push(ListedVersion { path, version });
                                count += 1;
                            }
                            if count >= opts.limit {
                                break 'scan;
                            }
                            next_start = Some(pf);
                            break;
                        }
                    }
                }

                match next_start.and_then(|pf| strnextling(&pf)) {
                    Some(next) => lower = LowerBound::Inclusive(next),
                    None => break,
                }
            }
            Ok(())
        })?;

        debug!(
            "NodeStore: listed parent {} prefix {:?}: {} versions, {} prefixes",
            parent,
            prefix,
            result.versions.len(),
            result.prefixes.len()
        );
        Ok(result)
    }
}
