// Attribute filter queries.
//
// A query is a comma separated list of terms:
//   key           an attribute with this key must exist
//   !key          an attribute with this key must not exist
//   key OP value  the attribute with this key compares to value,
//                 OP is one of = != <= >= < >
// All terms must hold for a version to match.

use log::debug;
use regex::Regex;
use rusqlite::types::Value;
use std::fmt;

use crate::{StoreError, StoreResult};

const FILTER_TERM_PATTERN: &str = r"^\s*(!)?\s*([\w-]+)\s*(?:(!=|<=|>=|=|<|>)\s*(.*?))?\s*$";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Le,
    Ge,
    Lt,
    Gt,
}

impl FilterOp {
    fn parse(op: &str) -> Option<Self> {
        match op {
            "=" => Some(FilterOp::Eq),
            "!=" => Some(FilterOp::Ne),
            "<=" => Some(FilterOp::Le),
            ">=" => Some(FilterOp::Ge),
            "<" => Some(FilterOp::Lt),
            ">" => Some(FilterOp::Gt),
            _ => None,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Ne => "!=",
            FilterOp::Le => "<=",
            FilterOp::Ge => ">=",
            FilterOp::Lt => "<",
            FilterOp::Gt => ">",
        }
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterComparison {
    pub key: String,
    pub op: FilterOp,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterQuery {
    pub included: Vec<String>,
    pub excluded: Vec<String>,
    pub comparisons: Vec<FilterComparison>,
}

impl FilterQuery {
    pub fn is_empty(&self) -> bool {
        self.included.is_empty() && self.excluded.is_empty() && self.comparisons.is_empty()
    }

    /// SQL predicate over `serial_col` plus its positional arguments.
    /// `None` when the query has no terms.
    pub fn compile(&self, serial_col: &str) -> Option<(String, Vec<Value>)> {
        if self.is_empty() {
            return None;
        }

        let mut preds = Vec::new();
        let mut args = Vec::new();
        for key in &self.included {
            preds.push(format!(
                "{} IN (SELECT serial FROM attributes WHERE key = ?)",
                serial_col
            ));
            args.push(Value::Text(key.clone()));
        }
        for key in &self.excluded {
            preds.push(format!(
                "{} NOT IN (SELECT serial FROM attributes WHERE key = ?)",
                serial_col
            ));
            args.push(Value::Text(key.clone()));
        }
        for cmp in &self.comparisons {
            preds.push(format!(
                "{} IN (SELECT serial FROM attributes WHERE key = ? AND value {} ?)",
                serial_col,
                cmp.op.as_sql()
            ));
            args.push(Value::Text(cmp.key.clone()));
            args.push(Value::Text(cmp.value.clone()));
        }

        Some((format!("({})", preds.join(" AND ")), args))
    }
}

pub fn parse_filters(filterq: &str) -> StoreResult<FilterQuery> {
    let term_re = Regex::new(FILTER_TERM_PATTERN)
        .map_err(|e| StoreError::Internal(format!("filter pattern: {}", e)))?;

    let mut query = FilterQuery::default();
    for term in filterq.split(',') {
        if term.trim().is_empty() {
            continue;
        }

        let caps = term_re
            .captures(term)
            .ok_or_else(|| StoreError::InvalidFilter(format!("malformed term: {:?}", term)))?;
        let negated = caps.get(1).is_some();
        let key = caps[2].to_string();
        let op = caps.get(3).map(|m| m.as_str());
        let value = caps.get(4).map(|m| m.as_str()).unwrap_or("");

        match (negated, op) {
            (true, None) => query.excluded.push(key),
            (true, Some(_)) => {
                return Err(StoreError::InvalidFilter(format!(
                    "negated term takes no operator: {:?}",
                    term
                )));
            }
            (false, None) => query.included.push(key),
            (false, Some(op)) => {
                if value.is_empty() {
                    return Err(StoreError::InvalidFilter(format!(
                        "missing value in term: {:?}",
                        term
                    )));
                }
                let op = FilterOp::parse(op).ok_or_else(|| {
                    StoreError::InvalidFilter(format!("unknown operator {:?}", op))
                })?;
                query.comparisons.push(FilterComparison {
                    key,
                    op,
                    value: value.to_string(),
                });
            }
        }
    }

    debug!("parsed filter {:?} into {:?}", filterq, query);
    Ok(query)
}

/// Parse `filterq` and compile it against the `serial` column.
pub fn construct_filters(filterq: &str) -> StoreResult<Option<(String, Vec<Value>)>> {
    Ok(parse_filters(filterq)?.compile("serial"))
}
