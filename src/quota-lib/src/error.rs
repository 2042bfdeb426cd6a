use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Structured detail of a ledger capacity breach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaLimitDetail {
    pub resource: String,
    pub usage: i64,
    pub limit: i64,
    pub requested: i64,
}

impl QuotaLimitDetail {
    pub fn available(&self) -> i64 {
        self.limit - self.usage
    }
}

impl fmt::Display for QuotaLimitDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} usage={} limit={} requested={}",
            self.resource, self.usage, self.limit, self.requested
        )
    }
}

#[derive(Error, Debug)]
pub enum QuotaError {
    #[error("resolve conflict: {0}")]
    ResolveConflict(String),
    #[error("quota exceeded: {0}")]
    QuotaExceeded(QuotaLimitDetail),
    #[error("ledger unavailable: {0}")]
    LedgerUnavailable(String),
    #[error("ledger fault: {0}")]
    LedgerFault(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("invalid param: {0}")]
    InvalidParam(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("db error: {0}")]
    DbError(String),
    #[error("I/O error: {0}")]
    IoError(String),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type QuotaResult<T> = std::result::Result<T, QuotaError>;

impl From<std::io::Error> for QuotaError {
    fn from(err: std::io::Error) -> Self {
        QuotaError::IoError(err.to_string())
    }
}

fn resource_display_name(resource: &str) -> &str {
    let short = resource.strip_prefix("compute.").unwrap_or(resource);
    match short {
        "vm" => "Virtual Machine",
        "cpu" => "CPU",
        "ram" => "RAM",
        "network.private" => "Private Network",
        "floating_ip" => "Floating IP address",
        other => other,
    }
}

impl QuotaError {
    /// Message and optional details safe to show to the end user.
    /// Everything that is not the user's fault collapses into a generic
    /// message; the full error is expected to be logged by the caller.
    pub fn user_message(&self) -> (String, Option<String>) {
        match self {
            QuotaError::QuotaExceeded(detail) => (
                "Resource Limit Exceeded for your account.".to_string(),
                Some(format!(
                    "Limit for resource '{}' exceeded for your account. Available: {}, Requested: {}",
                    resource_display_name(&detail.resource),
                    detail.available(),
                    detail.requested
                )),
            ),
            QuotaError::BadRequest(msg) => (msg.clone(), None),
            _ => ("Unexpected error".to_string(), None),
        }
    }
}

/// Failure reported by a ledger client.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("no capacity: {0}")]
    NoCapacity(QuotaLimitDetail),
    #[error("ledger not found: {0}")]
    NotFound(String),
    #[error("ledger transient failure: {0}")]
    Transient(String),
    #[error("ledger fatal failure: {0}")]
    Fatal(String),
}

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_for_quota_exceeded() {
        let err = QuotaError::QuotaExceeded(QuotaLimitDetail {
            resource: "compute.ram".to_string(),
            usage: 3072,
            limit: 4096,
            requested: 2048,
        });
        let (msg, details) = err.user_message();
        assert_eq!(msg, "Resource Limit Exceeded for your account.");
        assert_eq!(
            details.unwrap(),
            "Limit for resource 'RAM' exceeded for your account. Available: 1024, Requested: 2048"
        );
    }

    #[test]
    fn test_user_message_unknown_resource_keeps_name() {
        let err = QuotaError::QuotaExceeded(QuotaLimitDetail {
            resource: "compute.disk".to_string(),
            usage: 0,
            limit: 10,
            requested: 20,
        });
        let (_, details) = err.user_message();
        assert!(details.unwrap().contains("'disk'"));
    }

    #[test]
    fn test_user_message_hides_internal_errors() {
        for err in [
            QuotaError::LedgerFault("socket closed".to_string()),
            QuotaError::LedgerUnavailable("503".to_string()),
            QuotaError::DbError("disk full".to_string()),
            QuotaError::ResolveConflict("serial 4".to_string()),
        ] {
            assert_eq!(err.user_message(), ("Unexpected error".to_string(), None));
        }
        let (msg, _) = QuotaError::BadRequest("User u not in project p".to_string()).user_message();
        assert_eq!(msg, "User u not in project p");
    }
}
