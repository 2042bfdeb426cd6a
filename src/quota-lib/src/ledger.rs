use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::provision::ProvisionSet;
use crate::LedgerResult;

pub type Serial = u64;

pub const USER_TAG: &str = "user:";
pub const PROJECT_TAG: &str = "project:";

pub fn user_ref(user: &str) -> String {
    format!("{}{}", USER_TAG, user)
}

pub fn project_ref(project: &str) -> String {
    format!("{}{}", PROJECT_TAG, project)
}

/// Drop the `user:` / `project:` tag of a holder or source name.
pub fn strip_tag(name: &str) -> &str {
    name.strip_prefix(USER_TAG)
        .or_else(|| name.strip_prefix(PROJECT_TAG))
        .unwrap_or(name)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionRequest {
    pub user: String,
    pub source: String,
    pub provisions: ProvisionSet,
    pub name: String,
    pub force: bool,
    pub auto_accept: bool,
}

/// Move the provisions of one resource from one project to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReassignRequest {
    pub user: String,
    pub from_project: String,
    pub to_project: String,
    pub provisions: ProvisionSet,
    pub name: String,
    pub force: bool,
    pub auto_accept: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveResponse {
    #[serde(default)]
    pub accepted: Vec<Serial>,
    #[serde(default)]
    pub rejected: Vec<Serial>,
    /// Serials the ledger could not resolve, with the reason.
    #[serde(default)]
    pub failed: Vec<(Serial, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QuotaKey {
    pub holder: String,
    pub source: Option<String>,
    pub resource: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaHolding {
    pub limit: i64,
    pub usage_min: i64,
    pub usage_max: i64,
}

/// Contract of the external quotaholder ledger.
#[async_trait]
pub trait QuotaholderClient: Send + Sync {
    async fn issue_one_commission(&self, request: &CommissionRequest) -> LedgerResult<Serial>;

    async fn issue_resource_reassignment(&self, request: &ReassignRequest)
        -> LedgerResult<Serial>;

    async fn resolve_commissions(
        &self,
        accept: &[Serial],
        reject: &[Serial],
    ) -> LedgerResult<ResolveResponse>;

    async fn get_pending_commissions(&self) -> LedgerResult<Vec<Serial>>;

    /// Holdings of `holders`; empty `resources`/`sources` mean no filter.
    async fn get_quota(
        &self,
        holders: &[String],
        resources: &[String],
        sources: &[String],
    ) -> LedgerResult<HashMap<QuotaKey, QuotaHolding>>;
}
