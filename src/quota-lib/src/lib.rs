// quota_lib reserves resource quota at the external quotaholder ledger.
// Every quota changing action on a resource is issued as a commission; the
// commission's serial is kept in a local SQLite DB until it is accepted or
// rejected at the ledger, and a reconciliation sweep settles the ones a
// crash or a ledger outage left behind.

mod commission;
mod config;
mod error;
mod http_client;
mod ledger;
mod provision;
mod quota_view;
mod resolver;
mod resource;
mod serial_db;

#[cfg(test)]
mod mock_ledger;

pub use commission::CommissionMgr;
pub use config::QuotaConfig;
pub use error::{LedgerError, LedgerResult, QuotaError, QuotaLimitDetail, QuotaResult};
pub use http_client::HttpQuotaholderClient;
pub use ledger::{
    project_ref, strip_tag, user_ref, CommissionRequest, QuotaHolding, QuotaKey,
    QuotaholderClient, ReassignRequest, ResolveResponse, Serial,
};
pub use provision::*;
pub use quota_view::{
    get_user_quotas, get_users_quotas, HolderQuotas, QuotaUsage, ResourceQuota, SourceQuotas,
};
pub use resolver::CommissionResolver;
pub use resource::{CommissionAction, Flavor, OperState, QuotableResource, ResourceKind};
pub use serial_db::{SerialDB, SerialRecord};
