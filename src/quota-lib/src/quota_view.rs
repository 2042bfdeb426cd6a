use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::ledger::{strip_tag, user_ref, QuotaHolding, QuotaKey, QuotaholderClient};
use crate::resolver::ledger_fault;
use crate::QuotaResult;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaUsage {
    pub limit: i64,
    pub usage: i64,
    /// Reserved by commissions that are not resolved yet.
    pub pending: i64,
}

impl QuotaUsage {
    pub fn from_holding(holding: &QuotaHolding) -> Self {
        Self {
            limit: holding.limit,
            usage: holding.usage_max,
            pending: holding.usage_max - holding.usage_min,
        }
    }
}

/// A user's quota on one resource in one project, next to the project's
/// own quota on it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceQuota {
    pub user: QuotaUsage,
    pub project: QuotaUsage,
}

/// resource -> quota
pub type SourceQuotas = BTreeMap<String, ResourceQuota>;
/// holder -> source -> resource -> quota
pub type HolderQuotas = BTreeMap<String, BTreeMap<String, SourceQuotas>>;

/// Quotas of every user in `users` across the projects they belong to.
/// Holder and source names come back without their `user:`/`project:` tags.
pub async fn get_users_quotas(
    client: &dyn QuotaholderClient,
    users: &[String],
    resources: &[String],
) -> QuotaResult<HolderQuotas> {
    let holders: Vec<String> = users.iter().map(|u| user_ref(u)).collect();
    let user_counters = client
        .get_quota(&holders, resources, &[])
        .await
        .map_err(|e| ledger_fault("get_quota", e))?;

    let sources: Vec<String> = user_counters
        .keys()
        .filter_map(|key| key.source.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let project_counters = if sources.is_empty() {
        Default::default()
    } else {
        client
            .get_quota(&sources, resources, &[])
            .await
            .map_err(|e| ledger_fault("get_quota", e))?
    };

    let mut quotas = HolderQuotas::new();
    for (key, holding) in &user_counters {
        let Some(source) = &key.source else {
            continue;
        };
        let project_key = QuotaKey {
            holder: source.clone(),
            source: None,
            resource: key.resource.clone(),
        };
        let project = match project_counters.get(&project_key) {
            Some(h) => QuotaUsage::from_holding(h),
            None => {
                warn!(
                    "QuotaView: no project holding for {} {}",
                    source, key.resource
                );
                QuotaUsage::default()
            }
        };

        quotas
            .entry(strip_tag(&key.holder).to_string())
            .or_default()
            .entry(strip_tag(source).to_string())
            .or_default()
            .insert(
                key.resource.clone(),
                ResourceQuota {
                    user: QuotaUsage::from_holding(holding),
                    project,
                },
            );
    }
    Ok(quotas)
}

/// source -> resource -> quota of one user.
pub async fn get_user_quotas(
    client: &dyn QuotaholderClient,
    user: &str,
    resources: &[String],
) -> QuotaResult<BTreeMap<String, SourceQuotas>> {
    let mut quotas = get_users_quotas(client, &[user.to_string()], resources).await?;
    Ok(quotas.remove(user).unwrap_or_default())
}
