use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use crate::ledger::{
    CommissionRequest, QuotaHolding, QuotaKey, QuotaholderClient, ReassignRequest,
    ResolveResponse, Serial,
};
use crate::{LedgerError, LedgerResult};

#[derive(Default)]
pub struct MockState {
    pub next_serial: Serial,
    pub pending: BTreeSet<Serial>,
    pub issued: Vec<CommissionRequest>,
    pub reassigned: Vec<ReassignRequest>,
    pub resolve_calls: Vec<(Vec<Serial>, Vec<Serial>)>,
    pub quotas: HashMap<QuotaKey, QuotaHolding>,
    pub fail_issue: Option<LedgerError>,
    pub fail_resolve: Option<LedgerError>,
}

/// In-memory ledger recording every call it receives.
pub struct MockQuotaholder {
    pub state: Mutex<MockState>,
}

impl MockQuotaholder {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                next_serial: 1,
                ..Default::default()
            }),
        }
    }

    pub fn set_pending(&self, serials: &[Serial]) {
        self.state.lock().unwrap().pending = serials.iter().copied().collect();
    }

    pub fn pending(&self) -> Vec<Serial> {
        self.state.lock().unwrap().pending.iter().copied().collect()
    }

    pub fn resolve_calls(&self) -> Vec<(Vec<Serial>, Vec<Serial>)> {
        self.state.lock().unwrap().resolve_calls.clone()
    }

    pub fn issued(&self) -> Vec<CommissionRequest> {
        self.state.lock().unwrap().issued.clone()
    }

    pub fn fail_issue(&self, err: Option<LedgerError>) {
        self.state.lock().unwrap().fail_issue = err;
    }

    pub fn fail_resolve(&self, err: Option<LedgerError>) {
        self.state.lock().unwrap().fail_resolve = err;
    }

    pub fn add_quota(&self, holder: &str, source: Option<&str>, resource: &str, holding: QuotaHolding) {
        self.state.lock().unwrap().quotas.insert(
            QuotaKey {
                holder: holder.to_string(),
                source: source.map(|s| s.to_string()),
                resource: resource.to_string(),
            },
            holding,
        );
    }

    fn issue(&self, auto_accept: bool) -> LedgerResult<Serial> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.fail_issue.clone() {
            return Err(err);
        }
        let serial = state.next_serial;
        state.next_serial += 1;
        if !auto_accept {
            state.pending.insert(serial);
        }
        Ok(serial)
    }
}

#[async_trait]
impl QuotaholderClient for MockQuotaholder {
    async fn issue_one_commission(&self, request: &CommissionRequest) -> LedgerResult<Serial> {
        let serial = self.issue(request.auto_accept)?;
        self.state.lock().unwrap().issued.push(request.clone());
        Ok(serial)
    }

    async fn issue_resource_reassignment(
        &self,
        request: &ReassignRequest,
    ) -> LedgerResult<Serial> {
        let serial = self.issue(request.auto_accept)?;
        self.state.lock().unwrap().reassigned.push(request.clone());
        Ok(serial)
    }

    async fn resolve_commissions(
        &self,
        accept: &[Serial],
        reject: &[Serial],
    ) -> LedgerResult<ResolveResponse> {
        let mut state = self.state.lock().unwrap();
        state.resolve_calls.push((accept.to_vec(), reject.to_vec()));
        if let Some(err) = state.fail_resolve.clone() {
            return Err(err);
        }

        let mut response = ResolveResponse::default();
        for (serials, accepted) in [(accept, true), (reject, false)] {
            for serial in serials {
                if state.pending.remove(serial) {
                    if accepted {
                        response.accepted.push(*serial);
                    } else {
                        response.rejected.push(*serial);
                    }
                } else {
                    response.failed.push((*serial, "not pending".to_string()));
                }
            }
        }
        Ok(response)
    }

    async fn get_pending_commissions(&self) -> LedgerResult<Vec<Serial>> {
        Ok(self.pending())
    }

    async fn get_quota(
        &self,
        holders: &[String],
        resources: &[String],
        sources: &[String],
    ) -> LedgerResult<HashMap<QuotaKey, QuotaHolding>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .quotas
            .iter()
            .filter(|(key, _)| holders.contains(&key.holder))
            .filter(|(key, _)| resources.is_empty() || resources.contains(&key.resource))
            .filter(|(key, _)| {
                sources.is_empty()
                    || key
                        .source
                        .as_ref()
                        .map(|s| sources.contains(s))
                        .unwrap_or(false)
            })
            .map(|(key, holding)| (key.clone(), *holding))
            .collect())
    }
}
