use log::{debug, error, info, warn};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::ledger::{QuotaholderClient, ResolveResponse, Serial};
use crate::serial_db::{SerialDB, SerialRecord};
use crate::{LedgerError, QuotaError, QuotaResult};

/// Map a ledger failure outside the issue path. Capacity and lookup
/// faults carry no meaning for a resolve and surface as opaque faults.
pub(crate) fn ledger_fault(op: &str, err: LedgerError) -> QuotaError {
    error!("CommissionResolver: {} failed! {}", op, err);
    match err {
        LedgerError::Transient(msg) => QuotaError::LedgerUnavailable(msg),
        LedgerError::NoCapacity(detail) => QuotaError::LedgerFault(detail.to_string()),
        LedgerError::NotFound(msg) | LedgerError::Fatal(msg) => QuotaError::LedgerFault(msg),
    }
}

/// Accepts and rejects commissions at the ledger and keeps the local
/// serial records in step.
#[derive(Clone)]
pub struct CommissionResolver {
    client: Arc<dyn QuotaholderClient>,
    serial_db: Arc<SerialDB>,
}

impl CommissionResolver {
    pub fn new(client: Arc<dyn QuotaholderClient>, serial_db: Arc<SerialDB>) -> Self {
        Self { client, serial_db }
    }

    pub fn serial_db(&self) -> &Arc<SerialDB> {
        &self.serial_db
    }

    fn attached_serial(&self, resource_id: &str) -> QuotaResult<SerialRecord> {
        self.serial_db.resource_serial(resource_id)?.ok_or_else(|| {
            error!(
                "CommissionResolver: resource {} has no attached serial",
                resource_id
            );
            QuotaError::InvalidState(format!("resource {} has no serial", resource_id))
        })
    }

    /// Accept the serial attached to the resource and detach it.
    pub async fn accept_resource_serial(&self, resource_id: &str, strict: bool) -> QuotaResult<()> {
        let serial = self.attached_serial(resource_id)?;
        if !(serial.pending || serial.accept) {
            error!("CommissionResolver: {:?} can't be accepted", serial);
            return Err(QuotaError::InvalidState(format!(
                "serial {} can't be accepted",
                serial.serial
            )));
        }
        debug!(
            "CommissionResolver: accepting serial {} of resource {}",
            serial.serial, resource_id
        );
        self.resolve_commissions(&[serial.serial], &[], strict)
            .await?;
        self.serial_db.detach(resource_id)?;
        Ok(())
    }

    /// Reject the serial attached to the resource and detach it.
    pub async fn reject_resource_serial(&self, resource_id: &str, strict: bool) -> QuotaResult<()> {
        let serial = self.attached_serial(resource_id)?;
        if !(serial.pending || !serial.accept) {
            error!("CommissionResolver: {:?} can't be rejected", serial);
            return Err(QuotaError::InvalidState(format!(
                "serial {} can't be rejected",
                serial.serial
            )));
        }
        debug!(
            "CommissionResolver: rejecting serial {} of resource {}",
            serial.serial, resource_id
        );
        self.resolve_commissions(&[], &[serial.serial], strict)
            .await?;
        self.serial_db.detach(resource_id)?;
        Ok(())
    }

    /// Resolve at the ledger and record what it confirmed.
    pub async fn resolve_commissions(
        &self,
        accept: &[Serial],
        reject: &[Serial],
        strict: bool,
    ) -> QuotaResult<ResolveResponse> {
        let response = self
            .client
            .resolve_commissions(accept, reject)
            .await
            .map_err(|e| ledger_fault("resolve_commissions", e))?;

        self.serial_db.mark_resolved(&response.accepted, true)?;
        self.serial_db.mark_resolved(&response.rejected, false)?;

        if strict && !response.failed.is_empty() {
            error!(
                "CommissionResolver: unexpected error while resolving commissions: {:?}",
                response.failed
            );
        }
        Ok(response)
    }

    /// Resolve, then detach every resource whose serial was resolved.
    pub async fn reconcile_resolve_commissions(
        &self,
        accept: &[Serial],
        reject: &[Serial],
        strict: bool,
    ) -> QuotaResult<ResolveResponse> {
        let response = self.resolve_commissions(accept, reject, strict).await?;
        let affected: Vec<Serial> = response
            .accepted
            .iter()
            .chain(response.rejected.iter())
            .copied()
            .collect();
        let detached = self.serial_db.detach_serials(&affected)?;
        debug!(
            "CommissionResolver: {} serials resolved, {} resources detached",
            affected.len(),
            detached
        );
        Ok(response)
    }

    /// Split the ledger's pending commissions into those to accept and
    /// those to reject. A pending commission is accepted only when it was
    /// decided as accepted locally; everything else is rejected, including
    /// serials the local DB never recorded.
    pub async fn resolve_pending_commissions(&self) -> QuotaResult<(Vec<Serial>, Vec<Serial>)> {
        let pending = self
            .client
            .get_pending_commissions()
            .await
            .map_err(|e| ledger_fault("get_pending_commissions", e))?;
        let pending: BTreeSet<Serial> = pending.into_iter().collect();
        let Some(min_pending) = pending.iter().next().copied() else {
            return Ok((Vec::new(), Vec::new()));
        };

        let accepted: Vec<Serial> = self
            .serial_db
            .decided_since(min_pending)?
            .into_iter()
            .filter(|record| record.accept && pending.contains(&record.serial))
            .map(|record| record.serial)
            .collect();
        let rejected: Vec<Serial> = pending
            .iter()
            .filter(|serial| !accepted.contains(serial))
            .copied()
            .collect();
        Ok((accepted, rejected))
    }

    /// One reconciliation sweep. Safe to repeat.
    pub async fn reconcile_pending(&self) -> QuotaResult<(Vec<Serial>, Vec<Serial>)> {
        let (accepted, rejected) = self.resolve_pending_commissions().await?;
        if accepted.is_empty() && rejected.is_empty() {
            return Ok((accepted, rejected));
        }
        info!(
            "CommissionResolver: reconciling pending commissions, accept {:?}, reject {:?}",
            accepted, rejected
        );
        self.reconcile_resolve_commissions(&accepted, &rejected, true)
            .await?;
        Ok((accepted, rejected))
    }

    /// Run `reconcile_pending` every `interval` until the task is aborted.
    pub fn start_reconcile_task(resolver: Arc<CommissionResolver>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = resolver.reconcile_pending().await {
                    warn!("CommissionResolver: reconcile sweep failed! {}", e);
                }
            }
        })
    }
}
