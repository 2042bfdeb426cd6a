use log::{debug, error, info, warn};
use std::sync::Arc;

use crate::ledger::{strip_tag, user_ref, CommissionRequest, QuotaholderClient, ReassignRequest};
use crate::provision::get_commission_info;
use crate::resolver::CommissionResolver;
use crate::resource::{CommissionAction, QuotableResource};
use crate::serial_db::{SerialDB, SerialRecord};
use crate::{LedgerError, QuotaError, QuotaResult};

/// Issues quota commissions for resource actions and tracks their serials.
pub struct CommissionMgr {
    client: Arc<dyn QuotaholderClient>,
    serial_db: Arc<SerialDB>,
    resolver: CommissionResolver,
    client_name: String,
}

impl CommissionMgr {
    pub fn new(
        client: Arc<dyn QuotaholderClient>,
        serial_db: Arc<SerialDB>,
        client_name: impl Into<String>,
    ) -> Self {
        let resolver = CommissionResolver::new(client.clone(), serial_db.clone());
        Self {
            client,
            serial_db,
            resolver,
            client_name: client_name.into(),
        }
    }

    pub fn resolver(&self) -> &CommissionResolver {
        &self.resolver
    }

    pub fn commission_name(&self, resource: &QuotableResource, action: &CommissionAction) -> String {
        format!(
            "client: {}, resource: {}, action: {}",
            self.client_name, resource, action
        )
    }

    /// A ledger 404 on issue usually means the user is not a member of one
    /// of the projects involved. Ask the ledger which projects the user
    /// holds quota in and report the first missing one.
    async fn check_membership(&self, user: &str, projects: &[&str]) -> QuotaResult<()> {
        let quotas = self
            .client
            .get_quota(&[user_ref(user)], &[], &[])
            .await
            .map_err(|e| {
                error!("CommissionMgr: membership check for {} failed! {}", user, e);
                QuotaError::LedgerFault("Unexpected error".to_string())
            })?;

        for project in projects {
            let member = quotas.keys().any(|key| {
                key.source
                    .as_deref()
                    .map(|source| strip_tag(source) == *project)
                    .unwrap_or(false)
            });
            if !member {
                return Err(QuotaError::BadRequest(format!(
                    "User {} not in project {}",
                    user, project
                )));
            }
        }
        Ok(())
    }

    async fn translate_issue_error(
        &self,
        err: LedgerError,
        user: &str,
        projects: &[&str],
    ) -> QuotaError {
        match err {
            LedgerError::NoCapacity(detail) => {
                info!("CommissionMgr: quota exceeded for {}: {}", user, detail);
                QuotaError::QuotaExceeded(detail)
            }
            LedgerError::NotFound(msg) => {
                if let Err(e) = self.check_membership(user, projects).await {
                    return e;
                }
                error!("CommissionMgr: unexpected not found from ledger: {}", msg);
                QuotaError::LedgerFault(msg)
            }
            LedgerError::Transient(msg) => {
                error!("CommissionMgr: ledger unavailable: {}", msg);
                QuotaError::LedgerUnavailable(msg)
            }
            LedgerError::Fatal(msg) => {
                error!("CommissionMgr: unexpected ledger error: {}", msg);
                QuotaError::LedgerFault(msg)
            }
        }
    }

    /// Issue a commission for `action` and record its serial. The serial is
    /// attached to the resource unless it was auto accepted.
    /// Returns `None` when the action does not touch any quota.
    pub async fn issue_commission(
        &self,
        resource: &QuotableResource,
        action: &CommissionAction,
        name: &str,
        force: bool,
        auto_accept: bool,
    ) -> QuotaResult<Option<SerialRecord>> {
        let Some(provisions) = get_commission_info(resource, action) else {
            debug!(
                "CommissionMgr: {} on {} needs no commission",
                action, resource
            );
            return Ok(None);
        };

        let issued = match action {
            CommissionAction::Reassign {
                from_project,
                to_project,
            } => {
                if from_project.is_empty() || to_project.is_empty() {
                    return Err(QuotaError::InvalidParam(
                        "Missing project attribute.".to_string(),
                    ));
                }
                let request = ReassignRequest {
                    user: resource.user.clone(),
                    from_project: from_project.clone(),
                    to_project: to_project.clone(),
                    provisions,
                    name: name.to_string(),
                    force,
                    auto_accept,
                };
                match self.client.issue_resource_reassignment(&request).await {
                    Ok(serial) => serial,
                    Err(e) => {
                        let projects = [from_project.as_str(), to_project.as_str()];
                        return Err(self
                            .translate_issue_error(e, &resource.user, &projects)
                            .await);
                    }
                }
            }
            _ => {
                let request = CommissionRequest {
                    user: resource.user.clone(),
                    source: resource.project.clone(),
                    provisions,
                    name: name.to_string(),
                    force,
                    auto_accept,
                };
                match self.client.issue_one_commission(&request).await {
                    Ok(serial) => serial,
                    Err(e) => {
                        return Err(self
                            .translate_issue_error(e, &resource.user, &[resource.project.as_str()])
                            .await);
                    }
                }
            }
        };

        if issued == 0 {
            return Err(QuotaError::Internal("No serial".to_string()));
        }

        let record = self.serial_db.create_serial(issued, auto_accept)?;
        if !auto_accept {
            self.serial_db.attach(&resource.id, issued)?;
        }
        info!(
            "CommissionMgr: issued serial {} for {} on {}",
            issued, action, resource
        );
        Ok(Some(record))
    }

    /// Bring the resource's previous serial to the ledger. An undecided
    /// serial is a conflict unless `force`, which rejects it.
    pub async fn resolve_resource_commission(
        &self,
        resource: &QuotableResource,
        force: bool,
    ) -> QuotaResult<()> {
        let Some(serial) = self.serial_db.resource_serial(&resource.id)? else {
            return Ok(());
        };
        if serial.resolved {
            return Ok(());
        }
        if serial.pending && !force {
            return Err(QuotaError::ResolveConflict(format!(
                "Could not resolve commission: serial {} is undecided",
                serial.serial
            )));
        }

        warn!(
            "CommissionMgr: resolving pending commission {} of {}",
            serial.serial, resource
        );
        if !serial.pending && serial.accept {
            self.resolver
                .accept_resource_serial(&resource.id, true)
                .await
        } else {
            self.resolver
                .reject_resource_serial(&resource.id, true)
                .await
        }
    }

    /// Resolve the previous serial and issue a commission for `action`.
    /// Destroy always forces, several destroys may race on one resource
    /// and only the one that wins gets accepted.
    pub async fn handle_resource_commission(
        &self,
        resource: &QuotableResource,
        action: &CommissionAction,
        name: &str,
        force: bool,
        auto_accept: bool,
    ) -> QuotaResult<Option<SerialRecord>> {
        let force = force || *action == CommissionAction::Destroy;
        self.resolve_resource_commission(resource, force).await?;
        self.issue_commission(resource, action, name, force, auto_accept)
            .await
    }

    /// Issue, decide as accepted locally, then accept at the ledger.
    /// The resource already exists and the quota is already reserved when
    /// the accept runs, so a failing accept is logged and left to the
    /// reconciliation sweep.
    pub async fn issue_and_accept_commission(
        &self,
        resource: &QuotableResource,
        action: &CommissionAction,
    ) -> QuotaResult<Option<SerialRecord>> {
        let name = self.commission_name(resource, action);
        let Some(record) = self
            .handle_resource_commission(resource, action, &name, false, false)
            .await?
        else {
            return Ok(None);
        };

        self.serial_db.decide(record.serial, true)?;

        if let Err(e) = self.resolver.accept_resource_serial(&resource.id, true).await {
            error!(
                "CommissionMgr: failed to accept commission {}: {}",
                record.serial, e
            );
        }
        self.serial_db.get_serial(record.serial)
    }
}
