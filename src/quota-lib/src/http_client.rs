use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

use crate::config::QuotaConfig;
use crate::ledger::{
    CommissionRequest, QuotaHolding, QuotaKey, QuotaholderClient, ReassignRequest,
    ResolveResponse, Serial,
};
use crate::provision::ProvisionSet;
use crate::{LedgerError, LedgerResult, QuotaError, QuotaLimitDetail, QuotaResult};

const AUTH_HEADER: &str = "X-Auth-Token";
const RETRY_BACKOFF_MS: u64 = 200;

#[derive(Deserialize)]
struct IssueResponse {
    serial: Serial,
}

#[derive(Deserialize)]
struct QuotaRow {
    holder: String,
    source: Option<String>,
    resource: String,
    limit: i64,
    usage_min: i64,
    usage_max: i64,
}

fn provision_list(holder: &str, source: &str, provisions: &ProvisionSet, negate: bool) -> Vec<Value> {
    provisions
        .iter()
        .map(|(resource, quantity)| {
            json!({
                "holder": holder,
                "source": source,
                "resource": resource,
                "quantity": if negate { -quantity } else { *quantity },
            })
        })
        .collect()
}

/// Decode the `overLimit` fault body the ledger sends with 413.
pub(crate) fn decode_over_limit(body: &str) -> Option<QuotaLimitDetail> {
    let value: Value = serde_json::from_str(body).ok()?;
    let data = value.get("overLimit")?.get("data")?;
    let provision = data.get("provision")?;
    Some(QuotaLimitDetail {
        resource: provision.get("resource")?.as_str()?.to_string(),
        usage: data.get("usage")?.as_i64()?,
        limit: data.get("limit")?.as_i64()?,
        requested: provision.get("quantity")?.as_i64()?,
    })
}

/// Map a non success status to a ledger error.
pub(crate) fn status_error(status: StatusCode, body: &str) -> LedgerError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        return match decode_over_limit(body) {
            Some(detail) => LedgerError::NoCapacity(detail),
            None => LedgerError::Fatal(format!("undecodable over limit body: {}", body)),
        };
    }
    if status == StatusCode::NOT_FOUND {
        return LedgerError::NotFound(body.to_string());
    }
    if status.is_server_error() {
        return LedgerError::Transient(format!("{}: {}", status, body));
    }
    LedgerError::Fatal(format!("{}: {}", status, body))
}

/// JSON client of the quotaholder ledger.
pub struct HttpQuotaholderClient {
    base_url: String,
    token: String,
    retry: u32,
    client: Client,
}

impl HttpQuotaholderClient {
    pub fn new(config: &QuotaConfig) -> QuotaResult<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| QuotaError::Internal(format!("Failed to create client: {}", e)))?;
        Ok(Self {
            base_url: config.ledger_url.trim_end_matches('/').to_string(),
            token: config.service_token.clone(),
            retry: config.retry,
            client,
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> LedgerResult<T> {
        let url = format!("{}/{}", self.base_url, path);
        let mut attempt = 0u32;
        loop {
            match self.call_once(method.clone(), &url, body).await {
                Err(LedgerError::Transient(reason)) if attempt < self.retry => {
                    attempt += 1;
                    warn!(
                        "HttpQuotaholderClient: {} {} failed ({}), retry {}/{}",
                        method, url, reason, attempt, self.retry
                    );
                    tokio::time::sleep(Duration::from_millis(RETRY_BACKOFF_MS << attempt)).await;
                }
                result => return result,
            }
        }
    }

    async fn call_once<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> LedgerResult<T> {
        let mut req = self
            .client
            .request(method.clone(), url)
            .header(AUTH_HEADER, &self.token);
        if let Some(body) = body {
            req = req.json(body);
        }

        let res = req.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                LedgerError::Transient(format!("request {} failed: {}", url, e))
            } else {
                LedgerError::Fatal(format!("request {} failed: {}", url, e))
            }
        })?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            debug!("HttpQuotaholderClient: {} {} -> {}", method, url, status);
            return Err(status_error(status, &text));
        }
        res.json::<T>()
            .await
            .map_err(|e| LedgerError::Fatal(format!("decode {} response failed: {}", url, e)))
    }
}

#[async_trait]
impl QuotaholderClient for HttpQuotaholderClient {
    async fn issue_one_commission(&self, request: &CommissionRequest) -> LedgerResult<Serial> {
        let body = json!({
            "name": request.name,
            "force": request.force,
            "auto_accept": request.auto_accept,
            "provisions": provision_list(&request.user, &request.source, &request.provisions, false),
        });
        let resp: IssueResponse = self.call(Method::POST, "commissions", Some(&body)).await?;
        Ok(resp.serial)
    }

    async fn issue_resource_reassignment(
        &self,
        request: &ReassignRequest,
    ) -> LedgerResult<Serial> {
        let mut provisions =
            provision_list(&request.user, &request.from_project, &request.provisions, true);
        provisions.extend(provision_list(
            &request.user,
            &request.to_project,
            &request.provisions,
            false,
        ));
        let body = json!({
            "name": request.name,
            "force": request.force,
            "auto_accept": request.auto_accept,
            "provisions": provisions,
        });
        let resp: IssueResponse = self.call(Method::POST, "commissions", Some(&body)).await?;
        Ok(resp.serial)
    }

    async fn resolve_commissions(
        &self,
        accept: &[Serial],
        reject: &[Serial],
    ) -> LedgerResult<ResolveResponse> {
        let body = json!({ "accept": accept, "reject": reject });
        self.call(Method::POST, "commissions/action", Some(&body))
            .await
    }

    async fn get_pending_commissions(&self) -> LedgerResult<Vec<Serial>> {
        self.call(Method::GET, "commissions", None).await
    }

    async fn get_quota(
        &self,
        holders: &[String],
        resources: &[String],
        sources: &[String],
    ) -> LedgerResult<HashMap<QuotaKey, QuotaHolding>> {
        let body = json!({
            "holders": holders,
            "resources": resources,
            "sources": sources,
        });
        let rows: Vec<QuotaRow> = self.call(Method::POST, "quotas/query", Some(&body)).await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                (
                    QuotaKey {
                        holder: row.holder,
                        source: row.source,
                        resource: row.resource,
                    },
                    QuotaHolding {
                        limit: row.limit,
                        usage_min: row.usage_min,
                        usage_max: row.usage_max,
                    },
                )
            })
            .collect())
    }
}
