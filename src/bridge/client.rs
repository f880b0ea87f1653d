// Bridge client
//
// Correlates requests with responses by id, bounds every request with a
// timeout, and exposes the bridge as a `RunHistoryApi`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use super::envelope::{BridgePayload, BridgeResponse, RequestEnvelope, ResponseEnvelope, RESPONSE_SOURCE};
use crate::client::flow_service::{run_detail_url, ListRunsRequest, RunHistoryApi, RunPage};
use crate::config::types::DEFAULT_FLOW_API_BASE;
use crate::error::{FlowMonitorError, Result};

/// Default time budget for one request
pub const DEFAULT_BRIDGE_TIMEOUT: Duration = Duration::from_secs(30);

type PendingTable = Arc<Mutex<HashMap<Uuid, oneshot::Sender<BridgeResponse>>>>;

fn lock_table(table: &PendingTable) -> MutexGuard<'_, HashMap<Uuid, oneshot::Sender<BridgeResponse>>> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes a request's pending entry however `call` ends, including when
/// the caller drops the future mid-wait
struct PendingEntry {
    pending: PendingTable,
    request_id: Uuid,
}

impl PendingEntry {
    fn register(pending: &PendingTable, request_id: Uuid, waiter: oneshot::Sender<BridgeResponse>) -> Self {
        lock_table(pending).insert(request_id, waiter);
        Self {
            pending: pending.clone(),
            request_id,
        }
    }
}

impl Drop for PendingEntry {
    fn drop(&mut self) {
        lock_table(&self.pending).remove(&self.request_id);
    }
}

/// Page-side end of the bridge
#[derive(Clone)]
pub struct BridgeClient {
    outbound: mpsc::UnboundedSender<RequestEnvelope>,
    pending: PendingTable,
    timeout: Duration,
}

impl BridgeClient {
    /// Start dispatching responses from `inbound` to waiting callers
    pub fn connect(
        outbound: mpsc::UnboundedSender<RequestEnvelope>,
        mut inbound: mpsc::UnboundedReceiver<ResponseEnvelope>,
        timeout: Duration,
    ) -> Self {
        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));

        let table = pending.clone();
        tokio::spawn(async move {
            while let Some(envelope) = inbound.recv().await {
                if envelope.source != RESPONSE_SOURCE {
                    continue;
                }
                let waiter = lock_table(&table).remove(&envelope.request_id);
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(envelope.response);
                    }
                    None => debug!("Dropping response for unknown request {}", envelope.request_id),
                }
            }
            debug!("Bridge response channel closed");
        });

        Self {
            outbound,
            pending,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Requests still waiting for an answer
    pub async fn pending_count(&self) -> usize {
        lock_table(&self.pending).len()
    }

    /// Send one request and wait for its `data`
    pub async fn call(&self, payload: BridgePayload) -> Result<Value> {
        let request_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        let _entry = PendingEntry::register(&self.pending, request_id, tx);

        debug!("Bridge request {} ({})", request_id, payload.kind());
        if self
            .outbound
            .send(RequestEnvelope::new(request_id, &payload))
            .is_err()
        {
            return Err(FlowMonitorError::Http {
                status: None,
                message: "Bridge is not connected".to_string(),
            });
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) if response.ok => Ok(response.data.unwrap_or(Value::Null)),
            Ok(Ok(response)) => Err(FlowMonitorError::from_wire(
                response.error.as_deref().unwrap_or("Unknown error"),
            )),
            Ok(Err(_)) => Err(FlowMonitorError::Http {
                status: None,
                message: "Bridge closed before responding".to_string(),
            }),
            Err(_) => {
                let millis = self.timeout.as_millis() as u64;
                warn!("Bridge request {} timed out after {}ms", payload.kind(), millis);
                Err(FlowMonitorError::Timeout {
                    request: payload.kind().to_string(),
                    millis,
                })
            }
        }
    }

    /// Persist new credentials on the handler side
    pub async fn save_config(&self, client_id: &str, tenant_id: Option<&str>) -> Result<()> {
        self.call(BridgePayload::SaveConfig {
            client_id: client_id.to_string(),
            tenant_id: tenant_id.map(str::to_string),
        })
        .await
        .map(|_| ())
    }

    /// Current `{clientId, tenantId}` of the handler
    pub async fn get_config(&self) -> Result<Value> {
        self.call(BridgePayload::GetConfig).await
    }
}

/// `RunHistoryApi` served through the bridge
#[derive(Clone)]
pub struct BridgeRunApi {
    client: BridgeClient,
    flow_api_base: String,
}

impl BridgeRunApi {
    pub fn new(client: BridgeClient) -> Self {
        Self::with_base_url(client, DEFAULT_FLOW_API_BASE)
    }

    pub fn with_base_url(client: BridgeClient, flow_api_base: impl Into<String>) -> Self {
        Self {
            client,
            flow_api_base: flow_api_base.into(),
        }
    }
}

#[async_trait]
impl RunHistoryApi for BridgeRunApi {
    async fn list_runs(&self, request: &ListRunsRequest) -> Result<RunPage> {
        let data = self
            .client
            .call(BridgePayload::ListRuns(request.clone()))
            .await?;
        Ok(RunPage::from_bridge_data(data))
    }

    async fn run_details(&self, env_id: &str, flow_id: &str, run_name: &str) -> Result<Value> {
        self.client
            .call(BridgePayload::GetJson {
                url: run_detail_url(&self.flow_api_base, env_id, flow_id, run_name),
                no_auth: false,
            })
            .await
    }

    async fn fetch_unauthenticated(&self, url: &str) -> Result<Value> {
        self.client
            .call(BridgePayload::GetJson {
                url: url.to_string(),
                no_auth: true,
            })
            .await
    }
}

/// `LIST_RUNS` response data
pub fn list_runs_data(page: &RunPage) -> Value {
    json!({ "runs": page.runs, "nextLink": page.next_link })
}
