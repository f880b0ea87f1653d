// Bridge handler
//
// Privileged side of the bridge: holds credentials and network access and
// answers each request with a `ResponseEnvelope`.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

use super::client::list_runs_data;
use super::envelope::{BridgePayload, BridgeResponse, RequestEnvelope, ResponseEnvelope};
use crate::client::flow_service::{FlowServiceClient, RunHistoryApi};
use crate::client::http::ApiClient;
use crate::config::manager::ConfigManager;
use crate::config::types::{validate_credentials, FlowMonitorConfig, DEFAULT_TENANT};

/// Serves bridge requests with real credentials
pub struct BridgeHandler {
    api: ApiClient,
    runs: FlowServiceClient,
    manager: Arc<Mutex<ConfigManager>>,
    config: Arc<RwLock<FlowMonitorConfig>>,
}

impl BridgeHandler {
    /// `config` is shared with the token provider so saved credentials take effect
    pub fn new(
        api: ApiClient,
        runs: FlowServiceClient,
        manager: ConfigManager,
        config: Arc<RwLock<FlowMonitorConfig>>,
    ) -> Self {
        Self {
            api,
            runs,
            manager: Arc::new(Mutex::new(manager)),
            config,
        }
    }

    /// Answer requests until the request channel closes; requests run concurrently
    pub async fn serve(
        self: Arc<Self>,
        mut requests: mpsc::UnboundedReceiver<RequestEnvelope>,
        responses: mpsc::UnboundedSender<ResponseEnvelope>,
    ) {
        info!("Bridge handler started");
        while let Some(request) = requests.recv().await {
            if !request.is_api_request() {
                debug!("Ignoring message from {}", request.source);
                continue;
            }
            let handler = self.clone();
            let responses = responses.clone();
            tokio::spawn(async move {
                let response = handler.handle(request.payload).await;
                let _ = responses.send(ResponseEnvelope::new(request.request_id, response));
            });
        }
        info!("Bridge handler stopped");
    }

    /// Answer a single raw payload
    pub async fn handle(&self, payload: Value) -> BridgeResponse {
        let payload = match BridgePayload::from_value(payload) {
            Ok(payload) => payload,
            Err(message) => return BridgeResponse::failure(message),
        };
        debug!("Handling {}", payload.kind());

        match payload {
            BridgePayload::ListRuns(request) => match self.runs.list_runs(&request).await {
                Ok(page) => BridgeResponse::success(list_runs_data(&page)),
                Err(e) => BridgeResponse::failure(e.to_string()),
            },
            BridgePayload::GetJson { url, no_auth } => {
                let result = if no_auth {
                    self.api.fetch_json_unauthenticated(&url).await
                } else {
                    self.api.fetch_json(&url).await
                };
                match result {
                    Ok(data) => BridgeResponse::success(data),
                    Err(e) => BridgeResponse::failure(e.to_string()),
                }
            }
            BridgePayload::SaveConfig {
                client_id,
                tenant_id,
            } => self.save_config(&client_id, tenant_id.as_deref()).await,
            BridgePayload::GetConfig => {
                let config = self.config.read().await;
                BridgeResponse::success(json!({
                    "clientId": config.client_id.clone().unwrap_or_default(),
                    "tenantId": config.tenant_id,
                }))
            }
        }
    }

    async fn save_config(&self, client_id: &str, tenant_id: Option<&str>) -> BridgeResponse {
        let validation = validate_credentials(Some(client_id), tenant_id);
        if !validation.is_valid {
            return BridgeResponse::failure(validation.errors.join("; "));
        }

        if let Err(e) = self
            .manager
            .lock()
            .await
            .save_credentials(client_id, tenant_id)
            .await
        {
            warn!("Saving credentials failed: {:#}", e);
            return BridgeResponse::failure(format!("{:#}", e));
        }

        {
            let mut config = self.config.write().await;
            config.client_id = Some(client_id.trim().to_string());
            config.tenant_id = tenant_id
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .unwrap_or(DEFAULT_TENANT)
                .to_string();
        }
        self.api.tokens().clear().await;
        info!("Saved new app registration; cached tokens cleared");
        BridgeResponse::success(json!({}))
    }
}
