// Bridge wire format
//
// camelCase JSON envelopes exchanged between the page-side client and the
// privileged background handler.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::client::flow_service::ListRunsRequest;

/// `source` of every request envelope
pub const REQUEST_SOURCE: &str = "FLOW_HISTORY_EXTENSION";

/// `source` of every response envelope
pub const RESPONSE_SOURCE: &str = "FLOW_HISTORY_EXTENSION_RESPONSE";

/// `type` of every request envelope
pub const API_REQUEST: &str = "API_REQUEST";

/// Error text for payload types the handler does not know
pub const UNKNOWN_MESSAGE_TYPE: &str = "Unknown message type";

/// Operation carried by a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BridgePayload {
    ListRuns(ListRunsRequest),
    GetJson {
        url: String,
        #[serde(rename = "noAuth", default)]
        no_auth: bool,
    },
    SaveConfig {
        #[serde(rename = "clientId")]
        client_id: String,
        #[serde(rename = "tenantId", default, skip_serializing_if = "Option::is_none")]
        tenant_id: Option<String>,
    },
    GetConfig,
}

impl BridgePayload {
    /// Wire name of the payload type
    pub fn kind(&self) -> &'static str {
        match self {
            BridgePayload::ListRuns(_) => "LIST_RUNS",
            BridgePayload::GetJson { .. } => "GET_JSON",
            BridgePayload::SaveConfig { .. } => "SAVE_CONFIG",
            BridgePayload::GetConfig => "GET_CONFIG",
        }
    }

    /// Decode a raw payload; `Err` carries the message to answer with
    pub fn from_value(payload: Value) -> Result<Self, String> {
        let kind = payload
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if !matches!(kind.as_str(), "LIST_RUNS" | "GET_JSON" | "SAVE_CONFIG" | "GET_CONFIG") {
            return Err(UNKNOWN_MESSAGE_TYPE.to_string());
        }
        serde_json::from_value(payload).map_err(|e| format!("Invalid {} payload: {}", kind, e))
    }
}

/// Request from the page side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    pub source: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub request_id: Uuid,
    /// Kept raw so unknown payload types still get an answer
    pub payload: Value,
}

impl RequestEnvelope {
    pub fn new(request_id: Uuid, payload: &BridgePayload) -> Self {
        Self {
            source: REQUEST_SOURCE.to_string(),
            kind: API_REQUEST.to_string(),
            request_id,
            payload: serde_json::to_value(payload).unwrap_or(Value::Null),
        }
    }

    /// Whether this envelope is addressed to the handler
    pub fn is_api_request(&self) -> bool {
        self.source == REQUEST_SOURCE && self.kind == API_REQUEST
    }
}

/// Outcome of a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BridgeResponse {
    pub fn success(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Answer from the handler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    pub source: String,
    pub request_id: Uuid,
    pub response: BridgeResponse,
}

impl ResponseEnvelope {
    pub fn new(request_id: Uuid, response: BridgeResponse) -> Self {
        Self {
            source: RESPONSE_SOURCE.to_string(),
            request_id,
            response,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let id = Uuid::new_v4();
        let envelope = RequestEnvelope::new(
            id,
            &BridgePayload::GetJson {
                url: "https://blob/x".to_string(),
                no_auth: true,
            },
        );
        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({
                "source": "FLOW_HISTORY_EXTENSION",
                "type": "API_REQUEST",
                "requestId": id.to_string(),
                "payload": { "type": "GET_JSON", "url": "https://blob/x", "noAuth": true }
            })
        );
    }

    #[test]
    fn test_payload_decoding() {
        let list = BridgePayload::from_value(json!({
            "type": "LIST_RUNS", "envId": "env", "makerId": "flow", "top": 250
        }))
        .unwrap();
        match list {
            BridgePayload::ListRuns(request) => {
                assert_eq!(request.maker_id, "flow");
                assert_eq!(request.top, Some(250));
            }
            other => panic!("unexpected payload {:?}", other),
        }

        assert_eq!(
            BridgePayload::from_value(json!({ "type": "GET_CONFIG" })).unwrap(),
            BridgePayload::GetConfig
        );
        assert_eq!(
            BridgePayload::from_value(json!({ "type": "DELETE_EVERYTHING" })),
            Err(UNKNOWN_MESSAGE_TYPE.to_string())
        );
        assert!(BridgePayload::from_value(json!({ "type": "GET_JSON" })).is_err());
    }

    #[test]
    fn test_malformed_payload_error_names_type() {
        let err = BridgePayload::from_value(json!({ "type": "GET_JSON", "url": 42 })).unwrap_err();
        assert!(err.starts_with("Invalid GET_JSON payload"), "{}", err);

        let err = BridgePayload::from_value(json!({ "type": "SAVE_CONFIG" })).unwrap_err();
        assert!(err.contains("SAVE_CONFIG"), "{}", err);
    }

    #[test]
    fn test_response_wire_shape() {
        let id = Uuid::new_v4();
        let failure = ResponseEnvelope::new(id, BridgeResponse::failure("nope"));
        assert_eq!(
            serde_json::to_value(&failure).unwrap(),
            json!({
                "source": "FLOW_HISTORY_EXTENSION_RESPONSE",
                "requestId": id.to_string(),
                "response": { "ok": false, "error": "nope" }
            })
        );
    }
}
