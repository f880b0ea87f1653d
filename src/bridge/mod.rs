// Message bridge for Flow Monitor
//
// Request/response channel between an unprivileged caller and the handler
// that owns credentials, speaking the `FLOW_HISTORY_EXTENSION` envelope
// format.

pub mod client;
pub mod envelope;
pub mod handler;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

pub use client::{BridgeClient, BridgeRunApi, DEFAULT_BRIDGE_TIMEOUT};
pub use envelope::{BridgePayload, BridgeResponse, RequestEnvelope, ResponseEnvelope};
pub use handler::BridgeHandler;

/// Wire a client to a handler in-process and start serving
pub fn connect_local(handler: BridgeHandler, timeout: Duration) -> BridgeClient {
    let (req_tx, req_rx) = mpsc::unbounded_channel();
    let (resp_tx, resp_rx) = mpsc::unbounded_channel();
    tokio::spawn(Arc::new(handler).serve(req_rx, resp_tx));
    BridgeClient::connect(req_tx, resp_rx, timeout)
}
