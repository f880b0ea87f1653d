// Power Automate orchestration API client
//
// Lists a flow's runs page by page, fetches single-run details, and
// downloads pre-signed trigger output links.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::http::ApiClient;
use crate::config::types::DEFAULT_FLOW_API_BASE;
use crate::error::Result;
use crate::utils::encode_component;

/// API version accepted by the run endpoints
pub const API_VERSION: &str = "2016-11-01";

/// Page size used when the caller does not ask for one
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Continuation keys, in priority order
pub const NEXT_LINK_KEYS: [&str; 3] = ["@odata.nextLink", "nextLink", "@nextLink"];

/// Parameters of one run-listing call
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRunsRequest {
    pub env_id: String,
    pub maker_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

/// One page of runs
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RunPage {
    /// Raw run objects in the orchestration shape
    pub runs: Vec<Value>,
    /// Continuation URL; None on the last page
    pub next_link: Option<String>,
    /// The responder sent a bare array and cannot page
    pub legacy: bool,
}

impl RunPage {
    /// Read a page from a raw orchestration API response
    pub fn from_api_response(body: &Value) -> Self {
        let runs = body
            .get("value")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Self {
            runs,
            next_link: extract_next_link(body),
            legacy: false,
        }
    }

    /// Read a page from `LIST_RUNS` response data: `{runs, nextLink}` or a bare array
    pub fn from_bridge_data(data: Value) -> Self {
        match data {
            Value::Array(runs) => Self {
                runs,
                next_link: None,
                legacy: true,
            },
            Value::Object(mut object) => {
                let runs = match object.remove("runs") {
                    Some(Value::Array(runs)) => runs,
                    _ => Vec::new(),
                };
                let next_link = object
                    .remove("nextLink")
                    .and_then(|v| v.as_str().map(str::to_string))
                    .filter(|link| !link.is_empty());
                Self {
                    runs,
                    next_link,
                    legacy: false,
                }
            }
            _ => Self::default(),
        }
    }

    /// Whether another page can be requested
    pub fn has_more(&self) -> bool {
        !self.legacy && self.next_link.is_some()
    }
}

/// First non-empty continuation link in priority order
pub fn extract_next_link(body: &Value) -> Option<String> {
    NEXT_LINK_KEYS
        .iter()
        .filter_map(|key| body.get(*key).and_then(Value::as_str))
        .find(|link| !link.is_empty())
        .map(str::to_string)
}

/// Runs collection of one flow under `base_url`
pub fn runs_collection_url(base_url: &str, env_id: &str, flow_id: &str) -> String {
    format!(
        "{}/providers/Microsoft.ProcessSimple/environments/{}/flows/{}/runs",
        base_url.trim_end_matches('/'),
        encode_component(env_id),
        encode_component(flow_id)
    )
}

/// Detail URL of a single run
pub fn run_detail_url(base_url: &str, env_id: &str, flow_id: &str, run_name: &str) -> String {
    format!(
        "{}/{}?api-version={}",
        runs_collection_url(base_url, env_id, flow_id),
        encode_component(run_name),
        API_VERSION
    )
}

/// Run-history operations used by the search engine
#[async_trait]
pub trait RunHistoryApi: Send + Sync {
    /// One page of runs
    async fn list_runs(&self, request: &ListRunsRequest) -> Result<RunPage>;

    /// Full detail of a single run (authenticated)
    async fn run_details(&self, env_id: &str, flow_id: &str, run_name: &str) -> Result<Value>;

    /// JSON behind a pre-signed link (no credentials)
    async fn fetch_unauthenticated(&self, url: &str) -> Result<Value>;
}

/// Orchestration API client over HTTPS
#[derive(Clone)]
pub struct FlowServiceClient {
    api: ApiClient,
    base_url: String,
}

impl FlowServiceClient {
    pub fn new(api: ApiClient) -> Self {
        Self::with_base_url(api, DEFAULT_FLOW_API_BASE)
    }

    pub fn with_base_url(api: ApiClient, base_url: impl Into<String>) -> Self {
        Self {
            api,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn runs_base(&self, env_id: &str, flow_id: &str) -> String {
        runs_collection_url(&self.base_url, env_id, flow_id)
    }

    /// URL for a listing request; the continuation link wins when present
    pub fn runs_url(&self, request: &ListRunsRequest) -> String {
        if let Some(next_link) = request.next_link.as_deref().filter(|l| !l.is_empty()) {
            return next_link.to_string();
        }

        let mut url = format!(
            "{}?api-version={}&$top={}",
            self.runs_base(&request.env_id, &request.maker_id),
            API_VERSION,
            request.top.unwrap_or(DEFAULT_PAGE_SIZE)
        );
        if let Some(filter) = request.filter.as_deref().filter(|f| !f.is_empty()) {
            url.push_str("&$filter=");
            url.push_str(&encode_component(filter));
        }
        url
    }

    /// URL of a single run's detail
    pub fn run_url(&self, env_id: &str, flow_id: &str, run_name: &str) -> String {
        run_detail_url(&self.base_url, env_id, flow_id, run_name)
    }
}

#[async_trait]
impl RunHistoryApi for FlowServiceClient {
    async fn list_runs(&self, request: &ListRunsRequest) -> Result<RunPage> {
        let body = self.api.fetch_json(&self.runs_url(request)).await?;
        let page = RunPage::from_api_response(&body);
        debug!(
            "Run count {}, next link: {}",
            page.runs.len(),
            if page.next_link.is_some() { "yes" } else { "no" }
        );
        Ok(page)
    }

    async fn run_details(&self, env_id: &str, flow_id: &str, run_name: &str) -> Result<Value> {
        self.api
            .fetch_json(&self.run_url(env_id, flow_id, run_name))
            .await
    }

    async fn fetch_unauthenticated(&self, url: &str) -> Result<Value> {
        self.api.fetch_json_unauthenticated(url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_next_link_priority() {
        assert_eq!(
            extract_next_link(&json!({ "nextLink": "b", "@odata.nextLink": "a", "@nextLink": "c" })),
            Some("a".to_string())
        );
        assert_eq!(
            extract_next_link(&json!({ "nextLink": "b", "@nextLink": "c" })),
            Some("b".to_string())
        );
        assert_eq!(extract_next_link(&json!({ "@nextLink": "c" })), Some("c".to_string()));
        assert_eq!(extract_next_link(&json!({ "value": [] })), None);
    }

    #[test]
    fn test_run_detail_url() {
        assert_eq!(
            run_detail_url("https://api.flow.microsoft.com/", "Default-1", "abc", "0858"),
            "https://api.flow.microsoft.com/providers/Microsoft.ProcessSimple/environments/Default-1/flows/abc/runs/0858?api-version=2016-11-01"
        );
    }

    #[test]
    fn test_bridge_page_shapes() {
        let legacy = RunPage::from_bridge_data(json!([{ "name": "r1" }]));
        assert!(legacy.legacy);
        assert!(!legacy.has_more());
        assert_eq!(legacy.runs.len(), 1);

        let paged = RunPage::from_bridge_data(json!({ "runs": [{ "name": "r1" }], "nextLink": "next" }));
        assert!(paged.has_more());

        let last = RunPage::from_bridge_data(json!({ "runs": null }));
        assert!(last.runs.is_empty());
        assert!(!last.has_more());
    }

    #[test]
    fn test_list_runs_request_wire_shape() {
        let request = ListRunsRequest {
            env_id: "env".to_string(),
            maker_id: "flow".to_string(),
            top: Some(250),
            next_link: None,
            filter: Some("status eq 'Failed'".to_string()),
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({ "envId": "env", "makerId": "flow", "top": 250, "filter": "status eq 'Failed'" })
        );
    }
}
