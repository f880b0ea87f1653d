// Run relevance probing
//
// Decides whether a run touched a given record by searching the run's JSON
// for the record id or its primary display value.

use serde_json::Value;
use tracing::debug;

use crate::client::flow_service::RunHistoryApi;
use crate::utils::strip_braces;

/// Primary values this short match too much text to be useful
const MIN_PRIMARY_VALUE_LEN: usize = 4;

/// Needles identifying one record inside run payloads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMatcher {
    id: String,
    id_compact: String,
    primary_value: Option<String>,
}

impl RecordMatcher {
    pub fn new(record_id: &str, primary_value: Option<&str>) -> Self {
        let id = strip_braces(record_id).to_lowercase();
        let id_compact = id.replace('-', "");
        let primary_value = primary_value
            .map(|v| v.trim().to_lowercase())
            .filter(|v| v.chars().count() >= MIN_PRIMARY_VALUE_LEN);
        Self {
            id,
            id_compact,
            primary_value,
        }
    }

    pub fn record_id(&self) -> &str {
        &self.id
    }

    /// Whether already-lowercased text mentions the record
    pub fn matches_text(&self, haystack: &str) -> bool {
        let needles = [Some(&self.id), Some(&self.id_compact), self.primary_value.as_ref()];
        needles
            .into_iter()
            .flatten()
            .filter(|needle| !needle.is_empty())
            .any(|needle| haystack.contains(needle.as_str()))
    }

    /// Whether the serialized value mentions the record
    pub fn matches_value(&self, value: &Value) -> bool {
        match serde_json::to_string(value) {
            Ok(text) => self.matches_text(&text.to_lowercase()),
            Err(_) => false,
        }
    }

    /// Probe one run: detail first, then the trigger outputs link.
    ///
    /// Any failure counts as "not relevant".
    pub async fn is_relevant(
        &self,
        api: &dyn RunHistoryApi,
        env_id: &str,
        flow_id: &str,
        run: &Value,
    ) -> bool {
        let Some(run_name) = run.get("name").and_then(Value::as_str) else {
            return false;
        };

        let detail = match api.run_details(env_id, flow_id, run_name).await {
            Ok(detail) => detail,
            Err(e) => {
                debug!("Run detail for {} unavailable: {}", run_name, e);
                return false;
            }
        };
        if self.matches_value(&detail) {
            return true;
        }

        let Some(outputs_uri) = detail
            .pointer("/properties/trigger/outputsLink/uri")
            .and_then(Value::as_str)
            .filter(|uri| !uri.is_empty())
        else {
            return false;
        };

        match api.fetch_unauthenticated(outputs_uri).await {
            Ok(outputs) => self.matches_value(&outputs),
            Err(e) => {
                debug!("Trigger outputs for {} unavailable: {}", run_name, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::flow_service::{ListRunsRequest, RunPage};
    use crate::error::{FlowMonitorError, Result};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const RECORD: &str = "{1A2B3C4D-0000-1111-2222-333344445555}";

    #[derive(Default)]
    struct FakeRuns {
        details: HashMap<String, Value>,
        outputs: HashMap<String, Value>,
        output_fetches: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RunHistoryApi for FakeRuns {
        async fn list_runs(&self, _request: &ListRunsRequest) -> Result<RunPage> {
            Ok(RunPage::default())
        }

        async fn run_details(&self, _env: &str, _flow: &str, run_name: &str) -> Result<Value> {
            self.details
                .get(run_name)
                .cloned()
                .ok_or_else(|| FlowMonitorError::http(404, "no such run"))
        }

        async fn fetch_unauthenticated(&self, url: &str) -> Result<Value> {
            self.output_fetches.lock().unwrap().push(url.to_string());
            self.outputs
                .get(url)
                .cloned()
                .ok_or_else(|| FlowMonitorError::http(403, "expired"))
        }
    }

    #[test]
    fn test_matcher_needles() {
        let matcher = RecordMatcher::new(RECORD, Some("Contoso Ltd"));
        assert_eq!(matcher.record_id(), "1a2b3c4d-0000-1111-2222-333344445555");
        assert!(matcher.matches_text("...1a2b3c4d-0000-1111-2222-333344445555..."));
        assert!(matcher.matches_text("id=1a2b3c4d000011112222333344445555"));
        assert!(matcher.matches_text("customer: contoso ltd"));
        assert!(!matcher.matches_text("nothing here"));
    }

    #[test]
    fn test_short_primary_value_ignored() {
        let matcher = RecordMatcher::new(RECORD, Some("Bob"));
        assert!(!matcher.matches_text("bob"));
    }

    #[tokio::test]
    async fn test_detail_match_skips_outputs() {
        let mut api = FakeRuns::default();
        api.details.insert(
            "r1".to_string(),
            json!({ "properties": {
                "inputs": { "recordId": "1A2B3C4D-0000-1111-2222-333344445555" },
                "trigger": { "outputsLink": { "uri": "https://blob/outputs" } }
            }}),
        );
        let matcher = RecordMatcher::new(RECORD, None);
        assert!(matcher.is_relevant(&api, "env", "flow", &json!({ "name": "r1" })).await);
        assert!(api.output_fetches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_outputs_link_checked_on_miss() {
        let mut api = FakeRuns::default();
        api.details.insert(
            "r1".to_string(),
            json!({ "properties": { "trigger": { "outputsLink": { "uri": "https://blob/outputs" } } } }),
        );
        api.outputs.insert(
            "https://blob/outputs".to_string(),
            json!({ "body": { "accountid": "1a2b3c4d-0000-1111-2222-333344445555" } }),
        );
        let matcher = RecordMatcher::new(RECORD, None);
        assert!(matcher.is_relevant(&api, "env", "flow", &json!({ "name": "r1" })).await);
        assert_eq!(api.output_fetches.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failures_mean_not_relevant() {
        let mut api = FakeRuns::default();
        let matcher = RecordMatcher::new(RECORD, None);
        assert!(!matcher.is_relevant(&api, "env", "flow", &json!({ "name": "missing" })).await);
        assert!(!matcher.is_relevant(&api, "env", "flow", &json!({})).await);

        api.details.insert(
            "r2".to_string(),
            json!({ "properties": { "trigger": { "outputsLink": { "uri": "https://blob/gone" } } } }),
        );
        assert!(!matcher.is_relevant(&api, "env", "flow", &json!({ "name": "r2" })).await);
    }
}
