// Dataverse Web API client
//
// Paged record-set queries, cloud-flow listing and entity-set-name
// resolution against `{org_url}/api/data/v9.2`.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use super::http::ApiClient;
use crate::error::{FlowMonitorError, Result};
use crate::flow::types::FlowRecord;
use crate::utils::encode_component;

/// Web API version segment
pub const API_PATH: &str = "api/data/v9.2";

/// Query listing every cloud flow (category 5), newest first
pub const CLOUD_FLOWS_QUERY: &str = "?$select=name,workflowid,workflowidunique,clientdata,statecode,statuscode,modifiedon,category,ismanaged&$filter=category eq 5&$top=500&$orderby=modifiedon desc";

/// One page of a record-set query
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordPage {
    pub records: Vec<Value>,
    pub next_link: Option<String>,
}

impl RecordPage {
    /// Read `value` and `@odata.nextLink` from a Web API response
    pub fn from_response(body: Value) -> Result<Self> {
        let next_link = body
            .get("@odata.nextLink")
            .and_then(Value::as_str)
            .map(str::to_string);
        let records = match body.get("value") {
            Some(Value::Array(records)) => records.clone(),
            Some(other) => {
                return Err(FlowMonitorError::Format(format!(
                    "Expected 'value' array, got {}",
                    type_name(other)
                )))
            }
            None => {
                return Err(FlowMonitorError::Format(
                    "Response has no 'value' array".to_string(),
                ))
            }
        };
        Ok(Self { records, next_link })
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Read access to the data platform
#[async_trait]
pub trait DataPlatform: Send + Sync {
    /// First page of `entity_set` filtered by an OData `query` (starting with `?`)
    async fn retrieve_multiple(&self, entity_set: &str, query: &str) -> Result<Vec<Value>>;

    /// Every cloud flow in the organization
    async fn fetch_cloud_flows(&self) -> Result<Vec<FlowRecord>>;

    /// Plural entity set name for a logical name
    async fn entity_set_name(&self, logical_name: &str) -> String;
}

/// Dataverse Web API implementation of `DataPlatform`
#[derive(Clone)]
pub struct DataverseClient {
    api: ApiClient,
    org_url: String,
}

impl DataverseClient {
    pub fn new(api: ApiClient, org_url: impl Into<String>) -> Self {
        Self {
            api,
            org_url: org_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// URL of a record set with an optional query
    pub fn record_set_url(&self, entity_set: &str, query: &str) -> String {
        format!("{}/{}/{}{}", self.org_url, API_PATH, entity_set, query)
    }

    /// Fetch one page from an absolute URL
    pub async fn retrieve_page(&self, url: &str) -> Result<RecordPage> {
        RecordPage::from_response(self.api.fetch_json(url).await?)
    }

    /// Fetch every page of a query, following `@odata.nextLink`
    pub async fn retrieve_all(&self, entity_set: &str, query: &str) -> Result<Vec<Value>> {
        let mut records = Vec::new();
        let mut next = Some(self.record_set_url(entity_set, query));
        while let Some(url) = next {
            let page = self.retrieve_page(&url).await?;
            records.extend(page.records);
            next = page.next_link;
        }
        Ok(records)
    }
}

#[async_trait]
impl DataPlatform for DataverseClient {
    async fn retrieve_multiple(&self, entity_set: &str, query: &str) -> Result<Vec<Value>> {
        let url = self.record_set_url(entity_set, query);
        Ok(self.retrieve_page(&url).await?.records)
    }

    async fn fetch_cloud_flows(&self) -> Result<Vec<FlowRecord>> {
        let records = self.retrieve_all("workflows", CLOUD_FLOWS_QUERY).await?;
        let total = records.len();
        let flows: Vec<FlowRecord> = records
            .into_iter()
            .filter_map(|record| match serde_json::from_value::<FlowRecord>(record) {
                Ok(flow) => Some(flow),
                Err(e) => {
                    debug!("Skipping malformed workflow record: {}", e);
                    None
                }
            })
            .collect();
        info!("Fetched {} cloud flows ({} records)", flows.len(), total);
        Ok(flows)
    }

    async fn entity_set_name(&self, logical_name: &str) -> String {
        let fallback = format!("{}s", logical_name);
        let url = format!(
            "{}/{}/EntityDefinitions(LogicalName='{}')?$select=EntitySetName",
            self.org_url,
            API_PATH,
            encode_component(logical_name)
        );
        match self.api.fetch_json(&url).await {
            Ok(body) => match body.get("EntitySetName").and_then(Value::as_str) {
                Some(name) if !name.is_empty() => name.to_string(),
                _ => fallback,
            },
            Err(e) => {
                debug!(
                    "Entity metadata lookup for '{}' failed, using '{}': {}",
                    logical_name, fallback, e
                );
                fallback
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_page_parsing() {
        let page = RecordPage::from_response(json!({
            "value": [{ "name": "a" }, { "name": "b" }],
            "@odata.nextLink": "https://org/api/data/v9.2/workflows?$skiptoken=2"
        }))
        .unwrap();
        assert_eq!(page.records.len(), 2);
        assert_eq!(
            page.next_link.as_deref(),
            Some("https://org/api/data/v9.2/workflows?$skiptoken=2")
        );

        let last = RecordPage::from_response(json!({ "value": [] })).unwrap();
        assert!(last.next_link.is_none());
    }

    #[test]
    fn test_record_page_rejects_unexpected_shapes() {
        assert!(matches!(
            RecordPage::from_response(json!({ "value": "nope" })),
            Err(FlowMonitorError::Format(_))
        ));
        assert!(matches!(
            RecordPage::from_response(json!([1, 2])),
            Err(FlowMonitorError::Format(_))
        ));
    }
}
