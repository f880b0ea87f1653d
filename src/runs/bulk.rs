// Bulk run listing
//
// Reads the most recent runs of a flow from the data platform's `flowrun`
// table in a single page.

use tracing::{debug, warn};

use super::types::RunRecord;
use crate::client::dataverse::DataPlatform;

/// Runs fetched per bulk query
pub const BULK_PAGE_SIZE: u32 = 50;

/// OData query for the runs of one flow, newest first
pub fn flow_run_query(flow_id: &str, status: Option<&str>) -> String {
    let mut query = format!("?$filter=workflowid eq '{}'", flow_id);
    if let Some(status) = status.filter(|s| !s.is_empty()) {
        query.push_str(&format!(" and status eq '{}'", status));
    }
    query.push_str(&format!(
        "&$select=status,starttime,endtime,name&$orderby=starttime desc&$top={}",
        BULK_PAGE_SIZE
    ));
    query
}

async fn query_runs(platform: &dyn DataPlatform, flow_id: &str, status: Option<&str>) -> Vec<RunRecord> {
    match platform
        .retrieve_multiple("flowrun", &flow_run_query(flow_id, status))
        .await
    {
        Ok(records) => records.iter().map(RunRecord::from_data_platform).collect(),
        Err(e) => {
            warn!("Run query for flow {} failed: {}", flow_id, e);
            Vec::new()
        }
    }
}

/// Latest runs of a flow, trying `fallback_id` only when `primary_id` yields none.
///
/// Query failures are logged and produce an empty list.
pub async fn list_all_runs_for_flow(
    platform: &dyn DataPlatform,
    primary_id: &str,
    fallback_id: Option<&str>,
    status: Option<&str>,
) -> Vec<RunRecord> {
    let mut runs = Vec::new();
    if !primary_id.is_empty() {
        runs = query_runs(platform, primary_id, status).await;
    }

    if runs.is_empty() {
        if let Some(fallback) = fallback_id.filter(|id| !id.is_empty() && *id != primary_id) {
            debug!("No runs under {}, trying {}", primary_id, fallback);
            runs = query_runs(platform, fallback, status).await;
        }
    }

    runs
}
