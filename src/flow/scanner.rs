// Flow scanner
//
// Classifies each flow's relationship to an entity: flows triggered by its
// changes, flows updating its rows and flows reading them.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::change_type::decode_change_type;
use super::classifier::{
    classify_operation, operation_id, selected_columns, targets_entity, updated_fields,
    OperationKind,
};
use super::definition::WorkflowDefinition;
use super::types::{ClassifiedRow, FlowRecord, FlowSummary, RowDetail, ScanContext, ScanReport};
use super::walker::walk;

/// Placeholder for an empty field or column list
pub const EMPTY_PLACEHOLDER: &str = "—";

/// Parse a flow's definition; flows without one are skipped by every pass
fn definition_of(flow: &FlowRecord) -> Option<WorkflowDefinition> {
    let definition = flow
        .clientdata
        .as_deref()
        .and_then(WorkflowDefinition::from_client_data);
    if definition.is_none() {
        debug!("Flow '{}' has no readable definition", flow.name);
    }
    definition
}

/// Rows for every trigger subscribing to `entity_logical_name`
pub fn scan_triggers(
    flows: &[FlowRecord],
    entity_logical_name: &str,
    ctx: &ScanContext,
) -> Vec<ClassifiedRow> {
    let mut rows = Vec::new();
    for flow in flows {
        let Some(definition) = definition_of(flow) else {
            continue;
        };
        for trigger in &definition.triggers {
            let matches = trigger
                .entity_name()
                .map_or(false, |e| e.eq_ignore_ascii_case(entity_logical_name));
            if !matches {
                continue;
            }
            rows.push(ClassifiedRow {
                summary: FlowSummary::from_record(flow, ctx),
                detail: RowDetail::Trigger {
                    change_type: decode_change_type(trigger.message()).label(),
                },
            });
        }
    }
    rows
}

/// One row per flow that updates or upserts rows of `entity_set_name`
pub fn scan_updates(
    flows: &[FlowRecord],
    entity_set_name: &str,
    ctx: &ScanContext,
) -> Vec<ClassifiedRow> {
    scan_actions(flows, entity_set_name, ctx, OperationKind::Update)
}

/// One row per flow that reads rows of `entity_set_name`
pub fn scan_retrieves(
    flows: &[FlowRecord],
    entity_set_name: &str,
    ctx: &ScanContext,
) -> Vec<ClassifiedRow> {
    scan_actions(flows, entity_set_name, ctx, OperationKind::Retrieve)
}

fn scan_actions(
    flows: &[FlowRecord],
    entity_set_name: &str,
    ctx: &ScanContext,
    wanted: OperationKind,
) -> Vec<ClassifiedRow> {
    let mut rows = Vec::new();
    for flow in flows {
        let Some(definition) = definition_of(flow) else {
            continue;
        };

        let mut operations = OrderedSet::default();
        let mut columns = OrderedSet::default();
        walk(&definition.root, |node| {
            if !targets_entity(node, entity_set_name) {
                return;
            }
            let op = operation_id(node);
            if classify_operation(op) != wanted {
                return;
            }
            operations.insert(op.to_string());
            let found = match wanted {
                OperationKind::Update => updated_fields(node),
                _ => selected_columns(node),
            };
            for column in found {
                columns.insert(column);
            }
        });

        if operations.is_empty() {
            continue;
        }

        let operations = operations.join();
        let columns = columns.join_or_placeholder();
        let detail = match wanted {
            OperationKind::Update => RowDetail::Update {
                operations,
                fields: columns,
            },
            _ => RowDetail::Retrieve {
                operations,
                columns,
            },
        };
        rows.push(ClassifiedRow {
            summary: FlowSummary::from_record(flow, ctx),
            detail,
        });
    }
    rows
}

/// Run all three passes over the same flow list
pub fn scan_all(
    flows: &[FlowRecord],
    entity_logical_name: &str,
    entity_set_name: &str,
    ctx: &ScanContext,
) -> ScanReport {
    let report = ScanReport {
        triggers: scan_triggers(flows, entity_logical_name, ctx),
        updates: scan_updates(flows, entity_set_name, ctx),
        retrieves: scan_retrieves(flows, entity_set_name, ctx),
    };
    debug!(
        "Scanned {} flows for {}: {} triggers, {} updates, {} retrieves",
        flows.len(),
        entity_logical_name,
        report.triggers.len(),
        report.updates.len(),
        report.retrieves.len()
    );
    report
}

/// Insertion-ordered, deduplicated list of strings
#[derive(Default)]
struct OrderedSet {
    items: Vec<String>,
}

impl OrderedSet {
    fn insert(&mut self, item: String) {
        if !self.items.contains(&item) {
            self.items.push(item);
        }
    }

    fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn join(&self) -> String {
        self.items.join(", ")
    }

    fn join_or_placeholder(&self) -> String {
        if self.items.is_empty() {
            EMPTY_PLACEHOLDER.to_string()
        } else {
            self.join()
        }
    }
}

/// Status filter for result rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusFilter {
    #[default]
    All,
    Active,
    Draft,
}

impl std::str::FromStr for StatusFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "all" => Ok(StatusFilter::All),
            "active" => Ok(StatusFilter::Active),
            "draft" => Ok(StatusFilter::Draft),
            other => Err(format!("Unknown status filter: {}", other)),
        }
    }
}

/// Status and free-text filter applied to classified rows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowFilter {
    pub status: StatusFilter,
    pub query: String,
}

impl RowFilter {
    pub fn new(status: StatusFilter, query: impl Into<String>) -> Self {
        Self {
            status,
            query: query.into(),
        }
    }

    pub fn matches(&self, row: &ClassifiedRow) -> bool {
        let status_ok = match self.status {
            StatusFilter::All => true,
            StatusFilter::Active => row.summary.status == "Active",
            StatusFilter::Draft => row.summary.status == "Draft",
        };
        let query = self.query.trim().to_lowercase();
        status_ok && (query.is_empty() || row.summary.name.to_lowercase().contains(&query))
    }

    pub fn apply<'a>(&self, rows: &'a [ClassifiedRow]) -> Vec<&'a ClassifiedRow> {
        rows.iter().filter(|row| self.matches(row)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    const DATAVERSE_API: &str = "/providers/Microsoft.PowerApps/apis/shared_commondataserviceforapps";

    fn flow_with(name: &str, statecode: i64, definition: Value) -> FlowRecord {
        FlowRecord {
            name: name.to_string(),
            workflowid: Some("{11111111-1111-1111-1111-111111111111}".to_string()),
            workflowidunique: Some("{22222222-2222-2222-2222-222222222222}".to_string()),
            clientdata: Some(json!({ "properties": { "definition": definition } }).to_string()),
            statecode: Some(statecode),
            ..Default::default()
        }
    }

    fn dataverse_action(op: &str, entity: &str, extra: Value) -> Value {
        let mut parameters = json!({ "entityName": entity });
        if let (Some(target), Some(source)) = (parameters.as_object_mut(), extra.as_object()) {
            for (k, v) in source {
                target.insert(k.clone(), v.clone());
            }
        }
        json!({
            "type": "OpenApiConnection",
            "inputs": {
                "host": { "apiId": DATAVERSE_API, "operationId": op },
                "parameters": parameters
            }
        })
    }

    fn ctx() -> ScanContext {
        ScanContext::new(Some("env-1".to_string()))
    }

    #[test]
    fn test_update_rows_aggregate_per_flow() {
        let flow = flow_with(
            "Account sync",
            1,
            json!({
                "actions": {
                    "A_update_name": dataverse_action("UpdateRecord", "accounts", json!({ "item/name": "n" })),
                    "Scope": {
                        "type": "Scope",
                        "actions": {
                            "Update_status": dataverse_action("UpdateRecord", "Accounts", json!({ "item/status": "s" })),
                            "Upsert": dataverse_action("UpsertRecord", "accounts", json!({ "item/name": "n" }))
                        }
                    },
                    "Update_contact": dataverse_action("UpdateRecord", "contacts", json!({ "item/x": 1 }))
                }
            }),
        );

        let rows = scan_updates(&[flow], "accounts", &ctx());
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].detail,
            RowDetail::Update {
                operations: "UpdateRecord, UpsertRecord".to_string(),
                fields: "name, status".to_string(),
            }
        );
        assert_eq!(rows[0].summary.status, "Active");
        assert_eq!(rows[0].summary.flow_id_maker, "22222222-2222-2222-2222-222222222222");
        assert!(rows[0].summary.run_history_url.ends_with("/flows/22222222-2222-2222-2222-222222222222/runs"));
    }

    #[test]
    fn test_update_inside_array_valued_extension_is_found() {
        let flow = flow_with(
            "Vendor steps",
            1,
            json!({
                "actions": {
                    "Custom": {
                        "type": "VendorStep",
                        "steps": [
                            dataverse_action("UpdateRecord", "accounts", json!({ "item/name": "n" }))
                        ]
                    }
                }
            }),
        );

        let rows = scan_updates(&[flow], "accounts", &ctx());
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].detail,
            RowDetail::Update {
                operations: "UpdateRecord".to_string(),
                fields: "name".to_string(),
            }
        );
    }

    #[test]
    fn test_retrieve_rows_use_placeholder_for_missing_columns() {
        let flow = flow_with(
            "Lookup",
            0,
            json!({
                "actions": {
                    "Get": dataverse_action("GetItem", "accounts", json!({})),
                    "Update": dataverse_action("UpdateRecord", "accounts", json!({}))
                }
            }),
        );
        let rows = scan_retrieves(&[flow.clone()], "accounts", &ctx());
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].detail,
            RowDetail::Retrieve {
                operations: "GetItem".to_string(),
                columns: EMPTY_PLACEHOLDER.to_string(),
            }
        );

        let updates = scan_updates(&[flow], "accounts", &ctx());
        assert_eq!(
            updates[0].detail,
            RowDetail::Update {
                operations: "UpdateRecord".to_string(),
                fields: EMPTY_PLACEHOLDER.to_string(),
            }
        );
    }

    #[test]
    fn test_trigger_rows() {
        let flow = flow_with(
            "On account change",
            1,
            json!({
                "triggers": {
                    "When_changed": {
                        "type": "OpenApiConnectionWebhook",
                        "inputs": { "parameters": {
                            "subscriptionRequest/entityname": "Account",
                            "subscriptionRequest/message": 3
                        }}
                    },
                    "Other": {
                        "inputs": { "parameters": { "entityname": "contact", "message": 1 } }
                    }
                },
                "actions": {}
            }),
        );
        let rows = scan_triggers(&[flow], "account", &ctx());
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].detail,
            RowDetail::Trigger {
                change_type: "Added or Modified".to_string()
            }
        );
    }

    #[test]
    fn test_unparseable_client_data_skips_only_that_flow() {
        let mut broken = flow_with("Broken", 1, json!({}));
        broken.clientdata = Some("{definitely not json".to_string());
        let good = flow_with(
            "Good",
            1,
            json!({ "actions": { "Get": dataverse_action("ListRecords", "accounts", json!({ "$select": "name" })) } }),
        );

        let report = scan_all(&[broken, good], "account", "accounts", &ctx());
        assert_eq!(report.retrieves.len(), 1);
        assert_eq!(report.retrieves[0].summary.name, "Good");
        assert_eq!(report.total(), 1);
    }

    #[test]
    fn test_row_filter() {
        let flows = vec![
            flow_with("Invoice sync", 1, json!({ "actions": { "U": dataverse_action("UpdateRecord", "accounts", json!({})) } })),
            flow_with("Invoice draft", 0, json!({ "actions": { "U": dataverse_action("UpdateRecord", "accounts", json!({})) } })),
            flow_with("Owner notify", 1, json!({ "actions": { "U": dataverse_action("UpdateRecord", "accounts", json!({})) } })),
        ];
        let rows = scan_updates(&flows, "accounts", &ctx());
        assert_eq!(rows.len(), 3);

        assert_eq!(RowFilter::default().apply(&rows).len(), 3);
        assert_eq!(RowFilter::new(StatusFilter::Active, "").apply(&rows).len(), 2);
        assert_eq!(RowFilter::new(StatusFilter::Draft, "").apply(&rows).len(), 1);

        let invoices = RowFilter::new(StatusFilter::Active, "INVOICE").apply(&rows);
        assert_eq!(invoices.len(), 1);
        assert_eq!(invoices[0].summary.name, "Invoice sync");
    }

    #[test]
    fn test_status_filter_parsing() {
        assert_eq!("Active".parse::<StatusFilter>(), Ok(StatusFilter::Active));
        assert_eq!("draft".parse::<StatusFilter>(), Ok(StatusFilter::Draft));
        assert!("paused".parse::<StatusFilter>().is_err());
    }
}
