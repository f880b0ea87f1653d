// Action classification
//
// Decides whether an action node is a Dataverse connector call and which
// capability (update / retrieve) its operation belongs to.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use super::definition::ActionNode;

/// Connector id fragment identifying the Dataverse connector
pub const DATA_PLATFORM_CONNECTOR: &str = "shared_commondataserviceforapps";

/// Node type of connector calls
pub const CONNECTOR_ACTION_TYPE: &str = "OpenApiConnection";

/// Parameter prefix of columns written by update/upsert actions
const UPDATED_FIELD_PREFIX: &str = "item/";

/// Capability of a data-platform operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Update,
    Retrieve,
    Other,
}

fn update_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)^Update|Upsert").expect("valid update pattern"))
}

fn retrieve_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)GetItem|GetRecord|Retrieve|ListRecords|ListRows")
            .expect("valid retrieve pattern")
    })
}

/// True for Dataverse connector calls
pub fn is_data_platform_action(node: &ActionNode) -> bool {
    if node.kind.as_deref() != Some(CONNECTOR_ACTION_TYPE) {
        return false;
    }
    ["apiId", "connectionName"].iter().any(|key| {
        node.input_at(&["host", key])
            .and_then(Value::as_str)
            .map_or(false, |id| id.contains(DATA_PLATFORM_CONNECTOR))
    })
}

/// Connector operation id, empty when absent
pub fn operation_id(node: &ActionNode) -> &str {
    node.input_at(&["host", "operationId"])
        .and_then(Value::as_str)
        .unwrap_or("")
}

/// Entity set the action targets
pub fn entity_target(node: &ActionNode) -> Option<&str> {
    node.input_at(&["parameters", "entityName"])
        .and_then(Value::as_str)
}

pub fn is_update_operation(operation_id: &str) -> bool {
    update_pattern().is_match(operation_id)
}

pub fn is_retrieve_operation(operation_id: &str) -> bool {
    retrieve_pattern().is_match(operation_id)
}

/// Bucket an operation id; update wins when both patterns match
pub fn classify_operation(operation_id: &str) -> OperationKind {
    if is_update_operation(operation_id) {
        OperationKind::Update
    } else if is_retrieve_operation(operation_id) {
        OperationKind::Retrieve
    } else {
        OperationKind::Other
    }
}

/// Columns written by an update action (`item/<column>` parameters)
pub fn updated_fields(node: &ActionNode) -> Vec<String> {
    node.parameters()
        .map(|params| {
            params
                .keys()
                .filter_map(|key| key.strip_prefix(UPDATED_FIELD_PREFIX))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Columns selected by a retrieve action (`$select` or `select`)
pub fn selected_columns(node: &ActionNode) -> Vec<String> {
    let Some(params) = node.parameters() else {
        return Vec::new();
    };
    let select = ["$select", "select"]
        .iter()
        .filter_map(|key| params.get(*key).and_then(Value::as_str))
        .find(|s| !s.is_empty())
        .unwrap_or("");
    select
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Data-platform action targeting `entity_set` (case-insensitive), if any
pub fn targets_entity(node: &ActionNode, entity_set: &str) -> bool {
    is_data_platform_action(node)
        && entity_target(node).map_or(false, |e| e.eq_ignore_ascii_case(entity_set))
}
