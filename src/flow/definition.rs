// Workflow definition model
//
// A cloud flow's `clientdata` holds a JSON document whose
// `properties.definition` is a tree of triggers and actions. Action nodes are
// polymorphic: the structural keys below carry nested actions, and any other
// object-valued or array-valued key may as well (scopes, loops, vendor
// extensions).

use serde_json::{Map, Value};
use tracing::debug;

/// Keys holding leaf configuration; never descended into
pub const NON_RECURSING_KEYS: [&str; 4] = ["inputs", "host", "parameters", "metadata"];

/// Keys with dedicated structural meaning on an action node
const STRUCTURAL_KEYS: [&str; 6] = ["type", "actions", "cases", "branches", "else", "default"];

/// One node of the action graph
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ActionNode {
    /// Name under which the node was found (action name, case name, extra key)
    pub name: Option<String>,
    /// The node's `type` tag
    pub kind: Option<String>,
    /// Type-specific configuration
    pub inputs: Option<Value>,
    /// Nested actions (scopes, conditions, loops)
    pub actions: Vec<ActionNode>,
    /// Switch cases
    pub cases: Vec<ActionNode>,
    /// Parallel branches
    pub branches: Vec<ActionNode>,
    /// Condition else-branch
    pub else_branch: Option<Box<ActionNode>>,
    /// Switch default branch
    pub default_branch: Option<Box<ActionNode>>,
    /// Any other object-valued property, or object elements of an array one
    pub nested: Vec<ActionNode>,
}

impl ActionNode {
    /// Build a node from a JSON value; non-objects are not nodes
    pub fn from_value(name: Option<&str>, value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        Some(Self::from_object(name, object))
    }

    fn from_object(name: Option<&str>, object: &Map<String, Value>) -> Self {
        let mut node = ActionNode {
            name: name.map(str::to_string),
            kind: object.get("type").and_then(Value::as_str).map(str::to_string),
            inputs: object.get("inputs").filter(|v| v.is_object()).cloned(),
            ..Default::default()
        };

        node.actions = named_children(object.get("actions"));
        node.cases = named_children(object.get("cases"));

        if let Some(Value::Array(branches)) = object.get("branches") {
            node.branches = branches
                .iter()
                .filter_map(|b| ActionNode::from_value(None, b))
                .collect();
        }

        node.else_branch = object
            .get("else")
            .and_then(|v| ActionNode::from_value(Some("else"), v))
            .map(Box::new);
        node.default_branch = object
            .get("default")
            .and_then(|v| ActionNode::from_value(Some("default"), v))
            .map(Box::new);

        for (key, value) in object {
            if STRUCTURAL_KEYS.contains(&key.as_str())
                || NON_RECURSING_KEYS.contains(&key.as_str())
            {
                continue;
            }
            collect_nested(&mut node.nested, key, value);
        }

        node
    }

    /// Direct children in traversal order
    pub fn children(&self) -> impl Iterator<Item = &ActionNode> {
        self.actions
            .iter()
            .chain(self.cases.iter())
            .chain(self.branches.iter())
            .chain(self.else_branch.as_deref())
            .chain(self.default_branch.as_deref())
            .chain(self.nested.iter())
    }

    /// Look up a value inside `inputs` by a path of object keys
    pub fn input_at(&self, path: &[&str]) -> Option<&Value> {
        let mut current = self.inputs.as_ref()?;
        for key in path {
            current = current.as_object()?.get(*key)?;
        }
        Some(current)
    }

    /// The `inputs.parameters` object, if present
    pub fn parameters(&self) -> Option<&Map<String, Value>> {
        self.input_at(&["parameters"]).and_then(Value::as_object)
    }
}

fn named_children(value: Option<&Value>) -> Vec<ActionNode> {
    match value {
        Some(Value::Object(map)) => map
            .iter()
            .filter_map(|(name, child)| ActionNode::from_value(Some(name), child))
            .collect(),
        _ => Vec::new(),
    }
}

/// Object elements of arrays (at any array depth) become siblings under `key`
fn collect_nested(nested: &mut Vec<ActionNode>, key: &str, value: &Value) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_nested(nested, key, item);
            }
        }
        _ => nested.extend(ActionNode::from_value(Some(key), value)),
    }
}

/// A trigger entry of a definition
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerNode {
    pub name: String,
    pub kind: Option<String>,
    pub parameters: Map<String, Value>,
}

impl TriggerNode {
    fn from_value(name: &str, value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let parameters = object
            .get("inputs")
            .and_then(|inputs| inputs.get("parameters"))
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        Some(Self {
            name: name.to_string(),
            kind: object.get("type").and_then(Value::as_str).map(str::to_string),
            parameters,
        })
    }

    /// Entity the trigger subscribes to
    pub fn entity_name(&self) -> Option<&str> {
        self.first_param(&["subscriptionRequest/entityname", "entityname"])
            .and_then(Value::as_str)
    }

    /// Raw change-type message (bitmask number or free text)
    pub fn message(&self) -> Option<&Value> {
        self.first_param(&[
            "subscriptionRequest/message",
            "subscriptionRequest/notificationMessage",
            "message",
        ])
    }

    fn first_param(&self, keys: &[&str]) -> Option<&Value> {
        keys.iter()
            .filter_map(|key| self.parameters.get(*key))
            .find(|value| !value.is_null())
    }
}

/// Parsed `properties.definition` of a cloud flow
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowDefinition {
    pub triggers: Vec<TriggerNode>,
    /// Synthetic container whose `actions` are the definition's top-level actions
    pub root: ActionNode,
}

impl WorkflowDefinition {
    /// Parse the definition out of a raw `clientdata` string.
    ///
    /// Returns None when the string is not JSON or has no definition; callers
    /// skip such flows rather than failing the whole batch. Documents nested
    /// deeper than serde_json's recursion limit (128 levels) count as not JSON,
    /// which bounds the depth of the recursive node build below.
    pub fn from_client_data(client_data: &str) -> Option<Self> {
        if client_data.trim().is_empty() {
            return None;
        }
        let document: Value = match serde_json::from_str(client_data) {
            Ok(document) => document,
            Err(e) => {
                debug!("Skipping unparseable client data: {}", e);
                return None;
            }
        };
        let definition = document.get("properties")?.get("definition")?;
        Self::from_definition(definition)
    }

    /// Build from an already-parsed definition object
    pub fn from_definition(definition: &Value) -> Option<Self> {
        let object = definition.as_object()?;

        let triggers = match object.get("triggers") {
            Some(Value::Object(map)) => map
                .iter()
                .filter_map(|(name, trigger)| TriggerNode::from_value(name, trigger))
                .collect(),
            _ => Vec::new(),
        };

        let root = ActionNode {
            actions: named_children(object.get("actions")),
            ..Default::default()
        };

        Some(Self { triggers, root })
    }
}
