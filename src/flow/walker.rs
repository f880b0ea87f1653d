// Action-graph traversal
//
// Visits every node reachable from a root exactly once. The traversal itself
// keeps an explicit stack; tree depth is bounded earlier, when the definition
// is parsed (see `WorkflowDefinition::from_client_data`).

use super::definition::ActionNode;

/// Invoke `visitor` once for `root` and once for every descendant
pub fn walk<'a, F>(root: &'a ActionNode, mut visitor: F)
where
    F: FnMut(&'a ActionNode),
{
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        visitor(node);
        // Reverse so children are visited in declaration order
        let children: Vec<&ActionNode> = node.children().collect();
        stack.extend(children.into_iter().rev());
    }
}

/// Collect every node reachable from `root`
pub fn collect_nodes(root: &ActionNode) -> Vec<&ActionNode> {
    let mut nodes = Vec::new();
    walk(root, |node| nodes.push(node));
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::definition::WorkflowDefinition;
    use serde_json::json;
    use std::collections::HashMap;

    fn names(definition: &WorkflowDefinition) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        walk(&definition.root, |node| {
            if let Some(name) = &node.name {
                *counts.entry(name.clone()).or_insert(0) += 1;
            }
        });
        counts
    }

    #[test]
    fn test_walk_visits_every_structural_position_once() {
        let definition = WorkflowDefinition::from_definition(&json!({
            "actions": {
                "Scope": {
                    "type": "Scope",
                    "actions": {
                        "Condition": {
                            "type": "If",
                            "actions": { "Then_update": { "type": "OpenApiConnection" } },
                            "else": {
                                "actions": { "Else_update": { "type": "OpenApiConnection" } }
                            }
                        }
                    }
                },
                "Switch": {
                    "type": "Switch",
                    "cases": {
                        "Case_1": { "actions": { "Case_action": { "type": "Compose" } } }
                    },
                    "default": {
                        "actions": { "Default_action": { "type": "Compose" } }
                    }
                },
                "Parallel": {
                    "type": "Parallel",
                    "branches": [
                        { "actions": { "Branch_action": { "type": "Compose" } } },
                        "not-a-node"
                    ]
                },
                "Custom": {
                    "type": "Custom",
                    "extension": { "payload": { "type": "Compose" } }
                }
            }
        }))
        .unwrap();

        let counts = names(&definition);
        for expected in [
            "Scope",
            "Condition",
            "Then_update",
            "else",
            "Else_update",
            "Switch",
            "Case_1",
            "Case_action",
            "default",
            "Default_action",
            "Parallel",
            "Branch_action",
            "Custom",
            "extension",
            "payload",
        ] {
            assert_eq!(counts.get(expected), Some(&1), "node {} visited once", expected);
        }
    }

    #[test]
    fn test_walk_skips_configuration_keys() {
        let definition = WorkflowDefinition::from_definition(&json!({
            "actions": {
                "Update": {
                    "type": "OpenApiConnection",
                    "inputs": {
                        "host": { "type": "Nested_in_host" },
                        "parameters": { "inner": { "type": "Nested_in_parameters" } }
                    },
                    "metadata": { "flowSystemMetadata": { "type": "Nested_in_metadata" } }
                }
            }
        }))
        .unwrap();

        let mut kinds = Vec::new();
        walk(&definition.root, |node| {
            if let Some(kind) = &node.kind {
                kinds.push(kind.clone());
            }
        });
        assert_eq!(kinds, vec!["OpenApiConnection".to_string()]);
    }

    #[test]
    fn test_walk_handles_deep_nesting() {
        let mut value = json!({ "type": "Compose" });
        for i in 0..100 {
            value = json!({ "type": "Scope", "actions": { format!("Scope_{}", i): value } });
        }
        let node = ActionNode::from_value(Some("Top"), &value).unwrap();
        assert_eq!(collect_nodes(&node).len(), 101);
    }

    #[test]
    fn test_walk_descends_into_arrays_under_extra_keys() {
        let definition = WorkflowDefinition::from_definition(&json!({
            "actions": {
                "Custom": {
                    "type": "VendorStep",
                    "steps": [
                        { "type": "OpenApiConnection", "actions": { "Inner": { "type": "Compose" } } },
                        [{ "type": "Terminate" }]
                    ]
                }
            }
        }))
        .unwrap();

        let mut kinds = Vec::new();
        walk(&definition.root, |node| {
            if let Some(kind) = &node.kind {
                kinds.push(kind.clone());
            }
        });
        assert_eq!(kinds, vec!["VendorStep", "OpenApiConnection", "Compose", "Terminate"]);
        assert_eq!(names(&definition).get("Inner"), Some(&1));
    }

    #[test]
    fn test_walk_tolerates_missing_sections() {
        let definition = WorkflowDefinition::from_definition(&json!({
            "actions": { "A": { "type": "Compose", "actions": "oops", "cases": [1, 2] } }
        }))
        .unwrap();
        // root + A
        assert_eq!(collect_nodes(&definition.root).len(), 2);
    }
}
