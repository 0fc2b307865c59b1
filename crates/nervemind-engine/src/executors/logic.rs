//! Routing and combination executors: if, switch, merge.

use std::collections::HashMap;

use async_trait::async_trait;
use nervemind_workflow::{DataObject, Node, HANDLE_DEFAULT, HANDLE_FALSE, HANDLE_TRUE};
use serde_json::{json, Value};

use crate::error::EngineError;
use crate::executor::{NodeCategory, NodeDescriptor, NodeExecutor, NodeOutput};
use crate::expression::functions::is_truthy;
use crate::runtime::ExecutionContext;

/// If node - routes to the `true` or `false` handle.
pub struct IfExecutor;

#[async_trait]
impl NodeExecutor for IfExecutor {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            type_id: "if",
            display_name: "If",
            category: NodeCategory::Logic,
            trigger_kind: None,
            description: "Routes to the true or false branch by a condition expression.",
            config_schema: json!({
                "type": "object",
                "properties": {
                    "condition": {"type": "string"}
                },
                "required": ["condition"]
            }),
        }
    }

    fn validate(&self, config: &DataObject) -> HashMap<String, String> {
        let mut errors = HashMap::new();
        if config
            .get("condition")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .unwrap_or("")
            .is_empty()
        {
            errors.insert("condition".to_string(), "condition is required".to_string());
        }
        errors
    }

    async fn execute(
        &self,
        node: &Node,
        input: &DataObject,
        _ctx: &ExecutionContext,
    ) -> Result<NodeOutput, EngineError> {
        // The engine interpolated the condition already; what is left is a
        // rendered truthy/falsy value.
        let condition = match node.get_parameter("condition") {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
            Some(Value::String(s)) => is_truthy(s),
            _ => false,
        };
        let handle = if condition { HANDLE_TRUE } else { HANDLE_FALSE };
        Ok(NodeOutput::routed(handle, input.clone()))
    }
}

/// Switch node - routes to the first case whose value matches.
pub struct SwitchExecutor;

#[async_trait]
impl NodeExecutor for SwitchExecutor {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            type_id: "switch",
            display_name: "Switch",
            category: NodeCategory::Logic,
            trigger_kind: None,
            description: "Routes to the output handle of the matching case, else default.",
            config_schema: json!({
                "type": "object",
                "properties": {
                    "value": {"type": "string"},
                    "cases": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "value": {"type": "string"},
                                "output": {"type": "string"}
                            },
                            "required": ["value", "output"]
                        }
                    },
                    "default": {"type": "string"}
                },
                "required": ["value", "cases"]
            }),
        }
    }

    async fn execute(
        &self,
        node: &Node,
        input: &DataObject,
        _ctx: &ExecutionContext,
    ) -> Result<NodeOutput, EngineError> {
        fn rendered(value: &Value) -> String {
            match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }
        }

        let value = node
            .get_parameter("value")
            .map(rendered)
            .unwrap_or_default();
        let cases = node
            .get_parameter("cases")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        for case in &cases {
            let case_value = case.get("value").map(rendered).unwrap_or_default();
            if case_value == value {
                let output = case
                    .get("output")
                    .and_then(Value::as_str)
                    .unwrap_or(HANDLE_DEFAULT);
                return Ok(NodeOutput::routed(output, input.clone()));
            }
        }

        let default = node.parameter_str("default").unwrap_or(HANDLE_DEFAULT);
        Ok(NodeOutput::routed(default, input.clone()))
    }
}

/// Merge node - combines multiple incoming paths, either merging maps
/// (declaration order, last wins) or concatenating item lists.
pub struct MergeExecutor;

#[async_trait]
impl NodeExecutor for MergeExecutor {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            type_id: "merge",
            display_name: "Merge",
            category: NodeCategory::Logic,
            trigger_kind: None,
            description: "Combines incoming branches by map merge or list concatenation.",
            config_schema: json!({
                "type": "object",
                "properties": {
                    "mode": {"type": "string", "enum": ["mergeMaps", "concatLists"]},
                    "field": {"type": "string"}
                }
            }),
        }
    }

    async fn execute(
        &self,
        node: &Node,
        input: &DataObject,
        ctx: &ExecutionContext,
    ) -> Result<NodeOutput, EngineError> {
        let mode = node.parameter_str("mode").unwrap_or("mergeMaps");
        match mode {
            "concatLists" => {
                let field = node.parameter_str("field").unwrap_or("items").to_string();
                let mut combined: Vec<Value> = Vec::new();
                for predecessor in ctx.predecessor_outputs(&node.id) {
                    if let Some(Value::Array(items)) = predecessor.get(&field) {
                        combined.extend(items.iter().cloned());
                    }
                }
                let mut output = input.clone();
                output.insert(field, Value::Array(combined));
                Ok(NodeOutput::main(output))
            }
            // Map merge is what the engine's input union already produced.
            _ => Ok(NodeOutput::main(input.clone())),
        }
    }
}
