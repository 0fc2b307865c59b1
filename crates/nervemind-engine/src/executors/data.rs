//! Data-shaping executors: set, filter, sort, loop, limit.

use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use nervemind_workflow::{lookup_path, DataObject, Node};
use serde_json::{json, Value};

use crate::error::EngineError;
use crate::executor::{NodeCategory, NodeDescriptor, NodeExecutor, NodeOutput};
use crate::runtime::ExecutionContext;

/// Set node - assigns literal or expression-derived values into the input.
pub struct SetExecutor;

#[async_trait]
impl NodeExecutor for SetExecutor {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            type_id: "set",
            display_name: "Set",
            category: NodeCategory::Data,
            trigger_kind: None,
            description: "Assigns values into the flowing data map.",
            config_schema: json!({
                "type": "object",
                "properties": {
                    "values": {"type": "object"}
                },
                "required": ["values"]
            }),
        }
    }

    async fn execute(
        &self,
        node: &Node,
        input: &DataObject,
        _ctx: &ExecutionContext,
    ) -> Result<NodeOutput, EngineError> {
        let mut output = input.clone();
        if let Some(Value::Object(values)) = node.get_parameter("values") {
            for (key, value) in values {
                output.insert(key.clone(), value.clone());
            }
        }
        Ok(NodeOutput::main(output))
    }
}

/// One filter condition.
#[derive(Debug, Clone)]
struct Condition {
    field: String,
    operator: String,
    value: Value,
}

impl Condition {
    fn parse(raw: &Value) -> Option<Self> {
        Some(Self {
            field: raw.get("field")?.as_str()?.to_string(),
            operator: raw
                .get("operator")
                .and_then(Value::as_str)
                .unwrap_or("equals")
                .to_string(),
            value: raw.get("value").cloned().unwrap_or(Value::Null),
        })
    }

    fn matches(&self, item: &Value) -> bool {
        let actual = lookup_path(item, &self.field).cloned().unwrap_or(Value::Null);
        let expected = &self.value;
        match self.operator.as_str() {
            "equals" => loose_equals(&actual, expected),
            "ne" | "notEquals" => !loose_equals(&actual, expected),
            "gt" => numeric_pair(&actual, expected).is_some_and(|(a, b)| a > b),
            "lt" => numeric_pair(&actual, expected).is_some_and(|(a, b)| a < b),
            "gte" => numeric_pair(&actual, expected).is_some_and(|(a, b)| a >= b),
            "lte" => numeric_pair(&actual, expected).is_some_and(|(a, b)| a <= b),
            "contains" => string_of(&actual).contains(&string_of(expected)),
            "startsWith" => string_of(&actual).starts_with(&string_of(expected)),
            "endsWith" => string_of(&actual).ends_with(&string_of(expected)),
            _ => false,
        }
    }
}

fn string_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn numeric_pair(a: &Value, b: &Value) -> Option<(f64, f64)> {
    Some((as_number(a)?, as_number(b)?))
}

fn loose_equals(a: &Value, b: &Value) -> bool {
    if let Some((x, y)) = numeric_pair(a, b) {
        return x == y;
    }
    match (a, b) {
        (Value::String(x), y) | (y, Value::String(x)) if !y.is_string() => *x == string_of(y),
        _ => a == b,
    }
}

/// Filter node - keeps or drops items by a condition set and reports
/// `_filteredCount` / `_originalCount` / `_removedCount` beside the result.
pub struct FilterExecutor;

#[async_trait]
impl NodeExecutor for FilterExecutor {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            type_id: "filter",
            display_name: "Filter",
            category: NodeCategory::Data,
            trigger_kind: None,
            description: "Filters a list field by a set of conditions.",
            config_schema: json!({
                "type": "object",
                "properties": {
                    "inputField": {"type": "string"},
                    "outputField": {"type": "string"},
                    "conditions": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "field": {"type": "string"},
                                "operator": {
                                    "type": "string",
                                    "enum": ["equals", "ne", "gt", "lt", "gte", "lte",
                                             "contains", "startsWith", "endsWith"]
                                },
                                "value": {}
                            },
                            "required": ["field"]
                        }
                    },
                    "combineWith": {"type": "string", "enum": ["and", "or"]},
                    "keepMatching": {"type": "boolean"}
                },
                "required": ["conditions"]
            }),
        }
    }

    fn validate(&self, config: &DataObject) -> HashMap<String, String> {
        let mut errors = HashMap::new();
        match config.get("conditions").and_then(Value::as_array) {
            Some(list) if !list.is_empty() => {}
            _ => {
                errors.insert(
                    "conditions".to_string(),
                    "at least one condition is required".to_string(),
                );
            }
        }
        errors
    }

    async fn execute(
        &self,
        node: &Node,
        input: &DataObject,
        _ctx: &ExecutionContext,
    ) -> Result<NodeOutput, EngineError> {
        let input_field = node.parameter_str("inputField").unwrap_or("items");
        let output_field = node
            .parameter_str("outputField")
            .unwrap_or("filtered")
            .to_string();
        let combine_or = node.parameter_str("combineWith") == Some("or");
        let keep_matching = node
            .get_parameter("keepMatching")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        let items = match input.get(input_field) {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };

        let conditions: Vec<Condition> = node
            .get_parameter("conditions")
            .and_then(Value::as_array)
            .map(|list| list.iter().filter_map(Condition::parse).collect())
            .unwrap_or_default();

        let original_count = items.len();
        let kept: Vec<Value> = items
            .into_iter()
            .filter(|item| {
                let matched = if conditions.is_empty() {
                    true
                } else if combine_or {
                    conditions.iter().any(|c| c.matches(item))
                } else {
                    conditions.iter().all(|c| c.matches(item))
                };
                matched == keep_matching
            })
            .collect();
        let filtered_count = kept.len();

        // Everything in the input survives except the output field and the
        // three meta counters.
        let mut output = input.clone();
        output.insert(output_field, Value::Array(kept));
        output.insert("_filteredCount".to_string(), json!(filtered_count));
        output.insert("_originalCount".to_string(), json!(original_count));
        output.insert(
            "_removedCount".to_string(),
            json!(original_count - filtered_count),
        );
        Ok(NodeOutput::main(output))
    }
}

/// Sort node - orders a list field by a key, stable on ties.
pub struct SortExecutor;

#[async_trait]
impl NodeExecutor for SortExecutor {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            type_id: "sort",
            display_name: "Sort",
            category: NodeCategory::Data,
            trigger_kind: None,
            description: "Sorts a list field by a key, ascending or descending.",
            config_schema: json!({
                "type": "object",
                "properties": {
                    "field": {"type": "string"},
                    "order": {"type": "string", "enum": ["asc", "desc"]},
                    "inputField": {"type": "string"}
                },
                "required": ["field"]
            }),
        }
    }

    async fn execute(
        &self,
        node: &Node,
        input: &DataObject,
        _ctx: &ExecutionContext,
    ) -> Result<NodeOutput, EngineError> {
        let field = node.parameter_str("field").unwrap_or("id").to_string();
        let descending = node.parameter_str("order") == Some("desc");
        let input_field = node.parameter_str("inputField").unwrap_or("items");

        let mut items = match input.get(input_field) {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };

        // Vec::sort_by is stable, so ties keep insertion order.
        items.sort_by(|a, b| {
            let va = lookup_path(a, &field);
            let vb = lookup_path(b, &field);
            let ord = compare_values(va, vb);
            if descending {
                ord.reverse()
            } else {
                ord
            }
        });

        let mut output = input.clone();
        output.insert(input_field.to_string(), Value::Array(items));
        Ok(NodeOutput::main(output))
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => {
            if let Some((fx, fy)) = numeric_pair(x, y) {
                fx.partial_cmp(&fy).unwrap_or(Ordering::Equal)
            } else {
                string_of(x).cmp(&string_of(y))
            }
        }
    }
}

/// Loop node - declares per-item iteration of its downstream body. The
/// executor resolves the item list; the engine drives the iterations and
/// aggregates per-iteration outputs in insertion order.
pub struct LoopExecutor;

impl LoopExecutor {
    /// Coerce the interpolated `items` parameter into a list.
    pub fn resolve_items(node: &Node) -> Result<Vec<Value>, EngineError> {
        match node.get_parameter("items") {
            Some(Value::Array(items)) => Ok(items.clone()),
            Some(Value::String(raw)) => serde_json::from_str::<Vec<Value>>(raw).map_err(|_| {
                EngineError::for_node(&node.id, format!("loop items is not a list: {raw}"))
            }),
            Some(other) => Err(EngineError::for_node(
                &node.id,
                format!("loop items is not a list: {other}"),
            )),
            None => Ok(Vec::new()),
        }
    }

    pub fn item_variable(node: &Node) -> String {
        node.parameter_str("itemVariableName")
            .unwrap_or("item")
            .to_string()
    }
}

#[async_trait]
impl NodeExecutor for LoopExecutor {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            type_id: "loop",
            display_name: "Loop",
            category: NodeCategory::Control,
            trigger_kind: None,
            description: "Runs the downstream body once per item of a list.",
            config_schema: json!({
                "type": "object",
                "properties": {
                    "items": {},
                    "itemVariableName": {"type": "string"}
                },
                "required": ["items"]
            }),
        }
    }

    async fn execute(
        &self,
        node: &Node,
        input: &DataObject,
        _ctx: &ExecutionContext,
    ) -> Result<NodeOutput, EngineError> {
        let items = Self::resolve_items(node)?;
        let mut output = input.clone();
        output.insert("items".to_string(), Value::Array(items));
        output.insert(
            "itemVariable".to_string(),
            Value::String(Self::item_variable(node)),
        );
        Ok(NodeOutput::main(output))
    }
}

/// Limit node - truncates a list field.
pub struct LimitExecutor;

#[async_trait]
impl NodeExecutor for LimitExecutor {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            type_id: "limit",
            display_name: "Limit",
            category: NodeCategory::Data,
            trigger_kind: None,
            description: "Keeps at most the first N items of a list field.",
            config_schema: json!({
                "type": "object",
                "properties": {
                    "maxItems": {"type": "integer", "minimum": 0},
                    "inputField": {"type": "string"}
                }
            }),
        }
    }

    async fn execute(
        &self,
        node: &Node,
        input: &DataObject,
        _ctx: &ExecutionContext,
    ) -> Result<NodeOutput, EngineError> {
        let max_items = node
            .get_parameter("maxItems")
            .and_then(Value::as_u64)
            .unwrap_or(10) as usize;
        let input_field = node.parameter_str("inputField").unwrap_or("items");

        let mut output = input.clone();
        if let Some(Value::Array(items)) = input.get(input_field) {
            let limited: Vec<Value> = items.iter().take(max_items).cloned().collect();
            output.insert(input_field.to_string(), Value::Array(limited));
        }
        Ok(NodeOutput::main(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::ExecutionLogger;
    use crate::runtime::{EngineConfig, ExecutionContext};
    use nervemind_workflow::{TriggerKind, Workflow};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn test_ctx() -> ExecutionContext {
        ExecutionContext::new(
            "test-exec",
            Arc::new(Workflow::new("test")),
            TriggerKind::Manual,
            DataObject::new(),
            DataObject::new(),
            Arc::new(ExecutionLogger::new()),
            EngineConfig::default(),
            CancellationToken::new(),
        )
    }

    fn filter_node(conditions: Value, keep_matching: bool) -> Node {
        let mut node = Node::new("Filter", "filter");
        node.set_parameter("conditions", conditions);
        node.set_parameter("combineWith", json!("and"));
        node.set_parameter("keepMatching", json!(keep_matching));
        node
    }

    #[tokio::test]
    async fn filter_keeps_matching_items_and_counts() {
        let node = filter_node(
            json!([{"field": "status", "operator": "equals", "value": "active"}]),
            true,
        );
        let mut input = DataObject::new();
        input.insert(
            "items".to_string(),
            json!([
                {"name": "A", "status": "active"},
                {"name": "B", "status": "inactive"},
                {"name": "C", "status": "active"}
            ]),
        );
        input.insert("untouched".to_string(), json!("still here"));

        let ctx = test_ctx();
        let output = FilterExecutor.execute(&node, &input, &ctx).await.unwrap();
        let data = output.primary().unwrap();

        let filtered = data["filtered"].as_array().unwrap();
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered[0]["name"], "A");
        assert_eq!(filtered[1]["name"], "C");
        assert_eq!(data["_filteredCount"], json!(2));
        assert_eq!(data["_originalCount"], json!(3));
        assert_eq!(data["_removedCount"], json!(1));
        // Untouched input keys survive.
        assert_eq!(data["untouched"], json!("still here"));
        assert!(data.contains_key("items"));
    }

    #[tokio::test]
    async fn filter_counts_always_sum() {
        let node = filter_node(
            json!([{"field": "n", "operator": "gt", "value": 5}]),
            true,
        );
        let mut input = DataObject::new();
        input.insert("items".to_string(), json!([{"n": 3}, {"n": 7}, {"n": 9}]));

        let ctx = test_ctx();
        let output = FilterExecutor.execute(&node, &input, &ctx).await.unwrap();
        let data = output.primary().unwrap();
        let original = data["_originalCount"].as_u64().unwrap();
        let filtered = data["_filteredCount"].as_u64().unwrap();
        let removed = data["_removedCount"].as_u64().unwrap();
        assert_eq!(original, filtered + removed);
    }

    #[tokio::test]
    async fn sort_is_stable_and_honours_order() {
        let mut node = Node::new("Sort", "sort");
        node.set_parameter("field", json!("rank"));
        node.set_parameter("order", json!("asc"));

        let mut input = DataObject::new();
        input.insert(
            "items".to_string(),
            json!([
                {"rank": 2, "tag": "first-two"},
                {"rank": 1, "tag": "one"},
                {"rank": 2, "tag": "second-two"}
            ]),
        );

        let ctx = test_ctx();
        let output = SortExecutor.execute(&node, &input, &ctx).await.unwrap();
        let items = output.primary().unwrap()["items"].as_array().unwrap();
        assert_eq!(items[0]["tag"], "one");
        assert_eq!(items[1]["tag"], "first-two");
        assert_eq!(items[2]["tag"], "second-two");
    }

    #[test]
    fn loop_items_coercion() {
        let mut node = Node::new("Loop", "loop");
        node.set_parameter("items", json!([1, 2, 3]));
        assert_eq!(LoopExecutor::resolve_items(&node).unwrap().len(), 3);

        node.set_parameter("items", json!("[\"a\", \"b\"]"));
        assert_eq!(LoopExecutor::resolve_items(&node).unwrap().len(), 2);

        node.set_parameter("items", json!("not json"));
        assert!(LoopExecutor::resolve_items(&node).is_err());
    }
}
