//! Trigger executors. In a normal run the trigger node is the unique
//! entry; its output is `{triggeredAt, ...}` plus whatever the stimulus
//! carried.

use async_trait::async_trait;
use nervemind_workflow::{DataObject, Node, TriggerKind};
use serde_json::{json, Value};

use crate::error::EngineError;
use crate::executor::{NodeCategory, NodeDescriptor, NodeExecutor, NodeOutput};
use crate::runtime::ExecutionContext;

fn triggered(input: &DataObject, extra: &[(&str, Value)]) -> DataObject {
    let mut output = input.clone();
    output.insert(
        "triggeredAt".to_string(),
        Value::String(chrono::Utc::now().to_rfc3339()),
    );
    for (key, value) in extra {
        output.insert((*key).to_string(), value.clone());
    }
    output
}

/// Manual trigger - entry point for user-invoked executions.
pub struct ManualTriggerExecutor;

#[async_trait]
impl NodeExecutor for ManualTriggerExecutor {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            type_id: "manualTrigger",
            display_name: "Manual Trigger",
            category: NodeCategory::Trigger,
            trigger_kind: Some(TriggerKind::Manual),
            description: "Starts the workflow when invoked by hand.",
            config_schema: json!({"type": "object", "properties": {}}),
        }
    }

    async fn execute(
        &self,
        _node: &Node,
        input: &DataObject,
        _ctx: &ExecutionContext,
    ) -> Result<NodeOutput, EngineError> {
        Ok(NodeOutput::main(triggered(input, &[])))
    }
}

/// Schedule trigger - fired by the dispatcher's timer set.
pub struct ScheduleTriggerExecutor;

#[async_trait]
impl NodeExecutor for ScheduleTriggerExecutor {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            type_id: "scheduleTrigger",
            display_name: "Schedule Trigger",
            category: NodeCategory::Trigger,
            trigger_kind: Some(TriggerKind::Schedule),
            description: "Starts the workflow on a cron schedule or fixed interval.",
            config_schema: json!({
                "type": "object",
                "properties": {
                    "cron": {"type": "string"},
                    "intervalMs": {"type": "integer", "minimum": 1}
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
        let mut extra = Vec::new();
        if let Some(cron) = node.parameter_str("cron") {
            extra.push(("cron", Value::String(cron.to_string())));
        }
        Ok(NodeOutput::main(triggered(input, &extra)))
    }
}

/// Webhook trigger - fired when the host hands a request payload to the
/// dispatcher. The request body, headers and query arrive as input.
pub struct WebhookTriggerExecutor;

#[async_trait]
impl NodeExecutor for WebhookTriggerExecutor {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            type_id: "webhookTrigger",
            display_name: "Webhook Trigger",
            category: NodeCategory::Trigger,
            trigger_kind: Some(TriggerKind::Webhook),
            description: "Starts the workflow when a webhook request arrives.",
            config_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"}
                },
                "required": ["path"]
            }),
        }
    }

    async fn execute(
        &self,
        node: &Node,
        input: &DataObject,
        _ctx: &ExecutionContext,
    ) -> Result<NodeOutput, EngineError> {
        let path = node.parameter_str("path").unwrap_or("/webhook");
        Ok(NodeOutput::main(triggered(
            input,
            &[("webhookPath", Value::String(path.to_string()))],
        )))
    }
}

/// File-event trigger - fired by the dispatcher's watch set. The changed
/// path and event kind arrive as input.
pub struct FileEventTriggerExecutor;

#[async_trait]
impl NodeExecutor for FileEventTriggerExecutor {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            type_id: "fileEventTrigger",
            display_name: "File Event Trigger",
            category: NodeCategory::Trigger,
            trigger_kind: Some(TriggerKind::FileEvent),
            description: "Starts the workflow when a watched path changes.",
            config_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"}
                },
                "required": ["path"]
            }),
        }
    }

    async fn execute(
        &self,
        node: &Node,
        input: &DataObject,
        _ctx: &ExecutionContext,
    ) -> Result<NodeOutput, EngineError> {
        let mut extra = Vec::new();
        if let Some(path) = node.parameter_str("path") {
            extra.push(("watchedPath", Value::String(path.to_string())));
        }
        Ok(NodeOutput::main(triggered(input, &extra)))
    }
}
