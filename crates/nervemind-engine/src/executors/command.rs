//! Shell command executor.

use std::collections::HashMap;

use async_trait::async_trait;
use nervemind_workflow::{DataObject, Node};
use serde_json::{json, Value};

use crate::error::EngineError;
use crate::executor::{NodeCategory, NodeDescriptor, NodeExecutor, NodeOutput};
use crate::runtime::ExecutionContext;

/// executeCommand node - runs a process and captures its output.
pub struct ExecuteCommandExecutor;

#[async_trait]
impl NodeExecutor for ExecuteCommandExecutor {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            type_id: "executeCommand",
            display_name: "Execute Command",
            category: NodeCategory::Action,
            trigger_kind: None,
            description: "Runs a command and flows its stdout, stderr and exit code onward.",
            config_schema: json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string"},
                    "args": {"type": "array", "items": {"type": "string"}},
                    "cwd": {"type": "string"}
                },
                "required": ["command"]
            }),
        }
    }

    fn validate(&self, config: &DataObject) -> HashMap<String, String> {
        let mut errors = HashMap::new();
        if config
            .get("command")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or("")
            .is_empty()
        {
            errors.insert("command".to_string(), "command is required".to_string());
        }
        errors
    }

    async fn execute(
        &self,
        node: &Node,
        input: &DataObject,
        ctx: &ExecutionContext,
    ) -> Result<NodeOutput, EngineError> {
        let program = node.parameter_str("command").map(str::trim).unwrap_or("");
        if program.is_empty() {
            return Err(EngineError::for_node(&node.id, "command is required"));
        }

        let mut command = tokio::process::Command::new(program);
        if let Some(Value::Array(args)) = node.get_parameter("args") {
            for arg in args {
                if let Some(arg) = arg.as_str() {
                    command.arg(arg);
                }
            }
        }
        if let Some(cwd) = node.parameter_str("cwd") {
            command.current_dir(cwd);
        }
        command.kill_on_drop(true);
        command.stdin(std::process::Stdio::null());

        let cancel = ctx.cancellation_token();
        let result = tokio::select! {
            result = command.output() => result,
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
        };

        let output_data = result
            .map_err(|e| EngineError::for_node(&node.id, format!("command failed: {e}")))?;

        let mut output = input.clone();
        output.insert(
            "stdout".to_string(),
            Value::String(String::from_utf8_lossy(&output_data.stdout).into_owned()),
        );
        output.insert(
            "stderr".to_string(),
            Value::String(String::from_utf8_lossy(&output_data.stderr).into_owned()),
        );
        output.insert(
            "exitCode".to_string(),
            json!(output_data.status.code().unwrap_or(-1)),
        );
        Ok(NodeOutput::main(output))
    }
}
