//! Control-construct executors.
//!
//! These carry identity, schema and validation for the control node types;
//! the orchestration itself (fan-out/join, catch routing, re-invocation,
//! permit waits, child runs) lives in the engine, which intercepts these
//! types during dispatch.

use std::collections::HashMap;

use async_trait::async_trait;
use nervemind_workflow::{DataObject, Node, HANDLE_TRY};
use serde_json::{json, Value};

use crate::error::EngineError;
use crate::executor::{NodeCategory, NodeDescriptor, NodeExecutor, NodeOutput};
use crate::runtime::ExecutionContext;

/// Backoff shape for the retry construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed,
    Linear,
    Exponential,
}

impl Backoff {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fixed" => Some(Backoff::Fixed),
            "linear" => Some(Backoff::Linear),
            "exponential" => Some(Backoff::Exponential),
            _ => None,
        }
    }

    /// Delay before attempt number `attempt` (1-based; attempt 1 has no
    /// delay).
    pub fn delay_ms(&self, base_ms: u64, attempt: u32) -> u64 {
        if attempt <= 1 {
            return 0;
        }
        let step = u64::from(attempt - 1);
        match self {
            Backoff::Fixed => base_ms,
            Backoff::Linear => base_ms.saturating_mul(step),
            Backoff::Exponential => base_ms.saturating_mul(1u64 << (step - 1).min(32)),
        }
    }
}

/// Retry policy read from a retry node's interpolated parameters.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay_ms: u64,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn from_node(node: &Node) -> Self {
        Self {
            max_attempts: node
                .get_parameter("maxAttempts")
                .and_then(Value::as_u64)
                .unwrap_or(3)
                .max(1) as u32,
            delay_ms: node
                .get_parameter("delayMs")
                .and_then(Value::as_u64)
                .unwrap_or(1000),
            backoff: node
                .parameter_str("backoff")
                .and_then(Backoff::parse)
                .unwrap_or(Backoff::Fixed),
        }
    }
}

/// Parallel node - fans its outgoing branches onto the worker pool; the
/// engine joins when all complete.
pub struct ParallelExecutor;

#[async_trait]
impl NodeExecutor for ParallelExecutor {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            type_id: "parallel",
            display_name: "Parallel",
            category: NodeCategory::Control,
            trigger_kind: None,
            description: "Evaluates each outgoing branch concurrently and joins on completion.",
            config_schema: json!({"type": "object", "properties": {}}),
        }
    }

    async fn execute(
        &self,
        _node: &Node,
        input: &DataObject,
        _ctx: &ExecutionContext,
    ) -> Result<NodeOutput, EngineError> {
        Ok(NodeOutput::main(input.clone()))
    }
}

/// TryCatch node - protects the subgraph behind its `try` handle; on
/// failure control routes to `catch` with `{error, nodeId}` injected.
pub struct TryCatchExecutor;

#[async_trait]
impl NodeExecutor for TryCatchExecutor {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            type_id: "tryCatch",
            display_name: "Try / Catch",
            category: NodeCategory::Control,
            trigger_kind: None,
            description: "Runs the try branch; on failure routes to catch with the error injected.",
            config_schema: json!({"type": "object", "properties": {}}),
        }
    }

    async fn execute(
        &self,
        _node: &Node,
        input: &DataObject,
        _ctx: &ExecutionContext,
    ) -> Result<NodeOutput, EngineError> {
        Ok(NodeOutput::routed(HANDLE_TRY, input.clone()))
    }
}

/// Retry node - re-invokes its wrapped successor on failure.
pub struct RetryExecutor;

#[async_trait]
impl NodeExecutor for RetryExecutor {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            type_id: "retry",
            display_name: "Retry",
            category: NodeCategory::Control,
            trigger_kind: None,
            description: "Retries the wrapped node with a configurable delay and backoff.",
            config_schema: json!({
                "type": "object",
                "properties": {
                    "maxAttempts": {"type": "integer", "minimum": 1},
                    "delayMs": {"type": "integer", "minimum": 0},
                    "backoff": {"type": "string", "enum": ["fixed", "linear", "exponential"]}
                }
            }),
        }
    }

    fn validate(&self, config: &DataObject) -> HashMap<String, String> {
        let mut errors = HashMap::new();
        if let Some(attempts) = config.get("maxAttempts").and_then(Value::as_i64) {
            if attempts < 1 {
                errors.insert(
                    "maxAttempts".to_string(),
                    "maxAttempts must be at least 1".to_string(),
                );
            }
        }
        if let Some(backoff) = config.get("backoff").and_then(Value::as_str) {
            if Backoff::parse(backoff).is_none() {
                errors.insert(
                    "backoff".to_string(),
                    "backoff must be fixed, linear or exponential".to_string(),
                );
            }
        }
        errors
    }

    async fn execute(
        &self,
        _node: &Node,
        input: &DataObject,
        _ctx: &ExecutionContext,
    ) -> Result<NodeOutput, EngineError> {
        Ok(NodeOutput::main(input.clone()))
    }
}

/// RateLimit node - the engine acquires a permit from the named bucket
/// before letting the flow continue past this node.
pub struct RateLimitExecutor;

#[async_trait]
impl NodeExecutor for RateLimitExecutor {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            type_id: "rateLimit",
            display_name: "Rate Limit",
            category: NodeCategory::Control,
            trigger_kind: None,
            description: "Throttles the flow through a process-wide permit bucket.",
            config_schema: json!({
                "type": "object",
                "properties": {
                    "bucketId": {"type": "string"},
                    "permitsPerInterval": {"type": "integer", "minimum": 1},
                    "intervalMs": {"type": "integer", "minimum": 1}
                },
                "required": ["bucketId"]
            }),
        }
    }

    fn validate(&self, config: &DataObject) -> HashMap<String, String> {
        let mut errors = HashMap::new();
        if config
            .get("bucketId")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or("")
            .is_empty()
        {
            errors.insert("bucketId".to_string(), "bucketId is required".to_string());
        }
        errors
    }

    async fn execute(
        &self,
        _node: &Node,
        input: &DataObject,
        _ctx: &ExecutionContext,
    ) -> Result<NodeOutput, EngineError> {
        Ok(NodeOutput::main(input.clone()))
    }
}

/// Subworkflow node - synchronously runs another workflow by id. The child
/// execution is recorded but not top-level.
pub struct SubworkflowExecutor;

#[async_trait]
impl NodeExecutor for SubworkflowExecutor {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            type_id: "subworkflow",
            display_name: "Subworkflow",
            category: NodeCategory::Control,
            trigger_kind: None,
            description: "Runs another workflow and flows its output onward.",
            config_schema: json!({
                "type": "object",
                "properties": {
                    "workflowId": {"type": "string"}
                },
                "required": ["workflowId"]
            }),
        }
    }

    fn validate(&self, config: &DataObject) -> HashMap<String, String> {
        let mut errors = HashMap::new();
        if config
            .get("workflowId")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or("")
            .is_empty()
        {
            errors.insert(
                "workflowId".to_string(),
                "workflowId is required".to_string(),
            );
        }
        errors
    }

    async fn execute(
        &self,
        _node: &Node,
        input: &DataObject,
        _ctx: &ExecutionContext,
    ) -> Result<NodeOutput, EngineError> {
        Ok(NodeOutput::main(input.clone()))
    }
}

/// No-op node - passes through unchanged.
pub struct NoOpExecutor;

#[async_trait]
impl NodeExecutor for NoOpExecutor {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            type_id: "noOp",
            display_name: "No Operation",
            category: NodeCategory::Action,
            trigger_kind: None,
            description: "Passes data through without modification.",
            config_schema: json!({"type": "object", "properties": {}}),
        }
    }

    async fn execute(
        &self,
        _node: &Node,
        input: &DataObject,
        _ctx: &ExecutionContext,
    ) -> Result<NodeOutput, EngineError> {
        Ok(NodeOutput::main(input.clone()))
    }
}

/// Wait node - pauses the flow for a duration, observing cancellation.
pub struct WaitExecutor;

#[async_trait]
impl NodeExecutor for WaitExecutor {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            type_id: "wait",
            display_name: "Wait",
            category: NodeCategory::Control,
            trigger_kind: None,
            description: "Sleeps for a configured amount of time.",
            config_schema: json!({
                "type": "object",
                "properties": {
                    "amount": {"type": "integer", "minimum": 0},
                    "unit": {"type": "string", "enum": ["milliseconds", "seconds", "minutes", "hours"]}
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
        let amount = node
            .get_parameter("amount")
            .and_then(Value::as_u64)
            .unwrap_or(1000);
        let unit = node.parameter_str("unit").unwrap_or("milliseconds");
        let duration_ms = match unit {
            "seconds" => amount * 1000,
            "minutes" => amount * 60 * 1000,
            "hours" => amount * 60 * 60 * 1000,
            _ => amount,
        };

        let cancel = ctx.cancellation_token();
        tokio::select! {
            _ = tokio::time::sleep(std::time::Duration::from_millis(duration_ms)) => {}
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
        }

        Ok(NodeOutput::main(input.clone()))
    }
}

/// StopAndError node - stops the flow with a configured error message.
pub struct StopAndErrorExecutor;

#[async_trait]
impl NodeExecutor for StopAndErrorExecutor {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            type_id: "stopAndError",
            display_name: "Stop and Error",
            category: NodeCategory::Control,
            trigger_kind: None,
            description: "Fails the execution with a configured message.",
            config_schema: json!({
                "type": "object",
                "properties": {
                    "errorMessage": {"type": "string"}
                }
            }),
        }
    }

    async fn execute(
        &self,
        node: &Node,
        _input: &DataObject,
        _ctx: &ExecutionContext,
    ) -> Result<NodeOutput, EngineError> {
        let message = node
            .parameter_str("errorMessage")
            .unwrap_or("Workflow stopped by stopAndError node");
        Err(EngineError::for_node(&node.id, message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_schedules() {
        assert_eq!(Backoff::Fixed.delay_ms(100, 1), 0);
        assert_eq!(Backoff::Fixed.delay_ms(100, 2), 100);
        assert_eq!(Backoff::Fixed.delay_ms(100, 4), 100);
        assert_eq!(Backoff::Linear.delay_ms(100, 3), 200);
        assert_eq!(Backoff::Exponential.delay_ms(100, 2), 100);
        assert_eq!(Backoff::Exponential.delay_ms(100, 4), 400);
    }

    #[test]
    fn retry_policy_defaults() {
        let node = Node::new("Retry", "retry");
        let policy = RetryPolicy::from_node(&node);
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_ms, 1000);
        assert_eq!(policy.backoff, Backoff::Fixed);
    }
}
