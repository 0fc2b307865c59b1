//! Execution records and status state machine.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::data::DataObject;

/// How an execution was started.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum TriggerKind {
    #[default]
    Manual,
    Schedule,
    Webhook,
    FileEvent,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Manual => "manual",
            TriggerKind::Schedule => "schedule",
            TriggerKind::Webhook => "webhook",
            TriggerKind::FileEvent => "fileEvent",
        }
    }
}

/// Execution status.
///
/// Terminal = `Success | Failed | Cancelled`; running = `Running | Waiting`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    #[default]
    Pending,
    Running,
    Waiting,
    Success,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Success | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ExecutionStatus::Running | ExecutionStatus::Waiting)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Waiting => "waiting",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ExecutionStatus::Pending),
            "running" => Some(ExecutionStatus::Running),
            "waiting" => Some(ExecutionStatus::Waiting),
            "success" => Some(ExecutionStatus::Success),
            "failed" => Some(ExecutionStatus::Failed),
            "cancelled" => Some(ExecutionStatus::Cancelled),
            _ => None,
        }
    }

    /// Legal moves along the execution state machine. Only the engine
    /// transitions an execution.
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Running, Success)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Running, Waiting)
                | (Waiting, Running)
                | (Waiting, Cancelled)
        )
    }
}

/// Status of a single node's evaluation. Unlike executions, a node can be
/// skipped outright (disabled, or unreachable along the taken branches).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeExecutionStatus {
    #[default]
    Running,
    Success,
    Failed,
    Cancelled,
    Skipped,
}

impl NodeExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeExecutionStatus::Running => "running",
            NodeExecutionStatus::Success => "success",
            NodeExecutionStatus::Failed => "failed",
            NodeExecutionStatus::Cancelled => "cancelled",
            NodeExecutionStatus::Skipped => "skipped",
        }
    }
}

/// The record of one node's evaluation within an execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeExecution {
    pub node_id: String,
    pub node_name: String,
    pub node_type: String,
    pub status: NodeExecutionStatus,
    pub started_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub input_data: DataObject,
    #[serde(default)]
    pub output_data: DataObject,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl NodeExecution {
    pub fn started(node_id: &str, node_name: &str, node_type: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            node_name: node_name.to_string(),
            node_type: node_type.to_string(),
            status: NodeExecutionStatus::Running,
            started_at: chrono::Utc::now(),
            finished_at: None,
            input_data: DataObject::new(),
            output_data: DataObject::new(),
            error_message: None,
        }
    }

    /// Record for a node that was never invoked.
    pub fn skipped(node_id: &str, node_name: &str, node_type: &str) -> Self {
        let now = chrono::Utc::now();
        Self {
            node_id: node_id.to_string(),
            node_name: node_name.to_string(),
            node_type: node_type.to_string(),
            status: NodeExecutionStatus::Skipped,
            started_at: now,
            finished_at: Some(now),
            input_data: DataObject::new(),
            output_data: DataObject::new(),
            error_message: None,
        }
    }

    pub fn succeed(&mut self, output: DataObject) {
        self.status = NodeExecutionStatus::Success;
        self.output_data = output;
        self.finished_at = Some(chrono::Utc::now());
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = NodeExecutionStatus::Failed;
        self.error_message = Some(message.into());
        self.finished_at = Some(chrono::Utc::now());
    }
}

/// One end-to-end run of a workflow against a trigger input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub id: String,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub trigger_kind: TriggerKind,
    pub started_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub input_data: DataObject,
    #[serde(default)]
    pub output_data: DataObject,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Records appended in evaluation order, skipped nodes included.
    #[serde(default)]
    pub node_executions: Vec<NodeExecution>,
    /// Parent execution when this run is a subworkflow child.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_execution_id: Option<String>,
}

impl Execution {
    pub fn new(workflow_id: &str, trigger_kind: TriggerKind, input_data: DataObject) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            workflow_id: workflow_id.to_string(),
            status: ExecutionStatus::Pending,
            trigger_kind,
            started_at: chrono::Utc::now(),
            finished_at: None,
            input_data,
            output_data: DataObject::new(),
            error_message: None,
            node_executions: Vec::new(),
            parent_execution_id: None,
        }
    }

    /// Move to a new status, enforcing the state machine. `finished_at` is
    /// set exactly when the new status is terminal.
    pub fn transition(&mut self, next: ExecutionStatus) -> Result<(), crate::WorkflowError> {
        if !self.status.can_transition_to(next) {
            return Err(crate::WorkflowError::InvalidTransition {
                from: self.status.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }
        self.status = next;
        if next.is_terminal() {
            self.finished_at = Some(chrono::Utc::now());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(ExecutionStatus::Success.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(ExecutionStatus::Waiting.is_running());
    }

    #[test]
    fn transition_rules() {
        let mut exec = Execution::new("wf", TriggerKind::Manual, DataObject::new());
        assert!(exec.transition(ExecutionStatus::Success).is_err());
        exec.transition(ExecutionStatus::Running).unwrap();
        assert!(exec.finished_at.is_none());
        exec.transition(ExecutionStatus::Waiting).unwrap();
        exec.transition(ExecutionStatus::Running).unwrap();
        exec.transition(ExecutionStatus::Success).unwrap();
        assert!(exec.finished_at.is_some());
        assert!(exec.transition(ExecutionStatus::Running).is_err());
    }
}
