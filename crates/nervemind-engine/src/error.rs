//! Error types for the execution engine.

use nervemind_workflow::WorkflowError;
use thiserror::Error;

/// Errors that can occur during workflow execution.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Node execution error in '{node_id}': {message}")]
    NodeExecution { node_id: String, message: String },

    #[error("External API error{}: {message}", api_label(.api_name, .status_code))]
    ExternalApi {
        api_name: Option<String>,
        status_code: Option<u16>,
        message: String,
    },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Execution was cancelled")]
    Cancelled,

    #[error("Node '{node_id}' timed out after {millis} ms")]
    Timeout { node_id: String, millis: u64 },

    #[error("No executor found for node type: {0}")]
    NodeTypeNotFound(String),

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Subworkflow nesting exceeds depth limit of {limit}")]
    RecursionLimit { limit: usize },

    #[error("Internal error: {0}")]
    Internal(String),
}

fn api_label(api_name: &Option<String>, status_code: &Option<u16>) -> String {
    match (api_name, status_code) {
        (Some(name), Some(code)) => format!(" ({name}, status {code})"),
        (Some(name), None) => format!(" ({name})"),
        (None, Some(code)) => format!(" (status {code})"),
        (None, None) => String::new(),
    }
}

impl EngineError {
    /// Tag an arbitrary error as a failure of a specific node.
    pub fn for_node(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::NodeExecution {
            node_id: node_id.into(),
            message: message.into(),
        }
    }

    /// Whether this error is the transient sort a retry policy may care
    /// about. The wrapping retry node still decides; this is advisory.
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::ExternalApi { status_code, .. } => match status_code {
                Some(code) => *code == 429 || *code >= 500,
                None => true,
            },
            EngineError::Timeout { .. } => true,
            _ => false,
        }
    }
}
