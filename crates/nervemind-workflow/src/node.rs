//! Node types and definitions.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::data::DataObject;

/// Position of a node on the editor canvas.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// A workflow node instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Unique identifier for this node instance.
    pub id: String,
    /// Node type identifier (e.g., "httpRequest").
    #[serde(rename = "type")]
    pub node_type: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Position on the workflow canvas.
    #[serde(default)]
    pub position: Position,
    /// Node configuration parameters. Never null; empty map allowed.
    #[serde(default)]
    pub parameters: DataObject,
    /// Whether the node is disabled.
    #[serde(default)]
    pub disabled: bool,
    /// Referenced credential, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential_id: Option<String>,
    /// Notes/comments for this node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Node {
    /// Create a new node with default settings.
    pub fn new(name: impl Into<String>, node_type: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: Uuid::new_v4().to_string(),
            node_type: node_type.into(),
            name,
            position: Position::default(),
            parameters: DataObject::new(),
            disabled: false,
            credential_id: None,
            notes: None,
        }
    }

    /// Set a parameter value.
    pub fn set_parameter(&mut self, key: impl Into<String>, value: Value) {
        self.parameters.insert(key.into(), value);
    }

    /// Builder-style parameter assignment.
    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.set_parameter(key, value);
        self
    }

    /// Get a parameter value.
    pub fn get_parameter(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key)
    }

    /// Get a parameter as a string slice.
    pub fn parameter_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(|v| v.as_str())
    }

    /// Check if this node is a trigger node.
    pub fn is_trigger(&self) -> bool {
        self.node_type.ends_with("Trigger") || self.node_type.contains(".trigger")
    }

    /// Structural invariants: non-blank id and type.
    pub fn validate(&self) -> Result<(), crate::WorkflowError> {
        if self.id.trim().is_empty() {
            return Err(crate::WorkflowError::InvalidWorkflow(
                "Node id must not be blank".to_string(),
            ));
        }
        if self.node_type.trim().is_empty() {
            return Err(crate::WorkflowError::InvalidWorkflow(format!(
                "Node '{}' has a blank type",
                self.id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_type_is_rejected() {
        let mut node = Node::new("Bad", "httpRequest");
        node.node_type = "  ".to_string();
        assert!(node.validate().is_err());
    }

    #[test]
    fn trigger_detection() {
        assert!(Node::new("T", "manualTrigger").is_trigger());
        assert!(Node::new("T", "scheduleTrigger").is_trigger());
        assert!(!Node::new("H", "httpRequest").is_trigger());
    }
}
