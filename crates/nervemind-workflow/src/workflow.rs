//! Workflow definition types.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::connection::{graph, Connection};
use crate::data::DataObject;
use crate::error::{Diagnostic, WorkflowError};
use crate::execution::TriggerKind;
use crate::node::Node;

/// A workflow definition: a directed graph of nodes authored by a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    /// Unique workflow identifier. Blank on import means "assign one".
    #[serde(default)]
    pub id: String,

    /// Workflow name.
    pub name: String,

    /// Optional description.
    #[serde(default)]
    pub description: String,

    /// Workflow nodes.
    #[serde(default)]
    pub nodes: Vec<Node>,

    /// Directed edges between node handles.
    #[serde(default)]
    pub connections: Vec<Connection>,

    /// Arbitrary settings map.
    #[serde(default)]
    pub settings: DataObject,

    /// Preferred trigger kind, when the author pinned one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_kind: Option<TriggerKind>,
}

impl Workflow {
    /// Create a new empty workflow.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: String::new(),
            nodes: Vec::new(),
            connections: Vec::new(),
            settings: DataObject::new(),
            trigger_kind: None,
        }
    }

    /// Add a node to the workflow.
    pub fn add_node(&mut self, node: Node) {
        self.nodes.push(node);
    }

    /// Get a node by id.
    pub fn get_node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Get a node by display name.
    pub fn get_node_by_name(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Connect two nodes main-to-main.
    pub fn connect(&mut self, source: &str, target: &str) -> Result<(), WorkflowError> {
        self.connect_handles(source, "main", target, "main")
    }

    /// Connect two nodes with explicit handles.
    pub fn connect_handles(
        &mut self,
        source: &str,
        source_output: &str,
        target: &str,
        target_input: &str,
    ) -> Result<(), WorkflowError> {
        if self.get_node(source).is_none() {
            return Err(WorkflowError::NodeNotFound(source.to_string()));
        }
        if self.get_node(target).is_none() {
            return Err(WorkflowError::NodeNotFound(target.to_string()));
        }
        let conn = Connection::with_handles(source, source_output, target, target_input)?;
        self.connections.push(conn);
        Ok(())
    }

    /// All node ids in declaration order.
    pub fn node_ids(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.id.clone()).collect()
    }

    /// Trigger-category nodes.
    pub fn trigger_nodes(&self) -> Vec<&Node> {
        self.nodes.iter().filter(|n| n.is_trigger()).collect()
    }

    /// Import from the interchange JSON format. Blank ids are assigned,
    /// blank handles normalise to `"main"`, and structure is validated.
    pub fn from_json(json: &str) -> Result<Self, WorkflowError> {
        let mut workflow: Workflow = serde_json::from_str(json)?;
        if workflow.id.trim().is_empty() {
            workflow.id = Uuid::new_v4().to_string();
        }
        for conn in &mut workflow.connections {
            conn.normalise();
        }
        workflow.validate()?;
        Ok(workflow)
    }

    /// Export to the interchange JSON format.
    pub fn to_json(&self) -> Result<String, WorkflowError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Validate the workflow structure. Fatal problems only; advisory
    /// findings come from [`Workflow::diagnostics`].
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.nodes.is_empty() {
            return Err(WorkflowError::InvalidWorkflow(
                "workflow has no nodes".to_string(),
            ));
        }

        let mut ids = HashSet::new();
        for node in &self.nodes {
            node.validate()?;
            if !ids.insert(&node.id) {
                return Err(WorkflowError::InvalidWorkflow(format!(
                    "duplicate node id: {}",
                    node.id
                )));
            }
        }

        for conn in &self.connections {
            if conn.source_node_id == conn.target_node_id {
                return Err(WorkflowError::ConnectionError(format!(
                    "Node '{}' cannot be connected to itself",
                    conn.source_node_id
                )));
            }
            if self.get_node(&conn.source_node_id).is_none() {
                return Err(WorkflowError::NodeNotFound(conn.source_node_id.clone()));
            }
            if self.get_node(&conn.target_node_id).is_none() {
                return Err(WorkflowError::NodeNotFound(conn.target_node_id.clone()));
            }
        }

        Ok(())
    }

    /// Advisory findings surfaced before a run. None of these refuse
    /// execution.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        let mut findings = Vec::new();

        let entry_ids = graph::entry_nodes(&self.node_ids(), &self.connections);
        let has_trigger_entry = entry_ids
            .iter()
            .filter_map(|id| self.get_node(id))
            .any(|n| n.is_trigger());
        if !has_trigger_entry {
            findings.push(Diagnostic::warning("no trigger node"));
        }

        if self.nodes.len() > 1 {
            let mut connected: HashSet<&str> = HashSet::new();
            for conn in &self.connections {
                connected.insert(conn.source_node_id.as_str());
                connected.insert(conn.target_node_id.as_str());
            }
            for node in &self.nodes {
                if !connected.contains(node.id.as_str()) {
                    findings.push(
                        Diagnostic::warning(format!("disconnected node: {}", node.name))
                            .for_node(&node.id),
                    );
                }
            }
        }

        findings
    }
}

/// Builder for creating workflows.
pub struct WorkflowBuilder {
    workflow: Workflow,
}

impl WorkflowBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            workflow: Workflow::new(name),
        }
    }

    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.workflow.description = desc.into();
        self
    }

    pub fn node(mut self, node: Node) -> Self {
        self.workflow.add_node(node);
        self
    }

    pub fn connect(mut self, source: &str, target: &str) -> Result<Self, WorkflowError> {
        self.workflow.connect(source, target)?;
        Ok(self)
    }

    pub fn connect_handles(
        mut self,
        source: &str,
        source_output: &str,
        target: &str,
        target_input: &str,
    ) -> Result<Self, WorkflowError> {
        self.workflow
            .connect_handles(source, source_output, target, target_input)?;
        Ok(self)
    }

    pub fn build(self) -> Result<Workflow, WorkflowError> {
        self.workflow.validate()?;
        Ok(self.workflow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn two_node_workflow() -> Workflow {
        let mut wf = Workflow::new("test");
        let mut trigger = Node::new("Trigger", "manualTrigger");
        trigger.id = "trigger".to_string();
        let mut http = Node::new("Fetch", "httpRequest");
        http.id = "fetch".to_string();
        http.set_parameter("url", json!("https://example.com"));
        wf.add_node(trigger);
        wf.add_node(http);
        wf.connect("trigger", "fetch").unwrap();
        wf
    }

    #[test]
    fn empty_workflow_is_invalid() {
        let wf = Workflow::new("empty");
        let err = wf.validate().unwrap_err();
        assert!(err.to_string().contains("workflow has no nodes"));
    }

    #[test]
    fn json_round_trip_preserves_structure() {
        let wf = two_node_workflow();
        let json = wf.to_json().unwrap();
        let restored = Workflow::from_json(&json).unwrap();

        assert_eq!(restored.id, wf.id);
        assert_eq!(restored.node_ids(), wf.node_ids());
        assert_eq!(restored.connections, wf.connections);
        assert_eq!(
            restored.get_node("fetch").unwrap().parameters,
            wf.get_node("fetch").unwrap().parameters
        );
    }

    #[test]
    fn missing_handles_default_to_main_on_import() {
        let json = r#"{
            "name": "import",
            "nodes": [
                {"id": "a", "type": "manualTrigger", "name": "A"},
                {"id": "b", "type": "noOp", "name": "B"}
            ],
            "connections": [
                {"id": "c1", "sourceNodeId": "a", "targetNodeId": "b"}
            ]
        }"#;
        let wf = Workflow::from_json(json).unwrap();
        assert_eq!(wf.connections[0].source_output, "main");
        assert_eq!(wf.connections[0].target_input, "main");
        assert!(!wf.id.is_empty(), "blank workflow id should be assigned");
    }

    #[test]
    fn imported_self_loop_is_refused() {
        let json = r#"{
            "name": "loopy",
            "nodes": [{"id": "a", "type": "noOp", "name": "A"}],
            "connections": [
                {"id": "c1", "sourceNodeId": "a", "targetNodeId": "a"}
            ]
        }"#;
        assert!(Workflow::from_json(json).is_err());
    }

    #[test]
    fn diagnostics_flag_missing_trigger_and_isolated_nodes() {
        let mut wf = Workflow::new("diag");
        let mut a = Node::new("A", "noOp");
        a.id = "a".to_string();
        let mut b = Node::new("B", "noOp");
        b.id = "b".to_string();
        let mut island = Node::new("Island", "noOp");
        island.id = "island".to_string();
        wf.add_node(a);
        wf.add_node(b);
        wf.add_node(island);
        wf.connect("a", "b").unwrap();

        let findings = wf.diagnostics();
        assert!(findings.iter().any(|d| d.message.contains("no trigger")));
        assert!(findings
            .iter()
            .any(|d| d.node_id.as_deref() == Some("island")));
    }
}
