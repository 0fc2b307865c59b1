//! Sample-workflow metadata carried by importable example workflows.

use serde::{Deserialize, Serialize};

use crate::workflow::Workflow;

/// Authoring difficulty of a sample.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SampleDifficulty {
    Beginner,
    Intermediate,
    Advanced,
}

/// One step of a sample's guided walkthrough.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuideStep {
    pub title: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highlight_nodes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_snippet: Option<String>,
}

/// Guided walkthrough shown alongside a sample.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SampleGuide {
    #[serde(default)]
    pub steps: Vec<GuideStep>,
}

/// A distributable sample: the workflow plus catalogue metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleWorkflow {
    pub id: String,
    pub category: String,
    pub difficulty: SampleDifficulty,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub guide: SampleGuide,
    /// Credential types the sample expects to be configured.
    #[serde(default)]
    pub required_credentials: Vec<String>,
    /// Environment variables the sample reads.
    #[serde(default)]
    pub environment_variables: Vec<String>,
    pub workflow: Workflow,
}

impl SampleWorkflow {
    pub fn from_json(json: &str) -> Result<Self, crate::WorkflowError> {
        let mut sample: SampleWorkflow = serde_json::from_str(json)?;
        for conn in &mut sample.workflow.connections {
            conn.normalise();
        }
        sample.workflow.validate()?;
        Ok(sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_import_validates_the_embedded_workflow() {
        let json = r#"{
            "id": "greet",
            "category": "starter",
            "difficulty": "beginner",
            "tags": ["hello"],
            "guide": {"steps": [{"title": "Run it", "content": "Press run."}]},
            "workflow": {
                "name": "greeting",
                "nodes": [{"id": "t", "type": "manualTrigger", "name": "Trigger"}],
                "connections": []
            }
        }"#;
        let sample = SampleWorkflow::from_json(json).unwrap();
        assert_eq!(sample.difficulty, SampleDifficulty::Beginner);
        assert_eq!(sample.guide.steps.len(), 1);
        assert_eq!(sample.workflow.nodes.len(), 1);
    }
}
