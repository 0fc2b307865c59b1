//! Variables resolved into the expression scope at run start.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Declared type of a variable's value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    #[default]
    String,
    Number,
    Boolean,
    Json,
    Secret,
}

/// Visibility of a variable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum VariableScope {
    #[default]
    Global,
    Workflow,
    Execution,
}

/// A named value. Name is unique within `(scope, workflow_id)`. Secret
/// values are stored encrypted; decryption is the engine's concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub name: String,
    pub value: String,
    #[serde(rename = "type", default)]
    pub variable_type: VariableType,
    #[serde(default)]
    pub scope: VariableScope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
}

impl Variable {
    /// Create a global variable.
    pub fn global(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            variable_type: VariableType::String,
            scope: VariableScope::Global,
            workflow_id: None,
        }
    }

    /// Create a workflow-scoped variable.
    pub fn workflow(
        name: impl Into<String>,
        value: impl Into<String>,
        workflow_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            variable_type: VariableType::String,
            scope: VariableScope::Workflow,
            workflow_id: Some(workflow_id.into()),
        }
    }

    /// Create an execution-scoped variable. These live only within one run.
    pub fn execution(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            variable_type: VariableType::String,
            scope: VariableScope::Execution,
            workflow_id: None,
        }
    }

    pub fn with_type(mut self, variable_type: VariableType) -> Self {
        self.variable_type = variable_type;
        self
    }

    /// Functional updater: same variable, new value.
    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = value.into();
        self
    }

    /// Parse the stored string into its declared type, falling back to the
    /// raw string when parsing fails.
    pub fn typed_value(&self) -> Value {
        match self.variable_type {
            VariableType::Number => self
                .value
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(self.value.clone())),
            VariableType::Boolean => match self.value.parse::<bool>() {
                Ok(b) => Value::Bool(b),
                Err(_) => Value::String(self.value.clone()),
            },
            VariableType::Json => serde_json::from_str(&self.value)
                .unwrap_or_else(|_| Value::String(self.value.clone())),
            VariableType::String | VariableType::Secret => Value::String(self.value.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn typed_value_parses_by_declared_type() {
        let n = Variable::global("n", "2.5").with_type(VariableType::Number);
        assert_eq!(n.typed_value(), json!(2.5));

        let b = Variable::global("b", "true").with_type(VariableType::Boolean);
        assert_eq!(b.typed_value(), json!(true));

        let j = Variable::global("j", r#"{"a":1}"#).with_type(VariableType::Json);
        assert_eq!(j.typed_value(), json!({"a": 1}));

        let bad = Variable::global("x", "not-a-number").with_type(VariableType::Number);
        assert_eq!(bad.typed_value(), json!("not-a-number"));
    }

    #[test]
    fn with_value_returns_updated_copy() {
        let v = Variable::workflow("key", "old", "wf-1");
        let updated = v.clone().with_value("new");
        assert_eq!(updated.value, "new");
        assert_eq!(updated.workflow_id.as_deref(), Some("wf-1"));
        assert_eq!(v.value, "old");
    }
}
