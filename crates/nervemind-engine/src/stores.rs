//! Storage capabilities consumed by the engine.
//!
//! Persistence itself lives outside the engine; these traits are the
//! boundary, and the in-memory implementations back tests and embedded
//! setups.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use nervemind_workflow::{Execution, Variable, VariableScope, Workflow};
use serde_json::Value;

use crate::credentials::Credential;
use crate::error::EngineError;

/// Workflow persistence.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>, EngineError>;
    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), EngineError>;
    async fn delete_workflow(&self, id: &str) -> Result<bool, EngineError>;
    async fn list_workflows(&self) -> Result<Vec<Workflow>, EngineError>;
}

/// Execution persistence. Appended to by the engine from the coordinator
/// task only; readers must tolerate missing `finished_at` on running runs.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn get_execution(&self, id: &str) -> Result<Option<Execution>, EngineError>;
    async fn save_execution(&self, execution: &Execution) -> Result<(), EngineError>;
    async fn delete_execution(&self, id: &str) -> Result<bool, EngineError>;
    async fn list_executions(&self, workflow_id: &str) -> Result<Vec<Execution>, EngineError>;
}

/// Credential persistence. Values stay encrypted in the store.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get_credential(&self, id: &str) -> Result<Option<Credential>, EngineError>;
    async fn save_credential(&self, credential: &Credential) -> Result<(), EngineError>;
    async fn delete_credential(&self, id: &str) -> Result<bool, EngineError>;
}

/// Variable persistence for global and workflow scopes.
#[async_trait]
pub trait VariableStore: Send + Sync {
    async fn list_global(&self) -> Result<Vec<Variable>, EngineError>;
    async fn list_for_workflow(&self, workflow_id: &str) -> Result<Vec<Variable>, EngineError>;
    async fn save_variable(&self, variable: &Variable) -> Result<(), EngineError>;
    async fn delete_variable(
        &self,
        name: &str,
        scope: VariableScope,
        workflow_id: Option<&str>,
    ) -> Result<bool, EngineError>;
}

/// Application settings.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get_setting(&self, key: &str) -> Result<Option<Value>, EngineError>;
    async fn set_setting(&self, key: &str, value: Value) -> Result<(), EngineError>;
}

// ============================================================================
// In-memory implementations
// ============================================================================

/// In-memory workflow storage.
#[derive(Default)]
pub struct MemoryWorkflowStore {
    workflows: Arc<RwLock<HashMap<String, Workflow>>>,
}

impl MemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for MemoryWorkflowStore {
    async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>, EngineError> {
        Ok(self.workflows.read().await.get(id).cloned())
    }

    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), EngineError> {
        self.workflows
            .write()
            .await
            .insert(workflow.id.clone(), workflow.clone());
        Ok(())
    }

    async fn delete_workflow(&self, id: &str) -> Result<bool, EngineError> {
        Ok(self.workflows.write().await.remove(id).is_some())
    }

    async fn list_workflows(&self) -> Result<Vec<Workflow>, EngineError> {
        Ok(self.workflows.read().await.values().cloned().collect())
    }
}

/// In-memory execution storage.
#[derive(Default)]
pub struct MemoryExecutionStore {
    executions: Arc<RwLock<HashMap<String, Execution>>>,
}

impl MemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionStore for MemoryExecutionStore {
    async fn get_execution(&self, id: &str) -> Result<Option<Execution>, EngineError> {
        Ok(self.executions.read().await.get(id).cloned())
    }

    async fn save_execution(&self, execution: &Execution) -> Result<(), EngineError> {
        self.executions
            .write()
            .await
            .insert(execution.id.clone(), execution.clone());
        Ok(())
    }

    async fn delete_execution(&self, id: &str) -> Result<bool, EngineError> {
        Ok(self.executions.write().await.remove(id).is_some())
    }

    async fn list_executions(&self, workflow_id: &str) -> Result<Vec<Execution>, EngineError> {
        let executions = self.executions.read().await;
        let mut matching: Vec<Execution> = executions
            .values()
            .filter(|e| e.workflow_id == workflow_id)
            .cloned()
            .collect();
        matching.sort_by_key(|e| e.started_at);
        Ok(matching)
    }
}

/// In-memory credential storage.
#[derive(Default)]
pub struct MemoryCredentialStore {
    credentials: Arc<RwLock<HashMap<String, Credential>>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get_credential(&self, id: &str) -> Result<Option<Credential>, EngineError> {
        Ok(self.credentials.read().await.get(id).cloned())
    }

    async fn save_credential(&self, credential: &Credential) -> Result<(), EngineError> {
        self.credentials
            .write()
            .await
            .insert(credential.id.clone(), credential.clone());
        Ok(())
    }

    async fn delete_credential(&self, id: &str) -> Result<bool, EngineError> {
        Ok(self.credentials.write().await.remove(id).is_some())
    }
}

fn variable_key(name: &str, scope: VariableScope, workflow_id: Option<&str>) -> String {
    format!("{:?}:{}:{}", scope, workflow_id.unwrap_or(""), name)
}

/// In-memory variable storage.
#[derive(Default)]
pub struct MemoryVariableStore {
    variables: Arc<RwLock<HashMap<String, Variable>>>,
}

impl MemoryVariableStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VariableStore for MemoryVariableStore {
    async fn list_global(&self) -> Result<Vec<Variable>, EngineError> {
        Ok(self
            .variables
            .read()
            .await
            .values()
            .filter(|v| v.scope == VariableScope::Global)
            .cloned()
            .collect())
    }

    async fn list_for_workflow(&self, workflow_id: &str) -> Result<Vec<Variable>, EngineError> {
        Ok(self
            .variables
            .read()
            .await
            .values()
            .filter(|v| {
                v.scope == VariableScope::Workflow
                    && v.workflow_id.as_deref() == Some(workflow_id)
            })
            .cloned()
            .collect())
    }

    async fn save_variable(&self, variable: &Variable) -> Result<(), EngineError> {
        let key = variable_key(
            &variable.name,
            variable.scope,
            variable.workflow_id.as_deref(),
        );
        self.variables.write().await.insert(key, variable.clone());
        Ok(())
    }

    async fn delete_variable(
        &self,
        name: &str,
        scope: VariableScope,
        workflow_id: Option<&str>,
    ) -> Result<bool, EngineError> {
        let key = variable_key(name, scope, workflow_id);
        Ok(self.variables.write().await.remove(&key).is_some())
    }
}

/// In-memory settings storage.
#[derive(Default)]
pub struct MemorySettingsStore {
    settings: Arc<RwLock<HashMap<String, Value>>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn get_setting(&self, key: &str) -> Result<Option<Value>, EngineError> {
        Ok(self.settings.read().await.get(key).cloned())
    }

    async fn set_setting(&self, key: &str, value: Value) -> Result<(), EngineError> {
        self.settings.write().await.insert(key.to_string(), value);
        Ok(())
    }
}

/// The full capability set handed to the engine.
#[derive(Clone)]
pub struct EngineStores {
    pub workflows: Arc<dyn WorkflowStore>,
    pub executions: Arc<dyn ExecutionStore>,
    pub credentials: Arc<dyn CredentialStore>,
    pub variables: Arc<dyn VariableStore>,
    pub settings: Arc<dyn SettingsStore>,
}

impl EngineStores {
    /// All-in-memory capability set.
    pub fn in_memory() -> Self {
        Self {
            workflows: Arc::new(MemoryWorkflowStore::new()),
            executions: Arc::new(MemoryExecutionStore::new()),
            credentials: Arc::new(MemoryCredentialStore::new()),
            variables: Arc::new(MemoryVariableStore::new()),
            settings: Arc::new(MemorySettingsStore::new()),
        }
    }
}
