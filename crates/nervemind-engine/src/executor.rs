//! Node executor contract and registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use nervemind_workflow::{DataObject, Node, TriggerKind, HANDLE_MAIN};
use serde_json::Value;

use crate::error::EngineError;
use crate::logger::LogEntry;
use crate::runtime::{ExecutionContext, HandleMap};

/// Broad grouping for palette and docs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeCategory {
    Trigger,
    Action,
    Logic,
    Data,
    Control,
    Integration,
}

/// Static identity of a node type.
#[derive(Debug, Clone)]
pub struct NodeDescriptor {
    /// Stable type id, the value of a node's `type` field.
    pub type_id: &'static str,
    pub display_name: &'static str,
    pub category: NodeCategory,
    /// Set for trigger executors.
    pub trigger_kind: Option<TriggerKind>,
    /// Help text shown in the editor.
    pub description: &'static str,
    /// JSON-Schema for the node's configuration.
    pub config_schema: Value,
}

/// Output of one node evaluation: a data map per output handle. Most nodes
/// emit only `main`; routing nodes emit the handle they took.
#[derive(Debug, Clone, Default)]
pub struct NodeOutput {
    handles: HandleMap,
}

impl NodeOutput {
    /// Output on the `main` handle.
    pub fn main(data: DataObject) -> Self {
        Self::routed(HANDLE_MAIN, data)
    }

    /// Output on a named handle.
    pub fn routed(handle: impl Into<String>, data: DataObject) -> Self {
        let mut handles = HandleMap::new();
        handles.insert(handle.into(), data);
        Self { handles }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, handle: impl Into<String>, data: DataObject) {
        self.handles.insert(handle.into(), data);
    }

    pub fn get(&self, handle: &str) -> Option<&DataObject> {
        self.handles.get(handle)
    }

    /// The map consumers read when they don't care about routing: `main`
    /// if present, otherwise the first populated handle.
    pub fn primary(&self) -> Option<&DataObject> {
        self.handles
            .get(HANDLE_MAIN)
            .or_else(|| self.handles.values().next())
    }

    pub fn into_handles(self) -> HandleMap {
        self.handles
    }

    pub fn handles(&self) -> &HandleMap {
        &self.handles
    }
}

/// The capability implementing a node type.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Identity: type id, display name, category, schema, help.
    fn descriptor(&self) -> NodeDescriptor;

    /// Validate a configuration map. Empty result means valid; keys are
    /// field names, values are messages.
    fn validate(&self, _config: &DataObject) -> HashMap<String, String> {
        HashMap::new()
    }

    /// Execute the node. `node.parameters` arrive with expressions already
    /// interpolated; `input` is the merged map of predecessor outputs plus
    /// trigger input. Executors must preserve unmodified input keys unless
    /// explicitly consuming them.
    async fn execute(
        &self,
        node: &Node,
        input: &DataObject,
        ctx: &ExecutionContext,
    ) -> Result<NodeOutput, EngineError>;

    /// Lifecycle events the executor declared interest in. Trigger
    /// executors use this for shutdown.
    fn on_engine_event(&self, _entry: &LogEntry) {}
}

/// Immutable executor set captured at submit time. A registry update never
/// affects an in-flight run.
#[derive(Clone, Default)]
pub struct ExecutorSnapshot {
    executors: HashMap<String, Arc<dyn NodeExecutor>>,
}

impl ExecutorSnapshot {
    pub fn get(&self, node_type: &str) -> Option<Arc<dyn NodeExecutor>> {
        self.executors.get(node_type).cloned()
    }

    /// Fan a lifecycle event out to executors that subscribed.
    pub fn broadcast_event(&self, entry: &LogEntry) {
        for executor in self.executors.values() {
            executor.on_engine_event(entry);
        }
    }
}

/// Registry of node executors: built-ins plus discovered plugin handles
/// under the same contract. Node types re-resolve lazily per run via
/// [`NodeExecutorRegistry::snapshot`].
pub struct NodeExecutorRegistry {
    executors: DashMap<String, Arc<dyn NodeExecutor>>,
}

impl NodeExecutorRegistry {
    /// Registry with every built-in executor registered.
    pub fn new() -> Self {
        let registry = Self {
            executors: DashMap::new(),
        };

        for executor in crate::executors::builtin_executors() {
            registry.register(executor);
        }

        registry
    }

    /// Empty registry, for tests that want full control.
    pub fn bare() -> Self {
        Self {
            executors: DashMap::new(),
        }
    }

    /// Register an executor under its declared type id.
    pub fn register(&self, executor: Arc<dyn NodeExecutor>) {
        self.executors
            .insert(executor.descriptor().type_id.to_string(), executor);
    }

    /// Get an executor for a node type.
    pub fn get(&self, node_type: &str) -> Option<Arc<dyn NodeExecutor>> {
        self.executors.get(node_type).map(|e| e.value().clone())
    }

    /// Capture the current executor set for one run.
    pub fn snapshot(&self) -> ExecutorSnapshot {
        ExecutorSnapshot {
            executors: self
                .executors
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
        }
    }

    /// Registered type ids.
    pub fn node_types(&self) -> Vec<String> {
        self.executors.iter().map(|e| e.key().clone()).collect()
    }
}

impl Default for NodeExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
