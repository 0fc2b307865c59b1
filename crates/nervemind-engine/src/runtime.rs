//! Runtime configuration and the per-run execution context.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use nervemind_workflow::{DataObject, TriggerKind, Workflow};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::credentials::DecryptedCredential;
use crate::error::EngineError;
use crate::logger::{ExecutionLogger, LogCategory, LogEntry, LogLevel};

/// Node outputs keyed by output handle.
pub type HandleMap = HashMap<String, DataObject>;

/// Engine-wide configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Default per-node deadline when a node sets none.
    pub node_timeout: Duration,
    /// Whole-execution deadline.
    pub execution_timeout: Duration,
    /// Bound on concurrently evaluating parallel branches.
    pub worker_threads: usize,
    /// Subworkflow nesting cap.
    pub max_subworkflow_depth: usize,
    /// Grace window for shutdown before force-cancel.
    pub shutdown_grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            node_timeout: Duration::from_secs(300),
            execution_timeout: Duration::from_secs(3600),
            worker_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            max_subworkflow_depth: 16,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Resolves a credential id to its decrypted form, on demand.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve(&self, id: &str) -> Result<DecryptedCredential, EngineError>;
}

/// Pause notification payload for step mode.
#[derive(Debug, Clone)]
pub struct StepPause {
    pub node_id: String,
    pub node_name: String,
    pub node_index: usize,
    pub total_nodes: usize,
}

/// External control surface for step-debug mode. The engine suspends after
/// each node until [`StepController::continue_step`] releases it.
pub struct StepController {
    permits: Semaphore,
    pause_tx: watch::Sender<Option<StepPause>>,
    pause_rx: watch::Receiver<Option<StepPause>>,
    cancel_requested: AtomicBool,
    bound_cancel: RwLock<Option<CancellationToken>>,
}

impl StepController {
    pub fn new() -> Arc<Self> {
        let (pause_tx, pause_rx) = watch::channel(None);
        Arc::new(Self {
            permits: Semaphore::new(0),
            pause_tx,
            pause_rx,
            cancel_requested: AtomicBool::new(false),
            bound_cancel: RwLock::new(None),
        })
    }

    /// Release the engine to run the next node.
    pub fn continue_step(&self) {
        self.permits.add_permits(1);
    }

    /// Abort the stepped run; maps to cooperative cancellation.
    pub fn cancel_step_execution(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
        if let Some(token) = self.bound_cancel.read().as_ref() {
            token.cancel();
        }
        self.permits.add_permits(1);
    }

    /// Observe pause notifications; `None` means the engine is running.
    pub fn pause_events(&self) -> watch::Receiver<Option<StepPause>> {
        self.pause_rx.clone()
    }

    pub(crate) fn bind(&self, cancel: CancellationToken) {
        if self.cancel_requested.load(Ordering::SeqCst) {
            cancel.cancel();
        }
        *self.bound_cancel.write() = Some(cancel);
    }

    pub(crate) async fn wait(&self, pause: StepPause) {
        let _ = self.pause_tx.send(Some(pause));
        match self.permits.acquire().await {
            Ok(permit) => permit.forget(),
            Err(_) => return,
        }
        let _ = self.pause_tx.send(None);
    }
}

/// Per-run state bag. The engine exclusively owns one of these for the
/// duration of a run; executors see it read-mostly and may only mutate
/// execution-scope variables.
pub struct ExecutionContext {
    pub execution_id: String,
    pub workflow: Arc<Workflow>,
    pub trigger_kind: TriggerKind,
    pub trigger_input: DataObject,
    pub logger: Arc<ExecutionLogger>,
    pub config: EngineConfig,
    pub credential_resolver: Option<Arc<dyn CredentialResolver>>,
    pub step: Option<Arc<StepController>>,
    /// Subworkflow nesting depth of this run.
    pub depth: usize,

    variables: RwLock<DataObject>,
    node_outputs: RwLock<HashMap<String, HandleMap>>,
    history: RwLock<Vec<String>>,
    cancel: CancellationToken,
    started: Instant,
}

impl ExecutionContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        execution_id: impl Into<String>,
        workflow: Arc<Workflow>,
        trigger_kind: TriggerKind,
        trigger_input: DataObject,
        variables: DataObject,
        logger: Arc<ExecutionLogger>,
        config: EngineConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            workflow,
            trigger_kind,
            trigger_input,
            logger,
            config,
            credential_resolver: None,
            step: None,
            depth: 0,
            variables: RwLock::new(variables),
            node_outputs: RwLock::new(HashMap::new()),
            history: RwLock::new(Vec::new()),
            cancel,
            started: Instant::now(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Time left before the whole-execution deadline.
    pub fn remaining(&self) -> Duration {
        self.config
            .execution_timeout
            .saturating_sub(self.started.elapsed())
    }

    /// Snapshot of the merged variable scope.
    pub fn variables_snapshot(&self) -> DataObject {
        self.variables.read().clone()
    }

    /// Set an execution-scope variable. Emits a `variable` event carrying
    /// preview and full value.
    pub fn set_variable(&self, name: impl Into<String>, value: Value) {
        let name = name.into();
        self.logger.emit(
            LogEntry::new(
                LogLevel::Debug,
                LogCategory::Variable,
                &self.execution_id,
                format!("variable '{name}' set"),
            )
            .with_context("name", Value::String(name.clone()))
            .with_payload(&value),
        );
        self.variables.write().insert(name, value);
    }

    pub fn get_variable(&self, name: &str) -> Option<Value> {
        self.variables.read().get(name).cloned()
    }

    /// Record a node's handle-keyed output.
    pub fn record_output(&self, node_id: &str, output: HandleMap) {
        self.node_outputs
            .write()
            .insert(node_id.to_string(), output);
    }

    pub fn output_of(&self, node_id: &str) -> Option<HandleMap> {
        self.node_outputs.read().get(node_id).cloned()
    }

    /// Outputs of the node's predecessors addressed at the connecting
    /// handles, in connection declaration order.
    pub fn predecessor_outputs(&self, node_id: &str) -> Vec<DataObject> {
        let outputs = self.node_outputs.read();
        self.workflow
            .connections
            .iter()
            .filter(|conn| conn.target_node_id == node_id)
            .filter_map(|conn| {
                outputs
                    .get(&conn.source_node_id)
                    .and_then(|handles| handles.get(&conn.source_output))
                    .cloned()
            })
            .collect()
    }

    /// Append to the executed-node ribbon.
    pub(crate) fn push_history(&self, node_id: &str) {
        self.history.write().push(node_id.to_string());
    }

    /// Read-only view of executed node ids, in execution order. Backs
    /// step-back navigation in the UI.
    pub fn history(&self) -> Vec<String> {
        self.history.read().clone()
    }
}
