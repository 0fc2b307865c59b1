//! Workflow execution engine.
//!
//! `submit(workflow, triggerKind, triggerInput)` produces an [`Execution`]
//! with per-node records. Dispatch follows a longest-path BFS layering;
//! the control constructs (loop, parallel, tryCatch, retry, rateLimit,
//! subworkflow) are registered executors for identity and validation, but
//! their orchestration lives here.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::{join_all, BoxFuture, FutureExt};
use nervemind_workflow::{
    graph, merge_into, Connection, DataObject, Execution, ExecutionStatus, Node, NodeExecution,
    TriggerKind, Variable, VariableType, Workflow, HANDLE_CATCH, HANDLE_MAIN, HANDLE_TRY,
};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::credentials::{CredentialCipher, DecryptedCredential};
use crate::error::EngineError;
use crate::executor::{ExecutorSnapshot, NodeExecutorRegistry};
use crate::executors::control::{Backoff, RetryPolicy};
use crate::expression::Evaluator;
use crate::logger::{ExecutionLogger, LogCategory, LogEntry, LogLevel};
use crate::ratelimit::{BucketConfig, RateLimiterRegistry};
use crate::runtime::{
    CredentialResolver, EngineConfig, ExecutionContext, StepController, StepPause,
};
use crate::stores::{CredentialStore, EngineStores};

/// Why a scope stopped early.
enum RunAbort {
    Failed { node_id: String, message: String },
    Cancelled,
}

/// Accumulated results of one dispatch scope (the whole run, a loop body
/// iteration, a parallel branch, a try or catch subgraph).
#[derive(Default)]
struct ScopeState {
    records: Vec<NodeExecution>,
    last_output: Option<DataObject>,
}

struct RunOutcome {
    state: ScopeState,
    abort: Option<RunAbort>,
}

/// Resolves credentials through the credential store and cipher.
struct StoreCredentialResolver {
    store: Arc<dyn CredentialStore>,
    cipher: Arc<CredentialCipher>,
}

#[async_trait]
impl CredentialResolver for StoreCredentialResolver {
    async fn resolve(&self, id: &str) -> Result<DecryptedCredential, EngineError> {
        let credential = self
            .store
            .get_credential(id)
            .await?
            .ok_or_else(|| EngineError::Credential(format!("credential '{id}' not found")))?;
        let data = self
            .cipher
            .open(&credential.data)
            .map_err(|e| EngineError::Encryption(e.to_string()))?;
        Ok(DecryptedCredential::new(credential.kind, data))
    }
}

struct Core {
    registry: Arc<NodeExecutorRegistry>,
    config: EngineConfig,
    logger: Arc<ExecutionLogger>,
    stores: EngineStores,
    cipher: Option<Arc<CredentialCipher>>,
    shutdown: CancellationToken,
    active: DashMap<String, CancellationToken>,
    pool: Arc<tokio::sync::Semaphore>,
}

/// The execution engine. Cheap to clone through its inner `Arc`.
#[derive(Clone)]
pub struct ExecutionEngine {
    core: Arc<Core>,
}

impl ExecutionEngine {
    /// Engine with the built-in executor set, its own logger and
    /// all-in-memory stores.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_parts(
            config,
            Arc::new(NodeExecutorRegistry::new()),
            Arc::new(ExecutionLogger::new()),
            EngineStores::in_memory(),
            None,
        )
    }

    /// Engine with explicit collaborators.
    pub fn with_parts(
        config: EngineConfig,
        registry: Arc<NodeExecutorRegistry>,
        logger: Arc<ExecutionLogger>,
        stores: EngineStores,
        cipher: Option<Arc<CredentialCipher>>,
    ) -> Self {
        let pool = Arc::new(tokio::sync::Semaphore::new(config.worker_threads.max(1)));
        Self {
            core: Arc::new(Core {
                registry,
                config,
                logger,
                stores,
                cipher,
                shutdown: CancellationToken::new(),
                active: DashMap::new(),
                pool,
            }),
        }
    }

    pub fn logger(&self) -> Arc<ExecutionLogger> {
        self.core.logger.clone()
    }

    pub fn registry(&self) -> Arc<NodeExecutorRegistry> {
        self.core.registry.clone()
    }

    pub fn stores(&self) -> EngineStores {
        self.core.stores.clone()
    }

    /// Run a workflow to completion.
    pub async fn submit(
        &self,
        workflow: &Workflow,
        trigger_kind: TriggerKind,
        trigger_input: DataObject,
    ) -> Result<Execution, EngineError> {
        self.core
            .clone()
            .submit_inner(workflow.clone(), trigger_kind, trigger_input, None, 0, None)
            .await
    }

    /// Run a workflow in step-debug mode: the engine pauses after every
    /// node until the controller releases it.
    pub async fn submit_stepped(
        &self,
        workflow: &Workflow,
        trigger_kind: TriggerKind,
        trigger_input: DataObject,
        step: Arc<StepController>,
    ) -> Result<Execution, EngineError> {
        self.core
            .clone()
            .submit_inner(
                workflow.clone(),
                trigger_kind,
                trigger_input,
                Some(step),
                0,
                None,
            )
            .await
    }

    /// Request cooperative cancellation of a running execution.
    pub fn cancel_execution(&self, execution_id: &str) -> bool {
        match self.core.active.get(execution_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Ids of currently running executions.
    pub fn active_executions(&self) -> Vec<String> {
        self.core.active.iter().map(|e| e.key().clone()).collect()
    }

    /// Host shutdown: flip the global cancel flag, await coordinators up
    /// to the grace window, then return. Emission is synchronous, so the
    /// logger has nothing left to flush once coordinators are gone.
    pub async fn shutdown(&self) {
        self.core.shutdown.cancel();
        let deadline = tokio::time::Instant::now() + self.core.config.shutdown_grace;
        while !self.core.active.is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        if !self.core.active.is_empty() {
            warn!(
                survivors = self.core.active.len(),
                "shutdown grace window elapsed with executions still running"
            );
        }
    }
}

impl Default for ExecutionEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Core {
    fn emit(&self, entry: LogEntry) {
        debug!(
            category = entry.category.as_str(),
            execution = %entry.execution_id,
            "{}",
            entry.message
        );
        self.logger.emit(entry);
    }

    fn submit_inner(
        self: Arc<Self>,
        workflow: Workflow,
        trigger_kind: TriggerKind,
        trigger_input: DataObject,
        step: Option<Arc<StepController>>,
        depth: usize,
        parent_execution_id: Option<String>,
    ) -> BoxFuture<'static, Result<Execution, EngineError>> {
        async move {
            workflow.validate()?;

            let snapshot = Arc::new(self.registry.snapshot());

            let mut execution = Execution::new(&workflow.id, trigger_kind, trigger_input.clone());
            execution.parent_execution_id = parent_execution_id;

            let variables = self.seed_variables(&workflow).await?;

            let cancel = self.shutdown.child_token();
            self.active.insert(execution.id.clone(), cancel.clone());

            let workflow = Arc::new(workflow);
            let mut ctx = ExecutionContext::new(
                execution.id.clone(),
                workflow.clone(),
                trigger_kind,
                trigger_input,
                variables,
                self.logger.clone(),
                self.config.clone(),
                cancel.clone(),
            );
            ctx.depth = depth;
            if let Some(cipher) = self.cipher.clone() {
                ctx.credential_resolver = Some(Arc::new(StoreCredentialResolver {
                    store: self.stores.credentials.clone(),
                    cipher,
                }));
            }
            if let Some(step) = step {
                step.bind(cancel.clone());
                ctx.step = Some(step);
            }
            let ctx = Arc::new(ctx);

            execution.transition(ExecutionStatus::Running)?;
            info!(execution = %execution.id, workflow = %workflow.id, "execution started");
            let start_entry = LogEntry::new(
                LogLevel::Info,
                LogCategory::ExecutionStart,
                &execution.id,
                format!("execution started for workflow '{}'", workflow.name),
            )
            .with_context("workflowId", json!(workflow.id))
            .with_context("trigger", json!(trigger_kind.as_str()));
            snapshot.broadcast_event(&start_entry);
            self.emit(start_entry);

            // Advisory diagnostics; none of these refuse the run.
            for diagnostic in workflow.diagnostics() {
                warn!(workflow = %workflow.id, "{}", diagnostic.message);
                self.logger.emit(
                    LogEntry::new(
                        LogLevel::Warn,
                        LogCategory::Error,
                        &execution.id,
                        diagnostic.message.clone(),
                    )
                    .with_context("diagnostic", json!(true)),
                );
            }
            for node in workflow.nodes.iter().filter(|n| !n.disabled) {
                if let Some(executor) = snapshot.get(&node.node_type) {
                    for (field, message) in executor.validate(&node.parameters) {
                        warn!(node = %node.name, field = %field, "{message}");
                        self.logger.emit(
                            LogEntry::new(
                                LogLevel::Warn,
                                LogCategory::Error,
                                &execution.id,
                                message,
                            )
                            .with_context("nodeId", json!(node.id))
                            .with_context("field", json!(field)),
                        );
                    }
                }
            }

            let layering = graph::layering(&workflow.node_ids(), &workflow.connections);
            if let Some((source, target)) = layering.discarded_edges.first() {
                self.emit(LogEntry::new(
                    LogLevel::Error,
                    LogCategory::Error,
                    &execution.id,
                    format!("workflow graph contains a cycle; discarded edge {source} -> {target}"),
                ));
            }
            let order = layering.order();

            let outcome = self
                .clone()
                .run_nodes(ctx.clone(), snapshot.clone(), order, HashSet::new())
                .await;
            execution.node_executions = outcome.state.records;
            match outcome.abort {
                None => {
                    execution.output_data = outcome.state.last_output.unwrap_or_default();
                    execution.transition(ExecutionStatus::Success)?;
                }
                Some(RunAbort::Failed { node_id, message }) => {
                    error!(execution = %execution.id, node = %node_id, "execution failed: {message}");
                    execution.error_message = Some(message);
                    execution.transition(ExecutionStatus::Failed)?;
                }
                Some(RunAbort::Cancelled) => {
                    execution.transition(ExecutionStatus::Cancelled)?;
                }
            }

            let end_entry = LogEntry::new(
                LogLevel::Info,
                LogCategory::ExecutionEnd,
                &execution.id,
                format!(
                    "execution finished with status {}",
                    execution.status.as_str()
                ),
            )
            .with_context("status", json!(execution.status.as_str()));
            snapshot.broadcast_event(&end_entry);
            self.emit(end_entry);

            if let Err(e) = self.stores.executions.save_execution(&execution).await {
                error!(execution = %execution.id, "failed to persist execution: {e}");
            }
            self.active.remove(&execution.id);

            Ok(execution)
        }
        .boxed()
    }

    /// Seed the merged variable scope: globals first, then
    /// workflow-scoped values over them. Secret values decrypt when a
    /// cipher is configured.
    async fn seed_variables(&self, workflow: &Workflow) -> Result<DataObject, EngineError> {
        let mut variables = DataObject::new();
        for variable in self.stores.variables.list_global().await? {
            variables.insert(variable.name.clone(), self.variable_value(&variable));
        }
        for variable in self.stores.variables.list_for_workflow(&workflow.id).await? {
            variables.insert(variable.name.clone(), self.variable_value(&variable));
        }
        Ok(variables)
    }

    fn variable_value(&self, variable: &Variable) -> Value {
        if variable.variable_type == VariableType::Secret {
            if let Some(cipher) = &self.cipher {
                if let Ok(plain) = cipher.open_str(&variable.value) {
                    return Value::String(plain);
                }
            }
        }
        variable.typed_value()
    }

    /// Run a node sequence. Called for the whole run and recursively for
    /// loop bodies, parallel branches and try/catch subgraphs.
    fn run_nodes(
        self: Arc<Self>,
        ctx: Arc<ExecutionContext>,
        snapshot: Arc<ExecutorSnapshot>,
        order: Vec<String>,
        pre_skipped: HashSet<String>,
    ) -> BoxFuture<'static, RunOutcome> {
        async move {
            let mut state = ScopeState::default();
            // Nodes consumed by a nested scope (loop body, branch, ...).
            let mut consumed: HashSet<String> = HashSet::new();

            for node_id in &order {
                if consumed.contains(node_id) {
                    continue;
                }
                // Cancellation check (i): before dispatching each node.
                if ctx.is_cancelled() {
                    return RunOutcome {
                        state,
                        abort: Some(RunAbort::Cancelled),
                    };
                }
                let Some(node) = ctx.workflow.get_node(node_id).cloned() else {
                    continue;
                };

                if pre_skipped.contains(node_id) || node.disabled {
                    self.skip_node(&ctx, &node, &mut state);
                    continue;
                }

                let incoming: Vec<Connection> = ctx
                    .workflow
                    .connections
                    .iter()
                    .filter(|c| c.target_node_id == *node_id)
                    .cloned()
                    .collect();

                // A node runs when it is an entry, or at least one
                // incoming edge leaves a handle its source actually
                // produced (the taken branch).
                let reachable = incoming.is_empty()
                    || incoming.iter().any(|conn| {
                        ctx.output_of(&conn.source_node_id)
                            .map(|handles| handles.contains_key(&conn.source_output))
                            .unwrap_or(false)
                    });
                if !reachable {
                    self.skip_node(&ctx, &node, &mut state);
                    continue;
                }

                // Input: trigger input, then predecessor outputs merged in
                // connection declaration order, later ones winning.
                let mut input = ctx.trigger_input.clone();
                for conn in &incoming {
                    if let Some(handles) = ctx.output_of(&conn.source_node_id) {
                        if let Some(data) = handles.get(&conn.source_output) {
                            merge_into(&mut input, data);
                        }
                    }
                }

                let resolved = self.resolve_parameters(&ctx, &node);

                let abort = match resolved.node_type.as_str() {
                    "loop" => {
                        self.clone().orchestrate_loop(
                            &ctx,
                            &snapshot,
                            &order,
                            &resolved,
                            &input,
                            &mut state,
                            &mut consumed,
                        )
                        .await
                    }
                    "parallel" => {
                        self.clone().orchestrate_parallel(
                            &ctx,
                            &snapshot,
                            &order,
                            &resolved,
                            &input,
                            &mut state,
                            &mut consumed,
                        )
                        .await
                    }
                    "tryCatch" => {
                        self.clone().orchestrate_try_catch(
                            &ctx,
                            &snapshot,
                            &order,
                            &resolved,
                            &input,
                            &mut state,
                            &mut consumed,
                        )
                        .await
                    }
                    "subworkflow" => {
                        self.clone().run_subworkflow(&ctx, &resolved, &input, &mut state).await
                    }
                    "rateLimit" => match self.wait_rate_limit(&ctx, &resolved).await {
                        Err(abort) => {
                            let mut record = NodeExecution::started(
                                &resolved.id,
                                &resolved.name,
                                &resolved.node_type,
                            );
                            record.fail("execution cancelled");
                            state.records.push(record);
                            Some(abort)
                        }
                        Ok(()) => {
                            self.execute_single(&ctx, &snapshot, &resolved, &input, None, &mut state)
                                .await
                        }
                    },
                    _ => {
                        let policy = self.retry_policy_for(&ctx, node_id);
                        self.execute_single(&ctx, &snapshot, &resolved, &input, policy, &mut state)
                            .await
                    }
                };

                // Step-debug suspension after node-end.
                if let Some(step) = &ctx.step {
                    if abort.is_none() && !ctx.is_cancelled() {
                        step.wait(StepPause {
                            node_id: node.id.clone(),
                            node_name: node.name.clone(),
                            node_index: ctx.history().len(),
                            total_nodes: ctx.workflow.nodes.len(),
                        })
                        .await;
                    }
                }

                if abort.is_some() {
                    return RunOutcome { state, abort };
                }
            }

            RunOutcome { state, abort: None }
        }
        .boxed()
    }

    fn skip_node(&self, ctx: &ExecutionContext, node: &Node, state: &mut ScopeState) {
        self.emit(
            LogEntry::new(
                LogLevel::Debug,
                LogCategory::NodeSkip,
                &ctx.execution_id,
                format!("node '{}' skipped", node.name),
            )
            .with_context("nodeId", json!(node.id)),
        );
        state
            .records
            .push(NodeExecution::skipped(&node.id, &node.name, &node.node_type));
    }

    /// Interpolate `${...}` references and function calls in the node's
    /// parameters against the merged variable scope.
    fn resolve_parameters(&self, ctx: &ExecutionContext, node: &Node) -> Node {
        fn has_expression(value: &Value) -> bool {
            match value {
                Value::String(s) => Evaluator::contains_expression(s),
                Value::Array(items) => items.iter().any(has_expression),
                Value::Object(map) => map.values().any(has_expression),
                _ => false,
            }
        }

        fn interpolate(evaluator: &Evaluator, value: &Value) -> Value {
            match value {
                Value::String(s) if Evaluator::contains_expression(s) => {
                    evaluator.evaluate_to_value(s)
                }
                Value::Array(items) => {
                    Value::Array(items.iter().map(|v| interpolate(evaluator, v)).collect())
                }
                Value::Object(map) => Value::Object(
                    map.iter()
                        .map(|(k, v)| (k.clone(), interpolate(evaluator, v)))
                        .collect(),
                ),
                other => other.clone(),
            }
        }

        if !node.parameters.values().any(has_expression) {
            return node.clone();
        }

        let evaluator = Evaluator::new(ctx.variables_snapshot());
        let mut resolved = node.clone();
        for (key, value) in &node.parameters {
            if !has_expression(value) {
                continue;
            }
            let interpolated = interpolate(&evaluator, value);
            self.emit(
                LogEntry::new(
                    LogLevel::Debug,
                    LogCategory::ExpressionEval,
                    &ctx.execution_id,
                    format!("parameter '{key}' interpolated on node '{}'", node.name),
                )
                .with_context("nodeId", json!(node.id))
                .with_context("parameter", json!(key))
                .with_payload(&interpolated),
            );
            resolved.parameters.insert(key.clone(), interpolated);
        }
        resolved
    }

    /// Policy of the retry node wrapping this one, if any.
    fn retry_policy_for(&self, ctx: &ExecutionContext, node_id: &str) -> Option<RetryPolicy> {
        let retry_node = ctx
            .workflow
            .connections
            .iter()
            .filter(|c| c.target_node_id == node_id)
            .find_map(|c| {
                ctx.workflow
                    .get_node(&c.source_node_id)
                    .filter(|n| n.node_type == "retry")
            })?;
        let resolved = self.resolve_parameters(ctx, retry_node);
        Some(RetryPolicy::from_node(&resolved))
    }

    /// Execute one plain node under its deadline and retry policy,
    /// recording the result and emitting the per-node event sequence
    /// start -> input -> output -> end.
    async fn execute_single(
        &self,
        ctx: &Arc<ExecutionContext>,
        snapshot: &ExecutorSnapshot,
        node: &Node,
        input: &DataObject,
        policy: Option<RetryPolicy>,
        state: &mut ScopeState,
    ) -> Option<RunAbort> {
        let mut record = NodeExecution::started(&node.id, &node.name, &node.node_type);
        record.input_data = input.clone();

        self.emit(
            LogEntry::new(
                LogLevel::Info,
                LogCategory::NodeStart,
                &ctx.execution_id,
                format!("node '{}' started", node.name),
            )
            .with_context("nodeId", json!(node.id))
            .with_context("nodeType", json!(node.node_type)),
        );
        self.emit(
            LogEntry::new(
                LogLevel::Debug,
                LogCategory::NodeInput,
                &ctx.execution_id,
                format!("node '{}' input", node.name),
            )
            .with_context("nodeId", json!(node.id))
            .with_payload(&Value::Object(input.clone())),
        );

        let Some(executor) = snapshot.get(&node.node_type) else {
            let message = EngineError::NodeTypeNotFound(node.node_type.clone()).to_string();
            return Some(self.fail_node(ctx, node, record, message, state));
        };

        let policy = policy.unwrap_or(RetryPolicy {
            max_attempts: 1,
            delay_ms: 0,
            backoff: Backoff::Fixed,
        });

        let mut last_error: Option<EngineError> = None;
        for attempt in 1..=policy.max_attempts {
            if attempt > 1 {
                let delay = policy.backoff.delay_ms(policy.delay_ms, attempt);
                self.emit(
                    LogEntry::new(
                        LogLevel::Warn,
                        LogCategory::Retry,
                        &ctx.execution_id,
                        format!(
                            "retrying node '{}' (attempt {attempt} of {})",
                            node.name, policy.max_attempts
                        ),
                    )
                    .with_context("nodeId", json!(node.id))
                    .with_context("attempt", json!(attempt))
                    .with_context("delayMs", json!(delay)),
                );
                if delay > 0 {
                    // Cancellation check (iv): on backoff wake.
                    let cancel_token = ctx.cancellation_token();
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
                        _ = cancel_token.cancelled() => {
                            record.fail("execution cancelled");
                            state.records.push(record);
                            return Some(RunAbort::Cancelled);
                        }
                    }
                }
            }
            // Cancellation check (ii): before each attempt.
            if ctx.is_cancelled() {
                record.fail("execution cancelled");
                state.records.push(record);
                return Some(RunAbort::Cancelled);
            }

            let node_timeout = node
                .get_parameter("timeoutMs")
                .and_then(Value::as_u64)
                .map(Duration::from_millis)
                .unwrap_or(ctx.config.node_timeout);
            let deadline = node_timeout.min(ctx.remaining());

            match tokio::time::timeout(deadline, executor.execute(node, input, ctx)).await {
                Ok(Ok(output)) => {
                    let primary = output.primary().cloned().unwrap_or_default();
                    ctx.record_output(&node.id, output.into_handles());
                    ctx.push_history(&node.id);
                    record.succeed(primary.clone());
                    let duration_ms = (record
                        .finished_at
                        .unwrap_or(record.started_at)
                        - record.started_at)
                        .num_milliseconds();
                    self.emit(
                        LogEntry::new(
                            LogLevel::Debug,
                            LogCategory::NodeOutput,
                            &ctx.execution_id,
                            format!("node '{}' output", node.name),
                        )
                        .with_context("nodeId", json!(node.id))
                        .with_payload(&Value::Object(primary.clone())),
                    );
                    self.emit(
                        LogEntry::new(
                            LogLevel::Info,
                            LogCategory::NodeEnd,
                            &ctx.execution_id,
                            format!("node '{}' finished", node.name),
                        )
                        .with_context("nodeId", json!(node.id))
                        .with_context("status", json!("success"))
                        .with_context("durationMs", json!(duration_ms)),
                    );
                    state.last_output = Some(primary);
                    state.records.push(record);
                    return None;
                }
                Ok(Err(EngineError::Cancelled)) => {
                    record.fail("execution cancelled");
                    state.records.push(record);
                    return Some(RunAbort::Cancelled);
                }
                Ok(Err(e)) => last_error = Some(e),
                Err(_) => {
                    last_error = Some(EngineError::Timeout {
                        node_id: node.id.clone(),
                        millis: deadline.as_millis() as u64,
                    })
                }
            }
        }

        let message = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "node failed".to_string());
        Some(self.fail_node(ctx, node, record, message, state))
    }

    /// Record a node failure with its error and node-end events.
    fn fail_node(
        &self,
        ctx: &ExecutionContext,
        node: &Node,
        mut record: NodeExecution,
        message: String,
        state: &mut ScopeState,
    ) -> RunAbort {
        record.fail(&message);
        ctx.push_history(&node.id);
        self.emit(
            LogEntry::new(
                LogLevel::Error,
                LogCategory::Error,
                &ctx.execution_id,
                format!("node '{}' failed: {message}", node.name),
            )
            .with_context("nodeId", json!(node.id))
            .with_context("nodeType", json!(node.node_type))
            .with_context("stack", json!(message)),
        );
        self.emit(
            LogEntry::new(
                LogLevel::Info,
                LogCategory::NodeEnd,
                &ctx.execution_id,
                format!("node '{}' finished", node.name),
            )
            .with_context("nodeId", json!(node.id))
            .with_context("status", json!("failed")),
        );
        state.records.push(record);
        RunAbort::Failed {
            node_id: node.id.clone(),
            message,
        }
    }

    /// Loop construct: the body (every descendant of the loop node) runs
    /// once per item with the item variable bound in execution scope;
    /// per-iteration terminal outputs aggregate in insertion order.
    #[allow(clippy::too_many_arguments)]
    async fn orchestrate_loop(
        self: Arc<Self>,
        ctx: &Arc<ExecutionContext>,
        snapshot: &Arc<ExecutorSnapshot>,
        order: &[String],
        node: &Node,
        input: &DataObject,
        state: &mut ScopeState,
        consumed: &mut HashSet<String>,
    ) -> Option<RunAbort> {
        if let Some(abort) = self
            .execute_single(ctx, snapshot, node, input, None, state)
            .await
        {
            return Some(abort);
        }

        let output = ctx
            .output_of(&node.id)
            .and_then(|handles| handles.get(HANDLE_MAIN).cloned())
            .unwrap_or_default();
        let items = output
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let item_variable = output
            .get("itemVariable")
            .and_then(Value::as_str)
            .unwrap_or("item")
            .to_string();

        let body = graph::descendants(&ctx.workflow.connections, &node.id, None);
        let body_order: Vec<String> = order
            .iter()
            .filter(|id| body.contains(*id))
            .cloned()
            .collect();
        consumed.extend(body_order.iter().cloned());

        if items.is_empty() {
            for body_id in &body_order {
                if let Some(body_node) = ctx.workflow.get_node(body_id).cloned() {
                    self.skip_node(ctx, &body_node, state);
                }
            }
            return None;
        }

        let mut iterations: Vec<Value> = Vec::new();
        for item in items {
            if ctx.is_cancelled() {
                return Some(RunAbort::Cancelled);
            }
            ctx.set_variable(item_variable.clone(), item.clone());
            let outcome = self
                .clone()
                .run_nodes(
                    ctx.clone(),
                    snapshot.clone(),
                    body_order.clone(),
                    HashSet::new(),
                )
                .await;
            state.records.extend(outcome.state.records);
            if outcome.abort.is_some() {
                return outcome.abort;
            }
            iterations.push(
                outcome
                    .state
                    .last_output
                    .map(Value::Object)
                    .unwrap_or(Value::Null),
            );
        }

        let mut aggregate = DataObject::new();
        aggregate.insert("iterations".to_string(), Value::Array(iterations));
        state.last_output = Some(aggregate);
        None
    }

    /// Parallel construct: one branch per outgoing edge, each branch's
    /// exclusive subgraph fanned onto the worker pool; nodes reachable
    /// from more than one branch run after the join in the outer
    /// sequence.
    #[allow(clippy::too_many_arguments)]
    async fn orchestrate_parallel(
        self: Arc<Self>,
        ctx: &Arc<ExecutionContext>,
        snapshot: &Arc<ExecutorSnapshot>,
        order: &[String],
        node: &Node,
        input: &DataObject,
        state: &mut ScopeState,
        consumed: &mut HashSet<String>,
    ) -> Option<RunAbort> {
        if let Some(abort) = self
            .execute_single(ctx, snapshot, node, input, None, state)
            .await
        {
            return Some(abort);
        }

        let branch_edges: Vec<Connection> = ctx
            .workflow
            .connections
            .iter()
            .filter(|c| c.source_node_id == node.id)
            .cloned()
            .collect();
        if branch_edges.is_empty() {
            return None;
        }

        // The parallel node routes its input to every declared branch
        // handle.
        let mut handles = ctx.output_of(&node.id).unwrap_or_default();
        let primary = handles.get(HANDLE_MAIN).cloned().unwrap_or_default();
        for edge in &branch_edges {
            handles.entry(edge.source_output.clone()).or_insert_with(|| primary.clone());
        }
        ctx.record_output(&node.id, handles);

        let reaches: Vec<HashSet<String>> = branch_edges
            .iter()
            .map(|edge| {
                let mut set =
                    graph::descendants(&ctx.workflow.connections, &edge.target_node_id, None);
                set.insert(edge.target_node_id.clone());
                set
            })
            .collect();
        let mut membership: HashMap<&str, usize> = HashMap::new();
        for reach in &reaches {
            for id in reach {
                *membership.entry(id.as_str()).or_default() += 1;
            }
        }
        let shared: HashSet<String> = membership
            .iter()
            .filter(|(_, count)| **count > 1)
            .map(|(id, _)| (*id).to_string())
            .collect();

        let mut tasks = Vec::new();
        for reach in reaches {
            let branch_order: Vec<String> = order
                .iter()
                .filter(|id| reach.contains(*id) && !shared.contains(*id))
                .cloned()
                .collect();
            consumed.extend(branch_order.iter().cloned());

            let core = self.clone();
            let branch_ctx = ctx.clone();
            let branch_snapshot = snapshot.clone();
            let pool = self.pool.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = pool.acquire_owned().await.ok();
                core.run_nodes(branch_ctx, branch_snapshot, branch_order, HashSet::new())
                    .await
            }));
        }

        let mut abort: Option<RunAbort> = None;
        for result in join_all(tasks).await {
            match result {
                Ok(outcome) => {
                    state.records.extend(outcome.state.records);
                    if let Some(output) = outcome.state.last_output {
                        state.last_output = Some(output);
                    }
                    if abort.is_none() {
                        abort = outcome.abort;
                    }
                }
                Err(join_error) => {
                    if abort.is_none() {
                        abort = Some(RunAbort::Failed {
                            node_id: node.id.clone(),
                            message: format!("parallel branch panicked: {join_error}"),
                        });
                    }
                }
            }
        }

        // Cancellation check (iii): before proceeding past the join.
        if ctx.is_cancelled() {
            return Some(RunAbort::Cancelled);
        }
        abort
    }

    /// TryCatch construct: runs the try subgraph; on failure injects
    /// `{error, nodeId}` on the catch handle and runs the catch subgraph.
    #[allow(clippy::too_many_arguments)]
    async fn orchestrate_try_catch(
        self: Arc<Self>,
        ctx: &Arc<ExecutionContext>,
        snapshot: &Arc<ExecutorSnapshot>,
        order: &[String],
        node: &Node,
        input: &DataObject,
        state: &mut ScopeState,
        consumed: &mut HashSet<String>,
    ) -> Option<RunAbort> {
        if let Some(abort) = self
            .execute_single(ctx, snapshot, node, input, None, state)
            .await
        {
            return Some(abort);
        }

        let try_desc = graph::descendants(&ctx.workflow.connections, &node.id, Some(HANDLE_TRY));
        let catch_desc =
            graph::descendants(&ctx.workflow.connections, &node.id, Some(HANDLE_CATCH));
        let try_order: Vec<String> = order
            .iter()
            .filter(|id| try_desc.contains(*id) && !catch_desc.contains(*id))
            .cloned()
            .collect();
        let catch_order: Vec<String> = order
            .iter()
            .filter(|id| catch_desc.contains(*id) && !try_desc.contains(*id))
            .cloned()
            .collect();
        consumed.extend(try_order.iter().cloned());
        consumed.extend(catch_order.iter().cloned());

        let outcome = self
            .clone()
            .run_nodes(
                ctx.clone(),
                snapshot.clone(),
                try_order.clone(),
                HashSet::new(),
            )
            .await;
        let executed: HashSet<String> = outcome
            .state
            .records
            .iter()
            .map(|r| r.node_id.clone())
            .collect();
        let try_output = outcome.state.last_output.clone();
        state.records.extend(outcome.state.records);

        match outcome.abort {
            None => {
                for catch_id in &catch_order {
                    if let Some(catch_node) = ctx.workflow.get_node(catch_id).cloned() {
                        self.skip_node(ctx, &catch_node, state);
                    }
                }
                if try_output.is_some() {
                    state.last_output = try_output;
                }
                None
            }
            Some(RunAbort::Cancelled) => Some(RunAbort::Cancelled),
            Some(RunAbort::Failed { node_id, message }) => {
                // Unreached try-side nodes record as skipped.
                for try_id in &try_order {
                    if !executed.contains(try_id) {
                        if let Some(try_node) = ctx.workflow.get_node(try_id).cloned() {
                            self.skip_node(ctx, &try_node, state);
                        }
                    }
                }

                self.emit(
                    LogEntry::new(
                        LogLevel::Warn,
                        LogCategory::Error,
                        &ctx.execution_id,
                        format!(
                            "tryCatch '{}' caught failure of node '{node_id}'; routing to catch",
                            node.name
                        ),
                    )
                    .with_context("nodeId", json!(node.id))
                    .with_context("failedNodeId", json!(node_id)),
                );

                let mut catch_input = input.clone();
                catch_input.insert("error".to_string(), Value::String(message));
                catch_input.insert("nodeId".to_string(), Value::String(node_id));
                let mut handles = ctx.output_of(&node.id).unwrap_or_default();
                handles.insert(HANDLE_CATCH.to_string(), catch_input);
                ctx.record_output(&node.id, handles);

                let outcome = self
                    .clone()
                    .run_nodes(ctx.clone(), snapshot.clone(), catch_order, HashSet::new())
                    .await;
                let catch_output = outcome.state.last_output.clone();
                state.records.extend(outcome.state.records);
                if outcome.abort.is_some() {
                    return outcome.abort;
                }
                if catch_output.is_some() {
                    state.last_output = catch_output;
                }
                None
            }
        }
    }

    /// Subworkflow construct: synchronously runs the referenced workflow
    /// as a child execution.
    async fn run_subworkflow(
        self: Arc<Self>,
        ctx: &Arc<ExecutionContext>,
        node: &Node,
        input: &DataObject,
        state: &mut ScopeState,
    ) -> Option<RunAbort> {
        let mut record = NodeExecution::started(&node.id, &node.name, &node.node_type);
        record.input_data = input.clone();
        self.emit(
            LogEntry::new(
                LogLevel::Info,
                LogCategory::NodeStart,
                &ctx.execution_id,
                format!("node '{}' started", node.name),
            )
            .with_context("nodeId", json!(node.id))
            .with_context("nodeType", json!(node.node_type)),
        );

        let child = self.clone().run_child_workflow(ctx, node, input).await;

        match child {
            Ok(child) if child.status == ExecutionStatus::Success => {
                let mut output = input.clone();
                merge_into(&mut output, &child.output_data);
                output.insert("childExecutionId".to_string(), Value::String(child.id));
                let mut handles = crate::runtime::HandleMap::new();
                handles.insert(HANDLE_MAIN.to_string(), output.clone());
                ctx.record_output(&node.id, handles);
                ctx.push_history(&node.id);
                record.succeed(output.clone());
                self.emit(
                    LogEntry::new(
                        LogLevel::Info,
                        LogCategory::NodeEnd,
                        &ctx.execution_id,
                        format!("node '{}' finished", node.name),
                    )
                    .with_context("nodeId", json!(node.id))
                    .with_context("status", json!("success")),
                );
                state.last_output = Some(output);
                state.records.push(record);
                None
            }
            Ok(child) => {
                let message = child
                    .error_message
                    .unwrap_or_else(|| format!("subworkflow finished {}", child.status.as_str()));
                Some(self.fail_node(ctx, node, record, message, state))
            }
            Err(e) => Some(self.fail_node(ctx, node, record, e.to_string(), state)),
        }
    }

    async fn run_child_workflow(
        self: Arc<Self>,
        ctx: &Arc<ExecutionContext>,
        node: &Node,
        input: &DataObject,
    ) -> Result<Execution, EngineError> {
        if ctx.depth + 1 > ctx.config.max_subworkflow_depth {
            return Err(EngineError::RecursionLimit {
                limit: ctx.config.max_subworkflow_depth,
            });
        }
        let workflow_id = node
            .parameter_str("workflowId")
            .map(str::trim)
            .unwrap_or("");
        if workflow_id.is_empty() {
            return Err(EngineError::for_node(&node.id, "workflowId is required"));
        }
        let child_workflow = self
            .stores
            .workflows
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| {
                EngineError::for_node(&node.id, format!("subworkflow '{workflow_id}' not found"))
            })?;

        // Child runs count toward the same nesting limit.
        self.clone()
            .submit_inner(
                child_workflow,
                ctx.trigger_kind,
                input.clone(),
                None,
                ctx.depth + 1,
                Some(ctx.execution_id.clone()),
            )
            .await
    }

    /// Acquire a permit from the node's bucket, emitting a rate-limit
    /// event with the estimated wait when throttled.
    async fn wait_rate_limit(
        &self,
        ctx: &Arc<ExecutionContext>,
        node: &Node,
    ) -> Result<(), RunAbort> {
        let bucket_id = node.parameter_str("bucketId").unwrap_or("default");
        let config = BucketConfig {
            permits_per_interval: node
                .get_parameter("permitsPerInterval")
                .and_then(Value::as_u64)
                .unwrap_or(1) as u32,
            interval_ms: node
                .get_parameter("intervalMs")
                .and_then(Value::as_u64)
                .unwrap_or(1000),
        };
        let bucket = RateLimiterRegistry::global().bucket(bucket_id, config);

        let logger = ctx.logger.clone();
        let execution_id = ctx.execution_id.clone();
        let bucket_name = bucket_id.to_string();
        let node_id = node.id.clone();
        bucket
            .acquire(&ctx.cancellation_token(), |wait| {
                logger.emit(
                    LogEntry::new(
                        LogLevel::Info,
                        LogCategory::RateLimit,
                        &execution_id,
                        format!(
                            "bucket '{bucket_name}' throttled; estimated wait {} ms",
                            wait.as_millis()
                        ),
                    )
                    .with_context("nodeId", json!(node_id.clone()))
                    .with_context("bucketId", json!(bucket_name.clone()))
                    .with_context("estimatedWaitMs", json!(wait.as_millis() as u64)),
                );
            })
            .await
            .map_err(|_| RunAbort::Cancelled)
    }
}
