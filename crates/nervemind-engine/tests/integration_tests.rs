//! Integration tests for the workflow execution engine.
//!
//! These tests verify end-to-end workflow execution: node traversal, data
//! flow, conditional routing, retry/tryCatch/loop/parallel constructs,
//! cancellation, step mode and the execution event stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nervemind_engine::{
    EngineConfig, EngineError, EngineStores, ExecutionEngine, ExecutionLogger, LogCategory,
    NodeCategory, NodeDescriptor, NodeExecutor, NodeExecutorRegistry, NodeOutput, StepController,
};
use nervemind_engine::runtime::ExecutionContext;
use nervemind_workflow::{
    DataObject, ExecutionStatus, Node, NodeExecutionStatus, TriggerKind, Variable, Workflow,
};
use serde_json::{json, Value};

// ============================================================================
// Helper functions
// ============================================================================

/// Create a node whose id equals its display name, with parameters.
fn node(name: &str, node_type: &str, params: &[(&str, Value)]) -> Node {
    let mut node = Node::new(name, node_type);
    node.id = name.to_string();
    for (key, value) in params {
        node.set_parameter(*key, value.clone());
    }
    node
}

/// Create a workflow from nodes and `(source, source_output, target)`
/// connection triples.
fn make_workflow(name: &str, nodes: Vec<Node>, connections: &[(&str, &str, &str)]) -> Workflow {
    let mut workflow = Workflow::new(name);
    for n in nodes {
        workflow.add_node(n);
    }
    for &(source, handle, target) in connections {
        workflow
            .connect_handles(source, handle, target, "main")
            .unwrap_or_else(|e| panic!("failed to connect {source} -> {target}: {e}"));
    }
    workflow
}

fn trigger(name: &str) -> Node {
    node(name, "manualTrigger", &[])
}

fn set_values(name: &str, values: Value) -> Node {
    node(name, "set", &[("values", values)])
}

/// Stub standing in for the live httpRequest executor, same type id.
struct StubHttpExecutor;

#[async_trait]
impl NodeExecutor for StubHttpExecutor {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            type_id: "httpRequest",
            display_name: "HTTP Request (stub)",
            category: NodeCategory::Integration,
            trigger_kind: None,
            description: "Test double returning a canned response.",
            config_schema: json!({"type": "object"}),
        }
    }

    async fn execute(
        &self,
        hnode: &Node,
        input: &DataObject,
        _ctx: &ExecutionContext,
    ) -> Result<NodeOutput, EngineError> {
        let url = hnode.parameter_str("url").unwrap_or("");
        if url.trim().is_empty() {
            return Err(EngineError::for_node(&hnode.id, "httpRequest missing URL"));
        }
        let mut output = input.clone();
        output.insert("status".to_string(), json!(200));
        output.insert("body".to_string(), json!({"ok": true, "url": url}));
        Ok(NodeOutput::main(output))
    }
}

/// Executor that fails a configurable number of times before succeeding.
struct FlakyExecutor {
    failures: AtomicU32,
}

#[async_trait]
impl NodeExecutor for FlakyExecutor {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            type_id: "flaky",
            display_name: "Flaky",
            category: NodeCategory::Action,
            trigger_kind: None,
            description: "Fails N times, then succeeds.",
            config_schema: json!({"type": "object"}),
        }
    }

    async fn execute(
        &self,
        fnode: &Node,
        input: &DataObject,
        _ctx: &ExecutionContext,
    ) -> Result<NodeOutput, EngineError> {
        if self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(EngineError::for_node(&fnode.id, "transient failure"));
        }
        let mut output = input.clone();
        output.insert("settled".to_string(), json!(true));
        Ok(NodeOutput::main(output))
    }
}

fn engine_with_stub_http() -> ExecutionEngine {
    let registry = Arc::new(NodeExecutorRegistry::new());
    registry.register(Arc::new(StubHttpExecutor));
    ExecutionEngine::with_parts(
        EngineConfig::default(),
        registry,
        Arc::new(ExecutionLogger::new()),
        EngineStores::in_memory(),
        None,
    )
}

fn record_status(execution: &nervemind_workflow::Execution, node_id: &str) -> NodeExecutionStatus {
    execution
        .node_executions
        .iter()
        .find(|r| r.node_id == node_id)
        .unwrap_or_else(|| panic!("no record for node '{node_id}'"))
        .status
}

// ============================================================================
// Test cases
// ============================================================================

/// 1. Two-node happy path: manualTrigger -> httpRequest.
///    Status SUCCESS, two NodeExecutions in order, response in outputData.
#[tokio::test]
async fn two_node_happy_path() {
    let engine = engine_with_stub_http();
    let workflow = make_workflow(
        "happy-path",
        vec![
            trigger("Trigger"),
            node("Fetch", "httpRequest", &[("url", json!("https://example.com"))]),
        ],
        &[("Trigger", "main", "Fetch")],
    );

    let execution = engine
        .submit(&workflow, TriggerKind::Manual, DataObject::new())
        .await
        .expect("execution should run");

    assert_eq!(execution.status, ExecutionStatus::Success);
    assert!(execution.finished_at.is_some());
    assert_eq!(execution.node_executions.len(), 2);
    assert_eq!(execution.node_executions[0].node_id, "Trigger");
    assert_eq!(execution.node_executions[1].node_id, "Fetch");
    assert_eq!(execution.output_data["status"], json!(200));
    assert_eq!(execution.output_data["body"]["ok"], json!(true));
}

/// 2. Filter semantics end-to-end: keep items with status == active and
///    report the three counters.
#[tokio::test]
async fn filter_keeps_active_items() {
    let engine = ExecutionEngine::default();
    let workflow = make_workflow(
        "filter",
        vec![
            trigger("Trigger"),
            set_values(
                "Seed",
                json!({"items": [
                    {"name": "A", "status": "active"},
                    {"name": "B", "status": "inactive"},
                    {"name": "C", "status": "active"}
                ]}),
            ),
            node(
                "Filter",
                "filter",
                &[
                    (
                        "conditions",
                        json!([{"field": "status", "operator": "equals", "value": "active"}]),
                    ),
                    ("combineWith", json!("and")),
                    ("keepMatching", json!(true)),
                ],
            ),
        ],
        &[("Trigger", "main", "Seed"), ("Seed", "main", "Filter")],
    );

    let execution = engine
        .submit(&workflow, TriggerKind::Manual, DataObject::new())
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Success);
    let output = &execution.output_data;
    let filtered = output["filtered"].as_array().unwrap();
    assert_eq!(filtered.len(), 2);
    assert_eq!(filtered[0]["name"], "A");
    assert_eq!(filtered[1]["name"], "C");
    assert_eq!(output["_filteredCount"], json!(2));
    assert_eq!(output["_originalCount"], json!(3));
    assert_eq!(output["_removedCount"], json!(1));
}

/// 3. Parameter interpolation against seeded variables.
#[tokio::test]
async fn parameters_interpolate_against_variables() {
    let engine = ExecutionEngine::default();
    engine
        .stores()
        .variables
        .save_variable(&Variable::global("user", "Alice"))
        .await
        .unwrap();

    let workflow = make_workflow(
        "interpolation",
        vec![
            trigger("Trigger"),
            set_values("Greet", json!({"greeting": "Hello ${user}!"})),
        ],
        &[("Trigger", "main", "Greet")],
    );

    let execution = engine
        .submit(&workflow, TriggerKind::Manual, DataObject::new())
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Success);
    assert_eq!(execution.output_data["greeting"], json!("Hello Alice!"));
}

/// 4. Retry success after two failures: maxAttempts=3, two retry events,
///    final node SUCCESS, execution SUCCESS.
#[tokio::test]
async fn retry_succeeds_after_two_failures() {
    let registry = Arc::new(NodeExecutorRegistry::new());
    registry.register(Arc::new(FlakyExecutor {
        failures: AtomicU32::new(2),
    }));
    let logger = Arc::new(ExecutionLogger::new());
    let (_, entries) = logger.recorder();
    let engine = ExecutionEngine::with_parts(
        EngineConfig::default(),
        registry,
        logger,
        EngineStores::in_memory(),
        None,
    );

    let workflow = make_workflow(
        "retry",
        vec![
            trigger("Trigger"),
            node(
                "Retry",
                "retry",
                &[
                    ("maxAttempts", json!(3)),
                    ("delayMs", json!(1)),
                    ("backoff", json!("fixed")),
                ],
            ),
            node("Unstable", "flaky", &[]),
        ],
        &[("Trigger", "main", "Retry"), ("Retry", "main", "Unstable")],
    );

    let execution = engine
        .submit(&workflow, TriggerKind::Manual, DataObject::new())
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Success);
    assert_eq!(record_status(&execution, "Unstable"), NodeExecutionStatus::Success);
    assert_eq!(execution.output_data["settled"], json!(true));

    let retries = entries
        .lock()
        .iter()
        .filter(|e| e.category == LogCategory::Retry)
        .count();
    assert_eq!(retries, 2, "expected one retry event per re-attempt");
}

/// 4b. All attempts fail: at most N execute calls, N-1 retry events, the
///     execution fails.
#[tokio::test]
async fn retry_exhaustion_fails_the_execution() {
    let calls = Arc::new(AtomicU32::new(0));

    struct AlwaysFailing(Arc<AtomicU32>);

    #[async_trait]
    impl NodeExecutor for AlwaysFailing {
        fn descriptor(&self) -> NodeDescriptor {
            NodeDescriptor {
                type_id: "alwaysFailing",
                display_name: "Always Failing",
                category: NodeCategory::Action,
                trigger_kind: None,
                description: "Fails unconditionally.",
                config_schema: json!({"type": "object"}),
            }
        }

        async fn execute(
            &self,
            fnode: &Node,
            _input: &DataObject,
            _ctx: &ExecutionContext,
        ) -> Result<NodeOutput, EngineError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(EngineError::for_node(&fnode.id, "permanent failure"))
        }
    }

    let registry = Arc::new(NodeExecutorRegistry::new());
    registry.register(Arc::new(AlwaysFailing(calls.clone())));
    let logger = Arc::new(ExecutionLogger::new());
    let (_, entries) = logger.recorder();
    let engine = ExecutionEngine::with_parts(
        EngineConfig::default(),
        registry,
        logger,
        EngineStores::in_memory(),
        None,
    );

    let workflow = make_workflow(
        "retry-exhausted",
        vec![
            trigger("Trigger"),
            node(
                "Retry",
                "retry",
                &[("maxAttempts", json!(3)), ("delayMs", json!(1))],
            ),
            node("Doomed", "alwaysFailing", &[]),
        ],
        &[("Trigger", "main", "Retry"), ("Retry", "main", "Doomed")],
    );

    let execution = engine
        .submit(&workflow, TriggerKind::Manual, DataObject::new())
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let retries = entries
        .lock()
        .iter()
        .filter(|e| e.category == LogCategory::Retry)
        .count();
    assert_eq!(retries, 2);
    assert!(execution.error_message.is_some());
}

/// 5. TryCatch recovery: failing try branch routes to catch, which sets
///    `recovered`; the failed node's record is still present.
#[tokio::test]
async fn try_catch_recovers_from_failure() {
    let engine = ExecutionEngine::default();
    let workflow = make_workflow(
        "try-catch",
        vec![
            trigger("Trigger"),
            node("Guard", "tryCatch", &[]),
            node(
                "Boom",
                "stopAndError",
                &[("errorMessage", json!("service unavailable"))],
            ),
            set_values("Recover", json!({"recovered": true})),
        ],
        &[
            ("Trigger", "main", "Guard"),
            ("Guard", "try", "Boom"),
            ("Guard", "catch", "Recover"),
        ],
    );

    let execution = engine
        .submit(&workflow, TriggerKind::Manual, DataObject::new())
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Success);
    assert_eq!(execution.output_data["recovered"], json!(true));
    assert_eq!(record_status(&execution, "Boom"), NodeExecutionStatus::Failed);
    assert_eq!(record_status(&execution, "Recover"), NodeExecutionStatus::Success);
    // The catch input carried the error and the failing node id.
    let recover_record = execution
        .node_executions
        .iter()
        .find(|r| r.node_id == "Recover")
        .unwrap();
    assert!(recover_record.input_data["error"]
        .as_str()
        .unwrap()
        .contains("service unavailable"));
    assert_eq!(recover_record.input_data["nodeId"], json!("Boom"));
}

/// 6. Cancellation: a long wait node is cancelled mid-flight. The
///    execution finishes CANCELLED with finishedAt set; the in-flight
///    node's record is FAILED with a cancellation message.
#[tokio::test]
async fn cancellation_mid_node() {
    let engine = ExecutionEngine::default();
    let workflow = make_workflow(
        "cancellation",
        vec![
            trigger("Trigger"),
            node(
                "LongWait",
                "wait",
                &[("amount", json!(30)), ("unit", json!("seconds"))],
            ),
        ],
        &[("Trigger", "main", "LongWait")],
    );

    let runner = {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .submit(&workflow, TriggerKind::Manual, DataObject::new())
                .await
        })
    };

    // Wait for the run to appear, then cancel it.
    let mut cancelled = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(5)).await;
        if let Some(id) = engine.active_executions().first() {
            engine.cancel_execution(id);
            cancelled = true;
            break;
        }
    }
    assert!(cancelled, "execution never became active");

    let execution = runner.await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Cancelled);
    assert!(execution.finished_at.is_some());
    let wait_record = execution
        .node_executions
        .iter()
        .find(|r| r.node_id == "LongWait")
        .expect("in-flight node should be recorded");
    assert_eq!(wait_record.status, NodeExecutionStatus::Failed);
    assert_eq!(
        wait_record.error_message.as_deref(),
        Some("execution cancelled")
    );
    assert_eq!(execution.node_executions.len(), 2);
}

/// Disabled nodes are never invoked and record exactly one SKIPPED entry.
#[tokio::test]
async fn disabled_node_is_skipped() {
    let engine = ExecutionEngine::default();
    let mut disabled = set_values("Disabled", json!({"ran": true}));
    disabled.disabled = true;
    let workflow = make_workflow(
        "disabled",
        vec![trigger("Trigger"), disabled, node("After", "noOp", &[])],
        &[("Trigger", "main", "Disabled"), ("Disabled", "main", "After")],
    );

    let execution = engine
        .submit(&workflow, TriggerKind::Manual, DataObject::new())
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Success);
    assert_eq!(record_status(&execution, "Disabled"), NodeExecutionStatus::Skipped);
    // Nothing downstream of the disabled node could run either.
    assert_eq!(record_status(&execution, "After"), NodeExecutionStatus::Skipped);
    let skipped: Vec<_> = execution
        .node_executions
        .iter()
        .filter(|r| r.node_id == "Disabled")
        .collect();
    assert_eq!(skipped.len(), 1);
}

/// If-node routing: the untaken branch is skipped, the taken branch runs.
#[tokio::test]
async fn if_node_routes_to_taken_branch() {
    let engine = ExecutionEngine::default();
    let workflow = make_workflow(
        "if-routing",
        vec![
            trigger("Trigger"),
            node("Check", "if", &[("condition", json!("eq(1,1)"))]),
            node("Yes", "noOp", &[]),
            node("No", "noOp", &[]),
        ],
        &[
            ("Trigger", "main", "Check"),
            ("Check", "true", "Yes"),
            ("Check", "false", "No"),
        ],
    );

    let execution = engine
        .submit(&workflow, TriggerKind::Manual, DataObject::new())
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Success);
    assert_eq!(record_status(&execution, "Yes"), NodeExecutionStatus::Success);
    assert_eq!(record_status(&execution, "No"), NodeExecutionStatus::Skipped);
}

/// Overlapping predecessor keys merge last-wins in connection
/// declaration order.
#[tokio::test]
async fn predecessor_merge_is_declaration_order_last_wins() {
    let engine = ExecutionEngine::default();
    let workflow = make_workflow(
        "merge-order",
        vec![
            trigger("Trigger"),
            set_values("First", json!({"winner": "first", "a": 1})),
            set_values("Second", json!({"winner": "second", "b": 2})),
            node("Join", "noOp", &[]),
        ],
        &[
            ("Trigger", "main", "First"),
            ("Trigger", "main", "Second"),
            ("First", "main", "Join"),
            ("Second", "main", "Join"),
        ],
    );

    let execution = engine
        .submit(&workflow, TriggerKind::Manual, DataObject::new())
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Success);
    assert_eq!(execution.output_data["winner"], json!("second"));
    assert_eq!(execution.output_data["a"], json!(1));
    assert_eq!(execution.output_data["b"], json!(2));
}

/// Loop construct: the body runs once per item with the item variable
/// bound; per-iteration outputs aggregate in insertion order.
#[tokio::test]
async fn loop_runs_body_per_item() {
    let engine = ExecutionEngine::default();
    let workflow = make_workflow(
        "loop",
        vec![
            trigger("Trigger"),
            node(
                "Each",
                "loop",
                &[("items", json!(["red", "green", "blue"])), ("itemVariableName", json!("color"))],
            ),
            set_values("Paint", json!({"painted": "${color}"})),
        ],
        &[("Trigger", "main", "Each"), ("Each", "main", "Paint")],
    );

    let execution = engine
        .submit(&workflow, TriggerKind::Manual, DataObject::new())
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Success);
    let iterations = execution.output_data["iterations"].as_array().unwrap();
    assert_eq!(iterations.len(), 3);
    assert_eq!(iterations[0]["painted"], json!("red"));
    assert_eq!(iterations[1]["painted"], json!("green"));
    assert_eq!(iterations[2]["painted"], json!("blue"));
    // One Paint record per iteration.
    let paints = execution
        .node_executions
        .iter()
        .filter(|r| r.node_id == "Paint")
        .count();
    assert_eq!(paints, 3);
}

/// Parallel construct: branches fan out, the shared join node runs after
/// both and sees both outputs.
#[tokio::test]
async fn parallel_branches_join() {
    let engine = ExecutionEngine::default();
    let workflow = make_workflow(
        "parallel",
        vec![
            trigger("Trigger"),
            node("FanOut", "parallel", &[]),
            set_values("Left", json!({"left": 1})),
            set_values("Right", json!({"right": 2})),
            node("Join", "noOp", &[]),
        ],
        &[
            ("Trigger", "main", "FanOut"),
            ("FanOut", "main", "Left"),
            ("FanOut", "main", "Right"),
            ("Left", "main", "Join"),
            ("Right", "main", "Join"),
        ],
    );

    let execution = engine
        .submit(&workflow, TriggerKind::Manual, DataObject::new())
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Success);
    assert_eq!(execution.output_data["left"], json!(1));
    assert_eq!(execution.output_data["right"], json!(2));
    assert_eq!(record_status(&execution, "Join"), NodeExecutionStatus::Success);
}

/// Subworkflow construct: the child run is recorded separately and its
/// output flows into the parent.
#[tokio::test]
async fn subworkflow_runs_child() {
    let engine = ExecutionEngine::default();

    let child = make_workflow(
        "child",
        vec![trigger("ChildTrigger"), set_values("Mark", json!({"fromChild": true}))],
        &[("ChildTrigger", "main", "Mark")],
    );
    engine.stores().workflows.save_workflow(&child).await.unwrap();

    let parent = make_workflow(
        "parent",
        vec![
            trigger("Trigger"),
            node("Call", "subworkflow", &[("workflowId", json!(child.id))]),
        ],
        &[("Trigger", "main", "Call")],
    );

    let execution = engine
        .submit(&parent, TriggerKind::Manual, DataObject::new())
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Success);
    assert_eq!(execution.output_data["fromChild"], json!(true));
    assert!(execution.output_data["childExecutionId"].is_string());

    // The child execution was persisted with the parent as its parent.
    let child_runs = engine
        .stores()
        .executions
        .list_executions(&child.id)
        .await
        .unwrap();
    assert_eq!(child_runs.len(), 1);
    assert_eq!(
        child_runs[0].parent_execution_id.as_deref(),
        Some(execution.id.as_str())
    );
}

/// Per-node deadline: a node exceeding its configured timeout fails the
/// execution with a timeout message.
#[tokio::test]
async fn node_timeout_fails_the_node() {
    let engine = ExecutionEngine::default();
    let workflow = make_workflow(
        "timeout",
        vec![
            trigger("Trigger"),
            node(
                "Slow",
                "wait",
                &[
                    ("amount", json!(30)),
                    ("unit", json!("seconds")),
                    ("timeoutMs", json!(100)),
                ],
            ),
        ],
        &[("Trigger", "main", "Slow")],
    );

    let execution = engine
        .submit(&workflow, TriggerKind::Manual, DataObject::new())
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution
        .error_message
        .as_deref()
        .unwrap_or("")
        .contains("timed out"));
}

/// Empty workflows refuse to run.
#[tokio::test]
async fn empty_workflow_is_refused() {
    let engine = ExecutionEngine::default();
    let workflow = Workflow::new("empty");
    let error = engine
        .submit(&workflow, TriggerKind::Manual, DataObject::new())
        .await
        .unwrap_err();
    assert!(error.to_string().contains("workflow has no nodes"));
}

/// Event stream invariant: per node, start -> input -> output -> end, in
/// that order, exactly one start and one end.
#[tokio::test]
async fn event_stream_ordering_per_node() {
    let logger = Arc::new(ExecutionLogger::new());
    let (_, entries) = logger.recorder();
    let engine = ExecutionEngine::with_parts(
        EngineConfig::default(),
        Arc::new(NodeExecutorRegistry::new()),
        logger,
        EngineStores::in_memory(),
        None,
    );

    let workflow = make_workflow(
        "events",
        vec![trigger("Trigger"), set_values("Step", json!({"x": 1}))],
        &[("Trigger", "main", "Step")],
    );

    let execution = engine
        .submit(&workflow, TriggerKind::Manual, DataObject::new())
        .await
        .unwrap();
    assert_eq!(execution.status, ExecutionStatus::Success);

    let entries = entries.lock();
    for node_id in ["Trigger", "Step"] {
        let positions: HashMap<LogCategory, Vec<usize>> = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.context.get("nodeId") == Some(&json!(node_id)))
            .fold(HashMap::new(), |mut acc, (index, entry)| {
                acc.entry(entry.category).or_default().push(index);
                acc
            });

        let starts = &positions[&LogCategory::NodeStart];
        let inputs = &positions[&LogCategory::NodeInput];
        let outputs = &positions[&LogCategory::NodeOutput];
        let ends = &positions[&LogCategory::NodeEnd];
        assert_eq!(starts.len(), 1, "{node_id}: one start");
        assert_eq!(ends.len(), 1, "{node_id}: one end");
        assert!(starts[0] < inputs[0]);
        assert!(inputs[0] < outputs[0]);
        assert!(outputs[0] < ends[0]);
    }

    // Execution bracket events around everything.
    assert_eq!(entries[0].category, LogCategory::ExecutionStart);
    assert_eq!(
        entries.last().unwrap().category,
        LogCategory::ExecutionEnd
    );
}

/// Step mode: the engine pauses after each node; cancelling from the
/// controller aborts the run.
#[tokio::test]
async fn step_mode_pause_and_cancel() {
    let engine = ExecutionEngine::default();
    let workflow = make_workflow(
        "stepping",
        vec![trigger("Trigger"), node("A", "noOp", &[]), node("B", "noOp", &[])],
        &[("Trigger", "main", "A"), ("A", "main", "B")],
    );

    let step = StepController::new();
    let mut pauses = step.pause_events();

    let runner = {
        let engine = engine.clone();
        let step = step.clone();
        let workflow = workflow.clone();
        tokio::spawn(async move {
            engine
                .submit_stepped(&workflow, TriggerKind::Manual, DataObject::new(), step)
                .await
        })
    };

    // First pause arrives after the trigger node.
    let pause = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            pauses.changed().await.expect("pause channel closed");
            if let Some(pause) = pauses.borrow().clone() {
                return pause;
            }
        }
    })
    .await
    .expect("engine should pause in step mode");
    assert_eq!(pause.node_id, "Trigger");
    assert!(pause.total_nodes >= 3);

    step.cancel_step_execution();
    let execution = runner.await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Cancelled);
    // Only the trigger ran before the abort.
    assert_eq!(
        execution
            .node_executions
            .iter()
            .filter(|r| r.status == NodeExecutionStatus::Success)
            .count(),
        1
    );
}

/// Step mode: releasing every pause runs the workflow to completion.
#[tokio::test]
async fn step_mode_runs_to_completion_when_released() {
    let engine = ExecutionEngine::default();
    let workflow = make_workflow(
        "stepping-complete",
        vec![trigger("Trigger"), node("A", "noOp", &[])],
        &[("Trigger", "main", "A")],
    );

    let step = StepController::new();
    // Pre-release more steps than the workflow has nodes.
    for _ in 0..8 {
        step.continue_step();
    }

    let execution = engine
        .submit_stepped(&workflow, TriggerKind::Manual, DataObject::new(), step)
        .await
        .unwrap();
    assert_eq!(execution.status, ExecutionStatus::Success);
}
