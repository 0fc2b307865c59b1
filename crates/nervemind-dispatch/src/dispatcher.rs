//! The trigger dispatcher task.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use nervemind_engine::ExecutionEngine;
use nervemind_workflow::{DataObject, TriggerKind};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::schedule::ScheduleSpec;

/// Errors surfaced by the dispatcher's public API.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Invalid cron expression: {0}")]
    InvalidCron(String),

    #[error("File watch error: {0}")]
    Watch(String),

    #[error("Dispatcher is stopped")]
    Stopped,
}

/// Requests accepted over the dispatcher's work queue.
#[derive(Debug)]
pub enum DispatchCommand {
    AddSchedule {
        id: String,
        workflow_id: String,
        spec: ScheduleSpec,
    },
    RemoveSchedule {
        id: String,
    },
    AddWatch {
        id: String,
        workflow_id: String,
        path: PathBuf,
    },
    RemoveWatch {
        id: String,
    },
    RegisterWebhook {
        path: String,
        workflow_id: String,
    },
    Webhook {
        path: String,
        payload: DataObject,
    },
    Manual {
        workflow_id: String,
        input: DataObject,
    },
    Shutdown,
}

/// Handle to the single dispatcher task.
pub struct TriggerDispatcher {
    commands: mpsc::Sender<DispatchCommand>,
    task: JoinHandle<()>,
}

impl TriggerDispatcher {
    /// Spawn the dispatcher task over an engine.
    pub fn start(engine: ExecutionEngine) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(64);
        let (file_tx, file_rx) = mpsc::channel(256);
        let task = tokio::spawn(
            DispatcherTask {
                engine,
                schedules: HashMap::new(),
                watches: HashMap::new(),
                webhooks: HashMap::new(),
                watcher: None,
                file_tx,
            }
            .run(commands_rx, file_rx),
        );
        Self {
            commands: commands_tx,
            task,
        }
    }

    async fn send(&self, command: DispatchCommand) -> Result<(), DispatchError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| DispatchError::Stopped)
    }

    /// Register a scheduled trigger.
    pub async fn add_schedule(
        &self,
        id: impl Into<String>,
        workflow_id: impl Into<String>,
        spec: ScheduleSpec,
    ) -> Result<(), DispatchError> {
        self.send(DispatchCommand::AddSchedule {
            id: id.into(),
            workflow_id: workflow_id.into(),
            spec,
        })
        .await
    }

    pub async fn remove_schedule(&self, id: impl Into<String>) -> Result<(), DispatchError> {
        self.send(DispatchCommand::RemoveSchedule { id: id.into() }).await
    }

    /// Register a file-system watch trigger.
    pub async fn add_watch(
        &self,
        id: impl Into<String>,
        workflow_id: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Result<(), DispatchError> {
        self.send(DispatchCommand::AddWatch {
            id: id.into(),
            workflow_id: workflow_id.into(),
            path: path.into(),
        })
        .await
    }

    pub async fn remove_watch(&self, id: impl Into<String>) -> Result<(), DispatchError> {
        self.send(DispatchCommand::RemoveWatch { id: id.into() }).await
    }

    /// Bind a webhook path to a workflow.
    pub async fn register_webhook(
        &self,
        path: impl Into<String>,
        workflow_id: impl Into<String>,
    ) -> Result<(), DispatchError> {
        self.send(DispatchCommand::RegisterWebhook {
            path: path.into(),
            workflow_id: workflow_id.into(),
        })
        .await
    }

    /// Hand a received webhook payload to its registered workflow. The
    /// HTTP surface lives in the host; this takes the already-parsed
    /// request payload.
    pub async fn dispatch_webhook(
        &self,
        path: impl Into<String>,
        payload: DataObject,
    ) -> Result<(), DispatchError> {
        self.send(DispatchCommand::Webhook {
            path: path.into(),
            payload,
        })
        .await
    }

    /// Start a workflow by hand.
    pub async fn dispatch_manual(
        &self,
        workflow_id: impl Into<String>,
        input: DataObject,
    ) -> Result<(), DispatchError> {
        self.send(DispatchCommand::Manual {
            workflow_id: workflow_id.into(),
            input,
        })
        .await
    }

    /// Stop the dispatcher and shut the engine down gracefully.
    pub async fn shutdown(self) {
        let _ = self.commands.send(DispatchCommand::Shutdown).await;
        let _ = self.task.await;
    }
}

struct ScheduleEntry {
    workflow_id: String,
    spec: ScheduleSpec,
    next: DateTime<Utc>,
}

struct WatchEntry {
    workflow_id: String,
    path: PathBuf,
}

struct DispatcherTask {
    engine: ExecutionEngine,
    schedules: HashMap<String, ScheduleEntry>,
    watches: HashMap<String, WatchEntry>,
    webhooks: HashMap<String, String>,
    watcher: Option<RecommendedWatcher>,
    file_tx: mpsc::Sender<notify::Event>,
}

impl DispatcherTask {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<DispatchCommand>,
        mut file_events: mpsc::Receiver<notify::Event>,
    ) {
        info!("trigger dispatcher started");
        loop {
            let sleep_for = self.until_next_fire();
            tokio::select! {
                command = commands.recv() => {
                    match command {
                        None => break,
                        Some(DispatchCommand::Shutdown) => break,
                        Some(command) => self.handle_command(command).await,
                    }
                }
                Some(event) = file_events.recv() => {
                    self.handle_file_event(event).await;
                }
                _ = tokio::time::sleep(sleep_for) => {
                    self.fire_due_schedules().await;
                }
            }
        }
        self.engine.shutdown().await;
        info!("trigger dispatcher stopped");
    }

    fn until_next_fire(&self) -> std::time::Duration {
        let now = Utc::now();
        self.schedules
            .values()
            .map(|entry| (entry.next - now).to_std().unwrap_or_default())
            .min()
            // Nothing scheduled: sleep long, commands wake us anyway.
            .unwrap_or(std::time::Duration::from_secs(3600))
    }

    async fn handle_command(&mut self, command: DispatchCommand) {
        match command {
            DispatchCommand::AddSchedule {
                id,
                workflow_id,
                spec,
            } => match spec.next_after(Utc::now()) {
                Some(next) => {
                    debug!(schedule = %id, workflow = %workflow_id, %next, "schedule added");
                    self.schedules.insert(
                        id,
                        ScheduleEntry {
                            workflow_id,
                            spec,
                            next,
                        },
                    );
                }
                None => warn!(schedule = %id, "schedule has no next occurrence"),
            },
            DispatchCommand::RemoveSchedule { id } => {
                self.schedules.remove(&id);
            }
            DispatchCommand::AddWatch {
                id,
                workflow_id,
                path,
            } => match self.watch_path(&path) {
                Ok(()) => {
                    debug!(watch = %id, path = %path.display(), "watch added");
                    self.watches.insert(id, WatchEntry { workflow_id, path });
                }
                Err(e) => error!(watch = %id, "failed to add watch: {e}"),
            },
            DispatchCommand::RemoveWatch { id } => {
                if let Some(entry) = self.watches.remove(&id) {
                    if let Some(watcher) = self.watcher.as_mut() {
                        let _ = watcher.unwatch(&entry.path);
                    }
                }
            }
            DispatchCommand::RegisterWebhook { path, workflow_id } => {
                self.webhooks.insert(path, workflow_id);
            }
            DispatchCommand::Webhook { path, payload } => {
                match self.webhooks.get(&path).cloned() {
                    Some(workflow_id) => {
                        let mut input = payload;
                        input.insert("webhookPath".to_string(), Value::String(path));
                        self.submit(&workflow_id, TriggerKind::Webhook, input).await;
                    }
                    None => warn!(%path, "webhook received for unregistered path"),
                }
            }
            DispatchCommand::Manual { workflow_id, input } => {
                self.submit(&workflow_id, TriggerKind::Manual, input).await;
            }
            DispatchCommand::Shutdown => {}
        }
    }

    fn watch_path(&mut self, path: &Path) -> Result<(), DispatchError> {
        if self.watcher.is_none() {
            let file_tx = self.file_tx.clone();
            let watcher = notify::recommended_watcher(
                move |result: Result<notify::Event, notify::Error>| {
                    if let Ok(event) = result {
                        let _ = file_tx.blocking_send(event);
                    }
                },
            )
            .map_err(|e| DispatchError::Watch(e.to_string()))?;
            self.watcher = Some(watcher);
        }
        if let Some(watcher) = self.watcher.as_mut() {
            watcher
                .watch(path, RecursiveMode::Recursive)
                .map_err(|e| DispatchError::Watch(e.to_string()))?;
        }
        Ok(())
    }

    async fn fire_due_schedules(&mut self) {
        let now = Utc::now();
        let due: Vec<String> = self
            .schedules
            .iter()
            .filter(|(_, entry)| entry.next <= now)
            .map(|(id, _)| id.clone())
            .collect();

        for id in due {
            let (workflow_id, scheduled_for, rescheduled) = match self.schedules.get_mut(&id) {
                Some(entry) => {
                    let workflow_id = entry.workflow_id.clone();
                    let scheduled_for = entry.next;
                    let rescheduled = entry.spec.next_after(now);
                    if let Some(next) = rescheduled {
                        entry.next = next;
                    }
                    (workflow_id, scheduled_for, rescheduled)
                }
                None => continue,
            };
            // One-shot schedules drop out once exhausted.
            if rescheduled.is_none() {
                self.schedules.remove(&id);
            }

            let mut input = DataObject::new();
            input.insert(
                "scheduledFor".to_string(),
                Value::String(scheduled_for.to_rfc3339()),
            );
            self.submit(&workflow_id, TriggerKind::Schedule, input).await;
        }
    }

    async fn handle_file_event(&self, event: notify::Event) {
        for path in &event.paths {
            for entry in self.watches.values() {
                if path.starts_with(&entry.path) {
                    let mut input = DataObject::new();
                    input.insert(
                        "path".to_string(),
                        Value::String(path.display().to_string()),
                    );
                    input.insert("kind".to_string(), json!(format!("{:?}", event.kind)));
                    self.submit(&entry.workflow_id, TriggerKind::FileEvent, input)
                        .await;
                }
            }
        }
    }

    /// Load the workflow and submit it on its own task so a slow run never
    /// blocks the dispatcher.
    async fn submit(&self, workflow_id: &str, kind: TriggerKind, input: DataObject) {
        match self.engine.stores().workflows.get_workflow(workflow_id).await {
            Ok(Some(workflow)) => {
                let engine = self.engine.clone();
                tokio::spawn(async move {
                    if let Err(e) = engine.submit(&workflow, kind, input).await {
                        error!(workflow = %workflow.id, "dispatched execution failed: {e}");
                    }
                });
            }
            Ok(None) => warn!(%workflow_id, "dispatch for unknown workflow"),
            Err(e) => error!(%workflow_id, "failed to load workflow: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nervemind_engine::EngineConfig;
    use nervemind_workflow::{Node, Workflow};
    use std::time::Duration;

    async fn engine_with_workflow() -> (ExecutionEngine, String) {
        let engine = ExecutionEngine::new(EngineConfig::default());
        let mut workflow = Workflow::new("dispatched");
        let mut trigger = Node::new("Trigger", "manualTrigger");
        trigger.id = "trigger".to_string();
        workflow.add_node(trigger);
        let workflow_id = workflow.id.clone();
        engine
            .stores()
            .workflows
            .save_workflow(&workflow)
            .await
            .unwrap();
        (engine, workflow_id)
    }

    #[tokio::test]
    async fn manual_dispatch_runs_the_workflow() {
        let (engine, workflow_id) = engine_with_workflow().await;
        let dispatcher = TriggerDispatcher::start(engine.clone());

        dispatcher
            .dispatch_manual(&workflow_id, DataObject::new())
            .await
            .unwrap();

        // The run is spawned; give it a moment.
        tokio::time::sleep(Duration::from_millis(300)).await;
        let executions = engine
            .stores()
            .executions
            .list_executions(&workflow_id)
            .await
            .unwrap();
        assert_eq!(executions.len(), 1);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn interval_schedule_fires_repeatedly() {
        let (engine, workflow_id) = engine_with_workflow().await;
        let dispatcher = TriggerDispatcher::start(engine.clone());

        dispatcher
            .add_schedule(
                "tick",
                &workflow_id,
                ScheduleSpec::every(Duration::from_millis(50)),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        let executions = engine
            .stores()
            .executions
            .list_executions(&workflow_id)
            .await
            .unwrap();
        assert!(
            executions.len() >= 2,
            "expected repeated fires, got {}",
            executions.len()
        );
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn webhook_requires_registration() {
        let (engine, workflow_id) = engine_with_workflow().await;
        let dispatcher = TriggerDispatcher::start(engine.clone());

        // Unregistered path: nothing runs.
        dispatcher
            .dispatch_webhook("/hooks/unknown", DataObject::new())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(engine
            .stores()
            .executions
            .list_executions(&workflow_id)
            .await
            .unwrap()
            .is_empty());

        dispatcher
            .register_webhook("/hooks/ping", &workflow_id)
            .await
            .unwrap();
        let mut payload = DataObject::new();
        payload.insert("body".to_string(), json!({"ping": true}));
        dispatcher
            .dispatch_webhook("/hooks/ping", payload)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        let executions = engine
            .stores()
            .executions
            .list_executions(&workflow_id)
            .await
            .unwrap();
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].trigger_kind, TriggerKind::Webhook);
        dispatcher.shutdown().await;
    }
}
