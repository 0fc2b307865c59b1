//! Structured execution logging.
//!
//! A single multicast bus: every engine component publishes typed
//! [`LogEntry`] values, subscribers receive them synchronously in emission
//! order on the emitting thread. Handlers must be cheap or offload to their
//! own queue.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use nervemind_workflow::DataObject;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum size of a payload preview, in bytes.
pub const PREVIEW_LIMIT: usize = 1024;

/// Log severity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Event category. One per kind of thing that happens during a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum LogCategory {
    ExecutionStart,
    ExecutionEnd,
    NodeStart,
    NodeEnd,
    NodeSkip,
    NodeInput,
    NodeOutput,
    Variable,
    ExpressionEval,
    Error,
    Retry,
    RateLimit,
    DataFlow,
}

impl LogCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogCategory::ExecutionStart => "execution-start",
            LogCategory::ExecutionEnd => "execution-end",
            LogCategory::NodeStart => "node-start",
            LogCategory::NodeEnd => "node-end",
            LogCategory::NodeSkip => "node-skip",
            LogCategory::NodeInput => "node-input",
            LogCategory::NodeOutput => "node-output",
            LogCategory::Variable => "variable",
            LogCategory::ExpressionEval => "expression-eval",
            LogCategory::Error => "error",
            LogCategory::Retry => "retry",
            LogCategory::RateLimit => "rate-limit",
            LogCategory::DataFlow => "data-flow",
        }
    }
}

/// One emitted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub level: LogLevel,
    pub category: LogCategory,
    pub execution_id: String,
    pub message: String,
    #[serde(default)]
    pub context: DataObject,
}

impl LogEntry {
    pub fn new(
        level: LogLevel,
        category: LogCategory,
        execution_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            level,
            category,
            execution_id: execution_id.into(),
            message: message.into(),
            context: DataObject::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Attach a data payload as both a bounded `preview` string and the
    /// unbounded `full` value. Consumers like the live console render the
    /// preview; the debug view reads `full`.
    pub fn with_payload(mut self, value: &Value) -> Self {
        self.context
            .insert("preview".to_string(), Value::String(preview_of(value)));
        self.context.insert("full".to_string(), value.clone());
        self
    }
}

/// Render a bounded preview of a value, truncated on a char boundary.
pub fn preview_of(value: &Value) -> String {
    let rendered = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if rendered.len() <= PREVIEW_LIMIT {
        return rendered;
    }
    let mut cut = PREVIEW_LIMIT;
    while !rendered.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", &rendered[..cut])
}

/// Handle returned by [`ExecutionLogger::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&LogEntry) + Send + Sync>;

/// Sink-agnostic multicast event bus. Delivery is synchronous and in
/// emission order; a panicking handler is isolated and does not interrupt
/// delivery to the others.
#[derive(Default)]
pub struct ExecutionLogger {
    handlers: RwLock<Vec<(u64, Handler)>>,
    next_id: AtomicU64,
}

impl ExecutionLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; returns an id for [`ExecutionLogger::unsubscribe`].
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&LogEntry) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers.write().push((id, Arc::new(handler)));
        SubscriptionId(id)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.handlers.write().retain(|(hid, _)| *hid != id.0);
    }

    /// Deliver an entry to every subscriber, in subscription order.
    pub fn emit(&self, entry: LogEntry) {
        // Snapshot so a handler that subscribes/unsubscribes cannot
        // deadlock against the emitting thread.
        let handlers: Vec<Handler> = self
            .handlers
            .read()
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        for handler in handlers {
            let _ = catch_unwind(AssertUnwindSafe(|| handler(&entry)));
        }
    }

    /// Convenience recorder: subscribes a handler that collects every entry
    /// into the returned buffer. Used by tests and the debug console.
    pub fn recorder(&self) -> (SubscriptionId, Arc<Mutex<Vec<LogEntry>>>) {
        let buffer: Arc<Mutex<Vec<LogEntry>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buffer);
        let id = self.subscribe(move |entry| sink.lock().push(entry.clone()));
        (id, buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(message: &str) -> LogEntry {
        LogEntry::new(LogLevel::Info, LogCategory::NodeStart, "exec-1", message)
    }

    #[test]
    fn delivery_is_in_emission_order() {
        let logger = ExecutionLogger::new();
        let (_, buffer) = logger.recorder();
        for i in 0..5 {
            logger.emit(entry(&format!("m{i}")));
        }
        let messages: Vec<String> = buffer.lock().iter().map(|e| e.message.clone()).collect();
        assert_eq!(messages, vec!["m0", "m1", "m2", "m3", "m4"]);
    }

    #[test]
    fn panicking_handler_does_not_interrupt_others() {
        let logger = ExecutionLogger::new();
        logger.subscribe(|_| panic!("bad handler"));
        let (_, buffer) = logger.recorder();
        logger.emit(entry("survives"));
        assert_eq!(buffer.lock().len(), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let logger = ExecutionLogger::new();
        let (id, buffer) = logger.recorder();
        logger.emit(entry("first"));
        logger.unsubscribe(id);
        logger.emit(entry("second"));
        assert_eq!(buffer.lock().len(), 1);
    }

    #[test]
    fn preview_is_bounded_and_full_is_not() {
        let long = "x".repeat(PREVIEW_LIMIT * 2);
        let entry = entry("payload").with_payload(&json!(long));
        let preview = entry.context["preview"].as_str().unwrap();
        assert!(preview.len() <= PREVIEW_LIMIT + '…'.len_utf8());
        assert_eq!(
            entry.context["full"].as_str().unwrap().len(),
            PREVIEW_LIMIT * 2
        );
    }
}
