//! Built-in node executors.

pub mod code;
pub mod command;
pub mod control;
pub mod data;
pub mod http;
pub mod llm;
pub mod logic;
pub mod triggers;

use std::sync::Arc;

use crate::executor::NodeExecutor;

/// Every built-in executor, ready for registration.
pub fn builtin_executors() -> Vec<Arc<dyn NodeExecutor>> {
    vec![
        Arc::new(triggers::ManualTriggerExecutor),
        Arc::new(triggers::ScheduleTriggerExecutor),
        Arc::new(triggers::WebhookTriggerExecutor),
        Arc::new(triggers::FileEventTriggerExecutor),
        Arc::new(http::HttpRequestExecutor::new()),
        Arc::new(code::CodeExecutor),
        Arc::new(llm::LlmChatExecutor::new()),
        Arc::new(command::ExecuteCommandExecutor),
        Arc::new(logic::IfExecutor),
        Arc::new(logic::SwitchExecutor),
        Arc::new(logic::MergeExecutor),
        Arc::new(data::SetExecutor),
        Arc::new(data::FilterExecutor),
        Arc::new(data::SortExecutor),
        Arc::new(data::LoopExecutor),
        Arc::new(data::LimitExecutor),
        Arc::new(control::ParallelExecutor),
        Arc::new(control::TryCatchExecutor),
        Arc::new(control::RetryExecutor),
        Arc::new(control::RateLimitExecutor),
        Arc::new(control::SubworkflowExecutor),
        Arc::new(control::NoOpExecutor),
        Arc::new(control::WaitExecutor),
        Arc::new(control::StopAndErrorExecutor),
    ]
}
