//! # nervemind-engine
//!
//! Workflow execution engine for NerveMind.
//!
//! This crate provides the core execution logic for running workflows:
//! layered graph dispatch, expression-interpolated parameters, per-node
//! timeout/retry/rate-limit policies, parallel fan-out, try/catch
//! recovery, step-debug suspension and a structured execution event
//! stream.

pub mod credentials;
pub mod engine;
pub mod error;
pub mod executor;
pub mod executors;
pub mod expression;
pub mod logger;
pub mod plugin;
pub mod ratelimit;
pub mod runtime;
pub mod stores;

pub use credentials::{
    Credential, CredentialCipher, CredentialError, CredentialKind, DecryptedCredential,
};
pub use engine::ExecutionEngine;
pub use error::EngineError;
pub use executor::{
    ExecutorSnapshot, NodeCategory, NodeDescriptor, NodeExecutor, NodeExecutorRegistry, NodeOutput,
};
pub use expression::Evaluator;
pub use logger::{ExecutionLogger, LogCategory, LogEntry, LogLevel, SubscriptionId};
pub use plugin::{PluginDependency, PluginProvider, PluginRegistry};
pub use ratelimit::{BucketConfig, RateLimitBucket, RateLimiterRegistry};
pub use runtime::{
    CredentialResolver, EngineConfig, ExecutionContext, HandleMap, StepController, StepPause,
};
pub use stores::{
    CredentialStore, EngineStores, ExecutionStore, MemoryCredentialStore, MemoryExecutionStore,
    MemorySettingsStore, MemoryVariableStore, MemoryWorkflowStore, SettingsStore, VariableStore,
    WorkflowStore,
};
