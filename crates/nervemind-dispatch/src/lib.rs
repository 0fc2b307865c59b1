//! # nervemind-dispatch
//!
//! Trigger dispatch for NerveMind. The dispatcher converts external
//! stimuli (manual invocation, schedule tick, webhook request,
//! file-system event) into engine submissions. It owns the timer set and
//! the watch set; external callers talk to it over a command queue. It is
//! the only component that initiates executions.

pub mod dispatcher;
pub mod schedule;

pub use dispatcher::{DispatchCommand, DispatchError, TriggerDispatcher};
pub use schedule::ScheduleSpec;
