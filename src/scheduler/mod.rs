//! Cron-triggered workflow scheduling: spec types, tick evaluation,
//! run history, and the per-spec controller loop.

pub mod cron;
pub mod engine;
pub mod evaluator;
pub mod history;
pub mod spec;

pub use self::engine::{Controller, SpecWorker};
pub use self::evaluator::{evaluate, Action, SkipReason};
pub use self::history::{RunHistory, RunId, RunOutcome, RunStatus, WorkflowRun};
pub use self::spec::{ConcurrencyPolicy, CronScheduleSpec};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CronError {
    #[error("invalid schedule expression '{expression}': {reason}")]
    InvalidScheduleExpression { expression: String, reason: String },

    #[error("invalid concurrency policy '{value}': expected one of Allow, Forbid, Replace")]
    InvalidPolicy { value: String },

    #[error("invalid cron workflow '{name}': {reason}")]
    InvalidSpec { name: String, reason: String },

    #[error("run {run_id} is already recorded")]
    DuplicateRun { run_id: RunId },

    #[error("run {run_id} not found")]
    UnknownRun { run_id: RunId },

    #[error("run {run_id} already completed as {status}")]
    RunAlreadyCompleted { run_id: RunId, status: RunStatus },
}
