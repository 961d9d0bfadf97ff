//! Workflow executors: the collaborator that actually launches and
//! terminates runs and reports their completion.

pub mod process;

pub use self::process::ProcessExecutor;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::scheduler::{CronScheduleSpec, RunId, RunOutcome};

/// Status report sent back by an executor when a run finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunCompletion {
    pub run_id: RunId,
    pub outcome: RunOutcome,
    pub finished_at: DateTime<Utc>,
}

/// Launches and terminates workflow runs.
///
/// Completions are reported asynchronously through whatever channel the
/// executor was built with; `launch` returns as soon as the run is started.
#[async_trait::async_trait]
pub trait WorkflowExecutor: Send + Sync {
    /// Start a run of `spec`'s template under the given id.
    async fn launch(
        &self,
        run_id: RunId,
        spec: &CronScheduleSpec,
        scheduled_time: DateTime<Utc>,
    ) -> Result<()>;

    /// Stop a run that is still active.
    async fn terminate(&self, run_id: RunId) -> Result<()>;
}
