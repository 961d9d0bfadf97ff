//! Executor that runs a workflow template as a child process.
//!
//! The template is expected to look like `{ command = ["prog", "arg", ...] }`.
//! The run id, scheduled time and workflow name are exported to the child as
//! `CRONWARDEN_RUN_ID`, `CRONWARDEN_SCHEDULED_TIME` and `CRONWARDEN_WORKFLOW`.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::{RunCompletion, WorkflowExecutor};
use crate::scheduler::{CronScheduleSpec, RunId, RunOutcome};

#[derive(Debug, Deserialize)]
struct CommandTemplate {
    command: Vec<String>,
}

fn parse_template(spec: &CronScheduleSpec) -> Result<CommandTemplate> {
    let template: CommandTemplate = serde_json::from_value(spec.workflow_template.clone())
        .with_context(|| format!("workflow template of '{}' has no command list", spec.name))?;
    if template.command.is_empty() {
        anyhow::bail!("workflow template of '{}' has an empty command", spec.name);
    }
    Ok(template)
}

#[derive(Clone)]
pub struct ProcessExecutor {
    /// Kill switches for children that are still running.
    active: Arc<Mutex<HashMap<RunId, oneshot::Sender<()>>>>,
    completions: mpsc::UnboundedSender<RunCompletion>,
}

impl ProcessExecutor {
    pub fn new(completions: mpsc::UnboundedSender<RunCompletion>) -> Self {
        Self {
            active: Arc::new(Mutex::new(HashMap::new())),
            completions,
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().map(|m| m.len()).unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl WorkflowExecutor for ProcessExecutor {
    async fn launch(
        &self,
        run_id: RunId,
        spec: &CronScheduleSpec,
        scheduled_time: DateTime<Utc>,
    ) -> Result<()> {
        let template = parse_template(spec)?;
        let (program, args) = (&template.command[0], &template.command[1..]);

        let mut child = Command::new(program)
            .args(args)
            .env("CRONWARDEN_RUN_ID", run_id.to_string())
            .env("CRONWARDEN_SCHEDULED_TIME", scheduled_time.to_rfc3339())
            .env("CRONWARDEN_WORKFLOW", &spec.name)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn '{}'", program))?;

        let (kill_tx, kill_rx) = oneshot::channel();
        self.active
            .lock()
            .map_err(|_| anyhow::anyhow!("executor state poisoned"))?
            .insert(run_id, kill_tx);

        info!(run_id = %run_id, workflow = %spec.name, program = %program, "Run launched");

        let active = Arc::clone(&self.active);
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let outcome = tokio::select! {
                status = child.wait() => match status {
                    Ok(s) if s.success() => RunOutcome::Succeeded,
                    Ok(s) => {
                        debug!(run_id = %run_id, status = %s, "Run exited unsuccessfully");
                        RunOutcome::Failed
                    }
                    Err(e) => {
                        warn!(run_id = %run_id, "Failed to wait on run: {}", e);
                        RunOutcome::Failed
                    }
                },
                _ = kill_rx => {
                    if let Err(e) = child.kill().await {
                        warn!(run_id = %run_id, "Failed to kill run: {}", e);
                    }
                    RunOutcome::Failed
                }
            };

            if let Ok(mut map) = active.lock() {
                map.remove(&run_id);
            }
            let _ = completions.send(RunCompletion {
                run_id,
                outcome,
                finished_at: Utc::now(),
            });
        });

        Ok(())
    }

    async fn terminate(&self, run_id: RunId) -> Result<()> {
        let kill = self
            .active
            .lock()
            .map_err(|_| anyhow::anyhow!("executor state poisoned"))?
            .remove(&run_id);

        match kill {
            Some(tx) => {
                // The waiter may have already finished; that's fine.
                let _ = tx.send(());
                info!(run_id = %run_id, "Run terminated");
                Ok(())
            }
            None => anyhow::bail!("run {} is not active", run_id),
        }
    }
}
