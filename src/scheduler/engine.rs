//! Controller loop: one worker task per cron workflow.
//!
//! Each [`SpecWorker`] owns its spec and [`RunHistory`], so ticks for a spec
//! are serialized by construction and specs never share mutable history.
//! Executor completions are routed to the owning worker by run id.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::cron::next_tick_after;
use super::evaluator::{evaluate, Action, SkipReason};
use super::history::{RunHistory, RunId, RunOutcome, RunStatus, WorkflowRun};
use super::spec::CronScheduleSpec;
use super::CronError;
use crate::executor::{RunCompletion, WorkflowExecutor};
use crate::storage::SqliteRunStore;

/// Which cron workflow owns each in-flight run.
pub type RouteTable = Arc<RwLock<HashMap<RunId, String>>>;

pub struct SpecWorker {
    spec: CronScheduleSpec,
    history: RunHistory,
    executor: Arc<dyn WorkflowExecutor>,
    store: Option<SqliteRunStore>,
    routes: RouteTable,
    last_skipped: Option<DateTime<Utc>>,
}

impl SpecWorker {
    pub fn new(
        spec: CronScheduleSpec,
        history: RunHistory,
        executor: Arc<dyn WorkflowExecutor>,
        store: Option<SqliteRunStore>,
        routes: RouteTable,
    ) -> Self {
        if let Ok(mut table) = routes.write() {
            for run in history.running() {
                table.insert(run.id, spec.name.clone());
            }
        }
        Self {
            spec,
            history,
            executor,
            store,
            routes,
            last_skipped: None,
        }
    }

    pub fn history(&self) -> &RunHistory {
        &self.history
    }

    /// Evaluate the current tick and carry out the resulting action.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Result<Action, CronError> {
        let mut action = evaluate(&self.spec, now, self.history.runs())?;

        // A run for this tick may already have been evicted from history.
        if let (Some(tick), Some(last)) = (action.scheduled_time(), self.history.last_started()) {
            if last >= tick {
                action = Action::NoAction;
            }
        }

        match &action {
            Action::NoAction => {}
            Action::SkipTick {
                scheduled_time,
                reason,
            } => {
                // Only report a skipped tick once, not on every poll.
                if self.last_skipped != Some(*scheduled_time) {
                    self.last_skipped = Some(*scheduled_time);
                    match reason {
                        SkipReason::MissedDeadline => warn!(
                            spec = %self.spec.name,
                            tick = %scheduled_time,
                            deadline_secs = ?self.spec.starting_deadline_seconds,
                            "Tick missed its starting deadline"
                        ),
                        _ => info!(spec = %self.spec.name, tick = %scheduled_time, %reason, "Tick skipped"),
                    }
                }
            }
            Action::StartNewRun { scheduled_time } => {
                self.start_run(*scheduled_time, now).await;
            }
            Action::TerminateThenStart {
                scheduled_time,
                terminate,
            } => {
                for run_id in terminate {
                    self.terminate_run(*run_id, now).await;
                }
                self.start_run(*scheduled_time, now).await;
            }
        }

        Ok(action)
    }

    /// Apply a completion reported by the executor.
    pub async fn apply_completion(&mut self, completion: RunCompletion) {
        match self
            .complete(completion.run_id, completion.outcome, completion.finished_at)
            .await
        {
            Ok(()) => info!(
                spec = %self.spec.name,
                run_id = %completion.run_id,
                outcome = ?completion.outcome,
                "Run finished"
            ),
            // Replaced runs are already recorded as failed.
            Err(CronError::RunAlreadyCompleted { .. }) => {
                debug!(run_id = %completion.run_id, "Ignoring completion for finished run")
            }
            Err(e) => warn!(spec = %self.spec.name, "Dropping completion: {}", e),
        }
    }

    /// Run until `shutdown` flips. Wakes at the next tick or after
    /// `poll_interval`, whichever comes first.
    pub async fn run(
        mut self,
        poll_interval: Duration,
        mut completions: mpsc::UnboundedReceiver<RunCompletion>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(spec = %self.spec.name, schedule = %self.spec.schedule, policy = %self.spec.concurrency_policy, "Worker started");

        loop {
            let now = Utc::now();
            if let Err(e) = self.tick(now).await {
                error!(spec = %self.spec.name, "Evaluation failed: {}", e);
            }

            let wait = match next_tick_after(&self.spec, now) {
                Ok(Some(next)) => (next - now).to_std().unwrap_or(Duration::ZERO).min(poll_interval),
                _ => poll_interval,
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                Some(completion) = completions.recv() => self.apply_completion(completion).await,
                _ = shutdown.changed() => break,
            }
        }

        info!(spec = %self.spec.name, "Worker stopped");
    }

    async fn start_run(&mut self, scheduled_time: DateTime<Utc>, now: DateTime<Utc>) {
        let run_id = Uuid::new_v4();
        let run = match self.history.record_start(run_id, now) {
            Ok(run) => run.clone(),
            Err(e) => {
                error!(spec = %self.spec.name, "Failed to record run start: {}", e);
                return;
            }
        };

        if let Ok(mut table) = self.routes.write() {
            table.insert(run_id, self.spec.name.clone());
        }
        self.persist(&run, &[]).await;

        info!(spec = %self.spec.name, run_id = %run_id, tick = %scheduled_time, "Starting run");

        if let Err(e) = self.executor.launch(run_id, &self.spec, scheduled_time).await {
            // Not retried: the run counts for this tick and the next tick
            // evaluates afresh.
            error!(spec = %self.spec.name, run_id = %run_id, "Failed to launch run: {:#}", e);
            if let Err(e) = self.complete(run_id, RunOutcome::Failed, now).await {
                error!(spec = %self.spec.name, run_id = %run_id, "Failed to record launch failure: {}", e);
            }
        }
    }

    async fn terminate_run(&mut self, run_id: RunId, now: DateTime<Utc>) {
        info!(spec = %self.spec.name, run_id = %run_id, "Replacing active run");
        if let Err(e) = self.executor.terminate(run_id).await {
            warn!(spec = %self.spec.name, run_id = %run_id, "Terminate failed: {:#}", e);
        }
        if let Err(e) = self.complete(run_id, RunOutcome::Failed, now).await {
            warn!(spec = %self.spec.name, run_id = %run_id, "Failed to record termination: {}", e);
        }
    }

    async fn complete(
        &mut self,
        run_id: RunId,
        outcome: RunOutcome,
        finished_at: DateTime<Utc>,
    ) -> Result<(), CronError> {
        let evicted = self.history.record_completion(run_id, outcome, finished_at)?;

        if let Ok(mut table) = self.routes.write() {
            table.remove(&run_id);
        }
        for run in &evicted {
            debug!(spec = %self.spec.name, run_id = %run.id, status = %run.status, "Evicted from history");
        }

        // The completed run itself may have been evicted when the limit is 0.
        let updated = self.history.get(run_id).cloned();
        match updated {
            Some(run) => self.persist(&run, &evicted).await,
            None => self.forget(&evicted).await,
        }
        Ok(())
    }

    async fn persist(&self, run: &WorkflowRun, evicted: &[WorkflowRun]) {
        let Some(store) = self.store.clone() else {
            return;
        };
        let run = run.clone();
        let evicted: Vec<RunId> = evicted.iter().map(|r| r.id).collect();

        let result = tokio::task::spawn_blocking(move || -> Result<()> {
            store.upsert(&run)?;
            for id in evicted {
                store.delete(id)?;
            }
            Ok(())
        })
        .await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(spec = %self.spec.name, "Failed to persist run: {:#}", e),
            Err(e) => error!(spec = %self.spec.name, "Persist task panicked: {}", e),
        }
    }

    async fn forget(&self, evicted: &[WorkflowRun]) {
        let Some(store) = self.store.clone() else {
            return;
        };
        let evicted: Vec<RunId> = evicted.iter().map(|r| r.id).collect();

        let result = tokio::task::spawn_blocking(move || -> Result<()> {
            for id in evicted {
                store.delete(id)?;
            }
            Ok(())
        })
        .await;

        if let Ok(Err(e)) = result {
            error!(spec = %self.spec.name, "Failed to delete evicted runs: {:#}", e);
        }
    }
}

/// Rebuild a spec's history from the store. Runs left `Running` by a
/// previous process have lost their executor and are closed as failed.
fn load_history(spec: &CronScheduleSpec, store: Option<&SqliteRunStore>) -> Result<RunHistory> {
    let Some(store) = store else {
        return Ok(RunHistory::new(
            &spec.name,
            spec.successful_jobs_history_limit,
            spec.failed_jobs_history_limit,
        ));
    };

    let now = Utc::now();
    let mut runs = store
        .list_for_spec(&spec.name)
        .with_context(|| format!("Failed to load history for '{}'", spec.name))?;

    for run in runs.iter_mut().filter(|r| r.is_running()) {
        warn!(spec = %spec.name, run_id = %run.id, "Closing orphaned run as failed");
        run.status = RunStatus::Failed;
        run.finished_at = Some(now);
        store.upsert(run)?;
    }

    let (history, evicted) = RunHistory::restore(
        &spec.name,
        spec.successful_jobs_history_limit,
        spec.failed_jobs_history_limit,
        runs,
    );
    for run in evicted {
        store.delete(run.id)?;
    }
    Ok(history)
}

async fn route_completions(
    mut completions: mpsc::UnboundedReceiver<RunCompletion>,
    inboxes: HashMap<String, mpsc::UnboundedSender<RunCompletion>>,
    routes: RouteTable,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            maybe = completions.recv() => {
                let Some(completion) = maybe else { break };
                let owner = routes
                    .read()
                    .ok()
                    .and_then(|table| table.get(&completion.run_id).cloned());
                match owner.and_then(|name| inboxes.get(&name)) {
                    Some(inbox) => {
                        let _ = inbox.send(completion);
                    }
                    None => debug!(run_id = %completion.run_id, "No owner for completion"),
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

/// Running set of spec workers plus the completion router.
pub struct Controller {
    workers: Vec<JoinHandle<()>>,
    router: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl Controller {
    /// Validate every spec, restore history, and spawn one worker per spec.
    pub fn start(
        specs: Vec<CronScheduleSpec>,
        poll_interval: Duration,
        executor: Arc<dyn WorkflowExecutor>,
        store: Option<SqliteRunStore>,
        completions: mpsc::UnboundedReceiver<RunCompletion>,
    ) -> Result<Self> {
        let routes = RouteTable::default();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut inboxes = HashMap::new();
        let mut workers = Vec::with_capacity(specs.len());

        for spec in specs {
            spec.validate()?;
            let history = load_history(&spec, store.as_ref())?;
            let (tx, rx) = mpsc::unbounded_channel();
            inboxes.insert(spec.name.clone(), tx);

            let worker = SpecWorker::new(
                spec,
                history,
                Arc::clone(&executor),
                store.clone(),
                Arc::clone(&routes),
            );
            workers.push(tokio::spawn(worker.run(poll_interval, rx, shutdown_rx.clone())));
        }

        let router = tokio::spawn(route_completions(
            completions,
            inboxes,
            routes,
            shutdown_rx,
        ));

        info!(workers = workers.len(), "Controller started");
        Ok(Self {
            workers,
            router,
            shutdown: shutdown_tx,
        })
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        futures::future::join_all(self.workers).await;
        let _ = self.router.await;
        info!("Controller stopped");
    }
}
