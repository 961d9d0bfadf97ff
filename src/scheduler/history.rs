//! Run records for a cron workflow and their retention.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::CronError;

pub type RunId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "Running"),
            RunStatus::Succeeded => write!(f, "Succeeded"),
            RunStatus::Failed => write!(f, "Failed"),
        }
    }
}

impl FromStr for RunStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Running" => Ok(RunStatus::Running),
            "Succeeded" => Ok(RunStatus::Succeeded),
            "Failed" => Ok(RunStatus::Failed),
            other => anyhow::bail!("unknown run status '{}'", other),
        }
    }
}

/// Terminal outcome reported by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    Succeeded,
    Failed,
}

impl From<RunOutcome> for RunStatus {
    fn from(outcome: RunOutcome) -> Self {
        match outcome {
            RunOutcome::Succeeded => RunStatus::Succeeded,
            RunOutcome::Failed => RunStatus::Failed,
        }
    }
}

/// One launch of a workflow template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRun {
    pub id: RunId,
    /// Name of the owning cron workflow.
    pub spec_name: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl WorkflowRun {
    pub fn is_running(&self) -> bool {
        self.status == RunStatus::Running
    }
}

/// Runs for a single cron workflow, ordered by start time.
///
/// Completed runs are kept up to a per-outcome limit; when a class overflows
/// its oldest entries are evicted. Running runs are never evicted.
#[derive(Debug, Clone)]
pub struct RunHistory {
    spec_name: String,
    successful_limit: usize,
    failed_limit: usize,
    runs: Vec<WorkflowRun>,
    /// Newest start ever recorded, kept even after that run is evicted.
    last_started: Option<DateTime<Utc>>,
}

impl RunHistory {
    pub fn new(spec_name: impl Into<String>, successful_limit: usize, failed_limit: usize) -> Self {
        Self {
            spec_name: spec_name.into(),
            successful_limit,
            failed_limit,
            runs: Vec::new(),
            last_started: None,
        }
    }

    /// Rebuild a history from previously stored records. Returns the history
    /// and whatever had to be evicted to respect the limits.
    pub fn restore(
        spec_name: impl Into<String>,
        successful_limit: usize,
        failed_limit: usize,
        mut runs: Vec<WorkflowRun>,
    ) -> (Self, Vec<WorkflowRun>) {
        runs.sort_by_key(|r| r.started_at);
        let last_started = runs.last().map(|r| r.started_at);
        let mut history = Self {
            spec_name: spec_name.into(),
            successful_limit,
            failed_limit,
            runs,
            last_started,
        };
        let mut evicted = history.trim(RunStatus::Succeeded);
        evicted.extend(history.trim(RunStatus::Failed));
        (history, evicted)
    }

    pub fn spec_name(&self) -> &str {
        &self.spec_name
    }

    pub fn runs(&self) -> &[WorkflowRun] {
        &self.runs
    }

    /// Start time of the newest run recorded, whether or not it is still
    /// retained.
    pub fn last_started(&self) -> Option<DateTime<Utc>> {
        self.last_started
    }

    pub fn get(&self, run_id: RunId) -> Option<&WorkflowRun> {
        self.runs.iter().find(|r| r.id == run_id)
    }

    pub fn running(&self) -> impl Iterator<Item = &WorkflowRun> {
        self.runs.iter().filter(|r| r.is_running())
    }

    pub fn count(&self, status: RunStatus) -> usize {
        self.runs.iter().filter(|r| r.status == status).count()
    }

    /// Record a freshly launched run as `Running`.
    pub fn record_start(
        &mut self,
        run_id: RunId,
        started_at: DateTime<Utc>,
    ) -> Result<&WorkflowRun, CronError> {
        if self.get(run_id).is_some() {
            return Err(CronError::DuplicateRun { run_id });
        }

        let run = WorkflowRun {
            id: run_id,
            spec_name: self.spec_name.clone(),
            status: RunStatus::Running,
            started_at,
            finished_at: None,
        };
        self.last_started = self.last_started.max(Some(started_at));
        let pos = self.runs.partition_point(|r| r.started_at <= started_at);
        self.runs.insert(pos, run);
        Ok(&self.runs[pos])
    }

    /// Move a running run to its terminal status, then evict the oldest
    /// runs of that outcome beyond the limit. Returns the evicted runs.
    pub fn record_completion(
        &mut self,
        run_id: RunId,
        outcome: RunOutcome,
        finished_at: DateTime<Utc>,
    ) -> Result<Vec<WorkflowRun>, CronError> {
        let run = self
            .runs
            .iter_mut()
            .find(|r| r.id == run_id)
            .ok_or(CronError::UnknownRun { run_id })?;

        if !run.is_running() {
            return Err(CronError::RunAlreadyCompleted {
                run_id,
                status: run.status,
            });
        }

        let status = RunStatus::from(outcome);
        run.status = status;
        run.finished_at = Some(finished_at);

        Ok(self.trim(status))
    }

    fn trim(&mut self, status: RunStatus) -> Vec<WorkflowRun> {
        let limit = match status {
            RunStatus::Succeeded => self.successful_limit,
            RunStatus::Failed => self.failed_limit,
            RunStatus::Running => return Vec::new(),
        };

        let excess = self.count(status).saturating_sub(limit);
        if excess == 0 {
            return Vec::new();
        }

        let mut evicted = Vec::with_capacity(excess);
        let mut kept = Vec::with_capacity(self.runs.len() - excess);
        for run in self.runs.drain(..) {
            if run.status == status && evicted.len() < excess {
                evicted.push(run);
            } else {
                kept.push(run);
            }
        }
        self.runs = kept;
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap()
    }

    fn complete_n(
        history: &mut RunHistory,
        first_minute: i64,
        n: usize,
        outcome: RunOutcome,
    ) -> Vec<RunId> {
        let mut ids = Vec::new();
        for i in 0..n as i64 {
            let id = Uuid::new_v4();
            let start = t0() + Duration::minutes(first_minute + i);
            history.record_start(id, start).unwrap();
            history
                .record_completion(id, outcome, start + Duration::seconds(10))
                .unwrap();
            ids.push(id);
        }
        ids
    }

    #[test]
    fn test_keeps_four_most_recent_successes() {
        let mut history = RunHistory::new("nightly", 4, 1);
        let ids = complete_n(&mut history, 0, 5, RunOutcome::Succeeded);

        assert_eq!(history.count(RunStatus::Succeeded), 4);
        let kept: Vec<RunId> = history.runs().iter().map(|r| r.id).collect();
        assert_eq!(kept, ids[1..].to_vec());
    }

    #[test]
    fn test_eviction_returns_oldest() {
        let mut history = RunHistory::new("nightly", 1, 1);
        let id_a = Uuid::new_v4();
        let id_b = Uuid::new_v4();
        history.record_start(id_a, t0()).unwrap();
        history.record_start(id_b, t0() + Duration::minutes(1)).unwrap();

        let evicted = history
            .record_completion(id_a, RunOutcome::Succeeded, t0() + Duration::minutes(2))
            .unwrap();
        assert!(evicted.is_empty());

        let evicted = history
            .record_completion(id_b, RunOutcome::Succeeded, t0() + Duration::minutes(3))
            .unwrap();
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].id, id_a);
    }

    #[test]
    fn test_limits_are_per_outcome() {
        let mut history = RunHistory::new("mixed", 2, 1);
        complete_n(&mut history, 0, 3, RunOutcome::Succeeded);
        complete_n(&mut history, 3, 3, RunOutcome::Failed);

        assert_eq!(history.count(RunStatus::Succeeded), 2);
        assert_eq!(history.count(RunStatus::Failed), 1);
    }

    #[test]
    fn test_running_runs_are_never_evicted() {
        let mut history = RunHistory::new("busy", 0, 0);
        let running = Uuid::new_v4();
        history.record_start(running, t0()).unwrap();
        complete_n(&mut history, 1, 2, RunOutcome::Failed);

        assert_eq!(history.runs().len(), 1);
        assert_eq!(history.runs()[0].id, running);
    }

    #[test]
    fn test_runs_stay_ordered_by_start() {
        let mut history = RunHistory::new("ordered", 3, 3);
        let late = Uuid::new_v4();
        let early = Uuid::new_v4();
        history.record_start(late, t0() + Duration::minutes(5)).unwrap();
        history.record_start(early, t0()).unwrap();

        assert_eq!(history.runs()[0].id, early);
        assert_eq!(history.runs()[1].id, late);
    }

    #[test]
    fn test_duplicate_and_unknown_runs_are_rejected() {
        let mut history = RunHistory::new("strict", 3, 1);
        let id = Uuid::new_v4();
        history.record_start(id, t0()).unwrap();
        assert_eq!(
            history.record_start(id, t0()).unwrap_err(),
            CronError::DuplicateRun { run_id: id }
        );

        let stranger = Uuid::new_v4();
        assert_eq!(
            history
                .record_completion(stranger, RunOutcome::Failed, t0())
                .unwrap_err(),
            CronError::UnknownRun { run_id: stranger }
        );
    }

    #[test]
    fn test_completion_is_not_repeatable() {
        let mut history = RunHistory::new("once", 3, 1);
        let id = Uuid::new_v4();
        history.record_start(id, t0()).unwrap();
        history.record_completion(id, RunOutcome::Failed, t0()).unwrap();

        let err = history
            .record_completion(id, RunOutcome::Succeeded, t0())
            .unwrap_err();
        assert_eq!(
            err,
            CronError::RunAlreadyCompleted {
                run_id: id,
                status: RunStatus::Failed
            }
        );
        assert_eq!(history.get(id).unwrap().status, RunStatus::Failed);
    }

    #[test]
    fn test_restore_sorts_and_trims() {
        let mk = |minute: i64, status: RunStatus| WorkflowRun {
            id: Uuid::new_v4(),
            spec_name: "restored".to_string(),
            status,
            started_at: t0() + Duration::minutes(minute),
            finished_at: None,
        };
        let stored = vec![
            mk(3, RunStatus::Succeeded),
            mk(1, RunStatus::Succeeded),
            mk(2, RunStatus::Succeeded),
            mk(4, RunStatus::Running),
        ];
        let oldest = stored[1].id;

        let (history, evicted) = RunHistory::restore("restored", 2, 1, stored);
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].id, oldest);
        assert_eq!(history.runs().len(), 3);
        assert!(history
            .runs()
            .windows(2)
            .all(|w| w[0].started_at <= w[1].started_at));
        assert_eq!(history.last_started(), Some(t0() + Duration::minutes(4)));
    }

    #[test]
    fn test_last_started_survives_eviction() {
        let mut history = RunHistory::new("zero", 0, 0);
        assert_eq!(history.last_started(), None);

        let id = Uuid::new_v4();
        history.record_start(id, t0()).unwrap();
        let evicted = history
            .record_completion(id, RunOutcome::Succeeded, t0() + Duration::seconds(5))
            .unwrap();

        assert_eq!(evicted.len(), 1);
        assert!(history.runs().is_empty());
        assert_eq!(history.last_started(), Some(t0()));
    }

    #[test]
    fn test_status_roundtrips_through_text() {
        for status in [RunStatus::Running, RunStatus::Succeeded, RunStatus::Failed] {
            assert_eq!(status.to_string().parse::<RunStatus>().unwrap(), status);
        }
        assert!("Pending".parse::<RunStatus>().is_err());
    }
}
