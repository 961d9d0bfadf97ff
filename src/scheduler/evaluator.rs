//! Per-tick decision function for cron-triggered workflows.
//!
//! [`evaluate`] is pure: it reads the spec, the supplied `now`, and the runs
//! already known for the spec, and returns an [`Action`]. Launching and
//! terminating runs is left to the caller.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use super::cron::{most_recent_tick, parse_schedule};
use super::history::{RunId, RunStatus, WorkflowRun};
use super::spec::{ConcurrencyPolicy, CronScheduleSpec};
use super::CronError;

/// Why a tick was not acted upon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// Evaluated later than `startingDeadlineSeconds` after the tick.
    MissedDeadline,
    /// `Forbid` policy and a previous run is still running.
    ConcurrencyForbidden,
    /// The spec is suspended.
    Suspended,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::MissedDeadline => write!(f, "MissedDeadline"),
            SkipReason::ConcurrencyForbidden => write!(f, "ConcurrencyForbidden"),
            SkipReason::Suspended => write!(f, "Suspended"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all_fields = "camelCase")]
pub enum Action {
    StartNewRun {
        scheduled_time: DateTime<Utc>,
    },
    SkipTick {
        scheduled_time: DateTime<Utc>,
        reason: SkipReason,
    },
    /// Terminate every listed run, then start a new one.
    TerminateThenStart {
        scheduled_time: DateTime<Utc>,
        terminate: Vec<RunId>,
    },
    NoAction,
}

impl Action {
    /// The tick this action was decided for, if any.
    pub fn scheduled_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Action::StartNewRun { scheduled_time }
            | Action::SkipTick { scheduled_time, .. }
            | Action::TerminateThenStart { scheduled_time, .. } => Some(*scheduled_time),
            Action::NoAction => None,
        }
    }

    pub fn starts_run(&self) -> bool {
        matches!(
            self,
            Action::StartNewRun { .. } | Action::TerminateThenStart { .. }
        )
    }
}

/// Decide what to do for the most recent tick at or before `now`.
///
/// A run belongs to the current tick when it started at or after the tick's
/// scheduled time; such a run makes re-evaluation a no-op. Lateness against
/// the starting deadline is measured in whole seconds.
pub fn evaluate(
    spec: &CronScheduleSpec,
    now: DateTime<Utc>,
    runs: &[WorkflowRun],
) -> Result<Action, CronError> {
    let schedule = parse_schedule(&spec.schedule)?;

    let Some(tick) = most_recent_tick(&schedule, now) else {
        return Ok(Action::NoAction);
    };

    if runs.iter().any(|r| r.started_at >= tick) {
        return Ok(Action::NoAction);
    }

    if spec.suspend {
        return Ok(Action::SkipTick {
            scheduled_time: tick,
            reason: SkipReason::Suspended,
        });
    }

    if let Some(deadline) = spec.starting_deadline_seconds {
        if now.trunc_subsecs(0) - tick > Duration::seconds(deadline as i64) {
            return Ok(Action::SkipTick {
                scheduled_time: tick,
                reason: SkipReason::MissedDeadline,
            });
        }
    }

    let running: Vec<RunId> = runs
        .iter()
        .filter(|r| r.status == RunStatus::Running)
        .map(|r| r.id)
        .collect();

    let action = match spec.concurrency_policy {
        ConcurrencyPolicy::Allow => Action::StartNewRun {
            scheduled_time: tick,
        },
        ConcurrencyPolicy::Forbid if !running.is_empty() => Action::SkipTick {
            scheduled_time: tick,
            reason: SkipReason::ConcurrencyForbidden,
        },
        ConcurrencyPolicy::Replace if !running.is_empty() => Action::TerminateThenStart {
            scheduled_time: tick,
            terminate: running,
        },
        ConcurrencyPolicy::Forbid | ConcurrencyPolicy::Replace => Action::StartNewRun {
            scheduled_time: tick,
        },
    };

    Ok(action)
}
