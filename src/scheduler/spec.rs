//! CronWorkflow configuration: schedule, concurrency policy, deadlines and
//! history limits.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::cron::parse_schedule;
use super::CronError;

/// How a new tick reconciles against runs that are still active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum ConcurrencyPolicy {
    /// Any number of runs may be active at once.
    Allow,
    /// Skip the tick while a previous run is still active.
    Forbid,
    /// Terminate active runs, then start the new one.
    Replace,
}

impl FromStr for ConcurrencyPolicy {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Allow" => Ok(Self::Allow),
            "Forbid" => Ok(Self::Forbid),
            "Replace" => Ok(Self::Replace),
            other => Err(CronError::InvalidPolicy {
                value: other.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for ConcurrencyPolicy {
    type Error = CronError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl std::fmt::Display for ConcurrencyPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConcurrencyPolicy::Allow => write!(f, "Allow"),
            ConcurrencyPolicy::Forbid => write!(f, "Forbid"),
            ConcurrencyPolicy::Replace => write!(f, "Replace"),
        }
    }
}

fn default_successful_limit() -> usize {
    3
}

fn default_failed_limit() -> usize {
    1
}

/// A single cron-triggered workflow definition.
///
/// `starting_deadline_seconds` distinguishes "no deadline" (`None`) from a
/// zero-second tolerance (`Some(0)`), where any lateness skips the tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronScheduleSpec {
    pub name: String,
    pub schedule: String,
    pub concurrency_policy: ConcurrencyPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starting_deadline_seconds: Option<u64>,
    #[serde(default = "default_successful_limit")]
    pub successful_jobs_history_limit: usize,
    #[serde(default = "default_failed_limit")]
    pub failed_jobs_history_limit: usize,
    #[serde(default)]
    pub suspend: bool,
    /// Opaque payload handed to the executor when a run is launched.
    #[serde(default)]
    pub workflow_template: serde_json::Value,
}

impl CronScheduleSpec {
    pub fn new(
        name: impl Into<String>,
        schedule: impl Into<String>,
        concurrency_policy: ConcurrencyPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            schedule: schedule.into(),
            concurrency_policy,
            starting_deadline_seconds: None,
            successful_jobs_history_limit: default_successful_limit(),
            failed_jobs_history_limit: default_failed_limit(),
            suspend: false,
            workflow_template: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn with_starting_deadline(mut self, seconds: u64) -> Self {
        self.starting_deadline_seconds = Some(seconds);
        self
    }

    #[must_use]
    pub fn with_history_limits(mut self, successful: usize, failed: usize) -> Self {
        self.successful_jobs_history_limit = successful;
        self.failed_jobs_history_limit = failed;
        self
    }

    #[must_use]
    pub fn with_template(mut self, template: serde_json::Value) -> Self {
        self.workflow_template = template;
        self
    }

    /// Check everything that can be checked without a clock: the name is
    /// usable and the schedule parses.
    pub fn validate(&self) -> Result<(), CronError> {
        if self.name.trim().is_empty() {
            return Err(CronError::InvalidSpec {
                name: self.name.clone(),
                reason: "name must not be empty".to_string(),
            });
        }
        parse_schedule(&self.schedule)?;
        Ok(())
    }
}
