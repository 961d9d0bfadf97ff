//! Persistence of workflow run records.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::params;
use uuid::Uuid;

use super::Pool;
use crate::scheduler::{RunId, WorkflowRun};

/// Run records keyed by run id. Writes are upserts, so recording a start
/// and later its completion touch the same row.
#[derive(Clone)]
pub struct SqliteRunStore {
    pool: Pool,
}

type RawRun = (String, String, String, String, Option<String>);

/// Fixed-width timestamps so `ORDER BY started_at` sorts chronologically.
fn format_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("bad timestamp '{}'", raw))?
        .with_timezone(&Utc))
}

fn into_run(raw: RawRun) -> Result<WorkflowRun> {
    let (id, spec_name, status, started_at, finished_at) = raw;
    Ok(WorkflowRun {
        id: Uuid::parse_str(&id).with_context(|| format!("bad run id '{}'", id))?,
        spec_name,
        status: status.parse()?,
        started_at: parse_time(&started_at)?,
        finished_at: finished_at.as_deref().map(parse_time).transpose()?,
    })
}

impl SqliteRunStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn upsert(&self, run: &WorkflowRun) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO workflow_runs (run_id, spec_name, status, started_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(run_id) DO UPDATE SET
                status = excluded.status,
                finished_at = excluded.finished_at,
                updated_at = datetime('now')",
            params![
                run.id.to_string(),
                run.spec_name,
                run.status.to_string(),
                format_time(run.started_at),
                run.finished_at.map(format_time),
            ],
        )
        .context("Failed to upsert workflow run")?;
        Ok(())
    }

    pub fn delete(&self, run_id: RunId) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "DELETE FROM workflow_runs WHERE run_id = ?1",
            params![run_id.to_string()],
        )?;
        Ok(())
    }

    /// All stored runs of one cron workflow, oldest first.
    pub fn list_for_spec(&self, spec_name: &str) -> Result<Vec<WorkflowRun>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT run_id, spec_name, status, started_at, finished_at
             FROM workflow_runs WHERE spec_name = ?1 ORDER BY started_at ASC",
        )?;

        let rows: Vec<RawRun> = stmt
            .query_map(params![spec_name], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
            })?
            .collect::<Result<_, _>>()?;

        rows.into_iter().map(into_run).collect()
    }
}
