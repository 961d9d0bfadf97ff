//! Cron expression parsing and tick arithmetic.

use std::str::FromStr;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use cron::Schedule;

use super::spec::CronScheduleSpec;
use super::CronError;

/// The `cron` crate wants a leading seconds field; standard 5-field
/// expressions get `0` prepended so they fire on the minute.
pub fn normalize_expression(expr: &str) -> String {
    let fields = expr.split_whitespace().count();
    if fields == 5 {
        format!("0 {}", expr.trim())
    } else {
        expr.trim().to_string()
    }
}

/// Parse a 5, 6 or 7 field cron expression.
pub fn parse_schedule(expr: &str) -> Result<Schedule, CronError> {
    let fields = expr.split_whitespace().count();
    if !(5..=7).contains(&fields) {
        return Err(CronError::InvalidScheduleExpression {
            expression: expr.to_string(),
            reason: format!("expected 5 to 7 fields, got {}", fields),
        });
    }
    Schedule::from_str(&normalize_expression(expr)).map_err(|e| {
        CronError::InvalidScheduleExpression {
            expression: expr.to_string(),
            reason: e.to_string(),
        }
    })
}

/// Most recent tick at or before `now`, at second precision.
pub fn most_recent_tick(schedule: &Schedule, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let now = now.trunc_subsecs(0);
    // `after(t).next_back()` walks strictly backwards from `t`.
    schedule.after(&(now + Duration::seconds(1))).next_back()
}

/// First tick strictly after `after`.
pub fn next_tick_after(
    spec: &CronScheduleSpec,
    after: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, CronError> {
    let schedule = parse_schedule(&spec.schedule)?;
    Ok(schedule.after(&after).next())
}

/// Every tick in `(from, until]`.
pub fn upcoming(
    spec: &CronScheduleSpec,
    from: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Result<Vec<DateTime<Utc>>, CronError> {
    let schedule = parse_schedule(&spec.schedule)?;
    Ok(schedule.after(&from).take_while(|t| *t <= until).collect())
}

/// Dry-run preview of what fires in the next `hours` across all specs,
/// sorted by time. Suspended specs are left out.
pub fn preview_next_runs(
    specs: &[CronScheduleSpec],
    now: DateTime<Utc>,
    hours: u64,
) -> Result<Vec<(DateTime<Utc>, String)>, CronError> {
    let end = now + Duration::hours(hours as i64);
    let mut preview = Vec::new();

    for spec in specs.iter().filter(|s| !s.suspend) {
        for next_time in upcoming(spec, now, end)? {
            preview.push((next_time, spec.name.clone()));
        }
    }

    preview.sort();
    Ok(preview)
}
