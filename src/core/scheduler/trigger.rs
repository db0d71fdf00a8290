use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::SchedulerError;

/// Engine-native cron trigger arguments, one string per field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronArgs {
    pub month: String,
    pub day: String,
    pub week: String,
    pub day_of_week: String,
    pub hour: String,
    pub minute: String,
    pub second: String,
}

/// Splits a 5-field `minute hour day month day_of_week` pattern.
pub fn parse_cron_pattern(pattern: &str) -> Result<CronArgs, SchedulerError> {
    let fields: Vec<&str> = pattern.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(SchedulerError::InvalidCron {
            pattern: pattern.to_string(),
            reason: format!(
                "expected 5 fields (minute hour day month day_of_week), got {}",
                fields.len()
            ),
        });
    }
    let args = CronArgs {
        month: fields[3].to_string(),
        day: fields[2].to_string(),
        week: "*".to_string(),
        day_of_week: fields[4].to_string(),
        hour: fields[1].to_string(),
        minute: fields[0].to_string(),
        second: "0".to_string(),
    };
    args.schedule().map_err(|reason| SchedulerError::InvalidCron {
        pattern: pattern.to_string(),
        reason,
    })?;
    Ok(args)
}

const WEEKDAYS: [&str; 8] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];

fn weekday_token(token: &str) -> String {
    match token.parse::<usize>() {
        Ok(n) if n < WEEKDAYS.len() => WEEKDAYS[n].to_string(),
        _ => token.to_string(),
    }
}

/// `n-7` wraps past Saturday, which the engine reads as a backwards range.
/// Numeric ranges ending at 7 are spelled out day by day instead.
fn sunday_ended_range(from: &str, step: Option<&str>) -> Option<String> {
    let from: usize = from.parse().ok()?;
    let step: usize = match step {
        Some(step) => step.parse().ok().filter(|step| *step > 0)?,
        None => 1,
    };
    if from > 7 {
        return None;
    }
    let mut days: Vec<&str> = Vec::new();
    for n in (from..=7).step_by(step) {
        if !days.contains(&WEEKDAYS[n]) {
            days.push(WEEKDAYS[n]);
        }
    }
    Some(days.join(","))
}

/// Numeric weekdays (0 and 7 are Sunday) become names so the engine cannot
/// misread them under a different numbering.
fn translate_day_of_week(field: &str) -> String {
    field
        .split(',')
        .map(|part| {
            let (range, step) = match part.split_once('/') {
                Some((range, step)) => (range, Some(step)),
                None => (part, None),
            };
            if let Some((from, "7")) = range.split_once('-')
                && let Some(days) = sunday_ended_range(from, step)
            {
                return days;
            }
            let range = match range.split_once('-') {
                Some((from, to)) => format!("{}-{}", weekday_token(from), weekday_token(to)),
                None => weekday_token(range),
            };
            match step {
                Some(step) => format!("{}/{}", range, step),
                None => range,
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

impl CronArgs {
    /// Six-field, seconds-first expression understood by the execution engine.
    pub fn engine_expression(&self) -> String {
        format!(
            "{} {} {} {} {} {}",
            self.second,
            self.minute,
            self.hour,
            self.day,
            self.month,
            translate_day_of_week(&self.day_of_week)
        )
    }

    pub fn schedule(&self) -> Result<::cron::Schedule, String> {
        ::cron::Schedule::from_str(&self.engine_expression()).map_err(|e| e.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalArgs {
    #[serde(default)]
    pub weeks: u64,
    #[serde(default)]
    pub days: u64,
    #[serde(default)]
    pub hours: u64,
    #[serde(default)]
    pub minutes: u64,
    #[serde(default)]
    pub seconds: u64,
}

/// Longest accepted interval, one century.
pub const MAX_INTERVAL_SECS: u64 = 100 * 365 * 86_400;

impl IntervalArgs {
    /// `None` when the fields overflow a `u64` of seconds.
    pub fn total_seconds(&self) -> Option<u64> {
        self.weeks
            .checked_mul(7 * 86_400)?
            .checked_add(self.days.checked_mul(86_400)?)?
            .checked_add(self.hours.checked_mul(3_600)?)?
            .checked_add(self.minutes.checked_mul(60)?)?
            .checked_add(self.seconds)
    }

    /// Returns the period the engine repeats the job at.
    pub fn validate(&self) -> Result<Duration, SchedulerError> {
        match self.total_seconds() {
            Some(0) => Err(SchedulerError::InvalidInterval(
                "interval must be at least one second".into(),
            )),
            Some(total) if total <= MAX_INTERVAL_SECS => Ok(Duration::from_secs(total)),
            _ => Err(SchedulerError::InvalidInterval(
                "interval must not exceed 100 years".into(),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerArgs {
    Cron(CronArgs),
    Interval(IntervalArgs),
}

impl TriggerArgs {
    pub fn kind(&self) -> &'static str {
        match self {
            TriggerArgs::Cron(_) => "cron",
            TriggerArgs::Interval(_) => "interval",
        }
    }

    pub fn next_fire_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            TriggerArgs::Cron(args) => args.schedule().ok()?.after(&after).next(),
            TriggerArgs::Interval(args) => {
                let secs = i64::try_from(args.total_seconds()?).ok()?;
                after.checked_add_signed(ChronoDuration::try_seconds(secs)?)
            }
        }
    }
}

impl fmt::Display for TriggerArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerArgs::Cron(args) => write!(
                f,
                "cron[month='{}', day='{}', day_of_week='{}', hour='{}', minute='{}', second='{}']",
                args.month, args.day, args.day_of_week, args.hour, args.minute, args.second
            ),
            TriggerArgs::Interval(args) => {
                let Some(total) = args.total_seconds() else {
                    return write!(f, "interval[overflow]");
                };
                let days = total / 86_400;
                let rest = total % 86_400;
                let clock = format!("{}:{:02}:{:02}", rest / 3_600, (rest % 3_600) / 60, rest % 60);
                match days {
                    0 => write!(f, "interval[{}]", clock),
                    1 => write!(f, "interval[1 day, {}]", clock),
                    n => write!(f, "interval[{} days, {}]", n, clock),
                }
            }
        }
    }
}
