use std::{fmt, str::FromStr};

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

const WEEKDAYS: [&str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];

/// Longest accepted interval: 100 years.
const MAX_INTERVAL_SECS: u64 = 100 * 365 * 86_400;

/// Defines when a job is triggered automatically.
///
/// Serialised as its textual form so API clients and the config file share
/// one syntax:
///
/// | Text                  | Variant    |
/// |-----------------------|------------|
/// | `manual`              | `Manual`   |
/// | `every 90s`, `@every 6h` | `Interval` |
/// | `daily 04:30`         | `Daily`    |
/// | `weekly sun 03:00`    | `Weekly`   |
/// | `0 */15 * * * *`      | `Cron`     |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Schedule {
    /// Never triggered by the scheduler loop.
    Manual,

    /// Run repeatedly with a fixed interval in seconds.
    Interval { every_secs: u64 },

    /// Run every day at the given hour and minute (UTC).
    Daily { hour: u8, minute: u8 },

    /// Run on a specific weekday (0 = Monday … 6 = Sunday) at the given time (UTC).
    Weekly { day: u8, hour: u8, minute: u8 },

    /// Cron expression, normalised to the 6/7-field form (seconds first).
    Cron { expression: String },
}

impl Schedule {
    pub fn is_manual(&self) -> bool {
        matches!(self, Schedule::Manual)
    }

    /// Compute the next UTC execution time strictly *after* `from`.
    ///
    /// Returns `None` for manual schedules and when the next time would fall
    /// outside the representable range.
    pub fn next_run(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Schedule::Manual => None,

            Schedule::Interval { every_secs } => {
                let secs = i64::try_from((*every_secs).max(1)).ok()?;
                from.checked_add_signed(Duration::try_seconds(secs)?)
            }

            Schedule::Daily { hour, minute } => {
                let candidate = at_time(from, 0, *hour, *minute)?;
                if candidate > from {
                    Some(candidate)
                } else {
                    // Today's window has passed, advance to tomorrow.
                    candidate.checked_add_signed(Duration::days(1))
                }
            }

            Schedule::Weekly { day, hour, minute } => {
                // ISO weekday numbering matches chrono's `num_days_from_monday`.
                let today = from.weekday().num_days_from_monday() as i64;
                let days_ahead = (*day as i64 - today).rem_euclid(7);
                let candidate = at_time(from, days_ahead, *hour, *minute)?;
                if candidate > from {
                    Some(candidate)
                } else {
                    candidate.checked_add_signed(Duration::days(7))
                }
            }

            Schedule::Cron { expression } => match cron::Schedule::from_str(expression) {
                Ok(schedule) => schedule.after(&from).next(),
                Err(e) => {
                    warn!(%expression, "cron expression no longer parses: {e}");
                    None
                }
            },
        }
    }
}

/// `from`'s date shifted by `days_ahead`, at HH:MM:00 UTC.
fn at_time(from: DateTime<Utc>, days_ahead: i64, hour: u8, minute: u8) -> Option<DateTime<Utc>> {
    let date = from.checked_add_signed(Duration::days(days_ahead))?.date_naive();
    let time = NaiveTime::from_hms_opt(hour as u32, minute as u32, 0)?;
    Utc.from_local_datetime(&date.and_time(time)).single()
}

impl FromStr for Schedule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        let lower = text.to_ascii_lowercase();

        if lower.is_empty() || lower == "manual" {
            return Ok(Schedule::Manual);
        }

        if let Some(rest) = lower
            .strip_prefix("@every")
            .or_else(|| lower.strip_prefix("every"))
        {
            let every_secs = parse_duration_secs(rest)?;
            return Ok(Schedule::Interval { every_secs });
        }

        if let Some(rest) = lower.strip_prefix("daily") {
            let (hour, minute) = parse_hh_mm(rest.trim())?;
            return Ok(Schedule::Daily { hour, minute });
        }

        if let Some(rest) = lower.strip_prefix("weekly") {
            let mut parts = rest.split_whitespace();
            let day_name = parts
                .next()
                .ok_or_else(|| "weekly schedule needs a weekday".to_string())?;
            let day = WEEKDAYS
                .iter()
                .position(|d| day_name.starts_with(d))
                .ok_or_else(|| format!("unknown weekday '{day_name}'"))?;
            let time = parts
                .next()
                .ok_or_else(|| "weekly schedule needs a time (HH:MM)".to_string())?;
            if parts.next().is_some() {
                return Err(format!("unexpected trailing input in '{text}'"));
            }
            let (hour, minute) = parse_hh_mm(time)?;
            return Ok(Schedule::Weekly {
                day: day as u8,
                hour,
                minute,
            });
        }

        parse_cron(text)
    }
}

impl TryFrom<String> for Schedule {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Schedule> for String {
    fn from(schedule: Schedule) -> Self {
        schedule.to_string()
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Manual => write!(f, "manual"),
            Schedule::Interval { every_secs } => {
                let secs = *every_secs;
                if secs % 86_400 == 0 {
                    write!(f, "every {}d", secs / 86_400)
                } else if secs % 3_600 == 0 {
                    write!(f, "every {}h", secs / 3_600)
                } else if secs % 60 == 0 {
                    write!(f, "every {}m", secs / 60)
                } else {
                    write!(f, "every {secs}s")
                }
            }
            Schedule::Daily { hour, minute } => write!(f, "daily {hour:02}:{minute:02}"),
            Schedule::Weekly { day, hour, minute } => {
                let name = WEEKDAYS.get(*day as usize).copied().unwrap_or("mon");
                write!(f, "weekly {name} {hour:02}:{minute:02}")
            }
            Schedule::Cron { expression } => write!(f, "{expression}"),
        }
    }
}

/// Parse `90s`, `15m`, `6h`, `1d` (whitespace tolerated) into seconds.
fn parse_duration_secs(input: &str) -> Result<u64, String> {
    let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    let split = compact
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(compact.len());
    let (digits, unit) = compact.split_at(split);

    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid interval '{}'", input.trim()))?;
    let multiplier = match unit {
        "" | "s" | "sec" | "secs" => 1,
        "m" | "min" | "mins" => 60,
        "h" | "hr" | "hrs" => 3_600,
        "d" | "day" | "days" => 86_400,
        other => return Err(format!("unknown interval unit '{other}'")),
    };
    if value == 0 {
        return Err("interval must be greater than zero".to_string());
    }
    value
        .checked_mul(multiplier)
        .filter(|secs| *secs <= MAX_INTERVAL_SECS)
        .ok_or_else(|| format!("interval '{}' is too large", input.trim()))
}

fn parse_hh_mm(input: &str) -> Result<(u8, u8), String> {
    let (h, m) = input
        .split_once(':')
        .ok_or_else(|| format!("expected HH:MM, got '{input}'"))?;
    let hour: u8 = h.parse().map_err(|_| format!("invalid hour '{h}'"))?;
    let minute: u8 = m.parse().map_err(|_| format!("invalid minute '{m}'"))?;
    if hour > 23 || minute > 59 {
        return Err(format!("time out of range: '{input}'"));
    }
    Ok((hour, minute))
}

/// Accept classic 5-field cron (seconds implied 0) or the 6/7-field form.
fn parse_cron(text: &str) -> Result<Schedule, String> {
    let fields = text.split_whitespace().count();
    let expression = match fields {
        5 => format!("0 {}", text.split_whitespace().collect::<Vec<_>>().join(" ")),
        6 | 7 => text.split_whitespace().collect::<Vec<_>>().join(" "),
        _ => return Err(format!("unrecognised schedule expression '{text}'")),
    };
    cron::Schedule::from_str(&expression)
        .map_err(|e| format!("invalid cron expression '{text}': {e}"))?;
    Ok(Schedule::Cron { expression })
}
