//! Cadence evaluation for scheduled archives
//!
//! Accepts standard five-field expressions (`minute hour day-of-month month
//! day-of-week`, with `0` and `7` both meaning Sunday) as well as six or
//! seven field expressions carrying a seconds column. Evaluation is done by
//! the `cron` crate; five-field input is translated to its syntax first.

use site_archiver_core::*;
use cron::Schedule;
use std::str::FromStr;

/// Weekly, Sunday at midnight
pub const DEFAULT_CADENCE: &str = "0 0 * * 0";

const DAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// A parsed cadence expression
#[derive(Debug, Clone)]
pub struct Cadence {
    expression: String,
    schedule: Schedule,
}

impl Cadence {
    pub fn parse(expression: &str) -> Result<Self> {
        let invalid = |reason: String| ValidationError::InvalidCadence {
            expression: expression.to_string(),
            reason,
        };

        let translated = to_cron_syntax(expression).map_err(invalid)?;
        let schedule = Schedule::from_str(&translated).map_err(|e| invalid(e.to_string()))?;

        if schedule.upcoming(Utc).next().is_none() {
            return Err(invalid("expression never fires".to_string()).into());
        }

        Ok(Self {
            expression: expression.trim().to_string(),
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First occurrence strictly after `after`
    pub fn next_occurrence(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }
}

/// Parse `expression` and return its first occurrence strictly after `after`
pub fn next_occurrence(expression: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
    Cadence::parse(expression)?.next_occurrence(after).ok_or_else(|| {
        ValidationError::InvalidCadence {
            expression: expression.to_string(),
            reason: format!("no occurrence after {}", after),
        }
        .into()
    })
}

fn to_cron_syntax(expression: &str) -> std::result::Result<String, String> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    match fields.len() {
        5 => {
            let day_of_week = translate_day_of_week(fields[4])?;
            Ok(format!(
                "0 {} {} {} {} {}",
                fields[0], fields[1], fields[2], fields[3], day_of_week
            ))
        }
        6 | 7 => Ok(fields.join(" ")),
        n => Err(format!("expected 5, 6 or 7 fields, found {}", n)),
    }
}

/// Rewrite a numeric day-of-week field (0-7, Sunday = 0 or 7) as day names
fn translate_day_of_week(field: &str) -> std::result::Result<String, String> {
    if field == "*" || field == "?" {
        return Ok(field.to_string());
    }

    let mut days = [false; 7];
    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: usize = step
                    .parse()
                    .map_err(|_| format!("invalid day-of-week step '{}'", step))?;
                if step == 0 {
                    return Err("day-of-week step must be positive".to_string());
                }
                (range, Some(step))
            }
            None => (item, None),
        };

        let (low, high) = if range == "*" {
            (0, 6)
        } else if let Some((a, b)) = range.split_once('-') {
            (parse_day(a)?, parse_day(b)?)
        } else {
            let day = parse_day(range)?;
            if step.is_some() {
                (day, 6)
            } else {
                (day, day)
            }
        };

        if low > high {
            return Err(format!("invalid day-of-week range '{}'", range));
        }
        for day in (low..=high).step_by(step.unwrap_or(1)) {
            days[day % 7] = true;
        }
    }

    let names: Vec<&str> = DAY_NAMES
        .iter()
        .zip(days.iter())
        .filter(|(_, selected)| **selected)
        .map(|(name, _)| *name)
        .collect();
    Ok(names.join(","))
}

fn parse_day(value: &str) -> std::result::Result<usize, String> {
    if let Ok(day) = value.parse::<usize>() {
        return if day <= 7 {
            Ok(day)
        } else {
            Err(format!("day-of-week {} out of range", day))
        };
    }
    DAY_NAMES
        .iter()
        .position(|name| name.eq_ignore_ascii_case(value))
        .ok_or_else(|| format!("invalid day-of-week '{}'", value))
}
