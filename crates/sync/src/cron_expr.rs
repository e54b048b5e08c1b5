//! Five-field cron expressions and next-occurrence computation.

use std::{collections::BTreeSet, fmt, str::FromStr};

use {
    chrono::{DateTime, Utc},
    chrono_tz::Tz,
    cron::Schedule,
};

use crate::{Error, Result};

/// A validated `minute hour day-of-month month day-of-week` expression.
///
/// Day-of-week follows POSIX numbering (0 and 7 are Sunday). Evaluation is
/// delegated to the `cron` crate, which wants seconds and year fields and
/// numbers weekdays from 1 (Sunday), so the expression is translated once at
/// parse time.
#[derive(Clone)]
pub struct CronExpression {
    source: String,
    schedule: Schedule,
}

impl CronExpression {
    pub fn parse(expr: &str) -> Result<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(Error::invalid_cron(
                expr,
                format!(
                    "expected 5 fields (minute hour day month weekday), got {}",
                    fields.len()
                ),
            ));
        }

        let weekday =
            translate_weekday(fields[4]).map_err(|reason| Error::invalid_cron(expr, reason))?;
        let padded = format!(
            "0 {} {} {} {} {weekday} *",
            fields[0], fields[1], fields[2], fields[3]
        );
        let schedule = Schedule::from_str(&padded)
            .map_err(|e| Error::invalid_cron(expr, e.to_string()))?;

        Ok(Self {
            source: fields.join(" "),
            schedule,
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// First occurrence strictly after `after`, evaluated in `tz` (UTC when `None`).
    #[must_use]
    pub fn next_after(&self, after: DateTime<Utc>, tz: Option<Tz>) -> Option<DateTime<Utc>> {
        self.upcoming(after, tz, 1).into_iter().next()
    }

    /// The next `count` occurrences after `after`.
    #[must_use]
    pub fn upcoming(&self, after: DateTime<Utc>, tz: Option<Tz>, count: usize) -> Vec<DateTime<Utc>> {
        match tz {
            Some(tz) => self
                .schedule
                .after(&after.with_timezone(&tz))
                .take(count)
                .map(|dt| dt.with_timezone(&Utc))
                .collect(),
            None => self.schedule.after(&after).take(count).collect(),
        }
    }

    /// Next occurrence as epoch millis, for the advisory `nextRun` field.
    #[must_use]
    pub fn next_run_ms(&self, now_ms: u64, tz: Option<Tz>) -> Option<u64> {
        let now = DateTime::from_timestamp_millis(now_ms as i64)?;
        self.next_after(now, tz)
            .map(|dt| dt.timestamp_millis().max(0) as u64)
    }
}

impl fmt::Debug for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CronExpression").field(&self.source).finish()
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl FromStr for CronExpression {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Parse an IANA timezone name.
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| Error::unknown_timezone(name))
}

/// Rewrite a POSIX weekday field into the `cron` crate's numbering.
///
/// Numeric items are expanded into an explicit list so that `7`, ranges
/// ending in `7` and stepped ranges keep their POSIX meaning. `*`, `*/n` and
/// named days pass through unchanged.
fn translate_weekday(field: &str) -> std::result::Result<String, String> {
    let mut out: Vec<String> = Vec::new();
    let mut numeric: BTreeSet<u32> = BTreeSet::new();

    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((r, s)) => {
                let step: u32 = s
                    .parse()
                    .map_err(|_| format!("invalid weekday step: {s}"))?;
                if step == 0 {
                    return Err("weekday step must be > 0".into());
                }
                (r, Some(step))
            },
            None => (item, None),
        };

        if range == "*" || range.chars().any(|c| c.is_ascii_alphabetic()) {
            out.push(item.to_string());
            continue;
        }

        let (start, end) = match range.split_once('-') {
            Some((a, b)) => (parse_weekday(a)?, parse_weekday(b)?),
            None => {
                let start = parse_weekday(range)?;
                // `a/n` runs to the end of the week.
                (start, if step.is_some() { 6 } else { start })
            },
        };
        if start > end {
            return Err(format!("weekday range {start}-{end} is reversed"));
        }

        let step = step.unwrap_or(1) as usize;
        for day in (start..=end).step_by(step) {
            numeric.insert(day % 7 + 1);
        }
    }

    out.extend(numeric.into_iter().map(|d| d.to_string()));
    if out.is_empty() {
        return Err("empty weekday field".into());
    }
    Ok(out.join(","))
}

fn parse_weekday(s: &str) -> std::result::Result<u32, String> {
    let day: u32 = s.parse().map_err(|_| format!("invalid weekday: {s}"))?;
    if day > 7 {
        return Err(format!("weekday out of range (0-7): {day}"));
    }
    Ok(day)
}
