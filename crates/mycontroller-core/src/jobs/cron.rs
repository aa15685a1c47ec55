// ── Cron expressions ──
//
// Six fields, seconds first: `sec min hour day-of-month month day-of-week`.
// Each field accepts `*`, `?`, numbers, ranges `a-b`, steps `*/n` or
// `a-b/n`, and comma lists. Also understood: `@every <humantime>` and the
// descriptors `@yearly`, `@monthly`, `@weekly`, `@daily`, `@hourly`.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveDate, TimeDelta, TimeZone, Timelike};
use thiserror::Error;

/// Upper bound on how far ahead `next_after` searches. Eight years covers
/// every leap-day and weekday combination.
const SEARCH_DAYS: u32 = 366 * 8;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid cron expression '{expr}': {reason}")]
pub struct CronError {
    pub expr: String,
    pub reason: String,
}

/// Bitmask over the values 0..=63 a field may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldSet {
    bits: u64,
    /// Written as `*` or `?`.
    any: bool,
}

impl FieldSet {
    fn contains(self, value: u32) -> bool {
        value < 64 && self.bits & (1 << value) != 0
    }

    fn values(self) -> impl Iterator<Item = u32> {
        (0..64).filter(move |v| self.contains(*v))
    }

    fn parse(field: &str, min: u32, max: u32) -> Result<Self, String> {
        let mut bits = 0_u64;
        let mut any = false;

        for part in field.split(',') {
            let (range, step) = match part.split_once('/') {
                Some((range, step)) => {
                    let step: u32 = step
                        .parse()
                        .map_err(|_| format!("bad step '{step}'"))?;
                    if step == 0 {
                        return Err("step must be positive".into());
                    }
                    (range, Some(step))
                }
                None => (part, None),
            };

            let (low, high) = if range == "*" || range == "?" {
                if step.is_none() {
                    any = true;
                }
                (min, max)
            } else if let Some((low, high)) = range.split_once('-') {
                (parse_value(low)?, parse_value(high)?)
            } else {
                let value = parse_value(range)?;
                // `5/15` means "from 5 to the end, every 15".
                (value, if step.is_some() { max } else { value })
            };

            if low < min || high > max || low > high {
                return Err(format!("'{part}' is outside {min}-{max}"));
            }
            let step = step.unwrap_or(1);
            let mut value = low;
            while value <= high {
                bits |= 1 << value;
                value += step;
            }
        }
        Ok(Self { bits, any })
    }
}

fn parse_value(text: &str) -> Result<u32, String> {
    text.trim()
        .parse()
        .map_err(|_| format!("'{text}' is not a number"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Kind {
    Every(Duration),
    Calendar {
        seconds: FieldSet,
        minutes: FieldSet,
        hours: FieldSet,
        days_of_month: FieldSet,
        months: FieldSet,
        days_of_week: FieldSet,
    },
}

/// A parsed schedule. Displays as the expression it was parsed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    source: String,
    kind: Kind,
}

impl CronSchedule {
    pub fn every(interval: Duration) -> Self {
        Self {
            source: format!("@every {}", humantime::format_duration(interval)),
            kind: Kind::Every(interval),
        }
    }

    /// Fixed interval for `@every` schedules.
    pub fn interval(&self) -> Option<Duration> {
        match self.kind {
            Kind::Every(interval) => Some(interval),
            Kind::Calendar { .. } => None,
        }
    }

    /// First fire time strictly after `after`, in the same time zone.
    /// Local times skipped by a DST jump never fire.
    pub fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let Kind::Calendar {
            seconds,
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
        } = &self.kind
        else {
            let interval = self.interval()?;
            return Some(after.clone() + TimeDelta::from_std(interval).ok()?);
        };

        let tz = after.timezone();
        let start = after.naive_local().with_nanosecond(0)? + TimeDelta::seconds(1);
        let mut day = start.date();

        for _ in 0..SEARCH_DAYS {
            if months.contains(day.month()) && day_matches(day, *days_of_month, *days_of_week) {
                for h in hours.values() {
                    for m in minutes.values() {
                        for s in seconds.values() {
                            let Some(candidate) = day.and_hms_opt(h, m, s) else {
                                continue;
                            };
                            if candidate < start {
                                continue;
                            }
                            if let Some(at) = tz.from_local_datetime(&candidate).earliest() {
                                return Some(at);
                            }
                        }
                    }
                }
            }
            day = day.succ_opt()?;
        }
        None
    }
}

/// Day-of-month and day-of-week combine with AND when either is `*`,
/// otherwise with OR (classic cron).
fn day_matches(day: NaiveDate, dom: FieldSet, dow: FieldSet) -> bool {
    let dom_hit = dom.contains(day.day());
    let dow_hit = dow.contains(day.weekday().num_days_from_sunday());
    if dom.any || dow.any {
        dom_hit && dow_hit
    } else {
        dom_hit || dow_hit
    }
}

impl FromStr for CronSchedule {
    type Err = CronError;

    fn from_str(expr: &str) -> Result<Self, Self::Err> {
        let expr = expr.trim();
        let error = |reason: String| CronError {
            expr: expr.to_owned(),
            reason,
        };

        if let Some(interval) = expr.strip_prefix("@every") {
            let interval =
                humantime::parse_duration(interval.trim()).map_err(|e| error(e.to_string()))?;
            if interval.is_zero() {
                return Err(error("interval must be positive".into()));
            }
            return Ok(Self {
                source: expr.to_owned(),
                kind: Kind::Every(interval),
            });
        }

        let fields = match expr {
            "@yearly" | "@annually" => "0 0 0 1 1 *",
            "@monthly" => "0 0 0 1 * *",
            "@weekly" => "0 0 0 * * 0",
            "@daily" | "@midnight" => "0 0 0 * * *",
            "@hourly" => "0 0 * * * *",
            other if other.starts_with('@') => {
                return Err(error(format!("unknown descriptor '{other}'")));
            }
            other => other,
        };

        let parts: Vec<&str> = fields.split_whitespace().collect();
        let [sec, min, hour, dom, month, dow] = parts.as_slice() else {
            return Err(error(format!("expected 6 fields, found {}", parts.len())));
        };

        let mut days_of_week = FieldSet::parse(dow, 0, 7).map_err(error)?;
        // 7 is Sunday too.
        if days_of_week.contains(7) {
            days_of_week.bits = (days_of_week.bits & !(1 << 7)) | 1;
        }

        Ok(Self {
            source: expr.to_owned(),
            kind: Kind::Calendar {
                seconds: FieldSet::parse(sec, 0, 59).map_err(error)?,
                minutes: FieldSet::parse(min, 0, 59).map_err(error)?,
                hours: FieldSet::parse(hour, 0, 23).map_err(error)?,
                days_of_month: FieldSet::parse(dom, 1, 31).map_err(error)?,
                months: FieldSet::parse(month, 1, 12).map_err(error)?,
                days_of_week,
            },
        })
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn at(text: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(text).unwrap().with_timezone(&Utc)
    }

    fn next(expr: &str, after: &str) -> DateTime<Utc> {
        expr.parse::<CronSchedule>()
            .unwrap()
            .next_after(&at(after))
            .unwrap()
    }

    #[test]
    fn daily_sun_refresh_time() {
        assert_eq!(
            next("0 15 1 * * *", "2026-03-10T00:00:00Z"),
            at("2026-03-10T01:15:00Z")
        );
        // Strictly after: the same instant rolls to the next day.
        assert_eq!(
            next("0 15 1 * * *", "2026-03-10T01:15:00Z"),
            at("2026-03-11T01:15:00Z")
        );
    }

    #[test]
    fn steps_ranges_and_lists() {
        assert_eq!(
            next("*/15 * * * * *", "2026-03-10T10:00:07Z"),
            at("2026-03-10T10:00:15Z")
        );
        assert_eq!(
            next("0 0 9-17/4 * * *", "2026-03-10T10:00:00Z"),
            at("2026-03-10T13:00:00Z")
        );
        assert_eq!(
            next("0 30 6,18 * * *", "2026-03-10T07:00:00Z"),
            at("2026-03-10T18:30:00Z")
        );
    }

    #[test]
    fn day_of_week_and_sunday_alias() {
        // 2026-03-10 is a Tuesday.
        assert_eq!(
            next("0 0 0 * * 7", "2026-03-10T12:00:00Z"),
            at("2026-03-15T00:00:00Z")
        );
        assert_eq!(
            next("@weekly", "2026-03-10T12:00:00Z"),
            at("2026-03-15T00:00:00Z")
        );
    }

    #[test]
    fn dom_and_dow_combine_with_or_when_both_set() {
        // The 20th, or any Friday (13th).
        assert_eq!(
            next("0 0 0 20 * 5", "2026-03-10T12:00:00Z"),
            at("2026-03-13T00:00:00Z")
        );
    }

    #[test]
    fn leap_day_is_found() {
        assert_eq!(
            next("0 0 0 29 2 *", "2026-03-01T00:00:00Z"),
            at("2028-02-29T00:00:00Z")
        );
    }

    #[test]
    fn every_adds_interval() {
        let schedule: CronSchedule = "@every 15m".parse().unwrap();
        assert_eq!(schedule.interval(), Some(Duration::from_secs(900)));
        assert_eq!(
            schedule.next_after(&at("2026-03-10T10:00:00Z")).unwrap(),
            at("2026-03-10T10:15:00Z")
        );
        assert_eq!(schedule.to_string(), "@every 15m");
    }

    #[test]
    fn rejects_malformed_expressions() {
        for bad in [
            "* * * * *",
            "60 * * * * *",
            "* * 24 * * *",
            "* * * 0 * *",
            "*/0 * * * * *",
            "5-1 * * * * *",
            "a * * * * *",
            "@every 0s",
            "@every soon",
            "@fortnightly",
        ] {
            assert!(bad.parse::<CronSchedule>().is_err(), "{bad} should fail");
        }
    }

    #[test]
    fn impossible_date_never_fires() {
        let schedule: CronSchedule = "0 0 0 31 2 *".parse().unwrap();
        assert!(schedule.next_after(&at("2026-01-01T00:00:00Z")).is_none());
    }
}
