//! Five-field cron expressions evaluated at minute resolution.
//!
//! Fields are `minute hour day-of-month month day-of-week`. Each field accepts
//! `*`, a single value, a comma list, a range `a-b`, and steps `*/n`, `a-b/n`
//! and `a/n`. Day-of-week runs 0-6 with 0 = Sunday.
//!
//! When both day fields are restricted (neither is a bare `*`) a day matches
//! if either field matches, as in classic cron.
//!
//! Parsing and validation happen here; fire times come from `croner`, fed a
//! normalized pattern in which every restricted field is an explicit value
//! list. Expressions match wall-clock time in their [`Zone`] (UTC unless set
//! with [`CronExpr::with_zone`]).

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};

use crate::zone::Zone;

/// Longest possible length of each month, leap years included.
const MONTH_MAX_DAYS: [u32; 12] = [31, 29, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

/// Wall times a DST transition can make unusable in a row.
const MAX_SKIPPED_WALL_TIMES: usize = 24 * 60;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CronError {
    #[error(
        "expected 5 fields (minute hour day-of-month month day-of-week), found {found} in {expression:?}"
    )]
    FieldCount { expression: String, found: usize },

    #[error("invalid {field} value {value:?}")]
    InvalidValue { field: Field, value: String },

    #[error("{field} value {value} is outside {min}-{max}")]
    OutOfRange {
        field: Field,
        value: u32,
        min: u32,
        max: u32,
    },

    #[error("invalid {field} range {start}-{end}")]
    InvalidRange { field: Field, start: u32, end: u32 },

    #[error("invalid {field} step {step:?}")]
    InvalidStep { field: Field, step: String },

    #[error("expression {expression:?} can never fire")]
    NeverFires { expression: String },

    #[error("cron engine rejected {expression:?}: {reason}")]
    Engine { expression: String, reason: String },
}

/// The five positions of a cron expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Minute,
    Hour,
    DayOfMonth,
    Month,
    DayOfWeek,
}

impl Field {
    const ALL: [Field; 5] = [
        Field::Minute,
        Field::Hour,
        Field::DayOfMonth,
        Field::Month,
        Field::DayOfWeek,
    ];

    /// Inclusive value bounds.
    pub fn bounds(self) -> (u32, u32) {
        match self {
            Field::Minute => (0, 59),
            Field::Hour => (0, 23),
            Field::DayOfMonth => (1, 31),
            Field::Month => (1, 12),
            Field::DayOfWeek => (0, 6),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Field::Minute => "minute",
            Field::Hour => "hour",
            Field::DayOfMonth => "day-of-month",
            Field::Month => "month",
            Field::DayOfWeek => "day-of-week",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parsed form of one cron field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldMatcher {
    /// `*`
    Any,
    /// `5`
    Exact(u32),
    /// `1-5`
    Range { start: u32, end: u32 },
    /// `*/15`, `10-50/10`, `5/20`
    Step { start: u32, end: u32, step: u32 },
    /// `1,15,30-35`
    List(Vec<FieldMatcher>),
}

impl FieldMatcher {
    pub fn matches(&self, value: u32) -> bool {
        match self {
            FieldMatcher::Any => true,
            FieldMatcher::Exact(v) => *v == value,
            FieldMatcher::Range { start, end } => (*start..=*end).contains(&value),
            FieldMatcher::Step { start, end, step } => {
                (*start..=*end).contains(&value) && (value - start) % step == 0
            }
            FieldMatcher::List(items) => items.iter().any(|m| m.matches(value)),
        }
    }

    /// Whether this is a bare `*`.
    pub fn is_any(&self) -> bool {
        matches!(self, FieldMatcher::Any)
    }

    /// `*`, or every matching value spelled out.
    fn to_pattern(&self, field: Field) -> String {
        if self.is_any() {
            return "*".to_string();
        }
        let (min, max) = field.bounds();
        (min..=max)
            .filter(|v| self.matches(*v))
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    fn parse(field: Field, text: &str) -> Result<Self, CronError> {
        let mut items = text
            .split(',')
            .map(|part| Self::parse_item(field, part))
            .collect::<Result<Vec<_>, _>>()?;
        if items.len() == 1 {
            Ok(items.remove(0))
        } else {
            Ok(FieldMatcher::List(items))
        }
    }

    fn parse_item(field: Field, text: &str) -> Result<Self, CronError> {
        let (min, max) = field.bounds();

        if let Some((base, step_text)) = text.split_once('/') {
            let step = parse_number(step_text)
                .filter(|s| *s > 0)
                .ok_or_else(|| CronError::InvalidStep {
                    field,
                    step: step_text.to_string(),
                })?;
            let (start, end) = if base == "*" {
                (min, max)
            } else if let Some((a, b)) = base.split_once('-') {
                parse_range(field, a, b)?
            } else {
                (parse_value(field, base)?, max)
            };
            return Ok(FieldMatcher::Step { start, end, step });
        }

        if text == "*" {
            return Ok(FieldMatcher::Any);
        }
        if let Some((a, b)) = text.split_once('-') {
            let (start, end) = parse_range(field, a, b)?;
            return Ok(FieldMatcher::Range { start, end });
        }
        Ok(FieldMatcher::Exact(parse_value(field, text)?))
    }
}

fn parse_number(text: &str) -> Option<u32> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

fn parse_value(field: Field, text: &str) -> Result<u32, CronError> {
    let value = parse_number(text).ok_or_else(|| CronError::InvalidValue {
        field,
        value: text.to_string(),
    })?;
    let (min, max) = field.bounds();
    if !(min..=max).contains(&value) {
        return Err(CronError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(value)
}

fn parse_range(field: Field, a: &str, b: &str) -> Result<(u32, u32), CronError> {
    let start = parse_value(field, a)?;
    let end = parse_value(field, b)?;
    if start > end {
        return Err(CronError::InvalidRange { field, start, end });
    }
    Ok((start, end))
}

/// A parsed, satisfiable cron expression.
#[derive(Clone)]
pub struct CronExpr {
    source: String,
    minute: FieldMatcher,
    hour: FieldMatcher,
    day_of_month: FieldMatcher,
    month: FieldMatcher,
    day_of_week: FieldMatcher,
    zone: Zone,
    schedule: Arc<croner::Cron>,
}

impl CronExpr {
    /// Parse and validate an expression. Expressions that could never fire
    /// (such as `0 0 31 2 *`) are rejected.
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() != Field::ALL.len() {
            return Err(CronError::FieldCount {
                expression: expression.to_string(),
                found: parts.len(),
            });
        }

        let source = parts.join(" ");
        let minute = FieldMatcher::parse(Field::Minute, parts[0])?;
        let hour = FieldMatcher::parse(Field::Hour, parts[1])?;
        let day_of_month = FieldMatcher::parse(Field::DayOfMonth, parts[2])?;
        let month = FieldMatcher::parse(Field::Month, parts[3])?;
        let day_of_week = FieldMatcher::parse(Field::DayOfWeek, parts[4])?;

        if !can_fire(&day_of_month, &month, &day_of_week) {
            return Err(CronError::NeverFires { expression: source });
        }

        let pattern = [
            minute.to_pattern(Field::Minute),
            hour.to_pattern(Field::Hour),
            day_of_month.to_pattern(Field::DayOfMonth),
            month.to_pattern(Field::Month),
            day_of_week.to_pattern(Field::DayOfWeek),
        ]
        .join(" ");
        let schedule = croner::Cron::from_str(&pattern).map_err(|e| CronError::Engine {
            expression: source.clone(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            source,
            minute,
            hour,
            day_of_month,
            month,
            day_of_week,
            zone: Zone::Utc,
            schedule: Arc::new(schedule),
        })
    }

    /// Evaluate the expression against wall-clock time in `zone`.
    pub fn with_zone(mut self, zone: Zone) -> Self {
        self.zone = zone;
        self
    }

    pub fn zone(&self) -> Zone {
        self.zone
    }

    /// The expression text, whitespace-normalized.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn field(&self, field: Field) -> &FieldMatcher {
        match field {
            Field::Minute => &self.minute,
            Field::Hour => &self.hour,
            Field::DayOfMonth => &self.day_of_month,
            Field::Month => &self.month,
            Field::DayOfWeek => &self.day_of_week,
        }
    }

    /// Whether the expression matches `at` on the zone's wall clock,
    /// ignoring seconds.
    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        let wall = self.zone.wall_clock(at);
        self.month.matches(wall.month())
            && self.matches_day(wall.date())
            && self.hour.matches(wall.hour())
            && self.minute.matches(wall.minute())
    }

    /// First fire instant strictly after `after`.
    ///
    /// Returns `None` only if the engine finds nothing, which cannot happen
    /// for an expression accepted by [`CronExpr::parse`].
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut wall = self.zone.wall_clock(after);
        for _ in 0..MAX_SKIPPED_WALL_TIMES {
            wall = self.next_wall_time(wall)?;
            match self.zone.resolve(wall) {
                Some(instant) if instant > after => return Some(instant),
                // In a DST gap, or the repeat of a wall time already passed.
                _ => {}
            }
        }
        None
    }

    fn next_wall_time(&self, after: NaiveDateTime) -> Option<NaiveDateTime> {
        self.schedule
            .find_next_occurrence(&Utc.from_utc_datetime(&after), false)
            .ok()
            .map(|t| t.naive_utc())
    }

    /// Fire instants in `(after, until]`, oldest first.
    pub fn fires_between(&self, after: DateTime<Utc>, until: DateTime<Utc>) -> Fires<'_> {
        Fires {
            expr: self,
            cursor: after,
            until: Some(until),
        }
    }

    /// Unbounded fire instants strictly after `after`.
    pub fn upcoming(&self, after: DateTime<Utc>) -> Fires<'_> {
        Fires {
            expr: self,
            cursor: after,
            until: None,
        }
    }

    fn matches_day(&self, date: NaiveDate) -> bool {
        let dom = self.day_of_month.matches(date.day());
        let dow = self
            .day_of_week
            .matches(date.weekday().num_days_from_sunday());
        match (self.day_of_month.is_any(), self.day_of_week.is_any()) {
            (true, true) => true,
            (false, true) => dom,
            (true, false) => dow,
            (false, false) => dom || dow,
        }
    }
}

/// Hours and minutes always have a matching value, and every month contains
/// every weekday, so only a day-of-month constraint without a weekday
/// alternative can leave an expression unsatisfiable.
fn can_fire(day_of_month: &FieldMatcher, month: &FieldMatcher, day_of_week: &FieldMatcher) -> bool {
    if !day_of_week.is_any() {
        return true;
    }
    (1..=12u32)
        .filter(|m| month.matches(*m))
        .any(|m| (1..=MONTH_MAX_DAYS[(m - 1) as usize]).any(|d| day_of_month.matches(d)))
}

impl PartialEq for CronExpr {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.zone == other.zone
    }
}

impl Eq for CronExpr {}

impl fmt::Debug for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CronExpr")
            .field("source", &self.source)
            .field("zone", &self.zone)
            .finish()
    }
}

impl FromStr for CronExpr {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Iterator over successive fire instants.
#[derive(Debug, Clone)]
pub struct Fires<'a> {
    expr: &'a CronExpr,
    cursor: DateTime<Utc>,
    until: Option<DateTime<Utc>>,
}

impl Iterator for Fires<'_> {
    type Item = DateTime<Utc>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.expr.next_after(self.cursor)?;
        if self.until.is_some_and(|until| next > until) {
            return None;
        }
        self.cursor = next;
        Some(next)
    }
}

/// Parse `expression` and compute its first fire instant after `after`.
pub fn next_fire_time(expression: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>, CronError> {
    let expr = CronExpr::parse(expression)?;
    expr.next_after(after).ok_or(CronError::NeverFires {
        expression: expr.source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn next(expr: &str, after: DateTime<Utc>) -> DateTime<Utc> {
        next_fire_time(expr, after).unwrap()
    }

    #[test]
    fn test_daily_midnight_is_strictly_after() {
        assert_eq!(
            next("0 0 * * *", utc(2026, 2, 14, 0, 0)),
            utc(2026, 2, 15, 0, 0)
        );
    }

    #[test]
    fn test_quarter_hour_step() {
        assert_eq!(
            next("*/15 * * * *", utc(2026, 2, 14, 0, 7)),
            utc(2026, 2, 14, 0, 15)
        );
        assert_eq!(
            next("*/15 * * * *", utc(2026, 2, 14, 23, 50)),
            utc(2026, 2, 15, 0, 0)
        );
    }

    #[test]
    fn test_weekdays_skip_weekend() {
        // 2026-02-14 is a Saturday.
        assert_eq!(
            next("0 9 * * 1-5", utc(2026, 2, 14, 9, 0)),
            utc(2026, 2, 16, 9, 0)
        );
    }

    #[test]
    fn test_seconds_are_truncated() {
        let after = Utc.with_ymd_and_hms(2026, 2, 14, 10, 4, 59).unwrap();
        assert_eq!(next("* * * * *", after), utc(2026, 2, 14, 10, 5));
    }

    #[test]
    fn test_day_fields_are_ored_when_both_restricted() {
        // Fires on the 1st of the month OR on any Monday.
        let expr = CronExpr::parse("0 12 1 * 1").unwrap();
        // Saturday 2026-02-14 -> Monday 2026-02-16.
        assert_eq!(
            expr.next_after(utc(2026, 2, 14, 0, 0)),
            Some(utc(2026, 2, 16, 12, 0))
        );
        // Saturday 2026-02-28 -> Sunday 2026-03-01 matches day-of-month.
        assert_eq!(
            expr.next_after(utc(2026, 2, 28, 13, 0)),
            Some(utc(2026, 3, 1, 12, 0))
        );
    }

    #[test]
    fn test_single_restricted_day_field_constrains_alone() {
        // Day-of-month only: weekday is irrelevant.
        assert_eq!(
            next("0 0 15 * *", utc(2026, 2, 14, 0, 0)),
            utc(2026, 2, 15, 0, 0)
        );
        // Day-of-week only: Sunday.
        assert_eq!(
            next("30 6 * * 0", utc(2026, 2, 14, 0, 0)),
            utc(2026, 2, 15, 6, 30)
        );
    }

    #[test]
    fn test_stepped_wildcard_counts_as_restricted() {
        // `*/10` in day-of-month is not a bare `*`, so it ORs with Sunday.
        let expr = CronExpr::parse("0 0 */10 * 0").unwrap();
        assert!(!expr.field(Field::DayOfMonth).is_any());
        // From 2026-02-12: Sunday the 15th comes before the 21st.
        assert_eq!(
            expr.next_after(utc(2026, 2, 12, 0, 0)),
            Some(utc(2026, 2, 15, 0, 0))
        );
    }

    #[test]
    fn test_month_and_year_rollover() {
        assert_eq!(
            next("0 0 1 1 *", utc(2026, 2, 14, 0, 0)),
            utc(2027, 1, 1, 0, 0)
        );
        assert_eq!(
            next("59 23 31 12 *", utc(2026, 12, 31, 23, 59)),
            utc(2027, 12, 31, 23, 59)
        );
    }

    #[test]
    fn test_leap_day() {
        assert_eq!(
            next("0 0 29 2 *", utc(2026, 2, 14, 0, 0)),
            utc(2028, 2, 29, 0, 0)
        );
    }

    #[test]
    fn test_lists_ranges_and_offset_steps() {
        let expr = CronExpr::parse("5,10-12,40/10 * * * *").unwrap();
        let base = utc(2026, 2, 14, 8, 0);
        let minutes: Vec<u32> = expr.upcoming(base).take(7).map(|t| t.minute()).collect();
        assert_eq!(minutes, vec![5, 10, 11, 12, 40, 50, 5]);

        let ranged = CronExpr::parse("0 9-17/4 * * *").unwrap();
        let hours: Vec<u32> = ranged.upcoming(base).take(3).map(|t| t.hour()).collect();
        assert_eq!(hours, vec![9, 13, 17]);
    }

    #[test]
    fn test_deterministic() {
        let expr = CronExpr::parse("17 */3 * * 2,4").unwrap();
        let after = utc(2026, 2, 14, 5, 5);
        assert_eq!(expr.next_after(after), expr.next_after(after));
    }

    #[test]
    fn test_fires_between_is_half_open() {
        let expr = CronExpr::parse("0 * * * *").unwrap();
        let fires: Vec<_> = expr
            .fires_between(utc(2026, 2, 14, 1, 0), utc(2026, 2, 14, 4, 0))
            .collect();
        assert_eq!(
            fires,
            vec![
                utc(2026, 2, 14, 2, 0),
                utc(2026, 2, 14, 3, 0),
                utc(2026, 2, 14, 4, 0)
            ]
        );
        assert_eq!(
            expr.fires_between(utc(2026, 2, 14, 1, 0), utc(2026, 2, 14, 1, 30))
                .count(),
            0
        );
    }

    #[test]
    fn test_rejects_malformed_expressions() {
        assert!(matches!(
            CronExpr::parse("* * * *"),
            Err(CronError::FieldCount { found: 4, .. })
        ));
        assert!(matches!(
            CronExpr::parse("60 * * * *"),
            Err(CronError::OutOfRange {
                field: Field::Minute,
                value: 60,
                ..
            })
        ));
        assert!(matches!(
            CronExpr::parse("0 0 * * 7"),
            Err(CronError::OutOfRange {
                field: Field::DayOfWeek,
                ..
            })
        ));
        assert!(matches!(
            CronExpr::parse("0 0 0 * *"),
            Err(CronError::OutOfRange { .. })
        ));
        assert!(matches!(
            CronExpr::parse("*/0 * * * *"),
            Err(CronError::InvalidStep { .. })
        ));
        assert!(matches!(
            CronExpr::parse("5-1 * * * *"),
            Err(CronError::InvalidRange { .. })
        ));
        assert!(matches!(
            CronExpr::parse("a * * * *"),
            Err(CronError::InvalidValue { .. })
        ));
        assert!(matches!(
            CronExpr::parse("1,,2 * * * *"),
            Err(CronError::InvalidValue { .. })
        ));
        assert!(matches!(
            CronExpr::parse("+5 * * * *"),
            Err(CronError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_rejects_expressions_that_never_fire() {
        assert!(matches!(
            CronExpr::parse("0 0 31 2 *"),
            Err(CronError::NeverFires { .. })
        ));
        assert!(matches!(
            CronExpr::parse("0 0 31 4,6,9,11 *"),
            Err(CronError::NeverFires { .. })
        ));
        // A weekday alternative keeps it satisfiable.
        assert!(CronExpr::parse("0 0 31 2 1").is_ok());
    }

    #[test]
    fn test_normalizes_whitespace() {
        let expr: CronExpr = "  0   9 * *\t1-5 ".parse().unwrap();
        assert_eq!(expr.as_str(), "0 9 * * 1-5");
        assert_eq!(expr.to_string(), "0 9 * * 1-5");
    }

    #[test]
    fn test_restricted_fields_become_value_lists() {
        let expr = CronExpr::parse("*/20 9-11 */10 * 0").unwrap();
        assert_eq!(expr.field(Field::Minute).to_pattern(Field::Minute), "0,20,40");
        assert_eq!(expr.field(Field::Hour).to_pattern(Field::Hour), "9,10,11");
        assert_eq!(
            expr.field(Field::DayOfMonth).to_pattern(Field::DayOfMonth),
            "1,11,21,31"
        );
        assert_eq!(expr.field(Field::Month).to_pattern(Field::Month), "*");
    }

    #[test]
    fn test_named_zone_wall_clock() {
        // 09:00 in New York is 14:00 UTC in February (EST).
        let expr = CronExpr::parse("0 9 * * 1-5")
            .unwrap()
            .with_zone(Zone::Named(chrono_tz::America::New_York));
        assert_eq!(
            expr.next_after(utc(2026, 2, 14, 9, 0)),
            Some(utc(2026, 2, 16, 14, 0))
        );
        assert!(expr.matches(utc(2026, 2, 16, 14, 0)));
        assert!(!expr.matches(utc(2026, 2, 16, 9, 0)));
        // After the March switch to EDT the same wall time is 13:00 UTC.
        assert_eq!(
            expr.next_after(utc(2026, 3, 9, 0, 0)),
            Some(utc(2026, 3, 9, 13, 0))
        );
    }

    #[test]
    fn test_dst_gap_wall_time_is_skipped() {
        // Berlin skips 02:00-03:00 on 2026-03-29.
        let expr = CronExpr::parse("30 2 * * *")
            .unwrap()
            .with_zone(Zone::Named(chrono_tz::Europe::Berlin));
        // 2026-03-28 02:30 CET = 01:30 UTC.
        let before = utc(2026, 3, 28, 1, 30);
        assert_eq!(expr.next_after(before), Some(utc(2026, 3, 30, 0, 30)));

        // Hourly fires simply have no 02:00 that day.
        let hourly = CronExpr::parse("0 * * * *")
            .unwrap()
            .with_zone(Zone::Named(chrono_tz::Europe::Berlin));
        let fires: Vec<_> = hourly
            .fires_between(utc(2026, 3, 28, 23, 30), utc(2026, 3, 29, 2, 0))
            .collect();
        // 01:00 CET, 03:00 CEST, 04:00 CEST.
        assert_eq!(
            fires,
            vec![
                utc(2026, 3, 29, 0, 0),
                utc(2026, 3, 29, 1, 0),
                utc(2026, 3, 29, 2, 0)
            ]
        );
    }

    #[test]
    fn test_dst_overlap_fires_once() {
        // Berlin repeats 02:00-03:00 on 2026-10-25.
        let expr = CronExpr::parse("30 2 * * *")
            .unwrap()
            .with_zone(Zone::Named(chrono_tz::Europe::Berlin));
        let first = expr.next_after(utc(2026, 10, 24, 12, 0)).unwrap();
        // First occurrence, 02:30 CEST.
        assert_eq!(first, utc(2026, 10, 25, 0, 30));
        // The repeat at 02:30 CET (01:30 UTC) is not a second fire.
        assert_eq!(expr.next_after(first), Some(utc(2026, 10, 26, 1, 30)));
        // Starting inside the repeated hour skips the already-passed wall time.
        assert_eq!(
            expr.next_after(utc(2026, 10, 25, 1, 10)),
            Some(utc(2026, 10, 26, 1, 30))
        );
    }

    #[test]
    fn test_equality_covers_text_and_zone() {
        let utc_expr = CronExpr::parse("0 9 * * *").unwrap();
        let tokyo = utc_expr.clone().with_zone(Zone::Named(chrono_tz::Asia::Tokyo));
        assert_ne!(utc_expr, tokyo);
        assert_eq!(utc_expr, CronExpr::parse("0  9 * * *").unwrap());
    }

    #[test]
    fn test_matches() {
        let expr = CronExpr::parse("30 9 * * 1-5").unwrap();
        assert!(expr.matches(utc(2026, 2, 16, 9, 30)));
        assert!(!expr.matches(utc(2026, 2, 14, 9, 30)));
    }
}
