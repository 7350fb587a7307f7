//! Time periods attached to datasets.
//!
//! A period is either the fixed-field marker (`fx`) or a half-open interval
//! `[start, end)`. Periods are written with the coarsest calendar precision
//! that represents both bounds exactly:
//!
//! ```text
//! 1980-1981             -> [1980-01-01T00:00, 1982-01-01T00:00)
//! 198003-198105         -> [1980-03-01T00:00, 1981-06-01T00:00)
//! 19800115-19800214     -> [1980-01-15T00:00, 1980-02-15T00:00)
//! 1980                  -> [1980-01-01T00:00, 1981-01-01T00:00), written 1980-1980
//! ```
//!
//! The end bound in the written form is inclusive at its precision, so
//! `1980-1981` covers two full years.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};

use crate::error::{CrsError, Result};

/// The string used for fixed (time-invariant) fields.
pub const FIXED_PERIOD: &str = "fx";

/// Calendar precision of a written period bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precision {
    Year,
    Month,
    Day,
    Hour,
    Minute,
}

impl Precision {
    const ALL: [Precision; 5] = [
        Precision::Year,
        Precision::Month,
        Precision::Day,
        Precision::Hour,
        Precision::Minute,
    ];

    fn from_digits(len: usize) -> Option<Self> {
        match len {
            4 => Some(Precision::Year),
            6 => Some(Precision::Month),
            8 => Some(Precision::Day),
            10 => Some(Precision::Hour),
            12 => Some(Precision::Minute),
            _ => None,
        }
    }

    fn aligned(&self, dt: &NaiveDateTime) -> bool {
        let time_zero = dt.second() == 0 && dt.nanosecond() == 0;
        match self {
            Precision::Year => dt.month() == 1 && dt.day() == 1 && dt.hour() == 0 && dt.minute() == 0 && time_zero,
            Precision::Month => dt.day() == 1 && dt.hour() == 0 && dt.minute() == 0 && time_zero,
            Precision::Day => dt.hour() == 0 && dt.minute() == 0 && time_zero,
            Precision::Hour => dt.minute() == 0 && time_zero,
            Precision::Minute => time_zero,
        }
    }

    fn format(&self, dt: &NaiveDateTime) -> String {
        let fmt = match self {
            Precision::Year => "%Y",
            Precision::Month => "%Y%m",
            Precision::Day => "%Y%m%d",
            Precision::Hour => "%Y%m%d%H",
            Precision::Minute => "%Y%m%d%H%M",
        };
        dt.format(fmt).to_string()
    }

    /// Moves `dt` by `n` units. Only called on bounds aligned to `self`.
    fn shift(&self, dt: NaiveDateTime, n: i32) -> Option<NaiveDateTime> {
        match self {
            Precision::Year => NaiveDate::from_ymd_opt(dt.year() + n, dt.month(), dt.day())
                .map(|d| d.and_time(dt.time())),
            Precision::Month => {
                let total = dt.year() * 12 + dt.month0() as i32 + n;
                let year = total.div_euclid(12);
                let month = total.rem_euclid(12) as u32 + 1;
                NaiveDate::from_ymd_opt(year, month, dt.day()).map(|d| d.and_time(dt.time()))
            }
            Precision::Day => dt.checked_add_signed(Duration::days(n as i64)),
            Precision::Hour => dt.checked_add_signed(Duration::hours(n as i64)),
            Precision::Minute => dt.checked_add_signed(Duration::minutes(n as i64)),
        }
    }
}

/// Parses one written bound into its start instant and precision.
fn parse_bound(s: &str) -> Result<(NaiveDateTime, Precision)> {
    let invalid = || CrsError::InvalidPeriod(s.to_string());
    if !s.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let precision = Precision::from_digits(s.len()).ok_or_else(invalid)?;
    let field = |range: std::ops::Range<usize>, default: u32| -> Result<u32> {
        match s.get(range) {
            Some(part) if !part.is_empty() => part.parse::<u32>().map_err(|_| invalid()),
            _ => Ok(default),
        }
    };
    let year = field(0..4, 0)? as i32;
    let month = field(4..6, 1)?;
    let day = field(6..8, 1)?;
    let hour = field(8..10, 0)?;
    let minute = field(10..12, 0)?;
    let start = NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, 0))
        .ok_or_else(invalid)?;
    Ok((start, precision))
}

/// A dataset time period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Period {
    /// Time-invariant field.
    Fixed,
    /// Half-open interval `[start, end)`.
    Span {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
}

impl Period {
    /// Creates an interval, rejecting empty or inverted bounds.
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Result<Self> {
        if start >= end {
            return Err(CrsError::InvalidPeriod(format!("{} >= {}", start, end)));
        }
        Ok(Period::Span { start, end })
    }

    /// Creates the interval covering whole years `first..=last`.
    pub fn years(first: i32, last: i32) -> Result<Self> {
        format!("{:04}-{:04}", first, last).parse()
    }

    /// Parses a written period (`fx`, `YYYY[MM[DD[HH[MM]]]]`, or two such
    /// bounds joined by `-` or `_`).
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s == FIXED_PERIOD {
            return Ok(Period::Fixed);
        }
        let (first, last) = match s.split_once(['-', '_']) {
            Some((a, b)) => (a, b),
            None => (s, s),
        };
        let (start, _) = parse_bound(first)?;
        let (last_start, last_precision) = parse_bound(last)?;
        let end = last_precision
            .shift(last_start, 1)
            .ok_or_else(|| CrsError::InvalidPeriod(s.to_string()))?;
        Period::new(start, end).map_err(|_| CrsError::InvalidPeriod(s.to_string()))
    }

    pub fn is_fixed(&self) -> bool {
        matches!(self, Period::Fixed)
    }

    pub fn start(&self) -> Option<NaiveDateTime> {
        match self {
            Period::Fixed => None,
            Period::Span { start, .. } => Some(*start),
        }
    }

    pub fn end(&self) -> Option<NaiveDateTime> {
        match self {
            Period::Fixed => None,
            Period::Span { end, .. } => Some(*end),
        }
    }

    /// Returns the common part of two periods, if any.
    pub fn intersection(&self, other: &Period) -> Option<Period> {
        match (self, other) {
            (Period::Fixed, Period::Fixed) => Some(Period::Fixed),
            (Period::Span { start: s1, end: e1 }, Period::Span { start: s2, end: e2 }) => {
                let start = *s1.max(s2);
                let end = *e1.min(e2);
                (start < end).then_some(Period::Span { start, end })
            }
            _ => None,
        }
    }

    /// Returns the union of two overlapping or adjacent periods.
    pub fn union(&self, other: &Period) -> Option<Period> {
        match (self, other) {
            (Period::Fixed, Period::Fixed) => Some(Period::Fixed),
            (Period::Span { start: s1, end: e1 }, Period::Span { start: s2, end: e2 }) => {
                if s1 <= e2 && s2 <= e1 {
                    Some(Period::Span {
                        start: *s1.min(s2),
                        end: *e1.max(e2),
                    })
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    pub fn intersects(&self, other: &Period) -> bool {
        self.intersection(other).is_some()
    }

    /// True when `other` lies entirely within `self`.
    pub fn includes(&self, other: &Period) -> bool {
        self.intersection(other).as_ref() == Some(other)
    }

    pub fn contains(&self, instant: NaiveDateTime) -> bool {
        match self {
            Period::Fixed => false,
            Period::Span { start, end } => *start <= instant && instant < *end,
        }
    }

    /// Canonical written form.
    pub fn repr(&self) -> String {
        match self {
            Period::Fixed => FIXED_PERIOD.to_string(),
            Period::Span { start, end } => {
                let precision = Precision::ALL
                    .iter()
                    .find(|p| p.aligned(start) && p.aligned(end))
                    .copied()
                    .unwrap_or(Precision::Minute);
                let last = precision.shift(*end, -1).unwrap_or(*end);
                format!("{}-{}", precision.format(start), precision.format(&last))
            }
        }
    }

    /// ISO 8601 form with an inclusive end, as used by `${period_iso}`.
    pub fn iso(&self) -> String {
        match self {
            Period::Fixed => FIXED_PERIOD.to_string(),
            Period::Span { start, end } => {
                let last = *end - Duration::seconds(1);
                format!(
                    "{},{}",
                    start.format("%Y-%m-%dT%H:%M:%S"),
                    last.format("%Y-%m-%dT%H:%M:%S")
                )
            }
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

impl FromStr for Period {
    type Err = CrsError;

    fn from_str(s: &str) -> Result<Self> {
        Period::parse(s)
    }
}

/// Unions a collection of periods into a sorted list of disjoint periods.
/// Adjacent intervals are fused.
pub fn merge_periods<I>(periods: I) -> Vec<Period>
where
    I: IntoIterator<Item = Period>,
{
    let mut sorted: Vec<Period> = periods.into_iter().collect();
    sorted.sort();
    let mut merged: Vec<Period> = Vec::with_capacity(sorted.len());
    for period in sorted {
        match merged.last_mut() {
            Some(last) => match last.union(&period) {
                Some(joined) => *last = joined,
                None => merged.push(period),
            },
            None => merged.push(period),
        }
    }
    merged
}

/// Intersects two lists of disjoint periods.
pub fn intersect_period_lists(a: &[Period], b: &[Period]) -> Vec<Period> {
    let pieces = a
        .iter()
        .flat_map(|x| b.iter().filter_map(move |y| x.intersection(y)));
    merge_periods(pieces)
}

/// Unions two lists of disjoint periods.
pub fn union_period_lists(a: &[Period], b: &[Period]) -> Vec<Period> {
    merge_periods(a.iter().chain(b.iter()).copied())
}

/// Collapses a merged list to its single period.
pub fn single_period(periods: &[Period]) -> Result<Period> {
    match periods {
        [one] => Ok(*one),
        [] => Err(CrsError::PeriodHasHoles("no common period".to_string())),
        many => Err(CrsError::PeriodHasHoles(
            many.iter().map(Period::repr).collect::<Vec<_>>().join(", "),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn p(s: &str) -> Period {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_years() {
        let period = p("1980-1981");
        assert_eq!(period.start().unwrap().year(), 1980);
        assert_eq!(period.end().unwrap().year(), 1982);
        assert_eq!(period.repr(), "1980-1981");
    }

    #[test]
    fn test_parse_single_year_is_canonicalized() {
        assert_eq!(p("1980").repr(), "1980-1980");
        assert_eq!(p("1980_1985"), p("1980-1985"));
    }

    #[test]
    fn test_repr_picks_coarsest_precision() {
        assert_eq!(p("198003-198105").repr(), "198003-198105");
        assert_eq!(p("198001-198112").repr(), "1980-1981");
        assert_eq!(p("19800115-19800214").repr(), "19800115-19800214");
        assert_eq!(p("1980010106-1980010118").repr(), "1980010106-1980010118");
    }

    #[test]
    fn test_month_rollover() {
        let period = p("198012");
        assert_eq!(period.repr(), "198012-198012");
        assert_eq!(period.end().unwrap().year(), 1981);
    }

    #[test]
    fn test_fixed() {
        assert_eq!(p("fx"), Period::Fixed);
        assert_eq!(Period::Fixed.repr(), "fx");
        assert_eq!(Period::Fixed.intersection(&Period::Fixed), Some(Period::Fixed));
        assert_eq!(Period::Fixed.intersection(&p("1980")), None);
    }

    #[test]
    fn test_invalid_periods() {
        assert!(Period::parse("19x0").is_err());
        assert!(Period::parse("1981-1980").is_err());
        assert!(Period::parse("19801").is_err());
        assert!(Period::parse("198013").is_err());
        assert!(Period::parse("").is_err());
    }

    #[test]
    fn test_intersection_and_union() {
        let a = p("1980-1989");
        let b = p("1985-1994");
        assert_eq!(a.intersection(&b), Some(p("1985-1989")));
        assert_eq!(a.union(&b), Some(p("1980-1994")));
        assert_eq!(a.intersection(&a), Some(a));
        assert_eq!(p("1980").union(&p("1981")), Some(p("1980-1981")));
        assert_eq!(p("1980").union(&p("1982")), None);
        assert_eq!(p("1980").intersection(&p("1981")), None);
    }

    #[test]
    fn test_includes() {
        assert!(p("1980-1989").includes(&p("1982-1983")));
        assert!(!p("1980-1989").includes(&p("1988-1991")));
    }

    #[test]
    fn test_iso() {
        assert_eq!(
            p("1980-1981").iso(),
            "1980-01-01T00:00:00,1981-12-31T23:59:59"
        );
    }

    #[test]
    fn test_merge_and_holes() {
        let merged = merge_periods(vec![p("1990"), p("1980-1985"), p("1986-1989")]);
        assert_eq!(merged, vec![p("1980-1990")]);
        assert_eq!(single_period(&merged).unwrap(), p("1980-1990"));

        let gappy = merge_periods(vec![p("1980-1981"), p("1983-1984")]);
        assert_eq!(gappy.len(), 2);
        assert!(matches!(
            single_period(&gappy),
            Err(CrsError::PeriodHasHoles(_))
        ));
    }

    #[test]
    fn test_intersect_lists() {
        let a = vec![p("1980-1989"), p("2000-2009")];
        let b = vec![p("1985-2004")];
        assert_eq!(
            intersect_period_lists(&a, &b),
            vec![p("1985-1989"), p("2000-2004")]
        );
        assert_eq!(union_period_lists(&a, &b), vec![p("1980-2009")]);
    }
}
