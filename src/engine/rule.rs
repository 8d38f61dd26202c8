use std::collections::{BTreeSet, btree_set};

use chrono::{Datelike, NaiveDate};

use crate::limits::MAX_SPECIFIC_DATES;
use crate::model::{DateWindow, RawRule, Rule};

use super::EngineError;

/// Weekday number of `date`, 0 = Sunday.
pub fn weekday_number(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

impl Rule {
    pub fn specific_dates(dates: impl IntoIterator<Item = NaiveDate>) -> Result<Self, EngineError> {
        let rule = Rule::SpecificDates(dates.into_iter().collect());
        rule.validate()?;
        Ok(rule)
    }

    pub fn days_of_week(days: impl IntoIterator<Item = u8>) -> Result<Self, EngineError> {
        let rule = Rule::DayOfWeek(days.into_iter().collect());
        rule.validate()?;
        Ok(rule)
    }

    pub fn date_range(start: NaiveDate, end: NaiveDate) -> Result<Self, EngineError> {
        let rule = Rule::DateRange { start, end };
        rule.validate()?;
        Ok(rule)
    }

    /// Reject payloads that could never match instead of storing them.
    pub fn validate(&self) -> Result<(), EngineError> {
        match self {
            Rule::SpecificDates(dates) => {
                if dates.is_empty() {
                    return Err(EngineError::invalid(
                        "specificDates",
                        "at least one date is required",
                    ));
                }
                if dates.len() > MAX_SPECIFIC_DATES {
                    return Err(EngineError::LimitExceeded("too many specific dates"));
                }
            }
            Rule::DayOfWeek(days) => {
                if days.is_empty() {
                    return Err(EngineError::invalid(
                        "daysOfWeek",
                        "at least one weekday is required",
                    ));
                }
                if let Some(bad) = days.iter().find(|d| **d > 6) {
                    return Err(EngineError::invalid(
                        "daysOfWeek",
                        format!("{bad} is not a weekday number (0-6)"),
                    ));
                }
            }
            Rule::DateRange { start, end } => {
                if start > end {
                    return Err(EngineError::invalid(
                        "dateRange",
                        format!("start {start} is after end {end}"),
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn includes(&self, date: NaiveDate) -> bool {
        match self {
            Rule::SpecificDates(dates) => dates.contains(&date),
            Rule::DayOfWeek(days) => days.contains(&weekday_number(date)),
            Rule::DateRange { start, end } => *start <= date && date <= *end,
        }
    }

    /// Ascending dates that satisfy the rule, fall inside `window`, and are
    /// not after `expires_on`.
    pub fn dates_within(&self, window: &DateWindow, expires_on: NaiveDate) -> RuleDates<'_> {
        let last = window.to().min(expires_on);
        if window.from() > last {
            return RuleDates { inner: Inner::Empty };
        }
        let inner = match self {
            Rule::SpecificDates(dates) => Inner::Listed(dates.range(window.from()..=last)),
            Rule::DayOfWeek(days) => Inner::Walk {
                next: Some(window.from()),
                last,
                days: Some(days),
            },
            Rule::DateRange { start, end } => {
                let first = window.from().max(*start);
                let last = last.min(*end);
                if first > last {
                    Inner::Empty
                } else {
                    Inner::Walk {
                        next: Some(first),
                        last,
                        days: None,
                    }
                }
            }
        };
        RuleDates { inner }
    }
}

/// Lazy iterator returned by [`Rule::dates_within`].
pub struct RuleDates<'a> {
    inner: Inner<'a>,
}

enum Inner<'a> {
    Listed(btree_set::Range<'a, NaiveDate>),
    /// Day-by-day walk over `[next, last]`, optionally filtered by weekday.
    Walk {
        next: Option<NaiveDate>,
        last: NaiveDate,
        days: Option<&'a BTreeSet<u8>>,
    },
    Empty,
}

impl Iterator for RuleDates<'_> {
    type Item = NaiveDate;

    fn next(&mut self) -> Option<NaiveDate> {
        match &mut self.inner {
            Inner::Listed(range) => range.next().copied(),
            Inner::Walk { next, last, days } => {
                while let Some(date) = *next {
                    // succ_opt is None at NaiveDate::MAX, which ends the walk.
                    *next = if date < *last { date.succ_opt() } else { None };
                    let wanted = match days {
                        Some(days) => days.contains(&weekday_number(date)),
                        None => true,
                    };
                    if wanted {
                        return Some(date);
                    }
                }
                None
            }
            Inner::Empty => None,
        }
    }
}

fn reject_foreign(present: bool, field: &'static str, rule_type: &str) -> Result<(), EngineError> {
    if present {
        return Err(EngineError::invalid(
            field,
            format!("must not be set on a {rule_type} rule"),
        ));
    }
    Ok(())
}

impl TryFrom<RawRule> for Rule {
    type Error = EngineError;

    fn try_from(raw: RawRule) -> Result<Self, Self::Error> {
        let tag = raw.rule_type.trim().to_ascii_uppercase().replace('-', "_");
        let has_dates = raw.specific_dates.is_some();
        let has_days = raw.days_of_week.is_some();
        let has_range = raw.date_range_start.is_some() || raw.date_range_end.is_some();

        match tag.as_str() {
            "SPECIFIC_DATES" => {
                reject_foreign(has_days, "daysOfWeek", "SPECIFIC_DATES")?;
                reject_foreign(has_range, "dateRange", "SPECIFIC_DATES")?;
                let dates = raw.specific_dates.ok_or_else(|| {
                    EngineError::invalid("specificDates", "required for SPECIFIC_DATES rules")
                })?;
                Rule::specific_dates(dates)
            }
            "DAY_OF_WEEK" => {
                reject_foreign(has_dates, "specificDates", "DAY_OF_WEEK")?;
                reject_foreign(has_range, "dateRange", "DAY_OF_WEEK")?;
                let days = raw.days_of_week.ok_or_else(|| {
                    EngineError::invalid("daysOfWeek", "required for DAY_OF_WEEK rules")
                })?;
                let days = days
                    .into_iter()
                    .map(|d| {
                        u8::try_from(d).ok().filter(|d| *d <= 6).ok_or_else(|| {
                            EngineError::invalid(
                                "daysOfWeek",
                                format!("{d} is not a weekday number (0-6)"),
                            )
                        })
                    })
                    .collect::<Result<Vec<u8>, _>>()?;
                Rule::days_of_week(days)
            }
            "DATE_RANGE" => {
                reject_foreign(has_dates, "specificDates", "DATE_RANGE")?;
                reject_foreign(has_days, "daysOfWeek", "DATE_RANGE")?;
                let start = raw.date_range_start.ok_or_else(|| {
                    EngineError::invalid("dateRangeStart", "required for DATE_RANGE rules")
                })?;
                let end = raw.date_range_end.ok_or_else(|| {
                    EngineError::invalid("dateRangeEnd", "required for DATE_RANGE rules")
                })?;
                Rule::date_range(start, end)
            }
            "" => Err(EngineError::invalid("ruleType", "missing")),
            other => Err(EngineError::invalid(
                "ruleType",
                format!("unknown rule type {other:?}"),
            )),
        }
    }
}
