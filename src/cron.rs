// This file is part of household.
//
// household is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// household is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Five field cron expressions: `minute hour day-of-month month day-of-week`.
//!
//! Every field is a comma separated list of items. An item is one of `*`,
//! `v`, `a-b`, `*/n`, `a-b/n` or `v/n` (from `v` up to the field maximum).
//! In the day of week field both `0` and `7` mean Sunday.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Datelike, TimeDelta, TimeZone, Timelike};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How far ahead [`CronSchedule::next_after`] looks: 366 days of minutes.
pub const SEARCH_LIMIT_MINUTES: u32 = 366 * 24 * 60;

#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CronError {
    #[error("cron: expected 5 fields, found {0}")]
    FieldCount(usize),
    #[error("cron: {field}: '{value}' is not a number")]
    Number { field: Field, value: String },
    #[error("cron: {field}: {value} is outside {min}-{max}")]
    OutOfRange {
        field: Field,
        value: u32,
        min: u32,
        max: u32,
    },
    #[error("cron: {field}: the range {start}-{end} runs backwards")]
    Range { field: Field, start: u32, end: u32 },
    #[error("cron: {field}: the step '{value}' has to be a positive number")]
    Step { field: Field, value: String },
    #[error("cron: {field}: empty list item")]
    Empty { field: Field },
    #[error("cron: unable to find next execution date within 366 days")]
    Exhausted,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Field {
    Minute,
    Hour,
    DayOfMonth,
    Month,
    DayOfWeek,
}

impl Field {
    /// The inclusive range of values the field accepts.
    #[must_use]
    pub fn range(self) -> (u32, u32) {
        match self {
            Self::Minute => (0, 59),
            Self::Hour => (0, 23),
            Self::DayOfMonth => (1, 31),
            Self::Month => (1, 12),
            Self::DayOfWeek => (0, 7),
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Minute => write!(f, "minute"),
            Self::Hour => write!(f, "hour"),
            Self::DayOfMonth => write!(f, "day of month"),
            Self::Month => write!(f, "month"),
            Self::DayOfWeek => write!(f, "day of week"),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CronItem {
    Any,
    Value(u32),
    Range { start: u32, end: u32 },
    Step { start: u32, end: u32, step: u32 },
}

impl CronItem {
    #[must_use]
    pub fn matches(&self, value: u32) -> bool {
        match *self {
            Self::Any => true,
            Self::Value(expected) => value == expected,
            Self::Range { start, end } => (start..=end).contains(&value),
            Self::Step { start, end, step } => {
                (start..=end).contains(&value) && (value - start) % step == 0
            }
        }
    }

    fn parse(field: Field, item: &str) -> Result<Self, CronError> {
        if item.is_empty() {
            return Err(CronError::Empty { field });
        }

        let (min, max) = field.range();
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => (range, Some(parse_step(field, step)?)),
            None => (item, None),
        };

        if range == "*" {
            return Ok(match step {
                Some(step) => Self::Step {
                    start: min,
                    end: max,
                    step,
                },
                None => Self::Any,
            });
        }

        if let Some((start, end)) = range.split_once('-') {
            let start = parse_number(field, start)?;
            let end = parse_number(field, end)?;
            if start > end {
                return Err(CronError::Range { field, start, end });
            }

            return Ok(match step {
                Some(step) => Self::Step { start, end, step },
                None => Self::Range { start, end },
            });
        }

        let value = parse_number(field, range)?;
        Ok(match step {
            Some(step) => Self::Step {
                start: value,
                end: max,
                step,
            },
            None => Self::Value(value),
        })
    }
}

fn parse_number(field: Field, value: &str) -> Result<u32, CronError> {
    let (min, max) = field.range();
    let number = value.parse::<u32>().map_err(|_| CronError::Number {
        field,
        value: value.to_string(),
    })?;

    if number < min || number > max {
        return Err(CronError::OutOfRange {
            field,
            value: number,
            min,
            max,
        });
    }

    Ok(number)
}

fn parse_step(field: Field, value: &str) -> Result<u32, CronError> {
    match value.parse::<u32>() {
        Ok(step) if step > 0 => Ok(step),
        _ => Err(CronError::Step {
            field,
            value: value.to_string(),
        }),
    }
}

/// One parsed field: a value matches when any of its items does.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CronField {
    pub field: Field,
    pub items: Vec<CronItem>,
}

impl CronField {
    /// # Errors
    ///
    /// If any list item is malformed or out of range.
    pub fn parse(field: Field, text: &str) -> Result<Self, CronError> {
        let items = text
            .split(',')
            .map(|item| CronItem::parse(field, item))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { field, items })
    }

    #[must_use]
    pub fn matches(&self, value: u32) -> bool {
        let matches = self.items.iter().any(|item| item.matches(value));

        if self.field == Field::DayOfWeek && value == 0 {
            return matches || self.items.iter().any(|item| item.matches(7));
        }

        matches
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct CronSchedule {
    expression: String,
    pub minute: CronField,
    pub hour: CronField,
    pub day_of_month: CronField,
    pub month: CronField,
    pub day_of_week: CronField,
}

impl CronSchedule {
    #[must_use]
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Whether every one of the five fields matches the date, read in the
    /// date's own time zone.
    #[must_use]
    pub fn matches<Tz: TimeZone>(&self, date: &DateTime<Tz>) -> bool {
        self.minute.matches(date.minute())
            && self.hour.matches(date.hour())
            && self.day_of_month.matches(date.day())
            && self.month.matches(date.month())
            && self
                .day_of_week
                .matches(date.weekday().num_days_from_sunday())
    }

    /// The first whole minute strictly after `from` that matches.
    ///
    /// # Errors
    ///
    /// If nothing matches within [`SEARCH_LIMIT_MINUTES`].
    pub fn next_after<Tz: TimeZone>(&self, from: &DateTime<Tz>) -> Result<DateTime<Tz>, CronError> {
        let truncate = TimeDelta::seconds(i64::from(from.second()))
            + TimeDelta::nanoseconds(i64::from(from.nanosecond()));
        let minute = TimeDelta::minutes(1);
        let mut next = from.clone() - truncate + minute;

        for _ in 0..SEARCH_LIMIT_MINUTES {
            if self.matches(&next) {
                return Ok(next);
            }
            next += minute;
        }

        Err(CronError::Exhausted)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expression)
    }
}

impl FromStr for CronSchedule {
    type Err = CronError;

    fn from_str(expression: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        let [minute, hour, day_of_month, month, day_of_week] = parts.as_slice() else {
            return Err(CronError::FieldCount(parts.len()));
        };

        Ok(Self {
            expression: parts.join(" "),
            minute: CronField::parse(Field::Minute, minute)?,
            hour: CronField::parse(Field::Hour, hour)?,
            day_of_month: CronField::parse(Field::DayOfMonth, day_of_month)?,
            month: CronField::parse(Field::Month, month)?,
            day_of_week: CronField::parse(Field::DayOfWeek, day_of_week)?,
        })
    }
}

impl TryFrom<String> for CronSchedule {
    type Error = CronError;

    fn try_from(expression: String) -> Result<Self, Self::Error> {
        expression.parse()
    }
}

impl From<CronSchedule> for String {
    fn from(schedule: CronSchedule) -> Self {
        schedule.expression
    }
}

#[must_use]
pub fn validate_cron_expression(expression: &str) -> bool {
    CronSchedule::from_str(expression).is_ok()
}
