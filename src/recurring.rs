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

//! Recurring payment templates and their due date arithmetic.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Days, Local, Months, NaiveDateTime, TimeDelta, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    Id,
    cron::{CronError, CronSchedule},
    store::StoreError,
};

pub const DEFAULT_CURRENCY: &str = "CHF";

#[derive(Debug, Error)]
pub enum RecurringError {
    #[error("invalid frequency: {0}")]
    InvalidFrequency(String),
    #[error("valid cron expression required for custom frequency")]
    CronRequired,
    #[error(transparent)]
    Cron(#[from] CronError),
    #[error("{0}")]
    Validation(String),
    #[error("the next execution date is out of range")]
    OutOfRange,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Custom(CronSchedule),
}

impl Frequency {
    /// Builds a frequency from its name and, for `custom`, a cron expression.
    ///
    /// # Errors
    ///
    /// If the name is unknown, or the frequency is `custom` and the
    /// expression is missing or invalid.
    pub fn from_parts(frequency: &str, cron_expression: Option<&str>) -> Result<Self, RecurringError> {
        match frequency {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "custom" => {
                let expression = cron_expression
                    .map(str::trim)
                    .filter(|expression| !expression.is_empty())
                    .ok_or(RecurringError::CronRequired)?;

                Ok(Self::Custom(expression.parse()?))
            }
            _ => Err(RecurringError::InvalidFrequency(frequency.to_string())),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Custom(_) => "custom",
        }
    }

    #[must_use]
    pub fn cron_expression(&self) -> Option<&str> {
        match self {
            Self::Custom(schedule) => Some(schedule.expression()),
            _ => None,
        }
    }

    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::Daily => "Every day".to_string(),
            Self::Weekly => "Every week".to_string(),
            Self::Monthly => "Every month".to_string(),
            Self::Custom(schedule) => format!("Custom: {schedule}"),
        }
    }

    /// The next trigger after `from`, computed in the calendar of `from`'s
    /// time zone. Daily, weekly and monthly keep the time of day; a monthly
    /// date past the end of the next month is clamped to its last day.
    ///
    /// # Errors
    ///
    /// If a custom schedule has no match within 366 days, or the date
    /// leaves chrono's range.
    pub fn next_execution_date<Tz: TimeZone>(
        &self,
        from: &DateTime<Tz>,
    ) -> Result<DateTime<Tz>, RecurringError> {
        let next = match self {
            Self::Daily => shift_local(from, |local| local.checked_add_days(Days::new(1))),
            Self::Weekly => shift_local(from, |local| local.checked_add_days(Days::new(7))),
            Self::Monthly => shift_local(from, |local| local.checked_add_months(Months::new(1))),
            Self::Custom(schedule) => return Ok(schedule.next_after(from)?),
        };

        next.ok_or(RecurringError::OutOfRange)
    }
}

/// Moves the wall clock time of `from`. A time repeated by a clock change
/// resolves to its first occurrence. A time skipped by one moves forward by
/// the wall clock difference instead.
fn shift_local<Tz: TimeZone>(
    from: &DateTime<Tz>,
    shift: impl FnOnce(NaiveDateTime) -> Option<NaiveDateTime>,
) -> Option<DateTime<Tz>> {
    let local = from.naive_local();
    let target = shift(local)?;

    from.timezone()
        .from_local_datetime(&target)
        .earliest()
        .or_else(|| from.clone().checked_add_signed(target - local))
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Custom(schedule) => write!(f, "custom {schedule}"),
            _ => write!(f, "{}", self.name()),
        }
    }
}

impl FromStr for Frequency {
    type Err = RecurringError;

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        let string = string.trim();
        match string.split_once(char::is_whitespace) {
            Some((name, expression)) => Self::from_parts(name, Some(expression)),
            None => Self::from_parts(string, None),
        }
    }
}

impl TryFrom<String> for Frequency {
    type Error = RecurringError;

    fn try_from(string: String) -> Result<Self, Self::Error> {
        string.parse()
    }
}

impl From<Frequency> for String {
    fn from(frequency: Frequency) -> Self {
        frequency.to_string()
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    #[default]
    Groceries,
    Shopping,
    Travel,
    Restaurant,
    Utilities,
    Fun,
    Settlement,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Groceries => write!(f, "groceries"),
            Self::Shopping => write!(f, "shopping"),
            Self::Travel => write!(f, "travel"),
            Self::Restaurant => write!(f, "restaurant"),
            Self::Utilities => write!(f, "utilities"),
            Self::Fun => write!(f, "fun"),
            Self::Settlement => write!(f, "settlement"),
        }
    }
}

impl FromStr for Category {
    type Err = anyhow::Error;

    fn from_str(string: &str) -> anyhow::Result<Self> {
        match string {
            "groceries" => Ok(Self::Groceries),
            "shopping" => Ok(Self::Shopping),
            "travel" => Ok(Self::Travel),
            "restaurant" => Ok(Self::Restaurant),
            "utilities" => Ok(Self::Utilities),
            "fun" => Ok(Self::Fun),
            "settlement" => Ok(Self::Settlement),
            _ => Err(anyhow::Error::msg(format!("invalid category: {string}"))),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitMethod {
    #[default]
    Equal,
    Full,
    Proportional,
    PersonalEqual,
}

impl fmt::Display for SplitMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equal => write!(f, "equal"),
            Self::Full => write!(f, "full"),
            Self::Proportional => write!(f, "proportional"),
            Self::PersonalEqual => write!(f, "personal_equal"),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Split {
    pub username: String,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub proportion: Option<f64>,
    #[serde(default)]
    pub personal_amount: Option<f64>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RecurringPayment {
    pub id: Id,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub amount: f64,
    pub currency: String,
    pub paid_by: String,
    #[serde(default)]
    pub category: Category,
    pub split_method: SplitMethod,
    pub splits: Vec<Split>,
    pub frequency: Frequency,
    pub is_active: bool,
    pub next_execution_date: DateTime<Utc>,
    #[serde(default)]
    pub last_execution_date: Option<DateTime<Utc>>,
    pub start_date: DateTime<Utc>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    pub created_by: String,
}

impl RecurringPayment {
    /// Active, past its next execution date, and not past its end date.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && self.next_execution_date <= now
            && self.end_date.is_none_or(|end_date| end_date >= now)
    }

    /// The next execution after `from`, evaluated in the local time zone.
    ///
    /// # Errors
    ///
    /// See [`Frequency::next_execution_date`].
    pub fn next_execution_after(&self, from: DateTime<Utc>) -> Result<DateTime<Utc>, RecurringError> {
        Ok(self
            .frequency
            .next_execution_date(&from.with_timezone(&Local))?
            .with_timezone(&Utc))
    }
}

fn validate(
    title: &str,
    amount: f64,
    paid_by: &str,
    split_method: SplitMethod,
    splits: &[Split],
) -> Result<(), RecurringError> {
    if title.trim().is_empty() || paid_by.trim().is_empty() || splits.is_empty() {
        return Err(RecurringError::Validation("missing required fields".to_string()));
    }

    if !amount.is_finite() || amount <= 0.0 {
        return Err(RecurringError::Validation("amount must be positive".to_string()));
    }

    for split in splits {
        if split.username.trim().is_empty() {
            return Err(RecurringError::Validation("a split is missing its username".to_string()));
        }
        if split.proportion.is_some_and(|proportion| !(0.0..=1.0).contains(&proportion)) {
            return Err(RecurringError::Validation(
                "proportions must be between 0 and 1".to_string(),
            ));
        }
        if split.personal_amount.is_some_and(|personal| personal < 0.0) {
            return Err(RecurringError::Validation(
                "personal amounts cannot be negative".to_string(),
            ));
        }
    }

    if split_method == SplitMethod::PersonalEqual {
        let total_personal: f64 = splits.iter().filter_map(|split| split.personal_amount).sum();
        if total_personal > amount {
            return Err(RecurringError::Validation(
                "personal amounts cannot exceed total payment amount".to_string(),
            ));
        }
    }

    Ok(())
}

/// A request to create a recurring payment.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct RecurringPaymentRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub amount: f64,
    #[serde(default)]
    pub currency: Option<String>,
    pub paid_by: String,
    #[serde(default)]
    pub category: Option<Category>,
    pub split_method: SplitMethod,
    pub splits: Vec<Split>,
    pub frequency: String,
    #[serde(default)]
    pub cron_expression: Option<String>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    pub created_by: String,
}

impl RecurringPaymentRequest {
    /// Validates the request and computes the first execution date from the
    /// start date, which defaults to `now`.
    ///
    /// # Errors
    ///
    /// If a required field is missing, the amount is not positive, the
    /// frequency or cron expression is invalid, or personal amounts exceed
    /// the total.
    pub fn into_recurring_payment(self, now: DateTime<Utc>) -> Result<RecurringPayment, RecurringError> {
        validate(
            &self.title,
            self.amount,
            &self.paid_by,
            self.split_method,
            &self.splits,
        )?;

        let frequency = Frequency::from_parts(&self.frequency, self.cron_expression.as_deref())?;
        let start_date = self.start_date.unwrap_or(now);

        let mut payment = RecurringPayment {
            id: 0,
            title: self.title.trim().to_string(),
            description: self.description,
            amount: self.amount,
            currency: self
                .currency
                .map_or_else(|| DEFAULT_CURRENCY.to_string(), |currency| currency.to_uppercase()),
            paid_by: self.paid_by.trim().to_string(),
            category: self.category.unwrap_or_default(),
            split_method: self.split_method,
            splits: self.splits,
            frequency,
            is_active: true,
            next_execution_date: start_date,
            last_execution_date: None,
            start_date,
            end_date: self.end_date,
            created_by: self.created_by,
        };
        payment.next_execution_date = payment.next_execution_after(start_date)?;

        Ok(payment)
    }
}

/// A partial update. `None` leaves a field untouched; `Some(None)` clears
/// the description or the end date.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct RecurringPaymentUpdate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub paid_by: Option<String>,
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub split_method: Option<SplitMethod>,
    #[serde(default)]
    pub splits: Option<Vec<Split>>,
    #[serde(default)]
    pub frequency: Option<String>,
    #[serde(default)]
    pub cron_expression: Option<String>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<Option<DateTime<Utc>>>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl RecurringPaymentUpdate {
    /// Applies the update, or leaves `payment` untouched on error.
    ///
    /// The next execution date is recomputed from the start date whenever
    /// the frequency, cron expression or start date changes.
    ///
    /// # Errors
    ///
    /// The same validation as [`RecurringPaymentRequest::into_recurring_payment`].
    pub fn apply(self, payment: &mut RecurringPayment) -> Result<(), RecurringError> {
        let mut updated = payment.clone();
        let reschedule =
            self.frequency.is_some() || self.cron_expression.is_some() || self.start_date.is_some();

        if let Some(title) = self.title {
            updated.title = title.trim().to_string();
        }
        if let Some(description) = self.description {
            updated.description = description;
        }
        if let Some(amount) = self.amount {
            updated.amount = amount;
        }
        if let Some(paid_by) = self.paid_by {
            updated.paid_by = paid_by.trim().to_string();
        }
        if let Some(category) = self.category {
            updated.category = category;
        }
        if let Some(split_method) = self.split_method {
            updated.split_method = split_method;
        }
        if let Some(splits) = self.splits {
            updated.splits = splits;
        }
        if self.frequency.is_some() || self.cron_expression.is_some() {
            let name = self
                .frequency
                .as_deref()
                .unwrap_or_else(|| updated.frequency.name());
            let expression = self
                .cron_expression
                .as_deref()
                .or_else(|| updated.frequency.cron_expression());
            updated.frequency = Frequency::from_parts(name, expression)?;
        }
        if let Some(start_date) = self.start_date {
            updated.start_date = start_date;
        }
        if let Some(end_date) = self.end_date {
            updated.end_date = end_date;
        }
        if let Some(is_active) = self.is_active {
            updated.is_active = is_active;
        }

        validate(
            &updated.title,
            updated.amount,
            &updated.paid_by,
            updated.split_method,
            &updated.splits,
        )?;

        if reschedule {
            updated.next_execution_date = updated.next_execution_after(updated.start_date)?;
        }

        *payment = updated;
        Ok(())
    }
}

/// A short human readable description of when `date` happens relative to
/// `now`.
#[must_use]
pub fn format_next_execution<Tz: TimeZone>(date: &DateTime<Tz>, now: &DateTime<Tz>) -> String
where
    Tz::Offset: fmt::Display,
{
    let difference = date.clone().signed_duration_since(now.clone());
    let days = difference.num_milliseconds().div_euclid(TimeDelta::days(1).num_milliseconds());
    let time = date.format("%H:%M");

    match days {
        0 => format!("Today at {time}"),
        1 => format!("Tomorrow at {time}"),
        2..=6 => format!("In {days} days at {time}"),
        _ => date.format("%-d. %b %Y, %H:%M").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, FixedOffset, LocalResult, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};

    use super::*;

    fn request() -> RecurringPaymentRequest {
        RecurringPaymentRequest {
            title: "Rent".to_string(),
            amount: 1200.0,
            paid_by: "alice".to_string(),
            split_method: SplitMethod::Equal,
            splits: vec![
                Split {
                    username: "alice".to_string(),
                    amount: Some(-600.0),
                    ..Split::default()
                },
                Split {
                    username: "bob".to_string(),
                    amount: Some(600.0),
                    ..Split::default()
                },
            ],
            frequency: "monthly".to_string(),
            created_by: "alice".to_string(),
            ..RecurringPaymentRequest::default()
        }
    }

    #[test]
    fn daily_weekly_monthly() -> anyhow::Result<()> {
        let from = Utc.with_ymd_and_hms(2024, 1, 31, 18, 30, 0).unwrap();

        assert_eq!(
            Frequency::Daily.next_execution_date(&from)?,
            Utc.with_ymd_and_hms(2024, 2, 1, 18, 30, 0).unwrap()
        );
        assert_eq!(
            Frequency::Weekly.next_execution_date(&from)?,
            Utc.with_ymd_and_hms(2024, 2, 7, 18, 30, 0).unwrap()
        );
        assert_eq!(
            Frequency::Monthly.next_execution_date(&from)?,
            Utc.with_ymd_and_hms(2024, 2, 29, 18, 30, 0).unwrap()
        );
        Ok(())
    }

    #[test]
    fn next_date_is_always_later() -> anyhow::Result<()> {
        let frequencies = [
            Frequency::Daily,
            Frequency::Weekly,
            Frequency::Monthly,
            "custom */5 * * * *".parse()?,
            "custom 0 0 1 1 *".parse()?,
        ];
        let references = [
            Utc.with_ymd_and_hms(2024, 2, 29, 23, 59, 59).unwrap(),
            Utc.with_ymd_and_hms(2023, 12, 31, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 6, 15, 12, 5, 0).unwrap(),
        ];

        for frequency in &frequencies {
            for reference in &references {
                let next = frequency.next_execution_date(reference)?;
                assert!(next > *reference, "{frequency} from {reference}");
            }
        }
        Ok(())
    }

    /// Central European time in 2025, summer time from 30 March to 26 October.
    #[derive(Clone, Copy, Debug)]
    struct Zurich;

    impl Zurich {
        fn hours(hours: i32) -> FixedOffset {
            FixedOffset::east_opt(hours * 3600).unwrap()
        }

        fn summer(utc: &NaiveDateTime) -> bool {
            let start = NaiveDate::from_ymd_opt(2025, 3, 30).and_then(|day| day.and_hms_opt(1, 0, 0));
            let end = NaiveDate::from_ymd_opt(2025, 10, 26).and_then(|day| day.and_hms_opt(1, 0, 0));
            start.is_some_and(|start| *utc >= start) && end.is_some_and(|end| *utc < end)
        }
    }

    impl TimeZone for Zurich {
        type Offset = FixedOffset;

        fn from_offset(_: &FixedOffset) -> Self {
            Zurich
        }

        fn offset_from_local_date(&self, local: &NaiveDate) -> LocalResult<FixedOffset> {
            self.offset_from_local_datetime(&local.and_time(NaiveTime::MIN))
        }

        fn offset_from_local_datetime(&self, local: &NaiveDateTime) -> LocalResult<FixedOffset> {
            let valid: Vec<_> = [2, 1]
                .into_iter()
                .map(Self::hours)
                .filter(|offset| {
                    let utc = *local - TimeDelta::seconds(i64::from(offset.local_minus_utc()));
                    self.offset_from_utc_datetime(&utc) == *offset
                })
                .collect();

            match valid[..] {
                [] => LocalResult::None,
                [offset] => LocalResult::Single(offset),
                [earliest, latest, ..] => LocalResult::Ambiguous(earliest, latest),
            }
        }

        fn offset_from_utc_date(&self, utc: &NaiveDate) -> FixedOffset {
            self.offset_from_utc_datetime(&utc.and_time(NaiveTime::MIN))
        }

        fn offset_from_utc_datetime(&self, utc: &NaiveDateTime) -> FixedOffset {
            Self::hours(if Self::summer(utc) { 2 } else { 1 })
        }
    }

    #[test]
    fn clock_changes_do_not_stop_the_schedule() -> anyhow::Result<()> {
        // 02:30 happens twice on 26 October.
        let from = Zurich.with_ymd_and_hms(2025, 9, 26, 2, 30, 0).unwrap();
        let next = Frequency::Monthly.next_execution_date(&from)?;
        assert_eq!(
            next.naive_local(),
            NaiveDate::from_ymd_opt(2025, 10, 26)
                .unwrap()
                .and_hms_opt(2, 30, 0)
                .unwrap()
        );
        assert_eq!(next.offset().local_minus_utc(), 2 * 3600);

        // 02:30 never happens on 30 March.
        let from = Zurich.with_ymd_and_hms(2025, 3, 29, 2, 30, 0).unwrap();
        let next = Frequency::Daily.next_execution_date(&from)?;
        assert_eq!(next - from, TimeDelta::days(1));
        assert_eq!(next.naive_local().time(), NaiveTime::from_hms_opt(3, 30, 0).unwrap());

        let from = Zurich.with_ymd_and_hms(2025, 3, 23, 2, 30, 0).unwrap();
        let next = Frequency::Weekly.next_execution_date(&from)?;
        assert_eq!(next - from, TimeDelta::days(7));
        Ok(())
    }

    #[test]
    fn frequency_parsing() -> anyhow::Result<()> {
        assert_eq!("daily".parse::<Frequency>()?, Frequency::Daily);
        assert_eq!(
            Frequency::from_parts("custom", Some("0 9 * * 1"))?.to_string(),
            "custom 0 9 * * 1"
        );

        assert!(matches!(
            Frequency::from_parts("hourly", None),
            Err(RecurringError::InvalidFrequency(_))
        ));
        assert!(matches!(
            Frequency::from_parts("custom", None),
            Err(RecurringError::CronRequired)
        ));
        assert!(matches!(
            Frequency::from_parts("custom", Some("   ")),
            Err(RecurringError::CronRequired)
        ));
        assert!(matches!(
            Frequency::from_parts("custom", Some("61 * * * *")),
            Err(RecurringError::Cron(_))
        ));
        Ok(())
    }

    #[test]
    fn descriptions() -> anyhow::Result<()> {
        assert_eq!(Frequency::Weekly.description(), "Every week");
        assert_eq!(
            "custom 0 9 * * 1".parse::<Frequency>()?.description(),
            "Custom: 0 9 * * 1"
        );
        Ok(())
    }

    #[test]
    fn create_computes_first_execution() -> anyhow::Result<()> {
        let now = Utc.with_ymd_and_hms(2024, 4, 10, 8, 0, 0).unwrap();
        let payment = request().into_recurring_payment(now)?;

        assert!(payment.is_active);
        assert_eq!(payment.currency, "CHF");
        assert_eq!(payment.category, Category::Groceries);
        assert_eq!(payment.start_date, now);
        assert!(payment.next_execution_date > now);
        assert_eq!(payment.next_execution_date.day(), 10);
        Ok(())
    }

    #[test]
    fn create_rejects_bad_requests() {
        let now = Utc::now();

        let mut bad = request();
        bad.amount = 0.0;
        assert!(bad.into_recurring_payment(now).is_err());

        let mut bad = request();
        bad.title = "  ".to_string();
        assert!(bad.into_recurring_payment(now).is_err());

        let mut bad = request();
        bad.frequency = "custom".to_string();
        bad.cron_expression = Some("0 9 * *".to_string());
        assert!(bad.into_recurring_payment(now).is_err());

        let mut bad = request();
        bad.split_method = SplitMethod::PersonalEqual;
        bad.splits[0].personal_amount = Some(1000.0);
        bad.splits[1].personal_amount = Some(300.0);
        assert!(bad.into_recurring_payment(now).is_err());
    }

    #[test]
    fn due_respects_active_and_end_date() -> anyhow::Result<()> {
        let now = Utc.with_ymd_and_hms(2024, 4, 10, 8, 0, 0).unwrap();
        let mut payment = request().into_recurring_payment(now - TimeDelta::days(40))?;

        assert!(payment.is_due(now));

        payment.end_date = Some(now - TimeDelta::minutes(1));
        assert!(!payment.is_due(now));

        payment.end_date = Some(now);
        assert!(payment.is_due(now));

        payment.is_active = false;
        assert!(!payment.is_due(now));
        Ok(())
    }

    #[test]
    fn update_reschedules_on_frequency_change() -> anyhow::Result<()> {
        let now = Utc.with_ymd_and_hms(2024, 4, 10, 8, 0, 0).unwrap();
        let mut payment = request().into_recurring_payment(now)?;

        RecurringPaymentUpdate {
            frequency: Some("custom".to_string()),
            cron_expression: Some("15 7 * * *".to_string()),
            ..RecurringPaymentUpdate::default()
        }
        .apply(&mut payment)?;

        assert_eq!(payment.frequency.name(), "custom");
        let local = payment.next_execution_date.with_timezone(&Local);
        assert_eq!((local.hour(), local.minute()), (7, 15));
        Ok(())
    }

    #[test]
    fn failed_update_changes_nothing() -> anyhow::Result<()> {
        let now = Utc.with_ymd_and_hms(2024, 4, 10, 8, 0, 0).unwrap();
        let mut payment = request().into_recurring_payment(now)?;
        let before = payment.clone();

        let result = RecurringPaymentUpdate {
            title: Some("Groceries".to_string()),
            amount: Some(-5.0),
            ..RecurringPaymentUpdate::default()
        }
        .apply(&mut payment);

        assert!(result.is_err());
        assert_eq!(payment, before);
        Ok(())
    }

    #[test]
    fn descriptions_can_be_cleared() -> anyhow::Result<()> {
        let now = Utc.with_ymd_and_hms(2024, 4, 10, 8, 0, 0).unwrap();
        let mut payment = request().into_recurring_payment(now)?;

        RecurringPaymentUpdate {
            description: Some(Some("Flat on Main Street".to_string())),
            ..RecurringPaymentUpdate::default()
        }
        .apply(&mut payment)?;
        assert_eq!(payment.description.as_deref(), Some("Flat on Main Street"));

        RecurringPaymentUpdate::default().apply(&mut payment)?;
        assert_eq!(payment.description.as_deref(), Some("Flat on Main Street"));

        let update: RecurringPaymentUpdate = ron::from_str("(description: Some(None))")?;
        update.apply(&mut payment)?;
        assert_eq!(payment.description, None);
        Ok(())
    }

    #[test]
    fn relative_formatting() {
        let now = Utc.with_ymd_and_hms(2024, 4, 10, 8, 0, 0).unwrap();

        assert_eq!(
            format_next_execution(&(now + TimeDelta::hours(2)), &now),
            "Today at 10:00"
        );
        assert_eq!(
            format_next_execution(&(now + TimeDelta::hours(25)), &now),
            "Tomorrow at 09:00"
        );
        assert_eq!(
            format_next_execution(&(now + TimeDelta::days(3)), &now),
            "In 3 days at 08:00"
        );
        assert_eq!(
            format_next_execution(&(now + TimeDelta::days(30)), &now),
            "10. May 2024, 08:00"
        );
    }
}
