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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    Id,
    recurring::{Category, RecurringPayment, SplitMethod},
};

const AUTO_GENERATED: &str = "Auto-generated from recurring payment";

/// Identifies the payment generated for one occurrence of a recurring
/// payment. A store holds at most one payment per key.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct PaymentKey {
    pub recurring_payment_id: Id,
    pub scheduled_for: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Payment {
    pub id: Id,
    pub title: String,
    pub description: String,
    pub amount: f64,
    pub currency: String,
    pub paid_by: String,
    pub category: Category,
    pub split_method: SplitMethod,
    pub created_by: String,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub source: Option<PaymentKey>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct PaymentSplit {
    pub id: Id,
    pub payment_id: Id,
    pub username: String,
    pub amount: f64,
    #[serde(default)]
    pub proportion: Option<f64>,
    #[serde(default)]
    pub personal_amount: Option<f64>,
    pub settled: bool,
}

impl Payment {
    /// Materializes the occurrence of `recurring` that was due at its
    /// current next execution date. The ids are assigned by the store.
    #[must_use]
    pub fn from_recurring(recurring: &RecurringPayment, now: DateTime<Utc>) -> (Self, Vec<PaymentSplit>) {
        let description = match recurring.description.as_deref().map(str::trim) {
            Some(description) if !description.is_empty() => {
                format!("{description} ({AUTO_GENERATED})")
            }
            _ => AUTO_GENERATED.to_string(),
        };

        let payment = Self {
            id: 0,
            title: recurring.title.clone(),
            description,
            amount: recurring.amount,
            currency: recurring.currency.clone(),
            paid_by: recurring.paid_by.clone(),
            category: recurring.category,
            split_method: recurring.split_method,
            created_by: format!("{} (Auto)", recurring.created_by),
            date: now,
            source: Some(PaymentKey {
                recurring_payment_id: recurring.id,
                scheduled_for: recurring.next_execution_date,
            }),
        };

        let splits = recurring
            .splits
            .iter()
            .map(|split| PaymentSplit {
                id: 0,
                payment_id: 0,
                username: split.username.clone(),
                amount: split.amount.unwrap_or(0.0),
                proportion: split.proportion,
                personal_amount: split.personal_amount,
                settled: false,
            })
            .collect();

        (payment, splits)
    }
}
