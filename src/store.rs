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

//! Persistence for recurring payments, payments and tournaments.

use std::{collections::BTreeMap, fs, path::Path};

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    Id,
    payment::{Payment, PaymentKey, PaymentSplit},
    recurring::RecurringPayment,
    tournament::Tournament,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: Id },
    #[error("a payment for recurring payment {} at {} already exists", .0.recurring_payment_id, .0.scheduled_for)]
    Duplicate(PaymentKey),
    #[error("the store is unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Ron(#[from] ron::Error),
    #[error(transparent)]
    RonSpanned(#[from] ron::error::SpannedError),
}

/// The document store behind the scheduler and the server.
pub trait Store {
    /// Active payments whose next execution date has passed and whose end
    /// date, if any, has not, ordered by next execution date.
    ///
    /// # Errors
    ///
    /// If the store cannot be read.
    fn due_recurring_payments(&self, now: DateTime<Utc>) -> Result<Vec<RecurringPayment>, StoreError>;

    /// # Errors
    ///
    /// If the payment does not exist.
    fn recurring_payment(&self, id: Id) -> Result<RecurringPayment, StoreError>;

    /// Ordered by next execution date.
    ///
    /// # Errors
    ///
    /// If the store cannot be read.
    fn recurring_payments(&self, active_only: bool) -> Result<Vec<RecurringPayment>, StoreError>;

    /// Assigns and returns a new id.
    ///
    /// # Errors
    ///
    /// If the store cannot be written.
    fn insert_recurring_payment(&mut self, payment: RecurringPayment) -> Result<Id, StoreError>;

    /// # Errors
    ///
    /// If the payment does not exist.
    fn update_recurring_payment(&mut self, payment: RecurringPayment) -> Result<(), StoreError>;

    /// # Errors
    ///
    /// If the payment does not exist.
    fn delete_recurring_payment(&mut self, id: Id) -> Result<(), StoreError>;

    /// Records an execution: sets the last and next execution dates.
    ///
    /// # Errors
    ///
    /// If the payment does not exist or the store cannot be written.
    fn advance_recurring_payment(
        &mut self,
        id: Id,
        last: DateTime<Utc>,
        next: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// # Errors
    ///
    /// If the store cannot be read.
    fn payment_for_key(&self, key: &PaymentKey) -> Result<Option<Id>, StoreError>;

    /// Stores a payment and its splits, assigning ids.
    ///
    /// # Errors
    ///
    /// If a payment with the same key exists or the store cannot be written.
    fn insert_payment(&mut self, payment: Payment, splits: Vec<PaymentSplit>) -> Result<Id, StoreError>;

    /// Newest first.
    ///
    /// # Errors
    ///
    /// If the store cannot be read.
    fn payments(&self) -> Result<Vec<Payment>, StoreError>;

    /// # Errors
    ///
    /// If the store cannot be read.
    fn splits_for(&self, payment_id: Id) -> Result<Vec<PaymentSplit>, StoreError>;

    /// # Errors
    ///
    /// If the tournament does not exist.
    fn tournament(&self, id: Id) -> Result<Tournament, StoreError>;

    /// Newest first.
    ///
    /// # Errors
    ///
    /// If the store cannot be read.
    fn tournaments(&self) -> Result<Vec<Tournament>, StoreError>;

    /// Assigns and returns a new id.
    ///
    /// # Errors
    ///
    /// If the store cannot be written.
    fn insert_tournament(&mut self, tournament: Tournament) -> Result<Id, StoreError>;

    /// # Errors
    ///
    /// If the tournament does not exist.
    fn save_tournament(&mut self, tournament: Tournament) -> Result<(), StoreError>;

    /// # Errors
    ///
    /// If the tournament does not exist.
    fn delete_tournament(&mut self, id: Id) -> Result<(), StoreError>;
}

/// Makes a [`MemoryStore`] operation fail, for exercising error paths.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Failure {
    AdvanceRecurring(Id),
    InsertPaymentFor(Id),
    ReadDue,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct MemoryStore {
    #[serde(default)]
    next_id: Id,
    #[serde(default)]
    recurring_payments: BTreeMap<Id, RecurringPayment>,
    #[serde(default)]
    payments: BTreeMap<Id, Payment>,
    #[serde(default)]
    splits: BTreeMap<Id, PaymentSplit>,
    #[serde(default)]
    tournaments: BTreeMap<Id, Tournament>,
    #[serde(skip)]
    failures: Vec<Failure>,
}

impl MemoryStore {
    /// # Errors
    ///
    /// If the file cannot be read or is not a valid store.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let string = fs::read_to_string(path)?;
        let store: Self = ron::from_str(&string)?;
        debug!(
            "loaded {} recurring payments, {} payments and {} tournaments",
            store.recurring_payments.len(),
            store.payments.len(),
            store.tournaments.len()
        );

        Ok(store)
    }

    /// # Errors
    ///
    /// If the store cannot be serialized or the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let string = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        fs::write(path, string)?;

        Ok(())
    }

    pub fn fail(&mut self, failure: Failure) {
        self.failures.push(failure);
    }

    pub fn heal(&mut self) {
        self.failures.clear();
    }

    fn check(&self, failure: Failure) -> Result<(), StoreError> {
        if self.failures.contains(&failure) {
            return Err(StoreError::Unavailable(format!("{failure:?}")));
        }

        Ok(())
    }

    fn next_id(&mut self) -> Id {
        self.next_id += 1;
        self.next_id
    }
}

impl Store for MemoryStore {
    fn due_recurring_payments(&self, now: DateTime<Utc>) -> Result<Vec<RecurringPayment>, StoreError> {
        self.check(Failure::ReadDue)?;

        let mut due: Vec<_> = self
            .recurring_payments
            .values()
            .filter(|payment| payment.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|payment| payment.next_execution_date);

        Ok(due)
    }

    fn recurring_payment(&self, id: Id) -> Result<RecurringPayment, StoreError> {
        self.recurring_payments
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound {
                kind: "recurring payment",
                id,
            })
    }

    fn recurring_payments(&self, active_only: bool) -> Result<Vec<RecurringPayment>, StoreError> {
        let mut payments: Vec<_> = self
            .recurring_payments
            .values()
            .filter(|payment| !active_only || payment.is_active)
            .cloned()
            .collect();
        payments.sort_by_key(|payment| payment.next_execution_date);

        Ok(payments)
    }

    fn insert_recurring_payment(&mut self, mut payment: RecurringPayment) -> Result<Id, StoreError> {
        let id = self.next_id();
        payment.id = id;
        self.recurring_payments.insert(id, payment);

        Ok(id)
    }

    fn update_recurring_payment(&mut self, payment: RecurringPayment) -> Result<(), StoreError> {
        let Some(stored) = self.recurring_payments.get_mut(&payment.id) else {
            return Err(StoreError::NotFound {
                kind: "recurring payment",
                id: payment.id,
            });
        };
        *stored = payment;

        Ok(())
    }

    fn delete_recurring_payment(&mut self, id: Id) -> Result<(), StoreError> {
        self.recurring_payments
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound {
                kind: "recurring payment",
                id,
            })
    }

    fn advance_recurring_payment(
        &mut self,
        id: Id,
        last: DateTime<Utc>,
        next: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.check(Failure::AdvanceRecurring(id))?;

        let Some(payment) = self.recurring_payments.get_mut(&id) else {
            return Err(StoreError::NotFound {
                kind: "recurring payment",
                id,
            });
        };
        payment.last_execution_date = Some(last);
        payment.next_execution_date = next;

        Ok(())
    }

    fn payment_for_key(&self, key: &PaymentKey) -> Result<Option<Id>, StoreError> {
        Ok(self
            .payments
            .values()
            .find(|payment| payment.source.as_ref() == Some(key))
            .map(|payment| payment.id))
    }

    fn insert_payment(&mut self, mut payment: Payment, splits: Vec<PaymentSplit>) -> Result<Id, StoreError> {
        if let Some(key) = payment.source {
            self.check(Failure::InsertPaymentFor(key.recurring_payment_id))?;

            if self.payment_for_key(&key)?.is_some() {
                return Err(StoreError::Duplicate(key));
            }
        }

        let id = self.next_id();
        payment.id = id;
        self.payments.insert(id, payment);

        for mut split in splits {
            let split_id = self.next_id();
            split.id = split_id;
            split.payment_id = id;
            self.splits.insert(split_id, split);
        }

        Ok(id)
    }

    fn payments(&self) -> Result<Vec<Payment>, StoreError> {
        Ok(self.payments.values().rev().cloned().collect())
    }

    fn splits_for(&self, payment_id: Id) -> Result<Vec<PaymentSplit>, StoreError> {
        Ok(self
            .splits
            .values()
            .filter(|split| split.payment_id == payment_id)
            .cloned()
            .collect())
    }

    fn tournament(&self, id: Id) -> Result<Tournament, StoreError> {
        self.tournaments
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound {
                kind: "tournament",
                id,
            })
    }

    fn tournaments(&self) -> Result<Vec<Tournament>, StoreError> {
        Ok(self.tournaments.values().rev().cloned().collect())
    }

    fn insert_tournament(&mut self, mut tournament: Tournament) -> Result<Id, StoreError> {
        let id = self.next_id();
        tournament.id = id;
        self.tournaments.insert(id, tournament);

        Ok(id)
    }

    fn save_tournament(&mut self, tournament: Tournament) -> Result<(), StoreError> {
        let Some(stored) = self.tournaments.get_mut(&tournament.id) else {
            return Err(StoreError::NotFound {
                kind: "tournament",
                id: tournament.id,
            });
        };
        *stored = tournament;

        Ok(())
    }

    fn delete_tournament(&mut self, id: Id) -> Result<(), StoreError> {
        self.tournaments
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound {
                kind: "tournament",
                id,
            })
    }
}

#[cfg(test)]
mod tests {
    use std::env;

    use chrono::{TimeDelta, TimeZone, Utc};

    use crate::recurring::{RecurringPaymentRequest, Split, SplitMethod};

    use super::*;

    fn recurring(now: DateTime<Utc>) -> anyhow::Result<RecurringPayment> {
        Ok(RecurringPaymentRequest {
            title: "Netflix".to_string(),
            amount: 20.0,
            paid_by: "alice".to_string(),
            split_method: SplitMethod::Full,
            splits: vec![Split {
                username: "bob".to_string(),
                amount: Some(20.0),
                ..Split::default()
            }],
            frequency: "daily".to_string(),
            created_by: "alice".to_string(),
            ..RecurringPaymentRequest::default()
        }
        .into_recurring_payment(now)?)
    }

    #[test]
    fn due_query_filters() -> anyhow::Result<()> {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let mut store = MemoryStore::default();

        let due = store.insert_recurring_payment(recurring(now - TimeDelta::days(3))?)?;
        store.insert_recurring_payment(recurring(now)?)?;

        let mut inactive = recurring(now - TimeDelta::days(3))?;
        inactive.is_active = false;
        store.insert_recurring_payment(inactive)?;

        let mut ended = recurring(now - TimeDelta::days(3))?;
        ended.end_date = Some(now - TimeDelta::days(1));
        store.insert_recurring_payment(ended)?;

        let ids: Vec<_> = store
            .due_recurring_payments(now)?
            .iter()
            .map(|payment| payment.id)
            .collect();
        assert_eq!(ids, vec![due]);
        assert_eq!(store.recurring_payments(true)?.len(), 3);
        assert_eq!(store.recurring_payments(false)?.len(), 4);
        Ok(())
    }

    #[test]
    fn one_payment_per_key() -> anyhow::Result<()> {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let mut store = MemoryStore::default();
        let id = store.insert_recurring_payment(recurring(now - TimeDelta::days(3))?)?;
        let template = store.recurring_payment(id)?;

        let (payment, splits) = Payment::from_recurring(&template, now);
        let key = payment.source.unwrap();
        let payment_id = store.insert_payment(payment.clone(), splits.clone())?;

        assert_eq!(store.payment_for_key(&key)?, Some(payment_id));
        assert!(matches!(
            store.insert_payment(payment, splits),
            Err(StoreError::Duplicate(_))
        ));
        assert_eq!(store.payments()?.len(), 1);

        let splits = store.splits_for(payment_id)?;
        assert_eq!(splits.len(), 1);
        assert_eq!(splits[0].payment_id, payment_id);
        Ok(())
    }

    #[test]
    fn not_found() {
        let mut store = MemoryStore::default();

        assert!(matches!(
            store.recurring_payment(3),
            Err(StoreError::NotFound { id: 3, .. })
        ));
        assert!(store.delete_tournament(1).is_err());
    }

    #[test]
    fn save_and_load() -> anyhow::Result<()> {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let mut store = MemoryStore::default();
        let id = store.insert_recurring_payment(recurring(now)?)?;

        let path = env::temp_dir().join(format!("household-store-{}.ron", std::process::id()));
        store.save(&path)?;
        let loaded = MemoryStore::load(&path)?;
        fs::remove_file(&path)?;

        assert_eq!(loaded.recurring_payment(id)?, store.recurring_payment(id)?);
        Ok(())
    }
}
