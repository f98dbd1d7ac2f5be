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

//! Turns due recurring payments into payments, once a minute.

use std::{
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
        mpsc::{self, RecvTimeoutError, Sender},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use chrono::{DateTime, TimeDelta, Timelike, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    Id,
    payment::{Payment, PaymentKey},
    recurring::{RecurringError, RecurringPayment},
    store::{Store, StoreError},
};

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct TickReport {
    pub executed: usize,
    pub failed: usize,
    pub results: Vec<ExecutionResult>,
}

/// What happened to one due recurring payment.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub recurring_payment_id: Id,
    pub payment_id: Option<Id>,
    pub title: String,
    pub amount: f64,
    pub next_execution_date: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    pub is_running: bool,
    pub is_scheduled: bool,
    pub next_run: Option<DateTime<Utc>>,
}

struct Shared<S> {
    store: Arc<Mutex<S>>,
    running: AtomicBool,
    next_run: Mutex<Option<DateTime<Utc>>>,
}

struct Task {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Clears the running flag when the tick ends, however it ends.
struct Running<'a>(&'a AtomicBool);

impl<'a> Running<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn lock<S>(store: &Mutex<S>) -> Result<MutexGuard<'_, S>, StoreError> {
    store
        .lock()
        .map_err(|_| StoreError::Unavailable("the store lock is poisoned".to_string()))
}

pub struct Scheduler<S: Store + Send + 'static> {
    shared: Arc<Shared<S>>,
    task: Option<Task>,
}

impl<S: Store + Send + 'static> Scheduler<S> {
    #[must_use]
    pub fn new(store: Arc<Mutex<S>>) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                running: AtomicBool::new(false),
                next_run: Mutex::new(None),
            }),
            task: None,
        }
    }

    #[must_use]
    pub fn store(&self) -> Arc<Mutex<S>> {
        Arc::clone(&self.shared.store)
    }

    /// Spawns the background thread, which ticks at the start of every
    /// minute until [`Scheduler::stop`] is called. Calling it twice does
    /// nothing.
    pub fn start(&mut self) {
        if self.task.is_some() {
            warn!("the scheduler is already started");
            return;
        }

        let (stop, rx) = mpsc::channel();
        let shared = Arc::clone(&self.shared);

        let handle = thread::spawn(move || {
            loop {
                let now = Utc::now();
                let wait = until_next_minute(now);
                shared.set_next_run(Some(now + TimeDelta::from_std(wait).unwrap_or(TimeDelta::zero())));

                match rx.recv_timeout(wait) {
                    Err(RecvTimeoutError::Timeout) => {
                        shared.process(Utc::now());
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }

            shared.set_next_run(None);
            debug!("the scheduler thread exited");
        });

        info!("the scheduler started");
        self.task = Some(Task { stop, handle });
    }

    /// Signals the background thread and waits for it to exit.
    pub fn stop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };

        // The thread also exits when the sender is dropped.
        let _ = task.stop.send(());
        if task.handle.join().is_err() {
            error!("the scheduler thread panicked");
        }

        self.shared.set_next_run(None);
        info!("the scheduler stopped");
    }

    /// Runs one tick synchronously, or returns `None` if a tick is running.
    pub fn execute_now(&self) -> Option<TickReport> {
        self.process_recurring_payments(Utc::now())
    }

    /// Runs one tick as of `now`, or returns `None` if a tick is running.
    pub fn process_recurring_payments(&self, now: DateTime<Utc>) -> Option<TickReport> {
        self.shared.process(now)
    }

    #[must_use]
    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            is_running: self.shared.running.load(Ordering::Acquire),
            is_scheduled: self.task.is_some(),
            next_run: self.shared.next_run(),
        }
    }
}

impl<S: Store + Send + 'static> Drop for Scheduler<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<S: Store> Shared<S> {
    fn next_run(&self) -> Option<DateTime<Utc>> {
        self.next_run.lock().ok().and_then(|next_run| *next_run)
    }

    fn set_next_run(&self, next: Option<DateTime<Utc>>) {
        if let Ok(mut next_run) = self.next_run.lock() {
            *next_run = next;
        }
    }

    fn process(&self, now: DateTime<Utc>) -> Option<TickReport> {
        let Some(_running) = Running::acquire(&self.running) else {
            debug!("a tick is already running, skipping");
            return None;
        };

        let due = match lock(&self.store).and_then(|store| store.due_recurring_payments(now)) {
            Ok(due) => due,
            Err(error) => {
                error!("reading due recurring payments: {error}");
                return Some(TickReport::default());
            }
        };

        info!("processing {} due recurring payments", due.len());

        let mut report = TickReport::default();
        for recurring in &due {
            let (payment_id, outcome) = self.execute(recurring, now);

            let result = ExecutionResult {
                recurring_payment_id: recurring.id,
                payment_id,
                title: recurring.title.clone(),
                amount: recurring.amount,
                next_execution_date: None,
                error: None,
            };

            match outcome {
                Ok(next) => {
                    info!(
                        "executed recurring payment {} '{}', next execution {next}",
                        recurring.id, recurring.title
                    );
                    report.executed += 1;
                    report.results.push(ExecutionResult {
                        next_execution_date: Some(next),
                        ..result
                    });
                }
                Err(error) => {
                    error!("recurring payment {} '{}': {error}", recurring.id, recurring.title);
                    report.failed += 1;
                    report.results.push(ExecutionResult {
                        error: Some(error.to_string()),
                        ..result
                    });
                }
            }
        }

        info!(
            "tick finished: {} executed, {} failed",
            report.executed, report.failed
        );
        Some(report)
    }

    /// Materializes the payment unless this occurrence already has one, then
    /// advances the due date.
    fn execute(
        &self,
        recurring: &RecurringPayment,
        now: DateTime<Utc>,
    ) -> (Option<Id>, Result<DateTime<Utc>, RecurringError>) {
        let key = PaymentKey {
            recurring_payment_id: recurring.id,
            scheduled_for: recurring.next_execution_date,
        };

        let mut store = match lock(&self.store) {
            Ok(store) => store,
            Err(error) => return (None, Err(error.into())),
        };

        let payment_id = match store.payment_for_key(&key) {
            Ok(Some(payment_id)) => {
                warn!(
                    "recurring payment {} already has payment {payment_id} for {}",
                    recurring.id, key.scheduled_for
                );
                payment_id
            }
            Ok(None) => {
                let (payment, splits) = Payment::from_recurring(recurring, now);
                match store.insert_payment(payment, splits) {
                    Ok(payment_id) => payment_id,
                    Err(error) => return (None, Err(error.into())),
                }
            }
            Err(error) => return (None, Err(error.into())),
        };

        let outcome = recurring.next_execution_after(now).and_then(|next| {
            store.advance_recurring_payment(recurring.id, now, next)?;
            Ok(next)
        });

        (Some(payment_id), outcome)
    }
}

fn until_next_minute(now: DateTime<Utc>) -> Duration {
    let elapsed = Duration::new(u64::from(now.second()), now.nanosecond() % 1_000_000_000);
    Duration::from_secs(60).saturating_sub(elapsed)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use crate::{
        payment::PaymentSplit,
        recurring::{RecurringPaymentRequest, Split, SplitMethod},
        store::{Failure, MemoryStore},
        tournament::Tournament,
    };

    use super::*;

    fn request(title: &str, frequency: &str) -> RecurringPaymentRequest {
        RecurringPaymentRequest {
            title: title.to_string(),
            amount: 30.0,
            paid_by: "alice".to_string(),
            split_method: SplitMethod::Equal,
            splits: vec![
                Split {
                    username: "alice".to_string(),
                    amount: Some(15.0),
                    ..Split::default()
                },
                Split {
                    username: "bob".to_string(),
                    amount: Some(15.0),
                    ..Split::default()
                },
            ],
            frequency: frequency.to_string(),
            created_by: "alice".to_string(),
            ..RecurringPaymentRequest::default()
        }
    }

    fn scheduler() -> Scheduler<MemoryStore> {
        Scheduler::new(Arc::new(Mutex::new(MemoryStore::default())))
    }

    #[test]
    fn due_payments_are_executed() -> anyhow::Result<()> {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        let scheduler = scheduler();
        let id = {
            let store = scheduler.store();
            let mut store = store.lock().unwrap();
            store.insert_recurring_payment(
                request("Spotify", "weekly").into_recurring_payment(now - TimeDelta::days(20))?,
            )?;
            store.insert_recurring_payment(
                request("Later", "daily").into_recurring_payment(now)?,
            )?
        };

        let report = scheduler.process_recurring_payments(now).unwrap();
        assert_eq!((report.executed, report.failed), (1, 0));
        assert_ne!(report.results[0].recurring_payment_id, id);

        let store = scheduler.store();
        let store = store.lock().unwrap();
        let payments = store.payments()?;
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].created_by, "alice (Auto)");
        assert_eq!(store.splits_for(payments[0].id)?.len(), 2);

        let executed = store.recurring_payment(report.results[0].recurring_payment_id)?;
        assert_eq!(executed.last_execution_date, Some(now));
        assert!(executed.next_execution_date > now);
        assert_eq!(Some(executed.next_execution_date), report.results[0].next_execution_date);
        Ok(())
    }

    #[test]
    fn catch_up_is_computed_from_now() -> anyhow::Result<()> {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        let scheduler = scheduler();
        scheduler.store().lock().unwrap().insert_recurring_payment(
            request("Bread", "daily").into_recurring_payment(now - TimeDelta::days(10))?,
        )?;

        let report = scheduler.process_recurring_payments(now).unwrap();
        assert_eq!(report.executed, 1);

        // One payment, and the next date is tomorrow rather than nine days ago.
        let next = report.results[0].next_execution_date.unwrap();
        assert!(next > now);
        assert!(next <= now + TimeDelta::days(1) + TimeDelta::hours(1));

        let report = scheduler.process_recurring_payments(now).unwrap();
        assert_eq!(report.executed, 0);
        assert_eq!(scheduler.store().lock().unwrap().payments()?.len(), 1);
        Ok(())
    }

    #[test]
    fn one_failure_does_not_abort_the_batch() -> anyhow::Result<()> {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        let scheduler = scheduler();
        let (failing, passing) = {
            let store = scheduler.store();
            let mut store = store.lock().unwrap();
            let failing = store.insert_recurring_payment(
                request("Gym", "monthly").into_recurring_payment(now - TimeDelta::days(40))?,
            )?;
            let passing = store.insert_recurring_payment(
                request("Phone", "monthly").into_recurring_payment(now - TimeDelta::days(35))?,
            )?;
            store.fail(Failure::AdvanceRecurring(failing));
            (failing, passing)
        };

        let report = scheduler.process_recurring_payments(now).unwrap();
        assert_eq!((report.executed, report.failed), (1, 1));

        let failed = report
            .results
            .iter()
            .find(|result| result.recurring_payment_id == failing)
            .unwrap();
        assert!(failed.error.is_some());
        assert!(failed.payment_id.is_some());
        assert!(
            report
                .results
                .iter()
                .any(|result| result.recurring_payment_id == passing && result.error.is_none())
        );

        // The retry reuses the payment created before the failure.
        scheduler.store().lock().unwrap().heal();
        let report = scheduler.process_recurring_payments(now).unwrap();
        assert_eq!((report.executed, report.failed), (1, 0));
        assert_eq!(report.results[0].payment_id, failed.payment_id);
        assert_eq!(scheduler.store().lock().unwrap().payments()?.len(), 2);
        Ok(())
    }

    #[test]
    fn insert_failure_creates_nothing() -> anyhow::Result<()> {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        let scheduler = scheduler();
        {
            let store = scheduler.store();
            let mut store = store.lock().unwrap();
            let id = store.insert_recurring_payment(
                request("Water", "weekly").into_recurring_payment(now - TimeDelta::days(8))?,
            )?;
            store.fail(Failure::InsertPaymentFor(id));
        }

        let report = scheduler.process_recurring_payments(now).unwrap();
        assert_eq!((report.executed, report.failed), (0, 1));
        assert_eq!(report.results[0].payment_id, None);
        assert!(scheduler.store().lock().unwrap().payments()?.is_empty());
        Ok(())
    }

    #[test]
    fn overlapping_tick_is_skipped() {
        let scheduler = scheduler();
        let running = Running::acquire(&scheduler.shared.running).unwrap();

        assert!(scheduler.execute_now().is_none());
        assert!(scheduler.status().is_running);

        drop(running);
        assert!(scheduler.execute_now().is_some());
        assert!(!scheduler.status().is_running);
    }

    /// Holds every tick inside the due query until it is released.
    struct SlowStore {
        inner: MemoryStore,
        entered: mpsc::Sender<()>,
        release: mpsc::Receiver<()>,
    }

    impl Store for SlowStore {
        fn due_recurring_payments(&self, now: DateTime<Utc>) -> Result<Vec<RecurringPayment>, StoreError> {
            self.entered.send(()).unwrap();
            self.release.recv().unwrap();
            self.inner.due_recurring_payments(now)
        }

        fn recurring_payment(&self, id: Id) -> Result<RecurringPayment, StoreError> {
            self.inner.recurring_payment(id)
        }

        fn recurring_payments(&self, active_only: bool) -> Result<Vec<RecurringPayment>, StoreError> {
            self.inner.recurring_payments(active_only)
        }

        fn insert_recurring_payment(&mut self, payment: RecurringPayment) -> Result<Id, StoreError> {
            self.inner.insert_recurring_payment(payment)
        }

        fn update_recurring_payment(&mut self, payment: RecurringPayment) -> Result<(), StoreError> {
            self.inner.update_recurring_payment(payment)
        }

        fn delete_recurring_payment(&mut self, id: Id) -> Result<(), StoreError> {
            self.inner.delete_recurring_payment(id)
        }

        fn advance_recurring_payment(
            &mut self,
            id: Id,
            last: DateTime<Utc>,
            next: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            self.inner.advance_recurring_payment(id, last, next)
        }

        fn payment_for_key(&self, key: &PaymentKey) -> Result<Option<Id>, StoreError> {
            self.inner.payment_for_key(key)
        }

        fn insert_payment(&mut self, payment: Payment, splits: Vec<PaymentSplit>) -> Result<Id, StoreError> {
            self.inner.insert_payment(payment, splits)
        }

        fn payments(&self) -> Result<Vec<Payment>, StoreError> {
            self.inner.payments()
        }

        fn splits_for(&self, payment_id: Id) -> Result<Vec<PaymentSplit>, StoreError> {
            self.inner.splits_for(payment_id)
        }

        fn tournament(&self, id: Id) -> Result<Tournament, StoreError> {
            self.inner.tournament(id)
        }

        fn tournaments(&self) -> Result<Vec<Tournament>, StoreError> {
            self.inner.tournaments()
        }

        fn insert_tournament(&mut self, tournament: Tournament) -> Result<Id, StoreError> {
            self.inner.insert_tournament(tournament)
        }

        fn save_tournament(&mut self, tournament: Tournament) -> Result<(), StoreError> {
            self.inner.save_tournament(tournament)
        }

        fn delete_tournament(&mut self, id: Id) -> Result<(), StoreError> {
            self.inner.delete_tournament(id)
        }
    }

    #[test]
    fn a_tick_in_flight_blocks_other_ticks() -> anyhow::Result<()> {
        let (entered, entered_rx) = mpsc::channel();
        let (release_tx, release) = mpsc::channel();

        let mut inner = MemoryStore::default();
        inner.insert_recurring_payment(
            request("Water", "daily").into_recurring_payment(Utc::now() - TimeDelta::days(2))?,
        )?;

        let scheduler = Arc::new(Scheduler::new(Arc::new(Mutex::new(SlowStore {
            inner,
            entered,
            release,
        }))));

        let first = thread::spawn({
            let scheduler = Arc::clone(&scheduler);
            move || scheduler.execute_now()
        });

        entered_rx.recv()?;
        assert!(scheduler.status().is_running);
        assert!(scheduler.execute_now().is_none());
        assert!(scheduler.process_recurring_payments(Utc::now()).is_none());

        release_tx.send(())?;
        let report = first.join().unwrap().unwrap();
        assert_eq!((report.executed, report.failed), (1, 0));
        assert!(!scheduler.status().is_running);

        assert_eq!(scheduler.store().lock().unwrap().inner.payments()?.len(), 1);
        Ok(())
    }

    #[test]
    fn start_and_stop() {
        let mut scheduler = scheduler();
        assert!(!scheduler.status().is_scheduled);

        scheduler.start();
        assert!(scheduler.status().is_scheduled);

        scheduler.stop();
        let status = scheduler.status();
        assert!(!status.is_scheduled);
        assert_eq!(status.next_run, None);
    }

    #[test]
    fn waits_until_the_next_minute() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 45).unwrap();
        assert_eq!(until_next_minute(now), Duration::from_secs(15));
    }
}
