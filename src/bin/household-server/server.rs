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

use std::{
    path::PathBuf,
    process::exit,
    str::FromStr,
    sync::{
        Arc, Mutex, MutexGuard,
        mpsc::{self, Sender},
    },
    thread,
    time::Duration,
};

use chrono::Utc;
use household::{
    Id,
    message::{COMMANDS, Message},
    scheduler::Scheduler,
    store::{MemoryStore, Store},
    tournament::Tournament,
};
use log::{debug, error, info};
use serde::Serialize;

use crate::handle_error;

const HOUR_IN_SECONDS: u64 = 60 * 60;
const CREATED_BY: &str = "household-server";

/// A line from a client and where to send the reply. Lines without a reply
/// channel come from the server itself.
pub(crate) type Request = (String, Option<Sender<String>>);

pub(crate) struct Server {
    store: Arc<Mutex<MemoryStore>>,
    scheduler: Scheduler<MemoryStore>,
    data_file: Option<PathBuf>,
}

fn ron<T: Serialize>(value: &T) -> anyhow::Result<String> {
    Ok(ron::ser::to_string(value)?)
}

impl Server {
    pub(crate) fn new(store: MemoryStore, data_file: Option<PathBuf>) -> Self {
        let store = Arc::new(Mutex::new(store));

        Self {
            scheduler: Scheduler::new(Arc::clone(&store)),
            store,
            data_file,
        }
    }

    pub(crate) fn start_scheduler(&mut self) {
        self.scheduler.start();
    }

    fn store(&self) -> anyhow::Result<MutexGuard<'_, MemoryStore>> {
        self.store
            .lock()
            .map_err(|_| anyhow::Error::msg("the store lock is poisoned"))
    }

    pub(crate) fn handle_messages(&mut self, rx: &mpsc::Receiver<Request>) -> anyhow::Result<()> {
        loop {
            let (line, tx) = rx.recv()?;

            match tx {
                Some(tx) => {
                    if let Some(reply) = self.handle_line(&line) {
                        tx.send(reply)?;
                    }
                }
                None => match line.as_str() {
                    "save" => self.save(),
                    "exit" => {
                        self.scheduler.stop();
                        info!("exiting ...");
                        exit(0);
                    }
                    _ => error!("unknown server command: {line}"),
                },
            }
        }
    }

    /// Answers one protocol line with `= <command> <payload>` or
    /// `? <command> <error>`. Blank lines and comments get no answer.
    pub(crate) fn handle_line(&mut self, line: &str) -> Option<String> {
        let message = match Message::from_str(line) {
            Ok(Message::Empty) => return None,
            Ok(message) => message,
            Err(error) => {
                let command = line.split_whitespace().next().unwrap_or_default();
                return Some(format!("? {command} {error}"));
            }
        };

        let command = message.command();
        debug!("{command}");

        let reply = match self.handle(message) {
            Ok(payload) if payload.is_empty() => format!("= {command}"),
            Ok(payload) => format!("= {command} {payload}"),
            Err(error) => {
                debug!("{command}: {error}");
                format!("? {command} {error}")
            }
        };

        Some(reply)
    }

    fn tournament<F>(&self, id: Id, change: F) -> anyhow::Result<String>
    where
        F: FnOnce(&mut Tournament) -> anyhow::Result<()>,
    {
        let mut store = self.store()?;
        let mut tournament = store.tournament(id)?;
        change(&mut tournament)?;
        let reply = ron(&tournament)?;
        store.save_tournament(tournament)?;

        Ok(reply)
    }

    fn handle(&mut self, message: Message) -> anyhow::Result<String> {
        match message {
            Message::Empty => Ok(String::new()),
            Message::RecurringAdd(request) => {
                let payment = request.into_recurring_payment(Utc::now())?;
                let mut store = self.store()?;
                let id = store.insert_recurring_payment(payment)?;
                info!("added recurring payment {id}");
                ron(&store.recurring_payment(id)?)
            }
            Message::RecurringUpdate(id, update) => {
                let mut store = self.store()?;
                let mut payment = store.recurring_payment(id)?;
                update.apply(&mut payment)?;
                let reply = ron(&payment)?;
                store.update_recurring_payment(payment)?;
                Ok(reply)
            }
            Message::RecurringGet(id) => ron(&self.store()?.recurring_payment(id)?),
            Message::RecurringList { active_only } => ron(&self.store()?.recurring_payments(active_only)?),
            Message::RecurringDelete(id) => {
                self.store()?.delete_recurring_payment(id)?;
                info!("deleted recurring payment {id}");
                Ok(id.to_string())
            }
            Message::SchedulerStatus => ron(&self.scheduler.status()),
            Message::SchedulerExecute => match self.scheduler.execute_now() {
                Some(report) => ron(&report),
                None => Err(anyhow::Error::msg("the scheduler is already running")),
            },
            Message::Payments => ron(&self.store()?.payments()?),
            Message::TournamentNew {
                rounds_per_match,
                match_size,
                name,
            } => {
                let tournament = Tournament::new(&name, rounds_per_match, match_size, CREATED_BY, Utc::now())?;
                let mut store = self.store()?;
                let id = store.insert_tournament(tournament)?;
                info!("created tournament {id}");
                ron(&store.tournament(id)?)
            }
            Message::TournamentGet(id) => ron(&self.store()?.tournament(id)?),
            Message::TournamentList => ron(&self.store()?.tournaments()?),
            Message::TournamentDelete(id) => {
                self.store()?.delete_tournament(id)?;
                Ok(id.to_string())
            }
            Message::TournamentUpdate(id, update) => {
                self.tournament(id, |tournament| Ok(tournament.update(update)?))
            }
            Message::ContestantAdd(id, name) => self.tournament(id, |tournament| {
                tournament.add_contestant(&name)?;
                Ok(())
            }),
            Message::ContestantRemove(id, contestant) => {
                self.tournament(id, |tournament| Ok(tournament.remove_contestant(contestant)?))
            }
            Message::ContestantDnf(id, contestant, dnf) => {
                self.tournament(id, |tournament| Ok(tournament.set_dnf(contestant, dnf)?))
            }
            Message::GroupsCreate(id, setup) => self.tournament(id, |tournament| {
                Ok(tournament.create_groups(setup, &mut rand::rng())?)
            }),
            Message::GroupScores {
                tournament,
                group,
                game,
                round,
                scores,
            } => self.tournament(tournament, |tournament| {
                Ok(tournament.submit_group_scores(group, game, round, scores, Utc::now())?)
            }),
            Message::BracketGenerate(id, top_n) => {
                self.tournament(id, |tournament| Ok(tournament.generate_bracket(top_n)?))
            }
            Message::BracketScores {
                tournament,
                game,
                round,
                scores,
            } => self.tournament(tournament, |tournament| {
                Ok(tournament.submit_bracket_scores(game, round, scores, Utc::now())?)
            }),
            Message::ListCommands => Ok(COMMANDS.join(" ")),
        }
    }

    pub(crate) fn save(&self) {
        let Some(data_file) = &self.data_file else {
            return;
        };

        match self.store() {
            Ok(store) => match store.save(data_file) {
                Ok(()) => info!("saved {}", data_file.display()),
                Err(error) => error!("save file: {error}"),
            },
            Err(error) => error!("save file: {error}"),
        }
    }

    pub(crate) fn save_periodically(tx: Sender<Request>) {
        thread::spawn(move || {
            loop {
                thread::sleep(Duration::from_secs(HOUR_IN_SECONDS));
                handle_error(tx.send(("save".to_string(), None)));
            }
        });
    }
}
