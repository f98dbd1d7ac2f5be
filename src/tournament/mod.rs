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

//! Kart tournaments: contestants play in groups, the best of every group
//! move on to a knockout bracket and the rest to a consolation bracket.
//!
//! The status only moves forward:
//! `setup -> group_stage -> bracket -> completed`.

pub mod bracket;
pub mod group;
pub mod matches;

use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Id;

pub use bracket::{Bracket, BracketRound};
pub use group::{Group, GroupConfig, GroupSetup, Standing};
pub use matches::{BracketKind, MAX_SCORE, Match, MatchStage, RecordedRound, Scores};

pub const DEFAULT_ROUNDS_PER_MATCH: u32 = 3;
pub const DEFAULT_MATCH_SIZE: usize = 2;
pub const MAX_NAME_LENGTH: usize = 200;

#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TournamentError {
    #[error("{0}")]
    Validation(String),
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: Id },
    #[error("{0}")]
    Precondition(String),
    #[error("the status can't move from {from} to {to}")]
    Transition { from: Status, to: Status },
}

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Setup,
    GroupStage,
    Bracket,
    Completed,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Setup => write!(f, "setup"),
            Self::GroupStage => write!(f, "group_stage"),
            Self::Bracket => write!(f, "bracket"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

impl FromStr for Status {
    type Err = anyhow::Error;

    fn from_str(string: &str) -> anyhow::Result<Self> {
        match string {
            "setup" => Ok(Self::Setup),
            "group_stage" => Ok(Self::GroupStage),
            "bracket" => Ok(Self::Bracket),
            "completed" => Ok(Self::Completed),
            _ => Err(anyhow::Error::msg(format!("invalid status: {string}"))),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Contestant {
    pub id: Id,
    pub name: String,
    #[serde(default)]
    pub seed: Option<u32>,
    #[serde(default)]
    pub dnf: bool,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct Tournament {
    pub id: Id,
    pub name: String,
    pub status: Status,
    pub contestants: Vec<Contestant>,
    pub groups: Vec<Group>,
    pub bracket: Option<Bracket>,
    pub consolation_bracket: Option<Bracket>,
    pub rounds_per_match: u32,
    pub match_size: usize,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    /// Every group and bracket match, by id.
    pub matches: BTreeMap<Id, Match>,
    next_id: Id,
}

/// Settings that can change after creation.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct TournamentUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub rounds_per_match: Option<u32>,
    #[serde(default)]
    pub status: Option<Status>,
}

fn check_name(name: &str) -> Result<String, TournamentError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(TournamentError::Validation(
            "the tournament name is required".to_string(),
        ));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(TournamentError::Validation(format!(
            "the tournament name is longer than {MAX_NAME_LENGTH} characters"
        )));
    }

    Ok(name.to_string())
}

fn check_rounds_per_match(rounds_per_match: u32) -> Result<(), TournamentError> {
    if !(1..=10).contains(&rounds_per_match) {
        return Err(TournamentError::Validation(
            "rounds per match must be between 1 and 10".to_string(),
        ));
    }

    Ok(())
}

impl Tournament {
    /// # Errors
    ///
    /// If the name is empty or too long, or the rounds per match or the
    /// match size is out of range.
    pub fn new(
        name: &str,
        rounds_per_match: u32,
        match_size: usize,
        created_by: &str,
        now: DateTime<Utc>,
    ) -> Result<Self, TournamentError> {
        let name = check_name(name)?;
        check_rounds_per_match(rounds_per_match)?;

        if !(2..=12).contains(&match_size) {
            return Err(TournamentError::Validation(
                "the match size must be between 2 and 12".to_string(),
            ));
        }

        Ok(Self {
            id: 0,
            name,
            status: Status::Setup,
            contestants: Vec::new(),
            groups: Vec::new(),
            bracket: None,
            consolation_bracket: None,
            rounds_per_match,
            match_size,
            created_by: created_by.to_string(),
            created_at: now,
            matches: BTreeMap::new(),
            next_id: 0,
        })
    }

    /// Applies all of the update or none of it.
    ///
    /// # Errors
    ///
    /// If a value is invalid or the status would move backwards.
    pub fn update(&mut self, update: TournamentUpdate) -> Result<(), TournamentError> {
        let name = update.name.as_deref().map(check_name).transpose()?;

        if let Some(rounds_per_match) = update.rounds_per_match {
            check_rounds_per_match(rounds_per_match)?;
        }

        if let Some(status) = update.status
            && status < self.status
        {
            return Err(TournamentError::Transition {
                from: self.status,
                to: status,
            });
        }

        if let Some(name) = name {
            self.name = name;
        }
        if let Some(rounds_per_match) = update.rounds_per_match {
            self.rounds_per_match = rounds_per_match;
        }
        if let Some(status) = update.status {
            self.status = status;
        }

        Ok(())
    }

    pub(crate) fn next_id(&mut self) -> Id {
        self.next_id += 1;
        self.next_id
    }

    #[must_use]
    pub fn contestant(&self, id: Id) -> Option<&Contestant> {
        self.contestants.iter().find(|contestant| contestant.id == id)
    }

    #[must_use]
    pub fn contestant_by_name(&self, name: &str) -> Option<&Contestant> {
        self.contestants.iter().find(|contestant| contestant.name == name)
    }

    #[must_use]
    pub fn group(&self, id: Id) -> Option<&Group> {
        self.groups.iter().find(|group| group.id == id)
    }

    #[must_use]
    pub fn find_match(&self, id: Id) -> Option<&Match> {
        self.matches.get(&id)
    }

    /// Adds a contestant. During the group stage the contestant joins every
    /// group with zero points in every recorded round.
    ///
    /// # Errors
    ///
    /// If the name is empty or already taken.
    pub fn add_contestant(&mut self, name: &str) -> Result<Id, TournamentError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(TournamentError::Validation(
                "the contestant name is required".to_string(),
            ));
        }
        if self.contestant_by_name(name).is_some() {
            return Err(TournamentError::Validation(
                "a contestant with this name already exists".to_string(),
            ));
        }

        let id = self.next_id();
        self.contestants.push(Contestant {
            id,
            name: name.to_string(),
            seed: None,
            dnf: false,
        });

        if self.status == Status::GroupStage {
            for group in &mut self.groups {
                group.contestant_ids.push(id);

                for match_id in &group.match_ids {
                    if let Some(game) = self.matches.get_mut(match_id) {
                        game.contestant_ids.push(id);
                        for recorded in &mut game.rounds {
                            recorded.scores.insert(id, 0);
                        }
                    }
                }

                // Unscored groups have no standings to extend.
                if !group.standings.is_empty() {
                    let position = group.standings.len() + 1;
                    group.standings.push(Standing {
                        contestant_id: id,
                        total_score: 0,
                        position,
                    });
                }
            }
        }

        Ok(id)
    }

    /// # Errors
    ///
    /// If the groups exist already or the contestant does not exist.
    pub fn remove_contestant(&mut self, id: Id) -> Result<(), TournamentError> {
        if self.status != Status::Setup {
            return Err(TournamentError::Precondition(
                "contestants can only be removed during setup".to_string(),
            ));
        }

        let Some(index) = self.contestants.iter().position(|contestant| contestant.id == id) else {
            return Err(TournamentError::NotFound {
                kind: "contestant",
                id,
            });
        };
        self.contestants.remove(index);

        Ok(())
    }

    /// Marks a contestant as not finishing, or clears the mark.
    ///
    /// # Errors
    ///
    /// If the contestant does not exist.
    pub fn set_dnf(&mut self, id: Id, dnf: bool) -> Result<(), TournamentError> {
        let Some(contestant) = self.contestants.iter_mut().find(|contestant| contestant.id == id) else {
            return Err(TournamentError::NotFound {
                kind: "contestant",
                id,
            });
        };
        contestant.dnf = dnf;

        Ok(())
    }
}
