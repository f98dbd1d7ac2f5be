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

use std::str::FromStr;

use serde::de::DeserializeOwned;

use crate::{
    Id,
    recurring::{RecurringPaymentRequest, RecurringPaymentUpdate},
    tournament::{GroupSetup, Scores, TournamentUpdate, bracket::DEFAULT_TOP_N},
};

pub const COMMANDS: [&str; 21] = [
    "recurring_add",
    "recurring_update",
    "recurring_get",
    "recurring_list",
    "recurring_delete",
    "scheduler_status",
    "scheduler_execute",
    "payments",
    "tournament_new",
    "tournament_get",
    "tournament_list",
    "tournament_delete",
    "tournament_update",
    "contestant_add",
    "contestant_remove",
    "contestant_dnf",
    "groups_create",
    "group_scores",
    "bracket_generate",
    "bracket_scores",
    "list_commands",
];

/// A command sent to the server, one per line.
///
/// Everything after a `#` is a comment. Arguments are separated by
/// whitespace; structured arguments come last and are written in RON.
/// The server answers `= <command> <payload>` or `? <command> <error>`.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// An empty line or a comment.
    Empty,

    /// `recurring_add <RecurringPaymentRequest>`
    RecurringAdd(RecurringPaymentRequest),

    /// `recurring_update <id> <RecurringPaymentUpdate>`
    RecurringUpdate(Id, RecurringPaymentUpdate),

    /// `recurring_get <id>`
    RecurringGet(Id),

    /// `recurring_list [active]`
    RecurringList { active_only: bool },

    /// `recurring_delete <id>`
    RecurringDelete(Id),

    /// `scheduler_status`
    SchedulerStatus,

    /// `scheduler_execute`
    SchedulerExecute,

    /// `payments`
    Payments,

    /// `tournament_new <rounds_per_match> <match_size> <name...>`
    TournamentNew {
        rounds_per_match: u32,
        match_size: usize,
        name: String,
    },

    /// `tournament_get <id>`
    TournamentGet(Id),

    /// `tournament_list`
    TournamentList,

    /// `tournament_delete <id>`
    TournamentDelete(Id),

    /// `tournament_update <id> <TournamentUpdate>`
    TournamentUpdate(Id, TournamentUpdate),

    /// `contestant_add <tournament> <name...>`
    ContestantAdd(Id, String),

    /// `contestant_remove <tournament> <contestant>`
    ContestantRemove(Id, Id),

    /// `contestant_dnf <tournament> <contestant> <true|false>`
    ContestantDnf(Id, Id, bool),

    /// `groups_create <tournament> <GroupSetup>`
    GroupsCreate(Id, GroupSetup),

    /// `group_scores <tournament> <group> <match> <round> <Scores>`
    GroupScores {
        tournament: Id,
        group: Id,
        game: Id,
        round: u32,
        scores: Scores,
    },

    /// `bracket_generate <tournament> [top_n]`
    BracketGenerate(Id, usize),

    /// `bracket_scores <tournament> <match> <round> <Scores>`
    BracketScores {
        tournament: Id,
        game: Id,
        round: u32,
        scores: Scores,
    },

    /// `list_commands`
    ListCommands,
}

impl Message {
    #[must_use]
    pub fn command(&self) -> &'static str {
        match self {
            Self::Empty => "",
            Self::RecurringAdd(_) => "recurring_add",
            Self::RecurringUpdate(..) => "recurring_update",
            Self::RecurringGet(_) => "recurring_get",
            Self::RecurringList { .. } => "recurring_list",
            Self::RecurringDelete(_) => "recurring_delete",
            Self::SchedulerStatus => "scheduler_status",
            Self::SchedulerExecute => "scheduler_execute",
            Self::Payments => "payments",
            Self::TournamentNew { .. } => "tournament_new",
            Self::TournamentGet(_) => "tournament_get",
            Self::TournamentList => "tournament_list",
            Self::TournamentDelete(_) => "tournament_delete",
            Self::TournamentUpdate(..) => "tournament_update",
            Self::ContestantAdd(..) => "contestant_add",
            Self::ContestantRemove(..) => "contestant_remove",
            Self::ContestantDnf(..) => "contestant_dnf",
            Self::GroupsCreate(..) => "groups_create",
            Self::GroupScores { .. } => "group_scores",
            Self::BracketGenerate(..) => "bracket_generate",
            Self::BracketScores { .. } => "bracket_scores",
            Self::ListCommands => "list_commands",
        }
    }
}

/// Splits off the next whitespace separated word.
fn word<'a>(rest: &mut &'a str, name: &str) -> anyhow::Result<&'a str> {
    let trimmed = rest.trim_start();
    if trimmed.is_empty() {
        return Err(anyhow::Error::msg(format!("expected {name}")));
    }

    let (word, remainder) = trimmed
        .split_once(char::is_whitespace)
        .unwrap_or((trimmed, ""));
    *rest = remainder;

    Ok(word)
}

fn number<T: FromStr>(rest: &mut &str, name: &str) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let word = word(rest, name)?;
    word.parse()
        .map_err(|error| anyhow::Error::new(error).context(format!("invalid {name}: {word}")))
}

fn ron<T: DeserializeOwned>(rest: &str, name: &str) -> anyhow::Result<T> {
    let rest = rest.trim();
    if rest.is_empty() {
        return Err(anyhow::Error::msg(format!("expected {name}")));
    }

    ron::from_str(rest).map_err(|error| anyhow::Error::msg(format!("invalid {name}: {error}")))
}

fn text(rest: &str, name: &str) -> anyhow::Result<String> {
    let rest = rest.split_whitespace().collect::<Vec<_>>().join(" ");
    if rest.is_empty() {
        return Err(anyhow::Error::msg(format!("expected {name}")));
    }

    Ok(rest)
}

fn done(rest: &str) -> anyhow::Result<()> {
    if rest.trim().is_empty() {
        Ok(())
    } else {
        Err(anyhow::Error::msg(format!("unexpected arguments: {}", rest.trim())))
    }
}

impl FromStr for Message {
    type Err = anyhow::Error;

    fn from_str(message: &str) -> anyhow::Result<Self> {
        let message = message.split_once('#').map_or(message, |(message, _)| message);
        let mut rest = message.trim();
        if rest.is_empty() {
            return Ok(Self::Empty);
        }

        let command = word(&mut rest, "a command")?;
        let rest = &mut rest;

        let message = match command {
            "recurring_add" => Self::RecurringAdd(ron(rest, "recurring payment")?),
            "recurring_update" => {
                let id = number(rest, "id")?;
                Self::RecurringUpdate(id, ron(rest, "recurring payment update")?)
            }
            "recurring_get" => Self::RecurringGet(number(rest, "id")?),
            "recurring_list" => match rest.trim() {
                "" => Self::RecurringList { active_only: false },
                "active" => Self::RecurringList { active_only: true },
                other => return Err(anyhow::Error::msg(format!("unexpected arguments: {other}"))),
            },
            "recurring_delete" => Self::RecurringDelete(number(rest, "id")?),
            "scheduler_status" => {
                done(rest)?;
                Self::SchedulerStatus
            }
            "scheduler_execute" => {
                done(rest)?;
                Self::SchedulerExecute
            }
            "payments" => {
                done(rest)?;
                Self::Payments
            }
            "tournament_new" => {
                let rounds_per_match = number(rest, "rounds per match")?;
                let match_size = number(rest, "match size")?;
                Self::TournamentNew {
                    rounds_per_match,
                    match_size,
                    name: text(rest, "a name")?,
                }
            }
            "tournament_get" => Self::TournamentGet(number(rest, "id")?),
            "tournament_list" => {
                done(rest)?;
                Self::TournamentList
            }
            "tournament_delete" => Self::TournamentDelete(number(rest, "id")?),
            "tournament_update" => {
                let id = number(rest, "id")?;
                Self::TournamentUpdate(id, ron(rest, "tournament update")?)
            }
            "contestant_add" => {
                let id = number(rest, "id")?;
                Self::ContestantAdd(id, text(rest, "a name")?)
            }
            "contestant_remove" => {
                let id = number(rest, "id")?;
                Self::ContestantRemove(id, number(rest, "contestant")?)
            }
            "contestant_dnf" => {
                let id = number(rest, "id")?;
                let contestant = number(rest, "contestant")?;
                Self::ContestantDnf(id, contestant, number(rest, "dnf")?)
            }
            "groups_create" => {
                let id = number(rest, "id")?;
                Self::GroupsCreate(id, ron(rest, "group setup")?)
            }
            "group_scores" => Self::GroupScores {
                tournament: number(rest, "id")?,
                group: number(rest, "group")?,
                game: number(rest, "match")?,
                round: number(rest, "round")?,
                scores: ron(rest, "scores")?,
            },
            "bracket_generate" => {
                let id = number(rest, "id")?;
                let top_n = if rest.trim().is_empty() {
                    DEFAULT_TOP_N
                } else {
                    number(rest, "top n")?
                };
                Self::BracketGenerate(id, top_n)
            }
            "bracket_scores" => Self::BracketScores {
                tournament: number(rest, "id")?,
                game: number(rest, "match")?,
                round: number(rest, "round")?,
                scores: ron(rest, "scores")?,
            },
            "list_commands" => {
                done(rest)?;
                Self::ListCommands
            }
            _ => return Err(anyhow::Error::msg(format!("unknown command: {command}"))),
        };

        if !matches!(
            message,
            Self::RecurringAdd(_)
                | Self::RecurringUpdate(..)
                | Self::RecurringList { .. }
                | Self::TournamentNew { .. }
                | Self::TournamentUpdate(..)
                | Self::ContestantAdd(..)
                | Self::GroupsCreate(..)
                | Self::GroupScores { .. }
                | Self::BracketScores { .. }
        ) {
            done(rest)?;
        }

        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use std::fmt;

    use crate::recurring::SplitMethod;

    use super::*;

    fn assert_error_str<T: fmt::Debug>(result: anyhow::Result<T>, string: &str) {
        match result {
            Ok(value) => assert_eq!(format!("{value:?}"), string),
            Err(error) => assert_eq!(error.to_string(), string),
        }
    }

    #[test]
    fn comments_and_blank_lines() -> anyhow::Result<()> {
        assert_eq!(Message::from_str("")?, Message::Empty);
        assert_eq!(Message::from_str("   # nothing here")?, Message::Empty);
        assert_eq!(
            Message::from_str("recurring_get 4 # the rent")?,
            Message::RecurringGet(4)
        );
        Ok(())
    }

    #[test]
    fn arguments() -> anyhow::Result<()> {
        assert_eq!(
            Message::from_str("tournament_new 3 4 Friday   Night Cup")?,
            Message::TournamentNew {
                rounds_per_match: 3,
                match_size: 4,
                name: "Friday Night Cup".to_string(),
            }
        );
        assert_eq!(
            Message::from_str("recurring_list active")?,
            Message::RecurringList { active_only: true }
        );
        assert_eq!(
            Message::from_str("contestant_dnf 1 7 true")?,
            Message::ContestantDnf(1, 7, true)
        );
        assert_eq!(
            Message::from_str("bracket_generate 2")?,
            Message::BracketGenerate(2, DEFAULT_TOP_N)
        );
        assert_eq!(
            Message::from_str("groups_create 2 MaxPerGroup(4)")?,
            Message::GroupsCreate(2, GroupSetup::MaxPerGroup(4))
        );
        Ok(())
    }

    #[test]
    fn ron_payloads() -> anyhow::Result<()> {
        let message = Message::from_str("group_scores 1 2 3 1 {4: 10, 5: 7}")?;
        let Message::GroupScores { scores, round, .. } = message else {
            return Err(anyhow::Error::msg(format!("expected group_scores: {message:?}")));
        };
        assert_eq!(round, 1);
        assert_eq!(scores.get(&4), Some(&10));

        let message = Message::from_str(
            r#"recurring_add (title: "Rent", amount: 1200.0, paid_by: "alice", split_method: equal, splits: [(username: "alice"), (username: "bob")], frequency: "monthly", created_by: "alice")"#,
        )?;
        let Message::RecurringAdd(request) = message else {
            return Err(anyhow::Error::msg(format!("expected recurring_add: {message:?}")));
        };
        assert_eq!(request.split_method, SplitMethod::Equal);
        assert_eq!(request.splits.len(), 2);
        Ok(())
    }

    #[test]
    fn errors() {
        assert_error_str(Message::from_str("launch"), "unknown command: launch");
        assert_error_str(Message::from_str("recurring_get"), "expected id");
        assert_error_str(Message::from_str("recurring_get x"), "invalid id: x");
        assert_error_str(Message::from_str("payments now"), "unexpected arguments: now");
        assert_error_str(Message::from_str("contestant_add 1"), "expected a name");
    }

    #[test]
    fn every_command_is_listed() {
        for command in COMMANDS {
            assert!(
                !Message::from_str(command)
                    .map_or_else(|error| error.to_string(), |message| message.command().to_string())
                    .starts_with("unknown command"),
                "{command}"
            );
        }
    }
}
