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

//! Knockout brackets.
//!
//! Rounds are numbered from the final (1) outward, so the outermost round,
//! the one seeded from the group stage, has the highest number. The winner
//! of match `i` in round `r` plays match `i / match_size` of round `r - 1`.

use chrono::{DateTime, Utc};
use log::{debug, info};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::Id;

use super::{BracketKind, Match, MatchStage, Scores, Status, Tournament, TournamentError};

pub const DEFAULT_TOP_N: usize = 2;

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct Bracket {
    pub kind: BracketKind,
    /// `rounds[0]` is the final.
    pub rounds: Vec<BracketRound>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct BracketRound {
    pub number: usize,
    pub name: String,
    pub match_ids: Vec<Id>,
}

impl Bracket {
    #[must_use]
    pub fn round(&self, number: usize) -> Option<&BracketRound> {
        number.checked_sub(1).and_then(|index| self.rounds.get(index))
    }

    /// The match in round `number` that the winner of `index` moves on to.
    fn next_match(&self, number: usize, index: usize, match_size: usize) -> Option<Id> {
        self.round(number.checked_sub(1)?)?
            .match_ids
            .get(index / match_size)
            .copied()
    }

    #[must_use]
    pub fn final_match(&self) -> Option<Id> {
        self.rounds.first()?.match_ids.first().copied()
    }

    #[must_use]
    pub fn outermost_round(&self) -> usize {
        self.rounds.len()
    }
}

/// The smallest power of `match_size` that holds `contestants`.
#[must_use]
pub fn bracket_size(contestants: usize, match_size: usize) -> usize {
    let mut size = 1;
    while size < contestants {
        size *= match_size;
    }
    size
}

/// `log_match_size(bracket_size)`.
#[must_use]
pub fn round_count(bracket_size: usize, match_size: usize) -> usize {
    let mut rounds = 0;
    let mut size = 1;
    while size < bracket_size {
        size *= match_size;
        rounds += 1;
    }
    rounds
}

#[must_use]
pub fn round_name(kind: BracketKind, number: usize) -> String {
    match (kind, number) {
        (BracketKind::Main, 1) => "Finals".to_string(),
        (BracketKind::Main, 2) => "Semi-Finals".to_string(),
        (BracketKind::Main, 3) => "Quarter-Finals".to_string(),
        (BracketKind::Main, 4) => "Round of 16".to_string(),
        (BracketKind::Main, 5) => "Round of 32".to_string(),
        (BracketKind::Main, _) => format!("Round {number}"),
        (BracketKind::Consolation, 1) => "3rd Place Match".to_string(),
        (BracketKind::Consolation, 2) => "Consolation Semi-Finals".to_string(),
        (BracketKind::Consolation, 3) => "Consolation Quarter-Finals".to_string(),
        (BracketKind::Consolation, _) => format!("Consolation Round {number}"),
    }
}

impl Tournament {
    #[must_use]
    pub fn bracket_of(&self, kind: BracketKind) -> Option<&Bracket> {
        match kind {
            BracketKind::Main => self.bracket.as_ref(),
            BracketKind::Consolation => self.consolation_bracket.as_ref(),
        }
    }

    /// Sends the best `top_n` of every group to the main bracket and, when
    /// there are enough of them, everyone else to a consolation bracket.
    ///
    /// # Errors
    ///
    /// If the tournament is not in the group stage, a group has no
    /// standings, or fewer than `match_size` contestants qualify.
    pub fn generate_bracket(&mut self, top_n: usize) -> Result<(), TournamentError> {
        if self.status != Status::GroupStage {
            return Err(TournamentError::Precondition(
                "can only generate the bracket from the group stage".to_string(),
            ));
        }
        if top_n == 0 {
            return Err(TournamentError::Validation(
                "at least one contestant per group has to qualify".to_string(),
            ));
        }

        let mut qualified = Vec::new();
        let mut eliminated = Vec::new();
        for group in &self.groups {
            if group.standings.is_empty() {
                return Err(TournamentError::Precondition(format!(
                    "{} has no standings yet",
                    group.name
                )));
            }

            let mut standings = group.standings.clone();
            standings.sort_by_key(|standing| standing.position);

            for (index, standing) in standings.iter().enumerate() {
                if index < top_n {
                    qualified.push(standing.contestant_id);
                } else {
                    eliminated.push(standing.contestant_id);
                }
            }
        }

        // Late contestants sit in every group but take one slot, the best.
        let mut seen = FxHashSet::default();
        qualified.retain(|id| seen.insert(*id));
        eliminated.retain(|id| seen.insert(*id));

        if qualified.len() < self.match_size {
            return Err(TournamentError::Precondition(format!(
                "need at least {} qualified contestants for the bracket",
                self.match_size
            )));
        }

        let bracket = self.build_bracket(BracketKind::Main, &qualified);
        let consolation = (eliminated.len() >= self.match_size)
            .then(|| self.build_bracket(BracketKind::Consolation, &eliminated));

        info!(
            "tournament {}: bracket with {} rounds for {} contestants",
            self.id,
            bracket.rounds.len(),
            qualified.len()
        );

        self.bracket = Some(bracket);
        self.consolation_bracket = consolation;
        self.status = Status::Bracket;

        Ok(())
    }

    fn build_bracket(&mut self, kind: BracketKind, seeded: &[Id]) -> Bracket {
        let match_size = self.match_size;
        let rounds = round_count(bracket_size(seeded.len(), match_size), match_size);

        let mut bracket = Bracket {
            kind,
            rounds: Vec::with_capacity(rounds),
        };

        let mut matches_in_round = 1;
        for number in 1..=rounds {
            let mut seeds = seeded.chunks(match_size);
            let mut match_ids = Vec::with_capacity(matches_in_round);

            for index in 0..matches_in_round {
                let contestant_ids = if number == rounds {
                    seeds.next().map(<[Id]>::to_vec).unwrap_or_default()
                } else {
                    Vec::new()
                };

                let id = self.next_id();
                self.matches.insert(
                    id,
                    Match::new(
                        id,
                        MatchStage::Bracket {
                            kind,
                            round: number,
                            index,
                        },
                        contestant_ids,
                    ),
                );
                match_ids.push(id);
            }

            bracket.rounds.push(BracketRound {
                number,
                name: round_name(kind, number),
                match_ids,
            });
            matches_in_round *= match_size;
        }

        bracket
    }

    /// Records one round of a bracket match. Once the match has all of its
    /// rounds the winner moves on and, from the outermost main round, the
    /// runner-up drops into the consolation bracket. Nothing changes if any
    /// part of this fails.
    ///
    /// # Errors
    ///
    /// If there is no bracket, the match does not exist, the scores name
    /// someone outside the match, or a changed result would rewrite a match
    /// that has already started.
    pub fn submit_bracket_scores(
        &mut self,
        match_id: Id,
        round: u32,
        scores: Scores,
        now: DateTime<Utc>,
    ) -> Result<(), TournamentError> {
        if self.bracket.is_none() {
            return Err(TournamentError::Precondition(
                "the tournament has no bracket yet".to_string(),
            ));
        }

        let mut updated = self.clone();
        updated.record_bracket_scores(match_id, round, scores, now)?;
        *self = updated;

        Ok(())
    }

    fn record_bracket_scores(
        &mut self,
        match_id: Id,
        round: u32,
        scores: Scores,
        now: DateTime<Utc>,
    ) -> Result<(), TournamentError> {
        let not_found = TournamentError::NotFound {
            kind: "match",
            id: match_id,
        };
        let rounds_per_match = usize::try_from(self.rounds_per_match).unwrap_or(usize::MAX);
        let match_size = self.match_size;

        let game = self.matches.get_mut(&match_id).ok_or(not_found.clone())?;
        let MatchStage::Bracket {
            kind,
            round: number,
            index,
        } = game.stage
        else {
            return Err(not_found);
        };

        game.check_scores(round, &scores)?;
        let before = game.completed.then(|| game.ranking());
        game.record(round, scores, now);

        if game.rounds.len() < rounds_per_match {
            return Ok(());
        }

        game.completed = true;
        let ranking = game.ranking();
        let Some((winner, _)) = ranking.first().copied() else {
            return Ok(());
        };
        game.winner_id = Some(winner);
        debug!("match {match_id}: {winner} wins");

        let placed = |ranking: &[(Id, i64)], place: usize| ranking.get(place).map(|(id, _)| *id);
        let old_winner = before.as_deref().and_then(|ranking| placed(ranking, 0));
        let old_runner_up = before.as_deref().and_then(|ranking| placed(ranking, 1));

        let bracket = self.bracket_of(kind).ok_or(not_found)?;
        let next = bracket.next_match(number, index, match_size);
        let feeds_consolation = number == bracket.outermost_round();

        if let Some(next) = next {
            self.advance(next, winner, old_winner)?;
        }

        let consolation_target = self.consolation_bracket.as_ref().and_then(|consolation| {
            consolation
                .round(consolation.outermost_round())
                .and_then(|round| round.match_ids.get(index / match_size))
                .copied()
        });

        if kind == BracketKind::Main
            && feeds_consolation
            && let Some(runner_up) = placed(&ranking, 1)
            && let Some(target) = consolation_target
        {
            self.advance(target, runner_up, old_runner_up)?;
        }

        if self.finals_completed() {
            info!("tournament {} is completed", self.id);
            self.status = Status::Completed;
        }

        Ok(())
    }

    /// Puts `contestant` into the match `target`, replacing whoever an
    /// earlier result had sent there.
    fn advance(&mut self, target: Id, contestant: Id, replaces: Option<Id>) -> Result<(), TournamentError> {
        let game = self.matches.get_mut(&target).ok_or(TournamentError::NotFound {
            kind: "match",
            id: target,
        })?;

        if let Some(old) = replaces
            && old != contestant
            && game.contestant_ids.contains(&old)
        {
            if !game.rounds.is_empty() {
                return Err(TournamentError::Precondition(format!(
                    "the result moves a contestant out of match {target}, which has already started"
                )));
            }
            game.contestant_ids.retain(|id| *id != old);
        }

        if !game.contestant_ids.contains(&contestant) {
            game.contestant_ids.push(contestant);
        }

        Ok(())
    }

    fn finals_completed(&self) -> bool {
        let completed = |bracket: &Bracket| {
            bracket
                .final_match()
                .and_then(|id| self.matches.get(&id))
                .is_some_and(|game| game.completed)
        };

        self.bracket.as_ref().is_some_and(completed)
            && self.consolation_bracket.as_ref().is_none_or(completed)
    }
}
