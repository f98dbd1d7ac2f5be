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

use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::Id;

use super::TournamentError;

/// Points per contestant for one race.
pub type Scores = BTreeMap<Id, i64>;

/// The largest score, up or down, a contestant can get in one race.
pub const MAX_SCORE: i64 = 1_000_000;

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BracketKind {
    Main,
    Consolation,
}

impl fmt::Display for BracketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Main => write!(f, "main"),
            Self::Consolation => write!(f, "consolation"),
        }
    }
}

/// Where a match is played.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum MatchStage {
    Group(Id),
    Bracket {
        kind: BracketKind,
        /// 1 is the final.
        round: usize,
        index: usize,
    },
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct RecordedRound {
    pub round: u32,
    pub scores: Scores,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct Match {
    pub id: Id,
    pub stage: MatchStage,
    pub contestant_ids: Vec<Id>,
    #[serde(default)]
    pub rounds: Vec<RecordedRound>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub winner_id: Option<Id>,
}

impl Match {
    #[must_use]
    pub fn new(id: Id, stage: MatchStage, contestant_ids: Vec<Id>) -> Self {
        Self {
            id,
            stage,
            contestant_ids,
            rounds: Vec::new(),
            completed: false,
            winner_id: None,
        }
    }

    /// Overwrites the round with the same number, or appends it.
    pub(crate) fn record(&mut self, round: u32, scores: Scores, now: DateTime<Utc>) {
        if let Some(recorded) = self.rounds.iter_mut().find(|recorded| recorded.round == round) {
            recorded.scores = scores;
            recorded.recorded_at = now;
        } else {
            self.rounds.push(RecordedRound {
                round,
                scores,
                recorded_at: now,
            });
        }
    }

    pub(crate) fn check_scores(&self, round: u32, scores: &Scores) -> Result<(), TournamentError> {
        if round == 0 {
            return Err(TournamentError::Validation(
                "round numbers start at 1".to_string(),
            ));
        }

        if scores.is_empty() {
            return Err(TournamentError::Validation("scores are required".to_string()));
        }

        if let Some((id, score)) = scores
            .iter()
            .find(|(_, score)| !(-MAX_SCORE..=MAX_SCORE).contains(*score))
        {
            return Err(TournamentError::Validation(format!(
                "the score {score} of contestant {id} is outside -{MAX_SCORE}..={MAX_SCORE}"
            )));
        }

        if let Some(id) = scores.keys().find(|id| !self.contestant_ids.contains(id)) {
            return Err(TournamentError::Validation(format!(
                "contestant {id} is not in match {}",
                self.id
            )));
        }

        Ok(())
    }

    /// Summed scores, best first. Equal totals keep the order in which the
    /// contestants joined the match.
    #[must_use]
    pub fn ranking(&self) -> Vec<(Id, i64)> {
        let mut totals: FxHashMap<Id, i64> = FxHashMap::default();
        for recorded in &self.rounds {
            for (id, score) in &recorded.scores {
                let total = totals.entry(*id).or_default();
                *total = total.saturating_add(*score);
            }
        }

        let mut order = self.contestant_ids.clone();
        let mut extra: Vec<_> = totals
            .keys()
            .filter(|id| !self.contestant_ids.contains(id))
            .copied()
            .collect();
        extra.sort_unstable();
        order.extend(extra);

        let mut ranking: Vec<_> = order
            .into_iter()
            .filter_map(|id| totals.get(&id).map(|total| (id, *total)))
            .collect();
        ranking.sort_by(|a, b| b.1.cmp(&a.1));

        ranking
    }
}
