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
use log::debug;
use rand::{Rng, seq::SliceRandom};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::Id;

use super::{Match, MatchStage, Scores, Status, Tournament, TournamentError};

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct Group {
    pub id: Id,
    pub name: String,
    pub contestant_ids: Vec<Id>,
    pub match_ids: Vec<Id>,
    /// Empty until the first scores are in.
    pub standings: Vec<Standing>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct Standing {
    pub contestant_id: Id,
    pub total_score: i64,
    pub position: usize,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct GroupConfig {
    pub name: String,
    pub contestant_ids: Vec<Id>,
}

/// How contestants are put into groups.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub enum GroupSetup {
    Configs(Vec<GroupConfig>),
    /// Shuffle into this many groups.
    Count(usize),
    /// Shuffle into groups of at most this many.
    MaxPerGroup(usize),
}

fn group_name(index: usize) -> String {
    match u8::try_from(index) {
        Ok(index) if index < 26 => format!("Group {}", char::from(b'A' + index)),
        _ => format!("Group {}", index + 1),
    }
}

impl Tournament {
    /// Puts the contestants into groups and moves to the group stage. Every
    /// group of two or more gets one match with all of its members.
    ///
    /// # Errors
    ///
    /// If the tournament is past setup, has fewer than two contestants, or
    /// the setup is invalid.
    pub fn create_groups<R: Rng + ?Sized>(
        &mut self,
        setup: GroupSetup,
        rng: &mut R,
    ) -> Result<(), TournamentError> {
        if self.status != Status::Setup {
            return Err(TournamentError::Precondition(
                "groups can only be created during setup".to_string(),
            ));
        }
        if self.contestants.len() < 2 {
            return Err(TournamentError::Precondition(
                "need at least 2 contestants to create groups".to_string(),
            ));
        }

        let configs = match setup {
            GroupSetup::Configs(configs) => {
                for config in &configs {
                    if config.name.trim().is_empty() {
                        return Err(TournamentError::Validation(
                            "every group needs a name".to_string(),
                        ));
                    }
                    if let Some(id) = config
                        .contestant_ids
                        .iter()
                        .find(|id| self.contestant(**id).is_none())
                    {
                        return Err(TournamentError::NotFound {
                            kind: "contestant",
                            id: *id,
                        });
                    }
                }
                configs
            }
            GroupSetup::Count(count) => {
                if count == 0 {
                    return Err(TournamentError::Validation(
                        "the number of groups must be positive".to_string(),
                    ));
                }
                let size = self.contestants.len().div_ceil(count);
                self.shuffled_groups(size, rng)
            }
            GroupSetup::MaxPerGroup(max) => {
                if max == 0 {
                    return Err(TournamentError::Validation(
                        "the group size must be positive".to_string(),
                    ));
                }
                self.shuffled_groups(max, rng)
            }
        };

        if configs.is_empty() {
            return Err(TournamentError::Validation(
                "at least one group is required".to_string(),
            ));
        }

        let mut groups = Vec::with_capacity(configs.len());
        for config in configs {
            let group_id = self.next_id();
            let mut match_ids = Vec::new();

            if config.contestant_ids.len() >= 2 {
                let match_id = self.next_id();
                self.matches.insert(
                    match_id,
                    Match::new(match_id, MatchStage::Group(group_id), config.contestant_ids.clone()),
                );
                match_ids.push(match_id);
            }

            groups.push(Group {
                id: group_id,
                name: config.name,
                contestant_ids: config.contestant_ids,
                match_ids,
                standings: Vec::new(),
            });
        }

        debug!("tournament {}: created {} groups", self.id, groups.len());
        self.groups = groups;
        self.status = Status::GroupStage;

        Ok(())
    }

    fn shuffled_groups<R: Rng + ?Sized>(&self, size: usize, rng: &mut R) -> Vec<GroupConfig> {
        let mut ids: Vec<_> = self.contestants.iter().map(|contestant| contestant.id).collect();
        ids.shuffle(rng);

        ids.chunks(size)
            .enumerate()
            .map(|(index, chunk)| GroupConfig {
                name: group_name(index),
                contestant_ids: chunk.to_vec(),
            })
            .collect()
    }

    /// Records one round of a group match and recomputes the standings.
    ///
    /// # Errors
    ///
    /// If the group or match does not exist, the match is not in the group,
    /// or the scores name someone outside the match.
    pub fn submit_group_scores(
        &mut self,
        group_id: Id,
        match_id: Id,
        round: u32,
        scores: Scores,
        now: DateTime<Utc>,
    ) -> Result<(), TournamentError> {
        let Some(group_index) = self.groups.iter().position(|group| group.id == group_id) else {
            return Err(TournamentError::NotFound {
                kind: "group",
                id: group_id,
            });
        };

        let rounds_per_match = self.rounds_per_match;
        let game = self
            .matches
            .get_mut(&match_id)
            .filter(|game| game.stage == MatchStage::Group(group_id))
            .ok_or(TournamentError::NotFound {
                kind: "match",
                id: match_id,
            })?;

        game.check_scores(round, &scores)?;
        game.record(round, scores, now);
        game.completed = game.rounds.len() >= usize::try_from(rounds_per_match).unwrap_or(usize::MAX);

        let standings = self.standings(group_index);
        if let Some(group) = self.groups.get_mut(group_index) {
            group.standings = standings;
        }

        Ok(())
    }

    /// Every member's summed score over the group's matches, best first.
    /// Equal totals keep the group's member order.
    fn standings(&self, group_index: usize) -> Vec<Standing> {
        let Some(group) = self.groups.get(group_index) else {
            return Vec::new();
        };

        let mut totals: FxHashMap<Id, i64> = FxHashMap::default();
        for game in group.match_ids.iter().filter_map(|id| self.matches.get(id)) {
            for recorded in &game.rounds {
                for (id, score) in &recorded.scores {
                    let total = totals.entry(*id).or_default();
                    *total = total.saturating_add(*score);
                }
            }
        }

        let mut standings: Vec<_> = group
            .contestant_ids
            .iter()
            .map(|id| (*id, totals.get(id).copied().unwrap_or_default()))
            .collect();
        standings.sort_by(|a, b| b.1.cmp(&a.1));

        standings
            .into_iter()
            .enumerate()
            .map(|(index, (contestant_id, total_score))| Standing {
                contestant_id,
                total_score,
                position: index + 1,
            })
            .collect()
    }
}
