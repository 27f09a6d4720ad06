//! Round-robin matchup construction: the circle method for intra-division
//! strategies, greedy round-packing for cross-division strategies, and
//! priority-grouped interleaving across strategies.

use std::collections::HashSet;

use itertools::Itertools;

use crate::{Strategy, Team};

use super::{Matchup, MatchupRound};

const BYE_SENTINEL: i32 = i32::MIN;

/// Build every round, across every strategy, in the order the slot assigner
/// should attempt to place them: strategies grouped by ascending priority,
/// same-priority strategies interleaved round by round.
pub fn generate_matchups(strategies: &[Strategy], teams: &[Team]) -> Vec<MatchupRound> {
    let mut by_priority: Vec<&Strategy> = strategies.iter().collect();
    by_priority.sort_by_key(|s| s.priority);

    let mut result = Vec::new();
    for (_priority, group) in &by_priority.into_iter().group_by(|s| s.priority) {
        let mut per_strategy: Vec<Vec<MatchupRound>> = group
            .map(|s| generate_strategy_rounds(s, teams))
            .collect();

        let max_len = per_strategy.iter().map(Vec::len).max().unwrap_or(0);
        for round_idx in 0..max_len {
            for rounds in &mut per_strategy {
                if let Some(round) = rounds.get(round_idx) {
                    if !round.is_empty() {
                        result.push(round.clone());
                    }
                }
            }
        }
    }

    result
}

fn generate_strategy_rounds(strategy: &Strategy, teams: &[Team]) -> Vec<MatchupRound> {
    if strategy.games_per_team <= 0 {
        return Vec::new();
    }
    if strategy.is_intra_division {
        generate_intra_division_rounds(strategy, teams)
    } else {
        generate_cross_division_rounds(strategy, teams)
    }
}

/// Circle method (polygon rotation): fix one team, rotate the rest, pair
/// mirrored positions. Odd team counts get a bye sentinel that never
/// produces a matchup.
fn generate_intra_division_rounds(strategy: &Strategy, teams: &[Team]) -> Vec<MatchupRound> {
    let Some(division_id) = strategy.division_id else {
        return Vec::new();
    };

    let mut ids: Vec<i32> = teams
        .iter()
        .filter(|t| t.division_id == division_id)
        .map(|t| t.id)
        .collect();
    if ids.len() < 2 {
        return Vec::new();
    }

    if ids.len() % 2 == 1 {
        ids.push(BYE_SENTINEL);
    }
    let n = ids.len();

    let fixed = ids[0];
    let mut rotating: Vec<i32> = ids[1..].to_vec();
    let mut single_cycle: Vec<MatchupRound> = Vec::with_capacity(n - 1);

    for _ in 0..(n - 1) {
        let mut round = Vec::with_capacity(n / 2);
        push_matchup(&mut round, fixed, rotating[0], strategy.local_id);
        for i in 1..(n / 2) {
            push_matchup(&mut round, rotating[i], rotating[n - 1 - i], strategy.local_id);
        }
        single_cycle.push(round);

        if let Some(last) = rotating.pop() {
            rotating.insert(0, last);
        }
    }

    let mut rounds = Vec::with_capacity(single_cycle.len() * strategy.games_per_team as usize);
    for _ in 0..strategy.games_per_team {
        rounds.extend(single_cycle.iter().cloned());
    }
    rounds
}

fn push_matchup(round: &mut MatchupRound, a: i32, b: i32, strategy_local_id: i32) {
    if a == BYE_SENTINEL || b == BYE_SENTINEL {
        return;
    }
    round.push(Matchup {
        team1_id: a,
        team2_id: b,
        strategy_local_id,
    });
}

/// Every cross-division pair, replicated `gamesPerTeam` times, packed
/// greedily into rounds where no team appears twice.
fn generate_cross_division_rounds(strategy: &Strategy, teams: &[Team]) -> Vec<MatchupRound> {
    let mut pairs: Vec<(i32, i32)> = Vec::new();
    for i in 0..teams.len() {
        for j in (i + 1)..teams.len() {
            if teams[i].division_id != teams[j].division_id {
                pairs.push((teams[i].id, teams[j].id));
            }
        }
    }
    if pairs.is_empty() {
        return Vec::new();
    }

    let mut remaining: Vec<(i32, i32)> =
        Vec::with_capacity(pairs.len() * strategy.games_per_team as usize);
    for _ in 0..strategy.games_per_team {
        remaining.extend(pairs.iter().copied());
    }

    let mut rounds = Vec::new();
    while !remaining.is_empty() {
        let mut round: MatchupRound = Vec::new();
        let mut used: HashSet<i32> = HashSet::new();
        let mut leftover = Vec::with_capacity(remaining.len());

        for (a, b) in remaining {
            if !used.contains(&a) && !used.contains(&b) {
                used.insert(a);
                used.insert(b);
                round.push(Matchup {
                    team1_id: a,
                    team2_id: b,
                    strategy_local_id: strategy.local_id,
                });
            } else {
                leftover.push((a, b));
            }
        }

        if round.is_empty() {
            break;
        }
        rounds.push(round);
        remaining = leftover;
    }

    rounds
}
