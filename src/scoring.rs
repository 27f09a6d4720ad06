//! Pure scoring primitives shared by the greedy placer and the annealer.
//! Every function here is total over its inputs: empty teams, empty games,
//! and zero-count denominators all return `0.0` rather than `NaN`.

use std::collections::HashMap;

use chrono::NaiveDate;

use crate::{ByeConflict, ByeRequest, GeneratedGame, TeamStats};

pub const DRAW_FILL_BALANCE: f64 = 15_000.0;
pub const BYE_PRIORITY_1: f64 = 10_000.0;
pub const DRAW_TIME_BALANCE: f64 = 5_000.0;
pub const BYE_PRIORITY_2: f64 = 1_000.0;
pub const SHEET_BALANCE: f64 = 500.0;
pub const BYE_PRIORITY_LOW: f64 = 100.0;
pub const POSITION_BALANCE: f64 = 50.0;
pub const COMPACTNESS_EXTRA_DRAW: f64 = 100_000.0;
pub const COMPACTNESS_MULTI_EMPTY: f64 = 50_000.0;
pub const COMPACTNESS_EXCESS_EMPTIES: f64 = 30_000.0;

/// Bye requests grouped by date, for O(1) lookup while scoring a game.
pub type ByeMap<'a> = HashMap<NaiveDate, Vec<&'a ByeRequest>>;

pub fn build_bye_map(requests: &[ByeRequest]) -> ByeMap<'_> {
    let mut map: ByeMap = HashMap::new();
    for request in requests {
        map.entry(request.draw_date).or_default().push(request);
    }
    map
}

/// The total penalty incurred by scheduling `team1` vs `team2` on `date`,
/// summed over every bye request either team filed for that date.
pub fn bye_penalty(team1: i32, team2: i32, date: NaiveDate, bye_map: &ByeMap) -> f64 {
    let Some(requests) = bye_map.get(&date) else {
        return 0.0;
    };
    requests
        .iter()
        .filter(|r| r.team_id == team1 || r.team_id == team2)
        .map(|r| match r.priority {
            1 => BYE_PRIORITY_1,
            2 => BYE_PRIORITY_2,
            p => BYE_PRIORITY_LOW / p as f64,
        })
        .sum()
}

/// Population variance (divide by N, not N-1), so a single-element or empty
/// slice both score `0.0` instead of panicking on a divide by a count minus
/// one.
pub fn variance(values: &[u32]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
    values
        .iter()
        .map(|&v| {
            let diff = v as f64 - mean;
            diff * diff
        })
        .sum::<f64>()
        / n
}

pub fn compute_team_stats(
    games: &[GeneratedGame],
    team_ids: &[i32],
    bye_map: &ByeMap,
) -> Vec<TeamStats> {
    let mut stats: HashMap<i32, TeamStats> = team_ids
        .iter()
        .map(|&id| {
            (
                id,
                TeamStats {
                    team_id: id,
                    as_team1: 0,
                    as_team2: 0,
                    draw_time_counts: HashMap::new(),
                    sheet_counts: HashMap::new(),
                    bye_conflicts: Vec::new(),
                },
            )
        })
        .collect();

    for game in games {
        if let Some(s) = stats.get_mut(&game.team1_id) {
            s.as_team1 += 1;
            *s.draw_time_counts.entry(game.game_time.clone()).or_insert(0) += 1;
            *s.sheet_counts.entry(game.sheet_id).or_insert(0) += 1;
        }
        if let Some(s) = stats.get_mut(&game.team2_id) {
            s.as_team2 += 1;
            *s.draw_time_counts.entry(game.game_time.clone()).or_insert(0) += 1;
            *s.sheet_counts.entry(game.sheet_id).or_insert(0) += 1;
        }

        if let Some(requests) = bye_map.get(&game.game_date) {
            for request in requests {
                if request.team_id == game.team1_id || request.team_id == game.team2_id {
                    if let Some(s) = stats.get_mut(&request.team_id) {
                        s.bye_conflicts.push(ByeConflict {
                            draw_date: game.game_date,
                            priority: request.priority,
                        });
                    }
                }
            }
        }
    }

    let mut result: Vec<TeamStats> = stats.into_values().collect();
    result.sort_by_key(|s| s.team_id);
    result
}

/// The balance component of the objective: sum of bye penalties across every
/// game, plus per-team variance across draw-time usage, sheet usage, and
/// home/away position.
pub fn total_schedule_score(games: &[GeneratedGame], team_ids: &[i32], bye_map: &ByeMap) -> f64 {
    if games.is_empty() {
        return 0.0;
    }

    let mut score = 0.0;
    for game in games {
        score += bye_penalty(game.team1_id, game.team2_id, game.game_date, bye_map);
    }

    for stats in compute_team_stats(games, team_ids, bye_map) {
        let draw_times: Vec<u32> = stats.draw_time_counts.values().copied().collect();
        let sheets: Vec<u32> = stats.sheet_counts.values().copied().collect();
        score += variance(&draw_times) * DRAW_TIME_BALANCE;
        score += variance(&sheets) * SHEET_BALANCE;

        let diff = stats.as_team1 as f64 - stats.as_team2 as f64;
        score += diff * diff * POSITION_BALANCE;
    }

    score
}

/// The compactness component: penalises spreading games across more draws
/// than the theoretical minimum, draws left more than one sheet empty, and
/// overall unused capacity exceeding a full draw.
pub fn compactness_score(
    games: &[GeneratedGame],
    draw_capacities: &HashMap<(NaiveDate, String), u32>,
    num_sheets: usize,
) -> f64 {
    if games.is_empty() || num_sheets == 0 {
        return 0.0;
    }

    let target = (games.len() as f64 / num_sheets as f64).ceil() as i64;

    let mut counts: HashMap<(NaiveDate, String), u32> = HashMap::new();
    for game in games {
        *counts
            .entry((game.game_date, game.game_time.clone()))
            .or_insert(0) += 1;
    }

    let actual = counts.len() as i64;
    let mut score = (actual - target).max(0) as f64 * COMPACTNESS_EXTRA_DRAW;

    let mut multi_empty_draws = 0i64;
    let mut total_empty = 0i64;
    for (key, &count) in &counts {
        let capacity = *draw_capacities.get(key).unwrap_or(&count) as i64;
        let empty = capacity - count as i64;
        total_empty += empty.max(0);
        if empty > 1 {
            multi_empty_draws += 1;
        }
    }

    score += multi_empty_draws as f64 * COMPACTNESS_MULTI_EMPTY;

    if total_empty >= num_sheets as i64 {
        score += (total_empty - num_sheets as i64 + 1) as f64 * COMPACTNESS_EXCESS_EMPTIES;
    }

    score
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variance_of_empty_slice_is_zero() {
        assert_eq!(variance(&[]), 0.0);
    }

    #[test]
    fn variance_of_identical_values_is_zero() {
        assert_eq!(variance(&[3, 3, 3]), 0.0);
    }

    #[test]
    fn variance_matches_population_formula() {
        // mean = 2, deviations squared: 1, 0, 1 -> variance = 2/3
        let v = variance(&[1, 2, 3]);
        assert!((v - (2.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn bye_penalty_is_zero_with_no_requests_on_date() {
        let map = build_bye_map(&[]);
        let date = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap();
        assert_eq!(bye_penalty(1, 2, date, &map), 0.0);
    }

    #[test]
    fn bye_penalty_sums_both_teams_requests() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap();
        let requests = vec![
            ByeRequest {
                team_id: 1,
                draw_date: date,
                priority: 1,
            },
            ByeRequest {
                team_id: 2,
                draw_date: date,
                priority: 2,
            },
        ];
        let map = build_bye_map(&requests);
        let penalty = bye_penalty(1, 2, date, &map);
        assert_eq!(penalty, BYE_PRIORITY_1 + BYE_PRIORITY_2);
    }

    #[test]
    fn bye_penalty_low_priority_scales_down() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap();
        let requests = vec![ByeRequest {
            team_id: 1,
            draw_date: date,
            priority: 4,
        }];
        let map = build_bye_map(&requests);
        assert_eq!(bye_penalty(1, 2, date, &map), BYE_PRIORITY_LOW / 4.0);
    }

    #[test]
    fn compactness_score_is_zero_for_empty_schedule() {
        let caps = HashMap::new();
        assert_eq!(compactness_score(&[], &caps, 4), 0.0);
    }

    #[test]
    fn compactness_score_penalises_extra_draws() {
        let date1 = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap();
        let date2 = NaiveDate::from_ymd_opt(2024, 1, 9).unwrap();
        let games = vec![
            GeneratedGame {
                team1_id: 1,
                team2_id: 2,
                game_date: date1,
                game_time: "18:00".to_string(),
                sheet_id: 1,
            },
            GeneratedGame {
                team1_id: 3,
                team2_id: 4,
                game_date: date2,
                game_time: "18:00".to_string(),
                sheet_id: 1,
            },
        ];
        let mut caps = HashMap::new();
        caps.insert((date1, "18:00".to_string()), 2);
        caps.insert((date2, "18:00".to_string()), 2);
        // two games, two sheets available per draw -> one draw suffices
        let score = compactness_score(&games, &caps, 2);
        assert!(score >= COMPACTNESS_EXTRA_DRAW);
    }

    #[test]
    fn compute_team_stats_counts_positions_and_byes() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap();
        let games = vec![GeneratedGame {
            team1_id: 1,
            team2_id: 2,
            game_date: date,
            game_time: "18:00".to_string(),
            sheet_id: 5,
        }];
        let requests = vec![ByeRequest {
            team_id: 1,
            draw_date: date,
            priority: 1,
        }];
        let map = build_bye_map(&requests);
        let stats = compute_team_stats(&games, &[1, 2], &map);

        let team1 = stats.iter().find(|s| s.team_id == 1).unwrap();
        assert_eq!(team1.as_team1, 1);
        assert_eq!(team1.as_team2, 0);
        assert_eq!(team1.bye_conflicts.len(), 1);

        let team2 = stats.iter().find(|s| s.team_id == 2).unwrap();
        assert_eq!(team2.as_team2, 1);
        assert!(team2.bye_conflicts.is_empty());
    }
}
