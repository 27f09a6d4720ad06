//! Simulated annealing over a fully-placed schedule: four local move types,
//! a geometric cooling schedule, and a hard-constraint gate applied before
//! every Metropolis acceptance test.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use chrono::NaiveDate;

use crate::scoring::{compactness_score, total_schedule_score, ByeMap};
use crate::{week_key, GeneratedGame};

use super::slots::SlotPool;
use super::Rng;

type SlotKey = (NaiveDate, String, i32);

const FINAL_TEMPERATURE: f64 = 0.01;
const RELOCATE_ATTEMPTS: u32 = 30;

fn slot_key(game: &GeneratedGame) -> SlotKey {
    (game.game_date, game.game_time.clone(), game.sheet_id)
}

/// A snapshot of what a move touched, sufficient to reverse it exactly.
struct Undo {
    restore: Vec<(usize, GeneratedGame)>,
    occ_remove: Vec<SlotKey>,
    occ_add: Vec<SlotKey>,
}

impl Undo {
    fn apply(self, games: &mut [GeneratedGame], occupied: &mut HashSet<SlotKey>) {
        for key in self.occ_add {
            occupied.remove(&key);
        }
        for key in self.occ_remove {
            occupied.insert(key);
        }
        for (i, saved) in self.restore {
            games[i] = saved;
        }
    }
}

/// Refine `games` in place (conceptually) for up to `budget_ms` milliseconds
/// and return the best schedule observed. A budget of `0` returns the input
/// unchanged without consuming any randomness, which is what keeps
/// generation deterministic end to end when no optimization is requested.
/// Schedules with fewer than two games are returned unchanged; there is
/// nothing to improve by swapping, relocating, or cycling a single game.
pub fn anneal(
    mut games: Vec<GeneratedGame>,
    pool: &SlotPool,
    team_ids: &[i32],
    bye_map: &ByeMap,
    budget_ms: u64,
    rng: &mut Rng,
    mut progress: impl FnMut(f64, u64, Duration, f64, u64),
) -> Vec<GeneratedGame> {
    if games.len() < 2 {
        return games;
    }

    let budget = Duration::from_millis(budget_ms);
    if budget.is_zero() {
        return games;
    }

    let active_draw_keys: HashSet<(NaiveDate, String)> = games
        .iter()
        .map(|g| (g.game_date, g.game_time.clone()))
        .collect();
    let active_slots: Vec<super::slots::GameSlot> = pool
        .slots
        .iter()
        .filter(|s| active_draw_keys.contains(&(s.date, s.time.clone())))
        .cloned()
        .collect();

    let mut occupied: HashSet<SlotKey> = games.iter().map(slot_key).collect();

    let initial_score = total_schedule_score(&games, team_ids, bye_map)
        + compactness_score(&games, &pool.capacities, pool.num_sheets);
    let t0 = (0.05 * initial_score).max(500.0);

    let mut current_score = initial_score;
    let mut best_games = games.clone();
    let mut best_score = initial_score;
    let mut improvements: u64 = 0;
    let mut iterations: u64 = 0;

    let start = Instant::now();
    let mut last_report = start;

    loop {
        let elapsed = start.elapsed();
        if elapsed >= budget {
            break;
        }

        let p = (elapsed.as_secs_f64() / budget.as_secs_f64().max(1e-9)).min(1.0);
        let temperature = t0 * (FINAL_TEMPERATURE / t0).powf(p);

        let dice = rng.next_f64();
        let undo = if dice < 0.35 {
            try_swap(&mut games, &mut occupied, rng)
        } else if dice < 0.60 {
            try_relocate(&mut games, &mut occupied, &active_slots, rng)
        } else if dice < 0.85 {
            try_cycle(&mut games, &mut occupied, rng)
        } else {
            Some(try_position(&mut games, rng))
        };

        let Some(undo) = undo else {
            iterations += 1;
            continue;
        };

        if !hard_constraints_ok(&games) {
            undo.apply(&mut games, &mut occupied);
            iterations += 1;
            continue;
        }

        let new_score = total_schedule_score(&games, team_ids, bye_map)
            + compactness_score(&games, &pool.capacities, pool.num_sheets);
        let delta = new_score - current_score;

        let accept = delta <= 0.0 || rng.next_f64() < (-delta / temperature).exp();

        if accept {
            current_score = new_score;
            if new_score < best_score {
                best_score = new_score;
                best_games = games.clone();
                improvements += 1;
            }
        } else {
            undo.apply(&mut games, &mut occupied);
        }

        iterations += 1;

        if last_report.elapsed() >= Duration::from_millis(500) {
            progress(p, iterations, start.elapsed(), best_score, improvements);
            last_report = Instant::now();
        }
    }

    best_games
}

fn hard_constraints_ok(games: &[GeneratedGame]) -> bool {
    let mut draw_teams: std::collections::HashMap<(NaiveDate, String), HashSet<i32>> =
        std::collections::HashMap::new();
    let mut week_teams: std::collections::HashMap<NaiveDate, HashSet<i32>> =
        std::collections::HashMap::new();

    for game in games {
        let draw = (game.game_date, game.game_time.clone());
        let entry = draw_teams.entry(draw).or_default();
        if !entry.insert(game.team1_id) || !entry.insert(game.team2_id) {
            return false;
        }

        let week = week_key(game.game_date);
        let entry = week_teams.entry(week).or_default();
        if !entry.insert(game.team1_id) || !entry.insert(game.team2_id) {
            return false;
        }
    }

    true
}

fn try_swap(
    games: &mut [GeneratedGame],
    occupied: &mut HashSet<SlotKey>,
    rng: &mut Rng,
) -> Option<Undo> {
    if games.len() < 2 {
        return None;
    }
    let i = rng.gen_range(games.len());
    let mut j = rng.gen_range(games.len());
    while j == i {
        j = rng.gen_range(games.len());
    }

    let saved_i = games[i].clone();
    let saved_j = games[j].clone();
    let occ_i = slot_key(&games[i]);
    let occ_j = slot_key(&games[j]);

    let (date_i, time_i, sheet_i) = (games[i].game_date, games[i].game_time.clone(), games[i].sheet_id);
    let (date_j, time_j, sheet_j) = (games[j].game_date, games[j].game_time.clone(), games[j].sheet_id);

    games[i].game_date = date_j;
    games[i].game_time = time_j;
    games[i].sheet_id = sheet_j;
    games[j].game_date = date_i;
    games[j].game_time = time_i;
    games[j].sheet_id = sheet_i;

    occupied.remove(&occ_i);
    occupied.remove(&occ_j);
    let new_i = slot_key(&games[i]);
    let new_j = slot_key(&games[j]);
    occupied.insert(new_i.clone());
    occupied.insert(new_j.clone());

    Some(Undo {
        restore: vec![(i, saved_i), (j, saved_j)],
        occ_remove: vec![occ_i, occ_j],
        occ_add: vec![new_i, new_j],
    })
}

fn try_relocate(
    games: &mut [GeneratedGame],
    occupied: &mut HashSet<SlotKey>,
    active_slots: &[super::slots::GameSlot],
    rng: &mut Rng,
) -> Option<Undo> {
    if games.is_empty() || active_slots.is_empty() {
        return None;
    }

    let game_idx = rng.gen_range(games.len());
    for _ in 0..RELOCATE_ATTEMPTS {
        let candidate = &active_slots[rng.gen_range(active_slots.len())];
        let key = (candidate.date, candidate.time.clone(), candidate.sheet_id);
        if occupied.contains(&key) {
            continue;
        }

        let saved = games[game_idx].clone();
        let old_key = slot_key(&games[game_idx]);

        games[game_idx].game_date = candidate.date;
        games[game_idx].game_time = candidate.time.clone();
        games[game_idx].sheet_id = candidate.sheet_id;

        occupied.remove(&old_key);
        occupied.insert(key.clone());

        return Some(Undo {
            restore: vec![(game_idx, saved)],
            occ_remove: vec![old_key],
            occ_add: vec![key],
        });
    }

    None
}

fn try_cycle(
    games: &mut [GeneratedGame],
    occupied: &mut HashSet<SlotKey>,
    rng: &mut Rng,
) -> Option<Undo> {
    if games.len() < 3 {
        return None;
    }

    let i = rng.gen_range(games.len());
    let mut j = rng.gen_range(games.len());
    while j == i {
        j = rng.gen_range(games.len());
    }
    let mut k = rng.gen_range(games.len());
    while k == i || k == j {
        k = rng.gen_range(games.len());
    }

    let saved = vec![
        (i, games[i].clone()),
        (j, games[j].clone()),
        (k, games[k].clone()),
    ];
    let occ_remove = vec![slot_key(&games[i]), slot_key(&games[j]), slot_key(&games[k])];

    let (di, ti, si) = (games[i].game_date, games[i].game_time.clone(), games[i].sheet_id);
    let (dj, tj, sj) = (games[j].game_date, games[j].game_time.clone(), games[j].sheet_id);
    let (dk, tk, sk) = (games[k].game_date, games[k].game_time.clone(), games[k].sheet_id);

    games[i].game_date = dk;
    games[i].game_time = tk;
    games[i].sheet_id = sk;
    games[j].game_date = di;
    games[j].game_time = ti;
    games[j].sheet_id = si;
    games[k].game_date = dj;
    games[k].game_time = tj;
    games[k].sheet_id = sj;

    let occ_add = vec![slot_key(&games[i]), slot_key(&games[j]), slot_key(&games[k])];

    for key in &occ_remove {
        occupied.remove(key);
    }
    for key in &occ_add {
        occupied.insert(key.clone());
    }

    Some(Undo {
        restore: saved,
        occ_remove,
        occ_add,
    })
}

fn try_position(games: &mut [GeneratedGame], rng: &mut Rng) -> Undo {
    let i = rng.gen_range(games.len());
    let saved = games[i].clone();
    std::mem::swap(&mut games[i].team1_id, &mut games[i].team2_id);
    Undo {
        restore: vec![(i, saved)],
        occ_remove: vec![],
        occ_add: vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::build_bye_map;

    fn game(team1: i32, team2: i32, day: u32, time: &str, sheet: i32) -> GeneratedGame {
        GeneratedGame {
            team1_id: team1,
            team2_id: team2,
            game_date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            game_time: time.to_string(),
            sheet_id: sheet,
        }
    }

    #[test]
    fn zero_budget_returns_input_unchanged() {
        let games = vec![game(1, 2, 8, "18:00", 1), game(3, 4, 8, "20:00", 2)];
        let pool = SlotPool {
            slots: vec![],
            capacities: std::collections::HashMap::new(),
            num_sheets: 2,
        };
        let bye_map = build_bye_map(&[]);
        let mut rng = Rng::new(1);
        let result = anneal(
            games.clone(),
            &pool,
            &[1, 2, 3, 4],
            &bye_map,
            0,
            &mut rng,
            |_, _, _, _, _| {},
        );
        assert_eq!(result, games);
    }

    #[test]
    fn fewer_than_two_games_short_circuits() {
        let games = vec![game(1, 2, 8, "18:00", 1)];
        let pool = SlotPool {
            slots: vec![],
            capacities: std::collections::HashMap::new(),
            num_sheets: 1,
        };
        let bye_map = build_bye_map(&[]);
        let mut rng = Rng::new(1);
        let result = anneal(
            games.clone(),
            &pool,
            &[1, 2],
            &bye_map,
            5_000,
            &mut rng,
            |_, _, _, _, _| {},
        );
        assert_eq!(result, games);
    }

    #[test]
    fn hard_constraints_reject_duplicate_team_in_same_draw() {
        let games = vec![game(1, 2, 8, "18:00", 1), game(1, 3, 8, "18:00", 2)];
        assert!(!hard_constraints_ok(&games));
    }

    #[test]
    fn hard_constraints_reject_duplicate_team_in_same_week() {
        let games = vec![game(1, 2, 8, "18:00", 1), game(1, 3, 9, "18:00", 2)];
        assert!(!hard_constraints_ok(&games));
    }

    #[test]
    fn hard_constraints_accept_disjoint_schedule() {
        let games = vec![game(1, 2, 8, "18:00", 1), game(3, 4, 8, "18:00", 2)];
        assert!(hard_constraints_ok(&games));
    }
}
