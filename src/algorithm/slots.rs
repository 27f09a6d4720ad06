//! Three-tier greedy slot placement: prefer already-active draws, then
//! already-active weeks, then the earliest untouched week, scoring every
//! legal candidate in each tier and taking the minimum.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;

use crate::scoring::{
    bye_penalty, ByeMap, DRAW_FILL_BALANCE, DRAW_TIME_BALANCE, POSITION_BALANCE, SHEET_BALANCE,
};
use crate::{draw_key, week_key, DrawSlot, GeneratedGame, Strategy, UnschedulableMatchup};

use super::{MatchupRound, Matchup, Rng};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameSlot {
    pub date: NaiveDate,
    pub time: String,
    pub sheet_id: i32,
}

type SlotKey = (NaiveDate, String, i32);
type DrawKey = (NaiveDate, String);

/// Every placeable (date, time, sheet) triple, filtered to the draw keys
/// any strategy actually requested, plus the per-draw sheet capacity used
/// for compactness scoring.
pub struct SlotPool {
    pub slots: Vec<GameSlot>,
    pub capacities: HashMap<DrawKey, u32>,
    pub num_sheets: usize,
}

pub fn build_slot_pool(draw_slots: &[DrawSlot], strategies: &[Strategy]) -> SlotPool {
    let mut allowed: HashSet<String> = HashSet::new();
    for strategy in strategies {
        allowed.extend(strategy.draw_slot_keys.iter().cloned());
    }

    let mut slots = Vec::new();
    let mut capacities = HashMap::new();
    let mut distinct_sheets: HashSet<i32> = HashSet::new();

    for draw in draw_slots {
        for sheet in &draw.sheets {
            if sheet.is_available {
                distinct_sheets.insert(sheet.id);
            }
        }

        let key = draw_key(draw.date, &draw.time);
        if !allowed.contains(&key) {
            continue;
        }

        let mut capacity = 0u32;
        for sheet in &draw.sheets {
            if sheet.is_available {
                slots.push(GameSlot {
                    date: draw.date,
                    time: draw.time.clone(),
                    sheet_id: sheet.id,
                });
                capacity += 1;
            }
        }
        if capacity > 0 {
            capacities.insert((draw.date, draw.time.clone()), capacity);
        }
    }

    SlotPool {
        slots,
        capacities,
        num_sheets: distinct_sheets.len(),
    }
}

/// Mutable placement state, updated after every committed game.
struct Tracking {
    occupied: HashSet<SlotKey>,
    draw_teams: HashMap<DrawKey, HashSet<i32>>,
    week_teams: HashMap<NaiveDate, HashSet<i32>>,
    draw_game_counts: HashMap<DrawKey, u32>,
    team_draw_time_counts: HashMap<i32, HashMap<String, u32>>,
    team_sheet_counts: HashMap<i32, HashMap<i32, u32>>,
    team_position_counts: HashMap<i32, (u32, u32)>,
    active_draws: HashSet<DrawKey>,
    active_weeks: HashSet<NaiveDate>,
}

impl Tracking {
    fn new() -> Self {
        Self {
            occupied: HashSet::new(),
            draw_teams: HashMap::new(),
            week_teams: HashMap::new(),
            draw_game_counts: HashMap::new(),
            team_draw_time_counts: HashMap::new(),
            team_sheet_counts: HashMap::new(),
            team_position_counts: HashMap::new(),
            active_draws: HashSet::new(),
            active_weeks: HashSet::new(),
        }
    }

    fn is_active_draw(&self, date: NaiveDate, time: &str) -> bool {
        self.active_draws.contains(&(date, time.to_string()))
    }

    fn is_active_week(&self, date: NaiveDate) -> bool {
        self.active_weeks.contains(&week_key(date))
    }

    fn commit(&mut self, slot: &GameSlot, team1: i32, team2: i32) {
        let draw = (slot.date, slot.time.clone());
        let week = week_key(slot.date);

        self.occupied
            .insert((slot.date, slot.time.clone(), slot.sheet_id));
        self.draw_teams
            .entry(draw.clone())
            .or_default()
            .extend([team1, team2]);
        self.week_teams.entry(week).or_default().extend([team1, team2]);
        *self.draw_game_counts.entry(draw.clone()).or_insert(0) += 1;

        for team in [team1, team2] {
            *self
                .team_draw_time_counts
                .entry(team)
                .or_default()
                .entry(slot.time.clone())
                .or_insert(0) += 1;
            *self
                .team_sheet_counts
                .entry(team)
                .or_default()
                .entry(slot.sheet_id)
                .or_insert(0) += 1;
        }
        self.team_position_counts.entry(team1).or_insert((0, 0)).0 += 1;
        self.team_position_counts.entry(team2).or_insert((0, 0)).1 += 1;

        self.active_draws.insert(draw);
        self.active_weeks.insert(week);
    }
}

/// Place every matchup, round by round, in generation order. Matchups that
/// no tier can place without a hard-constraint violation land in the
/// returned unschedulable list instead.
pub fn assign(
    rounds: &[MatchupRound],
    pool: &SlotPool,
    strategy_allowed_keys: &HashMap<i32, HashSet<String>>,
    bye_map: &ByeMap,
    rng: &mut Rng,
    mut progress: impl FnMut(usize, usize),
) -> (Vec<GeneratedGame>, Vec<UnschedulableMatchup>) {
    let mut games = Vec::new();
    let mut unschedulable = Vec::new();

    if pool.slots.is_empty() {
        return (games, unschedulable);
    }

    let mut tracking = Tracking::new();

    let mut weeks: Vec<NaiveDate> = pool
        .capacities
        .keys()
        .map(|(date, _)| week_key(*date))
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    weeks.sort();

    let total: usize = rounds.iter().map(Vec::len).sum();
    let mut processed = 0usize;

    for round in rounds {
        for matchup in round {
            let placed = strategy_allowed_keys
                .get(&matchup.strategy_local_id)
                .and_then(|allowed_keys| {
                    try_place(&tracking, pool, &weeks, matchup, allowed_keys, bye_map, rng)
                });

            match placed {
                Some(slot) => {
                    let (team1_id, team2_id) = optimize_positions(&tracking, matchup);
                    tracking.commit(&slot, team1_id, team2_id);
                    games.push(GeneratedGame {
                        team1_id,
                        team2_id,
                        game_date: slot.date,
                        game_time: slot.time,
                        sheet_id: slot.sheet_id,
                    });
                }
                None => unschedulable.push(UnschedulableMatchup {
                    team1_id: matchup.team1_id,
                    team2_id: matchup.team2_id,
                    strategy_local_id: matchup.strategy_local_id,
                    reason: "No available slot without conflicts.".to_string(),
                }),
            }

            processed += 1;
            progress(processed, total);
        }
    }

    (games, unschedulable)
}

fn try_place(
    tracking: &Tracking,
    pool: &SlotPool,
    weeks: &[NaiveDate],
    matchup: &Matchup,
    allowed_keys: &HashSet<String>,
    bye_map: &ByeMap,
    rng: &mut Rng,
) -> Option<GameSlot> {
    // Tier 1: slots in draws that already host at least one committed game.
    let tier1 = pool
        .slots
        .iter()
        .filter(|s| tracking.is_active_draw(s.date, &s.time));
    if let Some(slot) = best_candidate(tracking, tier1, matchup, allowed_keys, bye_map, rng) {
        return Some(slot);
    }

    // Tier 2: inactive draws whose week is already active.
    let tier2 = pool.slots.iter().filter(|s| {
        !tracking.is_active_draw(s.date, &s.time) && tracking.is_active_week(s.date)
    });
    if let Some(slot) = best_candidate(tracking, tier2, matchup, allowed_keys, bye_map, rng) {
        return Some(slot);
    }

    // Tier 3: the earliest week with no active draw yet.
    for &week in weeks {
        if tracking.active_weeks.contains(&week) {
            continue;
        }
        let tier3 = pool.slots.iter().filter(|s| week_key(s.date) == week);
        if let Some(slot) = best_candidate(tracking, tier3, matchup, allowed_keys, bye_map, rng) {
            return Some(slot);
        }
    }

    None
}

fn best_candidate<'a>(
    tracking: &Tracking,
    slots: impl Iterator<Item = &'a GameSlot>,
    matchup: &Matchup,
    allowed_keys: &HashSet<String>,
    bye_map: &ByeMap,
    rng: &mut Rng,
) -> Option<GameSlot> {
    let mut best: Option<(f64, GameSlot)> = None;
    for slot in slots {
        let score = score_candidate(tracking, slot, matchup, allowed_keys, bye_map, rng);
        if score.is_finite() && best.as_ref().map_or(true, |(b, _)| score < *b) {
            best = Some((score, slot.clone()));
        }
    }
    best.map(|(_, slot)| slot)
}

fn score_candidate(
    tracking: &Tracking,
    slot: &GameSlot,
    matchup: &Matchup,
    allowed_keys: &HashSet<String>,
    bye_map: &ByeMap,
    rng: &mut Rng,
) -> f64 {
    if tracking
        .occupied
        .contains(&(slot.date, slot.time.clone(), slot.sheet_id))
    {
        return f64::INFINITY;
    }

    let key = draw_key(slot.date, &slot.time);
    if !allowed_keys.contains(&key) {
        return f64::INFINITY;
    }

    let draw = (slot.date, slot.time.clone());
    if tracking.draw_teams.get(&draw).is_some_and(|teams| {
        teams.contains(&matchup.team1_id) || teams.contains(&matchup.team2_id)
    }) {
        return f64::INFINITY;
    }

    let week = week_key(slot.date);
    if tracking.week_teams.get(&week).is_some_and(|teams| {
        teams.contains(&matchup.team1_id) || teams.contains(&matchup.team2_id)
    }) {
        return f64::INFINITY;
    }

    let mut score = 0.0;

    let games_in_draw = *tracking.draw_game_counts.get(&draw).unwrap_or(&0) as f64;
    score += games_in_draw * DRAW_FILL_BALANCE;

    score += bye_penalty(matchup.team1_id, matchup.team2_id, slot.date, bye_map);

    for team in [matchup.team1_id, matchup.team2_id] {
        let time_count = tracking
            .team_draw_time_counts
            .get(&team)
            .and_then(|m| m.get(&slot.time))
            .copied()
            .unwrap_or(0) as f64;
        score += time_count * DRAW_TIME_BALANCE * 0.5;

        let sheet_count = tracking
            .team_sheet_counts
            .get(&team)
            .and_then(|m| m.get(&slot.sheet_id))
            .copied()
            .unwrap_or(0) as f64;
        score += sheet_count * SHEET_BALANCE * 0.5;
    }

    let (t1_as1, t1_as2) = tracking
        .team_position_counts
        .get(&matchup.team1_id)
        .copied()
        .unwrap_or((0, 0));
    let t1_diff = t1_as1 as f64 - t1_as2 as f64;
    score += t1_diff.max(0.0) * POSITION_BALANCE * 0.5;

    let (t2_as1, t2_as2) = tracking
        .team_position_counts
        .get(&matchup.team2_id)
        .copied()
        .unwrap_or((0, 0));
    let t2_diff = t2_as1 as f64 - t2_as2 as f64;
    score += (-t2_diff).max(0.0) * POSITION_BALANCE * 0.5;

    score += rng.next_f64() * 0.01;

    score
}

/// Assign home/away so the team further ahead on position balance plays
/// the position it is behind on.
fn optimize_positions(tracking: &Tracking, matchup: &Matchup) -> (i32, i32) {
    let (t1_as1, t1_as2) = tracking
        .team_position_counts
        .get(&matchup.team1_id)
        .copied()
        .unwrap_or((0, 0));
    let (t2_as1, t2_as2) = tracking
        .team_position_counts
        .get(&matchup.team2_id)
        .copied()
        .unwrap_or((0, 0));

    let t1_diff = t1_as1 as i64 - t1_as2 as i64;
    let t2_diff = t2_as1 as i64 - t2_as2 as i64;

    if t1_diff > t2_diff {
        (matchup.team2_id, matchup.team1_id)
    } else {
        (matchup.team1_id, matchup.team2_id)
    }
}
