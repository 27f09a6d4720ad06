//! League schedule generation: round-robin matchup construction, three-tier
//! greedy slot placement, and simulated-annealing refinement.
//!
//! The crate is a pure computation library. It owns no database, no
//! transport, and no process-wide state; a single call to [`generate`] (or
//! [`try_generate`]) runs one generation end to end and hands back a
//! [`ScheduleResult`]. Everything here is single-threaded and deterministic
//! given an identical [`ScheduleInput`] and a zero optimization budget.

pub mod algorithm;
pub mod scoring;

use std::collections::HashMap;

use chrono::{Datelike, Duration as ChronoDuration, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A division partitions teams into pools that intra-division strategies
/// draw from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Division {
    pub id: i32,
    pub name: String,
}

/// A team belongs to exactly one division.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: i32,
    pub division_id: i32,
    pub name: Option<String>,
}

/// A physical playing surface. Sheet identifiers are globally unique across
/// draw slots, even though the same physical sheet can appear in many of
/// them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sheet {
    pub id: i32,
    pub name: String,
    pub is_available: bool,
}

/// A (date, time) pair at which games can be played simultaneously, one per
/// available sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawSlot {
    pub date: NaiveDate,
    pub time: String,
    pub sheets: Vec<Sheet>,
}

/// A team's preference to be off on a given date. `priority` of 1 is most
/// preferred; lower-priority requests (3+) are penalised less.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByeRequest {
    pub team_id: i32,
    pub draw_date: NaiveDate,
    pub priority: u32,
}

/// One round-robin layer. `priority` orders strategies relative to each
/// other (lower runs first); same-priority strategies interleave their
/// rounds round-by-round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Strategy {
    pub local_id: i32,
    pub priority: i32,
    pub is_intra_division: bool,
    pub division_id: Option<i32>,
    pub games_per_team: i32,
    pub draw_slot_keys: Vec<String>,
}

/// Default time budget, in milliseconds, granted to the simulated-annealing
/// stage when the caller does not specify one.
pub const DEFAULT_OPTIMIZATION_TIME_BUDGET_MS: u64 = 30_000;

/// Everything a single generation run needs. Immutable for the duration of
/// the run; the caller owns it and must not mutate it while `generate` is
/// executing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleInput {
    pub strategies: Vec<Strategy>,
    pub teams: Vec<Team>,
    pub divisions: Vec<Division>,
    pub draw_slots: Vec<DrawSlot>,
    pub bye_requests: Vec<ByeRequest>,
    pub seed: u32,
    pub optimization_time_budget_ms: u64,
}

impl ScheduleInput {
    pub fn new(
        strategies: Vec<Strategy>,
        teams: Vec<Team>,
        divisions: Vec<Division>,
        draw_slots: Vec<DrawSlot>,
        bye_requests: Vec<ByeRequest>,
        seed: u32,
    ) -> Self {
        Self {
            strategies,
            teams,
            divisions,
            draw_slots,
            bye_requests,
            seed,
            optimization_time_budget_ms: DEFAULT_OPTIMIZATION_TIME_BUDGET_MS,
        }
    }

    pub fn with_time_budget_ms(mut self, budget_ms: u64) -> Self {
        self.optimization_time_budget_ms = budget_ms;
        self
    }
}

/// A matchup bound to a concrete (date, time, sheet).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedGame {
    pub team1_id: i32,
    pub team2_id: i32,
    pub game_date: NaiveDate,
    pub game_time: String,
    pub sheet_id: i32,
}

/// A matchup that no tier of the greedy search could place without
/// violating a hard constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnschedulableMatchup {
    pub team1_id: i32,
    pub team2_id: i32,
    pub strategy_local_id: i32,
    pub reason: String,
}

/// A single bye-preference miss recorded against a team's stats, independent
/// of whether it was severe enough to surface as a warning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByeConflict {
    pub draw_date: NaiveDate,
    pub priority: u32,
}

/// Per-team counts accumulated over the final game list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamStats {
    pub team_id: i32,
    pub as_team1: u32,
    pub as_team2: u32,
    pub draw_time_counts: HashMap<String, u32>,
    pub sheet_counts: HashMap<i32, u32>,
    pub bye_conflicts: Vec<ByeConflict>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub severity: Severity,
    pub message: String,
}

/// The final, assembled output of one generation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleResult {
    pub games: Vec<GeneratedGame>,
    pub unschedulable: Vec<UnschedulableMatchup>,
    pub team_stats: Vec<TeamStats>,
    pub warnings: Vec<Warning>,
    pub total_score: f64,
}

/// One observation emitted on the progress channel. `percent` is
/// monotonically non-decreasing within a phase, but may drop when a new
/// phase begins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub phase: String,
    pub percent: u8,
    pub message: String,
}

/// A caller-supplied sink for progress observations. The core must tolerate
/// a no-op sink (`()`), and any `FnMut(ProgressUpdate)` closure works too.
pub trait ProgressSink {
    fn report(&mut self, update: ProgressUpdate);
}

impl ProgressSink for () {
    fn report(&mut self, _update: ProgressUpdate) {}
}

impl<F> ProgressSink for F
where
    F: FnMut(ProgressUpdate),
{
    fn report(&mut self, update: ProgressUpdate) {
        self(update)
    }
}

/// Hard errors that terminate a run outright rather than degrading into a
/// well-formed empty result plus warnings. See `try_generate`.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleError {
    #[error("no teams were supplied")]
    NoTeams,
}

/// The ISO Monday date of the week containing `date` (Sunday maps to the
/// preceding Monday).
pub fn week_key(date: NaiveDate) -> NaiveDate {
    let days_from_monday = date.weekday().num_days_from_monday() as i64;
    date - ChronoDuration::days(days_from_monday)
}

/// The `"date|time"` key a draw slot is addressed by in `drawSlotKeys`.
pub fn draw_key(date: NaiveDate, time: &str) -> String {
    format!("{}|{}", date.format("%Y-%m-%d"), time)
}

/// Run the full three-stage pipeline. Never panics on empty teams, empty
/// strategies, zero draw slots, or zero games; those conditions degrade into
/// a well-formed empty result with explanatory warnings instead.
pub fn generate(input: &ScheduleInput, sink: &mut impl ProgressSink) -> ScheduleResult {
    sink.report(ProgressUpdate {
        phase: "Generating matchups".to_string(),
        percent: 0,
        message: String::new(),
    });

    log::info!(
        "generating matchups for {} strateg(ies), {} team(s)",
        input.strategies.len(),
        input.teams.len()
    );

    let rounds = algorithm::matchups::generate_matchups(&input.strategies, &input.teams);
    let total_matchups: usize = rounds.iter().map(Vec::len).sum();

    sink.report(ProgressUpdate {
        phase: "Generating matchups".to_string(),
        percent: 10,
        message: format!(
            "{total_matchups} matchup(s) across {} round(s)",
            rounds.len()
        ),
    });

    let bye_map = scoring::build_bye_map(&input.bye_requests);
    let team_ids: Vec<i32> = input.teams.iter().map(|t| t.id).collect();

    let pool = algorithm::slots::build_slot_pool(&input.draw_slots, &input.strategies);

    if pool.slots.is_empty() {
        log::warn!("slot pool is empty after filtering by strategy draw_slot_keys");

        let unschedulable: Vec<UnschedulableMatchup> = rounds
            .iter()
            .flatten()
            .map(|m| UnschedulableMatchup {
                team1_id: m.team1_id,
                team2_id: m.team2_id,
                strategy_local_id: m.strategy_local_id,
                reason: "No available slot without conflicts.".to_string(),
            })
            .collect();

        let mut warnings = vec![Warning {
            severity: Severity::Error,
            message: "no draw slots are available after filtering by strategy draw slot keys"
                .to_string(),
        }];
        if !unschedulable.is_empty() {
            warnings.push(Warning {
                severity: Severity::Warning,
                message: format!(
                    "{} matchup(s) could not be scheduled because no draw slots are available.",
                    unschedulable.len()
                ),
            });
        }

        sink.report(ProgressUpdate {
            phase: "Complete".to_string(),
            percent: 100,
            message: "no draw slots available".to_string(),
        });

        return ScheduleResult {
            games: Vec::new(),
            unschedulable,
            team_stats: scoring::compute_team_stats(&[], &team_ids, &bye_map),
            warnings,
            total_score: 0.0,
        };
    }

    let strategy_allowed_keys: HashMap<i32, std::collections::HashSet<String>> = input
        .strategies
        .iter()
        .map(|s| (s.local_id, s.draw_slot_keys.iter().cloned().collect()))
        .collect();

    let mut rng = algorithm::Rng::new(input.seed);

    let total_for_progress = total_matchups.max(1);
    let (games, unschedulable) = algorithm::slots::assign(
        &rounds,
        &pool,
        &strategy_allowed_keys,
        &bye_map,
        &mut rng,
        |processed, total| {
            if processed % 10 != 0 && processed != total {
                return;
            }
            let percent = ((processed as f64 / total_for_progress as f64) * 80.0).round() as i64;
            sink.report(ProgressUpdate {
                phase: "Assigning slots".to_string(),
                percent: percent.clamp(0, 80) as u8,
                message: format!("{processed}/{total_matchups} matchup(s) placed"),
            });
        },
    );

    if !unschedulable.is_empty() {
        log::warn!("{} matchup(s) could not be scheduled", unschedulable.len());
    }

    sink.report(ProgressUpdate {
        phase: "Optimizing".to_string(),
        percent: 80,
        message: "starting simulated annealing".to_string(),
    });

    let games = algorithm::anneal::anneal(
        games,
        &pool,
        &team_ids,
        &bye_map,
        input.optimization_time_budget_ms,
        &mut rng,
        |p, iterations, elapsed, best_score, improvements| {
            let percent = (80.0 + (p * 19.0).round()).min(99.0) as u8;
            sink.report(ProgressUpdate {
                phase: "Optimizing".to_string(),
                percent,
                message: format!(
                    "{improvements} improvement(s), score {best_score:.2}, {}k iter, {:.1}s",
                    iterations / 1000,
                    elapsed.as_secs_f64()
                ),
            });
        },
    );

    let total_score = scoring::total_schedule_score(&games, &team_ids, &bye_map)
        + scoring::compactness_score(&games, &pool.capacities, pool.num_sheets);

    let team_stats = scoring::compute_team_stats(&games, &team_ids, &bye_map);
    let warnings = assemble_warnings(&games, &unschedulable, &pool, &team_stats);

    sink.report(ProgressUpdate {
        phase: "Complete".to_string(),
        percent: 100,
        message: format!("{} game(s) scheduled, score {total_score:.2}", games.len()),
    });

    log::info!(
        "schedule generation complete: {} game(s), {} unschedulable, score {total_score:.2}",
        games.len(),
        unschedulable.len()
    );

    ScheduleResult {
        games,
        unschedulable,
        team_stats,
        warnings,
        total_score,
    }
}

/// Same as `generate`, but short-circuits with a typed [`ScheduleError`]
/// instead of paying for a pipeline run that is guaranteed to be empty.
/// `generate` itself never returns this error; it always produces a
/// well-formed (possibly empty) result.
pub fn try_generate(
    input: &ScheduleInput,
    sink: &mut impl ProgressSink,
) -> Result<ScheduleResult, ScheduleError> {
    if input.teams.is_empty() {
        log::error!("cannot generate a schedule for zero teams");
        return Err(ScheduleError::NoTeams);
    }
    Ok(generate(input, sink))
}

fn assemble_warnings(
    games: &[GeneratedGame],
    unschedulable: &[UnschedulableMatchup],
    pool: &algorithm::slots::SlotPool,
    team_stats: &[TeamStats],
) -> Vec<Warning> {
    let mut warnings = Vec::new();

    if !unschedulable.is_empty() {
        warnings.push(Warning {
            severity: Severity::Warning,
            message: format!(
                "{} matchup(s) could not be scheduled because no conflict-free slot was found.",
                unschedulable.len()
            ),
        });
    }

    let mut used_draws: HashMap<(NaiveDate, String), u32> = HashMap::new();
    for g in games {
        *used_draws
            .entry((g.game_date, g.game_time.clone()))
            .or_insert(0) += 1;
    }

    let num_sheets = pool.num_sheets.max(1);
    let target_draws = (games.len() as f64 / num_sheets as f64).ceil() as usize;
    if used_draws.len() > target_draws {
        warnings.push(Warning {
            severity: Severity::Warning,
            message: format!(
                "schedule uses {} draw(s), {} more than the {target_draws} theoretically required",
                used_draws.len(),
                used_draws.len() - target_draws
            ),
        });
    }

    let mut multi_empty_draws = 0usize;
    let mut total_empty: i64 = 0;
    for (key, count) in &used_draws {
        let cap = *pool.capacities.get(key).unwrap_or(count) as i64;
        let emp = cap - *count as i64;
        if emp > 1 {
            multi_empty_draws += 1;
        }
        total_empty += emp.max(0);
    }
    if multi_empty_draws > 0 {
        warnings.push(Warning {
            severity: Severity::Warning,
            message: format!("{multi_empty_draws} draw(s) have more than one empty sheet"),
        });
    }
    if total_empty >= pool.num_sheets as i64 {
        warnings.push(Warning {
            severity: Severity::Warning,
            message: format!(
                "{total_empty} total empty sheet(s) across the schedule, at least a full draw's worth of capacity is going unused"
            ),
        });
    }

    for stats in team_stats {
        if let (Some(min), Some(max)) = (
            stats.draw_time_counts.values().min(),
            stats.draw_time_counts.values().max(),
        ) {
            if max - min > 2 {
                warnings.push(Warning {
                    severity: Severity::Info,
                    message: format!(
                        "team {} has an uneven draw-time spread ({min} to {max})",
                        stats.team_id
                    ),
                });
            }
        }
        if stats.bye_conflicts.iter().any(|c| c.priority <= 2) {
            warnings.push(Warning {
                severity: Severity::Warning,
                message: format!(
                    "team {} has at least one high-priority bye conflict",
                    stats.team_id
                ),
            });
        }
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn week_key_maps_sunday_to_preceding_monday() {
        let sunday = NaiveDate::from_ymd_opt(2024, 1, 14).unwrap();
        let monday = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap();
        assert_eq!(week_key(sunday), monday);
    }

    #[test]
    fn week_key_is_idempotent_within_a_week() {
        let monday = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap();
        for offset in 0..7 {
            let date = monday + ChronoDuration::days(offset);
            assert_eq!(week_key(date), monday);
        }
    }

    #[test]
    fn draw_key_formats_date_and_time() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap();
        assert_eq!(draw_key(date, "18:00"), "2024-01-08|18:00");
    }

    #[test]
    fn generate_on_zero_teams_returns_well_formed_empty_result() {
        let input = ScheduleInput::new(vec![], vec![], vec![], vec![], vec![], 1);
        let result = generate(&input, &mut ());
        assert!(result.games.is_empty());
        assert!(result.unschedulable.is_empty());
        assert_eq!(result.total_score, 0.0);
    }

    #[test]
    fn try_generate_rejects_zero_teams() {
        let input = ScheduleInput::new(vec![], vec![], vec![], vec![], vec![], 1);
        assert_eq!(try_generate(&input, &mut ()), Err(ScheduleError::NoTeams));
    }
}
