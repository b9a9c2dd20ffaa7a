// Integration tests for the seat-race engine.
//
// These drive the engine facade end to end over an in-memory database:
// session submission, full recalculation, the Bradley-Terry model and its
// probability matrix, the comparison graph, and schedule generation feeding
// back into submitted results.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use chrono::NaiveDate;

use seatrace_core::config::{RatingConfig, SchedulerConfig};
use seatrace_core::db::Database;
use seatrace_core::engine::{SeatRaceEngine, SubmitOutcome};
use seatrace_core::race::{Athlete, AthleteId, Boat, BoatClass, Piece, SeatAssignment, Session, Side};
use seatrace_core::rating::elo::RatingType;
use seatrace_core::schedule::{self, ScheduleRequest, SwapSchedule};

// ===========================================================================
// Test helpers
// ===========================================================================

const TEAM: &str = "varsity";

fn engine() -> SeatRaceEngine {
    let db = Database::open(":memory:").unwrap();
    SeatRaceEngine::new(db, RatingConfig::default(), Duration::from_secs(300))
}

fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 5, day).unwrap()
}

/// Rowers in seats 1.. with standard sweep rigging, plus an optional cox in
/// the seat after stroke.
fn boat(name: &str, time: Option<f64>, rowers: &[AthleteId], cox: Option<AthleteId>) -> Boat {
    let mut assignments: Vec<SeatAssignment> = rowers
        .iter()
        .enumerate()
        .map(|(i, &athlete_id)| SeatAssignment {
            seat_number: i as u8 + 1,
            side: if (i + 1) % 2 == 0 { Side::Port } else { Side::Starboard },
            athlete_id,
        })
        .collect();
    if let Some(athlete_id) = cox {
        assignments.push(SeatAssignment {
            seat_number: rowers.len() as u8 + 1,
            side: Side::Cox,
            athlete_id,
        });
    }
    Boat {
        name: name.into(),
        shell_name: None,
        finish_time_seconds: time,
        handicap_seconds: 0.0,
        assignments,
    }
}

fn piece(order: u32, boats: Vec<Boat>) -> Piece {
    Piece {
        sequence_order: order,
        distance_meters: Some(1500),
        direction: None,
        boats,
    }
}

fn session(id: &str, day: u32, class: BoatClass, pieces: Vec<Piece>) -> Session {
    Session {
        id: id.into(),
        team_id: TEAM.into(),
        date: date(day),
        boat_class: class,
        location: None,
        conditions: None,
        pieces,
    }
}

/// A single-sculls session: each (winner, loser) pair races one piece with a
/// clear two-second margin.
fn singles(id: &str, day: u32, races: &[(AthleteId, AthleteId)]) -> Session {
    let pieces = races
        .iter()
        .enumerate()
        .map(|(i, &(winner, loser))| {
            piece(
                i as u32 + 1,
                vec![
                    boat("A", Some(420.0), &[winner], None),
                    boat("B", Some(422.0), &[loser], None),
                ],
            )
        })
        .collect();
    session(id, day, BoatClass::Single, pieces)
}

fn elo_values(engine: &SeatRaceEngine) -> Vec<(AthleteId, f64, u32)> {
    let mut rows: Vec<(AthleteId, f64, u32)> = engine
        .ratings(TEAM, RatingType::SeatRaceElo)
        .unwrap()
        .into_iter()
        .map(|r| (r.athlete_id, r.value, r.races_count))
        .collect();
    rows.sort_by_key(|r| r.0);
    rows
}

// ===========================================================================
// Ratings
// ===========================================================================

#[test]
fn incremental_submission_matches_full_recalculation() {
    let engine = engine();
    engine
        .submit_session_results(&singles("s1", 1, &[(1, 2), (3, 2)]))
        .unwrap();
    engine
        .submit_session_results(&singles("s2", 2, &[(2, 1), (3, 1)]))
        .unwrap();
    let incremental = elo_values(&engine);
    assert_eq!(incremental.len(), 3);

    let summary = engine.recalculate_all_ratings(TEAM).unwrap();
    assert_eq!(summary.sessions, 2);
    assert_eq!(summary.outcomes, 4);
    assert_eq!(summary.updated, 3);

    let replayed = elo_values(&engine);
    for (a, b) in incremental.iter().zip(&replayed) {
        assert_eq!(a.0, b.0);
        assert!((a.1 - b.1).abs() < 1e-9, "athlete {}: {} vs {}", a.0, a.1, b.1);
        assert_eq!(a.2, b.2);
    }
}

#[test]
fn back_dated_session_matches_full_recalculation() {
    let engine = engine();
    let late = engine
        .submit_session_results(&singles("late", 10, &[(1, 2)]))
        .unwrap();
    assert!(matches!(late, SubmitOutcome::Applied { replayed: false, .. }));

    let early = engine
        .submit_session_results(&singles("early", 1, &[(2, 1), (2, 3)]))
        .unwrap();
    assert_eq!(
        early,
        SubmitOutcome::Applied {
            outcomes: 2,
            athletes_updated: 3,
            replayed: true,
        }
    );
    let submitted = elo_values(&engine);

    engine.recalculate_all_ratings(TEAM).unwrap();
    assert_eq!(elo_values(&engine), submitted);
    assert_eq!(
        engine.submit_session_results(&singles("early", 1, &[(2, 1), (2, 3)])).unwrap(),
        SubmitOutcome::AlreadyProcessed
    );
}

#[test]
fn recalculation_is_deterministic_and_zero_sum() {
    let engine = engine();
    engine
        .submit_session_results(&singles("s1", 3, &[(1, 2), (2, 3), (1, 3)]))
        .unwrap();
    engine
        .submit_session_results(&singles("s2", 4, &[(3, 1), (2, 1)]))
        .unwrap();

    engine.recalculate_all_ratings(TEAM).unwrap();
    let first = elo_values(&engine);
    engine.recalculate_all_ratings(TEAM).unwrap();
    let second = elo_values(&engine);
    assert_eq!(first, second);

    // Every update moves the same amount in opposite directions.
    let total: f64 = first.iter().map(|r| r.1).sum();
    assert!((total - 3.0 * 1500.0).abs() < 1e-9);
}

#[test]
fn recalculation_writes_combined_ratings() {
    let engine = engine();
    engine
        .submit_session_results(&singles("s1", 1, &[(1, 2), (1, 2), (2, 1)]))
        .unwrap();
    assert!(engine.ratings(TEAM, RatingType::Combined).unwrap().is_empty());

    engine.recalculate_all_ratings(TEAM).unwrap();
    let combined = engine.ratings(TEAM, RatingType::Combined).unwrap();
    assert_eq!(combined.len(), 2);
    assert_eq!(combined[0].athlete_id, 1);
    assert!(combined[0].value > 1500.0);
    assert!(combined[1].value < 1500.0);
}

#[test]
fn eight_versus_eight_yields_sixty_four_outcomes() {
    let engine = engine();
    let fast: Vec<AthleteId> = (1..=8).collect();
    let slow: Vec<AthleteId> = (11..=18).collect();
    let s = session(
        "eights",
        1,
        BoatClass::Eight,
        vec![piece(
            1,
            vec![
                boat("Boat A", Some(360.0), &fast, Some(90)),
                boat("Boat B", Some(363.5), &slow, Some(91)),
            ],
        )],
    );

    let outcome = engine.submit_session_results(&s).unwrap();
    assert_eq!(
        outcome,
        SubmitOutcome::Applied {
            outcomes: 64,
            athletes_updated: 16,
            replayed: false,
        }
    );

    // Coxswains steer; they never get a seat-race rating.
    let rows = elo_values(&engine);
    assert_eq!(rows.len(), 16);
    assert!(rows.iter().all(|r| r.0 != 90 && r.0 != 91));
    assert!(rows.iter().all(|r| r.2 == 8));
    assert!(rows.iter().filter(|r| r.0 <= 8).all(|r| r.1 > 1500.0));
}

#[test]
fn duplicate_submission_changes_nothing() {
    let engine = engine();
    let s = singles("s1", 1, &[(1, 2)]);
    engine.submit_session_results(&s).unwrap();
    let before = elo_values(&engine);

    assert_eq!(
        engine.submit_session_results(&s).unwrap(),
        SubmitOutcome::AlreadyProcessed
    );
    assert_eq!(elo_values(&engine), before);

    engine.recalculate_all_ratings(TEAM).unwrap();
    assert_eq!(
        engine.submit_session_results(&s).unwrap(),
        SubmitOutcome::AlreadyProcessed
    );
}

#[test]
fn removed_athlete_keeps_history() {
    let engine = engine();
    for id in 1..=3 {
        engine
            .register_athlete(TEAM, &Athlete::new(id, &format!("Rower {id}"), Side::Both))
            .unwrap();
    }
    engine
        .submit_session_results(&singles("s1", 1, &[(1, 2), (3, 1)]))
        .unwrap();

    assert!(engine.remove_athlete(TEAM, 3).unwrap());
    assert!(!engine.remove_athlete(TEAM, 3).unwrap());
    assert_eq!(engine.roster(TEAM).unwrap().len(), 2);

    engine.recalculate_all_ratings(TEAM).unwrap();
    let rows = elo_values(&engine);
    assert!(rows.iter().any(|r| r.0 == 3 && r.1 > 1500.0));

    let graph = engine.comparison_graph(TEAM).unwrap();
    assert!(graph.nodes.iter().any(|n| n.athlete_id == 3));
    assert!(engine.bradley_terry_model(TEAM).unwrap().athlete(3).is_some());
}

// ===========================================================================
// Model, matrix, graph
// ===========================================================================

#[test]
fn probability_matrix_reflects_head_to_head_record() {
    let engine = engine();
    engine
        .submit_session_results(&singles("s1", 1, &[(1, 2), (1, 2), (2, 1)]))
        .unwrap();

    let model = engine.bradley_terry_model(TEAM).unwrap();
    assert!(model.convergence.converged);
    // Two wins to one, pulled slightly toward even by the ghost opponent.
    let ratio = model.strength(1).unwrap() / model.strength(2).unwrap();
    assert!(ratio > 1.9 && ratio < 2.0, "ratio {ratio}");

    let matrix = engine.probability_matrix(TEAM).unwrap();
    let p12 = matrix.probability(1, 2).unwrap();
    let p21 = matrix.probability(2, 1).unwrap();
    assert!(p12 > 0.65 && p12 < 2.0 / 3.0, "p12 {p12}");
    assert!((p12 + p21 - 1.0).abs() < 1e-12);
    assert!(matrix.probability(1, 1).is_none());
    assert!(matrix.probability(1, 99).is_none());
}

#[test]
fn disconnected_groups_are_reported() {
    let engine = engine();
    engine
        .register_athlete(TEAM, &Athlete::new(5, "Newcomer", Side::Port))
        .unwrap();
    engine
        .submit_session_results(&singles("s1", 1, &[(1, 2), (3, 4)]))
        .unwrap();

    let graph = engine.comparison_graph(TEAM).unwrap();
    assert_eq!(graph.statistics.node_count, 5);
    assert_eq!(graph.statistics.compared_count, 4);
    assert_eq!(graph.statistics.component_count, 2);
    assert!((graph.statistics.connectivity - 2.0 / 6.0).abs() < 1e-12);
    assert_eq!(graph.components[0], vec![1, 2]);
    assert_eq!(graph.isolated_components(), &[vec![3, 4]][..]);
    assert_eq!(graph.uncompared, vec![5]);
    assert_eq!(graph.comparison_count(2, 1), 1);
    assert_eq!(graph.comparison_count(1, 3), 0);

    let model = engine.bradley_terry_model(TEAM).unwrap();
    assert_eq!(model.stats.athlete_count, 4);
    assert_eq!(model.stats.component_count, graph.statistics.component_count);
    assert_eq!(model.stats.graph_connectivity, graph.statistics.connectivity);
}

#[test]
fn graph_and_model_agree_with_registered_newcomer() {
    let engine = engine();
    engine
        .submit_session_results(&singles("s1", 1, &[(1, 2), (1, 2)]))
        .unwrap();
    engine
        .register_athlete(TEAM, &Athlete::new(9, "Newcomer", Side::Starboard))
        .unwrap();

    let graph = engine.comparison_graph(TEAM).unwrap();
    let model = engine.bradley_terry_model(TEAM).unwrap();
    assert_eq!(graph.nodes.len(), 3);
    assert_eq!(graph.statistics.connectivity, 1.0);
    assert_eq!(model.stats.graph_connectivity, 1.0);
    assert!(graph.gaps.is_empty());
    assert_eq!(graph.uncompared, vec![9]);
}

#[test]
fn cached_analysis_refreshes_after_submission() {
    let engine = engine();
    engine
        .submit_session_results(&singles("s1", 1, &[(1, 2)]))
        .unwrap();
    let before = engine.comparison_graph(TEAM).unwrap();
    assert_eq!(before.statistics.total_comparisons, 1);

    engine
        .submit_session_results(&singles("s2", 2, &[(2, 3)]))
        .unwrap();
    let after = engine.comparison_graph(TEAM).unwrap();
    assert_eq!(after.statistics.total_comparisons, 2);
    assert_eq!(after.statistics.component_count, 1);
}

// ===========================================================================
// Scheduling
// ===========================================================================

fn register_sweep_squad(engine: &SeatRaceEngine) -> Vec<AthleteId> {
    let mut ids = Vec::new();
    for i in 1..=4 {
        engine
            .register_athlete(TEAM, &Athlete::new(i, &format!("Port {i}"), Side::Port))
            .unwrap();
        ids.push(i);
    }
    for i in 11..=14 {
        engine
            .register_athlete(TEAM, &Athlete::new(i, &format!("Stbd {i}"), Side::Starboard))
            .unwrap();
        ids.push(i);
    }
    ids
}

#[test]
fn schedule_round_trips_through_submission() {
    let engine = engine();
    let ids = register_sweep_squad(&engine);
    let request = ScheduleRequest {
        athlete_ids: ids.clone(),
        boat_class: BoatClass::StraightFour,
        piece_count: Some(3),
    };

    let first = engine.generate_swap_schedule(TEAM, &request).unwrap();
    assert_eq!(first.piece_count, 3);
    assert_eq!(first.boats_per_piece, 2);
    assert_eq!(first.statistics.balance, 1.0);
    assert!(first.statistics.per_athlete_pieces.values().all(|&n| n == 3));
    assert!(first.statistics.new_comparisons >= 16);

    // Every planned seat matches the athlete's side.
    for planned in &first.pieces {
        for b in &planned.boats {
            for a in &b.assignments {
                let expected = if a.athlete_id < 10 { Side::Port } else { Side::Starboard };
                assert_eq!(a.side, expected);
            }
        }
    }

    // Fill in times: the first boat wins every piece.
    let mut raced = first.to_session("swap-1", TEAM, date(10));
    assert!(raced.pieces.iter().flat_map(|p| &p.boats).all(|b| b.finish_time_seconds.is_none()));
    for p in &mut raced.pieces {
        for (i, b) in p.boats.iter_mut().enumerate() {
            b.finish_time_seconds = Some(400.0 + 2.0 * i as f64);
        }
    }
    assert_eq!(
        engine.submit_session_results(&raced).unwrap(),
        SubmitOutcome::Applied {
            outcomes: 48,
            athletes_updated: 8,
            replayed: false,
        }
    );

    // At least one piece's 16 cross-boat pairs are now compared.
    let second = engine.generate_swap_schedule(TEAM, &request).unwrap();
    assert!(second.statistics.new_comparisons <= 28 - 16);
}

#[test]
fn schedule_rejects_athletes_off_the_roster() {
    let engine = engine();
    let mut ids = register_sweep_squad(&engine);
    ids.push(77);
    let request = ScheduleRequest {
        athlete_ids: ids,
        boat_class: BoatClass::StraightFour,
        piece_count: None,
    };
    let err = engine.generate_swap_schedule(TEAM, &request).unwrap_err();
    assert!(err.to_string().contains("77"), "{err}");
}

/// Roster of `port`, `starboard`, `both` and `cox` athletes with ids numbered
/// from 1 in that order.
fn mixed_roster(port: usize, starboard: usize, both: usize, cox: usize) -> Vec<Athlete> {
    let sides = [(Side::Port, port), (Side::Starboard, starboard), (Side::Both, both), (Side::Cox, cox)];
    sides
        .iter()
        .flat_map(|&(side, n)| std::iter::repeat(side).take(n))
        .enumerate()
        .map(|(i, side)| Athlete::new(i as AthleteId + 1, &format!("Athlete {}", i + 1), side))
        .collect()
}

#[test]
fn every_accepted_schedule_is_balanced_and_side_legal() {
    let config = SchedulerConfig {
        min_pieces_per_athlete: 3,
        search_iterations: 20,
    };
    let classes = [
        BoatClass::Eight,
        BoatClass::CoxedFour,
        BoatClass::StraightFour,
        BoatClass::Quad,
        BoatClass::Pair,
        BoatClass::Double,
        BoatClass::Single,
    ];

    for class in classes {
        let r = class.rowers();
        let mut accepted = 0;
        for port in [0, 1, r, r + 3] {
            for starboard in [0, r / 2, r + 1] {
                for both in [0, 2, r] {
                    for cox in [0, 1, 3] {
                        for piece_count in [None, Some(1), Some(5)] {
                            let roster = mixed_roster(port, starboard, both, cox);
                            let request = ScheduleRequest {
                                athlete_ids: roster.iter().map(|a| a.id).collect(),
                                boat_class: class,
                                piece_count,
                            };
                            let Ok(plan) = schedule::generate(&request, &roster, None, &config) else {
                                continue;
                            };
                            accepted += 1;
                            let case = format!("{class} p{port} s{starboard} b{both} c{cox} {piece_count:?}");
                            check_schedule(&plan, &roster, &case);
                        }
                    }
                }
            }
        }
        assert!(accepted > 0, "no {class} mix produced a schedule");
    }
}

fn check_schedule(plan: &SwapSchedule, roster: &[Athlete], case: &str) {
    let class = plan.boat_class;
    let side_of: HashMap<AthleteId, Side> = roster.iter().map(|a| (a.id, a.side)).collect();
    let scheduled: Vec<AthleteId> = roster
        .iter()
        .filter(|a| a.side != Side::Cox || class.has_cox())
        .map(|a| a.id)
        .collect();

    let mut loads: BTreeMap<AthleteId, usize> = scheduled.iter().map(|&id| (id, 0)).collect();
    assert_eq!(plan.pieces.len(), plan.piece_count, "{case}");
    for piece in &plan.pieces {
        assert_eq!(piece.boats.len(), plan.boats_per_piece, "{case}");
        let mut seen = BTreeSet::new();
        for boat in &piece.boats {
            let rowers = boat.assignments.iter().filter(|a| a.side != Side::Cox).count();
            let coxes = boat.assignments.len() - rowers;
            assert_eq!(rowers, class.rowers(), "{case}: short crew in {}", boat.name);
            assert_eq!(coxes, usize::from(class.has_cox()), "{case}: cox count in {}", boat.name);

            for seat in &boat.assignments {
                let athlete = seat.athlete_id;
                assert_eq!(
                    class.seat_side(seat.seat_number),
                    Some(seat.side),
                    "{case}: seat {} rigging",
                    seat.seat_number
                );
                assert!(
                    side_of[&athlete].can_fill(seat.side),
                    "{case}: athlete {athlete} in a {} seat",
                    seat.side
                );
                assert!(seen.insert(athlete), "{case}: athlete {athlete} seated twice");
                *loads.entry(athlete).or_default() += 1;
            }
        }
        for id in &piece.resting {
            assert!(seen.insert(*id), "{case}: athlete {id} both rests and races");
        }
        assert_eq!(seen.len(), scheduled.len(), "{case}");
    }

    let spread = |side_filter: fn(Side) -> bool| {
        let counts: Vec<usize> = loads
            .iter()
            .filter(|(id, _)| side_filter(side_of[*id]))
            .map(|(_, &n)| n)
            .collect();
        counts.iter().max().unwrap_or(&0) - counts.iter().min().unwrap_or(&0)
    };
    assert!(spread(|s| s.is_rower()) <= 1, "{case}: rower loads {loads:?}");
    assert!(spread(|s| s == Side::Cox) <= 1, "{case}: cox loads {loads:?}");
}
