// Matrix seat-swap schedules: which athletes row in which boat for each
// piece of a seat-racing session.

pub mod balance;
pub mod matrix;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::race::{Athlete, AthleteId, AthleteStatus, Boat, BoatClass, Piece, SeatAssignment, Session, Side};
use crate::rating::graph::ComparisonGraph;

// ---------------------------------------------------------------------------
// Request / result types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub athlete_ids: Vec<AthleteId>,
    pub boat_class: BoatClass,
    /// Explicit number of pieces. When absent, enough pieces are planned for
    /// every rower to race `min_pieces_per_athlete` times.
    #[serde(default)]
    pub piece_count: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedBoat {
    pub name: String,
    /// Seat order, bow first; the coxswain (if any) last.
    pub assignments: Vec<SeatAssignment>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedPiece {
    pub piece_number: usize,
    pub boats: Vec<PlannedBoat>,
    /// Requested athletes sitting this piece out.
    pub resting: Vec<AthleteId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleStatistics {
    /// 1.0 when every rower races equally often, 0.0 at the most uneven
    /// split the piece count allows.
    pub balance: f64,
    pub per_athlete_pieces: BTreeMap<AthleteId, usize>,
    pub distinct_boatmate_pairs: usize,
    /// Most pieces any two rowers share a boat.
    pub max_boatmate_repeats: usize,
    /// Cross-boat rower pairs with no recorded comparison before this schedule.
    pub new_comparisons: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwapSchedule {
    pub boat_class: BoatClass,
    pub piece_count: usize,
    pub boats_per_piece: usize,
    pub pieces: Vec<PlannedPiece>,
    pub statistics: ScheduleStatistics,
}

impl SwapSchedule {
    /// A session pre-filled from this plan, with no finish times yet.
    pub fn to_session(&self, id: &str, team_id: &str, date: NaiveDate) -> Session {
        Session {
            id: id.to_string(),
            team_id: team_id.to_string(),
            date,
            boat_class: self.boat_class,
            location: None,
            conditions: None,
            pieces: self
                .pieces
                .iter()
                .map(|piece| Piece {
                    sequence_order: piece.piece_number as u32,
                    distance_meters: None,
                    direction: None,
                    boats: piece
                        .boats
                        .iter()
                        .map(|boat| Boat {
                            name: boat.name.clone(),
                            shell_name: None,
                            finish_time_seconds: None,
                            handicap_seconds: 0.0,
                            assignments: boat.assignments.clone(),
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ScheduleError {
    #[error("athlete {athlete_id} is not on the roster")]
    UnknownAthlete { athlete_id: AthleteId },

    #[error("{boat_class} racing needs at least {needed} active rowers, got {available}")]
    InsufficientAthletes {
        boat_class: BoatClass,
        needed: usize,
        available: usize,
    },

    #[error("{boat_class} racing needs {needed} athletes who can fill {side} seats, got {available}")]
    InsufficientSideCoverage {
        boat_class: BoatClass,
        side: Side,
        needed: usize,
        available: usize,
    },

    #[error("side preferences leave no boat count where {boat_class} loads stay within one piece")]
    CannotBalance { boat_class: BoatClass },

    #[error("piece count must be at least 1")]
    InvalidPieceCount,
}

// ---------------------------------------------------------------------------
// Side coverage
// ---------------------------------------------------------------------------

/// Rowing seats per boat by rigging.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SeatLayout {
    pub port: usize,
    pub starboard: usize,
    pub either: usize,
}

impl SeatLayout {
    pub(crate) fn of(class: BoatClass) -> Self {
        SeatLayout {
            port: class.seats_for(Side::Port).len(),
            starboard: class.seats_for(Side::Starboard).len(),
            either: class.seats_for(Side::Both).len(),
        }
    }

    pub(crate) fn total(&self) -> usize {
        self.port + self.starboard + self.either
    }
}

/// Rowers by side preference.
#[derive(Debug, Clone, Copy, PartialEq)]
struct SideMix {
    port: usize,
    starboard: usize,
    both: usize,
}

impl SideMix {
    fn count(rowers: &[Athlete]) -> Self {
        let mut mix = SideMix { port: 0, starboard: 0, both: 0 };
        for athlete in rowers {
            match athlete.side {
                Side::Port => mix.port += 1,
                Side::Starboard => mix.starboard += 1,
                Side::Both => mix.both += 1,
                Side::Cox => {}
            }
        }
        mix
    }

    fn total(&self) -> usize {
        self.port + self.starboard + self.both
    }

    /// Whether `boats` crews can be seated at once without breaking a side
    /// preference.
    fn fills(&self, layout: &SeatLayout, boats: usize) -> bool {
        let (port_seats, stbd_seats) = (boats * layout.port, boats * layout.starboard);
        self.port.min(port_seats) + self.starboard.min(stbd_seats) + self.both >= port_seats + stbd_seats
            && self.total() >= boats * layout.total()
    }

    fn shortfall(&self, layout: &SeatLayout, boats: usize, boat_class: BoatClass) -> ScheduleError {
        let port_needed = boats * layout.port;
        if self.port + self.both < port_needed {
            return ScheduleError::InsufficientSideCoverage {
                boat_class,
                side: Side::Port,
                needed: port_needed,
                available: self.port + self.both,
            };
        }
        let stbd_needed = boats * layout.starboard;
        if self.starboard + self.both < stbd_needed {
            return ScheduleError::InsufficientSideCoverage {
                boat_class,
                side: Side::Starboard,
                needed: stbd_needed,
                available: self.starboard + self.both,
            };
        }
        ScheduleError::InsufficientAthletes {
            boat_class,
            needed: boats * layout.total(),
            available: self.total(),
        }
    }
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

/// Plan a seat-swap session.
///
/// Requested athletes must be on `roster`; those not currently active are
/// left out. Side preferences are hard constraints. `existing` steers ties
/// toward pairings that have never been compared. Deterministic for the same
/// inputs.
pub fn generate(
    request: &ScheduleRequest,
    roster: &[Athlete],
    existing: Option<&ComparisonGraph>,
    config: &SchedulerConfig,
) -> Result<SwapSchedule, ScheduleError> {
    if request.piece_count == Some(0) {
        return Err(ScheduleError::InvalidPieceCount);
    }
    let class = request.boat_class;

    let by_id: HashMap<AthleteId, &Athlete> = roster.iter().map(|a| (a.id, a)).collect();
    let mut seen = BTreeSet::new();
    let mut rowers = Vec::new();
    let mut coxes = Vec::new();
    for &athlete_id in &request.athlete_ids {
        let athlete = by_id
            .get(&athlete_id)
            .copied()
            .ok_or(ScheduleError::UnknownAthlete { athlete_id })?;
        if !seen.insert(athlete_id) {
            continue;
        }
        if athlete.status != AthleteStatus::Active {
            debug!("athlete {} is {}, not scheduled", athlete_id, athlete.status.display_str());
            continue;
        }
        match athlete.side {
            Side::Cox if class.has_cox() => coxes.push(athlete_id),
            Side::Cox => debug!("coxswain {} left out of a {} schedule", athlete_id, class),
            _ => rowers.push(athlete.clone()),
        }
    }
    rowers.sort_by_key(|a| a.id);
    coxes.sort_unstable();

    let layout = SeatLayout::of(class);
    let crew = layout.total();
    if rowers.len() < 2 * crew {
        return Err(ScheduleError::InsufficientAthletes {
            boat_class: class,
            needed: 2 * crew,
            available: rowers.len(),
        });
    }
    if class.has_cox() && coxes.len() < 2 {
        return Err(ScheduleError::InsufficientSideCoverage {
            boat_class: class,
            side: Side::Cox,
            needed: 2,
            available: coxes.len(),
        });
    }

    let mix = SideMix::count(&rowers);
    let mut max_boats = rowers.len() / crew;
    if class.has_cox() {
        max_boats = max_boats.min(coxes.len());
    }
    let candidates: Vec<usize> = (2..=max_boats).rev().filter(|&b| mix.fills(&layout, b)).collect();
    if candidates.is_empty() {
        return Err(mix.shortfall(&layout, 2, class));
    }

    for &boats in &candidates {
        let piece_count = request.piece_count.unwrap_or_else(|| {
            let slots = boats * crew;
            (config.min_pieces_per_athlete * rowers.len()).div_ceil(slots).max(1)
        });

        let plan = matrix::Planner::new(class, &rowers, &coxes, boats, existing, config.search_iterations)
            .run(piece_count);

        if balance::spread(&plan.rower_loads) > 1 || balance::spread(&plan.cox_loads) > 1 {
            debug!(
                "{} boats per piece leaves loads uneven for {} ({} pieces), trying fewer",
                boats, class, piece_count
            );
            continue;
        }
        if boats < max_boats {
            warn!(
                "side preferences limit {} schedule to {} boats per piece (roster fits {})",
                class, boats, max_boats
            );
        }

        let statistics = balance::statistics(&plan, &rowers, &coxes, existing, piece_count);
        info!(
            "Generated {} schedule: {} pieces x {} boats, balance {:.3}, {} new comparisons",
            class, piece_count, boats, statistics.balance, statistics.new_comparisons
        );
        return Ok(SwapSchedule {
            boat_class: class,
            piece_count,
            boats_per_piece: boats,
            pieces: plan.pieces,
            statistics,
        });
    }

    Err(ScheduleError::CannotBalance { boat_class: class })
}
