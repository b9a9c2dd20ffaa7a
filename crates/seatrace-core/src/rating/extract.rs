// Comparison extraction: boat finish times -> athlete-vs-athlete outcomes.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::race::{AthleteId, Session};

// ---------------------------------------------------------------------------
// Same-boat weighting policy
// ---------------------------------------------------------------------------

/// How much each athlete-pair outcome counts in the batch fit and the
/// comparison graph.
///
/// One boat-vs-boat margin produces `rowers_x * rowers_y` pair outcomes that
/// all share a single finish-time observation, so they are not independent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoatWeighting {
    /// Every pair outcome counts as one full game.
    Unweighted,
    /// Every pair outcome counts `1 / boat size` (the larger crew when the
    /// boats differ), so each athlete gets one vote per boat matchup.
    InverseBoatSize,
}

/// Weighting used unless configuration says otherwise.
pub const SAME_BOAT_WEIGHTING: BoatWeighting = BoatWeighting::InverseBoatSize;

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    Win,
    Draw,
}

/// One elementary comparison between two athletes who raced in different
/// boats of the same piece.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairwiseOutcome {
    pub session_id: String,
    pub session_date: NaiveDate,
    pub piece_order: u32,
    /// For draws, the athlete from the boat listed first in the piece.
    pub winner: AthleteId,
    pub loser: AthleteId,
    pub kind: OutcomeKind,
    /// Absolute adjusted-time gap between the two boats, in seconds.
    pub margin_seconds: f64,
    /// Rowers in the winner's boat and in the loser's boat.
    pub crew_sizes: (usize, usize),
}

impl PairwiseOutcome {
    pub fn is_draw(&self) -> bool {
        self.kind == OutcomeKind::Draw
    }

    /// Weight of this outcome under `policy`.
    pub fn weight(&self, policy: BoatWeighting) -> f64 {
        match policy {
            BoatWeighting::Unweighted => 1.0,
            BoatWeighting::InverseBoatSize => {
                let size = self.crew_sizes.0.max(self.crew_sizes.1).max(1);
                1.0 / size as f64
            }
        }
    }

    /// The pair as (smaller id, larger id), for undirected bookkeeping.
    pub fn unordered_pair(&self) -> (AthleteId, AthleteId) {
        if self.winner <= self.loser {
            (self.winner, self.loser)
        } else {
            (self.loser, self.winner)
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ExtractionError {
    #[error(
        "athlete {athlete_id} is seated in more than one boat in piece {piece_order} of session {session_id}"
    )]
    DuplicateAthlete {
        session_id: String,
        piece_order: u32,
        athlete_id: AthleteId,
    },
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Turn one session into pairwise outcomes.
///
/// Emission order is fixed: pieces by sequence order, then boat pairs in the
/// order the boats are listed, then the faster (or first-listed) boat's rowers
/// in seat-list order against the other boat's rowers. Boats without a usable
/// finish time produce nothing.
pub fn extract_outcomes(
    session: &Session,
    draw_threshold_seconds: f64,
) -> Result<Vec<PairwiseOutcome>, ExtractionError> {
    let mut outcomes = Vec::new();

    for piece in session.ordered_pieces() {
        let crews: Vec<Vec<AthleteId>> = piece
            .boats
            .iter()
            .map(|b| b.rowers(session.boat_class))
            .collect();

        let mut seen: HashMap<AthleteId, usize> = HashMap::new();
        for (boat_idx, crew) in crews.iter().enumerate() {
            for &athlete_id in crew {
                if let Some(&other) = seen.get(&athlete_id) {
                    if other != boat_idx {
                        return Err(ExtractionError::DuplicateAthlete {
                            session_id: session.id.clone(),
                            piece_order: piece.sequence_order,
                            athlete_id,
                        });
                    }
                }
                seen.insert(athlete_id, boat_idx);
            }
        }

        for x in 0..piece.boats.len() {
            let Some(time_x) = piece.boats[x].adjusted_time() else {
                continue;
            };
            for y in (x + 1)..piece.boats.len() {
                let Some(time_y) = piece.boats[y].adjusted_time() else {
                    continue;
                };

                let margin = (time_x - time_y).abs();
                let kind = if margin < draw_threshold_seconds || margin == 0.0 {
                    OutcomeKind::Draw
                } else {
                    OutcomeKind::Win
                };
                let (first, second) = if kind == OutcomeKind::Win && time_y < time_x {
                    (&crews[y], &crews[x])
                } else {
                    (&crews[x], &crews[y])
                };

                for &a in first {
                    for &b in second {
                        outcomes.push(PairwiseOutcome {
                            session_id: session.id.clone(),
                            session_date: session.date,
                            piece_order: piece.sequence_order,
                            winner: a,
                            loser: b,
                            kind,
                            margin_seconds: margin,
                            crew_sizes: (first.len(), second.len()),
                        });
                    }
                }
            }
        }
    }

    Ok(outcomes)
}

/// Extract the whole history in replay order (date, then session id).
pub fn extract_history(
    sessions: &[Session],
    draw_threshold_seconds: f64,
) -> Result<Vec<PairwiseOutcome>, ExtractionError> {
    let mut ordered: Vec<&Session> = sessions.iter().collect();
    ordered.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));

    let mut outcomes = Vec::new();
    for session in ordered {
        outcomes.extend(extract_outcomes(session, draw_threshold_seconds)?);
    }
    Ok(outcomes)
}
