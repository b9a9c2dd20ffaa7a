// Raw seat-race data: sessions, pieces, boats, seat assignments.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::athlete::{AthleteId, Side};
use super::boat_class::BoatClass;

/// An athlete placed in a seat for one piece.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatAssignment {
    /// 1 (bow) up to stroke; the coxswain sits one past stroke (9 in an eight).
    pub seat_number: u8,
    pub side: Side,
    pub athlete_id: AthleteId,
}

/// One shell racing in a piece.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Boat {
    pub name: String,
    #[serde(default)]
    pub shell_name: Option<String>,
    /// Finish time in seconds. `None` for a boat that did not finish.
    #[serde(default)]
    pub finish_time_seconds: Option<f64>,
    /// Seconds added to the finish time (slower shell, extra crew weight, ...).
    #[serde(default)]
    pub handicap_seconds: f64,
    #[serde(default)]
    pub assignments: Vec<SeatAssignment>,
}

impl Boat {
    /// Finish time plus handicap, or `None` when there is no usable time.
    ///
    /// Non-finite or negative times count as missing.
    pub fn adjusted_time(&self) -> Option<f64> {
        let finish = self.finish_time_seconds?;
        if !finish.is_finite() || finish < 0.0 || !self.handicap_seconds.is_finite() {
            return None;
        }
        Some(finish + self.handicap_seconds)
    }

    /// Athletes in rowing seats, in seat order as listed. Coxswains are
    /// skipped: they steer, they do not move the boat.
    pub fn rowers(&self, class: BoatClass) -> Vec<AthleteId> {
        let cox_seat = class.cox_seat();
        self.assignments
            .iter()
            .filter(|a| a.side != Side::Cox && Some(a.seat_number) != cox_seat)
            .map(|a| a.athlete_id)
            .collect()
    }
}

/// Boats racing side by side in one piece.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Piece {
    pub sequence_order: u32,
    #[serde(default)]
    pub distance_meters: Option<u32>,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub boats: Vec<Boat>,
}

/// A seat-racing session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub team_id: String,
    pub date: NaiveDate,
    pub boat_class: BoatClass,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub conditions: Option<String>,
    #[serde(default)]
    pub pieces: Vec<Piece>,
}

impl Session {
    /// Pieces in sequence order. Stable for pieces sharing an order number.
    pub fn ordered_pieces(&self) -> Vec<&Piece> {
        let mut pieces: Vec<&Piece> = self.pieces.iter().collect();
        pieces.sort_by_key(|p| p.sequence_order);
        pieces
    }

    /// Every athlete who rowed in any boat of this session.
    pub fn participants(&self) -> BTreeSet<AthleteId> {
        self.pieces
            .iter()
            .flat_map(|p| p.boats.iter())
            .flat_map(|b| b.rowers(self.boat_class))
            .collect()
    }
}

/// Replay order for sessions: by date, then id. Equal dates need the id
/// tie-break so full recalculation is reproducible.
pub fn sort_chronologically(sessions: &mut [Session]) {
    sessions.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));
}
