// Boat classes and their seat layouts.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::athlete::Side;

/// Standard racing shells.
///
/// Serialized with the conventional rowing notation (`"8+"`, `"4-"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoatClass {
    #[serde(rename = "8+")]
    Eight,
    #[serde(rename = "4+")]
    CoxedFour,
    #[serde(rename = "4-")]
    StraightFour,
    #[serde(rename = "4x")]
    Quad,
    #[serde(rename = "2-")]
    Pair,
    #[serde(rename = "2x")]
    Double,
    #[serde(rename = "1x")]
    Single,
}

impl BoatClass {
    pub fn from_str_class(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "8+" | "8" => Some(BoatClass::Eight),
            "4+" => Some(BoatClass::CoxedFour),
            "4-" => Some(BoatClass::StraightFour),
            "4x" => Some(BoatClass::Quad),
            "2-" => Some(BoatClass::Pair),
            "2x" => Some(BoatClass::Double),
            "1x" => Some(BoatClass::Single),
            _ => None,
        }
    }

    pub fn display_str(&self) -> &'static str {
        match self {
            BoatClass::Eight => "8+",
            BoatClass::CoxedFour => "4+",
            BoatClass::StraightFour => "4-",
            BoatClass::Quad => "4x",
            BoatClass::Pair => "2-",
            BoatClass::Double => "2x",
            BoatClass::Single => "1x",
        }
    }

    /// Number of rowing seats (coxswain excluded).
    pub fn rowers(&self) -> usize {
        match self {
            BoatClass::Eight => 8,
            BoatClass::CoxedFour | BoatClass::StraightFour | BoatClass::Quad => 4,
            BoatClass::Pair | BoatClass::Double => 2,
            BoatClass::Single => 1,
        }
    }

    pub fn has_cox(&self) -> bool {
        matches!(self, BoatClass::Eight | BoatClass::CoxedFour)
    }

    pub fn is_sculling(&self) -> bool {
        matches!(self, BoatClass::Quad | BoatClass::Double | BoatClass::Single)
    }

    /// Seat number of the coxswain, one past stroke seat.
    pub fn cox_seat(&self) -> Option<u8> {
        self.has_cox().then(|| self.rowers() as u8 + 1)
    }

    /// Rigging of a seat. Seats are numbered from bow (1) to stroke.
    ///
    /// Sweep boats use standard rigging: even seats port, odd seats starboard.
    /// Sculling seats take either side. Returns `None` for seats outside the
    /// boat.
    pub fn seat_side(&self, seat: u8) -> Option<Side> {
        if seat == 0 {
            return None;
        }
        if Some(seat) == self.cox_seat() {
            return Some(Side::Cox);
        }
        if seat as usize > self.rowers() {
            return None;
        }
        if self.is_sculling() {
            Some(Side::Both)
        } else if seat % 2 == 0 {
            Some(Side::Port)
        } else {
            Some(Side::Starboard)
        }
    }

    /// Rowing seats of the given rigging, bow to stroke.
    pub fn seats_for(&self, side: Side) -> Vec<u8> {
        (1..=self.rowers() as u8)
            .filter(|&seat| self.seat_side(seat) == Some(side))
            .collect()
    }
}

impl fmt::Display for BoatClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_str())
    }
}
