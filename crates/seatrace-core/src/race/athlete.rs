// Athletes as the rating engine sees them: an id, a side, a roster status.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Team-assigned athlete identifier. Ratings and schedules reference athletes
/// by id only; the team owns the athlete record.
pub type AthleteId = i64;

/// Rowing side preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Port,
    Starboard,
    Cox,
    Both,
}

impl Side {
    /// Parse a side string. Accepts full names and the usual single-letter
    /// shorthands ("P", "S", "C", "B"), case-insensitive.
    pub fn from_str_side(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "PORT" | "P" => Some(Side::Port),
            "STARBOARD" | "STBD" | "S" => Some(Side::Starboard),
            "COX" | "COXSWAIN" | "C" => Some(Side::Cox),
            "BOTH" | "B" | "EITHER" => Some(Side::Both),
            _ => None,
        }
    }

    pub fn display_str(&self) -> &'static str {
        match self {
            Side::Port => "port",
            Side::Starboard => "starboard",
            Side::Cox => "cox",
            Side::Both => "both",
        }
    }

    /// Whether an athlete with this preference can sit in a rowing seat
    /// rigged for `seat`.
    ///
    /// Sculling seats are rigged `Both` and accept any rower. Coxswains never
    /// fill rowing seats and rowers never fill the coxswain seat.
    pub fn can_fill(&self, seat: Side) -> bool {
        match (self, seat) {
            (Side::Cox, Side::Cox) => true,
            (Side::Cox, _) | (_, Side::Cox) => false,
            (_, Side::Both) => true,
            (Side::Both, _) => true,
            (mine, seat) => *mine == seat,
        }
    }

    pub fn is_rower(&self) -> bool {
        !matches!(self, Side::Cox)
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_str())
    }
}

/// Roster status. Only active athletes are scheduled into new pieces;
/// historical results of any status keep counting toward ratings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AthleteStatus {
    #[default]
    Active,
    Injured,
    Inactive,
}

impl AthleteStatus {
    pub fn from_str_status(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "active" => Some(AthleteStatus::Active),
            "injured" => Some(AthleteStatus::Injured),
            "inactive" => Some(AthleteStatus::Inactive),
            _ => None,
        }
    }

    pub fn display_str(&self) -> &'static str {
        match self {
            AthleteStatus::Active => "active",
            AthleteStatus::Injured => "injured",
            AthleteStatus::Inactive => "inactive",
        }
    }
}

/// A roster entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Athlete {
    pub id: AthleteId,
    #[serde(default)]
    pub name: String,
    pub side: Side,
    #[serde(default)]
    pub status: AthleteStatus,
}

impl Athlete {
    pub fn new(id: AthleteId, name: &str, side: Side) -> Self {
        Athlete {
            id,
            name: name.to_string(),
            side,
            status: AthleteStatus::Active,
        }
    }
}
