// Race data model: athletes, boat classes, sessions.

pub mod athlete;
pub mod boat_class;
pub mod session;

pub use athlete::{Athlete, AthleteId, AthleteStatus, Side};
pub use boat_class::BoatClass;
pub use session::{Boat, Piece, SeatAssignment, Session};
