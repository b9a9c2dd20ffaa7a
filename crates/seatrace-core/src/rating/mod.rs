pub mod bradley_terry;
pub mod elo;
pub mod extract;
pub mod graph;
pub mod probability;

pub use bradley_terry::{AthleteStrength, BradleyTerryModel};
pub use elo::{Rating, RatingBook, RatingType};
pub use extract::{BoatWeighting, ExtractionError, OutcomeKind, PairwiseOutcome};
pub use graph::ComparisonGraph;
pub use probability::ProbabilityMatrix;
