// Head-to-head win probabilities from fitted strengths.

use serde::Serialize;

use crate::race::AthleteId;
use crate::rating::bradley_terry::BradleyTerryModel;

/// P(i beats j) = s_i / (s_i + s_j). Two zero strengths are a coin flip.
pub fn win_probability(strength_i: f64, strength_j: f64) -> f64 {
    let sum = strength_i + strength_j;
    if sum <= 0.0 {
        0.5
    } else {
        strength_i / sum
    }
}

/// Square matrix of win probabilities. `matrix[i][j]` is the chance that
/// `athletes[i]` beats `athletes[j]`; the diagonal is empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbabilityMatrix {
    pub athletes: Vec<AthleteId>,
    pub matrix: Vec<Vec<Option<f64>>>,
}

impl ProbabilityMatrix {
    /// Rows follow the model's ranking, strongest first.
    pub fn from_model(model: &BradleyTerryModel) -> Self {
        let athletes: Vec<AthleteId> = model.athletes.iter().map(|a| a.athlete_id).collect();
        let matrix = model
            .athletes
            .iter()
            .enumerate()
            .map(|(i, a)| {
                model
                    .athletes
                    .iter()
                    .enumerate()
                    .map(|(j, b)| (i != j).then(|| win_probability(a.strength, b.strength)))
                    .collect()
            })
            .collect();
        ProbabilityMatrix { athletes, matrix }
    }

    pub fn probability(&self, athlete_i: AthleteId, athlete_j: AthleteId) -> Option<f64> {
        let i = self.athletes.iter().position(|&a| a == athlete_i)?;
        let j = self.athletes.iter().position(|&a| a == athlete_j)?;
        self.matrix[i][j]
    }
}
