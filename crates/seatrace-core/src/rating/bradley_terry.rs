// Batch Bradley-Terry fit over the full outcome history.
//
// Strengths are fit with the MM (Zermelo) iteration on a sparse weighted win
// table, normalized to geometric mean 1 each round. A ghost opponent split
// evenly with every athlete keeps winless athletes off zero. Standard errors come from
// the pseudo-inverse of the Fisher information on the log-strength scale.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use nalgebra::DMatrix;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::BradleyTerryConfig;
use crate::race::AthleteId;
use crate::rating::extract::{OutcomeKind, PairwiseOutcome};
use crate::rating::graph::{connectivity_from_sizes, DisjointSet};

/// Share of a draw's weight credited to each side as a win.
pub const DRAW_CREDIT: f64 = 0.5;

/// Normal quantile for a two-sided 95% interval.
pub const Z_95: f64 = 1.96;

/// Singular values below this are treated as zero when inverting the Fisher
/// information (one per connected component, from scale indeterminacy).
const INFORMATION_EPSILON: f64 = 1e-10;

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
}

/// One athlete's fitted strength.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AthleteStrength {
    pub athlete_id: AthleteId,
    /// Positive strength, geometric mean 1 across the fit. Zero only for an
    /// athlete who never won or drew in an unregularized fit.
    pub strength: f64,
    /// Standard error on the natural scale. Infinite when not estimable.
    pub std_error: f64,
    /// Standard error of `ln(strength)`.
    pub log_std_error: f64,
    pub confidence_interval: ConfidenceInterval,
    /// Weighted wins (draws count half).
    pub wins: f64,
    /// Weighted games.
    pub games: f64,
    /// Raw pairwise outcomes involving this athlete.
    pub comparisons: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelStats {
    pub athlete_count: usize,
    pub total_comparisons: usize,
    pub draws: usize,
    /// Fraction of fitted athlete pairs joined by some chain of comparisons.
    pub graph_connectivity: f64,
    pub component_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Convergence {
    pub converged: bool,
    pub iterations: usize,
    pub log_likelihood: f64,
    /// Relative log-likelihood change of the last iteration.
    pub relative_change: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BradleyTerryModel {
    /// Strongest first; ties by athlete id.
    pub athletes: Vec<AthleteStrength>,
    pub stats: ModelStats,
    pub convergence: Convergence,
    #[serde(skip)]
    index: HashMap<AthleteId, usize>,
}

impl BradleyTerryModel {
    pub fn athlete(&self, athlete_id: AthleteId) -> Option<&AthleteStrength> {
        self.index.get(&athlete_id).map(|&i| &self.athletes[i])
    }

    pub fn strength(&self, athlete_id: AthleteId) -> Option<f64> {
        self.athlete(athlete_id).map(|a| a.strength)
    }

    pub fn is_empty(&self) -> bool {
        self.athletes.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Win table
// ---------------------------------------------------------------------------

/// Sparse weighted results over internal indices.
///
/// With regularization on, one extra row at index `athletes` is a ghost
/// opponent of average strength that every athlete has beaten and lost to
/// `regularization_strength` times.
///
/// BTreeMaps keep summation order fixed, so refits are bit-for-bit
/// reproducible.
struct WinTable {
    /// Real athletes; indices at or past this are the ghost.
    athletes: usize,
    /// wins[i][j] = weighted wins of i over j. Every opponent pair has an
    /// entry in both directions, possibly zero.
    wins: Vec<BTreeMap<usize, f64>>,
    total_wins: Vec<f64>,
}

impl WinTable {
    fn new(athletes: usize, results: &[(usize, usize, f64, bool)], regularization: f64) -> Self {
        let rows = if regularization > 0.0 && athletes > 0 {
            athletes + 1
        } else {
            athletes
        };
        let mut wins: Vec<BTreeMap<usize, f64>> = (0..rows).map(|_| BTreeMap::new()).collect();

        for &(a, b, weight, draw) in results {
            let (credit_a, credit_b) = if draw {
                (weight * DRAW_CREDIT, weight * DRAW_CREDIT)
            } else {
                (weight, 0.0)
            };
            *wins[a].entry(b).or_insert(0.0) += credit_a;
            *wins[b].entry(a).or_insert(0.0) += credit_b;
        }

        if rows > athletes {
            let ghost = athletes;
            for i in 0..athletes {
                wins[i].insert(ghost, regularization);
                wins[ghost].insert(i, regularization);
            }
        }

        let total_wins = wins.iter().map(|row| row.values().sum()).collect();
        WinTable {
            athletes,
            wins,
            total_wins,
        }
    }

    /// Weighted wins of a real athlete against real opponents.
    fn recorded_wins(&self, i: usize) -> f64 {
        self.wins[i].range(..self.athletes).map(|(_, &w)| w).sum()
    }

    /// Weighted games of a real athlete against real opponents.
    fn recorded_games(&self, i: usize) -> f64 {
        self.wins[i].range(..self.athletes).map(|(&j, _)| self.games(i, j)).sum()
    }

    fn len(&self) -> usize {
        self.wins.len()
    }

    fn games(&self, i: usize, j: usize) -> f64 {
        self.wins[i].get(&j).copied().unwrap_or(0.0) + self.wins[j].get(&i).copied().unwrap_or(0.0)
    }

    /// One MM sweep: s_i <- W_i / sum_j n_ij / (s_i + s_j).
    fn run_iteration(&self, scores: &[f64]) -> Vec<f64> {
        let mut new_scores = vec![0.0; self.len()];
        for i in 0..self.len() {
            if self.total_wins[i] == 0.0 {
                continue;
            }
            let mut denominator = 0.0;
            for &j in self.wins[i].keys() {
                let sum = scores[i] + scores[j];
                let games = self.games(i, j);
                if games > 0.0 && sum > 0.0 {
                    denominator += games / sum;
                }
            }
            new_scores[i] = if denominator > 0.0 {
                self.total_wins[i] / denominator
            } else {
                scores[i]
            };
        }
        new_scores
    }

    /// sum_i sum_j w_ij ln s_i - sum_{i<j} n_ij ln(s_i + s_j)
    fn log_likelihood(&self, scores: &[f64]) -> f64 {
        let mut ll = 0.0;
        for i in 0..self.len() {
            for (&j, &w_ij) in &self.wins[i] {
                if w_ij > 0.0 {
                    ll += w_ij * scores[i].ln();
                }
                if i < j {
                    let games = self.games(i, j);
                    if games > 0.0 {
                        ll -= games * (scores[i] + scores[j]).ln();
                    }
                }
            }
        }
        ll
    }

    /// Observed Fisher information with respect to log-strengths.
    fn information(&self, scores: &[f64]) -> DMatrix<f64> {
        let n = self.len();
        let mut info = DMatrix::zeros(n, n);
        for i in 0..n {
            for &j in self.wins[i].keys() {
                if j <= i {
                    continue;
                }
                let sum = scores[i] + scores[j];
                if sum <= 0.0 {
                    continue;
                }
                let p = scores[i] / sum;
                let h = self.games(i, j) * p * (1.0 - p);
                info[(i, i)] += h;
                info[(j, j)] += h;
                info[(i, j)] -= h;
                info[(j, i)] -= h;
            }
        }
        info
    }
}

/// Divide by the geometric mean of the positive scores among the first
/// `athletes` entries. Zero scores stay zero; the ghost rescales with the rest.
fn normalize_scores(scores: &mut [f64], athletes: usize) {
    let positive: Vec<f64> = scores[..athletes].iter().copied().filter(|&s| s > 0.0).collect();
    if positive.is_empty() {
        return;
    }
    let log_mean = positive.iter().map(|s| s.ln()).sum::<f64>() / positive.len() as f64;
    let geo_mean = log_mean.exp();
    if geo_mean > 0.0 && geo_mean.is_finite() {
        for score in scores.iter_mut() {
            *score /= geo_mean;
        }
    }
}

// ---------------------------------------------------------------------------
// Fit
// ---------------------------------------------------------------------------

/// Fit strengths to every outcome in `outcomes`.
///
/// Only athletes with at least one comparison are part of the fit. A fit that
/// hits the iteration cap is still returned, with `converged = false`.
pub fn fit(outcomes: &[PairwiseOutcome], config: &BradleyTerryConfig) -> BradleyTerryModel {
    let ids: Vec<AthleteId> = outcomes
        .iter()
        .flat_map(|o| [o.winner, o.loser])
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let position: HashMap<AthleteId, usize> = ids.iter().enumerate().map(|(i, &id)| (id, i)).collect();
    let n = ids.len();

    let mut comparisons = vec![0usize; n];
    let mut sets = DisjointSet::new(n);
    let mut draws = 0;
    let results: Vec<(usize, usize, f64, bool)> = outcomes
        .iter()
        .map(|o| {
            let (a, b) = (position[&o.winner], position[&o.loser]);
            comparisons[a] += 1;
            comparisons[b] += 1;
            sets.union(a, b);
            if o.kind == OutcomeKind::Draw {
                draws += 1;
            }
            (a, b, o.weight(config.boat_weighting), o.is_draw())
        })
        .collect();

    let table = WinTable::new(n, &results, config.regularization_strength);
    let mut scores = vec![1.0; table.len()];
    let mut ll = table.log_likelihood(&scores);
    let mut iterations = 0;
    let mut converged = n == 0;
    let mut relative_change = 0.0;

    if n > 0 {
        for iter in 1..=config.max_iterations {
            iterations = iter;
            scores = table.run_iteration(&scores);
            normalize_scores(&mut scores, n);

            let new_ll = table.log_likelihood(&scores);
            relative_change = (new_ll - ll).abs() / ll.abs().max(f64::MIN_POSITIVE);
            ll = new_ll;
            if relative_change < config.tolerance {
                converged = true;
                break;
            }
        }
    }

    let log_std_errors = log_std_errors(&table, &scores);

    let mut athletes: Vec<AthleteStrength> = (0..n)
        .map(|i| {
            let strength = scores[i];
            let log_se = log_std_errors[i];
            let std_error = if strength > 0.0 { strength * log_se } else { f64::INFINITY };
            let half_width = Z_95 * std_error;
            AthleteStrength {
                athlete_id: ids[i],
                strength,
                std_error,
                log_std_error: log_se,
                confidence_interval: ConfidenceInterval {
                    lower: (strength - half_width).max(0.0),
                    upper: strength + half_width,
                },
                wins: table.recorded_wins(i),
                games: table.recorded_games(i),
                comparisons: comparisons[i],
            }
        })
        .collect();
    athletes.sort_by(|a, b| {
        b.strength
            .partial_cmp(&a.strength)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.athlete_id.cmp(&b.athlete_id))
    });
    let index = athletes.iter().enumerate().map(|(i, a)| (a.athlete_id, i)).collect();

    let sizes: Vec<usize> = sets.groups().iter().map(|g| g.len()).collect();
    let stats = ModelStats {
        athlete_count: n,
        total_comparisons: outcomes.len(),
        draws,
        graph_connectivity: connectivity_from_sizes(&sizes),
        component_count: sizes.len(),
    };

    if converged {
        info!(
            "Bradley-Terry fit converged: {} athletes, {} comparisons, {} iterations, log-likelihood {:.4}",
            n,
            outcomes.len(),
            iterations,
            ll
        );
    } else {
        warn!(
            "Bradley-Terry fit did not converge in {} iterations (relative change {:.3e}, log-likelihood {:.4})",
            iterations, relative_change, ll
        );
    }
    if stats.graph_connectivity < 1.0 {
        warn!(
            "Bradley-Terry strengths span {} disconnected groups; cross-group comparisons are meaningless",
            stats.component_count
        );
    }

    BradleyTerryModel {
        athletes,
        stats,
        convergence: Convergence {
            converged,
            iterations,
            log_likelihood: ll,
            relative_change,
        },
        index,
    }
}

/// Standard errors of the log-strengths at the fitted point.
fn log_std_errors(table: &WinTable, scores: &[f64]) -> Vec<f64> {
    let n = table.athletes;
    if n == 0 {
        return Vec::new();
    }
    let info = table.information(scores);
    let diagonal: Vec<f64> = (0..n).map(|i| info[(i, i)]).collect();

    let covariance = match info.pseudo_inverse(INFORMATION_EPSILON) {
        Ok(cov) => cov,
        Err(e) => {
            warn!("Fisher information could not be inverted: {e}");
            return vec![f64::INFINITY; n];
        }
    };

    (0..n)
        .map(|i| {
            if scores[i] <= 0.0 || diagonal[i] < INFORMATION_EPSILON {
                f64::INFINITY
            } else {
                covariance[(i, i)].max(0.0).sqrt()
            }
        })
        .collect()
}
