// Load balance and coverage statistics for a finished plan.

use std::collections::{BTreeMap, BTreeSet};

use crate::race::{Athlete, AthleteId, Side};
use crate::rating::graph::ComparisonGraph;

use super::matrix::Plan;
use super::ScheduleStatistics;

/// Largest minus smallest count. Zero for an empty slice.
pub fn spread(counts: &[usize]) -> usize {
    match (counts.iter().max(), counts.iter().min()) {
        (Some(max), Some(min)) => max - min,
        _ => 0,
    }
}

/// `1 - variance / max_variance` of per-athlete piece counts.
///
/// The maximum variance for the same total keeps as many athletes as possible
/// in every piece and the rest out entirely. A total that cannot be spread any
/// other way scores 1.0.
pub fn balance_score(counts: &[usize], piece_count: usize) -> f64 {
    let n = counts.len();
    if n == 0 || piece_count == 0 {
        return 1.0;
    }
    let total: usize = counts.iter().sum();
    let mean = total as f64 / n as f64;
    let variance = counts.iter().map(|&c| (c as f64 - mean).powi(2)).sum::<f64>() / n as f64;

    let full = total / piece_count;
    let remainder = total % piece_count;
    let sum_sq = (full * piece_count * piece_count + remainder * remainder) as f64;
    let max_variance = sum_sq / n as f64 - mean * mean;
    if max_variance <= 1e-12 {
        return 1.0;
    }
    (1.0 - variance / max_variance).clamp(0.0, 1.0)
}

pub(crate) fn statistics(
    plan: &Plan,
    rowers: &[Athlete],
    coxes: &[AthleteId],
    existing: Option<&ComparisonGraph>,
    piece_count: usize,
) -> ScheduleStatistics {
    let mut per_athlete_pieces: BTreeMap<AthleteId, usize> = BTreeMap::new();
    for (athlete, &load) in rowers.iter().zip(&plan.rower_loads) {
        per_athlete_pieces.insert(athlete.id, load);
    }
    for (&cox, &load) in coxes.iter().zip(&plan.cox_loads) {
        per_athlete_pieces.insert(cox, load);
    }

    let mut mates: BTreeMap<(AthleteId, AthleteId), usize> = BTreeMap::new();
    let mut cross: BTreeSet<(AthleteId, AthleteId)> = BTreeSet::new();
    for piece in &plan.pieces {
        let crews: Vec<Vec<AthleteId>> = piece
            .boats
            .iter()
            .map(|b| {
                b.assignments
                    .iter()
                    .filter(|a| a.side != Side::Cox)
                    .map(|a| a.athlete_id)
                    .collect()
            })
            .collect();
        for (x, crew) in crews.iter().enumerate() {
            for (i, &a) in crew.iter().enumerate() {
                for &b in &crew[i + 1..] {
                    *mates.entry(ordered(a, b)).or_insert(0) += 1;
                }
                for other in &crews[x + 1..] {
                    for &b in other {
                        cross.insert(ordered(a, b));
                    }
                }
            }
        }
    }

    let new_comparisons = cross
        .iter()
        .filter(|(a, b)| existing.map_or(true, |g| g.comparison_count(*a, *b) == 0))
        .count();

    ScheduleStatistics {
        balance: balance_score(&plan.rower_loads, piece_count),
        per_athlete_pieces,
        distinct_boatmate_pairs: mates.len(),
        max_boatmate_repeats: mates.values().copied().max().unwrap_or(0),
        new_comparisons,
    }
}

fn ordered(a: AthleteId, b: AthleteId) -> (AthleteId, AthleteId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}
