// Incremental ELO ratings from pairwise seat-race outcomes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::EloConfig;
use crate::race::AthleteId;
use crate::rating::bradley_terry::BradleyTerryModel;
use crate::rating::extract::{OutcomeKind, PairwiseOutcome};

/// Margin, in seconds, that counts as one unit of margin scaling (roughly a
/// boat length over a seat-race piece).
pub const REFERENCE_MARGIN_SECONDS: f64 = 1.0;

// ---------------------------------------------------------------------------
// Rating rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatingType {
    SeatRaceElo,
    Combined,
}

impl RatingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RatingType::SeatRaceElo => "seat_race_elo",
            RatingType::Combined => "combined",
        }
    }

    pub fn from_str_type(s: &str) -> Option<Self> {
        match s {
            "seat_race_elo" => Some(RatingType::SeatRaceElo),
            "combined" => Some(RatingType::Combined),
            _ => None,
        }
    }
}

/// One athlete's rating of one type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub athlete_id: AthleteId,
    pub rating_type: RatingType,
    pub value: f64,
    /// In [0, 1); approaches 1 as races accumulate.
    pub confidence: f64,
    pub races_count: u32,
    pub last_calculated: Option<DateTime<Utc>>,
}

impl Rating {
    pub fn initial(athlete_id: AthleteId, rating_type: RatingType, default_rating: f64) -> Self {
        Rating {
            athlete_id,
            rating_type,
            value: default_rating,
            confidence: 0.0,
            races_count: 0,
            last_calculated: None,
        }
    }
}

/// The ratings of one type for one team, keyed by athlete.
///
/// Athletes without a row rate at the configured default.
#[derive(Debug, Clone, PartialEq)]
pub struct RatingBook {
    rating_type: RatingType,
    default_rating: f64,
    ratings: BTreeMap<AthleteId, Rating>,
}

impl RatingBook {
    pub fn new(rating_type: RatingType, default_rating: f64) -> Self {
        RatingBook {
            rating_type,
            default_rating,
            ratings: BTreeMap::new(),
        }
    }

    /// Build a book from stored rows. Rows of another type are ignored.
    pub fn from_ratings(
        rating_type: RatingType,
        default_rating: f64,
        rows: impl IntoIterator<Item = Rating>,
    ) -> Self {
        let mut book = RatingBook::new(rating_type, default_rating);
        for row in rows {
            book.insert(row);
        }
        book
    }

    pub fn rating_type(&self) -> RatingType {
        self.rating_type
    }

    pub fn get(&self, athlete_id: AthleteId) -> Option<&Rating> {
        self.ratings.get(&athlete_id)
    }

    pub fn value(&self, athlete_id: AthleteId) -> f64 {
        self.ratings
            .get(&athlete_id)
            .map_or(self.default_rating, |r| r.value)
    }

    /// Put a row into the book, replacing any previous row for the athlete.
    /// Rows of another type are ignored.
    pub fn insert(&mut self, rating: Rating) {
        if rating.rating_type == self.rating_type {
            self.ratings.insert(rating.athlete_id, rating);
        }
    }

    fn entry(&mut self, athlete_id: AthleteId) -> &mut Rating {
        let (rating_type, default_rating) = (self.rating_type, self.default_rating);
        self.ratings
            .entry(athlete_id)
            .or_insert_with(|| Rating::initial(athlete_id, rating_type, default_rating))
    }

    pub fn len(&self) -> usize {
        self.ratings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ratings.is_empty()
    }

    /// Ratings in athlete id order.
    pub fn iter(&self) -> impl Iterator<Item = &Rating> {
        self.ratings.values()
    }

    pub fn into_ratings(self) -> Vec<Rating> {
        self.ratings.into_values().collect()
    }
}

// ---------------------------------------------------------------------------
// Formulas
// ---------------------------------------------------------------------------

/// Expected score of an athlete rated `r_a` against one rated `r_b`.
pub fn expected_score(r_a: f64, r_b: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf((r_b - r_a) / 400.0))
}

/// Multiplier applied to a rating change for a given margin.
///
/// Always 1.0 when margin scaling is off; otherwise grows linearly with the
/// margin and is capped at `max_margin_factor`.
pub fn margin_factor(margin_seconds: f64, config: &EloConfig) -> f64 {
    if !config.margin_scaling {
        return 1.0;
    }
    (1.0 + margin_seconds / REFERENCE_MARGIN_SECONDS).min(config.max_margin_factor)
}

/// Saturating confidence for a race count: 0 with no races, 0.5 at the
/// half-life, never 1 for a finite count.
pub fn confidence_score(races_count: u32, half_life: f64) -> f64 {
    1.0 - 1.0 / (1.0 + races_count as f64 / half_life)
}

// ---------------------------------------------------------------------------
// Updates
// ---------------------------------------------------------------------------

/// Apply one outcome to the book. Returns the change given to `outcome.winner`;
/// `outcome.loser` receives exactly the negation.
pub fn apply_outcome(
    book: &mut RatingBook,
    outcome: &PairwiseOutcome,
    config: &EloConfig,
    now: DateTime<Utc>,
) -> f64 {
    let r_a = book.value(outcome.winner);
    let r_b = book.value(outcome.loser);

    let actual = match outcome.kind {
        OutcomeKind::Win => 1.0,
        OutcomeKind::Draw => 0.5,
    };
    let delta = config.k_factor
        * (actual - expected_score(r_a, r_b))
        * margin_factor(outcome.margin_seconds, config);

    for (athlete_id, change) in [(outcome.winner, delta), (outcome.loser, -delta)] {
        let rating = book.entry(athlete_id);
        rating.value += change;
        rating.races_count += 1;
        rating.confidence = confidence_score(rating.races_count, config.confidence_half_life);
        rating.last_calculated = Some(now);
    }

    delta
}

/// Apply outcomes strictly in the given order. Returns the athletes whose
/// ratings changed, in id order.
pub fn apply_outcomes(
    book: &mut RatingBook,
    outcomes: &[PairwiseOutcome],
    config: &EloConfig,
    now: DateTime<Utc>,
) -> Vec<AthleteId> {
    let mut touched = std::collections::BTreeSet::new();
    for outcome in outcomes {
        apply_outcome(book, outcome, config, now);
        touched.insert(outcome.winner);
        touched.insert(outcome.loser);
    }
    touched.into_iter().collect()
}

/// Rebuild seat-race ratings from scratch over a full, chronologically
/// ordered history.
pub fn replay(outcomes: &[PairwiseOutcome], config: &EloConfig, now: DateTime<Utc>) -> RatingBook {
    let mut book = RatingBook::new(RatingType::SeatRaceElo, config.default_rating);
    apply_outcomes(&mut book, outcomes, config, now);
    book
}

// ---------------------------------------------------------------------------
// Combined rating
// ---------------------------------------------------------------------------

/// Bradley-Terry strength on the ELO scale. A strength of 1 (the geometric
/// mean after normalization) maps to the default rating.
pub fn strength_to_elo(strength: f64, default_rating: f64) -> Option<f64> {
    (strength.is_finite() && strength > 0.0).then(|| default_rating + 400.0 * strength.log10())
}

/// Blend seat-race ELO with the batch Bradley-Terry fit.
///
/// The ELO value is weighted by its confidence; the rest of the weight goes to
/// the Bradley-Terry estimate. Athletes the fit could not place keep their
/// ELO value.
pub fn combine_with_bradley_terry(
    elo: &RatingBook,
    model: &BradleyTerryModel,
    default_rating: f64,
) -> RatingBook {
    let mut combined = RatingBook::new(RatingType::Combined, default_rating);
    for rating in elo.iter() {
        let bt_elo = model
            .athlete(rating.athlete_id)
            .and_then(|a| strength_to_elo(a.strength, default_rating));
        let value = match bt_elo {
            Some(bt) => rating.confidence * rating.value + (1.0 - rating.confidence) * bt,
            None => rating.value,
        };
        combined.insert(Rating {
            athlete_id: rating.athlete_id,
            rating_type: RatingType::Combined,
            value,
            confidence: rating.confidence,
            races_count: rating.races_count,
            last_calculated: rating.last_calculated,
        });
    }
    combined
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap()
    }

    fn outcome(winner: AthleteId, loser: AthleteId, kind: OutcomeKind, margin: f64) -> PairwiseOutcome {
        PairwiseOutcome {
            session_id: "s".into(),
            session_date: NaiveDate::from_ymd_opt(2026, 4, 1).unwrap(),
            piece_order: 1,
            winner,
            loser,
            kind,
            margin_seconds: margin,
            crew_sizes: (1, 1),
        }
    }

    fn plain_config() -> EloConfig {
        EloConfig {
            k_factor: 32.0,
            default_rating: 1500.0,
            draw_threshold_seconds: 0.0,
            margin_scaling: false,
            max_margin_factor: 2.0,
            confidence_half_life: 10.0,
        }
    }

    #[test]
    fn single_win_from_default_moves_sixteen_points() {
        let config = plain_config();
        let mut book = RatingBook::new(RatingType::SeatRaceElo, 1500.0);
        let delta = apply_outcome(&mut book, &outcome(1, 2, OutcomeKind::Win, 3.0), &config, now());

        assert!((delta - 16.0).abs() < 1e-12);
        assert!((book.value(1) - 1516.0).abs() < 1e-12);
        assert!((book.value(2) - 1484.0).abs() < 1e-12);
        // Untouched athletes stay at the default without a row.
        assert!((book.value(3) - 1500.0).abs() < 1e-12);
        assert!(book.get(3).is_none());
    }

    #[test]
    fn updates_are_zero_sum() {
        let config = plain_config();
        let mut book = RatingBook::new(RatingType::SeatRaceElo, 1500.0);
        let history = [
            outcome(1, 2, OutcomeKind::Win, 2.0),
            outcome(2, 3, OutcomeKind::Win, 1.0),
            outcome(3, 1, OutcomeKind::Draw, 0.1),
            outcome(1, 3, OutcomeKind::Win, 4.0),
        ];
        for o in &history {
            let before = (book.value(o.winner), book.value(o.loser));
            apply_outcome(&mut book, o, &config, now());
            let winner_delta = book.value(o.winner) - before.0;
            let loser_delta = book.value(o.loser) - before.1;
            assert!((winner_delta + loser_delta).abs() < 1e-9);
        }
    }

    #[test]
    fn draw_between_equals_changes_nothing() {
        let config = plain_config();
        let mut book = RatingBook::new(RatingType::SeatRaceElo, 1500.0);
        let delta = apply_outcome(&mut book, &outcome(1, 2, OutcomeKind::Draw, 0.0), &config, now());
        assert_eq!(delta, 0.0);
        assert_eq!(book.get(1).unwrap().races_count, 1);
    }

    #[test]
    fn margin_scaling_is_capped() {
        let mut config = plain_config();
        assert_eq!(margin_factor(10.0, &config), 1.0);

        config.margin_scaling = true;
        assert!((margin_factor(0.5, &config) - 1.5).abs() < 1e-12);
        assert!((margin_factor(10.0, &config) - 2.0).abs() < 1e-12);

        let mut book = RatingBook::new(RatingType::SeatRaceElo, 1500.0);
        let delta = apply_outcome(&mut book, &outcome(1, 2, OutcomeKind::Win, 10.0), &config, now());
        assert!((delta - 32.0).abs() < 1e-12);
    }

    #[test]
    fn confidence_saturates_below_one() {
        assert_eq!(confidence_score(0, 10.0), 0.0);
        assert!((confidence_score(10, 10.0) - 0.5).abs() < 1e-12);
        let high = confidence_score(1_000_000, 10.0);
        assert!(high < 1.0 && high > 0.999);
    }

    #[test]
    fn replay_is_bit_identical() {
        let config = plain_config();
        let history: Vec<PairwiseOutcome> = (0..50)
            .map(|i| outcome(i % 5, (i + 2) % 5, OutcomeKind::Win, (i % 7) as f64))
            .collect();
        let first = replay(&history, &config, now());
        let second = replay(&history, &config, now());
        let a: Vec<u64> = first.iter().map(|r| r.value.to_bits()).collect();
        let b: Vec<u64> = second.iter().map(|r| r.value.to_bits()).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn order_matters_for_elo() {
        let config = plain_config();
        let forward = [outcome(1, 2, OutcomeKind::Win, 1.0), outcome(2, 3, OutcomeKind::Win, 1.0)];
        let backward = [outcome(2, 3, OutcomeKind::Win, 1.0), outcome(1, 2, OutcomeKind::Win, 1.0)];
        let a = replay(&forward, &config, now());
        let b = replay(&backward, &config, now());
        assert!((a.value(2) - b.value(2)).abs() > 1e-9);
    }

    #[test]
    fn strength_maps_to_elo_scale() {
        assert_eq!(strength_to_elo(1.0, 1500.0), Some(1500.0));
        assert!((strength_to_elo(10.0, 1500.0).unwrap() - 1900.0).abs() < 1e-9);
        assert_eq!(strength_to_elo(0.0, 1500.0), None);
    }

    #[test]
    fn rating_type_names_round_trip() {
        for t in [RatingType::SeatRaceElo, RatingType::Combined] {
            assert_eq!(RatingType::from_str_type(t.as_str()), Some(t));
        }
    }
}
