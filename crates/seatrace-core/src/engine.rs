// Engine facade: the command/query surface the rest of the platform calls.
//
// Commands (session submission, full recalculation, roster changes) go through
// the database in single transactions. Queries over the fitted model and the
// comparison graph are memoized per team for a configurable staleness window
// and dropped whenever a command changes the team's data.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{Config, RatingConfig};
use crate::db::{Database, RecordedSession};
use crate::race::{Athlete, AthleteId, Session};
use crate::rating::bradley_terry::{self, BradleyTerryModel};
use crate::rating::elo::{self, Rating, RatingType};
use crate::rating::extract::{extract_history, extract_outcomes};
use crate::rating::graph::ComparisonGraph;
use crate::rating::probability::ProbabilityMatrix;
use crate::schedule::{self, ScheduleRequest, SwapSchedule};

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmitOutcome {
    Applied {
        outcomes: usize,
        athletes_updated: usize,
        /// The session was dated before one already applied, so the team's
        /// seat-race ratings were replayed from its full history.
        replayed: bool,
    },
    /// The session id was processed before; nothing changed.
    AlreadyProcessed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecalculationSummary {
    /// Athletes holding a seat-race rating after the replay.
    pub updated: usize,
    pub sessions: usize,
    pub outcomes: usize,
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct Analysis {
    computed_at: Instant,
    model: Arc<BradleyTerryModel>,
    graph: Arc<ComparisonGraph>,
}

#[derive(Default)]
struct TeamCache {
    /// Bumped on every invalidation so a computation that started before a
    /// write cannot store its (stale) result afterwards.
    generation: u64,
    analysis: Option<Analysis>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct SeatRaceEngine {
    db: Database,
    config: RatingConfig,
    cache_ttl: Duration,
    cache: Mutex<HashMap<String, TeamCache>>,
}

impl SeatRaceEngine {
    pub fn new(db: Database, config: RatingConfig, cache_ttl: Duration) -> Self {
        SeatRaceEngine {
            db,
            config,
            cache_ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Open the configured database and build an engine around it.
    pub fn open(config: &Config) -> Result<Self> {
        let db = Database::open(&config.db_path)?;
        Ok(Self::new(
            db,
            config.ratings.clone(),
            Duration::from_secs(config.cache_ttl_seconds),
        ))
    }

    pub fn config(&self) -> &RatingConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<String, TeamCache>> {
        self.cache.lock().expect("analysis cache mutex poisoned")
    }

    fn invalidate(&self, team_id: &str) {
        let mut cache = self.cache();
        let entry = cache.entry(team_id.to_string()).or_default();
        entry.generation += 1;
        entry.analysis = None;
    }

    // ------------------------------------------------------------------
    // Roster
    // ------------------------------------------------------------------

    pub fn register_athlete(&self, team_id: &str, athlete: &Athlete) -> Result<()> {
        self.db.upsert_athlete(team_id, athlete)?;
        self.invalidate(team_id);
        Ok(())
    }

    /// Drop an athlete from the roster. Past results and ratings are kept.
    pub fn remove_athlete(&self, team_id: &str, athlete_id: AthleteId) -> Result<bool> {
        let removed = self.db.remove_athlete(team_id, athlete_id)?;
        if removed {
            self.invalidate(team_id);
        }
        Ok(removed)
    }

    pub fn roster(&self, team_id: &str) -> Result<Vec<Athlete>> {
        self.db.load_roster(team_id)
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Store a session's results and apply them to seat-race ELO.
    ///
    /// Idempotent per (team, session id). Outcomes are applied in extraction
    /// order within the session. A session dated after everything already
    /// processed is applied on top of the current ratings; a back-dated one
    /// triggers a replay of the team's seat-race ELO in (date, id) order, so
    /// the stored ratings always match a full recalculation.
    pub fn submit_session_results(&self, session: &Session) -> Result<SubmitOutcome> {
        let draw_threshold = self.config.elo.draw_threshold_seconds;
        let outcomes = extract_outcomes(session, draw_threshold)
            .with_context(|| format!("failed to extract outcomes from session {}", session.id))?;
        let now = Utc::now();

        let result = self.db.record_session_ratings(
            session,
            self.config.elo.default_rating,
            |book| Ok(elo::apply_outcomes(book, &outcomes, &self.config.elo, now)),
            |history| {
                let all = extract_history(&history, draw_threshold)
                    .context("failed to extract outcomes from history")?;
                Ok(elo::replay(&all, &self.config.elo, now))
            },
        )?;

        let Some(recorded) = result else {
            info!("Session {} already processed for team {}; skipping", session.id, session.team_id);
            return Ok(SubmitOutcome::AlreadyProcessed);
        };

        self.invalidate(&session.team_id);
        let replayed = matches!(recorded, RecordedSession::Replayed(_));
        if replayed {
            info!(
                "Session {} is back-dated for team {}; replayed seat-race history",
                session.id, session.team_id
            );
        }
        info!(
            "Processed session {} for team {}: {} outcomes, {} ratings updated",
            session.id,
            session.team_id,
            outcomes.len(),
            recorded.ratings().len()
        );
        Ok(SubmitOutcome::Applied {
            outcomes: outcomes.len(),
            athletes_updated: recorded.ratings().len(),
            replayed,
        })
    }

    /// Replay the team's whole history from scratch.
    ///
    /// Seat-race ELO is rebuilt in date order and the combined rating is
    /// refreshed from a new Bradley-Terry fit. Runs inside one exclusive
    /// transaction over the team's rating rows.
    pub fn recalculate_all_ratings(&self, team_id: &str) -> Result<RecalculationSummary> {
        let now = Utc::now();
        let mut summary = RecalculationSummary {
            updated: 0,
            sessions: 0,
            outcomes: 0,
        };

        self.db.replace_team_ratings(team_id, |sessions| {
            let outcomes = extract_history(&sessions, self.config.elo.draw_threshold_seconds)
                .context("failed to extract outcomes from history")?;
            let seat_race = elo::replay(&outcomes, &self.config.elo, now);
            let model = bradley_terry::fit(&outcomes, &self.config.bradley_terry);
            let combined =
                elo::combine_with_bradley_terry(&seat_race, &model, self.config.elo.default_rating);

            summary = RecalculationSummary {
                updated: seat_race.len(),
                sessions: sessions.len(),
                outcomes: outcomes.len(),
            };
            let mut rows = seat_race.into_ratings();
            rows.extend(combined.into_ratings());
            Ok(rows)
        })?;
        self.invalidate(team_id);

        info!(
            "Recalculated ratings for team {}: {} athletes from {} sessions ({} outcomes)",
            team_id, summary.updated, summary.sessions, summary.outcomes
        );
        Ok(summary)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Model and graph for a team, from cache while fresh.
    fn analysis(&self, team_id: &str) -> Result<Analysis> {
        let generation = {
            let mut cache = self.cache();
            let entry = cache.entry(team_id.to_string()).or_default();
            if let Some(analysis) = &entry.analysis {
                if analysis.computed_at.elapsed() < self.cache_ttl {
                    debug!("analysis cache hit for team {}", team_id);
                    return Ok(analysis.clone());
                }
            }
            debug!("analysis cache miss for team {}", team_id);
            entry.generation
        };

        let sessions = self.db.load_sessions(team_id)?;
        let roster: Vec<AthleteId> = self.db.load_roster(team_id)?.iter().map(|a| a.id).collect();
        let outcomes = extract_history(&sessions, self.config.elo.draw_threshold_seconds)
            .context("failed to extract outcomes from history")?;

        let model = bradley_terry::fit(&outcomes, &self.config.bradley_terry);
        let graph = ComparisonGraph::build(
            &roster,
            &outcomes,
            self.config.bradley_terry.boat_weighting,
            &self.config.graph,
        );
        let analysis = Analysis {
            computed_at: Instant::now(),
            model: Arc::new(model),
            graph: Arc::new(graph),
        };

        let mut cache = self.cache();
        let entry = cache.entry(team_id.to_string()).or_default();
        if entry.generation == generation {
            entry.analysis = Some(analysis.clone());
        } else {
            warn!("team {} changed during analysis; result not cached", team_id);
        }
        Ok(analysis)
    }

    pub fn bradley_terry_model(&self, team_id: &str) -> Result<Arc<BradleyTerryModel>> {
        Ok(self.analysis(team_id)?.model)
    }

    pub fn probability_matrix(&self, team_id: &str) -> Result<ProbabilityMatrix> {
        let model = self.bradley_terry_model(team_id)?;
        Ok(ProbabilityMatrix::from_model(&model))
    }

    pub fn comparison_graph(&self, team_id: &str) -> Result<Arc<ComparisonGraph>> {
        Ok(self.analysis(team_id)?.graph)
    }

    /// Plan a seat-swap session for athletes on the team's roster. Nothing is
    /// stored; commit the plan by submitting the session it pre-fills.
    pub fn generate_swap_schedule(&self, team_id: &str, request: &ScheduleRequest) -> Result<SwapSchedule> {
        let roster = self.db.load_roster(team_id)?;
        let graph = self.comparison_graph(team_id)?;
        let schedule = schedule::generate(request, &roster, Some(graph.as_ref()), &self.config.scheduler)?;
        Ok(schedule)
    }

    /// Stored ratings of one type, highest first.
    pub fn ratings(&self, team_id: &str, rating_type: RatingType) -> Result<Vec<Rating>> {
        self.db.load_ratings(team_id, rating_type)
    }
}
