// SQLite persistence for rosters, raw session results, and rating rows.

use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::race::{Athlete, AthleteId, AthleteStatus, Session, Side};
use crate::rating::elo::{Rating, RatingBook, RatingType};

/// How a newly recorded session reached the seat-race rating rows.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedSession {
    /// Applied on top of the current ratings; holds the rows it changed.
    Appended(Vec<Rating>),
    /// Dated before an already processed session, so the team's history was
    /// replayed in date order; holds every seat-race row.
    Replayed(Vec<Rating>),
}

impl RecordedSession {
    pub fn ratings(&self) -> &[Rating] {
        match self {
            RecordedSession::Appended(rows) | RecordedSession::Replayed(rows) => rows,
        }
    }
}

/// SQLite-backed store for everything the rating engine needs to survive a
/// restart: the team roster, every submitted session, which sessions have
/// been applied to ratings, and the current rating rows.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path` and ensure all tables
    /// exist. Pass `":memory:"` for an ephemeral in-memory database.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS athletes (
                team_id TEXT NOT NULL,
                id      INTEGER NOT NULL,
                name    TEXT NOT NULL,
                side    TEXT NOT NULL,
                status  TEXT NOT NULL,
                PRIMARY KEY (team_id, id)
            );

            CREATE TABLE IF NOT EXISTS sessions (
                team_id      TEXT NOT NULL,
                id           TEXT NOT NULL,
                session_date TEXT NOT NULL,
                boat_class   TEXT NOT NULL,
                payload      TEXT NOT NULL,
                PRIMARY KEY (team_id, id)
            );

            CREATE TABLE IF NOT EXISTS processed_sessions (
                team_id      TEXT NOT NULL,
                session_id   TEXT NOT NULL,
                processed_at TEXT NOT NULL,
                PRIMARY KEY (team_id, session_id),
                FOREIGN KEY (team_id, session_id) REFERENCES sessions(team_id, id)
            );

            CREATE TABLE IF NOT EXISTS ratings (
                team_id         TEXT NOT NULL,
                athlete_id      INTEGER NOT NULL,
                rating_type     TEXT NOT NULL,
                value           REAL NOT NULL,
                confidence      REAL NOT NULL,
                races_count     INTEGER NOT NULL,
                last_calculated TEXT,
                PRIMARY KEY (team_id, athlete_id, rating_type)
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_team_date ON sessions(team_id, session_date, id);
            ",
        )
        .context("failed to create database schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the database connection.
    ///
    /// Panics if the mutex is poisoned (another thread panicked while
    /// holding the lock).
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    // ------------------------------------------------------------------
    // Roster
    // ------------------------------------------------------------------

    /// Insert an athlete or update the existing `(team_id, id)` row.
    pub fn upsert_athlete(&self, team_id: &str, athlete: &Athlete) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO athletes (team_id, id, name, side, status)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(team_id, id) DO UPDATE SET
                name   = excluded.name,
                side   = excluded.side,
                status = excluded.status",
            params![
                team_id,
                athlete.id,
                athlete.name,
                athlete.side.display_str(),
                athlete.status.display_str(),
            ],
        )
        .context("failed to upsert athlete")?;
        Ok(())
    }

    /// Remove an athlete from the roster. Their results and rating rows stay.
    /// Returns `false` if no such athlete was registered.
    pub fn remove_athlete(&self, team_id: &str, athlete_id: AthleteId) -> Result<bool> {
        let conn = self.conn();
        let removed = conn
            .execute(
                "DELETE FROM athletes WHERE team_id = ?1 AND id = ?2",
                params![team_id, athlete_id],
            )
            .context("failed to remove athlete")?;
        Ok(removed > 0)
    }

    /// The team's roster, ordered by athlete id.
    pub fn load_roster(&self, team_id: &str) -> Result<Vec<Athlete>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT id, name, side, status FROM athletes WHERE team_id = ?1 ORDER BY id")
            .context("failed to prepare load_roster query")?;

        let rows = stmt
            .query_map(params![team_id], |row| {
                Ok((
                    row.get::<_, AthleteId>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .context("failed to query roster")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map roster rows")?;

        rows.into_iter()
            .map(|(id, name, side, status)| {
                Ok(Athlete {
                    id,
                    name,
                    side: Side::from_str_side(&side)
                        .ok_or_else(|| anyhow!("athlete {id} has unknown side {side:?}"))?,
                    status: AthleteStatus::from_str_status(&status)
                        .ok_or_else(|| anyhow!("athlete {id} has unknown status {status:?}"))?,
                })
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    /// All of a team's sessions in replay order (date, then id).
    pub fn load_sessions(&self, team_id: &str) -> Result<Vec<Session>> {
        let conn = self.conn();
        query_sessions(&conn, team_id)
    }

    pub fn is_session_processed(&self, team_id: &str, session_id: &str) -> Result<bool> {
        let conn = self.conn();
        query_processed(&conn, team_id, session_id)
    }

    /// Store a session and fold it into the team's seat-race ratings in one
    /// IMMEDIATE transaction.
    ///
    /// When the session sorts after every processed session of the team,
    /// `apply` receives the current seat-race rating book and returns the
    /// athletes it changed; only those rows are written. A back-dated
    /// session instead hands the team's whole history, in replay order, to
    /// `replay`, whose book replaces every seat-race row. Returns `None`
    /// without touching anything if the session was already processed.
    pub fn record_session_ratings<F, R>(
        &self,
        session: &Session,
        default_rating: f64,
        apply: F,
        replay: R,
    ) -> Result<Option<RecordedSession>>
    where
        F: FnOnce(&mut RatingBook) -> Result<Vec<AthleteId>>,
        R: FnOnce(Vec<Session>) -> Result<RatingBook>,
    {
        let mut conn = self.conn();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to begin session transaction")?;

        if query_processed(&tx, &session.team_id, &session.id)? {
            return Ok(None);
        }
        let back_dated = query_latest_processed(&tx, &session.team_id)?
            .is_some_and(|latest| (session.date, session.id.as_str()) < (latest.0, latest.1.as_str()));

        let payload = serde_json::to_string(session).context("failed to serialize session")?;
        tx.execute(
            "INSERT OR REPLACE INTO sessions (team_id, id, session_date, boat_class, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session.team_id,
                session.id,
                session.date.format("%Y-%m-%d").to_string(),
                session.boat_class.display_str(),
                payload,
            ],
        )
        .context("failed to save session")?;

        let recorded = if back_dated {
            let history = query_sessions(&tx, &session.team_id)?;
            let rows = replay(history)?.into_ratings();
            tx.execute(
                "DELETE FROM ratings WHERE team_id = ?1 AND rating_type = ?2",
                params![session.team_id, RatingType::SeatRaceElo.as_str()],
            )
            .context("failed to clear seat-race ratings")?;
            for rating in &rows {
                write_rating(&tx, &session.team_id, rating)?;
            }
            RecordedSession::Replayed(rows)
        } else {
            let current = query_ratings(&tx, &session.team_id, RatingType::SeatRaceElo)?;
            let mut book = RatingBook::from_ratings(RatingType::SeatRaceElo, default_rating, current);
            let touched = apply(&mut book)?;

            let mut updated = Vec::with_capacity(touched.len());
            for athlete_id in touched {
                if let Some(rating) = book.get(athlete_id) {
                    write_rating(&tx, &session.team_id, rating)?;
                    updated.push(rating.clone());
                }
            }
            RecordedSession::Appended(updated)
        };

        tx.execute(
            "INSERT INTO processed_sessions (team_id, session_id, processed_at) VALUES (?1, ?2, ?3)",
            params![session.team_id, session.id, Utc::now().to_rfc3339()],
        )
        .context("failed to mark session processed")?;

        tx.commit().context("failed to commit session ratings")?;
        Ok(Some(recorded))
    }

    // ------------------------------------------------------------------
    // Ratings
    // ------------------------------------------------------------------

    /// Rebuild every rating row of a team inside one IMMEDIATE transaction.
    ///
    /// `compute` receives the team's full session history in replay order
    /// and returns the complete new set of rating rows. The old rows are
    /// deleted and the new ones written before the transaction commits, so
    /// no reader or concurrent submission sees a partial replay. Returns the
    /// number of rows written.
    pub fn replace_team_ratings<F>(&self, team_id: &str, compute: F) -> Result<usize>
    where
        F: FnOnce(Vec<Session>) -> Result<Vec<Rating>>,
    {
        let mut conn = self.conn();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to begin recalculation transaction")?;

        let sessions = query_sessions(&tx, team_id)?;
        let session_ids: Vec<String> = sessions.iter().map(|s| s.id.clone()).collect();
        let ratings = compute(sessions)?;

        tx.execute("DELETE FROM ratings WHERE team_id = ?1", params![team_id])
            .context("failed to clear team ratings")?;
        for rating in &ratings {
            write_rating(&tx, team_id, rating)?;
        }

        let now = Utc::now().to_rfc3339();
        for session_id in &session_ids {
            tx.execute(
                "INSERT OR IGNORE INTO processed_sessions (team_id, session_id, processed_at)
                 VALUES (?1, ?2, ?3)",
                params![team_id, session_id, now],
            )
            .context("failed to mark session processed")?;
        }

        tx.commit().context("failed to commit recalculated ratings")?;
        Ok(ratings.len())
    }

    /// A team's rating rows of one type, highest first.
    pub fn load_ratings(&self, team_id: &str, rating_type: RatingType) -> Result<Vec<Rating>> {
        let conn = self.conn();
        let mut ratings = query_ratings(&conn, team_id, rating_type)?;
        ratings.sort_by(|a, b| {
            b.value
                .partial_cmp(&a.value)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.athlete_id.cmp(&b.athlete_id))
        });
        Ok(ratings)
    }

    pub fn load_rating(
        &self,
        team_id: &str,
        athlete_id: AthleteId,
        rating_type: RatingType,
    ) -> Result<Option<Rating>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT athlete_id, value, confidence, races_count, last_calculated
                 FROM ratings WHERE team_id = ?1 AND athlete_id = ?2 AND rating_type = ?3",
                params![team_id, athlete_id, rating_type.as_str()],
                |row| {
                    Ok((
                        row.get::<_, AthleteId>(0)?,
                        row.get::<_, f64>(1)?,
                        row.get::<_, f64>(2)?,
                        row.get::<_, u32>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                },
            )
            .optional()
            .context("failed to query rating")?;
        row.map(|r| rating_from_row(rating_type, r)).transpose()
    }
}

// ---------------------------------------------------------------------------
// Row helpers (usable inside and outside transactions)
// ---------------------------------------------------------------------------

type RatingRow = (AthleteId, f64, f64, u32, Option<String>);

fn rating_from_row(rating_type: RatingType, row: RatingRow) -> Result<Rating> {
    let (athlete_id, value, confidence, races_count, last_calculated) = row;
    let last_calculated = last_calculated
        .map(|ts| {
            DateTime::parse_from_rfc3339(&ts)
                .map(|dt| dt.with_timezone(&Utc))
                .with_context(|| format!("invalid last_calculated timestamp {ts:?}"))
        })
        .transpose()?;
    Ok(Rating {
        athlete_id,
        rating_type,
        value,
        confidence,
        races_count,
        last_calculated,
    })
}

fn query_ratings(conn: &Connection, team_id: &str, rating_type: RatingType) -> Result<Vec<Rating>> {
    let mut stmt = conn
        .prepare(
            "SELECT athlete_id, value, confidence, races_count, last_calculated
             FROM ratings WHERE team_id = ?1 AND rating_type = ?2 ORDER BY athlete_id",
        )
        .context("failed to prepare ratings query")?;

    let rows = stmt
        .query_map(params![team_id, rating_type.as_str()], |row| {
            Ok((
                row.get::<_, AthleteId>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, u32>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })
        .context("failed to query ratings")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to map rating rows")?;

    rows.into_iter().map(|r| rating_from_row(rating_type, r)).collect()
}

fn write_rating(conn: &Connection, team_id: &str, rating: &Rating) -> Result<()> {
    conn.execute(
        "INSERT INTO ratings (team_id, athlete_id, rating_type, value, confidence, races_count, last_calculated)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(team_id, athlete_id, rating_type) DO UPDATE SET
            value           = excluded.value,
            confidence      = excluded.confidence,
            races_count     = excluded.races_count,
            last_calculated = excluded.last_calculated",
        params![
            team_id,
            rating.athlete_id,
            rating.rating_type.as_str(),
            rating.value,
            rating.confidence,
            rating.races_count,
            rating.last_calculated.map(|dt| dt.to_rfc3339()),
        ],
    )
    .with_context(|| format!("failed to write rating for athlete {}", rating.athlete_id))?;
    Ok(())
}

fn query_processed(conn: &Connection, team_id: &str, session_id: &str) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM processed_sessions WHERE team_id = ?1 AND session_id = ?2)",
        params![team_id, session_id],
        |row| row.get(0),
    )
    .context("failed to check processed_sessions")
}

/// The team's last processed session in replay order, as (date, id).
fn query_latest_processed(conn: &Connection, team_id: &str) -> Result<Option<(NaiveDate, String)>> {
    let row = conn
        .query_row(
            "SELECT s.session_date, s.id
             FROM processed_sessions p
             JOIN sessions s ON s.team_id = p.team_id AND s.id = p.session_id
             WHERE p.team_id = ?1
             ORDER BY s.session_date DESC, s.id DESC
             LIMIT 1",
            params![team_id],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )
        .optional()
        .context("failed to query latest processed session")?;
    row.map(|(date, id)| {
        let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
            .with_context(|| format!("session {id} has invalid date {date:?}"))?;
        Ok((date, id))
    })
    .transpose()
}

fn query_sessions(conn: &Connection, team_id: &str) -> Result<Vec<Session>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, session_date, payload FROM sessions
             WHERE team_id = ?1 ORDER BY session_date, id",
        )
        .context("failed to prepare sessions query")?;

    let rows = stmt
        .query_map(params![team_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })
        .context("failed to query sessions")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to map session rows")?;

    rows.into_iter()
        .map(|(id, date, payload)| {
            NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                .with_context(|| format!("session {id} has invalid date {date:?}"))?;
            serde_json::from_str::<Session>(&payload)
                .with_context(|| format!("failed to deserialize session {id}"))
        })
        .collect()
}
