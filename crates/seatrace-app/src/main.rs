// seatrace entry point.
//
// Startup sequence:
// 1. Initialize tracing (log to file; stdout carries JSON results only)
// 2. Load config, seeding config/ from defaults/
// 3. Open the database and build the engine
// 4. Run the command (CPU-heavy work on a blocking worker) and print JSON

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info};

use seatrace_core::config;
use seatrace_core::engine::SeatRaceEngine;
use seatrace_core::race::{Athlete, AthleteId, AthleteStatus, BoatClass, Session, Side};
use seatrace_core::rating::elo::RatingType;
use seatrace_core::schedule::ScheduleRequest;

#[derive(Parser)]
#[command(name = "seatrace", version, about = "Seat-race ratings and swap schedules")]
struct Cli {
    /// Directory holding config/, defaults/ and logs/ (default: current directory)
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add an athlete to the roster or update their record
    Register {
        #[arg(long)]
        team: String,
        #[arg(long)]
        id: AthleteId,
        #[arg(long)]
        name: String,
        /// port, starboard, cox or both
        #[arg(long)]
        side: String,
        #[arg(long, default_value = "active")]
        status: String,
    },
    /// Remove an athlete from the roster (their results keep counting)
    Unregister {
        #[arg(long)]
        team: String,
        #[arg(long)]
        id: AthleteId,
    },
    /// Print the team roster
    Roster {
        #[arg(long)]
        team: String,
    },
    /// Submit a session's results from a JSON file ("-" reads stdin)
    Submit { file: PathBuf },
    /// Rebuild all ratings of a team from its full history
    Recalculate {
        #[arg(long)]
        team: String,
    },
    /// Print the Bradley-Terry fit
    Model {
        #[arg(long)]
        team: String,
    },
    /// Print the head-to-head win probability matrix
    Matrix {
        #[arg(long)]
        team: String,
    },
    /// Print the comparison graph with gaps and connectivity
    Graph {
        #[arg(long)]
        team: String,
    },
    /// Generate a seat-swap schedule
    Schedule {
        #[arg(long)]
        team: String,
        /// Athlete id to include (repeatable)
        #[arg(long = "athlete", required = true)]
        athletes: Vec<AthleteId>,
        /// 8+, 4+, 4-, 4x, 2-, 2x or 1x
        #[arg(long)]
        boat_class: String,
        #[arg(long)]
        pieces: Option<usize>,
        /// Also emit the session pre-filled from the plan, under this id
        #[arg(long)]
        prefill: Option<String>,
        /// Date for the pre-filled session (YYYY-MM-DD, default today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Print stored ratings, highest first
    Ratings {
        #[arg(long)]
        team: String,
        /// seat_race_elo or combined
        #[arg(long, default_value = "seat_race_elo")]
        rating_type: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let base_dir = match cli.base_dir {
        Some(dir) => dir,
        None => std::env::current_dir().context("failed to read current directory")?,
    };

    // 1. Initialize tracing
    init_tracing(&base_dir)?;
    info!("seatrace starting");

    // 2. Load config
    let config = config::load_config(&base_dir).context("failed to load configuration")?;
    info!(
        "Config loaded: K={}, default rating {}, draw threshold {}s",
        config.ratings.elo.k_factor,
        config.ratings.elo.default_rating,
        config.ratings.elo.draw_threshold_seconds
    );

    // 3. Open database
    let engine = Arc::new(SeatRaceEngine::open(&config).context("failed to open database")?);
    info!("Database opened at {}", config.db_path);

    // 4. Run the command
    let output = match run(engine, cli.command).await {
        Ok(output) => output,
        Err(e) => {
            error!("Command failed: {:#}", e);
            return Err(e);
        }
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&output).context("failed to format output")?
    );
    Ok(())
}

async fn run(engine: Arc<SeatRaceEngine>, command: Commands) -> anyhow::Result<serde_json::Value> {
    match command {
        Commands::Register {
            team,
            id,
            name,
            side,
            status,
        } => {
            let athlete = Athlete {
                id,
                name,
                side: parse_side(&side)?,
                status: parse_status(&status)?,
            };
            engine.register_athlete(&team, &athlete)?;
            to_json(&athlete)
        }
        Commands::Unregister { team, id } => {
            let removed = engine.remove_athlete(&team, id)?;
            to_json(&serde_json::json!({ "removed": removed }))
        }
        Commands::Roster { team } => to_json(&engine.roster(&team)?),
        Commands::Submit { file } => {
            let text = read_input(&file)?;
            let session: Session = serde_json::from_str(&text)
                .with_context(|| format!("failed to parse session from {}", file.display()))?;
            on_worker(engine, move |e| e.submit_session_results(&session)).await
        }
        Commands::Recalculate { team } => {
            on_worker(engine, move |e| e.recalculate_all_ratings(&team)).await
        }
        Commands::Model { team } => {
            on_worker(engine, move |e| Ok(e.bradley_terry_model(&team)?.as_ref().clone())).await
        }
        Commands::Matrix { team } => on_worker(engine, move |e| e.probability_matrix(&team)).await,
        Commands::Graph { team } => {
            on_worker(engine, move |e| Ok(e.comparison_graph(&team)?.as_ref().clone())).await
        }
        Commands::Schedule {
            team,
            athletes,
            boat_class,
            pieces,
            prefill,
            date,
        } => {
            let request = ScheduleRequest {
                athlete_ids: athletes,
                boat_class: parse_boat_class(&boat_class)?,
                piece_count: pieces,
            };
            let schedule_team = team.clone();
            let schedule = tokio::task::spawn_blocking({
                let engine = Arc::clone(&engine);
                move || engine.generate_swap_schedule(&schedule_team, &request)
            })
            .await
            .context("schedule worker panicked")??;

            match prefill {
                Some(session_id) => {
                    let date = date.unwrap_or_else(|| chrono::Local::now().date_naive());
                    let session = schedule.to_session(&session_id, &team, date);
                    to_json(&serde_json::json!({ "schedule": schedule, "session": session }))
                }
                None => to_json(&schedule),
            }
        }
        Commands::Ratings { team, rating_type } => {
            let rating_type = RatingType::from_str_type(&rating_type)
                .ok_or_else(|| anyhow!("unknown rating type {rating_type:?}"))?;
            to_json(&engine.ratings(&team, rating_type)?)
        }
    }
}

/// Run an engine call on the blocking pool so fits, replays and schedule
/// searches never occupy a runtime thread.
async fn on_worker<T, F>(engine: Arc<SeatRaceEngine>, f: F) -> anyhow::Result<serde_json::Value>
where
    F: FnOnce(&SeatRaceEngine) -> anyhow::Result<T> + Send + 'static,
    T: Serialize + Send + 'static,
{
    let value = tokio::task::spawn_blocking(move || f(&engine))
        .await
        .context("engine worker panicked")??;
    to_json(&value)
}

fn to_json<T: Serialize>(value: &T) -> anyhow::Result<serde_json::Value> {
    serde_json::to_value(value).context("failed to serialize result")
}

fn read_input(path: &Path) -> anyhow::Result<String> {
    if path == Path::new("-") {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("failed to read stdin")?;
        Ok(text)
    } else {
        std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
    }
}

fn parse_side(s: &str) -> anyhow::Result<Side> {
    Side::from_str_side(s).ok_or_else(|| anyhow!("unknown side {s:?}"))
}

fn parse_status(s: &str) -> anyhow::Result<AthleteStatus> {
    AthleteStatus::from_str_status(s).ok_or_else(|| anyhow!("unknown status {s:?}"))
}

fn parse_boat_class(s: &str) -> anyhow::Result<BoatClass> {
    BoatClass::from_str_class(s).ok_or_else(|| anyhow!("unknown boat class {s:?}"))
}

/// Initialize tracing to log to a file so stdout stays clean JSON.
fn init_tracing(base_dir: &Path) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = base_dir.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("seatrace.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("seatrace_core=info,seatrace=info,warn")),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
