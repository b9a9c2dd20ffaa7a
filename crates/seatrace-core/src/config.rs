// Configuration loading and parsing (ratings.toml, engine.toml).

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::rating::extract::BoatWeighting;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub ratings: RatingConfig,
    pub db_path: String,
    pub cache_ttl_seconds: u64,
}

// ---------------------------------------------------------------------------
// ratings.toml structs
// ---------------------------------------------------------------------------

/// Every tunable the rating and scheduling engine reads. Passed explicitly
/// into each engine call; the engine never keeps its own copy of these values
/// anywhere global.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RatingConfig {
    pub elo: EloConfig,
    pub bradley_terry: BradleyTerryConfig,
    pub graph: GraphConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EloConfig {
    pub k_factor: f64,
    pub default_rating: f64,
    /// Adjusted-time gaps strictly below this many seconds are draws.
    pub draw_threshold_seconds: f64,
    pub margin_scaling: bool,
    /// Upper bound on the margin multiplier when `margin_scaling` is on.
    pub max_margin_factor: f64,
    /// Races after which confidence reaches 0.5.
    pub confidence_half_life: f64,
}

impl Default for EloConfig {
    fn default() -> Self {
        EloConfig {
            k_factor: 32.0,
            default_rating: 1500.0,
            draw_threshold_seconds: 0.5,
            margin_scaling: false,
            max_margin_factor: 2.0,
            confidence_half_life: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BradleyTerryConfig {
    pub max_iterations: usize,
    /// Stop once the relative log-likelihood change drops below this.
    pub tolerance: f64,
    pub boat_weighting: BoatWeighting,
    /// Weighted games each athlete plays against a virtual average opponent,
    /// split evenly between wins and losses. Keeps every strength finite and
    /// positive; 0 disables it.
    pub regularization_strength: f64,
}

impl Default for BradleyTerryConfig {
    fn default() -> Self {
        BradleyTerryConfig {
            max_iterations: 200,
            tolerance: 1e-6,
            boat_weighting: crate::rating::extract::SAME_BOAT_WEIGHTING,
            regularization_strength: 0.01,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Pairs with fewer recorded comparisons than this are reported as gaps.
    pub min_comparisons: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        GraphConfig { min_comparisons: 2 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Pieces each athlete should race when no piece count is requested.
    pub min_pieces_per_athlete: usize,
    /// Seat-swap attempts per piece when improving boat-mate spread.
    pub search_iterations: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            min_pieces_per_athlete: 3,
            search_iterations: 200,
        }
    }
}

// ---------------------------------------------------------------------------
// engine.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the entire engine.toml file.
#[derive(Debug, Clone, Deserialize)]
struct EngineFile {
    database: DatabaseSection,
    cache: CacheSection,
}

#[derive(Debug, Clone, Deserialize)]
struct DatabaseSection {
    path: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CacheSection {
    ttl_seconds: u64,
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/ratings.toml` and
/// `config/engine.toml`, relative to the given `base_dir`.
///
/// This does not copy defaults; prefer `load_config()` for that.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let config_dir = base_dir.join("config");

    let ratings_path = config_dir.join("ratings.toml");
    let ratings_text = read_file(&ratings_path)?;
    let ratings: RatingConfig =
        toml::from_str(&ratings_text).map_err(|e| ConfigError::ParseError {
            path: ratings_path.clone(),
            source: e,
        })?;

    let engine_path = config_dir.join("engine.toml");
    let engine_text = read_file(&engine_path)?;
    let engine_file: EngineFile =
        toml::from_str(&engine_text).map_err(|e| ConfigError::ParseError {
            path: engine_path.clone(),
            source: e,
        })?;

    let config = Config {
        ratings,
        db_path: engine_file.database.path,
        cache_ttl_seconds: engine_file.cache.ttl_seconds,
    };

    validate(&config.ratings)?;
    if config.db_path.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "database.path".into(),
            message: "must not be empty".into(),
        });
    }

    Ok(config)
}

/// Seed `config/` with every `defaults/*.toml` it is missing and return the
/// paths written, sorted. Existing files are never overwritten; anything in
/// `defaults/` that is not a `.toml` file (templates, notes) is ignored.
pub fn ensure_config_files(base_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let defaults_dir = base_dir.join("defaults");
    let config_dir = base_dir.join("config");

    if !defaults_dir.is_dir() {
        if config_dir.is_dir() {
            debug!("no defaults/ under {}; using config/ as is", base_dir.display());
            return Ok(vec![]);
        }
        return Err(seed_error(format!(
            "neither defaults/ nor config/ directory found in {}; \
             run from the project root or ensure defaults/ is present",
            base_dir.display()
        )));
    }

    std::fs::create_dir_all(&config_dir)
        .map_err(|e| seed_error(format!("failed to create {}: {e}", config_dir.display())))?;

    let mut shipped: Vec<PathBuf> = std::fs::read_dir(&defaults_dir)
        .map_err(|e| seed_error(format!("failed to read {}: {e}", defaults_dir.display())))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "toml"))
        .collect();
    shipped.sort();

    let mut seeded = Vec::new();
    for source in shipped {
        let Some(file_name) = source.file_name() else {
            continue;
        };
        let target = config_dir.join(file_name);
        if seed_file(&source, &target)? {
            info!("Seeded {} from {}", target.display(), source.display());
            seeded.push(target);
        } else {
            debug!("keeping existing {}", target.display());
        }
    }
    Ok(seeded)
}

/// Copy `source` to `target` unless `target` already exists. Returns whether
/// anything was written.
fn seed_file(source: &Path, target: &Path) -> Result<bool, ConfigError> {
    let mut dest = match std::fs::OpenOptions::new().write(true).create_new(true).open(target) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(seed_error(format!("failed to create {}: {e}", target.display()))),
    };
    let content = std::fs::read(source)
        .map_err(|e| seed_error(format!("failed to read {}: {e}", source.display())))?;
    dest.write_all(&content)
        .map_err(|e| seed_error(format!("failed to write {}: {e}", target.display())))?;
    Ok(true)
}

fn seed_error(message: String) -> ConfigError {
    ConfigError::DefaultsCopyError { message }
}

/// Load config relative to `base_dir`, seeding `config/` from `defaults/`
/// first.
pub fn load_config(base_dir: &Path) -> Result<Config, ConfigError> {
    ensure_config_files(base_dir)?;
    load_config_from(base_dir)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

fn invalid(field: &str, message: String) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_string(),
        message,
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Check every rating parameter for a usable value.
pub fn validate(ratings: &RatingConfig) -> Result<(), ConfigError> {
    let elo = &ratings.elo;
    let positive: &[(&str, f64)] = &[
        ("elo.k_factor", elo.k_factor),
        ("elo.confidence_half_life", elo.confidence_half_life),
        ("bradley_terry.tolerance", ratings.bradley_terry.tolerance),
    ];
    for (name, val) in positive {
        if !val.is_finite() || *val <= 0.0 {
            return Err(invalid(name, format!("must be > 0, got {val}")));
        }
    }

    if !elo.default_rating.is_finite() {
        return Err(invalid(
            "elo.default_rating",
            format!("must be finite, got {}", elo.default_rating),
        ));
    }

    if !elo.draw_threshold_seconds.is_finite() || elo.draw_threshold_seconds < 0.0 {
        return Err(invalid(
            "elo.draw_threshold_seconds",
            format!("must be >= 0, got {}", elo.draw_threshold_seconds),
        ));
    }

    let regularization = ratings.bradley_terry.regularization_strength;
    if !regularization.is_finite() || regularization < 0.0 {
        return Err(invalid(
            "bradley_terry.regularization_strength",
            format!("must be >= 0, got {regularization}"),
        ));
    }

    if !elo.max_margin_factor.is_finite() || elo.max_margin_factor < 1.0 {
        return Err(invalid(
            "elo.max_margin_factor",
            format!("must be >= 1, got {}", elo.max_margin_factor),
        ));
    }

    let counts: &[(&str, usize)] = &[
        ("bradley_terry.max_iterations", ratings.bradley_terry.max_iterations),
        ("graph.min_comparisons", ratings.graph.min_comparisons),
        ("scheduler.min_pieces_per_athlete", ratings.scheduler.min_pieces_per_athlete),
        ("scheduler.search_iterations", ratings.scheduler.search_iterations),
    ];
    for (name, val) in counts {
        if *val == 0 {
            return Err(invalid(name, "must be > 0".into()));
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
