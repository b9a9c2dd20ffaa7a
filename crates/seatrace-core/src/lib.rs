// Library root: the seat-racing rating and scheduling engine, exposed for the
// command-line boundary and the integration tests.

pub mod config;
pub mod db;
pub mod engine;
pub mod race;
pub mod rating;
pub mod schedule;
