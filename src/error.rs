use chrono::NaiveDate;
use thiserror::Error;

/// Rejections raised by the scheduling engine.
///
/// Every variant is recoverable: the state the caller held before the
/// failing call is left untouched.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScheduleError {
    #[error("session has no answers ({correct} correct, {incorrect} incorrect)")]
    InvalidSession { correct: u32, incorrect: u32 },

    #[error("session dated {session} for '{key}' is older than last review on {last_reviewed}")]
    OutOfOrder {
        key: String,
        session: NaiveDate,
        last_reviewed: NaiveDate,
    },

    #[error("invalid topic key: {0}")]
    InvalidKey(String),

    #[error("repository error: {0}")]
    Repository(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ScheduleError>;
