//! Adaptive spaced-repetition scheduling.
//!
//! Given a chronological stream of per-topic session tallies, the engine
//! decides how many days until each topic is reviewed again. Intervals grow
//! exponentially with review count, shrink for weak accuracy, and collapse
//! into a short-interval recovery mode when a long-interval topic is
//! suddenly failed.

pub mod config;
pub mod db;
pub mod error;
pub mod interval;
pub mod models;
pub mod processor;
pub mod recovery;
pub mod scorer;

pub use config::SchedulerConfig;
pub use error::{ConfigError, ScheduleError};
pub use interval::IntervalModel;
pub use models::{ReviewSnapshot, SessionOutcome, TopicKey, TopicReviewState};
pub use processor::{InMemoryRepository, ReviewRepository, Scheduler, SessionProcessor};
pub use recovery::{RecoveryDetector, RecoveryPhase};
pub use scorer::{SubjectActivity, SubjectScore};
