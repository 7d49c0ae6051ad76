use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, ScheduleError};
use crate::recovery::RecoveryPhase;

/// Joins subject and topic in a stored key. Rejected inside labels.
pub const KEY_SEPARATOR: &str = "::";

/// A reviewable unit: a subject, optionally narrowed to one topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TopicKey {
    pub subject: String,
    pub topic: Option<String>,
}

impl TopicKey {
    pub fn new(subject: impl Into<String>, topic: Option<impl Into<String>>) -> Result<Self> {
        let subject = subject.into();
        let topic = topic.map(Into::into);

        if subject.is_empty() {
            return Err(ScheduleError::InvalidKey("subject must not be empty".into()));
        }
        if subject.contains(KEY_SEPARATOR) {
            return Err(ScheduleError::InvalidKey(format!(
                "subject '{}' contains reserved separator '{}'",
                subject, KEY_SEPARATOR
            )));
        }
        // "a:" + "::" + "b" would read back as "a" + "::" + ":b"
        if subject.ends_with(':') {
            return Err(ScheduleError::InvalidKey(format!(
                "subject '{}' must not end with ':'",
                subject
            )));
        }
        if let Some(t) = &topic {
            if t.contains(KEY_SEPARATOR) {
                return Err(ScheduleError::InvalidKey(format!(
                    "topic '{}' contains reserved separator '{}'",
                    t, KEY_SEPARATOR
                )));
            }
        }

        Ok(Self { subject, topic })
    }

    pub fn subject(subject: impl Into<String>) -> Result<Self> {
        Self::new(subject, None::<String>)
    }

    /// Stable string form: `subject` or `subject::topic`.
    pub fn to_key_string(&self) -> String {
        match &self.topic {
            Some(t) => format!("{}{}{}", self.subject, KEY_SEPARATOR, t),
            None => self.subject.clone(),
        }
    }

    /// Exact inverse of [`TopicKey::to_key_string`].
    pub fn parse(s: &str) -> Result<Self> {
        match s.split_once(KEY_SEPARATOR) {
            Some((subject, topic)) => Self::new(subject, Some(topic)),
            None => Self::new(s, None::<String>),
        }
    }
}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.topic {
            Some(t) => write!(f, "{} / {}", self.subject, t),
            None => write!(f, "{}", self.subject),
        }
    }
}

pub fn make_key(subject: &str, topic: Option<&str>) -> Result<String> {
    TopicKey::new(subject, topic).map(|k| k.to_key_string())
}

pub fn parse_key(key: &str) -> Result<(String, Option<String>)> {
    TopicKey::parse(key).map(|k| (k.subject, k.topic))
}

/// Raw tally of one study session for one topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOutcome {
    pub key: TopicKey,
    pub correct: u32,
    pub incorrect: u32,
    pub date: NaiveDate,
}

impl SessionOutcome {
    pub fn new(key: TopicKey, correct: u32, incorrect: u32, date: NaiveDate) -> Self {
        Self {
            key,
            correct,
            incorrect,
            date,
        }
    }

    pub fn total(&self) -> u64 {
        self.correct as u64 + self.incorrect as u64
    }

    /// Session accuracy, or `None` for an empty tally.
    pub fn accuracy(&self) -> Option<f64> {
        ratio(self.correct as u64, self.incorrect as u64)
    }
}

/// Durable scheduling record for one topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicReviewState {
    pub review_count: u32,
    pub cumulative_correct: u64,
    pub cumulative_incorrect: u64,
    pub current_interval_days: u32,
    pub last_reviewed: Option<NaiveDate>,
    pub phase: RecoveryPhase,
}

impl Default for TopicReviewState {
    fn default() -> Self {
        Self {
            review_count: 0,
            cumulative_correct: 0,
            cumulative_incorrect: 0,
            current_interval_days: 1,
            last_reviewed: None,
            phase: RecoveryPhase::Stable,
        }
    }
}

impl TopicReviewState {
    /// Lifetime accuracy; 0 before any answer has been recorded.
    pub fn cumulative_accuracy(&self) -> f64 {
        ratio(self.cumulative_correct, self.cumulative_incorrect).unwrap_or(0.0)
    }

    pub fn total_answers(&self) -> u64 {
        self.cumulative_correct + self.cumulative_incorrect
    }

    pub fn in_recovery_mode(&self) -> bool {
        self.phase.is_recovering()
    }

    pub fn recovery_streak(&self) -> u32 {
        self.phase.streak()
    }

    pub fn next_review_date(&self) -> Option<NaiveDate> {
        self.last_reviewed
            .map(|d| d + Duration::days(self.current_interval_days as i64))
    }

    /// Never-reviewed topics are always due.
    pub fn is_due(&self, as_of: NaiveDate) -> bool {
        self.next_review_date().map_or(true, |next| next <= as_of)
    }

    pub fn days_overdue(&self, as_of: NaiveDate) -> i64 {
        self.next_review_date()
            .map_or(0, |next| (as_of - next).num_days().max(0))
    }

    pub fn snapshot(&self, key: &TopicKey) -> ReviewSnapshot {
        ReviewSnapshot {
            key: key.clone(),
            review_count: self.review_count,
            cumulative_correct: self.cumulative_correct,
            cumulative_incorrect: self.cumulative_incorrect,
            cumulative_accuracy: self.cumulative_accuracy(),
            current_interval_days: self.current_interval_days,
            last_reviewed: self.last_reviewed,
            next_review: self.next_review_date(),
            in_recovery_mode: self.in_recovery_mode(),
            recovery_streak: self.recovery_streak(),
        }
    }
}

/// Read-only view of a topic handed to scorers and the CLI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewSnapshot {
    pub key: TopicKey,
    pub review_count: u32,
    pub cumulative_correct: u64,
    pub cumulative_incorrect: u64,
    pub cumulative_accuracy: f64,
    pub current_interval_days: u32,
    pub last_reviewed: Option<NaiveDate>,
    pub next_review: Option<NaiveDate>,
    pub in_recovery_mode: bool,
    pub recovery_streak: u32,
}

impl ReviewSnapshot {
    pub fn is_due(&self, as_of: NaiveDate) -> bool {
        self.next_review.map_or(true, |next| next <= as_of)
    }

    pub fn days_overdue(&self, as_of: NaiveDate) -> i64 {
        self.next_review
            .map_or(0, |next| (as_of - next).num_days().max(0))
    }
}

/// One row of a replayed session sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionTrace {
    pub session_number: usize,
    pub date: NaiveDate,
    pub correct: u32,
    pub incorrect: u32,
    pub session_accuracy: f64,
    pub cumulative_accuracy: f64,
    pub review_count: u32,
    pub interval_days: u32,
    pub in_recovery_mode: bool,
}

/// Time spent studying, as recorded by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyLog {
    pub id: i64,
    pub subject: String,
    pub topic: Option<String>,
    pub date: NaiveDate,
    pub duration_secs: u64,
}

// JSON output wrapper for CLI
#[derive(Debug, Serialize)]
pub struct JsonOutput<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> JsonOutput<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

fn ratio(correct: u64, incorrect: u64) -> Option<f64> {
    let total = correct + incorrect;
    if total == 0 {
        None
    } else {
        Some(correct as f64 / total as f64)
    }
}
