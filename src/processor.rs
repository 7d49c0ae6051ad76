//! Session processing.
//!
//! [`Scheduler`] is the pure transition: previous state plus one session
//! outcome gives the next state. [`SessionProcessor`] wraps it around an
//! injected [`ReviewRepository`] so hosts own storage and the engine owns
//! only the rules.
//!
//! Sessions for one topic must be applied in chronological order. Distinct
//! topics share no mutable state, so hosts may process them concurrently;
//! concurrent writers to the same topic need external serialization.

use std::collections::HashMap;

use chrono::{Duration, NaiveDate};
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::error::{Result, ScheduleError};
use crate::interval::IntervalModel;
use crate::models::{ReviewSnapshot, SessionOutcome, SessionTrace, TopicKey, TopicReviewState};
use crate::recovery::{RecoveryDetector, RecoveryPhase, Transition};

// Absorbs float noise in ratios such as 28/70 landing exactly on a threshold
const ACCURACY_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    config: SchedulerConfig,
    intervals: IntervalModel,
    detector: RecoveryDetector,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        // A collapse threshold above the interval cap could never fire
        let mut recovery = config.recovery.clone();
        recovery.collapse_interval_days = recovery
            .collapse_interval_days
            .min(config.interval.max_interval_days.max(1));

        Self {
            intervals: IntervalModel::new(config.interval.clone()),
            detector: RecoveryDetector::new(recovery),
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn intervals(&self) -> &IntervalModel {
        &self.intervals
    }

    /// Accuracy a topic needs before advancing to `target_review_count`.
    pub fn required_accuracy(&self, target_review_count: u32) -> f64 {
        self.config.advance.required_accuracy(target_review_count)
    }

    fn advance(&self, review_count: u32, accuracy: f64) -> u32 {
        let target = review_count.saturating_add(1);
        if accuracy + ACCURACY_EPSILON >= self.required_accuracy(target) {
            target
        } else {
            review_count
        }
    }

    fn recovery_interval(&self, review_count: u32, accuracy: f64) -> u32 {
        let cap = self.config.recovery.max_interval_days.max(1);
        self.intervals.computed_interval(review_count, accuracy).min(cap)
    }

    /// Apply one session to `state`, returning the next state.
    ///
    /// On rejection `state` is untouched and the error says why.
    pub fn apply(
        &self,
        state: &TopicReviewState,
        outcome: &SessionOutcome,
    ) -> Result<TopicReviewState> {
        if outcome.total() == 0 {
            return Err(ScheduleError::InvalidSession {
                correct: outcome.correct,
                incorrect: outcome.incorrect,
            });
        }
        if self.config.recovery.reject_out_of_order {
            if let Some(last) = state.last_reviewed {
                if outcome.date < last {
                    return Err(ScheduleError::OutOfOrder {
                        key: outcome.key.to_key_string(),
                        session: outcome.date,
                        last_reviewed: last,
                    });
                }
            }
        }

        let mut next = state.clone();
        next.cumulative_correct += outcome.correct as u64;
        next.cumulative_incorrect += outcome.incorrect as u64;
        next.last_reviewed = Some(outcome.date);
        let cumulative = next.cumulative_accuracy();

        let transition = self.detector.step(
            &state.phase,
            state.current_interval_days,
            outcome.correct,
            outcome.incorrect,
        );

        match transition {
            Transition::Stable => {
                next.review_count = self.advance(state.review_count, cumulative);
                next.current_interval_days =
                    self.intervals.computed_interval(next.review_count, cumulative);
                next.phase = RecoveryPhase::Stable;
            }
            Transition::Collapsed => {
                let floor = self.config.recovery.reset_review_count.max(1);
                next.review_count = state.review_count.min(floor);
                next.current_interval_days = self.recovery_interval(next.review_count, cumulative);
                next.phase = RecoveryPhase::entered();
                info!(
                    key = %outcome.key,
                    accuracy = outcome.accuracy().unwrap_or(0.0),
                    prior_interval = state.current_interval_days,
                    interval = next.current_interval_days,
                    "topic collapsed, entering recovery"
                );
            }
            Transition::Recovering(phase) => {
                let local = phase.recovery_accuracy().unwrap_or(0.0);
                next.review_count = self.advance(state.review_count, local);
                next.current_interval_days = self.recovery_interval(next.review_count, local);
                next.phase = phase;
            }
            Transition::Recovered { accuracy } => {
                next.review_count = self.advance(state.review_count, accuracy);
                next.current_interval_days =
                    self.intervals.computed_interval(next.review_count, cumulative);
                next.phase = RecoveryPhase::Stable;
                info!(
                    key = %outcome.key,
                    interval = next.current_interval_days,
                    "topic recovered"
                );
            }
        }

        debug!(
            key = %outcome.key,
            review_count = next.review_count,
            accuracy = cumulative,
            interval = next.current_interval_days,
            recovering = next.in_recovery_mode(),
            "session applied"
        );

        Ok(next)
    }

    /// Apply an ordered sequence of sessions, recording each step.
    pub fn replay(
        &self,
        state: &TopicReviewState,
        outcomes: &[SessionOutcome],
    ) -> Result<(TopicReviewState, Vec<SessionTrace>)> {
        let mut current = state.clone();
        let mut trace = Vec::with_capacity(outcomes.len());

        for (i, outcome) in outcomes.iter().enumerate() {
            current = self.apply(&current, outcome)?;
            trace.push(SessionTrace {
                session_number: i + 1,
                date: outcome.date,
                correct: outcome.correct,
                incorrect: outcome.incorrect,
                session_accuracy: outcome.accuracy().unwrap_or(0.0),
                cumulative_accuracy: current.cumulative_accuracy(),
                review_count: current.review_count,
                interval_days: current.current_interval_days,
                in_recovery_mode: current.in_recovery_mode(),
            });
        }

        Ok((current, trace))
    }

    /// Replay tallies with each session held on the day it falls due,
    /// starting from `start`.
    pub fn simulate(
        &self,
        key: &TopicKey,
        tallies: &[(u32, u32)],
        start: NaiveDate,
    ) -> Result<(TopicReviewState, Vec<SessionTrace>)> {
        let mut state = TopicReviewState::default();
        let mut trace = Vec::with_capacity(tallies.len());
        let mut date = start;

        for &(correct, incorrect) in tallies {
            let outcome = SessionOutcome::new(key.clone(), correct, incorrect, date);
            let (next, mut step) = self.replay(&state, std::slice::from_ref(&outcome))?;
            for row in &mut step {
                row.session_number = trace.len() + 1;
            }
            trace.extend(step);
            date = date + Duration::days(next.current_interval_days as i64);
            state = next;
        }

        Ok((state, trace))
    }
}

/// Storage owned by the hosting application.
pub trait ReviewRepository {
    fn get(&self, key: &TopicKey) -> Result<Option<TopicReviewState>>;
    fn save(&mut self, key: &TopicKey, state: &TopicReviewState) -> Result<()>;

    /// Persist the state produced by `outcome`. Stores that keep a session
    /// history write it here, atomically with the state.
    fn save_session(&mut self, outcome: &SessionOutcome, state: &TopicReviewState) -> Result<()> {
        self.save(&outcome.key, state)
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryRepository {
    states: HashMap<TopicKey, TopicReviewState>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Snapshots sorted by key.
    pub fn snapshots(&self) -> Vec<ReviewSnapshot> {
        let mut snaps: Vec<ReviewSnapshot> =
            self.states.iter().map(|(k, s)| s.snapshot(k)).collect();
        snaps.sort_by(|a, b| a.key.cmp(&b.key));
        snaps
    }

    pub fn remove_subject(&mut self, subject: &str) -> usize {
        let before = self.states.len();
        self.states.retain(|k, _| k.subject != subject);
        before - self.states.len()
    }
}

impl ReviewRepository for InMemoryRepository {
    fn get(&self, key: &TopicKey) -> Result<Option<TopicReviewState>> {
        Ok(self.states.get(key).cloned())
    }

    fn save(&mut self, key: &TopicKey, state: &TopicReviewState) -> Result<()> {
        self.states.insert(key.clone(), state.clone());
        Ok(())
    }
}

/// Applies session outcomes against an injected repository.
pub struct SessionProcessor<R: ReviewRepository> {
    scheduler: Scheduler,
    repo: R,
}

impl<R: ReviewRepository> SessionProcessor<R> {
    pub fn new(scheduler: Scheduler, repo: R) -> Self {
        Self { scheduler, repo }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn repository_mut(&mut self) -> &mut R {
        &mut self.repo
    }

    pub fn into_repository(self) -> R {
        self.repo
    }

    /// Current state, or the first-contact default for an unseen key.
    pub fn state(&self, key: &TopicKey) -> Result<TopicReviewState> {
        Ok(self.repo.get(key)?.unwrap_or_default())
    }

    pub fn snapshot(&self, key: &TopicKey) -> Result<ReviewSnapshot> {
        Ok(self.state(key)?.snapshot(key))
    }

    /// Apply one session and persist the result. Nothing is saved when the
    /// session is rejected.
    pub fn record(&mut self, outcome: &SessionOutcome) -> Result<TopicReviewState> {
        let current = self.state(&outcome.key)?;
        let next = match self.scheduler.apply(&current, outcome) {
            Ok(next) => next,
            Err(e) => {
                warn!(key = %outcome.key, error = %e, "session rejected");
                return Err(e);
            }
        };
        self.repo.save_session(outcome, &next)?;
        Ok(next)
    }

    /// Record sessions in order, stopping at the first rejection.
    pub fn record_all(&mut self, outcomes: &[SessionOutcome]) -> Result<Vec<TopicReviewState>> {
        outcomes.iter().map(|o| self.record(o)).collect()
    }
}
