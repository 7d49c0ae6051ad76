//! Degradation and recovery detection.
//!
//! A topic that has earned a long interval and then collapses in a single
//! session is knocked back to a short interval. While it recovers, its
//! interval follows only the sessions since the collapse so a few strong
//! sessions lengthen it again without being diluted by the full history.
//! A run of strong sessions returns it to the stable phase.

use serde::{Deserialize, Serialize};

use crate::config::RecoveryConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum RecoveryPhase {
    #[default]
    Stable,
    /// Tallies cover only the sessions after the collapse.
    Recovering {
        streak: u32,
        correct: u64,
        incorrect: u64,
    },
}

impl RecoveryPhase {
    pub fn entered() -> Self {
        RecoveryPhase::Recovering {
            streak: 0,
            correct: 0,
            incorrect: 0,
        }
    }

    pub fn is_recovering(&self) -> bool {
        matches!(self, RecoveryPhase::Recovering { .. })
    }

    pub fn streak(&self) -> u32 {
        match self {
            RecoveryPhase::Stable => 0,
            RecoveryPhase::Recovering { streak, .. } => *streak,
        }
    }

    /// Accuracy over the sessions since the collapse.
    pub fn recovery_accuracy(&self) -> Option<f64> {
        match self {
            RecoveryPhase::Stable => None,
            RecoveryPhase::Recovering {
                correct, incorrect, ..
            } => {
                let total = correct + incorrect;
                if total == 0 {
                    None
                } else {
                    Some(*correct as f64 / total as f64)
                }
            }
        }
    }
}

/// Outcome of feeding one session through the detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transition {
    /// Ordinary scheduling against lifetime accuracy.
    Stable,
    /// Long-interval topic just collapsed.
    Collapsed,
    /// Still recovering; carries the updated phase.
    Recovering(RecoveryPhase),
    /// Exit streak reached. `accuracy` is the final recovery-window accuracy.
    Recovered { accuracy: f64 },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecoveryDetector {
    config: RecoveryConfig,
}

impl RecoveryDetector {
    pub fn new(config: RecoveryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    fn is_collapse(&self, prior_interval_days: u32, session_accuracy: f64) -> bool {
        prior_interval_days >= self.config.collapse_interval_days
            && session_accuracy <= self.config.collapse_accuracy
    }

    /// Advance the state machine by one non-empty session.
    ///
    /// `prior_interval_days` is the interval the topic carried before this
    /// session was applied.
    pub fn step(
        &self,
        phase: &RecoveryPhase,
        prior_interval_days: u32,
        correct: u32,
        incorrect: u32,
    ) -> Transition {
        let total = correct as u64 + incorrect as u64;
        let session_accuracy = if total == 0 {
            0.0
        } else {
            correct as f64 / total as f64
        };

        match *phase {
            RecoveryPhase::Stable => {
                if self.is_collapse(prior_interval_days, session_accuracy) {
                    Transition::Collapsed
                } else {
                    Transition::Stable
                }
            }
            RecoveryPhase::Recovering {
                streak,
                correct: window_correct,
                incorrect: window_incorrect,
            } => {
                let streak = if session_accuracy >= self.config.exit_accuracy {
                    streak + 1
                } else {
                    0
                };
                let next = RecoveryPhase::Recovering {
                    streak,
                    correct: window_correct + correct as u64,
                    incorrect: window_incorrect + incorrect as u64,
                };

                if streak >= self.config.exit_streak {
                    Transition::Recovered {
                        accuracy: next.recovery_accuracy().unwrap_or(session_accuracy),
                    }
                } else {
                    Transition::Recovering(next)
                }
            }
        }
    }
}
