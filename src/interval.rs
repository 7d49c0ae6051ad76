//! Interval model.
//!
//! Maps a review count to a base interval along an exponential curve and
//! scales it by a convex accuracy multiplier. Weak topics stay on a daily
//! drip: nothing grows until the review count passes 1, and accuracy
//! below roughly two thirds shortens rather than lengthens the base interval.

use crate::config::IntervalConfig;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct IntervalModel {
    config: IntervalConfig,
}

impl IntervalModel {
    pub fn new(config: IntervalConfig) -> Self {
        Self { config }
    }

    pub fn max_interval_days(&self) -> u32 {
        self.config.max_interval_days
    }

    /// Days implied purely by review count, before the difficulty multiplier.
    pub fn base_interval(&self, review_count: u32) -> u32 {
        if review_count <= 1 {
            return 1;
        }
        let cap = self.config.max_interval_days as f64;
        let raw = self.config.growth_base.powf((review_count - 1) as f64);
        // powf overflows to infinity for very large counts; min() keeps it finite
        raw.min(cap).round().max(1.0) as u32
    }

    /// Scale factor for an accuracy in [0, 1]. Out-of-range or NaN input is
    /// clamped first.
    pub fn difficulty_multiplier(&self, accuracy: f64) -> f64 {
        let accuracy = clamp_accuracy(accuracy);
        self.config.multiplier_floor
            + accuracy.powf(self.config.multiplier_exponent) * self.config.multiplier_span
    }

    /// Final interval in days, floored at 1 and capped at the interval ceiling.
    pub fn computed_interval(&self, review_count: u32, accuracy: f64) -> u32 {
        let scaled =
            self.base_interval(review_count) as f64 * self.difficulty_multiplier(accuracy);
        let cap = self.config.max_interval_days.max(1) as f64;
        scaled.round().clamp(1.0, cap) as u32
    }
}

pub(crate) fn clamp_accuracy(accuracy: f64) -> f64 {
    if accuracy.is_nan() {
        0.0
    } else {
        accuracy.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn model() -> IntervalModel {
        IntervalModel::default()
    }

    mod base_interval_tests {
        use super::*;

        #[test]
        fn first_two_levels_are_one_day() {
            assert_eq!(model().base_interval(0), 1);
            assert_eq!(model().base_interval(1), 1);
        }

        #[test]
        fn follows_growth_curve() {
            let m = model();
            let expected = [(2, 2), (3, 3), (4, 5), (5, 8), (6, 14), (7, 24), (8, 41), (9, 70)];
            for (count, days) in expected {
                assert_eq!(m.base_interval(count), days, "review count {}", count);
            }
        }

        #[test]
        fn reaches_cap_at_level_eleven() {
            let m = model();
            assert_eq!(m.base_interval(10), 119);
            assert_eq!(m.base_interval(11), 180);
            assert_eq!(m.base_interval(14), 180);
        }

        #[test]
        fn huge_counts_stay_capped() {
            assert_eq!(model().base_interval(u32::MAX), 180);
        }
    }

    mod multiplier_tests {
        use super::*;

        #[test]
        fn endpoints() {
            let m = model();
            assert!((m.difficulty_multiplier(0.0) - 0.6).abs() < 1e-12);
            assert!((m.difficulty_multiplier(1.0) - 2.0).abs() < 1e-12);
        }

        #[test]
        fn mediocre_accuracy_shortens_interval() {
            let m = model();
            assert!(m.difficulty_multiplier(0.60) < 1.0);
            assert!(m.difficulty_multiplier(0.70) > 1.0);
        }

        #[test]
        fn out_of_range_input_is_clamped() {
            let m = model();
            assert_eq!(m.difficulty_multiplier(-0.5), m.difficulty_multiplier(0.0));
            assert_eq!(m.difficulty_multiplier(3.0), m.difficulty_multiplier(1.0));
            assert_eq!(m.difficulty_multiplier(f64::NAN), m.difficulty_multiplier(0.0));
        }
    }

    mod computed_interval_tests {
        use super::*;

        #[test]
        fn level_two_at_forty_percent_rounds_back_to_one_day() {
            // 2 * 0.6896 = 1.38
            assert_eq!(model().computed_interval(2, 0.40), 1);
        }

        #[test]
        fn level_one_with_perfect_accuracy_is_two_days() {
            assert_eq!(model().computed_interval(1, 1.0), 2);
        }

        #[test]
        fn long_intervals_are_capped() {
            assert_eq!(model().computed_interval(10, 0.9), 180);
        }

        #[test]
        fn respects_custom_cap() {
            let m = IntervalModel::new(IntervalConfig {
                max_interval_days: 30,
                ..IntervalConfig::default()
            });
            assert_eq!(m.base_interval(20), 30);
            assert_eq!(m.computed_interval(20, 1.0), 30);
        }
    }

    proptest! {
        #[test]
        fn interval_never_below_one(count in 0u32..64, accuracy in -1.0f64..2.0) {
            prop_assert!(model().computed_interval(count, accuracy) >= 1);
        }

        #[test]
        fn base_interval_never_exceeds_cap(count in any::<u32>()) {
            prop_assert!(model().base_interval(count) <= 180);
        }

        #[test]
        fn multiplier_within_bounds(accuracy in 0.0f64..=1.0) {
            let f = model().difficulty_multiplier(accuracy);
            prop_assert!((0.6..=2.0).contains(&f));
        }

        #[test]
        fn fresh_topics_review_within_two_days(count in 0u32..=1, accuracy in 0.0f64..=1.0) {
            let days = model().computed_interval(count, accuracy);
            prop_assert!(days == 1 || days == 2);
        }
    }
}
