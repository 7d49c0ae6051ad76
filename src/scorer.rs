//! Subject health scoring.
//!
//! Read-only over review snapshots and study logs. Scores feed mission
//! generation: subjects below the healthy band, or with a topic in
//! recovery, are flagged as needing attention.

use std::collections::BTreeSet;

use chrono::{Duration, NaiveDate};
use rand::Rng;
use serde::Serialize;

use crate::models::{ReviewSnapshot, StudyLog};

/// Stand-in for "days since last study" when a subject was never studied.
pub const NEVER_STUDIED_DAYS: i64 = 999;

const FOCUS_WEIGHT: f64 = 0.4;
const RECENCY_WEIGHT: f64 = 0.3;
const CONSISTENCY_WEIGHT: f64 = 0.3;
const RECENCY_PENALTY_PER_DAY: i64 = 7;

const HEALTHY_SCORE: u32 = 80;
const WARNING_SCORE: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreBand {
    Healthy,
    Warning,
    Critical,
}

impl ScoreBand {
    pub fn from_score(score: u32) -> Self {
        if score >= HEALTHY_SCORE {
            ScoreBand::Healthy
        } else if score >= WARNING_SCORE {
            ScoreBand::Warning
        } else {
            ScoreBand::Critical
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ScoreBand::Healthy => "Healthy",
            ScoreBand::Warning => "Warning",
            ScoreBand::Critical => "Critical",
        }
    }
}

/// Raw activity figures for one subject over the trailing week.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubjectActivity {
    pub subject: String,
    pub last_studied: Option<NaiveDate>,
    pub weekly_minutes: u32,
    pub goal_minutes: u32,
    pub days_studied_this_week: u32,
    pub topics_in_recovery: u32,
}

impl SubjectActivity {
    /// Gather activity for `subject` from study logs and review snapshots.
    ///
    /// The week is the seven days ending on `today`. Review dates count as
    /// study days alongside logged time.
    pub fn collect(
        subject: &str,
        logs: &[StudyLog],
        snapshots: &[ReviewSnapshot],
        goal_minutes: u32,
        today: NaiveDate,
    ) -> Self {
        let week_start = today - Duration::days(6);
        let in_week = |d: NaiveDate| d >= week_start && d <= today;

        let subject_logs = logs.iter().filter(|l| l.subject == subject);
        let subject_snaps: Vec<&ReviewSnapshot> =
            snapshots.iter().filter(|s| s.key.subject == subject).collect();

        let mut study_days: BTreeSet<NaiveDate> = BTreeSet::new();
        let mut weekly_secs: u64 = 0;
        for log in subject_logs {
            study_days.insert(log.date);
            if in_week(log.date) {
                weekly_secs += log.duration_secs;
            }
        }
        study_days.extend(subject_snaps.iter().filter_map(|s| s.last_reviewed));

        let last_studied = study_days.iter().filter(|d| **d <= today).next_back().copied();
        let days_studied_this_week = study_days.iter().filter(|d| in_week(**d)).count() as u32;
        let topics_in_recovery = subject_snaps.iter().filter(|s| s.in_recovery_mode).count() as u32;

        Self {
            subject: subject.to_string(),
            last_studied,
            weekly_minutes: (weekly_secs / 60).min(u32::MAX as u64) as u32,
            goal_minutes,
            days_studied_this_week,
            topics_in_recovery,
        }
    }

    pub fn days_since_last_study(&self, today: NaiveDate) -> i64 {
        self.last_studied
            .map_or(NEVER_STUDIED_DAYS, |d| (today - d).num_days().max(0))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectScore {
    pub subject: String,
    pub overall: u32,
    pub focus: u32,
    pub review: u32,
    pub consistency: u32,
    pub weekly_minutes: u32,
    pub goal_minutes: u32,
    pub days_since_last_study: i64,
    pub days_studied_this_week: u32,
    pub topics_in_recovery: u32,
    pub band: ScoreBand,
    pub needs_attention: bool,
}

/// Weekly minutes against goal, 0-100.
pub fn focus_score(weekly_minutes: u32, goal_minutes: u32) -> u32 {
    if goal_minutes == 0 {
        return if weekly_minutes > 0 { 100 } else { 0 };
    }
    let pct = weekly_minutes as f64 / goal_minutes as f64 * 100.0;
    pct.round().min(100.0) as u32
}

/// Loses seven points per day without study; zero from day 15.
pub fn recency_score(days_since_last_study: i64) -> u32 {
    (100 - days_since_last_study.max(0).saturating_mul(RECENCY_PENALTY_PER_DAY)).max(0) as u32
}

pub fn consistency_score(days_studied_this_week: u32) -> u32 {
    let days = days_studied_this_week.min(7) as f64;
    (days / 7.0 * 100.0).round() as u32
}

pub fn score_subject(activity: &SubjectActivity, today: NaiveDate) -> SubjectScore {
    let days_since = activity.days_since_last_study(today);
    let focus = focus_score(activity.weekly_minutes, activity.goal_minutes);
    let review = recency_score(days_since);
    let consistency = consistency_score(activity.days_studied_this_week);

    let overall = (focus as f64 * FOCUS_WEIGHT
        + review as f64 * RECENCY_WEIGHT
        + consistency as f64 * CONSISTENCY_WEIGHT)
        .round()
        .clamp(0.0, 100.0) as u32;
    let band = ScoreBand::from_score(overall);

    SubjectScore {
        subject: activity.subject.clone(),
        overall,
        focus,
        review,
        consistency,
        weekly_minutes: activity.weekly_minutes,
        goal_minutes: activity.goal_minutes,
        days_since_last_study: days_since,
        days_studied_this_week: activity.days_studied_this_week,
        topics_in_recovery: activity.topics_in_recovery,
        band,
        needs_attention: band != ScoreBand::Healthy || activity.topics_in_recovery > 0,
    }
}

/// Scores for many subjects, lowest (most in need) first.
pub fn rank_subjects(activities: &[SubjectActivity], today: NaiveDate) -> Vec<SubjectScore> {
    let mut scores: Vec<SubjectScore> =
        activities.iter().map(|a| score_subject(a, today)).collect();
    scores.sort_by(|a, b| a.overall.cmp(&b.overall).then_with(|| a.subject.cmp(&b.subject)));
    scores
}

/// Consecutive study days ending today or yesterday.
pub fn study_streak<I>(dates: I, today: NaiveDate) -> u32
where
    I: IntoIterator<Item = NaiveDate>,
{
    let days: BTreeSet<NaiveDate> = dates.into_iter().filter(|d| *d <= today).collect();
    let Some(&latest) = days.iter().next_back() else {
        return 0;
    };
    if (today - latest).num_days() > 1 {
        return 0;
    }

    let mut streak = 0;
    let mut expected = latest;
    for day in days.iter().rev() {
        if *day != expected {
            break;
        }
        streak += 1;
        expected = expected - Duration::days(1);
    }
    streak
}

/// Topics due on or before `as_of`: most overdue first, then least mature.
pub fn due_topics(snapshots: &[ReviewSnapshot], as_of: NaiveDate) -> Vec<ReviewSnapshot> {
    let mut due: Vec<ReviewSnapshot> = snapshots
        .iter()
        .filter(|s| s.is_due(as_of))
        .cloned()
        .collect();
    due.sort_by(|a, b| {
        b.days_overdue(as_of)
            .cmp(&a.days_overdue(as_of))
            .then_with(|| a.review_count.cmp(&b.review_count))
            .then_with(|| a.key.cmp(&b.key))
    });
    due
}

// Lower review count and longer overdue both raise the odds of being picked
fn pick_weight(snapshot: &ReviewSnapshot, as_of: NaiveDate) -> f64 {
    let overdue = snapshot.days_overdue(as_of) as f64 + 1.0;
    let maturity = 1.0 / (snapshot.review_count as f64 + 1.0);
    let recovery = if snapshot.in_recovery_mode { 2.0 } else { 1.0 };
    overdue * maturity * recovery
}

/// Weighted random choice among due topics.
pub fn pick_next_topic<R: Rng + ?Sized>(
    snapshots: &[ReviewSnapshot],
    as_of: NaiveDate,
    rng: &mut R,
) -> Option<ReviewSnapshot> {
    let due = due_topics(snapshots, as_of);
    if due.is_empty() {
        return None;
    }

    let weights: Vec<f64> = due.iter().map(|s| pick_weight(s, as_of)).collect();
    let total: f64 = weights.iter().sum();
    let mut point = rng.gen::<f64>() * total;

    for (i, weight) in weights.iter().enumerate() {
        point -= weight;
        if point <= 0.0 {
            return Some(due[i].clone());
        }
    }

    due.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TopicKey, TopicReviewState};
    use crate::recovery::RecoveryPhase;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn today() -> NaiveDate {
        date(2024, 6, 15)
    }

    fn log(subject: &str, date: NaiveDate, minutes: u64) -> StudyLog {
        StudyLog {
            id: 0,
            subject: subject.to_string(),
            topic: None,
            date,
            duration_secs: minutes * 60,
        }
    }

    fn snapshot(
        subject: &str,
        topic: &str,
        last: Option<NaiveDate>,
        interval: u32,
        review_count: u32,
    ) -> ReviewSnapshot {
        TopicReviewState {
            review_count,
            current_interval_days: interval,
            last_reviewed: last,
            ..TopicReviewState::default()
        }
        .snapshot(&TopicKey::new(subject, Some(topic)).unwrap())
    }

    mod sub_score_tests {
        use super::*;

        #[test]
        fn recency_drops_seven_per_day() {
            assert_eq!(recency_score(0), 100);
            assert_eq!(recency_score(1), 93);
            assert_eq!(recency_score(14), 2);
            assert_eq!(recency_score(15), 0);
            assert_eq!(recency_score(NEVER_STUDIED_DAYS), 0);
        }

        #[test]
        fn focus_is_capped_at_goal() {
            assert_eq!(focus_score(30, 60), 50);
            assert_eq!(focus_score(120, 60), 100);
            assert_eq!(focus_score(0, 60), 0);
        }

        #[test]
        fn focus_without_goal() {
            assert_eq!(focus_score(0, 0), 0);
            assert_eq!(focus_score(10, 0), 100);
        }

        #[test]
        fn consistency_is_share_of_week() {
            assert_eq!(consistency_score(0), 0);
            assert_eq!(consistency_score(7), 100);
            assert_eq!(consistency_score(3), 43);
            assert_eq!(consistency_score(9), 100);
        }
    }

    mod score_subject_tests {
        use super::*;

        fn activity(last: Option<NaiveDate>, weekly: u32, goal: u32, days: u32) -> SubjectActivity {
            SubjectActivity {
                subject: "Física".to_string(),
                last_studied: last,
                weekly_minutes: weekly,
                goal_minutes: goal,
                days_studied_this_week: days,
                topics_in_recovery: 0,
            }
        }

        #[test]
        fn perfect_week_scores_hundred() {
            let s = score_subject(&activity(Some(today()), 300, 300, 7), today());
            assert_eq!(s.overall, 100);
            assert_eq!(s.band, ScoreBand::Healthy);
            assert!(!s.needs_attention);
        }

        #[test]
        fn weights_are_forty_thirty_thirty() {
            // focus 50, recency 93, consistency 43 -> 20 + 27.9 + 12.9 = 60.8
            let s = score_subject(&activity(Some(date(2024, 6, 14)), 150, 300, 3), today());
            assert_eq!(s.focus, 50);
            assert_eq!(s.review, 93);
            assert_eq!(s.consistency, 43);
            assert_eq!(s.overall, 61);
            assert_eq!(s.band, ScoreBand::Warning);
            assert!(s.needs_attention);
        }

        #[test]
        fn never_studied_subject_uses_sentinel() {
            let s = score_subject(&activity(None, 0, 300, 0), today());
            assert_eq!(s.days_since_last_study, NEVER_STUDIED_DAYS);
            assert_eq!(s.review, 0);
            assert_eq!(s.overall, 0);
            assert_eq!(s.band, ScoreBand::Critical);
        }

        #[test]
        fn recovering_topic_forces_attention() {
            let mut a = activity(Some(today()), 300, 300, 7);
            a.topics_in_recovery = 1;
            let s = score_subject(&a, today());
            assert_eq!(s.band, ScoreBand::Healthy);
            assert!(s.needs_attention);
        }

        #[test]
        fn rank_puts_weakest_first() {
            let mut strong = activity(Some(today()), 300, 300, 7);
            strong.subject = "A".to_string();
            let mut weak = activity(None, 0, 300, 0);
            weak.subject = "B".to_string();
            let ranked = rank_subjects(&[strong, weak], today());
            assert_eq!(ranked[0].subject, "B");
            assert_eq!(ranked[1].subject, "A");
        }
    }

    mod collect_tests {
        use super::*;

        #[test]
        fn counts_only_the_trailing_week() {
            let logs = vec![
                log("Química", date(2024, 6, 15), 30),
                log("Química", date(2024, 6, 15), 15),
                log("Química", date(2024, 6, 9), 20),
                log("Química", date(2024, 6, 8), 60),
                log("Biologia", date(2024, 6, 15), 90),
            ];
            let a = SubjectActivity::collect("Química", &logs, &[], 120, today());
            assert_eq!(a.weekly_minutes, 65);
            assert_eq!(a.days_studied_this_week, 2);
            assert_eq!(a.last_studied, Some(today()));
            assert_eq!(a.goal_minutes, 120);
        }

        #[test]
        fn review_dates_count_as_study() {
            let snaps = vec![snapshot("Química", "Ácidos", Some(date(2024, 6, 12)), 3, 2)];
            let a = SubjectActivity::collect("Química", &[], &snaps, 60, today());
            assert_eq!(a.last_studied, Some(date(2024, 6, 12)));
            assert_eq!(a.days_studied_this_week, 1);
            assert_eq!(a.days_since_last_study(today()), 3);
        }

        #[test]
        fn counts_recovering_topics() {
            let mut snap = snapshot("Química", "Ácidos", Some(today()), 3, 2);
            snap.in_recovery_mode = true;
            let a = SubjectActivity::collect("Química", &[], &[snap], 60, today());
            assert_eq!(a.topics_in_recovery, 1);
        }

        #[test]
        fn unknown_subject_has_no_activity() {
            let a = SubjectActivity::collect("Latim", &[], &[], 60, today());
            assert_eq!(a.last_studied, None);
            assert_eq!(a.days_since_last_study(today()), NEVER_STUDIED_DAYS);
        }

        #[test]
        fn recovery_phase_reaches_snapshot() {
            let state = TopicReviewState {
                phase: RecoveryPhase::entered(),
                last_reviewed: Some(today()),
                ..TopicReviewState::default()
            };
            let snap = state.snapshot(&TopicKey::subject("Química").unwrap());
            let a = SubjectActivity::collect("Química", &[], &[snap], 60, today());
            assert_eq!(a.topics_in_recovery, 1);
        }
    }

    mod streak_tests {
        use super::*;

        #[test]
        fn empty_history_has_no_streak() {
            assert_eq!(study_streak(Vec::new(), today()), 0);
        }

        #[test]
        fn counts_consecutive_days_ending_today() {
            let days = vec![date(2024, 6, 15), date(2024, 6, 14), date(2024, 6, 13)];
            assert_eq!(study_streak(days, today()), 3);
        }

        #[test]
        fn streak_survives_until_end_of_next_day() {
            let days = vec![date(2024, 6, 14), date(2024, 6, 13)];
            assert_eq!(study_streak(days, today()), 2);
        }

        #[test]
        fn stale_streak_is_broken() {
            let days = vec![date(2024, 6, 13), date(2024, 6, 12)];
            assert_eq!(study_streak(days, today()), 0);
        }

        #[test]
        fn gap_ends_streak_and_duplicates_collapse() {
            let days = vec![
                date(2024, 6, 15),
                date(2024, 6, 15),
                date(2024, 6, 14),
                date(2024, 6, 12),
            ];
            assert_eq!(study_streak(days, today()), 2);
        }
    }

    mod due_tests {
        use super::*;

        #[test]
        fn orders_by_overdue_then_maturity() {
            let snaps = vec![
                snapshot("M", "a", Some(date(2024, 6, 10)), 2, 3), // due 12th, 3 overdue
                snapshot("M", "b", Some(date(2024, 6, 14)), 1, 5), // due today
                snapshot("M", "c", Some(date(2024, 6, 14)), 1, 1), // due today
                snapshot("M", "d", Some(date(2024, 6, 14)), 7, 1), // not due
            ];
            let due = due_topics(&snaps, today());
            let names: Vec<_> = due.iter().map(|s| s.key.topic.clone().unwrap()).collect();
            assert_eq!(names, vec!["a", "c", "b"]);
        }

        #[test]
        fn never_reviewed_is_due() {
            let snaps = vec![snapshot("M", "new", None, 1, 0)];
            assert_eq!(due_topics(&snaps, today()).len(), 1);
        }

        #[test]
        fn pick_returns_none_when_nothing_due() {
            let snaps = vec![snapshot("M", "d", Some(today()), 7, 1)];
            let mut rng = StdRng::seed_from_u64(7);
            assert!(pick_next_topic(&snaps, today(), &mut rng).is_none());
        }

        #[test]
        fn pick_only_returns_due_topics() {
            let snaps = vec![
                snapshot("M", "due", Some(date(2024, 6, 10)), 1, 2),
                snapshot("M", "later", Some(today()), 30, 2),
            ];
            let mut rng = StdRng::seed_from_u64(42);
            for _ in 0..20 {
                let pick = pick_next_topic(&snaps, today(), &mut rng).unwrap();
                assert_eq!(pick.key.topic.as_deref(), Some("due"));
            }
        }
    }
}
