use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result, Row};
use std::path::Path;

use crate::error::ScheduleError;
use crate::models::{ReviewSnapshot, SessionOutcome, StudyLog, TopicKey, TopicReviewState};
use crate::processor::ReviewRepository;
use crate::recovery::RecoveryPhase;

const DATE_FORMAT: &str = "%Y-%m-%d";

pub struct Database {
    conn: Connection,
}

/// One accepted session, as kept in the history table.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct HistoryEntry {
    pub key: TopicKey,
    pub reviewed_on: NaiveDate,
    pub correct: u32,
    pub incorrect: u32,
    pub review_count: u32,
    pub interval_days: u32,
    pub in_recovery_mode: bool,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn })
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS review_states (
                topic_key TEXT PRIMARY KEY,
                subject TEXT NOT NULL,
                topic TEXT,
                review_count INTEGER NOT NULL DEFAULT 0,
                cumulative_correct INTEGER NOT NULL DEFAULT 0,
                cumulative_incorrect INTEGER NOT NULL DEFAULT 0,
                interval_days INTEGER NOT NULL DEFAULT 1,
                last_reviewed TEXT,
                recovering INTEGER NOT NULL DEFAULT 0,
                recovery_streak INTEGER NOT NULL DEFAULT 0,
                recovery_correct INTEGER NOT NULL DEFAULT 0,
                recovery_incorrect INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS review_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                topic_key TEXT NOT NULL,
                reviewed_on TEXT NOT NULL,
                correct INTEGER NOT NULL,
                incorrect INTEGER NOT NULL,
                review_count INTEGER NOT NULL,
                interval_days INTEGER NOT NULL,
                recovering INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (topic_key) REFERENCES review_states(topic_key) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS study_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subject TEXT NOT NULL,
                topic TEXT,
                studied_on TEXT NOT NULL,
                duration_secs INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS subject_goals (
                subject TEXT PRIMARY KEY,
                weekly_minutes INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_review_states_subject ON review_states(subject);
            CREATE INDEX IF NOT EXISTS idx_review_history_key ON review_history(topic_key);
            CREATE INDEX IF NOT EXISTS idx_study_logs_subject ON study_logs(subject);
            "#,
        )?;
        Ok(())
    }

    // Review state operations
    pub fn get_state(&self, key: &TopicKey) -> Result<Option<TopicReviewState>> {
        self.conn
            .query_row(
                r#"
                SELECT review_count, cumulative_correct, cumulative_incorrect, interval_days,
                       last_reviewed, recovering, recovery_streak, recovery_correct,
                       recovery_incorrect
                FROM review_states
                WHERE topic_key = ?1
                "#,
                params![key.to_key_string()],
                |row| state_from_row(row, 0),
            )
            .optional()
    }

    pub fn save_state(&self, key: &TopicKey, state: &TopicReviewState) -> Result<()> {
        write_state(&self.conn, key, state)
    }

    pub fn list_states(&self, subject: Option<&str>) -> Result<Vec<(TopicKey, TopicReviewState)>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT topic_key, review_count, cumulative_correct, cumulative_incorrect, interval_days,
                   last_reviewed, recovering, recovery_streak, recovery_correct, recovery_incorrect
            FROM review_states
            WHERE ?1 IS NULL OR subject = ?1
            ORDER BY subject, topic
            "#,
        )?;

        let rows = stmt.query_map(params![subject], |row| {
            let key: String = row.get(0)?;
            let key = TopicKey::parse(&key).map_err(|e| conversion_error(0, e))?;
            Ok((key, state_from_row(row, 1)?))
        })?;
        rows.collect()
    }

    pub fn list_snapshots(&self, subject: Option<&str>) -> Result<Vec<ReviewSnapshot>> {
        Ok(self
            .list_states(subject)?
            .iter()
            .map(|(k, s)| s.snapshot(k))
            .collect())
    }

    /// Remove `subject` with its review states, history, study logs and goal.
    /// Returns the number of review states removed.
    pub fn delete_subject(&mut self, subject: &str) -> Result<usize> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM study_logs WHERE subject = ?1", params![subject])?;
        tx.execute("DELETE FROM subject_goals WHERE subject = ?1", params![subject])?;
        let removed = tx.execute("DELETE FROM review_states WHERE subject = ?1", params![subject])?;
        tx.commit()?;
        Ok(removed)
    }

    // History operations
    pub fn log_session(&self, outcome: &SessionOutcome, state: &TopicReviewState) -> Result<()> {
        write_history(&self.conn, outcome, state)
    }

    /// Save the new state and its history row in one transaction.
    pub fn record_session(
        &mut self,
        outcome: &SessionOutcome,
        state: &TopicReviewState,
    ) -> Result<()> {
        let tx = self.conn.transaction()?;
        write_state(&tx, &outcome.key, state)?;
        write_history(&tx, outcome, state)?;
        tx.commit()
    }

    pub fn history(&self, key: &TopicKey) -> Result<Vec<HistoryEntry>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT reviewed_on, correct, incorrect, review_count, interval_days, recovering
            FROM review_history
            WHERE topic_key = ?1
            ORDER BY id
            "#,
        )?;

        let rows = stmt.query_map(params![key.to_key_string()], |row| {
            let reviewed_on: String = row.get(0)?;
            Ok(HistoryEntry {
                key: key.clone(),
                reviewed_on: parse_date(0, &reviewed_on)?,
                correct: row.get(1)?,
                incorrect: row.get(2)?,
                review_count: row.get(3)?,
                interval_days: row.get(4)?,
                in_recovery_mode: row.get(5)?,
            })
        })?;
        rows.collect()
    }

    // Study time operations
    pub fn add_study_log(
        &self,
        subject: &str,
        topic: Option<&str>,
        date: NaiveDate,
        duration_secs: u64,
    ) -> Result<i64> {
        self.conn.execute(
            r#"
            INSERT INTO study_logs (subject, topic, studied_on, duration_secs)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![subject, topic, format_date(date), duration_secs as i64],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn list_study_logs(&self, subject: Option<&str>) -> Result<Vec<StudyLog>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, subject, topic, studied_on, duration_secs
            FROM study_logs
            WHERE ?1 IS NULL OR subject = ?1
            ORDER BY studied_on, id
            "#,
        )?;

        let rows = stmt.query_map(params![subject], |row| {
            let studied_on: String = row.get(3)?;
            let secs: i64 = row.get(4)?;
            Ok(StudyLog {
                id: row.get(0)?,
                subject: row.get(1)?,
                topic: row.get(2)?,
                date: parse_date(3, &studied_on)?,
                duration_secs: secs.max(0) as u64,
            })
        })?;
        rows.collect()
    }

    // Goal operations
    pub fn set_goal(&self, subject: &str, weekly_minutes: u32) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO subject_goals (subject, weekly_minutes) VALUES (?1, ?2)
            ON CONFLICT(subject) DO UPDATE SET weekly_minutes = excluded.weekly_minutes
            "#,
            params![subject, weekly_minutes],
        )?;
        Ok(())
    }

    pub fn get_goal(&self, subject: &str) -> Result<Option<u32>> {
        self.conn
            .query_row(
                "SELECT weekly_minutes FROM subject_goals WHERE subject = ?1",
                params![subject],
                |row| row.get(0),
            )
            .optional()
    }

    /// Every subject known from reviews, study logs or goals.
    pub fn list_subjects(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT subject FROM review_states
            UNION SELECT subject FROM study_logs
            UNION SELECT subject FROM subject_goals
            ORDER BY subject
            "#,
        )?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect()
    }
}

impl ReviewRepository for Database {
    fn get(&self, key: &TopicKey) -> crate::error::Result<Option<TopicReviewState>> {
        self.get_state(key)
            .map_err(|e| ScheduleError::Repository(e.to_string()))
    }

    fn save(&mut self, key: &TopicKey, state: &TopicReviewState) -> crate::error::Result<()> {
        self.save_state(key, state)
            .map_err(|e| ScheduleError::Repository(e.to_string()))
    }

    fn save_session(
        &mut self,
        outcome: &SessionOutcome,
        state: &TopicReviewState,
    ) -> crate::error::Result<()> {
        self.record_session(outcome, state)
            .map_err(|e| ScheduleError::Repository(e.to_string()))
    }
}

fn write_state(conn: &Connection, key: &TopicKey, state: &TopicReviewState) -> Result<()> {
    let (recovering, streak, rc, ri) = match state.phase {
        RecoveryPhase::Stable => (false, 0, 0, 0),
        RecoveryPhase::Recovering {
            streak,
            correct,
            incorrect,
        } => (true, streak, correct, incorrect),
    };

    conn.execute(
        r#"
        INSERT INTO review_states (
            topic_key, subject, topic, review_count, cumulative_correct, cumulative_incorrect,
            interval_days, last_reviewed, recovering, recovery_streak, recovery_correct,
            recovery_incorrect, updated_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        ON CONFLICT(topic_key) DO UPDATE SET
            review_count = excluded.review_count,
            cumulative_correct = excluded.cumulative_correct,
            cumulative_incorrect = excluded.cumulative_incorrect,
            interval_days = excluded.interval_days,
            last_reviewed = excluded.last_reviewed,
            recovering = excluded.recovering,
            recovery_streak = excluded.recovery_streak,
            recovery_correct = excluded.recovery_correct,
            recovery_incorrect = excluded.recovery_incorrect,
            updated_at = excluded.updated_at
        "#,
        params![
            key.to_key_string(),
            key.subject,
            key.topic,
            state.review_count,
            state.cumulative_correct as i64,
            state.cumulative_incorrect as i64,
            state.current_interval_days,
            state.last_reviewed.map(format_date),
            recovering,
            streak,
            rc as i64,
            ri as i64,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn write_history(
    conn: &Connection,
    outcome: &SessionOutcome,
    state: &TopicReviewState,
) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO review_history
            (topic_key, reviewed_on, correct, incorrect, review_count, interval_days,
             recovering)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
        params![
            outcome.key.to_key_string(),
            format_date(outcome.date),
            outcome.correct,
            outcome.incorrect,
            state.review_count,
            state.current_interval_days,
            state.in_recovery_mode(),
        ],
    )?;
    Ok(())
}

// Reads the nine state columns starting at `offset`
fn state_from_row(row: &Row<'_>, offset: usize) -> Result<TopicReviewState> {
    let last_reviewed: Option<String> = row.get(offset + 4)?;
    let last_reviewed = match last_reviewed {
        Some(s) => Some(parse_date(offset + 4, &s)?),
        None => None,
    };
    let recovering: bool = row.get(offset + 5)?;
    let phase = if recovering {
        let correct: i64 = row.get(offset + 7)?;
        let incorrect: i64 = row.get(offset + 8)?;
        RecoveryPhase::Recovering {
            streak: row.get(offset + 6)?,
            correct: correct.max(0) as u64,
            incorrect: incorrect.max(0) as u64,
        }
    } else {
        RecoveryPhase::Stable
    };
    let correct: i64 = row.get(offset + 1)?;
    let incorrect: i64 = row.get(offset + 2)?;

    Ok(TopicReviewState {
        review_count: row.get(offset)?,
        cumulative_correct: correct.max(0) as u64,
        cumulative_incorrect: incorrect.max(0) as u64,
        current_interval_days: row.get(offset + 3)?,
        last_reviewed,
        phase,
    })
}

fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn parse_date(idx: usize, s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT).map_err(|e| conversion_error(idx, e))
}

fn conversion_error<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}
