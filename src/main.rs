use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use revise::db::Database;
use revise::models::{JsonOutput, SessionOutcome, TopicKey};
use revise::scorer::{self, SubjectActivity};
use revise::{Scheduler, SchedulerConfig, SessionProcessor};

const DEFAULT_DB_NAME: &str = "revise.db";
const DEFAULT_CONFIG_NAME: &str = "config.toml";

#[derive(Parser)]
#[command(name = "revise")]
#[command(about = "Adaptive spaced-repetition scheduler for study topics")]
#[command(version)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Record a review session for a subject or topic
    Record {
        /// Subject name
        subject: String,

        /// Topic within the subject
        #[arg(long, short)]
        topic: Option<String>,

        /// Questions answered correctly
        #[arg(long, short)]
        correct: u32,

        /// Questions answered incorrectly
        #[arg(long, short)]
        incorrect: u32,

        /// Session date (YYYY-MM-DD), defaults to today
        #[arg(long, short)]
        date: Option<NaiveDate>,
    },

    /// Show the schedule of a subject or topic
    Show {
        subject: String,

        #[arg(long, short)]
        topic: Option<String>,
    },

    /// List tracked topics
    List {
        /// Filter by subject
        #[arg(long, short)]
        subject: Option<String>,
    },

    /// List topics due for review
    Due {
        /// Reference date (YYYY-MM-DD), defaults to today
        #[arg(long, short)]
        date: Option<NaiveDate>,
    },

    /// Pick the next topic to review (stochastic selection)
    Next {
        #[arg(long, short)]
        date: Option<NaiveDate>,
    },

    /// Log study time for a subject
    Study {
        subject: String,

        #[arg(long, short)]
        topic: Option<String>,

        /// Minutes studied
        #[arg(long, short)]
        minutes: u32,

        #[arg(long, short)]
        date: Option<NaiveDate>,
    },

    /// Set the weekly study goal for a subject
    Goal {
        subject: String,

        /// Weekly goal in hours
        #[arg(long)]
        hours: f64,
    },

    /// Score every subject's study health
    Scores {
        #[arg(long, short)]
        date: Option<NaiveDate>,
    },

    /// Delete a subject and all of its review data
    Forget { subject: String },

    /// Replay correct/incorrect tallies through the scheduler without saving
    Simulate {
        /// Session tally as CORRECT/INCORRECT, repeatable
        #[arg(long = "session", short, value_parser = parse_tally, required = true)]
        sessions: Vec<(u32, u32)>,

        /// Date of the first session
        #[arg(long)]
        start: Option<NaiveDate>,
    },
}

fn get_db_path() -> PathBuf {
    if let Ok(path) = std::env::var("REVISE_DB") {
        return PathBuf::from(path);
    }

    let config_dir = app_dir();
    std::fs::create_dir_all(&config_dir).ok();
    config_dir.join(DEFAULT_DB_NAME)
}

fn app_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("revise")
}

fn load_config() -> Result<SchedulerConfig, revise::ConfigError> {
    if let Ok(path) = std::env::var("REVISE_CONFIG") {
        return SchedulerConfig::from_path(path);
    }

    let path = app_dir().join(DEFAULT_CONFIG_NAME);
    if path.exists() {
        SchedulerConfig::from_path(path)
    } else {
        Ok(SchedulerConfig::default())
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("revise=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let scheduler = Scheduler::new(config);
    let today = Local::now().date_naive();

    let db_path = get_db_path();
    let mut db = Database::open(&db_path)?;
    db.init()?;
    tracing::debug!(path = %db_path.display(), "database opened");

    match cli.command {
        Commands::Init => {
            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::<()>::ok(()))?);
            } else {
                println!("Database initialized at: {}", db_path.display());
            }
        }

        Commands::Record {
            subject,
            topic,
            correct,
            incorrect,
            date,
        } => {
            let key = TopicKey::new(subject, topic)?;
            let date = date.unwrap_or(today);
            let outcome = SessionOutcome::new(key.clone(), correct, incorrect, date);

            let mut processor = SessionProcessor::new(scheduler, db);
            let state = processor.record(&outcome)?;
            let snapshot = state.snapshot(&key);

            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&snapshot))?);
            } else {
                println!("Session recorded for {}.", key);
                println!(
                    "Review count: {} ({:.0}% cumulative accuracy)",
                    snapshot.review_count,
                    snapshot.cumulative_accuracy * 100.0
                );
                print_interval(&snapshot);
            }
        }

        Commands::Show { subject, topic } => {
            let key = TopicKey::new(subject, topic)?;
            let processor = SessionProcessor::new(scheduler, db);
            let snapshot = processor.snapshot(&key)?;
            let history = processor.repository().history(&key)?;

            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string(&JsonOutput::ok(serde_json::json!({
                        "state": snapshot,
                        "history": history
                    })))?
                );
            } else {
                println!("Topic: {}", key);
                println!("Review count: {}", snapshot.review_count);
                println!(
                    "Answers: {} correct, {} incorrect ({:.0}%)",
                    snapshot.cumulative_correct,
                    snapshot.cumulative_incorrect,
                    snapshot.cumulative_accuracy * 100.0
                );
                if let Some(last) = snapshot.last_reviewed {
                    println!("Last reviewed: {}", last);
                }
                print_interval(&snapshot);

                if !history.is_empty() {
                    println!();
                    println!("--- History ---");
                    println!(
                        "{:<12} {:>7} {:>9} {:>6} {:>9}",
                        "DATE", "CORRECT", "INCORRECT", "LEVEL", "INTERVAL"
                    );
                    for h in history {
                        println!(
                            "{:<12} {:>7} {:>9} {:>6} {:>8}d{}",
                            h.reviewed_on.to_string(),
                            h.correct,
                            h.incorrect,
                            h.review_count,
                            h.interval_days,
                            if h.in_recovery_mode { " (recovery)" } else { "" }
                        );
                    }
                }
            }
        }

        Commands::List { subject } => {
            let snapshots = db.list_snapshots(subject.as_deref())?;
            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&snapshots))?);
            } else if snapshots.is_empty() {
                println!("No topics found.");
            } else {
                println!("{:<40} {:>6} {:>9} {:>12}", "TOPIC", "LEVEL", "INTERVAL", "NEXT");
                println!("{}", "-".repeat(70));
                for s in snapshots {
                    println!(
                        "{:<40} {:>6} {:>8}d {:>12}",
                        truncate(&s.key.to_string(), 38),
                        s.review_count,
                        s.current_interval_days,
                        s.next_review.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string())
                    );
                }
            }
        }

        Commands::Due { date } => {
            let as_of = date.unwrap_or(today);
            let due = scorer::due_topics(&db.list_snapshots(None)?, as_of);
            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&due))?);
            } else if due.is_empty() {
                println!("Nothing due on {}.", as_of);
            } else {
                println!("{:<40} {:>8} {:>6}", "TOPIC", "OVERDUE", "LEVEL");
                println!("{}", "-".repeat(56));
                for s in due {
                    println!(
                        "{:<40} {:>7}d {:>6}{}",
                        truncate(&s.key.to_string(), 38),
                        s.days_overdue(as_of),
                        s.review_count,
                        if s.in_recovery_mode { " (recovery)" } else { "" }
                    );
                }
            }
        }

        Commands::Next { date } => {
            let as_of = date.unwrap_or(today);
            let snapshots = db.list_snapshots(None)?;
            let mut rng = rand::thread_rng();

            match scorer::pick_next_topic(&snapshots, as_of, &mut rng) {
                Some(s) => {
                    if cli.json {
                        println!("{}", serde_json::to_string(&JsonOutput::ok(&s))?);
                    } else {
                        println!("=== Next Topic to Review ===");
                        println!();
                        println!("Topic: {}", s.key);
                        println!(
                            "Review count: {} ({:.0}% accuracy)",
                            s.review_count,
                            s.cumulative_accuracy * 100.0
                        );
                        if s.in_recovery_mode {
                            println!("Recovering: {} strong session(s) so far", s.recovery_streak);
                        }
                        println!();
                        println!("After reviewing, record the result with:");
                        let topic_arg = s
                            .key
                            .topic
                            .as_ref()
                            .map(|t| format!(" --topic \"{}\"", t))
                            .unwrap_or_default();
                        println!(
                            "  revise record \"{}\"{} --correct <N> --incorrect <M>",
                            s.key.subject, topic_arg
                        );
                    }
                }
                None => {
                    if cli.json {
                        println!("{}", serde_json::to_string(&JsonOutput::<()>::ok(()))?);
                    } else {
                        println!("Nothing due for review.");
                    }
                }
            }
        }

        Commands::Study {
            subject,
            topic,
            minutes,
            date,
        } => {
            // validates the labels the same way review keys are
            TopicKey::new(subject.as_str(), topic.as_deref())?;
            let date = date.unwrap_or(today);
            let id = db.add_study_log(&subject, topic.as_deref(), date, minutes as u64 * 60)?;

            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string(&JsonOutput::ok(serde_json::json!({ "id": id })))?
                );
            } else {
                println!("Logged {} min of {} on {}.", minutes, subject, date);
            }
        }

        Commands::Goal { subject, hours } => {
            let minutes = goal_minutes(&subject, hours)?;
            db.set_goal(&subject, minutes)?;

            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::<()>::ok(()))?);
            } else {
                println!("Weekly goal for {} set to {} min.", subject, minutes);
            }
        }

        Commands::Scores { date } => {
            let as_of = date.unwrap_or(today);
            let logs = db.list_study_logs(None)?;
            let snapshots = db.list_snapshots(None)?;

            let mut activities = Vec::new();
            for subject in db.list_subjects()? {
                let goal = db.get_goal(&subject)?.unwrap_or(0);
                activities.push(SubjectActivity::collect(&subject, &logs, &snapshots, goal, as_of));
            }
            let scores = scorer::rank_subjects(&activities, as_of);
            let streak = scorer::study_streak(
                logs.iter()
                    .map(|l| l.date)
                    .chain(snapshots.iter().filter_map(|s| s.last_reviewed)),
                as_of,
            );

            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string(&JsonOutput::ok(serde_json::json!({
                        "streak": streak,
                        "subjects": scores
                    })))?
                );
            } else if scores.is_empty() {
                println!("No subjects found.");
            } else {
                println!("Study streak: {} day(s)", streak);
                println!();
                println!(
                    "{:<30} {:>7} {:>6} {:>7} {:>11}  STATUS",
                    "SUBJECT", "OVERALL", "FOCUS", "REVIEW", "CONSISTENCY"
                );
                println!("{}", "-".repeat(78));
                for s in scores {
                    println!(
                        "{:<30} {:>7} {:>6} {:>7} {:>11}  {}{}",
                        truncate(&s.subject, 28),
                        s.overall,
                        s.focus,
                        s.review,
                        s.consistency,
                        s.band.label(),
                        if s.needs_attention { " *" } else { "" }
                    );
                }
            }
        }

        Commands::Forget { subject } => {
            let removed = db.delete_subject(&subject)?;
            if cli.json {
                let output = JsonOutput::ok(serde_json::json!({ "removed": removed }));
                println!("{}", serde_json::to_string(&output)?);
            } else {
                println!("Removed {} topic(s) of {}.", removed, subject);
            }
        }

        Commands::Simulate { sessions, start } => {
            simulate(&scheduler, &sessions, start.unwrap_or(today), cli.json)?;
        }
    }

    Ok(())
}

fn simulate(
    scheduler: &Scheduler,
    sessions: &[(u32, u32)],
    start: NaiveDate,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let key = TopicKey::subject("simulation")?;
    let (_, trace) = scheduler.simulate(&key, sessions, start)?;

    if json {
        println!("{}", serde_json::to_string(&JsonOutput::ok(&trace))?);
        return Ok(());
    }

    println!(
        "{:>7} {:<12} {:>9} {:>9} {:>9} {:>6} {:>9}",
        "SESSION", "DATE", "TALLY", "SESSION%", "TOTAL%", "LEVEL", "INTERVAL"
    );
    println!("{}", "-".repeat(70));
    for row in trace {
        println!(
            "{:>7} {:<12} {:>9} {:>8.0}% {:>8.1}% {:>6} {:>8}d{}",
            row.session_number,
            row.date.to_string(),
            format!("{}/{}", row.correct, row.incorrect),
            row.session_accuracy * 100.0,
            row.cumulative_accuracy * 100.0,
            row.review_count,
            row.interval_days,
            if row.in_recovery_mode { " (recovery)" } else { "" }
        );
    }
    Ok(())
}

fn print_interval(snapshot: &revise::ReviewSnapshot) {
    println!("Interval: {} day(s)", snapshot.current_interval_days);
    if let Some(next) = snapshot.next_review {
        println!("Next review: {}", next);
    }
    if snapshot.in_recovery_mode {
        println!(
            "Recovery mode: {} consecutive strong session(s)",
            snapshot.recovery_streak
        );
    }
}

fn goal_minutes(subject: &str, hours: f64) -> Result<u32, Box<dyn std::error::Error>> {
    TopicKey::subject(subject)?;
    if !hours.is_finite() || hours < 0.0 {
        return Err(format!("Invalid goal '{}'. Hours must be zero or more", hours).into());
    }
    Ok((hours * 60.0).round() as u32)
}

fn parse_tally(s: &str) -> Result<(u32, u32), String> {
    let (correct, incorrect) = s
        .split_once('/')
        .ok_or_else(|| format!("Invalid session '{}'. Use CORRECT/INCORRECT, e.g. 9/1", s))?;
    let correct = correct
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("Invalid correct count in '{}'", s))?;
    let incorrect = incorrect
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("Invalid incorrect count in '{}'", s))?;
    Ok((correct, incorrect))
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod truncate_tests {
        use super::*;

        #[test]
        fn truncate_short_string() {
            assert_eq!(truncate("hello", 10), "hello");
        }

        #[test]
        fn truncate_exact_length() {
            assert_eq!(truncate("hello", 5), "hello");
        }

        #[test]
        fn truncate_long_string() {
            assert_eq!(truncate("hello world", 8), "hello...");
        }

        #[test]
        fn truncate_multibyte_string() {
            assert_eq!(truncate("Matemática / Função", 10), "Matemát...");
        }
    }

    mod goal_tests {
        use super::*;

        #[test]
        fn converts_hours_to_minutes() {
            assert_eq!(goal_minutes("Math", 2.5).unwrap(), 150);
            assert_eq!(goal_minutes("Math", 0.0).unwrap(), 0);
        }

        #[test]
        fn rejects_invalid_subject() {
            assert!(goal_minutes("", 1.0).is_err());
            assert!(goal_minutes("Math::Algebra", 1.0).is_err());
        }

        #[test]
        fn rejects_negative_or_non_finite_hours() {
            assert!(goal_minutes("Math", -1.0).is_err());
            assert!(goal_minutes("Math", f64::NAN).is_err());
            assert!(goal_minutes("Math", f64::INFINITY).is_err());
        }
    }

    mod tally_tests {
        use super::*;

        #[test]
        fn parses_tally() {
            assert_eq!(parse_tally("9/1"), Ok((9, 1)));
            assert_eq!(parse_tally(" 0 / 10 "), Ok((0, 10)));
        }

        #[test]
        fn rejects_malformed_tally() {
            assert!(parse_tally("9").is_err());
            assert!(parse_tally("a/1").is_err());
            assert!(parse_tally("9/-1").is_err());
        }
    }

    mod cli_parsing_tests {
        use super::*;

        #[test]
        fn parse_init_with_json() {
            let cli = Cli::try_parse_from(["revise", "--json", "init"]).unwrap();
            assert!(cli.json);
            assert!(matches!(cli.command, Commands::Init));
        }

        #[test]
        fn parse_record_full() {
            let cli = Cli::try_parse_from([
                "revise",
                "record",
                "Matemática",
                "--topic",
                "Função",
                "--correct",
                "7",
                "--incorrect",
                "3",
                "--date",
                "2024-03-01",
            ])
            .unwrap();
            match cli.command {
                Commands::Record {
                    subject,
                    topic,
                    correct,
                    incorrect,
                    date,
                } => {
                    assert_eq!(subject, "Matemática");
                    assert_eq!(topic, Some("Função".to_string()));
                    assert_eq!(correct, 7);
                    assert_eq!(incorrect, 3);
                    assert_eq!(date, NaiveDate::from_ymd_opt(2024, 3, 1));
                }
                _ => panic!("Expected Record command"),
            }
        }

        #[test]
        fn parse_record_requires_tally() {
            assert!(Cli::try_parse_from(["revise", "record", "Math", "--correct", "3"]).is_err());
        }

        #[test]
        fn parse_record_rejects_negative_counts() {
            assert!(Cli::try_parse_from([
                "revise", "record", "Math", "-c", "-1", "-i", "3"
            ])
            .is_err());
        }

        #[test]
        fn parse_record_rejects_bad_date() {
            assert!(Cli::try_parse_from([
                "revise", "record", "Math", "-c", "1", "-i", "3", "-d", "03/01/2024"
            ])
            .is_err());
        }

        #[test]
        fn parse_simulate_sessions() {
            let cli = Cli::try_parse_from(["revise", "simulate", "-s", "9/1", "--session", "1/9"])
                .unwrap();
            match cli.command {
                Commands::Simulate { sessions, start } => {
                    assert_eq!(sessions, vec![(9, 1), (1, 9)]);
                    assert!(start.is_none());
                }
                _ => panic!("Expected Simulate command"),
            }
        }

        #[test]
        fn parse_simulate_requires_sessions() {
            assert!(Cli::try_parse_from(["revise", "simulate"]).is_err());
        }

        #[test]
        fn parse_goal_hours() {
            let cli = Cli::try_parse_from(["revise", "goal", "Math", "--hours", "2.5"]).unwrap();
            match cli.command {
                Commands::Goal { subject, hours } => {
                    assert_eq!(subject, "Math");
                    assert_eq!(hours, 2.5);
                }
                _ => panic!("Expected Goal command"),
            }
        }

        #[test]
        fn parse_study_minutes() {
            let cli = Cli::try_parse_from(["revise", "study", "Math", "-m", "25", "-t", "Algebra"])
                .unwrap();
            match cli.command {
                Commands::Study {
                    subject,
                    topic,
                    minutes,
                    date,
                } => {
                    assert_eq!(subject, "Math");
                    assert_eq!(topic.as_deref(), Some("Algebra"));
                    assert_eq!(minutes, 25);
                    assert!(date.is_none());
                }
                _ => panic!("Expected Study command"),
            }
        }

        #[test]
        fn parse_due_and_scores_with_date() {
            let cli = Cli::try_parse_from(["revise", "due", "--date", "2024-06-15"]).unwrap();
            assert!(matches!(cli.command, Commands::Due { date: Some(_) }));
            let cli = Cli::try_parse_from(["revise", "--json", "scores"]).unwrap();
            assert!(cli.json);
            assert!(matches!(cli.command, Commands::Scores { date: None }));
        }

        #[test]
        fn parse_forget() {
            let cli = Cli::try_parse_from(["revise", "forget", "History"]).unwrap();
            match cli.command {
                Commands::Forget { subject } => assert_eq!(subject, "History"),
                _ => panic!("Expected Forget command"),
            }
        }
    }
}
