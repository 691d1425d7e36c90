mod aggregate;
mod db;
mod error;
mod models;
mod phase;
mod queue;
mod recommend;
mod scheduler;
mod scoring;

use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use db::Database;
use error::EngineError;
use models::{ActivityType, Difficulty, JsonOutput, OwnerKind};
use phase::StudyStage;
use queue::Bucket;

const DEFAULT_DB_NAME: &str = "scholar.db";

#[derive(Parser)]
#[command(name = "scholar")]
#[command(about = "Track study progress, phases and spaced-repetition reviews")]
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

    /// Manage subjects
    #[command(subcommand)]
    Subject(SubjectCommands),

    /// Manage topics within a subject
    #[command(subcommand)]
    Topic(TopicCommands),

    /// Manage concepts within a topic
    #[command(subcommand)]
    Concept(ConceptCommands),

    /// Log a study session against a topic or concept
    Log {
        /// Owner kind: topic or concept
        owner: String,

        /// Owner ID
        id: i64,

        /// Activity: video/book/recall/mindmap/questions/teaching/study/practice
        #[arg(long, short)]
        activity: String,

        /// Session length in minutes
        #[arg(long, short)]
        minutes: i64,

        /// Difficulty: easy/medium/hard
        #[arg(long, short, default_value = "medium")]
        difficulty: String,

        /// Self-rating 1-5
        #[arg(long, short)]
        rating: Option<i64>,

        /// Session notes
        #[arg(long, short)]
        notes: Option<String>,
    },

    /// Manage logged sessions
    #[command(subcommand)]
    Session(SessionCommands),

    /// Record a spaced-repetition review (rating 1-5)
    Review {
        /// Owner kind: topic or concept
        owner: String,

        /// Owner ID
        id: i64,

        /// Recall rating 1-5
        #[arg(long, short)]
        rating: i64,

        /// Review date (RFC 3339), defaults to now
        #[arg(long, short)]
        date: Option<String>,

        /// Notes about the review
        #[arg(long, short)]
        notes: Option<String>,
    },

    /// Show the review queue
    Queue {
        /// Filter by bucket: overdue/today/upcoming
        #[arg(long, short)]
        bucket: Option<String>,

        /// Filter by name substring
        #[arg(long, short)]
        search: Option<String>,
    },

    /// Pick the next item to review (stochastic, weighted)
    Next,

    /// Recommend the next study activity for a concept
    Recommend {
        /// Concept ID
        id: i64,
    },

    /// List concepts with weak-area flags
    Weak,

    /// Manage subject-level study framework stages
    #[command(subcommand)]
    Stage(StageCommands),

    /// Show overall statistics
    Stats,
}

#[derive(Subcommand)]
enum SubjectCommands {
    /// Add a new subject
    Add {
        /// Subject name
        name: String,

        /// Subject description
        #[arg(long, short)]
        description: Option<String>,
    },

    /// List all subjects
    List,

    /// Show subject details
    Show {
        /// Subject ID
        id: i64,
    },

    /// Delete a subject and everything under it
    Delete {
        /// Subject ID
        id: i64,
    },
}

#[derive(Subcommand)]
enum TopicCommands {
    /// Add a new topic
    Add {
        /// Parent subject ID
        subject_id: i64,

        /// Topic name
        name: String,

        /// Topic description
        #[arg(long, short)]
        description: Option<String>,

        /// Habit-based topic (sessions and reviews attach directly)
        #[arg(long)]
        habit: bool,
    },

    /// List topics in a subject
    List {
        /// Subject ID
        subject_id: i64,
    },

    /// Show topic details
    Show {
        /// Topic ID
        id: i64,
    },

    /// Delete a topic and its concepts
    Delete {
        /// Topic ID
        id: i64,
    },
}

#[derive(Subcommand)]
enum ConceptCommands {
    /// Add a new concept
    Add {
        /// Parent topic ID
        topic_id: i64,

        /// Concept name
        name: String,

        /// Concept description
        #[arg(long, short)]
        description: Option<String>,
    },

    /// List concepts in a topic
    List {
        /// Topic ID
        topic_id: i64,
    },

    /// Show concept details, phase and checklist
    Show {
        /// Concept ID
        id: i64,
    },

    /// Mark a phase activity complete without logging a session
    Check {
        /// Concept ID
        id: i64,

        /// Activity name
        activity: String,

        /// Notes
        #[arg(long, short)]
        notes: Option<String>,
    },

    /// Delete a concept
    Delete {
        /// Concept ID
        id: i64,
    },
}

#[derive(Subcommand)]
enum SessionCommands {
    /// List sessions for a topic or concept
    List {
        /// Owner kind: topic or concept
        owner: String,

        /// Owner ID
        id: i64,
    },

    /// Edit a session; omitted fields keep their current value
    Edit {
        /// Session ID
        id: i64,

        #[arg(long, short)]
        activity: Option<String>,

        #[arg(long, short)]
        minutes: Option<i64>,

        #[arg(long, short)]
        difficulty: Option<String>,

        #[arg(long, short)]
        rating: Option<i64>,

        /// New notes; pass an empty string to clear them
        #[arg(long, short)]
        notes: Option<String>,
    },

    /// Delete a session and reverse its contribution
    Delete {
        /// Session ID
        id: i64,
    },
}

#[derive(Subcommand)]
enum StageCommands {
    /// Set a stage's progress (0-100)
    Set {
        /// Subject ID
        subject_id: i64,

        /// Stage: learn_recall/testing_effect/reflection_diagnosis/integration/teaching
        stage: String,

        /// Progress percentage
        progress: f64,
    },

    /// Show all stages for a subject
    Show {
        /// Subject ID
        subject_id: i64,
    },
}

fn get_db_path() -> PathBuf {
    if let Ok(path) = std::env::var("SCHOLAR_DB") {
        return PathBuf::from(path);
    }

    let config_dir = dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("scholar");

    std::fs::create_dir_all(&config_dir).ok();
    config_dir.join(DEFAULT_DB_NAME)
}

fn parse_owner(s: &str) -> Result<OwnerKind, String> {
    OwnerKind::from_str(s).ok_or_else(|| format!("Invalid owner '{}'. Use: topic or concept", s))
}

fn parse_activity(s: &str) -> Result<ActivityType, EngineError> {
    ActivityType::from_str(s).ok_or_else(|| EngineError::UnknownActivityType(s.to_string()))
}

fn parse_difficulty(s: &str) -> Result<Difficulty, String> {
    Difficulty::from_str(s).ok_or_else(|| format!("Invalid difficulty '{}'. Use: easy, medium or hard", s))
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let db_path = get_db_path();
    let db = Database::open(&db_path)?;

    match cli.command {
        Commands::Init => {
            db.init()?;
            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::<()>::ok(()))?);
            } else {
                println!("Database initialized at: {}", db_path.display());
            }
        }

        Commands::Subject(cmd) => match cmd {
            SubjectCommands::Add { name, description } => {
                let id = db.add_subject(&name, description.as_deref())?;
                if cli.json {
                    println!(
                        "{}",
                        serde_json::to_string(&JsonOutput::ok(serde_json::json!({
                            "id": id,
                            "name": name
                        })))?
                    );
                } else {
                    println!("Added subject '{}' with ID: {}", name, id);
                }
            }

            SubjectCommands::List => {
                let subjects = db.list_subjects()?;
                if cli.json {
                    println!("{}", serde_json::to_string(&JsonOutput::ok(&subjects))?);
                } else if subjects.is_empty() {
                    println!("No subjects found.");
                } else {
                    println!(
                        "{:<5} {:<30} {:>8} {:>9} {:>8}",
                        "ID", "NAME", "XP", "MASTERY", "TOPICS"
                    );
                    println!("{}", "-".repeat(65));
                    for subject in subjects {
                        println!(
                            "{:<5} {:<30} {:>8} {:>8.1}% {:>4}/{}",
                            subject.id,
                            truncate(&subject.name, 28),
                            subject.total_xp,
                            subject.average_mastery,
                            subject.completed_topics,
                            subject.total_topics,
                        );
                    }
                }
            }

            SubjectCommands::Show { id } => {
                if let Some(subject) = db.get_subject(id)? {
                    let topics = db.list_topics(id)?;
                    if cli.json {
                        println!(
                            "{}",
                            serde_json::to_string(&JsonOutput::ok(serde_json::json!({
                                "subject": subject,
                                "topics": topics
                            })))?
                        );
                    } else {
                        println!("Subject: {}", subject.name);
                        println!("ID: {}", subject.id);
                        if let Some(desc) = &subject.description {
                            println!("Description: {}", desc);
                        }
                        println!("Total XP: {}", subject.total_xp);
                        println!("Average mastery: {:.1}%", subject.average_mastery);
                        println!(
                            "Completed topics: {}/{}",
                            subject.completed_topics, subject.total_topics
                        );
                        if let Some(last) = &subject.last_studied {
                            println!("Last studied: {}", last);
                        }
                        if !topics.is_empty() {
                            println!();
                            println!("--- Topics ---");
                            for topic in topics {
                                println!(
                                    "{:<5} {:<30} {:.1}% ({})",
                                    topic.id,
                                    truncate(&topic.name, 28),
                                    topic.mastery,
                                    topic.mastery_label(),
                                );
                            }
                        }
                    }
                } else {
                    not_found(cli.json, "Subject")?;
                }
            }

            SubjectCommands::Delete { id } => {
                if db.delete_subject(id)? {
                    deleted(cli.json, "Subject", id)?;
                } else {
                    not_found(cli.json, "Subject")?;
                }
            }
        },

        Commands::Topic(cmd) => match cmd {
            TopicCommands::Add {
                subject_id,
                name,
                description,
                habit,
            } => {
                let id = db.add_topic(subject_id, &name, description.as_deref(), habit)?;
                if cli.json {
                    println!(
                        "{}",
                        serde_json::to_string(&JsonOutput::ok(serde_json::json!({
                            "id": id,
                            "name": name
                        })))?
                    );
                } else {
                    println!("Added topic '{}' with ID: {}", name, id);
                }
            }

            TopicCommands::List { subject_id } => {
                let topics = db.list_topics(subject_id)?;
                if cli.json {
                    println!("{}", serde_json::to_string(&JsonOutput::ok(&topics))?);
                } else if topics.is_empty() {
                    println!("No topics found.");
                } else {
                    println!(
                        "{:<5} {:<30} {:>8} {:>9} {:>8}",
                        "ID", "NAME", "XP", "MASTERY", "MINUTES"
                    );
                    println!("{}", "-".repeat(65));
                    for topic in topics {
                        println!(
                            "{:<5} {:<30} {:>8} {:>8.1}% {:>8}",
                            topic.id,
                            truncate(&topic.name, 28),
                            topic.xp,
                            topic.mastery,
                            topic.study_minutes,
                        );
                    }
                }
            }

            TopicCommands::Show { id } => {
                if let Some(topic) = db.get_topic(id)? {
                    let concepts = db.list_concepts(id)?;
                    if cli.json {
                        println!(
                            "{}",
                            serde_json::to_string(&JsonOutput::ok(serde_json::json!({
                                "topic": topic,
                                "concepts": concepts
                            })))?
                        );
                    } else {
                        println!("Topic: {}", topic.name);
                        println!("ID: {}", topic.id);
                        if let Some(desc) = &topic.description {
                            println!("Description: {}", desc);
                        }
                        println!("Mastery: {:.1}% ({})", topic.mastery, topic.mastery_label());
                        if topic.is_completed() {
                            println!("Completed");
                        }
                        println!("XP: {}", topic.xp);
                        println!("Study time: {} minutes", topic.study_minutes);
                        if topic.habit {
                            println!("Habit-based topic");
                        }
                        if let Some(next) = &topic.next_review {
                            println!("Next review: {}", next);
                        }
                        if !concepts.is_empty() {
                            println!();
                            println!("--- Concepts ---");
                            for concept in concepts {
                                println!(
                                    "{:<5} {:<30} {:.1}% [{}]",
                                    concept.id,
                                    truncate(&concept.name, 28),
                                    concept.mastery,
                                    concept.phase.label(),
                                );
                            }
                        }
                    }
                } else {
                    not_found(cli.json, "Topic")?;
                }
            }

            TopicCommands::Delete { id } => {
                if db.delete_topic(id)? {
                    deleted(cli.json, "Topic", id)?;
                } else {
                    not_found(cli.json, "Topic")?;
                }
            }
        },

        Commands::Concept(cmd) => match cmd {
            ConceptCommands::Add {
                topic_id,
                name,
                description,
            } => {
                let id = db.add_concept(topic_id, &name, description.as_deref())?;
                if cli.json {
                    println!(
                        "{}",
                        serde_json::to_string(&JsonOutput::ok(serde_json::json!({
                            "id": id,
                            "name": name
                        })))?
                    );
                } else {
                    println!("Added concept '{}' with ID: {}", name, id);
                }
            }

            ConceptCommands::List { topic_id } => {
                let concepts = db.list_concepts(topic_id)?;
                if cli.json {
                    println!("{}", serde_json::to_string(&JsonOutput::ok(&concepts))?);
                } else if concepts.is_empty() {
                    println!("No concepts found.");
                } else {
                    println!(
                        "{:<5} {:<30} {:>9} {:<15}",
                        "ID", "NAME", "MASTERY", "PHASE"
                    );
                    println!("{}", "-".repeat(65));
                    for concept in concepts {
                        println!(
                            "{:<5} {:<30} {:>8.1}% {}",
                            concept.id,
                            truncate(&concept.name, 28),
                            concept.mastery,
                            concept.phase.label(),
                        );
                    }
                }
            }

            ConceptCommands::Show { id } => {
                if let Some(concept) = db.get_concept(id)? {
                    let checklist = db.get_checklist(id, concept.phase)?;
                    if cli.json {
                        println!(
                            "{}",
                            serde_json::to_string(&JsonOutput::ok(serde_json::json!({
                                "concept": concept,
                                "checklist": checklist
                            })))?
                        );
                    } else {
                        println!("Concept: {}", concept.name);
                        println!("ID: {}", concept.id);
                        if let Some(desc) = &concept.description {
                            println!("Description: {}", desc);
                        }
                        println!(
                            "Mastery: {:.1}% ({})",
                            concept.mastery,
                            concept.mastery_label()
                        );
                        println!("XP: {}", concept.xp);
                        let position = phase::Phase::ORDER
                            .iter()
                            .position(|p| *p == concept.phase)
                            .map(|i| i + 1)
                            .unwrap_or(0);
                        println!(
                            "Phase: {} ({}/{})",
                            concept.phase.label(),
                            position,
                            phase::Phase::ORDER.len()
                        );
                        if let Some(next) = &concept.next_review {
                            println!("Next review: {}", next);
                        }
                        println!();
                        println!("--- {} checklist ---", concept.phase.label());
                        for slot in checklist {
                            let mark = if slot.completed { "x" } else { " " };
                            println!("[{}] {}", mark, slot.activity.label());
                        }
                    }
                } else {
                    not_found(cli.json, "Concept")?;
                }
            }

            ConceptCommands::Check {
                id,
                activity,
                notes,
            } => {
                let advanced = db.complete_phase_activity(id, &activity, notes.as_deref(), Utc::now())?;
                if cli.json {
                    println!(
                        "{}",
                        serde_json::to_string(&JsonOutput::ok(serde_json::json!({
                            "advanced_to": advanced.map(|p| p.as_str())
                        })))?
                    );
                } else {
                    println!("Marked '{}' complete for concept {}.", activity, id);
                    if let Some(next) = advanced {
                        println!("Phase advanced to: {}", next.label());
                    }
                }
            }

            ConceptCommands::Delete { id } => {
                if db.delete_concept(id)? {
                    deleted(cli.json, "Concept", id)?;
                } else {
                    not_found(cli.json, "Concept")?;
                }
            }
        },

        Commands::Log {
            owner,
            id,
            activity,
            minutes,
            difficulty,
            rating,
            notes,
        } => {
            let owner_kind = parse_owner(&owner)?;
            let activity = parse_activity(&activity)?;
            let difficulty = parse_difficulty(&difficulty)?;

            let session = db.log_session(
                owner_kind,
                id,
                activity,
                difficulty,
                minutes,
                rating,
                notes.as_deref(),
                Utc::now(),
            )?;

            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&session))?);
            } else {
                println!(
                    "Logged {} min of {} ({}): +{} XP, +{:.1} mastery",
                    session.duration_minutes,
                    session.activity.as_str(),
                    session.difficulty.as_str(),
                    session.xp_gained,
                    session.mastery_gained,
                );
            }
        }

        Commands::Session(cmd) => match cmd {
            SessionCommands::List { owner, id } => {
                let owner_kind = parse_owner(&owner)?;
                let sessions = db.list_sessions(owner_kind, id)?;
                if cli.json {
                    println!("{}", serde_json::to_string(&JsonOutput::ok(&sessions))?);
                } else if sessions.is_empty() {
                    println!("No sessions found.");
                } else {
                    println!(
                        "{:<5} {:<12} {:<10} {:>8} {:>6}",
                        "ID", "ACTIVITY", "DIFFICULTY", "MINUTES", "XP"
                    );
                    println!("{}", "-".repeat(50));
                    for session in sessions {
                        println!(
                            "{:<5} {:<12} {:<10} {:>8} {:>6}",
                            session.id,
                            session.activity.as_str(),
                            session.difficulty.as_str(),
                            session.duration_minutes,
                            session.xp_gained,
                        );
                    }
                }
            }

            SessionCommands::Edit {
                id,
                activity,
                minutes,
                difficulty,
                rating,
                notes,
            } => {
                let old = db
                    .get_session(id)?
                    .ok_or(EngineError::EntityNotFound { kind: "session", id })?;

                let activity = match activity {
                    Some(s) => parse_activity(&s)?,
                    None => old.activity,
                };
                let difficulty = match difficulty {
                    Some(s) => parse_difficulty(&s)?,
                    None => old.difficulty,
                };
                let minutes = minutes.unwrap_or(old.duration_minutes);
                let rating = rating.or(old.rating);
                let notes = merge_notes(notes, old.notes);

                let session =
                    db.edit_session(id, activity, difficulty, minutes, rating, notes.as_deref())?;
                if cli.json {
                    println!("{}", serde_json::to_string(&JsonOutput::ok(&session))?);
                } else {
                    println!(
                        "Session {} updated: +{} XP, +{:.1} mastery",
                        session.id, session.xp_gained, session.mastery_gained
                    );
                }
            }

            SessionCommands::Delete { id } => {
                if db.delete_session(id)? {
                    deleted(cli.json, "Session", id)?;
                } else {
                    not_found(cli.json, "Session")?;
                }
            }
        },

        Commands::Review {
            owner,
            id,
            rating,
            date,
            notes,
        } => {
            let owner_kind = parse_owner(&owner)?;
            let reviewed_at = match date.as_deref() {
                Some(d) => scheduler::parse_review_date(d)?,
                None => Utc::now(),
            };
            let scheduled =
                db.record_review(owner_kind, id, rating, notes.as_deref(), reviewed_at)?;

            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&scheduled))?);
            } else {
                println!("Review recorded for {} {}.", owner_kind.as_str(), id);
                println!(
                    "Next review in {} day(s): {}",
                    scheduled.interval_days,
                    scheduled.next_review.format("%Y-%m-%d"),
                );
            }
        }

        Commands::Queue { bucket, search } => {
            let bucket = match bucket.as_deref() {
                Some(s) => Some(Bucket::from_str(s).ok_or_else(|| {
                    format!("Invalid bucket '{}'. Use: overdue, today or upcoming", s)
                })?),
                None => None,
            };
            let report = db.review_queue(bucket, search.as_deref(), Utc::now())?;

            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&report))?);
            } else if report.items.is_empty() {
                println!("Nothing in the review queue.");
            } else {
                println!(
                    "Overdue: {}  Today: {}  Upcoming: {}  Completion: {:.0}%",
                    report.counts.overdue,
                    report.counts.today,
                    report.counts.upcoming,
                    report.completion_rate,
                );
                println!();
                println!("{:<8} {:<5} {:<30} {:<9} DUE", "KIND", "ID", "NAME", "BUCKET");
                println!("{}", "-".repeat(80));
                let now = Utc::now();
                for item in report.items {
                    let bucket = queue::bucket_of(&item, now)
                        .map(|b| b.as_str())
                        .unwrap_or("-");
                    let due = item.due.as_deref().unwrap_or("-");
                    println!(
                        "{:<8} {:<5} {:<30} {:<9} {}",
                        item.owner_kind.as_str(),
                        item.owner_id,
                        truncate(&item.name, 28),
                        bucket,
                        due,
                    );
                }
            }
        }

        Commands::Next => {
            if let Some(item) = db.next_due(Utc::now())? {
                if cli.json {
                    println!("{}", serde_json::to_string(&JsonOutput::ok(&item))?);
                } else {
                    println!("=== Next Item to Review ===");
                    println!();
                    println!("{}: {} (ID: {})", item.owner_kind.as_str(), item.name, item.owner_id);
                    if let Some(due) = &item.due {
                        println!("Due: {}", due);
                    }
                    println!();
                    println!("After reviewing, record the outcome with:");
                    println!(
                        "  scholar review {} {} --rating <1-5>",
                        item.owner_kind.as_str(),
                        item.owner_id
                    );
                }
            } else if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::<()>::ok(()))?);
            } else {
                println!("Nothing due for review.");
            }
        }

        Commands::Recommend { id } => {
            let rec = db.recommend_for(id, Utc::now())?;
            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&rec))?);
            } else {
                println!("=== Recommended Next Activity ===");
                println!();
                println!("Activity: {}", rec.activity.label());
                println!("Priority: {}", rec.priority.as_str());
                println!("Estimated time: {} minutes", rec.estimated_minutes);
                println!();
                println!("{}", rec.reason);
            }
        }

        Commands::Weak => {
            let weak = db.weak_concepts(Utc::now())?;
            if cli.json {
                let rows: Vec<serde_json::Value> = weak
                    .iter()
                    .map(|(concept, flags)| {
                        serde_json::json!({
                            "concept": concept,
                            "flags": flags
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string(&JsonOutput::ok(rows))?);
            } else if weak.is_empty() {
                println!("No weak areas flagged.");
            } else {
                for (concept, flags) in weak {
                    println!("{} (ID: {}, {:.1}%)", concept.name, concept.id, concept.mastery);
                    for flag in flags {
                        println!("  - {}", flag.describe());
                    }
                }
            }
        }

        Commands::Stage(cmd) => match cmd {
            StageCommands::Set {
                subject_id,
                stage,
                progress,
            } => {
                let stage = StudyStage::from_str(&stage).ok_or_else(|| {
                    format!(
                        "Invalid stage '{}'. Use: learn_recall, testing_effect, reflection_diagnosis, integration or teaching",
                        stage
                    )
                })?;
                db.set_stage_progress(subject_id, stage, progress)?;
                if cli.json {
                    println!("{}", serde_json::to_string(&JsonOutput::<()>::ok(()))?);
                } else {
                    println!("Set {} to {:.0}%.", stage.label(), progress.clamp(0.0, 100.0));
                }
            }

            StageCommands::Show { subject_id } => {
                let stages = db.get_stage_progress(subject_id)?;
                if cli.json {
                    println!("{}", serde_json::to_string(&JsonOutput::ok(&stages))?);
                } else {
                    println!(
                        "{:<25} {:>9} {:>9} {:>10} {:>9}",
                        "STAGE", "PROGRESS", "MASTERY", "RETENTION", "CLARITY"
                    );
                    println!("{}", "-".repeat(68));
                    for report in stages {
                        println!(
                            "{:<25} {:>8.0}% {:>8.1} {:>9.1} {:>8.1}",
                            report.stage.label(),
                            report.progress,
                            report.scores.mastery,
                            report.scores.retention,
                            report.scores.clarity,
                        );
                    }
                }
            }
        },

        Commands::Stats => {
            let stats = db.get_stats(Utc::now())?;
            if cli.json {
                println!("{}", serde_json::to_string(&JsonOutput::ok(&stats))?);
            } else {
                println!("=== Study Statistics ===");
                println!("Subjects: {}", stats.subjects);
                println!("Topics: {}", stats.topics);
                println!("Concepts: {}", stats.concepts);
                println!("Sessions logged: {}", stats.sessions);
                println!("Reviews recorded: {}", stats.reviews);
                println!("Due for review: {}", stats.due_now);
                println!("Total XP: {}", stats.total_xp);
                println!("Average mastery: {:.1}%", stats.avg_mastery);
            }
        }
    }

    Ok(())
}

fn deleted(json: bool, kind: &str, id: i64) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!("{}", serde_json::to_string(&JsonOutput::<()>::ok(()))?);
    } else {
        println!("{} {} deleted.", kind, id);
    }
    Ok(())
}

fn not_found(json: bool, kind: &str) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!(
            "{}",
            serde_json::to_string(&JsonOutput::<()>::err(format!("{} not found", kind)))?
        );
    } else {
        println!("{} not found.", kind);
    }
    Ok(())
}

// Omitted notes keep the stored value; an explicit empty string clears it.
fn merge_notes(new: Option<String>, old: Option<String>) -> Option<String> {
    match new {
        Some(n) if n.is_empty() => None,
        Some(n) => Some(n),
        None => old,
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
