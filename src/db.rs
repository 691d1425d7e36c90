use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

use crate::aggregate::{self, ChildTotals, Contribution, Totals};
use crate::error::EngineError;
use crate::models::{
    ActivityType, Concept, Difficulty, OwnerKind, PhaseActivity, ReviewLog, StudySession, Subject,
    Topic,
};
use crate::phase::{self, Phase, StageScores, StudyStage};
use crate::queue::{self, Bucket, QueueCounts, ReviewItem};
use crate::recommend::{self, ConceptSnapshot, Recommendation, WeakArea};
use crate::scheduler::{self, Scheduled};
use crate::scoring;

type Result<T> = std::result::Result<T, EngineError>;

pub struct Database {
    conn: Connection,
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
            CREATE TABLE IF NOT EXISTS subjects (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                description TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                -- Derived from topics; recomputed on every descendant write
                total_xp INTEGER NOT NULL DEFAULT 0,
                average_mastery REAL NOT NULL DEFAULT 0,
                completed_topics INTEGER NOT NULL DEFAULT 0,
                total_topics INTEGER NOT NULL DEFAULT 0,
                last_studied TEXT
            );

            CREATE TABLE IF NOT EXISTS topics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subject_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                description TEXT,
                mastery REAL NOT NULL DEFAULT 0,
                xp INTEGER NOT NULL DEFAULT 0,
                study_minutes INTEGER NOT NULL DEFAULT 0,
                last_studied TEXT,
                next_review TEXT,
                interval_days INTEGER NOT NULL DEFAULT 1,
                habit INTEGER NOT NULL DEFAULT 0,
                UNIQUE (subject_id, name),
                FOREIGN KEY (subject_id) REFERENCES subjects(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS concepts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                topic_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                description TEXT,
                mastery REAL NOT NULL DEFAULT 0,
                xp INTEGER NOT NULL DEFAULT 0,
                study_minutes INTEGER NOT NULL DEFAULT 0,
                last_studied TEXT,
                phase TEXT NOT NULL DEFAULT 'initial'
                    CHECK (phase IN ('initial', 'consolidation', 'mastery')),
                next_review TEXT,
                interval_days INTEGER NOT NULL DEFAULT 1,
                UNIQUE (topic_id, name),
                FOREIGN KEY (topic_id) REFERENCES topics(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS study_sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_kind TEXT NOT NULL CHECK (owner_kind IN ('topic', 'concept')),
                owner_id INTEGER NOT NULL,
                date TEXT NOT NULL,
                duration_minutes INTEGER NOT NULL DEFAULT 0,
                activity TEXT NOT NULL,
                difficulty TEXT NOT NULL,
                rating INTEGER CHECK (rating BETWEEN 1 AND 5),
                notes TEXT,
                -- Stored contributions make edit/delete reversals exact
                xp_gained INTEGER NOT NULL,
                mastery_gained REAL NOT NULL
            );

            -- Append-only; rows are never updated or edited
            CREATE TABLE IF NOT EXISTS review_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_kind TEXT NOT NULL CHECK (owner_kind IN ('topic', 'concept')),
                owner_id INTEGER NOT NULL,
                reviewed_at TEXT NOT NULL,
                rating INTEGER NOT NULL CHECK (rating BETWEEN 1 AND 5),
                interval_days INTEGER NOT NULL,
                notes TEXT
            );

            CREATE TABLE IF NOT EXISTS phase_activities (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                concept_id INTEGER NOT NULL,
                phase TEXT NOT NULL,
                activity TEXT NOT NULL,
                completed INTEGER NOT NULL DEFAULT 0,
                notes TEXT,
                completed_at TEXT,
                UNIQUE (concept_id, phase, activity),
                FOREIGN KEY (concept_id) REFERENCES concepts(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS stage_progress (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subject_id INTEGER NOT NULL,
                stage TEXT NOT NULL,
                progress REAL NOT NULL DEFAULT 0,
                UNIQUE (subject_id, stage),
                FOREIGN KEY (subject_id) REFERENCES subjects(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_topics_subject ON topics(subject_id);
            CREATE INDEX IF NOT EXISTS idx_topics_next_review ON topics(next_review);
            CREATE INDEX IF NOT EXISTS idx_concepts_topic ON concepts(topic_id);
            CREATE INDEX IF NOT EXISTS idx_concepts_next_review ON concepts(next_review);
            CREATE INDEX IF NOT EXISTS idx_sessions_owner ON study_sessions(owner_kind, owner_id);
            CREATE INDEX IF NOT EXISTS idx_review_logs_owner ON review_logs(owner_kind, owner_id);
            CREATE INDEX IF NOT EXISTS idx_phase_activities_concept ON phase_activities(concept_id);
            "#,
        )?;
        Ok(())
    }

    // === Subject operations ===

    pub fn add_subject(&self, name: &str, description: Option<&str>) -> Result<i64> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO subjects (name, description) VALUES (?1, ?2)",
            params![name, description],
        )?;
        let subject_id = tx.last_insert_rowid();

        // Seed the five-stage framework at zero progress
        for stage in StudyStage::ORDER {
            tx.execute(
                "INSERT INTO stage_progress (subject_id, stage) VALUES (?1, ?2)",
                params![subject_id, stage.as_str()],
            )?;
        }
        tx.commit()?;
        Ok(subject_id)
    }

    pub fn get_subject(&self, id: i64) -> Result<Option<Subject>> {
        let subject = self
            .conn
            .query_row(
                r#"
                SELECT id, name, description, created_at, updated_at,
                       total_xp, average_mastery, completed_topics, total_topics, last_studied
                FROM subjects WHERE id = ?1
                "#,
                params![id],
                Self::subject_from_row,
            )
            .optional()?;
        Ok(subject)
    }

    pub fn list_subjects(&self) -> Result<Vec<Subject>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, name, description, created_at, updated_at,
                   total_xp, average_mastery, completed_topics, total_topics, last_studied
            FROM subjects ORDER BY name
            "#,
        )?;
        let rows = stmt.query_map([], Self::subject_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn delete_subject(&self, id: i64) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        // Sessions and logs reference owners without FKs; clear them first
        tx.execute(
            r#"
            DELETE FROM study_sessions
            WHERE (owner_kind = 'concept' AND owner_id IN (
                       SELECT c.id FROM concepts c
                       JOIN topics t ON c.topic_id = t.id
                       WHERE t.subject_id = ?1))
               OR (owner_kind = 'topic' AND owner_id IN (
                       SELECT id FROM topics WHERE subject_id = ?1))
            "#,
            params![id],
        )?;
        tx.execute(
            r#"
            DELETE FROM review_logs
            WHERE (owner_kind = 'concept' AND owner_id IN (
                       SELECT c.id FROM concepts c
                       JOIN topics t ON c.topic_id = t.id
                       WHERE t.subject_id = ?1))
               OR (owner_kind = 'topic' AND owner_id IN (
                       SELECT id FROM topics WHERE subject_id = ?1))
            "#,
            params![id],
        )?;
        let rows = tx.execute("DELETE FROM subjects WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(rows > 0)
    }

    fn subject_from_row(row: &rusqlite::Row) -> rusqlite::Result<Subject> {
        Ok(Subject {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
            total_xp: row.get(5)?,
            average_mastery: row.get(6)?,
            completed_topics: row.get(7)?,
            total_topics: row.get(8)?,
            last_studied: row.get(9)?,
        })
    }

    // === Topic operations ===

    pub fn add_topic(
        &self,
        subject_id: i64,
        name: &str,
        description: Option<&str>,
        habit: bool,
    ) -> Result<i64> {
        self.require_subject(subject_id)?;
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO topics (subject_id, name, description, habit) VALUES (?1, ?2, ?3, ?4)",
            params![subject_id, name, description, habit as i64],
        )?;
        let topic_id = tx.last_insert_rowid();
        self.refresh_subject(subject_id)?;
        tx.commit()?;
        Ok(topic_id)
    }

    pub fn get_topic(&self, id: i64) -> Result<Option<Topic>> {
        let topic = self
            .conn
            .query_row(
                &format!("{} WHERE id = ?1", TOPIC_SELECT),
                params![id],
                Self::topic_from_row,
            )
            .optional()?;
        Ok(topic)
    }

    pub fn list_topics(&self, subject_id: i64) -> Result<Vec<Topic>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{} WHERE subject_id = ?1 ORDER BY name", TOPIC_SELECT))?;
        let rows = stmt.query_map(params![subject_id], Self::topic_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn delete_topic(&self, id: i64) -> Result<bool> {
        let topic = match self.get_topic(id)? {
            Some(t) => t,
            None => return Ok(false),
        };
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            r#"
            DELETE FROM study_sessions
            WHERE (owner_kind = 'concept' AND owner_id IN (
                       SELECT id FROM concepts WHERE topic_id = ?1))
               OR (owner_kind = 'topic' AND owner_id = ?1)
            "#,
            params![id],
        )?;
        tx.execute(
            r#"
            DELETE FROM review_logs
            WHERE (owner_kind = 'concept' AND owner_id IN (
                       SELECT id FROM concepts WHERE topic_id = ?1))
               OR (owner_kind = 'topic' AND owner_id = ?1)
            "#,
            params![id],
        )?;
        tx.execute("DELETE FROM topics WHERE id = ?1", params![id])?;
        self.refresh_subject(topic.subject_id)?;
        tx.commit()?;
        Ok(true)
    }

    fn topic_from_row(row: &rusqlite::Row) -> rusqlite::Result<Topic> {
        Ok(Topic {
            id: row.get(0)?,
            subject_id: row.get(1)?,
            name: row.get(2)?,
            description: row.get(3)?,
            mastery: row.get(4)?,
            xp: row.get(5)?,
            study_minutes: row.get(6)?,
            last_studied: row.get(7)?,
            next_review: row.get(8)?,
            interval_days: row.get(9)?,
            habit: row.get::<_, i64>(10)? != 0,
        })
    }

    // === Concept operations ===

    pub fn add_concept(&self, topic_id: i64, name: &str, description: Option<&str>) -> Result<i64> {
        let topic = self.require_topic(topic_id)?;
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO concepts (topic_id, name, description) VALUES (?1, ?2, ?3)",
            params![topic_id, name, description],
        )?;
        let concept_id = tx.last_insert_rowid();
        self.ensure_checklist(concept_id, Phase::Initial)?;
        self.refresh_topic(topic_id)?;
        self.refresh_subject(topic.subject_id)?;
        tx.commit()?;
        Ok(concept_id)
    }

    pub fn get_concept(&self, id: i64) -> Result<Option<Concept>> {
        let concept = self
            .conn
            .query_row(
                &format!("{} WHERE id = ?1", CONCEPT_SELECT),
                params![id],
                Self::concept_from_row,
            )
            .optional()?;
        Ok(concept)
    }

    pub fn list_concepts(&self, topic_id: i64) -> Result<Vec<Concept>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{} WHERE topic_id = ?1 ORDER BY name", CONCEPT_SELECT))?;
        let rows = stmt.query_map(params![topic_id], Self::concept_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn delete_concept(&self, id: i64) -> Result<bool> {
        let concept = match self.get_concept(id)? {
            Some(c) => c,
            None => return Ok(false),
        };
        let topic = self.require_topic(concept.topic_id)?;
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM study_sessions WHERE owner_kind = 'concept' AND owner_id = ?1",
            params![id],
        )?;
        tx.execute(
            "DELETE FROM review_logs WHERE owner_kind = 'concept' AND owner_id = ?1",
            params![id],
        )?;
        tx.execute("DELETE FROM concepts WHERE id = ?1", params![id])?;
        self.refresh_topic(concept.topic_id)?;
        self.refresh_subject(topic.subject_id)?;
        tx.commit()?;
        Ok(true)
    }

    fn concept_from_row(row: &rusqlite::Row) -> rusqlite::Result<Concept> {
        let phase_str: String = row.get(8)?;
        Ok(Concept {
            id: row.get(0)?,
            topic_id: row.get(1)?,
            name: row.get(2)?,
            description: row.get(3)?,
            mastery: row.get(4)?,
            xp: row.get(5)?,
            study_minutes: row.get(6)?,
            last_studied: row.get(7)?,
            phase: Phase::from_str(&phase_str).unwrap_or(Phase::Initial),
            next_review: row.get(9)?,
            interval_days: row.get(10)?,
        })
    }

    // === Study sessions ===

    /// Log a study session against a topic or concept.
    ///
    /// Scores the activity, stores the session with its exact
    /// contribution, ticks the concept's phase checklist (possibly
    /// advancing the phase), and recomputes topic and subject
    /// aggregates. All inside one transaction.
    #[allow(clippy::too_many_arguments)]
    pub fn log_session(
        &self,
        owner_kind: OwnerKind,
        owner_id: i64,
        activity: ActivityType,
        difficulty: Difficulty,
        duration_minutes: i64,
        rating: Option<i64>,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<StudySession> {
        if let Some(r) = rating {
            if !(1..=5).contains(&r) {
                return Err(EngineError::InvalidReviewInput(format!(
                    "rating must be 1-5, got {}",
                    r
                )));
            }
        }

        let tx = self.conn.unchecked_transaction()?;
        let totals = self.owner_totals(owner_kind, owner_id)?;
        let score =
            scoring::score_session(activity, difficulty, duration_minutes, totals.mastery)?;

        // Store the applied (post-clamp) mastery delta so reversal is exact
        let applied = aggregate::apply_delta(
            totals,
            None,
            Some(Contribution {
                xp: score.xp,
                mastery: score.mastery_gained,
                minutes: duration_minutes.max(0),
            }),
        );
        let mastery_applied = applied.mastery - totals.mastery;

        tx.execute(
            r#"
            INSERT INTO study_sessions
                (owner_kind, owner_id, date, duration_minutes, activity, difficulty,
                 rating, notes, xp_gained, mastery_gained)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                owner_kind.as_str(),
                owner_id,
                now.to_rfc3339(),
                duration_minutes.max(0),
                activity.as_str(),
                difficulty.as_str(),
                rating,
                notes,
                score.xp,
                mastery_applied,
            ],
        )?;
        let session_id = tx.last_insert_rowid();

        self.write_owner_totals(owner_kind, owner_id, applied, Some(now))?;

        if owner_kind == OwnerKind::Concept {
            self.tick_checklist(owner_id, activity, notes, now)?;
        }

        self.refresh_ancestors(owner_kind, owner_id)?;
        tx.commit()?;

        Ok(StudySession {
            id: session_id,
            owner_kind,
            owner_id,
            date: now.to_rfc3339(),
            duration_minutes: duration_minutes.max(0),
            activity,
            difficulty,
            rating,
            notes: notes.map(|n| n.to_string()),
            xp_gained: score.xp,
            mastery_gained: mastery_applied,
        })
    }

    /// Replace a session's activity/difficulty/duration/rating/notes.
    ///
    /// The old contribution is reversed and a freshly scored one
    /// applied; editing a session back to its original values restores
    /// the owner's totals exactly.
    #[allow(clippy::too_many_arguments)]
    pub fn edit_session(
        &self,
        session_id: i64,
        activity: ActivityType,
        difficulty: Difficulty,
        duration_minutes: i64,
        rating: Option<i64>,
        notes: Option<&str>,
    ) -> Result<StudySession> {
        let old = self
            .get_session(session_id)?
            .ok_or(EngineError::EntityNotFound {
                kind: "session",
                id: session_id,
            })?;

        let tx = self.conn.unchecked_transaction()?;
        let totals = self.owner_totals(old.owner_kind, old.owner_id)?;

        // Reverse the old contribution, then score the replacement at
        // the mastery level the owner had before this session
        let reversed = aggregate::apply_delta(
            totals,
            Some(Contribution {
                xp: old.xp_gained,
                mastery: old.mastery_gained,
                minutes: old.duration_minutes,
            }),
            None,
        );
        let score =
            scoring::score_session(activity, difficulty, duration_minutes, reversed.mastery)?;
        let applied = aggregate::apply_delta(
            reversed,
            None,
            Some(Contribution {
                xp: score.xp,
                mastery: score.mastery_gained,
                minutes: duration_minutes.max(0),
            }),
        );
        let mastery_applied = applied.mastery - reversed.mastery;

        tx.execute(
            r#"
            UPDATE study_sessions
            SET activity = ?1, difficulty = ?2, duration_minutes = ?3,
                rating = ?4, notes = ?5, xp_gained = ?6, mastery_gained = ?7
            WHERE id = ?8
            "#,
            params![
                activity.as_str(),
                difficulty.as_str(),
                duration_minutes.max(0),
                rating,
                notes,
                score.xp,
                mastery_applied,
                session_id,
            ],
        )?;

        self.write_owner_totals(old.owner_kind, old.owner_id, applied, None)?;
        self.reconcile_owner(old.owner_kind, old.owner_id)?;
        self.refresh_ancestors(old.owner_kind, old.owner_id)?;
        tx.commit()?;

        Ok(StudySession {
            id: session_id,
            owner_kind: old.owner_kind,
            owner_id: old.owner_id,
            date: old.date,
            duration_minutes: duration_minutes.max(0),
            activity,
            difficulty,
            rating,
            notes: notes.map(|n| n.to_string()),
            xp_gained: score.xp,
            mastery_gained: mastery_applied,
        })
    }

    /// Remove a session and reverse its contribution. The one case
    /// where an owner's XP goes down. Phase progress stays put.
    pub fn delete_session(&self, session_id: i64) -> Result<bool> {
        let old = match self.get_session(session_id)? {
            Some(s) => s,
            None => return Ok(false),
        };

        let tx = self.conn.unchecked_transaction()?;
        let totals = self.owner_totals(old.owner_kind, old.owner_id)?;
        let reversed = aggregate::apply_delta(
            totals,
            Some(Contribution {
                xp: old.xp_gained,
                mastery: old.mastery_gained,
                minutes: old.duration_minutes,
            }),
            None,
        );

        tx.execute(
            "DELETE FROM study_sessions WHERE id = ?1",
            params![session_id],
        )?;
        self.write_owner_totals(old.owner_kind, old.owner_id, reversed, None)?;
        self.reconcile_owner(old.owner_kind, old.owner_id)?;
        self.refresh_ancestors(old.owner_kind, old.owner_id)?;
        tx.commit()?;
        Ok(true)
    }

    pub fn get_session(&self, id: i64) -> Result<Option<StudySession>> {
        let session = self
            .conn
            .query_row(
                &format!("{} WHERE id = ?1", SESSION_SELECT),
                params![id],
                Self::session_from_row,
            )
            .optional()?;
        Ok(session)
    }

    pub fn list_sessions(&self, owner_kind: OwnerKind, owner_id: i64) -> Result<Vec<StudySession>> {
        let mut stmt = self.conn.prepare(&format!(
            "{} WHERE owner_kind = ?1 AND owner_id = ?2 ORDER BY date DESC",
            SESSION_SELECT
        ))?;
        let rows = stmt.query_map(
            params![owner_kind.as_str(), owner_id],
            Self::session_from_row,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn session_from_row(row: &rusqlite::Row) -> rusqlite::Result<StudySession> {
        let owner_kind: String = row.get(1)?;
        let activity: String = row.get(5)?;
        let difficulty: String = row.get(6)?;
        Ok(StudySession {
            id: row.get(0)?,
            owner_kind: OwnerKind::from_str(&owner_kind).unwrap_or(OwnerKind::Concept),
            owner_id: row.get(2)?,
            date: row.get(3)?,
            duration_minutes: row.get(4)?,
            activity: ActivityType::from_str(&activity).unwrap_or(ActivityType::Study),
            difficulty: Difficulty::from_str(&difficulty).unwrap_or(Difficulty::Medium),
            rating: row.get(7)?,
            notes: row.get(8)?,
            xp_gained: row.get(9)?,
            mastery_gained: row.get(10)?,
        })
    }

    // === Reviews ===

    /// Record a spaced-repetition review: compute the next interval
    /// from the rating, append an immutable log entry and move the
    /// owner's due date.
    pub fn record_review(
        &self,
        owner_kind: OwnerKind,
        owner_id: i64,
        rating: i64,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Scheduled> {
        let tx = self.conn.unchecked_transaction()?;
        let prior = self.owner_interval(owner_kind, owner_id)?;
        let scheduled = scheduler::schedule(prior, rating, now)?;

        tx.execute(
            r#"
            INSERT INTO review_logs (owner_kind, owner_id, reviewed_at, rating, interval_days, notes)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                owner_kind.as_str(),
                owner_id,
                now.to_rfc3339(),
                rating,
                scheduled.interval_days,
                notes,
            ],
        )?;

        let table = owner_table(owner_kind);
        tx.execute(
            &format!(
                "UPDATE {} SET next_review = ?1, interval_days = ?2 WHERE id = ?3",
                table
            ),
            params![
                scheduled.next_review.to_rfc3339(),
                scheduled.interval_days,
                owner_id,
            ],
        )?;
        tx.commit()?;
        Ok(scheduled)
    }

    pub fn list_review_logs(&self, owner_kind: OwnerKind, owner_id: i64) -> Result<Vec<ReviewLog>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, owner_kind, owner_id, reviewed_at, rating, interval_days, notes
            FROM review_logs
            WHERE owner_kind = ?1 AND owner_id = ?2
            ORDER BY reviewed_at ASC
            "#,
        )?;
        let rows = stmt.query_map(params![owner_kind.as_str(), owner_id], |row| {
            let kind: String = row.get(1)?;
            Ok(ReviewLog {
                id: row.get(0)?,
                owner_kind: OwnerKind::from_str(&kind).unwrap_or(OwnerKind::Concept),
                owner_id: row.get(2)?,
                reviewed_at: row.get(3)?,
                rating: row.get(4)?,
                interval_days: row.get(5)?,
                notes: row.get(6)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // === Phase checklist ===

    /// Mark a phase activity complete by name, advancing the phase
    /// when its checklist fills up. Unknown activity strings fail with
    /// no mutation.
    pub fn complete_phase_activity(
        &self,
        concept_id: i64,
        activity: &str,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<Phase>> {
        let activity = ActivityType::from_str(activity)
            .ok_or_else(|| EngineError::UnknownActivityType(activity.to_string()))?;
        self.require_concept(concept_id)?;

        let tx = self.conn.unchecked_transaction()?;
        let advanced = self.tick_checklist(concept_id, activity, notes, now)?;
        self.conn.execute(
            "UPDATE concepts SET last_studied = ?1 WHERE id = ?2",
            params![now.to_rfc3339(), concept_id],
        )?;
        self.refresh_ancestors(OwnerKind::Concept, concept_id)?;
        tx.commit()?;
        Ok(advanced)
    }

    pub fn get_checklist(&self, concept_id: i64, phase: Phase) -> Result<Vec<PhaseActivity>> {
        self.ensure_checklist(concept_id, phase)?;
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, concept_id, phase, activity, completed, notes, completed_at
            FROM phase_activities
            WHERE concept_id = ?1 AND phase = ?2
            ORDER BY id
            "#,
        )?;
        let rows = stmt.query_map(params![concept_id, phase.as_str()], |row| {
            let phase_str: String = row.get(2)?;
            let activity_str: String = row.get(3)?;
            Ok(PhaseActivity {
                id: row.get(0)?,
                concept_id: row.get(1)?,
                phase: Phase::from_str(&phase_str).unwrap_or(Phase::Initial),
                activity: ActivityType::from_str(&activity_str).unwrap_or(ActivityType::Study),
                completed: row.get::<_, i64>(4)? != 0,
                notes: row.get(5)?,
                completed_at: row.get(6)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // Run the phase state machine over the stored checklist; persists
    // slot changes and any phase transition. Returns the new phase when
    // one was entered.
    fn tick_checklist(
        &self,
        concept_id: i64,
        activity: ActivityType,
        notes: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<Phase>> {
        let concept = self.require_concept(concept_id)?;
        let mut checklist = self.get_checklist(concept_id, concept.phase)?;
        let outcome = phase::record_activity(concept.phase, &mut checklist, activity, notes, now);

        if outcome.slot_completed {
            for slot in checklist.iter().filter(|s| s.completed) {
                self.conn.execute(
                    r#"
                    UPDATE phase_activities
                    SET completed = 1,
                        notes = COALESCE(?1, notes),
                        completed_at = COALESCE(completed_at, ?2)
                    WHERE id = ?3
                    "#,
                    params![slot.notes, now.to_rfc3339(), slot.id],
                )?;
            }
        }

        if let Some(next) = outcome.advanced_to {
            self.conn.execute(
                "UPDATE concepts SET phase = ?1 WHERE id = ?2",
                params![next.as_str(), concept_id],
            )?;
            self.ensure_checklist(concept_id, next)?;
        }
        Ok(outcome.advanced_to)
    }

    fn ensure_checklist(&self, concept_id: i64, phase: Phase) -> Result<()> {
        for slot in phase::checklist_for(concept_id, phase) {
            self.conn.execute(
                r#"
                INSERT OR IGNORE INTO phase_activities (concept_id, phase, activity)
                VALUES (?1, ?2, ?3)
                "#,
                params![concept_id, slot.phase.as_str(), slot.activity.as_str()],
            )?;
        }
        Ok(())
    }

    // === Study framework stages ===

    pub fn set_stage_progress(
        &self,
        subject_id: i64,
        stage: StudyStage,
        progress: f64,
    ) -> Result<()> {
        self.require_subject(subject_id)?;
        self.conn.execute(
            r#"
            INSERT INTO stage_progress (subject_id, stage, progress)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (subject_id, stage) DO UPDATE SET progress = excluded.progress
            "#,
            params![subject_id, stage.as_str(), progress.clamp(0.0, 100.0)],
        )?;
        Ok(())
    }

    pub fn get_stage_progress(&self, subject_id: i64) -> Result<Vec<StageReport>> {
        let mut stmt = self.conn.prepare(
            "SELECT stage, progress FROM stage_progress WHERE subject_id = ?1",
        )?;
        let rows = stmt.query_map(params![subject_id], |row| {
            let stage_str: String = row.get(0)?;
            let progress: f64 = row.get(1)?;
            Ok((stage_str, progress))
        })?;
        let stored: Vec<(String, f64)> = rows.collect::<rusqlite::Result<Vec<_>>>()?;

        // Report in framework order regardless of row order
        let mut reports = Vec::with_capacity(StudyStage::ORDER.len());
        for stage in StudyStage::ORDER {
            let progress = stored
                .iter()
                .find(|(s, _)| s == stage.as_str())
                .map(|(_, p)| *p)
                .unwrap_or(0.0);
            reports.push(StageReport {
                stage,
                progress,
                scores: phase::stage_scores(stage, progress),
            });
        }
        Ok(reports)
    }

    // === Review queue ===

    /// Every studied entity with a scheduled review, sorted ascending
    /// by due date. Bucket and search filters compose.
    pub fn review_queue(
        &self,
        bucket: Option<Bucket>,
        search: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<QueueReport> {
        let items = self.scheduled_items()?;
        let counts = queue::count_buckets(&items, now);
        let reviewed_today = self.owners_reviewed_today(now)?;
        let completion_rate = queue::completion_rate(reviewed_today, counts);

        let mut filtered = queue::filter_queue(&items, bucket, search, now);
        queue::sort_queue(&mut filtered);

        Ok(QueueReport {
            items: filtered,
            counts,
            completion_rate,
        })
    }

    /// Stochastic pick among overdue/today items, weighted toward the
    /// most overdue and least mastered.
    pub fn next_due(&self, now: DateTime<Utc>) -> Result<Option<ReviewItem>> {
        let items = self.scheduled_items()?;
        let today = now.date_naive();

        let mut due: Vec<(ReviewItem, f64)> = Vec::new();
        for item in items {
            let bucket = match queue::bucket_of(&item, now) {
                Some(b) => b,
                None => continue,
            };
            if bucket != Bucket::Overdue && bucket != Bucket::Today {
                continue;
            }
            let overdue_days = item
                .due
                .as_deref()
                .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
                .map(|dt| (today - dt.with_timezone(&Utc).date_naive()).num_days().max(0))
                .unwrap_or(0) as f64;
            let mastery = self.owner_totals(item.owner_kind, item.owner_id)?.mastery;
            // Overdue and poorly-known items get picked more often
            let weight = (overdue_days + 1.0) * (1.0 + (100.0 - mastery) / 100.0);
            due.push((item, weight));
        }

        if due.is_empty() {
            return Ok(None);
        }

        use rand::Rng;
        let total_weight: f64 = due.iter().map(|(_, w)| w).sum();
        let mut random_point = rand::thread_rng().gen::<f64>() * total_weight;
        for (item, weight) in &due {
            random_point -= weight;
            if random_point <= 0.0 {
                return Ok(Some(item.clone()));
            }
        }
        Ok(due.into_iter().next().map(|(item, _)| item))
    }

    // Unstudied entities never make the queue
    fn scheduled_items(&self) -> Result<Vec<ReviewItem>> {
        let mut items = Vec::new();

        let mut stmt = self.conn.prepare(
            r#"
            SELECT t.id, t.subject_id, t.name, t.next_review
            FROM topics t
            WHERE t.next_review IS NOT NULL
              AND EXISTS (SELECT 1 FROM study_sessions s
                          WHERE s.owner_kind = 'topic' AND s.owner_id = t.id)
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ReviewItem {
                owner_kind: OwnerKind::Topic,
                owner_id: row.get(0)?,
                subject_id: row.get(1)?,
                topic_id: row.get(0)?,
                name: row.get(2)?,
                due: row.get(3)?,
            })
        })?;
        items.extend(rows.collect::<rusqlite::Result<Vec<_>>>()?);

        let mut stmt = self.conn.prepare(
            r#"
            SELECT c.id, t.subject_id, t.id, c.name, c.next_review
            FROM concepts c
            JOIN topics t ON c.topic_id = t.id
            WHERE c.next_review IS NOT NULL
              AND EXISTS (SELECT 1 FROM study_sessions s
                          WHERE s.owner_kind = 'concept' AND s.owner_id = c.id)
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ReviewItem {
                owner_kind: OwnerKind::Concept,
                owner_id: row.get(0)?,
                subject_id: row.get(1)?,
                topic_id: row.get(2)?,
                name: row.get(3)?,
                due: row.get(4)?,
            })
        })?;
        items.extend(rows.collect::<rusqlite::Result<Vec<_>>>()?);

        Ok(items)
    }

    fn owners_reviewed_today(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT owner_kind, owner_id, reviewed_at FROM review_logs")?;
        let rows = stmt.query_map([], |row| {
            let kind: String = row.get(0)?;
            let id: i64 = row.get(1)?;
            let at: String = row.get(2)?;
            Ok((kind, id, at))
        })?;

        let today = now.date_naive();
        let mut owners = std::collections::HashSet::new();
        for row in rows {
            let (kind, id, at) = row?;
            let reviewed_today = DateTime::parse_from_rfc3339(&at)
                .map(|dt| dt.with_timezone(&Utc).date_naive() == today)
                .unwrap_or(false);
            if reviewed_today {
                owners.insert((kind, id));
            }
        }
        Ok(owners.len())
    }

    // === Recommendations & weak areas ===

    pub fn concept_snapshot(&self, concept_id: i64, now: DateTime<Utc>) -> Result<ConceptSnapshot> {
        let concept = self.require_concept(concept_id)?;
        let sessions = self.list_sessions(OwnerKind::Concept, concept_id)?;

        let mut activity_counts: Vec<(ActivityType, i64)> = Vec::new();
        let mut activity_gain: Vec<(ActivityType, f64, i64)> = Vec::new();
        for session in &sessions {
            match activity_counts.iter_mut().find(|(a, _)| *a == session.activity) {
                Some((_, n)) => *n += 1,
                None => activity_counts.push((session.activity, 1)),
            }
            match activity_gain.iter_mut().find(|(a, _, _)| *a == session.activity) {
                Some((_, total, n)) => {
                    *total += session.mastery_gained;
                    *n += 1;
                }
                None => activity_gain.push((session.activity, session.mastery_gained, 1)),
            }
        }

        let rated: Vec<i64> = sessions.iter().filter_map(|s| s.rating).collect();
        let avg_rating = if rated.is_empty() {
            0.0
        } else {
            rated.iter().sum::<i64>() as f64 / rated.len() as f64
        };

        let days_since_study = concept
            .last_studied
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| (now.date_naive() - dt.with_timezone(&Utc).date_naive()).num_days());

        Ok(ConceptSnapshot {
            mastery: concept.mastery,
            avg_rating,
            days_since_study,
            activity_counts,
            activity_avg_gain: activity_gain
                .into_iter()
                .map(|(a, total, n)| (a, total / n as f64))
                .collect(),
        })
    }

    pub fn recommend_for(&self, concept_id: i64, now: DateTime<Utc>) -> Result<Recommendation> {
        let snapshot = self.concept_snapshot(concept_id, now)?;
        Ok(recommend::recommend(&snapshot))
    }

    /// Weak-area flags for every studied concept, in (topic, concept)
    /// name order. Concepts without flags are omitted.
    pub fn weak_concepts(&self, now: DateTime<Utc>) -> Result<Vec<(Concept, Vec<WeakArea>)>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"
            {} WHERE EXISTS (SELECT 1 FROM study_sessions s
                             WHERE s.owner_kind = 'concept' AND s.owner_id = concepts.id)
            ORDER BY topic_id, name
            "#,
            CONCEPT_SELECT
        ))?;
        let rows = stmt.query_map([], Self::concept_from_row)?;
        let concepts: Vec<Concept> = rows.collect::<rusqlite::Result<Vec<_>>>()?;

        let mut flagged = Vec::new();
        for concept in concepts {
            let snapshot = self.concept_snapshot(concept.id, now)?;
            let flags = recommend::weak_areas(&snapshot);
            if !flags.is_empty() {
                flagged.push((concept, flags));
            }
        }
        Ok(flagged)
    }

    // === Stats ===

    pub fn get_stats(&self, now: DateTime<Utc>) -> Result<Stats> {
        let subjects: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM subjects", [], |row| row.get(0))?;
        let topics: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM topics", [], |row| row.get(0))?;
        let concepts: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM concepts", [], |row| row.get(0))?;
        let sessions: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM study_sessions", [], |row| row.get(0))?;
        let reviews: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM review_logs", [], |row| row.get(0))?;
        let total_xp: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(total_xp), 0) FROM subjects",
            [],
            |row| row.get(0),
        )?;
        let avg_mastery: f64 = self.conn.query_row(
            "SELECT COALESCE(AVG(average_mastery), 0) FROM subjects",
            [],
            |row| row.get(0),
        )?;
        let counts = queue::count_buckets(&self.scheduled_items()?, now);
        Ok(Stats {
            subjects,
            topics,
            concepts,
            sessions,
            reviews,
            total_xp,
            avg_mastery,
            due_now: (counts.overdue + counts.today) as i64,
        })
    }

    // === Aggregate maintenance ===

    // Full recompute from stored children: the source of truth that
    // delta application must agree with.
    fn refresh_ancestors(&self, owner_kind: OwnerKind, owner_id: i64) -> Result<()> {
        let topic_id = match owner_kind {
            OwnerKind::Topic => owner_id,
            OwnerKind::Concept => self.require_concept(owner_id)?.topic_id,
        };
        let topic = self.require_topic(topic_id)?;
        self.refresh_topic(topic_id)?;
        self.refresh_subject(topic.subject_id)?;
        Ok(())
    }

    fn refresh_topic(&self, topic_id: i64) -> Result<()> {
        let concepts = self.list_concepts(topic_id)?;
        let sessions = self.list_sessions(OwnerKind::Topic, topic_id)?;

        let session_xp: i64 = sessions.iter().map(|s| s.xp_gained).sum();
        let session_minutes: i64 = sessions.iter().map(|s| s.duration_minutes).sum();
        let session_mastery: f64 = sessions.iter().map(|s| s.mastery_gained).sum();
        let session_last = sessions.iter().map(|s| s.date.clone()).max();

        let (mastery, xp, minutes, last_studied) = if concepts.is_empty() {
            // Habit-style topic: its own sessions are the children
            (
                session_mastery.clamp(0.0, 100.0),
                session_xp.max(0),
                session_minutes.max(0),
                session_last,
            )
        } else {
            let children: Vec<ChildTotals> = concepts
                .iter()
                .map(|c| ChildTotals {
                    mastery: c.mastery,
                    xp: c.xp,
                    study_minutes: c.study_minutes,
                    last_studied: c.last_studied.clone(),
                })
                .collect();
            let rollup = aggregate::rollup_children(&children);
            let last = [rollup.last_studied, session_last]
                .into_iter()
                .flatten()
                .max();
            (
                rollup.mastery,
                rollup.xp + session_xp.max(0),
                rollup.study_minutes + session_minutes.max(0),
                last,
            )
        };

        self.conn.execute(
            r#"
            UPDATE topics
            SET mastery = ?1, xp = ?2, study_minutes = ?3, last_studied = ?4
            WHERE id = ?5
            "#,
            params![mastery, xp, minutes, last_studied, topic_id],
        )?;
        Ok(())
    }

    fn refresh_subject(&self, subject_id: i64) -> Result<()> {
        let topics = self.list_topics(subject_id)?;
        let children: Vec<ChildTotals> = topics
            .iter()
            .map(|t| ChildTotals {
                mastery: t.mastery,
                xp: t.xp,
                study_minutes: t.study_minutes,
                last_studied: t.last_studied.clone(),
            })
            .collect();
        let summary = aggregate::rollup_subject(&children);

        self.conn.execute(
            r#"
            UPDATE subjects
            SET total_xp = ?1, average_mastery = ?2, completed_topics = ?3,
                total_topics = ?4, last_studied = ?5, updated_at = datetime('now')
            WHERE id = ?6
            "#,
            params![
                summary.total_xp,
                summary.average_mastery,
                summary.completed_topics,
                summary.total_topics,
                summary.last_studied,
                subject_id,
            ],
        )?;
        Ok(())
    }

    // Compare delta-maintained owner totals against the session sums
    fn reconcile_owner(&self, owner_kind: OwnerKind, owner_id: i64) -> Result<()> {
        let totals = self.owner_totals(owner_kind, owner_id)?;
        let sessions = self.list_sessions(owner_kind, owner_id)?;

        // Rollups from concepts are recomputed wholesale, so only
        // session-fed owners are checked
        if owner_kind == OwnerKind::Topic && !self.list_concepts(owner_id)?.is_empty() {
            return Ok(());
        }

        let xp: i64 = sessions.iter().map(|s| s.xp_gained.max(0)).sum();
        let minutes: i64 = sessions.iter().map(|s| s.duration_minutes).sum();
        aggregate::reconcile("xp", totals.xp as f64, xp.max(0) as f64)?;
        aggregate::reconcile("study_minutes", totals.study_minutes as f64, minutes.max(0) as f64)?;
        Ok(())
    }

    fn owner_totals(&self, owner_kind: OwnerKind, owner_id: i64) -> Result<Totals> {
        match owner_kind {
            OwnerKind::Topic => {
                let topic = self.require_topic(owner_id)?;
                Ok(Totals {
                    mastery: topic.mastery,
                    xp: topic.xp,
                    study_minutes: topic.study_minutes,
                })
            }
            OwnerKind::Concept => {
                let concept = self.require_concept(owner_id)?;
                Ok(Totals {
                    mastery: concept.mastery,
                    xp: concept.xp,
                    study_minutes: concept.study_minutes,
                })
            }
        }
    }

    fn write_owner_totals(
        &self,
        owner_kind: OwnerKind,
        owner_id: i64,
        totals: Totals,
        studied_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let table = owner_table(owner_kind);
        match studied_at {
            Some(at) => {
                self.conn.execute(
                    &format!(
                        "UPDATE {} SET mastery = ?1, xp = ?2, study_minutes = ?3, last_studied = ?4 WHERE id = ?5",
                        table
                    ),
                    params![totals.mastery, totals.xp, totals.study_minutes, at.to_rfc3339(), owner_id],
                )?;
            }
            None => {
                self.conn.execute(
                    &format!(
                        "UPDATE {} SET mastery = ?1, xp = ?2, study_minutes = ?3 WHERE id = ?4",
                        table
                    ),
                    params![totals.mastery, totals.xp, totals.study_minutes, owner_id],
                )?;
            }
        }
        Ok(())
    }

    fn owner_interval(&self, owner_kind: OwnerKind, owner_id: i64) -> Result<i64> {
        match owner_kind {
            OwnerKind::Topic => Ok(self.require_topic(owner_id)?.interval_days),
            OwnerKind::Concept => Ok(self.require_concept(owner_id)?.interval_days),
        }
    }

    fn require_subject(&self, id: i64) -> Result<Subject> {
        self.get_subject(id)?.ok_or(EngineError::EntityNotFound {
            kind: "subject",
            id,
        })
    }

    fn require_topic(&self, id: i64) -> Result<Topic> {
        self.get_topic(id)?.ok_or(EngineError::EntityNotFound {
            kind: "topic",
            id,
        })
    }

    fn require_concept(&self, id: i64) -> Result<Concept> {
        self.get_concept(id)?.ok_or(EngineError::EntityNotFound {
            kind: "concept",
            id,
        })
    }
}

const TOPIC_SELECT: &str = r#"
    SELECT id, subject_id, name, description, mastery, xp, study_minutes,
           last_studied, next_review, interval_days, habit
    FROM topics
"#;

const CONCEPT_SELECT: &str = r#"
    SELECT id, topic_id, name, description, mastery, xp, study_minutes,
           last_studied, phase, next_review, interval_days
    FROM concepts
"#;

const SESSION_SELECT: &str = r#"
    SELECT id, owner_kind, owner_id, date, duration_minutes, activity, difficulty,
           rating, notes, xp_gained, mastery_gained
    FROM study_sessions
"#;

fn owner_table(owner_kind: OwnerKind) -> &'static str {
    match owner_kind {
        OwnerKind::Topic => "topics",
        OwnerKind::Concept => "concepts",
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct StageReport {
    pub stage: StudyStage,
    pub progress: f64,
    pub scores: StageScores,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct QueueReport {
    pub items: Vec<ReviewItem>,
    pub counts: QueueCounts,
    pub completion_rate: f64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct Stats {
    pub subjects: i64,
    pub topics: i64,
    pub concepts: i64,
    pub sessions: i64,
    pub reviews: i64,
    pub total_xp: i64,
    pub avg_mastery: f64,
    pub due_now: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_db() -> Database {
        let db = Database::open(":memory:").expect("Failed to create in-memory database");
        db.init().expect("Failed to initialize database");
        db
    }

    fn fixed_now() -> DateTime<Utc> {
        "2026-03-10T12:00:00Z".parse().unwrap()
    }

    // subject -> topic -> concept, ready for sessions
    fn seed_concept(db: &Database) -> (i64, i64, i64) {
        let subject_id = db.add_subject("Rust", None).unwrap();
        let topic_id = db.add_topic(subject_id, "Ownership", None, false).unwrap();
        let concept_id = db.add_concept(topic_id, "Borrow checker", None).unwrap();
        (subject_id, topic_id, concept_id)
    }

    fn log_video(db: &Database, concept_id: i64, minutes: i64) -> StudySession {
        db.log_session(
            OwnerKind::Concept,
            concept_id,
            ActivityType::Video,
            Difficulty::Medium,
            minutes,
            None,
            None,
            fixed_now(),
        )
        .unwrap()
    }

    mod init_tests {
        use super::*;

        #[test]
        fn init_creates_tables() {
            let db = setup_db();
            for table in [
                "subjects",
                "topics",
                "concepts",
                "study_sessions",
                "review_logs",
                "phase_activities",
                "stage_progress",
            ] {
                let count: i64 = db
                    .conn
                    .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                        row.get(0)
                    })
                    .unwrap_or_else(|_| panic!("{} table should exist", table));
                assert_eq!(count, 0, "{}", table);
            }
        }

        #[test]
        fn init_is_idempotent() {
            let db = setup_db();
            db.add_subject("Keep", None).unwrap();
            db.init().expect("Re-init should succeed");
            assert_eq!(db.list_subjects().unwrap().len(), 1);
        }
    }

    mod subject_tests {
        use super::*;

        #[test]
        fn add_subject_basic() {
            let db = setup_db();
            let id = db.add_subject("Mathematics", Some("Calc and algebra")).unwrap();
            assert!(id > 0);

            let subject = db.get_subject(id).unwrap().unwrap();
            assert_eq!(subject.name, "Mathematics");
            assert_eq!(subject.description, Some("Calc and algebra".to_string()));
            assert_eq!(subject.total_xp, 0);
            assert_eq!(subject.total_topics, 0);
        }

        #[test]
        fn add_subject_seeds_framework_stages() {
            let db = setup_db();
            let id = db.add_subject("Rust", None).unwrap();
            let stages = db.get_stage_progress(id).unwrap();
            assert_eq!(stages.len(), 5);
            assert!(stages.iter().all(|s| s.progress == 0.0));
        }

        #[test]
        fn add_subject_duplicate_name_fails() {
            let db = setup_db();
            db.add_subject("Unique", None).unwrap();
            assert!(db.add_subject("Unique", None).is_err());
        }

        #[test]
        fn get_subject_not_found() {
            let db = setup_db();
            assert!(db.get_subject(999).unwrap().is_none());
        }

        #[test]
        fn list_subjects_sorted_by_name() {
            let db = setup_db();
            db.add_subject("Zoology", None).unwrap();
            db.add_subject("Algebra", None).unwrap();
            let subjects = db.list_subjects().unwrap();
            assert_eq!(subjects[0].name, "Algebra");
            assert_eq!(subjects[1].name, "Zoology");
        }

        #[test]
        fn delete_subject_cascades() {
            let db = setup_db();
            let (subject_id, topic_id, concept_id) = seed_concept(&db);
            log_video(&db, concept_id, 30);

            assert!(db.delete_subject(subject_id).unwrap());
            assert!(db.get_topic(topic_id).unwrap().is_none());
            assert!(db.get_concept(concept_id).unwrap().is_none());
            assert!(db
                .list_sessions(OwnerKind::Concept, concept_id)
                .unwrap()
                .is_empty());
        }

        #[test]
        fn delete_subject_not_found() {
            let db = setup_db();
            assert!(!db.delete_subject(999).unwrap());
        }
    }

    mod topic_tests {
        use super::*;

        #[test]
        fn add_topic_updates_subject_count() {
            let db = setup_db();
            let subject_id = db.add_subject("Rust", None).unwrap();
            db.add_topic(subject_id, "Ownership", None, false).unwrap();
            db.add_topic(subject_id, "Traits", None, false).unwrap();

            let subject = db.get_subject(subject_id).unwrap().unwrap();
            assert_eq!(subject.total_topics, 2);
        }

        #[test]
        fn add_topic_missing_subject_fails() {
            let db = setup_db();
            let result = db.add_topic(999, "Orphan", None, false);
            assert!(matches!(
                result,
                Err(EngineError::EntityNotFound { kind: "subject", .. })
            ));
        }

        #[test]
        fn add_topic_duplicate_name_within_subject_fails() {
            let db = setup_db();
            let subject_id = db.add_subject("Rust", None).unwrap();
            db.add_topic(subject_id, "Ownership", None, false).unwrap();
            assert!(db.add_topic(subject_id, "Ownership", None, false).is_err());
        }

        #[test]
        fn same_topic_name_allowed_across_subjects() {
            let db = setup_db();
            let s1 = db.add_subject("Rust", None).unwrap();
            let s2 = db.add_subject("Go", None).unwrap();
            db.add_topic(s1, "Basics", None, false).unwrap();
            db.add_topic(s2, "Basics", None, false).unwrap();
        }

        #[test]
        fn habit_flag_round_trips() {
            let db = setup_db();
            let subject_id = db.add_subject("Languages", None).unwrap();
            let topic_id = db
                .add_topic(subject_id, "Daily flashcards", None, true)
                .unwrap();
            assert!(db.get_topic(topic_id).unwrap().unwrap().habit);
        }

        #[test]
        fn delete_topic_refreshes_subject() {
            let db = setup_db();
            let (subject_id, topic_id, concept_id) = seed_concept(&db);
            log_video(&db, concept_id, 30);
            assert!(db.get_subject(subject_id).unwrap().unwrap().total_xp > 0);

            db.delete_topic(topic_id).unwrap();
            let subject = db.get_subject(subject_id).unwrap().unwrap();
            assert_eq!(subject.total_topics, 0);
            assert_eq!(subject.total_xp, 0);
        }
    }

    mod concept_tests {
        use super::*;

        #[test]
        fn add_concept_seeds_initial_checklist() {
            let db = setup_db();
            let (_, _, concept_id) = seed_concept(&db);

            let concept = db.get_concept(concept_id).unwrap().unwrap();
            assert_eq!(concept.phase, Phase::Initial);

            let checklist = db.get_checklist(concept_id, Phase::Initial).unwrap();
            assert_eq!(
                checklist.len(),
                Phase::Initial.required_activities().len()
            );
            assert!(checklist.iter().all(|s| !s.completed));
        }

        #[test]
        fn add_concept_missing_topic_fails() {
            let db = setup_db();
            let result = db.add_concept(999, "Orphan", None);
            assert!(matches!(
                result,
                Err(EngineError::EntityNotFound { kind: "topic", .. })
            ));
        }

        #[test]
        fn concept_names_unique_within_topic() {
            let db = setup_db();
            let (_, topic_id, _) = seed_concept(&db);
            assert!(db.add_concept(topic_id, "Borrow checker", None).is_err());
        }

        #[test]
        fn delete_concept_refreshes_ancestors() {
            let db = setup_db();
            let (subject_id, topic_id, concept_id) = seed_concept(&db);
            log_video(&db, concept_id, 30);

            db.delete_concept(concept_id).unwrap();
            assert_eq!(db.get_topic(topic_id).unwrap().unwrap().xp, 0);
            assert_eq!(db.get_subject(subject_id).unwrap().unwrap().total_xp, 0);
        }
    }

    mod session_tests {
        use super::*;

        #[test]
        fn first_video_session_awards_xp_and_mastery() {
            // Spec scenario: 30min medium video from mastery 0
            let db = setup_db();
            let (_, _, concept_id) = seed_concept(&db);
            let session = log_video(&db, concept_id, 30);

            assert!(session.xp_gained > 0);
            assert!(session.mastery_gained > 0.0);

            let concept = db.get_concept(concept_id).unwrap().unwrap();
            assert_eq!(concept.xp, session.xp_gained);
            assert!((concept.mastery - session.mastery_gained).abs() < 1e-9);
            assert_eq!(concept.study_minutes, 30);
            assert!(concept.last_studied.is_some());
        }

        #[test]
        fn session_bubbles_up_to_topic_and_subject() {
            let db = setup_db();
            let (subject_id, topic_id, concept_id) = seed_concept(&db);
            let session = log_video(&db, concept_id, 30);

            let topic = db.get_topic(topic_id).unwrap().unwrap();
            assert_eq!(topic.xp, session.xp_gained);
            assert!(topic.mastery > 0.0);

            let subject = db.get_subject(subject_id).unwrap().unwrap();
            assert_eq!(subject.total_xp, session.xp_gained);
            assert!(subject.average_mastery > 0.0);
            assert!(subject.last_studied.is_some());
        }

        #[test]
        fn mastery_never_exceeds_100() {
            // clamp holds through any pile of sessions
            let db = setup_db();
            let (_, _, concept_id) = seed_concept(&db);
            for _ in 0..100 {
                db.log_session(
                    OwnerKind::Concept,
                    concept_id,
                    ActivityType::Teaching,
                    Difficulty::Hard,
                    120,
                    None,
                    None,
                    fixed_now(),
                )
                .unwrap();
            }
            let concept = db.get_concept(concept_id).unwrap().unwrap();
            assert!(concept.mastery <= 100.0);
            assert!(concept.mastery > 90.0);
        }

        #[test]
        fn invalid_rating_rejected_without_mutation() {
            let db = setup_db();
            let (_, _, concept_id) = seed_concept(&db);
            let result = db.log_session(
                OwnerKind::Concept,
                concept_id,
                ActivityType::Video,
                Difficulty::Medium,
                30,
                Some(9),
                None,
                fixed_now(),
            );
            assert!(matches!(result, Err(EngineError::InvalidReviewInput(_))));
            assert!(db
                .list_sessions(OwnerKind::Concept, concept_id)
                .unwrap()
                .is_empty());
            assert_eq!(db.get_concept(concept_id).unwrap().unwrap().xp, 0);
        }

        #[test]
        fn unknown_owner_fails() {
            let db = setup_db();
            let result = db.log_session(
                OwnerKind::Concept,
                999,
                ActivityType::Video,
                Difficulty::Medium,
                30,
                None,
                None,
                fixed_now(),
            );
            assert!(matches!(result, Err(EngineError::EntityNotFound { .. })));
        }

        #[test]
        fn habit_topic_sessions_attach_directly() {
            let db = setup_db();
            let subject_id = db.add_subject("Languages", None).unwrap();
            let topic_id = db
                .add_topic(subject_id, "Daily flashcards", None, true)
                .unwrap();

            db.log_session(
                OwnerKind::Topic,
                topic_id,
                ActivityType::Recall,
                Difficulty::Medium,
                15,
                Some(4),
                None,
                fixed_now(),
            )
            .unwrap();

            let topic = db.get_topic(topic_id).unwrap().unwrap();
            assert!(topic.xp > 0);
            assert!(topic.mastery > 0.0);

            let subject = db.get_subject(subject_id).unwrap().unwrap();
            assert_eq!(subject.total_xp, topic.xp);
        }

        #[test]
        fn edit_session_replaces_contribution() {
            let db = setup_db();
            let (_, _, concept_id) = seed_concept(&db);
            let session = log_video(&db, concept_id, 30);

            let edited = db
                .edit_session(
                    session.id,
                    ActivityType::Teaching,
                    Difficulty::Hard,
                    60,
                    Some(5),
                    Some("went deep"),
                )
                .unwrap();
            assert!(edited.xp_gained > session.xp_gained);

            let concept = db.get_concept(concept_id).unwrap().unwrap();
            assert_eq!(concept.xp, edited.xp_gained);
            assert_eq!(concept.study_minutes, 60);
        }

        #[test]
        fn edit_back_to_original_restores_totals() {
            // idempotent reversal
            let db = setup_db();
            let (_, topic_id, concept_id) = seed_concept(&db);
            let session = log_video(&db, concept_id, 30);
            let before = db.get_concept(concept_id).unwrap().unwrap();

            db.edit_session(
                session.id,
                ActivityType::Teaching,
                Difficulty::Hard,
                90,
                None,
                None,
            )
            .unwrap();
            db.edit_session(
                session.id,
                ActivityType::Video,
                Difficulty::Medium,
                30,
                None,
                None,
            )
            .unwrap();

            let after = db.get_concept(concept_id).unwrap().unwrap();
            assert_eq!(after.xp, before.xp);
            assert!((after.mastery - before.mastery).abs() < aggregate::RECONCILE_EPSILON);
            assert_eq!(after.study_minutes, before.study_minutes);

            let topic = db.get_topic(topic_id).unwrap().unwrap();
            assert_eq!(topic.xp, before.xp);
        }

        #[test]
        fn edit_missing_session_fails() {
            let db = setup_db();
            let result = db.edit_session(
                999,
                ActivityType::Video,
                Difficulty::Medium,
                30,
                None,
                None,
            );
            assert!(matches!(
                result,
                Err(EngineError::EntityNotFound { kind: "session", .. })
            ));
        }

        #[test]
        fn delete_session_reverses_contribution() {
            let db = setup_db();
            let (subject_id, _, concept_id) = seed_concept(&db);
            let session = log_video(&db, concept_id, 30);
            db.log_session(
                OwnerKind::Concept,
                concept_id,
                ActivityType::Book,
                Difficulty::Easy,
                20,
                None,
                None,
                fixed_now(),
            )
            .unwrap();

            assert!(db.delete_session(session.id).unwrap());

            let concept = db.get_concept(concept_id).unwrap().unwrap();
            assert_eq!(concept.study_minutes, 20);
            let subject = db.get_subject(subject_id).unwrap().unwrap();
            assert_eq!(subject.total_xp, concept.xp);
        }

        #[test]
        fn delete_session_not_found() {
            let db = setup_db();
            assert!(!db.delete_session(999).unwrap());
        }

        #[test]
        fn delete_session_keeps_phase_sticky() {
            let db = setup_db();
            let (_, _, concept_id) = seed_concept(&db);
            let video = log_video(&db, concept_id, 30);
            db.log_session(
                OwnerKind::Concept,
                concept_id,
                ActivityType::Book,
                Difficulty::Medium,
                20,
                None,
                None,
                fixed_now(),
            )
            .unwrap();
            assert_eq!(
                db.get_concept(concept_id).unwrap().unwrap().phase,
                Phase::Consolidation
            );

            db.delete_session(video.id).unwrap();
            // Progress is one-way; the phase stays advanced
            assert_eq!(
                db.get_concept(concept_id).unwrap().unwrap().phase,
                Phase::Consolidation
            );
        }

        #[test]
        fn aggregates_match_full_recompute_after_mutations() {
            // incremental maintenance equals recompute from children
            let db = setup_db();
            let (subject_id, topic_id, c1) = seed_concept(&db);
            let c2 = db.add_concept(topic_id, "Lifetimes", None).unwrap();

            let s1 = log_video(&db, c1, 30);
            log_video(&db, c2, 45);
            db.edit_session(s1.id, ActivityType::Recall, Difficulty::Hard, 25, None, None)
                .unwrap();

            let concepts = db.list_concepts(topic_id).unwrap();
            let expected_mastery: f64 =
                concepts.iter().map(|c| c.mastery).sum::<f64>() / concepts.len() as f64;
            let expected_xp: i64 = concepts.iter().map(|c| c.xp).sum();

            let topic = db.get_topic(topic_id).unwrap().unwrap();
            assert!((topic.mastery - expected_mastery).abs() < aggregate::RECONCILE_EPSILON);
            assert_eq!(topic.xp, expected_xp);

            let subject = db.get_subject(subject_id).unwrap().unwrap();
            assert_eq!(subject.total_xp, topic.xp);
            assert!((subject.average_mastery - topic.mastery).abs() < aggregate::RECONCILE_EPSILON);
        }
    }

    mod phase_progression_tests {
        use super::*;

        #[test]
        fn sessions_tick_the_current_checklist() {
            let db = setup_db();
            let (_, _, concept_id) = seed_concept(&db);
            log_video(&db, concept_id, 30);

            let checklist = db.get_checklist(concept_id, Phase::Initial).unwrap();
            let video_slot = checklist
                .iter()
                .find(|s| s.activity == ActivityType::Video)
                .unwrap();
            assert!(video_slot.completed);
        }

        #[test]
        fn checklist_tick_refreshes_ancestor_last_studied() {
            let db = setup_db();
            let (subject_id, topic_id, concept_id) = seed_concept(&db);
            db.complete_phase_activity(concept_id, "video", None, fixed_now())
                .unwrap();

            let concept = db.get_concept(concept_id).unwrap().unwrap();
            let topic = db.get_topic(topic_id).unwrap().unwrap();
            let subject = db.get_subject(subject_id).unwrap().unwrap();
            assert_eq!(topic.last_studied, concept.last_studied);
            assert_eq!(subject.last_studied, concept.last_studied);
        }

        #[test]
        fn completing_initial_checklist_advances_phase() {
            // phases move strictly initial -> consolidation
            let db = setup_db();
            let (_, _, concept_id) = seed_concept(&db);
            log_video(&db, concept_id, 30);
            assert_eq!(
                db.get_concept(concept_id).unwrap().unwrap().phase,
                Phase::Initial
            );

            db.log_session(
                OwnerKind::Concept,
                concept_id,
                ActivityType::Book,
                Difficulty::Medium,
                20,
                None,
                None,
                fixed_now(),
            )
            .unwrap();
            assert_eq!(
                db.get_concept(concept_id).unwrap().unwrap().phase,
                Phase::Consolidation
            );
        }

        #[test]
        fn mastery_activities_do_not_skip_phases() {
            // Teaching and practice belong to the mastery checklist;
            // logging them from initial never jumps the concept there
            let db = setup_db();
            let (_, _, concept_id) = seed_concept(&db);
            for _ in 0..5 {
                db.log_session(
                    OwnerKind::Concept,
                    concept_id,
                    ActivityType::Teaching,
                    Difficulty::Hard,
                    30,
                    None,
                    None,
                    fixed_now(),
                )
                .unwrap();
            }
            assert_eq!(
                db.get_concept(concept_id).unwrap().unwrap().phase,
                Phase::Initial
            );
        }

        #[test]
        fn full_run_reaches_terminal_mastery() {
            let db = setup_db();
            let (_, _, concept_id) = seed_concept(&db);
            let run = [
                ActivityType::Video,
                ActivityType::Book,
                ActivityType::Recall,
                ActivityType::Questions,
                ActivityType::Mindmap,
                ActivityType::Teaching,
                ActivityType::Practice,
            ];
            for activity in run {
                db.log_session(
                    OwnerKind::Concept,
                    concept_id,
                    activity,
                    Difficulty::Medium,
                    20,
                    None,
                    None,
                    fixed_now(),
                )
                .unwrap();
            }
            let concept = db.get_concept(concept_id).unwrap().unwrap();
            assert_eq!(concept.phase, Phase::Mastery);
        }

        #[test]
        fn complete_phase_activity_by_name() {
            let db = setup_db();
            let (_, _, concept_id) = seed_concept(&db);

            let advanced = db
                .complete_phase_activity(concept_id, "video", Some("done"), fixed_now())
                .unwrap();
            assert!(advanced.is_none());

            let advanced = db
                .complete_phase_activity(concept_id, "book", None, fixed_now())
                .unwrap();
            assert_eq!(advanced, Some(Phase::Consolidation));
        }

        #[test]
        fn unknown_activity_name_fails_cleanly() {
            let db = setup_db();
            let (_, _, concept_id) = seed_concept(&db);
            let result = db.complete_phase_activity(concept_id, "osmosis", None, fixed_now());
            assert!(matches!(result, Err(EngineError::UnknownActivityType(_))));

            // No partial mutation: checklist untouched
            let checklist = db.get_checklist(concept_id, Phase::Initial).unwrap();
            assert!(checklist.iter().all(|s| !s.completed));
        }
    }

    mod review_tests {
        use super::*;

        #[test]
        fn review_appends_log_and_moves_due_date() {
            let db = setup_db();
            let (_, _, concept_id) = seed_concept(&db);
            log_video(&db, concept_id, 30);

            let scheduled = db
                .record_review(
                    OwnerKind::Concept,
                    concept_id,
                    4,
                    Some("solid recall"),
                    fixed_now(),
                )
                .unwrap();
            assert_eq!(scheduled.interval_days, 2);

            let concept = db.get_concept(concept_id).unwrap().unwrap();
            assert_eq!(concept.interval_days, 2);
            assert_eq!(
                concept.next_review.as_deref(),
                Some(scheduled.next_review.to_rfc3339().as_str())
            );

            let logs = db.list_review_logs(OwnerKind::Concept, concept_id).unwrap();
            assert_eq!(logs.len(), 1);
            assert_eq!(logs[0].rating, 4);
            assert_eq!(logs[0].notes.as_deref(), Some("solid recall"));
        }

        #[test]
        fn intervals_chain_across_reviews() {
            // through the persistence layer
            let db = setup_db();
            let (_, _, concept_id) = seed_concept(&db);
            log_video(&db, concept_id, 30);

            let mut last_interval = 0;
            for _ in 0..4 {
                let scheduled = db
                    .record_review(OwnerKind::Concept, concept_id, 4, None, fixed_now())
                    .unwrap();
                assert!(scheduled.interval_days >= last_interval);
                last_interval = scheduled.interval_days;
            }
            assert_eq!(last_interval, 16);
        }

        #[test]
        fn failed_recall_resets_the_chain() {
            let db = setup_db();
            let (_, _, concept_id) = seed_concept(&db);
            log_video(&db, concept_id, 30);

            let confident = db
                .record_review(OwnerKind::Concept, concept_id, 5, None, fixed_now())
                .unwrap();
            let failed = db
                .record_review(OwnerKind::Concept, concept_id, 1, None, fixed_now())
                .unwrap();
            assert!(failed.interval_days <= confident.interval_days);
            assert_eq!(failed.interval_days, 1);
        }

        #[test]
        fn invalid_rating_appends_nothing() {
            let db = setup_db();
            let (_, _, concept_id) = seed_concept(&db);
            log_video(&db, concept_id, 30);

            let result = db.record_review(OwnerKind::Concept, concept_id, 0, None, fixed_now());
            assert!(matches!(result, Err(EngineError::InvalidReviewInput(_))));
            assert!(db
                .list_review_logs(OwnerKind::Concept, concept_id)
                .unwrap()
                .is_empty());
        }

        #[test]
        fn reviews_work_on_habit_topics() {
            let db = setup_db();
            let subject_id = db.add_subject("Languages", None).unwrap();
            let topic_id = db
                .add_topic(subject_id, "Daily flashcards", None, true)
                .unwrap();
            db.log_session(
                OwnerKind::Topic,
                topic_id,
                ActivityType::Recall,
                Difficulty::Medium,
                15,
                None,
                None,
                fixed_now(),
            )
            .unwrap();

            let scheduled = db
                .record_review(OwnerKind::Topic, topic_id, 5, None, fixed_now())
                .unwrap();
            let topic = db.get_topic(topic_id).unwrap().unwrap();
            assert_eq!(topic.interval_days, scheduled.interval_days);
        }
    }

    mod queue_tests {
        use super::*;

        #[test]
        fn empty_db_gives_empty_queue_and_zero_rate() {
            // Spec scenario: no studied items is not an error
            let db = setup_db();
            let report = db.review_queue(None, None, fixed_now()).unwrap();
            assert!(report.items.is_empty());
            assert_eq!(report.completion_rate, 0.0);
        }

        #[test]
        fn unstudied_items_never_appear() {
            let db = setup_db();
            let (_, _, concept_id) = seed_concept(&db);
            // Scheduled by hand but never studied
            db.conn
                .execute(
                    "UPDATE concepts SET next_review = ?1 WHERE id = ?2",
                    params!["2026-03-09T00:00:00+00:00", concept_id],
                )
                .unwrap();

            let report = db.review_queue(None, None, fixed_now()).unwrap();
            assert!(report.items.is_empty());
        }

        #[test]
        fn studied_scheduled_items_bucket_correctly() {
            let db = setup_db();
            let (_, _, concept_id) = seed_concept(&db);
            log_video(&db, concept_id, 30);
            // Rating 3 keeps the 1-day default: due tomorrow
            db.record_review(OwnerKind::Concept, concept_id, 3, None, fixed_now())
                .unwrap();

            let report = db.review_queue(None, None, fixed_now()).unwrap();
            assert_eq!(report.items.len(), 1);
            assert_eq!(report.counts.upcoming, 1);
            assert_eq!(report.counts.overdue, 0);
        }

        #[test]
        fn overdue_items_counted_and_filterable() {
            let db = setup_db();
            let (_, _, concept_id) = seed_concept(&db);
            log_video(&db, concept_id, 30);
            // Review far in the past leaves the item overdue now
            let past: DateTime<Utc> = "2026-01-01T09:00:00Z".parse().unwrap();
            db.record_review(OwnerKind::Concept, concept_id, 3, None, past)
                .unwrap();

            let report = db.review_queue(None, None, fixed_now()).unwrap();
            assert_eq!(report.counts.overdue, 1);

            let filtered = db
                .review_queue(Some(Bucket::Overdue), None, fixed_now())
                .unwrap();
            assert_eq!(filtered.items.len(), 1);

            let searched = db
                .review_queue(Some(Bucket::Overdue), Some("borrow"), fixed_now())
                .unwrap();
            assert_eq!(searched.items.len(), 1);

            let missed = db
                .review_queue(Some(Bucket::Overdue), Some("lifetimes"), fixed_now())
                .unwrap();
            assert!(missed.items.is_empty());
        }

        #[test]
        fn completion_rate_counts_todays_reviews() {
            let db = setup_db();
            let (_, topic_id, concept_id) = seed_concept(&db);
            let c2 = db.add_concept(topic_id, "Lifetimes", None).unwrap();
            log_video(&db, concept_id, 30);
            log_video(&db, c2, 30);

            let past: DateTime<Utc> = "2026-01-01T09:00:00Z".parse().unwrap();
            db.record_review(OwnerKind::Concept, concept_id, 3, None, past)
                .unwrap();
            db.record_review(OwnerKind::Concept, c2, 3, None, past).unwrap();

            // Review one of the two overdue items today; its log entry
            // counts even though the item itself is no longer due
            db.record_review(OwnerKind::Concept, concept_id, 4, None, fixed_now())
                .unwrap();

            let report = db.review_queue(None, None, fixed_now()).unwrap();
            assert_eq!(report.counts.overdue, 1);
            // 1 reviewed today / 1 still due
            assert_eq!(report.completion_rate, 100.0);
        }

        #[test]
        fn next_due_picks_from_due_items_only() {
            let db = setup_db();
            let (_, _, concept_id) = seed_concept(&db);
            log_video(&db, concept_id, 30);
            let past: DateTime<Utc> = "2026-01-01T09:00:00Z".parse().unwrap();
            db.record_review(OwnerKind::Concept, concept_id, 3, None, past)
                .unwrap();

            let pick = db.next_due(fixed_now()).unwrap().unwrap();
            assert_eq!(pick.owner_id, concept_id);
        }

        #[test]
        fn next_due_none_when_nothing_due() {
            let db = setup_db();
            assert!(db.next_due(fixed_now()).unwrap().is_none());
        }
    }

    mod recommend_tests {
        use super::*;

        #[test]
        fn fresh_concept_gets_foundational_recommendation() {
            let db = setup_db();
            let (_, _, concept_id) = seed_concept(&db);
            let rec = db.recommend_for(concept_id, fixed_now()).unwrap();
            assert_eq!(rec.activity, ActivityType::Video);
        }

        #[test]
        fn snapshot_reflects_logged_sessions() {
            let db = setup_db();
            let (_, _, concept_id) = seed_concept(&db);
            log_video(&db, concept_id, 30);
            db.log_session(
                OwnerKind::Concept,
                concept_id,
                ActivityType::Video,
                Difficulty::Medium,
                20,
                Some(4),
                None,
                fixed_now(),
            )
            .unwrap();

            let snapshot = db.concept_snapshot(concept_id, fixed_now()).unwrap();
            assert_eq!(snapshot.count(ActivityType::Video), 2);
            assert_eq!(snapshot.avg_rating, 4.0);
            assert_eq!(snapshot.days_since_study, Some(0));
        }

        #[test]
        fn weak_concepts_flags_low_mastery() {
            let db = setup_db();
            let (_, _, concept_id) = seed_concept(&db);
            log_video(&db, concept_id, 10);

            let weak = db.weak_concepts(fixed_now()).unwrap();
            assert_eq!(weak.len(), 1);
            assert!(weak[0]
                .1
                .iter()
                .any(|f| matches!(f, WeakArea::LowMastery { .. })));
        }

        #[test]
        fn unstudied_concepts_not_flagged() {
            let db = setup_db();
            seed_concept(&db);
            assert!(db.weak_concepts(fixed_now()).unwrap().is_empty());
        }
    }

    mod stage_tests {
        use super::*;

        #[test]
        fn set_stage_progress_round_trips() {
            let db = setup_db();
            let subject_id = db.add_subject("Rust", None).unwrap();
            db.set_stage_progress(subject_id, StudyStage::TestingEffect, 60.0)
                .unwrap();

            let stages = db.get_stage_progress(subject_id).unwrap();
            let testing = stages
                .iter()
                .find(|s| s.stage == StudyStage::TestingEffect)
                .unwrap();
            assert_eq!(testing.progress, 60.0);
            assert_eq!(testing.scores.retention, 60.0);
        }

        #[test]
        fn stage_progress_clamps() {
            let db = setup_db();
            let subject_id = db.add_subject("Rust", None).unwrap();
            db.set_stage_progress(subject_id, StudyStage::Teaching, 150.0)
                .unwrap();
            let stages = db.get_stage_progress(subject_id).unwrap();
            let teaching = stages
                .iter()
                .find(|s| s.stage == StudyStage::Teaching)
                .unwrap();
            assert_eq!(teaching.progress, 100.0);
        }

        #[test]
        fn stages_reported_in_framework_order() {
            let db = setup_db();
            let subject_id = db.add_subject("Rust", None).unwrap();
            let stages = db.get_stage_progress(subject_id).unwrap();
            let order: Vec<StudyStage> = stages.iter().map(|s| s.stage).collect();
            assert_eq!(order, StudyStage::ORDER.to_vec());
        }

        #[test]
        fn set_stage_missing_subject_fails() {
            let db = setup_db();
            let result = db.set_stage_progress(999, StudyStage::Teaching, 50.0);
            assert!(matches!(result, Err(EngineError::EntityNotFound { .. })));
        }
    }

    mod stats_tests {
        use super::*;

        #[test]
        fn stats_empty_db() {
            let db = setup_db();
            let stats = db.get_stats(fixed_now()).unwrap();
            assert_eq!(stats.subjects, 0);
            assert_eq!(stats.total_xp, 0);
            assert_eq!(stats.avg_mastery, 0.0);
            assert_eq!(stats.due_now, 0);
        }

        #[test]
        fn stats_counts_everything() {
            let db = setup_db();
            let (_, _, concept_id) = seed_concept(&db);
            log_video(&db, concept_id, 30);
            db.record_review(OwnerKind::Concept, concept_id, 4, None, fixed_now())
                .unwrap();

            let stats = db.get_stats(fixed_now()).unwrap();
            assert_eq!(stats.subjects, 1);
            assert_eq!(stats.topics, 1);
            assert_eq!(stats.concepts, 1);
            assert_eq!(stats.sessions, 1);
            assert_eq!(stats.reviews, 1);
            assert!(stats.total_xp > 0);
            // Rating 4 at the fixed clock pushes the next review out
            assert_eq!(stats.due_now, 0);
        }
    }
}
