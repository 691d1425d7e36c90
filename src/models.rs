use serde::{Deserialize, Serialize};

use crate::phase::Phase;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subject {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    // Derived summary, recomputed from topics on every descendant write
    pub total_xp: i64,
    pub average_mastery: f64,
    pub completed_topics: i64,
    pub total_topics: i64,
    pub last_studied: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    pub id: i64,
    pub subject_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub mastery: f64,
    pub xp: i64,
    pub study_minutes: i64,
    pub last_studied: Option<String>,
    pub next_review: Option<String>,
    pub interval_days: i64,
    // Habit-based topics have no concepts; sessions and reviews attach
    // to the topic directly.
    pub habit: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Concept {
    pub id: i64,
    pub topic_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub mastery: f64,
    pub xp: i64,
    pub study_minutes: i64,
    pub last_studied: Option<String>,
    pub phase: Phase,
    pub next_review: Option<String>,
    pub interval_days: i64,
}

impl Concept {
    pub fn mastery_label(&self) -> &'static str {
        mastery_label(self.mastery)
    }
}

impl Topic {
    pub fn mastery_label(&self) -> &'static str {
        mastery_label(self.mastery)
    }

    /// A topic counts toward its subject's completed count at 80+.
    pub fn is_completed(&self) -> bool {
        self.mastery >= 80.0
    }
}

fn mastery_label(mastery: f64) -> &'static str {
    match mastery {
        m if m < 20.0 => "New",
        m if m < 40.0 => "Learning",
        m if m < 60.0 => "Familiar",
        m if m < 80.0 => "Proficient",
        _ => "Mastered",
    }
}

/// Which table a session or review log hangs off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OwnerKind {
    Topic,
    Concept,
}

impl OwnerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OwnerKind::Topic => "topic",
            OwnerKind::Concept => "concept",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "topic" | "t" => Some(OwnerKind::Topic),
            "concept" | "c" => Some(OwnerKind::Concept),
            _ => None,
        }
    }
}

// Study activity types; each carries a base multiplier in the scoring table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivityType {
    Video,
    Book,
    Recall,
    Mindmap,
    Questions,
    Teaching,
    Study,
    Practice,
}

impl ActivityType {
    pub const ALL: [ActivityType; 8] = [
        ActivityType::Video,
        ActivityType::Book,
        ActivityType::Recall,
        ActivityType::Mindmap,
        ActivityType::Questions,
        ActivityType::Teaching,
        ActivityType::Study,
        ActivityType::Practice,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::Video => "video",
            ActivityType::Book => "book",
            ActivityType::Recall => "recall",
            ActivityType::Mindmap => "mindmap",
            ActivityType::Questions => "questions",
            ActivityType::Teaching => "teaching",
            ActivityType::Study => "study",
            ActivityType::Practice => "practice",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "video" | "v" => Some(ActivityType::Video),
            "book" | "reading" | "b" => Some(ActivityType::Book),
            "recall" | "r" => Some(ActivityType::Recall),
            "mindmap" | "map" | "m" => Some(ActivityType::Mindmap),
            "questions" | "quiz" | "q" => Some(ActivityType::Questions),
            "teaching" | "teach" => Some(ActivityType::Teaching),
            "study" | "s" => Some(ActivityType::Study),
            "practice" | "p" => Some(ActivityType::Practice),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ActivityType::Video => "Watch a video",
            ActivityType::Book => "Read a book or article",
            ActivityType::Recall => "Active recall",
            ActivityType::Mindmap => "Draw a mind map",
            ActivityType::Questions => "Practice questions",
            ActivityType::Teaching => "Teach it back",
            ActivityType::Study => "Open-ended study",
            ActivityType::Practice => "Hands-on practice",
        }
    }

    /// Foundational activities build first exposure to the material.
    pub fn is_foundational(&self) -> bool {
        matches!(self, ActivityType::Video | ActivityType::Book)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "easy" | "e" => Some(Difficulty::Easy),
            "medium" | "m" => Some(Difficulty::Medium),
            "hard" | "h" => Some(Difficulty::Hard),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

// A logged study session; xp/mastery contributions are stored so an
// edit or delete can reverse them exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudySession {
    pub id: i64,
    pub owner_kind: OwnerKind,
    pub owner_id: i64,
    pub date: String,
    pub duration_minutes: i64,
    pub activity: ActivityType,
    pub difficulty: Difficulty,
    pub rating: Option<i64>,
    pub notes: Option<String>,
    pub xp_gained: i64,
    pub mastery_gained: f64,
}

// Append-only review audit entry; never edited
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewLog {
    pub id: i64,
    pub owner_kind: OwnerKind,
    pub owner_id: i64,
    pub reviewed_at: String,
    pub rating: i64,
    pub interval_days: i64,
    pub notes: Option<String>,
}

// One slot of a concept's per-phase activity checklist
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseActivity {
    pub id: i64,
    pub concept_id: i64,
    pub phase: Phase,
    pub activity: ActivityType,
    pub completed: bool,
    pub notes: Option<String>,
    pub completed_at: Option<String>,
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
