//! Next-best-activity recommendations and weak-area detection.
//!
//! Recommendations come from an ordered rule list evaluated in fixed
//! sequence, first match wins. The order is pedagogical, not
//! arbitrary: foundations before practice, practice before teaching,
//! mind maps as a medium-priority gap filler, active recall as the
//! fallback. Do not reorder the list.

use serde::Serialize;

use crate::models::{ActivityType, Priority};

/// Mastery below this internal 5-point score calls for foundational work.
const LOW_INTERNAL_MASTERY: f64 = 3.0;
/// Internal score at which teaching the material back becomes useful.
const HIGH_INTERNAL_MASTERY: f64 = 4.0;
/// Fewer foundational (video/book) sessions than this counts as "few".
const FEW_FOUNDATIONAL: i64 = 2;
/// Fewer recall + question sessions than this counts as low practice.
const LOW_PRACTICE: i64 = 3;

/// Mastery below this flags a weak area.
pub const WEAK_MASTERY_THRESHOLD: f64 = 70.0;
/// Days without study after which a concept goes stale.
pub const STALE_AFTER_DAYS: i64 = 7;
/// An activity type averaging less mastery gain per session than this
/// is flagged as underperforming.
pub const WEAK_ACTIVITY_AVG_GAIN: f64 = 1.0;

/// A concept's accumulated metrics, assembled by the db layer.
#[derive(Debug, Clone, Serialize)]
pub struct ConceptSnapshot {
    pub mastery: f64,
    /// Mean self-rating across rated sessions, 0 when none.
    pub avg_rating: f64,
    pub days_since_study: Option<i64>,
    pub activity_counts: Vec<(ActivityType, i64)>,
    /// Mean mastery gain per session, by activity type.
    pub activity_avg_gain: Vec<(ActivityType, f64)>,
}

impl ConceptSnapshot {
    pub fn count(&self, activity: ActivityType) -> i64 {
        self.activity_counts
            .iter()
            .find(|(a, _)| *a == activity)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }

    fn foundational_count(&self) -> i64 {
        self.activity_counts
            .iter()
            .filter(|(a, _)| a.is_foundational())
            .map(|(_, n)| n)
            .sum()
    }

    fn practice_count(&self) -> i64 {
        self.count(ActivityType::Recall) + self.count(ActivityType::Questions)
    }

    /// Mastery on the internal 5-point scale used by the rules.
    fn internal_mastery(&self) -> f64 {
        self.mastery / 20.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub activity: ActivityType,
    pub reason: &'static str,
    pub priority: Priority,
    pub estimated_minutes: i64,
}

struct Rule {
    applies: fn(&ConceptSnapshot) -> bool,
    build: fn(&ConceptSnapshot) -> Recommendation,
}

// Ordered rule list; index encodes priority between rules.
const RULES: &[Rule] = &[
    // 1. Low mastery, few foundational activities
    Rule {
        applies: |s| {
            s.internal_mastery() < LOW_INTERNAL_MASTERY && s.foundational_count() < FEW_FOUNDATIONAL
        },
        build: |s| Recommendation {
            activity: if s.count(ActivityType::Video) == 0 {
                ActivityType::Video
            } else {
                ActivityType::Book
            },
            reason: "Mastery is low and foundations are thin; start with source material",
            priority: Priority::High,
            estimated_minutes: 30,
        },
    },
    // 2. Adequate mastery, low recall/question practice
    Rule {
        applies: |s| s.internal_mastery() >= LOW_INTERNAL_MASTERY && s.practice_count() < LOW_PRACTICE,
        build: |s| Recommendation {
            activity: if s.count(ActivityType::Recall) <= s.count(ActivityType::Questions) {
                ActivityType::Recall
            } else {
                ActivityType::Questions
            },
            reason: "You understand the material; lock it in with active practice",
            priority: Priority::High,
            estimated_minutes: 20,
        },
    },
    // 3. High mastery, never taught it back
    Rule {
        applies: |s| {
            s.internal_mastery() >= HIGH_INTERNAL_MASTERY && s.count(ActivityType::Teaching) < 1
        },
        build: |_| Recommendation {
            activity: ActivityType::Teaching,
            reason: "Mastery is high; explaining it back will expose remaining gaps",
            priority: Priority::High,
            estimated_minutes: 25,
        },
    },
    // 4. No mind map yet
    Rule {
        applies: |s| s.count(ActivityType::Mindmap) == 0,
        build: |_| Recommendation {
            activity: ActivityType::Mindmap,
            reason: "No mind map yet; mapping the structure helps retention",
            priority: Priority::Medium,
            estimated_minutes: 20,
        },
    },
];

/// The single prioritized recommendation for a concept.
pub fn recommend(snapshot: &ConceptSnapshot) -> Recommendation {
    for rule in RULES {
        if (rule.applies)(snapshot) {
            return (rule.build)(snapshot);
        }
    }
    // 5. Fallback: nothing specific is missing, keep it fresh
    Recommendation {
        activity: ActivityType::Recall,
        reason: "Keep the material fresh with a quick recall session",
        priority: Priority::High,
        estimated_minutes: 15,
    }
}

/// Independent weak-area flags; every applicable flag is reported, not
/// only the first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum WeakArea {
    LowMastery { mastery: f64 },
    Stale { days: i64 },
    WeakActivity { activity: ActivityType, avg_gain: f64 },
}

impl WeakArea {
    pub fn describe(&self) -> String {
        match self {
            WeakArea::LowMastery { mastery } => {
                format!("mastery below {:.0}% (currently {:.1}%)", WEAK_MASTERY_THRESHOLD, mastery)
            }
            WeakArea::Stale { days } => format!("not studied for {} days", days),
            WeakArea::WeakActivity { activity, avg_gain } => format!(
                "{} sessions average only {:.2} mastery each",
                activity.as_str(),
                avg_gain
            ),
        }
    }
}

pub fn weak_areas(snapshot: &ConceptSnapshot) -> Vec<WeakArea> {
    let mut flags = Vec::new();

    if snapshot.mastery < WEAK_MASTERY_THRESHOLD {
        flags.push(WeakArea::LowMastery {
            mastery: snapshot.mastery,
        });
    }

    if let Some(days) = snapshot.days_since_study {
        if days > STALE_AFTER_DAYS {
            flags.push(WeakArea::Stale { days });
        }
    }

    for &(activity, avg_gain) in &snapshot.activity_avg_gain {
        if avg_gain < WEAK_ACTIVITY_AVG_GAIN {
            flags.push(WeakArea::WeakActivity { activity, avg_gain });
        }
    }

    flags
}
