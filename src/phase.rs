//! Per-concept learning phases and the subject-level study framework.
//!
//! A concept moves through `initial -> consolidation -> mastery`, one
//! phase at a time. Each phase has a fixed checklist of required
//! activities; completing the whole checklist advances the concept
//! exactly one phase. Phases never regress and never skip.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ActivityType, PhaseActivity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Initial,
    Consolidation,
    Mastery,
}

impl Phase {
    pub const ORDER: [Phase; 3] = [Phase::Initial, Phase::Consolidation, Phase::Mastery];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Initial => "initial",
            Phase::Consolidation => "consolidation",
            Phase::Mastery => "mastery",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "initial" => Some(Phase::Initial),
            "consolidation" => Some(Phase::Consolidation),
            "mastery" => Some(Phase::Mastery),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Phase::Initial => "Initial exposure",
            Phase::Consolidation => "Consolidation",
            Phase::Mastery => "Mastery",
        }
    }

    /// The phase after this one; `Mastery` is terminal.
    pub fn next(&self) -> Option<Phase> {
        match self {
            Phase::Initial => Some(Phase::Consolidation),
            Phase::Consolidation => Some(Phase::Mastery),
            Phase::Mastery => None,
        }
    }

    /// Activities that must all be completed to finish this phase.
    pub fn required_activities(&self) -> &'static [ActivityType] {
        match self {
            Phase::Initial => &[ActivityType::Video, ActivityType::Book],
            Phase::Consolidation => &[
                ActivityType::Recall,
                ActivityType::Questions,
                ActivityType::Mindmap,
            ],
            Phase::Mastery => &[ActivityType::Teaching, ActivityType::Practice],
        }
    }
}

/// Fresh, unchecked checklist slots for a phase. The db layer assigns
/// real row ids on insert.
pub fn checklist_for(concept_id: i64, phase: Phase) -> Vec<PhaseActivity> {
    phase
        .required_activities()
        .iter()
        .map(|&activity| PhaseActivity {
            id: 0,
            concept_id,
            phase,
            activity,
            completed: false,
            notes: None,
            completed_at: None,
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityRecorded {
    /// Whether a checklist slot was actually ticked. Activities the
    /// current phase does not require are still valid sessions but
    /// leave the checklist untouched.
    pub slot_completed: bool,
    pub advanced_to: Option<Phase>,
}

/// Mark an activity complete on the current phase's checklist and
/// report whether that finished the phase.
///
/// Only slots belonging to `phase` are considered; completed slots are
/// never re-ticked.
pub fn record_activity(
    phase: Phase,
    checklist: &mut [PhaseActivity],
    activity: ActivityType,
    notes: Option<&str>,
    now: DateTime<Utc>,
) -> ActivityRecorded {
    let mut slot_completed = false;
    if let Some(slot) = checklist
        .iter_mut()
        .find(|s| s.phase == phase && s.activity == activity && !s.completed)
    {
        slot.completed = true;
        slot.notes = notes.map(|n| n.to_string());
        slot.completed_at = Some(now.to_rfc3339());
        slot_completed = true;
    }

    let advanced_to = if slot_completed && phase_complete(phase, checklist) {
        phase.next()
    } else {
        None
    };

    ActivityRecorded {
        slot_completed,
        advanced_to,
    }
}

/// A phase is complete when every required activity has a completed slot.
pub fn phase_complete(phase: Phase, checklist: &[PhaseActivity]) -> bool {
    phase.required_activities().iter().all(|&required| {
        checklist
            .iter()
            .any(|s| s.phase == phase && s.activity == required && s.completed)
    })
}

// === Subject-level study framework ===

/// The five-stage study framework tracked per subject. Stages are
/// independent of concept phases; each holds a 0-100 progress scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StudyStage {
    LearnRecall,
    TestingEffect,
    ReflectionDiagnosis,
    Integration,
    Teaching,
}

impl StudyStage {
    pub const ORDER: [StudyStage; 5] = [
        StudyStage::LearnRecall,
        StudyStage::TestingEffect,
        StudyStage::ReflectionDiagnosis,
        StudyStage::Integration,
        StudyStage::Teaching,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StudyStage::LearnRecall => "learn_recall",
            StudyStage::TestingEffect => "testing_effect",
            StudyStage::ReflectionDiagnosis => "reflection_diagnosis",
            StudyStage::Integration => "integration",
            StudyStage::Teaching => "teaching",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "learn_recall" | "learn" => Some(StudyStage::LearnRecall),
            "testing_effect" | "testing" => Some(StudyStage::TestingEffect),
            "reflection_diagnosis" | "reflection" => Some(StudyStage::ReflectionDiagnosis),
            "integration" => Some(StudyStage::Integration),
            "teaching" => Some(StudyStage::Teaching),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            StudyStage::LearnRecall => "Learn & Recall",
            StudyStage::TestingEffect => "Testing Effect",
            StudyStage::ReflectionDiagnosis => "Reflection & Diagnosis",
            StudyStage::Integration => "Integration",
            StudyStage::Teaching => "Teaching",
        }
    }

    // How strongly this stage's progress translates into each derived
    // score (mastery, retention, clarity).
    fn score_weights(&self) -> (f64, f64, f64) {
        match self {
            StudyStage::LearnRecall => (0.9, 0.7, 0.5),
            StudyStage::TestingEffect => (0.8, 1.0, 0.6),
            StudyStage::ReflectionDiagnosis => (0.7, 0.6, 1.0),
            StudyStage::Integration => (1.0, 0.8, 0.8),
            StudyStage::Teaching => (1.0, 0.9, 1.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StageScores {
    pub mastery: f64,
    pub retention: f64,
    pub clarity: f64,
}

/// Derived scores for a stage at a given progress. Progress is clamped
/// into [0, 100] before weighting; the scores are never authored
/// directly.
pub fn stage_scores(stage: StudyStage, progress: f64) -> StageScores {
    let p = progress.clamp(0.0, 100.0);
    let (wm, wr, wc) = stage.score_weights();
    StageScores {
        mastery: p * wm,
        retention: p * wr,
        clarity: p * wc,
    }
}
