//! Converts a logged study activity into XP and mastery deltas.
//!
//! Pure and deterministic: the same inputs always produce the same
//! score, which is what lets session edits reverse their original
//! contribution exactly.

use crate::error::EngineError;
use crate::models::{ActivityType, Difficulty};

/// Base multiplier per activity type. Heavier-engagement activities
/// (teaching, active recall) earn more per minute than passive ones.
const ACTIVITY_MULTIPLIERS: &[(ActivityType, f64)] = &[
    (ActivityType::Video, 1.0),
    (ActivityType::Book, 1.2),
    (ActivityType::Recall, 1.5),
    (ActivityType::Mindmap, 1.3),
    (ActivityType::Questions, 1.4),
    (ActivityType::Teaching, 1.6),
    (ActivityType::Study, 1.0),
    (ActivityType::Practice, 1.4),
];

const DIFFICULTY_MULTIPLIERS: &[(Difficulty, f64)] = &[
    (Difficulty::Easy, 0.8),
    (Difficulty::Medium, 1.0),
    (Difficulty::Hard, 1.3),
];

// Minutes of medium-difficulty study worth one full mastery point at
// mastery zero.
const MINUTES_PER_MASTERY_POINT: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score {
    pub xp: i64,
    pub mastery_gained: f64,
}

fn activity_multiplier(activity: ActivityType) -> Result<f64, EngineError> {
    ACTIVITY_MULTIPLIERS
        .iter()
        .find(|(a, _)| *a == activity)
        .map(|(_, m)| *m)
        .ok_or_else(|| EngineError::InvalidActivityConfiguration(activity.as_str().to_string()))
}

fn difficulty_multiplier(difficulty: Difficulty) -> Result<f64, EngineError> {
    DIFFICULTY_MULTIPLIERS
        .iter()
        .find(|(d, _)| *d == difficulty)
        .map(|(_, m)| *m)
        .ok_or_else(|| EngineError::InvalidActivityConfiguration(difficulty.as_str().to_string()))
}

/// Score a study session.
///
/// XP scales linearly with duration. Mastery gain scales with duration
/// too but diminishes as `current_mastery` approaches 100; the caller
/// clamps the resulting level into [0, 100].
pub fn score_session(
    activity: ActivityType,
    difficulty: Difficulty,
    duration_minutes: i64,
    current_mastery: f64,
) -> Result<Score, EngineError> {
    let base = activity_multiplier(activity)?;
    let diff = difficulty_multiplier(difficulty)?;

    let minutes = duration_minutes.max(0) as f64;
    let xp = (minutes * base * diff).round() as i64;

    let headroom = (1.0 - current_mastery.clamp(0.0, 100.0) / 100.0).max(0.0);
    let mastery_gained = (minutes / MINUTES_PER_MASTERY_POINT) * base * diff * headroom;

    Ok(Score { xp, mastery_gained })
}
