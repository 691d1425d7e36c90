//! Rolls concept progress up to topics and topic progress up to
//! subjects.
//!
//! Derived fields are never authored directly: `rollup_*` is a pure
//! function of the children, invoked by the db layer after every leaf
//! mutation. Session edits also apply an incremental delta to the
//! owning entity; `reconcile` checks the delta-maintained figure
//! against a full recompute, which is the source of truth.

use crate::error::EngineError;

/// Tolerance when comparing a delta-maintained aggregate against a
/// full recompute; differences below this are float rounding.
pub const RECONCILE_EPSILON: f64 = 1e-6;

/// Progress figures an entity carries directly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Totals {
    pub mastery: f64,
    pub xp: i64,
    pub study_minutes: i64,
}

/// One child's contribution to a rollup.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildTotals {
    pub mastery: f64,
    pub xp: i64,
    pub study_minutes: i64,
    pub last_studied: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rollup {
    pub mastery: f64,
    pub xp: i64,
    pub study_minutes: i64,
    pub last_studied: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubjectSummary {
    pub total_xp: i64,
    pub average_mastery: f64,
    pub completed_topics: i64,
    pub total_topics: i64,
    pub last_studied: Option<String>,
}

/// Aggregate children into a parent: XP and minutes sum, mastery is
/// the plain arithmetic mean, unweighted by study time. No children
/// yields zeros.
pub fn rollup_children(children: &[ChildTotals]) -> Rollup {
    if children.is_empty() {
        return Rollup {
            mastery: 0.0,
            xp: 0,
            study_minutes: 0,
            last_studied: None,
        };
    }

    let mastery =
        children.iter().map(|c| c.mastery).sum::<f64>() / children.len() as f64;
    Rollup {
        mastery: mastery.clamp(0.0, 100.0),
        xp: children.iter().map(|c| c.xp).sum::<i64>().max(0),
        study_minutes: children.iter().map(|c| c.study_minutes).sum::<i64>().max(0),
        last_studied: latest(children),
    }
}

/// Subject summary from its topics; a topic is completed at mastery >= 80.
pub fn rollup_subject(topics: &[ChildTotals]) -> SubjectSummary {
    let rollup = rollup_children(topics);
    SubjectSummary {
        total_xp: rollup.xp,
        average_mastery: rollup.mastery,
        completed_topics: topics.iter().filter(|t| t.mastery >= 80.0).count() as i64,
        total_topics: topics.len() as i64,
        last_studied: rollup.last_studied,
    }
}

// RFC 3339 timestamps in a fixed offset sort lexicographically
fn latest(children: &[ChildTotals]) -> Option<String> {
    children
        .iter()
        .filter_map(|c| c.last_studied.as_deref())
        .max()
        .map(|s| s.to_string())
}

/// One session's contribution to its owner's totals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contribution {
    pub xp: i64,
    pub mastery: f64,
    pub minutes: i64,
}

/// Reverse `old` and apply `new` on an owner's totals.
///
/// Pass `old: None` for a fresh session, `new: None` for a delete.
/// Mastery clamps into [0, 100]; XP and minutes floor at zero even if
/// a negative delta would otherwise underflow.
pub fn apply_delta(totals: Totals, old: Option<Contribution>, new: Option<Contribution>) -> Totals {
    let old = old.unwrap_or(Contribution {
        xp: 0,
        mastery: 0.0,
        minutes: 0,
    });
    let new = new.unwrap_or(Contribution {
        xp: 0,
        mastery: 0.0,
        minutes: 0,
    });

    Totals {
        mastery: (totals.mastery - old.mastery + new.mastery).clamp(0.0, 100.0),
        xp: (totals.xp - old.xp + new.xp).max(0),
        study_minutes: (totals.study_minutes - old.minutes + new.minutes).max(0),
    }
}

/// Fail when a delta-maintained aggregate has drifted from the full
/// recompute beyond rounding tolerance.
pub fn reconcile(
    field: &'static str,
    incremental: f64,
    recomputed: f64,
) -> Result<(), EngineError> {
    if (incremental - recomputed).abs() > RECONCILE_EPSILON {
        return Err(EngineError::AggregationInconsistency {
            field,
            incremental,
            recomputed,
        });
    }
    Ok(())
}
