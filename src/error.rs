use thiserror::Error;

/// Errors raised by the progress/scheduling engine.
///
/// All variants are synchronous and non-retryable: they indicate bad
/// caller input or corrupted stored state, never a transient condition.
/// Every operation either fully succeeds or fails with no partial
/// mutation.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown activity or difficulty in scoring table: {0}")]
    InvalidActivityConfiguration(String),

    #[error("unknown activity type: {0}")]
    UnknownActivityType(String),

    #[error("invalid review input: {0}")]
    InvalidReviewInput(String),

    #[error("{kind} not found: id={id}")]
    EntityNotFound { kind: &'static str, id: i64 },

    #[error("aggregate drift on {field}: incremental={incremental}, recomputed={recomputed}")]
    AggregationInconsistency {
        field: &'static str,
        incremental: f64,
        recomputed: f64,
    },

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}
