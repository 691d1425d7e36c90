//! The review queue: due-date bucketing, ordering and filtering over
//! scheduled topics and concepts.
//!
//! Items are a query-time projection; only entities with at least one
//! study session and a scheduled `next_review` appear here.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;

use crate::models::OwnerKind;

/// Days ahead (after today) still shown as "upcoming".
pub const UPCOMING_WINDOW_DAYS: i64 = 7;

#[derive(Debug, Clone, Serialize)]
pub struct ReviewItem {
    pub owner_kind: OwnerKind,
    pub owner_id: i64,
    pub subject_id: i64,
    pub topic_id: i64,
    pub name: String,
    pub due: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Bucket {
    Overdue,
    Today,
    Upcoming,
    /// Due beyond the upcoming window; kept in the unfiltered list but
    /// outside every near-term bucket.
    Later,
}

impl Bucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Overdue => "overdue",
            Bucket::Today => "today",
            Bucket::Upcoming => "upcoming",
            Bucket::Later => "later",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "overdue" => Some(Bucket::Overdue),
            "today" => Some(Bucket::Today),
            "upcoming" => Some(Bucket::Upcoming),
            "later" => Some(Bucket::Later),
            _ => None,
        }
    }
}

fn due_date(item: &ReviewItem) -> Option<NaiveDate> {
    let raw = item.due.as_deref()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).date_naive())
}

/// Classify a due date against today. Buckets partition the timeline:
/// strictly-before, equal, within the next window, beyond it.
pub fn classify(due: NaiveDate, today: NaiveDate) -> Bucket {
    if due < today {
        Bucket::Overdue
    } else if due == today {
        Bucket::Today
    } else if due <= today + Duration::days(UPCOMING_WINDOW_DAYS) {
        Bucket::Upcoming
    } else {
        Bucket::Later
    }
}

pub fn bucket_of(item: &ReviewItem, now: DateTime<Utc>) -> Option<Bucket> {
    due_date(item).map(|due| classify(due, now.date_naive()))
}

/// Ascending by due date; items without a parseable due date sort last.
pub fn sort_queue(items: &mut [ReviewItem]) {
    items.sort_by(|a, b| match (due_date(a), due_date(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.name.cmp(&b.name),
    });
}

/// Bucket and name filters compose: the search narrows whatever bucket
/// is active. Search is a case-insensitive substring match.
pub fn filter_queue(
    items: &[ReviewItem],
    bucket: Option<Bucket>,
    search: Option<&str>,
    now: DateTime<Utc>,
) -> Vec<ReviewItem> {
    let needle = search.map(|s| s.to_lowercase());
    items
        .iter()
        .filter(|item| match bucket {
            Some(wanted) => bucket_of(item, now) == Some(wanted),
            None => true,
        })
        .filter(|item| match &needle {
            Some(n) => item.name.to_lowercase().contains(n),
            None => true,
        })
        .cloned()
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QueueCounts {
    pub overdue: usize,
    pub today: usize,
    pub upcoming: usize,
}

pub fn count_buckets(items: &[ReviewItem], now: DateTime<Utc>) -> QueueCounts {
    let mut counts = QueueCounts {
        overdue: 0,
        today: 0,
        upcoming: 0,
    };
    for item in items {
        match bucket_of(item, now) {
            Some(Bucket::Overdue) => counts.overdue += 1,
            Some(Bucket::Today) => counts.today += 1,
            Some(Bucket::Upcoming) => counts.upcoming += 1,
            _ => {}
        }
    }
    counts
}

/// Percentage of due items (overdue + today) already reviewed today.
/// No due items means 0%, never a division by zero.
pub fn completion_rate(reviewed_today: usize, counts: QueueCounts) -> f64 {
    let due = counts.overdue + counts.today;
    if due == 0 {
        0.0
    } else {
        (reviewed_today as f64 / due as f64) * 100.0
    }
}
