//! Aggregate-statistics math, kept pure so it can run inside the remote
//! store's transactional update (which may invoke it more than once).

use crate::models::{AggregateStats, SessionSummary, TopicCount};
use std::collections::{BTreeMap, BTreeSet};

/// A topic below this accuracy is a weak area...
pub const WEAK_ACCURACY_THRESHOLD: f64 = 0.50;
/// ...once at least this many questions were answered in it.
pub const WEAK_MIN_SAMPLES: u32 = 5;

/// A topic at or above this accuracy is a strong area...
pub const STRONG_ACCURACY_THRESHOLD: f64 = 0.80;
/// ...requiring a larger sample before the tag is awarded.
pub const STRONG_MIN_SAMPLES: u32 = 10;

/// Fold one finished session into the accumulator.
///
/// Pure function of its inputs: no clock access, no I/O. Area tags are
/// recomputed from scratch over the updated breakdown rather than patched.
pub fn apply_session(current: Option<AggregateStats>, summary: &SessionSummary) -> AggregateStats {
    let mut stats = current.unwrap_or_default();

    stats.session_count += 1;
    stats.question_count += summary.questions;
    stats.correct_count += summary.correct;

    for (topic, count) in &summary.topics {
        let entry = stats.topics.entry(topic.clone()).or_default();
        entry.total += count.total;
        entry.correct += count.correct;
    }

    let (weak, strong) = classify_areas(&stats.topics);
    stats.weak_areas = weak;
    stats.strong_areas = strong;
    stats
}

/// Recompute weak/strong area tags over a per-topic breakdown.
pub fn classify_areas(
    topics: &BTreeMap<String, TopicCount>,
) -> (BTreeSet<String>, BTreeSet<String>) {
    let mut weak = BTreeSet::new();
    let mut strong = BTreeSet::new();

    for (topic, count) in topics {
        let accuracy = count.accuracy();
        if count.total >= WEAK_MIN_SAMPLES && accuracy < WEAK_ACCURACY_THRESHOLD {
            weak.insert(topic.clone());
        }
        if count.total >= STRONG_MIN_SAMPLES && accuracy >= STRONG_ACCURACY_THRESHOLD {
            strong.insert(topic.clone());
        }
    }

    (weak, strong)
}
