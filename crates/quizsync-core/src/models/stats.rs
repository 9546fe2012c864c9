use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Per-topic answer counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicCount {
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub correct: u32,
}

impl TopicCount {
    pub fn new(total: u32, correct: u32) -> Self {
        Self { total, correct }
    }

    /// Fraction of correct answers, zero when nothing was answered.
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            f64::from(self.correct) / f64::from(self.total)
        }
    }
}

/// Summary of one completed quiz session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSummary {
    pub questions: u32,
    pub correct: u32,

    /// Breakdown by topic/subtopic.
    #[serde(default)]
    pub topics: BTreeMap<String, TopicCount>,

    #[serde(default)]
    pub finished_at: i64,
}

/// Per-user accumulator of cross-session totals.
///
/// Mutated only through the remote store's transactional update path;
/// derived area tags are recomputed from the breakdown on every update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
    #[serde(default)]
    pub session_count: u32,
    #[serde(default)]
    pub question_count: u32,
    #[serde(default)]
    pub correct_count: u32,

    #[serde(default)]
    pub topics: BTreeMap<String, TopicCount>,

    /// Topics with low accuracy over a minimum sample size.
    #[serde(default)]
    pub weak_areas: BTreeSet<String>,

    /// Topics with high accuracy over a larger minimum sample size.
    #[serde(default)]
    pub strong_areas: BTreeSet<String>,

    #[serde(default)]
    pub last_updated: i64,
}
