//! Re-scoring of fused candidates.
//!
//! Every boost is a multiplier on the fusion score: kind, access history,
//! recency, file affinity, the inferred working mode, and decayed importance.
//! The sort is stable with the storage tie-break so results are deterministic.

use crate::memory::aging;
use crate::memory::search::{sort_candidates, Candidate};
use crate::memory::store::now_ms;
use crate::memory::types::{MemoryKind, MemoryUnit};

/// What the caller appears to be doing, inferred from the query text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionMode {
    Debugging,
    Refactoring,
    Review,
    Coding,
}

impl ActionMode {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Debugging => "debugging",
            Self::Refactoring => "refactoring",
            Self::Review => "review",
            Self::Coding => "coding",
        }
    }

    /// Extra multiplier this mode grants a kind.
    fn kind_multiplier(&self, kind: MemoryKind) -> f64 {
        match (self, kind) {
            (Self::Debugging, MemoryKind::BugFix) => 1.4,
            (Self::Debugging, MemoryKind::Correction) => 1.1,
            (Self::Refactoring, MemoryKind::Convention) => 1.3,
            (Self::Refactoring, MemoryKind::ProvenPattern) => 1.2,
            (Self::Review, MemoryKind::Correction) => 1.2,
            (Self::Review, MemoryKind::Decision) => 1.1,
            (Self::Coding, MemoryKind::Convention) => 1.2,
            (Self::Coding, MemoryKind::Decision) => 1.1,
            _ => 1.0,
        }
    }
}

const DEBUGGING_WORDS: &[&str] = &[
    "fix", "bug", "crash", "error", "broken", "issue", "regression",
];
const REFACTORING_WORDS: &[&str] = &["refactor", "rewrite", "restructure", "clean"];
const REVIEW_WORDS: &[&str] = &["review", "audit", "check"];

/// Infer the working mode from the raw query.
pub fn infer_mode(query: &str) -> ActionMode {
    let lower = query.to_lowercase();
    let has_any = |words: &[&str]| {
        lower
            .split(|c: char| !c.is_alphanumeric())
            .any(|w| words.contains(&w))
    };
    if has_any(DEBUGGING_WORDS) {
        ActionMode::Debugging
    } else if has_any(REFACTORING_WORDS) {
        ActionMode::Refactoring
    } else if has_any(REVIEW_WORDS) {
        ActionMode::Review
    } else {
        ActionMode::Coding
    }
}

/// Inputs the ranker needs beyond the candidates themselves.
#[derive(Debug, Clone)]
pub struct RankContext<'a> {
    pub current_file: Option<&'a str>,
    pub mode: ActionMode,
    pub now: i64,
    pub decay_rate: f64,
}

impl<'a> RankContext<'a> {
    pub fn new(query: &str, current_file: Option<&'a str>, decay_rate: f64) -> Self {
        Self {
            current_file,
            mode: infer_mode(query),
            now: now_ms(),
            decay_rate,
        }
    }
}

/// Multiply each candidate's fused score by the full boost product and
/// re-sort. The fusion score must already be source-weighted.
pub fn rank(mut candidates: Vec<Candidate>, ctx: &RankContext<'_>) -> Vec<Candidate> {
    for candidate in &mut candidates {
        candidate.score *= boost_product(&candidate.unit, ctx);
    }
    sort_candidates(&mut candidates);
    candidates
}

fn boost_product(unit: &MemoryUnit, ctx: &RankContext<'_>) -> f64 {
    unit.kind.boost()
        * access_boost(unit.access_count)
        * recency_boost(unit, ctx.now)
        * file_affinity(unit, ctx.current_file)
        * ctx.mode.kind_multiplier(unit.kind)
        * aging::effective_importance(unit, ctx.now, ctx.decay_rate)
}

fn access_boost(access_count: u32) -> f64 {
    1.0 + 0.1 * access_count as f64
}

fn recency_boost(unit: &MemoryUnit, now: i64) -> f64 {
    let age_days = unit.age_days(now);
    if age_days < 1.0 {
        1.5
    } else if age_days < 7.0 {
        1.2
    } else {
        1.0
    }
}

fn file_affinity(unit: &MemoryUnit, current_file: Option<&str>) -> f64 {
    let Some(current) = current_file else {
        return 1.0;
    };
    let touches = unit
        .related_files
        .iter()
        .any(|f| f.contains(current) || current.contains(f.as_str()));
    if touches {
        1.5
    } else {
        1.0
    }
}
