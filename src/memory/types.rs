//! Core memory type definitions.
//!
//! Defines [`MemoryKind`] (the eight observation categories), [`MemoryUnit`]
//! (a full item record), [`NewMemory`] (a pre-insert draft), [`Edge`] /
//! [`EdgeRelation`] (the item graph), and [`Event`] (the append-only raw log).

use serde::{Deserialize, Serialize};

/// The eight observation kinds. The kind governs ranking boosts and parts of
/// the aging policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    /// The assistant was corrected — strongest retrieval signal.
    Correction,
    /// An explicit project decision.
    Decision,
    /// A coding convention or style rule.
    Convention,
    /// A bug and how it was fixed.
    BugFix,
    /// A general observation; decays fastest when unused.
    Insight,
    /// A suggestion that was tried and rejected.
    FailedSuggestion,
    /// An approach that proved itself more than once.
    ProvenPattern,
    /// A dependency fact (versions, constraints).
    Dependency,
}

impl MemoryKind {
    pub const ALL: [MemoryKind; 8] = [
        Self::Correction,
        Self::Decision,
        Self::Convention,
        Self::BugFix,
        Self::Insight,
        Self::FailedSuggestion,
        Self::ProvenPattern,
        Self::Dependency,
    ];

    /// SQL-compatible string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Correction => "correction",
            Self::Decision => "decision",
            Self::Convention => "convention",
            Self::BugFix => "bug_fix",
            Self::Insight => "insight",
            Self::FailedSuggestion => "failed_suggestion",
            Self::ProvenPattern => "proven_pattern",
            Self::Dependency => "dependency",
        }
    }

    /// Ranking multiplier applied by the ranker.
    pub fn boost(&self) -> f64 {
        match self {
            Self::Correction => 1.5,
            Self::Decision => 1.3,
            Self::Convention => 1.2,
            Self::BugFix => 1.1,
            Self::Insight => 1.0,
            Self::FailedSuggestion => 1.0,
            Self::ProvenPattern => 1.2,
            Self::Dependency => 0.8,
        }
    }
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MemoryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Accept both the wire form (CORRECTION) and the storage form (correction).
        match s.to_ascii_lowercase().as_str() {
            "correction" => Ok(Self::Correction),
            "decision" => Ok(Self::Decision),
            "convention" => Ok(Self::Convention),
            "bug_fix" | "bugfix" => Ok(Self::BugFix),
            "insight" => Ok(Self::Insight),
            "failed_suggestion" => Ok(Self::FailedSuggestion),
            "proven_pattern" => Ok(Self::ProvenPattern),
            "dependency" => Ok(Self::Dependency),
            _ => Err(format!("unknown memory kind: {s}")),
        }
    }
}

/// A persisted item, matching the `memory_units` table schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryUnit {
    /// UUID v7 (time-sortable) primary key.
    pub id: String,
    pub kind: MemoryKind,
    /// Short normalized statement, 1–300 chars. The primary searchable string.
    pub intent: String,
    /// Verb-form restatement, up to 500 chars.
    pub action: String,
    pub reason: Option<String>,
    pub impact: Option<String>,
    /// Defaults to the sentinel "unknown".
    pub outcome: String,
    /// Repo-relative paths, at most 20.
    pub related_files: Vec<String>,
    /// Short lowercase labels (letters/digits/hyphen/colon).
    pub tags: Vec<String>,
    /// Epoch-ms, set at insertion.
    pub created_at: i64,
    /// Epoch-ms, may be caller-supplied.
    pub timestamp: i64,
    /// Caller-supplied prior belief in [0, 1].
    pub confidence: f64,
    /// Effective weight in [0.1, 1]; mutated by aging.
    pub importance: f64,
    pub access_count: u32,
    pub last_accessed: Option<i64>,
    pub is_active: bool,
    pub superseded_by: Option<String>,
    pub source_event_id: Option<i64>,
}

impl MemoryUnit {
    /// Age in whole days relative to `now` (epoch-ms), based on `timestamp`.
    pub fn age_days(&self, now: i64) -> f64 {
        ((now - self.timestamp).max(0)) as f64 / 86_400_000.0
    }
}

/// A pre-insert draft. `MemoryStore::add` fills in id, created_at, and the
/// reinforcement fields.
#[derive(Debug, Clone, Default)]
pub struct NewMemory {
    pub kind: Option<MemoryKind>,
    pub intent: String,
    pub action: String,
    pub reason: Option<String>,
    pub impact: Option<String>,
    pub outcome: Option<String>,
    pub related_files: Vec<String>,
    pub tags: Vec<String>,
    /// Caller-supplied timestamp (epoch-ms); defaults to now.
    pub timestamp: Option<i64>,
    pub confidence: Option<f64>,
    pub importance: Option<f64>,
    pub source_event_id: Option<i64>,
}

impl NewMemory {
    pub fn new(kind: MemoryKind, intent: impl Into<String>) -> Self {
        Self {
            kind: Some(kind),
            intent: intent.into(),
            ..Default::default()
        }
    }
}

/// Relation label on a directed edge between two items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeRelation {
    RelatedTo,
    SupersededBy,
    ReplacedBy,
    CausedBy,
    Contradicts,
}

impl EdgeRelation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RelatedTo => "related_to",
            Self::SupersededBy => "superseded_by",
            Self::ReplacedBy => "replaced_by",
            Self::CausedBy => "caused_by",
            Self::Contradicts => "contradicts",
        }
    }
}

impl std::fmt::Display for EdgeRelation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EdgeRelation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "related_to" => Ok(Self::RelatedTo),
            "superseded_by" => Ok(Self::SupersededBy),
            "replaced_by" => Ok(Self::ReplacedBy),
            "caused_by" => Ok(Self::CausedBy),
            "contradicts" => Ok(Self::Contradicts),
            _ => Err(format!("unknown edge relation: {s}")),
        }
    }
}

/// A directed edge. The triple (source, target, relation) is unique.
/// Edges survive item deactivation — the graph stays readable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub source_id: String,
    pub target_id: String,
    pub relation: EdgeRelation,
    pub weight: f64,
    pub timestamp: i64,
}

/// A row in the append-only raw input log. Never mutated after insertion
/// except the `processed` flag transitioning 0 → 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub event_type: String,
    pub source: String,
    pub content: String,
    pub diff: Option<String>,
    pub file: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub timestamp: i64,
    pub processed: bool,
}
