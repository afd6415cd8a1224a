//! Core data models for the deduplication engine.
//!
//! These types represent the lesson items, pairwise similarity evidence,
//! duplicate groups, and durable resolution state that flow through the
//! analysis and resolution pipeline.

use serde::{Deserialize, Serialize};

/// Structured lesson metadata, normalized at the ingestion boundary.
///
/// Every field is an always-present array of lowercased tags. Historical
/// exports stored some of these as scalars and some as arrays; the import
/// step collapses both shapes into this one so comparison logic never
/// branches on type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemMetadata {
    pub grade_levels: Vec<String>,
    pub themes: Vec<String>,
    pub cultural_tags: Vec<String>,
    pub season_tags: Vec<String>,
    pub ingredients: Vec<String>,
    pub skills: Vec<String>,
}

impl ItemMetadata {
    /// Field values in checklist order, for completeness scoring and the
    /// metadata-only fingerprint.
    pub fn fields(&self) -> [(&'static str, &[String]); 6] {
        [
            ("grade_levels", &self.grade_levels),
            ("themes", &self.themes),
            ("cultural_tags", &self.cultural_tags),
            ("season_tags", &self.season_tags),
            ("ingredients", &self.ingredients),
            ("skills", &self.skills),
        ]
    }
}

/// How an item's fingerprint hash was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HashKind {
    /// SHA-256 over the normalized body text.
    Content,
    /// Fallback hash over the metadata arrays; never satisfies the
    /// exact-match signal.
    MetadataOnly,
}

impl HashKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashKind::Content => "content",
            HashKind::MetadataOnly => "metadata-only",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "metadata-only" => HashKind::MetadataOnly,
            _ => HashKind::Content,
        }
    }
}

/// A live lesson record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub title: String,
    pub body: String,
    pub content_hash: String,
    pub hash_kind: HashKind,
    pub created_at: i64,
    pub updated_at: i64,
    pub metadata: ItemMetadata,
    pub quality_flags: Vec<String>,
    /// Non-empty when the item is linked to an unfinished external workflow
    /// (translation, curriculum review). Resolution defers the whole group.
    pub workflow_state: String,
    pub notes: String,
    /// Residual open map from the source record, kept verbatim.
    pub extra_json: String,
}

/// Which signal produced a pair's similarity score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilaritySignal {
    Exact,
    Embedding,
    Title,
}

impl SimilaritySignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            SimilaritySignal::Exact => "exact",
            SimilaritySignal::Embedding => "embedding",
            SimilaritySignal::Title => "title",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "exact" => SimilaritySignal::Exact,
            "embedding" => SimilaritySignal::Embedding,
            _ => SimilaritySignal::Title,
        }
    }
}

/// A retained pairwise similarity. `item_a < item_b` by id, so each
/// unordered pair is stored exactly once and symmetry holds by
/// construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityPair {
    pub item_a: String,
    pub item_b: String,
    pub score: f64,
    pub signal: SimilaritySignal,
}

/// Duplicate-group category, in categorizer priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroupCategory {
    ExactContent,
    FormattingOnly,
    GradeAdaptations,
    CulturalVariations,
    SeasonalVariations,
    TitleInconsistencies,
    PedagogicalVariations,
    Unclassified,
}

impl GroupCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupCategory::ExactContent => "EXACT_CONTENT",
            GroupCategory::FormattingOnly => "FORMATTING_ONLY",
            GroupCategory::GradeAdaptations => "GRADE_ADAPTATIONS",
            GroupCategory::CulturalVariations => "CULTURAL_VARIATIONS",
            GroupCategory::SeasonalVariations => "SEASONAL_VARIATIONS",
            GroupCategory::TitleInconsistencies => "TITLE_INCONSISTENCIES",
            GroupCategory::PedagogicalVariations => "PEDAGOGICAL_VARIATIONS",
            GroupCategory::Unclassified => "UNCLASSIFIED",
        }
    }
}

/// Recommended handling for a duplicate group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    AutoMerge,
    ManualReview,
    KeepAll,
    SplitGroup,
}

impl RecommendedAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendedAction::AutoMerge => "auto_merge",
            RecommendedAction::ManualReview => "manual_review",
            RecommendedAction::KeepAll => "keep_all",
            RecommendedAction::SplitGroup => "split_group",
        }
    }
}

/// Categorizer confidence in its call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        }
    }
}

/// A member's canonical-scorer breakdown. Rank 0 in the sorted output is
/// the recommended canonical.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedMember {
    pub item_id: String,
    pub score: f64,
    pub recency: f64,
    pub completeness: f64,
    pub grade_coverage: f64,
    pub structure_bonus: f64,
    pub updated_at: i64,
}

/// A finer-grained cluster produced by the split-group pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubGroup {
    pub name: String,
    pub member_ids: Vec<String>,
    pub canonical_id: String,
}

/// A duplicate group as produced by one analysis run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub group_id: String,
    pub run_id: String,
    pub category: GroupCategory,
    pub confidence: Confidence,
    pub action: RecommendedAction,
    /// Member ids, sorted ascending.
    pub member_ids: Vec<String>,
    /// Retained pairwise scores among the members (the similarity
    /// submatrix; discarded pairs are absent).
    pub similarity: Vec<SimilarityPair>,
    /// Recommended canonical id(s): one for most actions, all members for
    /// `keep_all`, one per sub-group for `split_group`.
    pub canonical_ids: Vec<String>,
    pub ranking: Vec<RankedMember>,
    pub insights: Vec<String>,
    pub subgroups: Vec<SubGroup>,
}

/// Immutable record of one executed resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionRecord {
    pub group_id: String,
    pub canonical_id: String,
    pub archived_ids: Vec<String>,
    pub score: f64,
    pub action: String,
    pub resolved_by: String,
    pub notes: String,
    pub created_at: i64,
}

/// Full pre-archive snapshot of a resolved duplicate, retained for undo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedItem {
    pub item: Item,
    pub reason: String,
    pub canonical_id: String,
    pub group_id: String,
    pub archived_at: i64,
}

/// Outcome status for one unit of a mutating command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Succeeded,
    Skipped,
    Failed,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Succeeded => "succeeded",
            OutcomeStatus::Skipped => "skipped",
            OutcomeStatus::Failed => "failed",
        }
    }
}

/// Per-group outcome of a resolve or undo invocation.
#[derive(Debug, Clone, Serialize)]
pub struct GroupOutcome {
    pub group_id: String,
    pub status: OutcomeStatus,
    pub detail: String,
}

/// Aggregated result of a mutating command, with explicit counts.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MutationSummary {
    pub succeeded: u64,
    pub skipped: u64,
    pub failed: u64,
    pub outcomes: Vec<GroupOutcome>,
}

impl MutationSummary {
    pub fn push(&mut self, outcome: GroupOutcome) {
        match outcome.status {
            OutcomeStatus::Succeeded => self.succeeded += 1,
            OutcomeStatus::Skipped => self.skipped += 1,
            OutcomeStatus::Failed => self.failed += 1,
        }
        self.outcomes.push(outcome);
    }
}
