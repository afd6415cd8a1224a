use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub reports: ReportsConfig,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub import: ImportConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReportsConfig {
    #[serde(default = "default_reports_dir")]
    pub dir: PathBuf,
}

impl Default for ReportsConfig {
    fn default() -> Self {
        Self {
            dir: default_reports_dir(),
        }
    }
}

fn default_reports_dir() -> PathBuf {
    PathBuf::from("./reports")
}

/// Similarity and categorization thresholds. One profile per config file;
/// every engine call receives these explicitly so runs are reproducible.
#[derive(Debug, Deserialize, Clone)]
pub struct Thresholds {
    /// Pairs scoring below this are discarded, not stored.
    #[serde(default = "default_related")]
    pub related: f64,
    /// Pairs at or above this are unioned into duplicate groups.
    #[serde(default = "default_grouping")]
    pub grouping: f64,
    /// Minimum pairwise score for the auto-merge categories.
    #[serde(default = "default_auto_merge")]
    pub auto_merge: f64,
    /// Near-exact guard band: scores here get manual review, not auto-merge.
    #[serde(default = "default_near_exact")]
    pub near_exact: f64,
    /// Average similarity required to call distinct grade sets adaptations.
    #[serde(default = "default_grade_variation")]
    pub grade_variation: f64,
    #[serde(default = "default_cultural_variation")]
    pub cultural_variation: f64,
    #[serde(default = "default_seasonal_variation")]
    pub seasonal_variation: f64,
    /// Content similarity above which divergent titles are flagged as
    /// title inconsistencies.
    #[serde(default = "default_title_divergence_content")]
    pub title_divergence_content: f64,
    /// Title token-set overlap below which titles count as divergent.
    #[serde(default = "default_title_divergence_tokens")]
    pub title_divergence_tokens: f64,
    /// Stricter threshold for the split-group re-clustering pass.
    #[serde(default = "default_subgroup")]
    pub subgroup: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            related: default_related(),
            grouping: default_grouping(),
            auto_merge: default_auto_merge(),
            near_exact: default_near_exact(),
            grade_variation: default_grade_variation(),
            cultural_variation: default_cultural_variation(),
            seasonal_variation: default_seasonal_variation(),
            title_divergence_content: default_title_divergence_content(),
            title_divergence_tokens: default_title_divergence_tokens(),
            subgroup: default_subgroup(),
        }
    }
}

fn default_related() -> f64 {
    0.85
}
fn default_grouping() -> f64 {
    0.90
}
fn default_auto_merge() -> f64 {
    1.0
}
fn default_near_exact() -> f64 {
    0.999
}
fn default_grade_variation() -> f64 {
    0.90
}
fn default_cultural_variation() -> f64 {
    0.85
}
fn default_seasonal_variation() -> f64 {
    0.85
}
fn default_title_divergence_content() -> f64 {
    0.95
}
fn default_title_divergence_tokens() -> f64 {
    0.5
}
fn default_subgroup() -> f64 {
    0.97
}

/// Canonical-scorer weights. Intentionally sum to well under 1.0: the
/// scorer informs the human decision, it does not make it.
#[derive(Debug, Deserialize, Clone)]
pub struct ScoringConfig {
    #[serde(default = "default_recency_weight")]
    pub recency_weight: f64,
    #[serde(default = "default_completeness_weight")]
    pub completeness_weight: f64,
    #[serde(default = "default_grade_coverage_weight")]
    pub grade_coverage_weight: f64,
    /// Cap on the structural-quality bonus.
    #[serde(default = "default_structure_bonus")]
    pub structure_bonus: f64,
    /// Recency decays linearly to zero over this horizon.
    #[serde(default = "default_recency_horizon_days")]
    pub recency_horizon_days: i64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            recency_weight: default_recency_weight(),
            completeness_weight: default_completeness_weight(),
            grade_coverage_weight: default_grade_coverage_weight(),
            structure_bonus: default_structure_bonus(),
            recency_horizon_days: default_recency_horizon_days(),
        }
    }
}

fn default_recency_weight() -> f64 {
    0.15
}
fn default_completeness_weight() -> f64 {
    0.15
}
fn default_grade_coverage_weight() -> f64 {
    0.10
}
fn default_structure_bonus() -> f64 {
    0.05
}
fn default_recency_horizon_days() -> i64 {
    730
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    /// Outer rows per comparison batch; progress is reported per batch.
    #[serde(default = "default_batch_rows")]
    pub batch_rows: usize,
    /// Blocking workers for the pairwise scan. 0 = available parallelism.
    #[serde(default)]
    pub workers: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            batch_rows: default_batch_rows(),
            workers: 0,
        }
    }
}

fn default_batch_rows() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_embed_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_embed_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ImportConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.json".to_string()]
}

impl Config {
    /// Minimal in-memory config for tests and tooling.
    pub fn minimal(db_path: &Path) -> Self {
        Self {
            db: DbConfig {
                path: db_path.to_path_buf(),
            },
            reports: ReportsConfig::default(),
            thresholds: Thresholds::default(),
            scoring: ScoringConfig::default(),
            analysis: AnalysisConfig::default(),
            embedding: EmbeddingConfig::default(),
            import: ImportConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    let t = &config.thresholds;
    for (name, value) in [
        ("thresholds.related", t.related),
        ("thresholds.grouping", t.grouping),
        ("thresholds.auto_merge", t.auto_merge),
        ("thresholds.near_exact", t.near_exact),
        ("thresholds.grade_variation", t.grade_variation),
        ("thresholds.cultural_variation", t.cultural_variation),
        ("thresholds.seasonal_variation", t.seasonal_variation),
        ("thresholds.title_divergence_content", t.title_divergence_content),
        ("thresholds.title_divergence_tokens", t.title_divergence_tokens),
        ("thresholds.subgroup", t.subgroup),
    ] {
        if !(0.0..=1.0).contains(&value) {
            anyhow::bail!("{} must be in [0.0, 1.0]", name);
        }
    }

    if t.related > t.grouping {
        anyhow::bail!("thresholds.related must not exceed thresholds.grouping");
    }
    if t.grouping > t.subgroup {
        anyhow::bail!("thresholds.grouping must not exceed thresholds.subgroup");
    }
    if t.near_exact > t.auto_merge {
        anyhow::bail!("thresholds.near_exact must not exceed thresholds.auto_merge");
    }

    let s = &config.scoring;
    for (name, value) in [
        ("scoring.recency_weight", s.recency_weight),
        ("scoring.completeness_weight", s.completeness_weight),
        ("scoring.grade_coverage_weight", s.grade_coverage_weight),
        ("scoring.structure_bonus", s.structure_bonus),
    ] {
        if value < 0.0 {
            anyhow::bail!("{} must not be negative", name);
        }
    }
    let weight_sum =
        s.recency_weight + s.completeness_weight + s.grade_coverage_weight + s.structure_bonus;
    if weight_sum > 1.0 {
        anyhow::bail!("scoring weights must sum to at most 1.0 (got {weight_sum})");
    }
    if s.recency_horizon_days < 1 {
        anyhow::bail!("scoring.recency_horizon_days must be >= 1");
    }

    if config.analysis.batch_rows == 0 {
        anyhow::bail!("analysis.batch_rows must be > 0");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_consistent() {
        let t = Thresholds::default();
        assert!(t.related <= t.grouping);
        assert!(t.grouping <= t.subgroup);
        assert!(t.near_exact <= t.auto_merge);
    }

    #[test]
    fn scoring_weights_cover_a_minority() {
        let s = ScoringConfig::default();
        let sum =
            s.recency_weight + s.completeness_weight + s.grade_coverage_weight + s.structure_bonus;
        assert!(sum < 0.5, "scorer should leave most judgment to humans");
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let toml = r#"
[db]
path = "/tmp/x.sqlite"

[thresholds]
related = 0.95
grouping = 0.90
"#;
        let tmp = std::env::temp_dir().join("lcr-config-inverted.toml");
        std::fs::write(&tmp, toml).unwrap();
        let err = load_config(&tmp).unwrap_err();
        assert!(err.to_string().contains("related"));
        std::fs::remove_file(&tmp).ok();
    }
}
