// Run configuration, loadable from JSON with per-section defaults

use crate::error::{ExploreError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplorerConfig {
    pub budget: BudgetConfig,
    pub scorer: ScorerConfig,
    pub decision: DecisionConfig,
    pub heuristics: HeuristicThresholds,
    pub executor: ExecutorConfig,
    pub fingerprint: FingerprintConfig,
}

/// Resource limits for one run. Immutable once the run starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub max_total_steps: usize,
    pub max_unique_states: usize,
    pub max_depth: usize,
    pub stagnation_threshold: usize,
    pub time_limit_ms: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_total_steps: 100,
            max_unique_states: 50,
            max_depth: 5,
            stagnation_threshold: 15,
            time_limit_ms: 600_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub novelty: f64,
    pub business_criticality: f64,
    pub risk: f64,
    pub branch_factor: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            novelty: 0.35,
            business_criticality: 0.25,
            risk: 0.25,
            branch_factor: 0.15,
        }
    }
}

impl ScoreWeights {
    pub fn total(&self) -> f64 {
        self.novelty + self.business_criticality + self.risk + self.branch_factor
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    pub weights: ScoreWeights,
    pub decay_rate: f64,
    pub max_retries: u32,
    /// Domain links must stay within to earn novelty. Derived from the start
    /// URL when unset.
    pub base_domain: Option<String>,
    pub restrict_to_base_domain: bool,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            weights: ScoreWeights::default(),
            decay_rate: 0.7,
            max_retries: 3,
            base_domain: None,
            restrict_to_base_domain: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    /// Minimum heuristic confidence accepted without escalating.
    pub confidence_threshold: u8,
    pub top_k: usize,
    pub ai_timeout_ms: u64,
    pub ai_max_retries: u32,
    pub ai_backoff_ms: u64,
    pub history_len: usize,
    pub use_ai_for_inputs: bool,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 75,
            top_k: 5,
            ai_timeout_ms: 30_000,
            ai_max_retries: 2,
            ai_backoff_ms: 500,
            history_len: 8,
            use_ai_for_inputs: false,
        }
    }
}

/// Constants for the heuristic rule ladder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeuristicThresholds {
    pub dominant_ratio: f64,
    pub dominant_min: f64,
    pub clear_leader_ratio: f64,
    pub clear_leader_min: f64,
    pub novel_url_min: f64,
    pub dominant_confidence: u8,
    pub cta_confidence: u8,
    pub navigation_confidence: u8,
    pub novel_url_confidence: u8,
    pub clear_leader_confidence: u8,
}

impl Default for HeuristicThresholds {
    fn default() -> Self {
        Self {
            dominant_ratio: 2.0,
            dominant_min: 30.0,
            clear_leader_ratio: 1.5,
            clear_leader_min: 25.0,
            novel_url_min: 20.0,
            dominant_confidence: 95,
            cta_confidence: 90,
            navigation_confidence: 85,
            novel_url_confidence: 80,
            clear_leader_confidence: 75,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExploreMode {
    /// One unit of work per start URL.
    #[default]
    Pages,
    /// One unit of work per outgoing action of the root page.
    Branches,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub parallel_browsers: usize,
    pub action_timeout_ms: u64,
    pub navigation_timeout_ms: u64,
    pub selector_retries: u32,
    pub max_edge_attempts: u32,
    pub strict_mode: bool,
    pub capture_screenshots: bool,
    pub max_steps_per_unit: Option<usize>,
    pub mode: ExploreMode,
    pub viewport_width: u32,
    pub viewport_height: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            parallel_browsers: 3,
            action_timeout_ms: 30_000,
            navigation_timeout_ms: 30_000,
            selector_retries: 2,
            max_edge_attempts: 3,
            strict_mode: false,
            capture_screenshots: true,
            max_steps_per_unit: None,
            mode: ExploreMode::Pages,
            viewport_width: 1280,
            viewport_height: 800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintConfig {
    pub max_tree_depth: usize,
    pub visible_text_bytes: usize,
    pub summary_chars: usize,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            max_tree_depth: 15,
            visible_text_bytes: 2000,
            summary_chars: 1500,
        }
    }
}

impl ExplorerConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            ExploreError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config: ExplorerConfig = serde_json::from_str(&content).map_err(|e| {
            ExploreError::Config(format!("failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| ExploreError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.executor.parallel_browsers == 0 {
            return Err(ExploreError::Config(
                "executor.parallel_browsers must be at least 1".to_string(),
            ));
        }
        if !(self.scorer.decay_rate > 0.0 && self.scorer.decay_rate <= 1.0) {
            return Err(ExploreError::Config(format!(
                "scorer.decay_rate must be in (0, 1], got {}",
                self.scorer.decay_rate
            )));
        }
        if self.decision.confidence_threshold > 100 {
            return Err(ExploreError::Config(format!(
                "decision.confidence_threshold must be at most 100, got {}",
                self.decision.confidence_threshold
            )));
        }
        let total = self.scorer.weights.total();
        if (total - 1.0).abs() > 0.01 {
            return Err(ExploreError::Config(format!(
                "scorer.weights must sum to 1.0, got {:.2}",
                total
            )));
        }
        if self.decision.top_k == 0 {
            return Err(ExploreError::Config(
                "decision.top_k must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(ExplorerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_section_defaults() {
        let config: ExplorerConfig =
            serde_json::from_str(r#"{"budget": {"max_total_steps": 7}}"#).unwrap();
        assert_eq!(config.budget.max_total_steps, 7);
        assert_eq!(config.budget.max_unique_states, 50);
        assert_eq!(config.decision.confidence_threshold, 75);
        assert_eq!(config.executor.mode, ExploreMode::Pages);
    }

    #[test]
    fn test_validate_rejects_bad_decay() {
        let mut config = ExplorerConfig::default();
        config.scorer.decay_rate = 1.5;
        assert!(matches!(config.validate(), Err(ExploreError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_browsers() {
        let mut config = ExplorerConfig::default();
        config.executor.parallel_browsers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let mut config = ExplorerConfig::default();
        config.executor.max_steps_per_unit = Some(9);
        fs::write(&path, config.to_json().unwrap()).unwrap();

        let loaded = ExplorerConfig::from_file(&path).unwrap();
        assert_eq!(loaded.executor.max_steps_per_unit, Some(9));
        assert!(ExplorerConfig::from_file(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_validate_rejects_unbalanced_weights() {
        let mut config = ExplorerConfig::default();
        config.scorer.weights.novelty = 0.9;
        assert!(config.validate().is_err());
    }
}
