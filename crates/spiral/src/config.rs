use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use spiral_core::models::TIER_COUNT;
use spiral_core::relevance::{RelevanceParams, TierThresholds, TierWeights};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub relevance: RelevanceConfig,
    #[serde(default)]
    pub evolution: EvolutionConfig,
    #[serde(default)]
    pub assembly: AssemblyConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RelevanceConfig {
    #[serde(default = "default_l1_min")]
    pub l1_min: f64,
    #[serde(default = "default_l2_min")]
    pub l2_min: f64,
    #[serde(default = "default_l3_min")]
    pub l3_min: f64,
    #[serde(default = "default_l4_min")]
    pub l4_min: f64,
    /// Optional override of the per-tier component weights. Five rows,
    /// each `[semantic, recency, connection, type_boost]` summing to 1.0.
    #[serde(default)]
    pub weights: Option<Vec<[f64; 4]>>,
}

impl Default for RelevanceConfig {
    fn default() -> Self {
        Self {
            l1_min: default_l1_min(),
            l2_min: default_l2_min(),
            l3_min: default_l3_min(),
            l4_min: default_l4_min(),
            weights: None,
        }
    }
}

fn default_l1_min() -> f64 {
    0.8
}
fn default_l2_min() -> f64 {
    0.6
}
fn default_l3_min() -> f64 {
    0.4
}
fn default_l4_min() -> f64 {
    0.2
}

impl RelevanceConfig {
    /// Build the scoring parameters, falling back to the built-in weight
    /// rows when none are configured.
    pub fn to_params(&self) -> Result<RelevanceParams> {
        let mut params = RelevanceParams {
            thresholds: TierThresholds {
                l1_min: self.l1_min,
                l2_min: self.l2_min,
                l3_min: self.l3_min,
                l4_min: self.l4_min,
            },
            ..RelevanceParams::default()
        };
        if let Some(rows) = &self.weights {
            if rows.len() != TIER_COUNT {
                anyhow::bail!(
                    "relevance.weights must have exactly {TIER_COUNT} rows, got {}",
                    rows.len()
                );
            }
            for (i, row) in rows.iter().enumerate() {
                params.weights[i] = TierWeights {
                    semantic: row[0],
                    recency: row[1],
                    connection: row[2],
                    type_boost: row[3],
                };
            }
        }
        params.validate()?;
        Ok(params)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EvolutionConfig {
    /// Multiplicative relevance decay rate per idle hour.
    #[serde(default = "default_decay_rate")]
    pub decay_rate: f64,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            decay_rate: default_decay_rate(),
        }
    }
}

fn default_decay_rate() -> f64 {
    0.01
}

#[derive(Debug, Deserialize, Clone)]
pub struct AssemblyConfig {
    /// Token budget used when a query does not pass `--max-tokens`.
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: i64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k: usize,
    /// Fraction of the budget reserved per tier, focus first.
    #[serde(default = "default_budget_split")]
    pub budget_split: [f64; TIER_COUNT],
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            default_max_tokens: default_max_tokens(),
            candidate_k: default_candidate_k(),
            budget_split: default_budget_split(),
        }
    }
}

fn default_max_tokens() -> i64 {
    2000
}
fn default_candidate_k() -> usize {
    50
}
fn default_budget_split() -> [f64; TIER_COUNT] {
    [0.35, 0.25, 0.20, 0.12, 0.08]
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,
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
            ollama_url: default_ollama_url(),
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
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

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Thresholds and weight rows
    config.relevance.to_params()?;

    if config.evolution.decay_rate < 0.0 {
        anyhow::bail!("evolution.decay_rate must be >= 0");
    }

    if config.assembly.default_max_tokens < 1 {
        anyhow::bail!("assembly.default_max_tokens must be >= 1");
    }
    if config.assembly.candidate_k == 0 {
        anyhow::bail!("assembly.candidate_k must be > 0");
    }
    let split_sum: f64 = config.assembly.budget_split.iter().sum();
    if (split_sum - 1.0).abs() > 1e-6 {
        anyhow::bail!("assembly.budget_split must sum to 1.0, got {split_sum}");
    }

    if config.embedding.is_enabled() && config.embedding.provider != "sim" {
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
        "disabled" | "openai" | "ollama" | "sim" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or sim.",
            other
        ),
    }

    Ok(())
}

impl Config {
    /// A default configuration for ad-hoc use without a config file.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./spiral.db"),
            },
            relevance: RelevanceConfig::default(),
            evolution: EvolutionConfig::default(),
            assembly: AssemblyConfig::default(),
            embedding: EmbeddingConfig::default(),
        }
    }

    /// Like [`Config::minimal`] but pointed at an explicit database path.
    pub fn with_db_path(path: PathBuf) -> Self {
        let mut config = Self::minimal();
        config.db.path = path;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_is_valid() {
        validate(&Config::minimal()).unwrap();
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [db]
            path = "/tmp/spiral.db"

            [relevance]
            l1_min = 0.85
            l2_min = 0.65

            [evolution]
            decay_rate = 0.02

            [assembly]
            default_max_tokens = 4000

            [embedding]
            provider = "ollama"
            model = "nomic-embed-text"
            dims = 768
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        validate(&config).unwrap();
        assert_eq!(config.relevance.l1_min, 0.85);
        assert_eq!(config.evolution.decay_rate, 0.02);
        assert_eq!(config.assembly.default_max_tokens, 4000);
        assert_eq!(config.embedding.dims, Some(768));
    }

    #[test]
    fn test_rejects_bad_thresholds() {
        let toml = r#"
            [db]
            path = "/tmp/spiral.db"

            [relevance]
            l2_min = 0.95
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_rejects_unknown_provider() {
        let toml = r#"
            [db]
            path = "/tmp/spiral.db"

            [embedding]
            provider = "cohere"
            model = "embed-v3"
            dims = 1024
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_rejects_bad_budget_split() {
        let toml = r#"
            [db]
            path = "/tmp/spiral.db"

            [assembly]
            budget_split = [0.5, 0.5, 0.5, 0.5, 0.5]
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_weight_override_row_count_checked() {
        let mut config = Config::minimal();
        config.relevance.weights = Some(vec![[0.25, 0.25, 0.25, 0.25]; 3]);
        assert!(validate(&config).is_err());
        config.relevance.weights = Some(vec![[0.25, 0.25, 0.25, 0.25]; 5]);
        validate(&config).unwrap();
    }
}
