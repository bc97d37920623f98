use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    pub graph: GraphConfig,
    pub synthesis: ModelConfig,
    pub relation: ModelConfig,
    pub embeddings: EmbeddingsConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub profiler: ProfilerConfig,
    #[serde(default)]
    pub relations: RelationsConfig,
}

/// Relational source (read-only SQLite database)
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub db_path: PathBuf,
    #[serde(default = "default_schema_name")]
    pub schema_name: String,
}

/// Knowledge graph store
#[derive(Debug, Clone, Deserialize)]
pub struct GraphConfig {
    pub db_path: PathBuf,
    #[serde(default = "default_migrations_dir")]
    pub migrations_dir: PathBuf,
}

/// A priced text-generation model (used for synthesis and for relation verification)
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    pub price_input_usd_per_mtok: f64,
    pub price_output_usd_per_mtok: f64,
}

/// Embeddings configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingsConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Enrichment run policy
#[derive(Debug, Clone, Deserialize)]
pub struct EnrichmentConfig {
    /// Optional cap on the number of entities enriched per run (trial runs)
    #[serde(default)]
    pub sample_size: Option<usize>,
    #[serde(default = "default_sample_seed")]
    pub sample_seed: u64,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default)]
    pub auto_confirm: bool,
    #[serde(default = "default_dossier_cache_capacity")]
    pub dossier_cache_capacity: usize,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            sample_size: None,
            sample_seed: default_sample_seed(),
            max_concurrency: default_max_concurrency(),
            auto_confirm: false,
            dossier_cache_capacity: default_dossier_cache_capacity(),
        }
    }
}

/// Data profiler thresholds
#[derive(Debug, Clone, Deserialize)]
pub struct ProfilerConfig {
    #[serde(default = "default_min_rows")]
    pub min_rows: u64,
    #[serde(default = "default_max_distinct_values")]
    pub max_distinct_values: u64,
    #[serde(default = "default_max_distinct_ratio")]
    pub max_distinct_ratio: f64,
    #[serde(default = "default_sample_limit")]
    pub sample_limit: usize,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            min_rows: default_min_rows(),
            max_distinct_values: default_max_distinct_values(),
            max_distinct_ratio: default_max_distinct_ratio(),
            sample_limit: default_sample_limit(),
        }
    }
}

/// Implicit relation discovery policy
#[derive(Debug, Clone, Deserialize)]
pub struct RelationsConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,
    #[serde(default = "default_min_llm_confidence")]
    pub min_llm_confidence: f64,
}

impl Default for RelationsConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_similarity: default_min_similarity(),
            min_llm_confidence: default_min_llm_confidence(),
        }
    }
}

fn default_schema_name() -> String {
    "main".to_string()
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from("migrations")
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_dimensions() -> usize {
    1536
}

fn default_max_retries() -> usize {
    3
}

fn default_sample_seed() -> u64 {
    42
}

fn default_max_concurrency() -> usize {
    1
}

fn default_dossier_cache_capacity() -> usize {
    10_000
}

fn default_min_rows() -> u64 {
    50
}

fn default_max_distinct_values() -> u64 {
    30
}

fn default_max_distinct_ratio() -> f64 {
    0.1
}

fn default_sample_limit() -> usize {
    5
}

fn default_top_k() -> usize {
    5
}

fn default_min_similarity() -> f32 {
    0.8
}

fn default_min_llm_confidence() -> f64 {
    0.85
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in GENESIS_CONFIG environment variable
    /// 2. ./config.toml in current directory
    pub fn load() -> Result<Self> {
        // .env is optional
        let _ = dotenv::dotenv();

        let config_path = std::env::var("GENESIS_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::parse(&config_str)?;
        config.validate()?;

        Ok(config)
    }

    /// Parse configuration from TOML text without touching the environment
    pub fn parse(config_str: &str) -> Result<Self> {
        toml::from_str(config_str).context("Failed to parse config.toml")
    }

    /// Validate configuration values and required environment variables
    pub fn validate(&self) -> Result<()> {
        self.validate_values()?;

        for env_name in [
            &self.synthesis.api_key_env,
            &self.relation.api_key_env,
            &self.embeddings.api_key_env,
        ] {
            std::env::var(env_name).with_context(|| {
                format!(
                    "Environment variable {} not set. Set it in your .env file or as an environment variable.",
                    env_name
                )
            })?;
        }

        Ok(())
    }

    /// Validate numeric ranges and URLs (no environment access)
    pub fn validate_values(&self) -> Result<()> {
        for (section, base_url) in [
            ("synthesis", &self.synthesis.base_url),
            ("relation", &self.relation.base_url),
            ("embeddings", &self.embeddings.base_url),
        ] {
            url::Url::parse(base_url)
                .with_context(|| format!("{}.base_url is not a valid URL: {}", section, base_url))?;
        }

        for (section, model) in [("synthesis", &self.synthesis), ("relation", &self.relation)] {
            if model.price_input_usd_per_mtok < 0.0 || model.price_output_usd_per_mtok < 0.0 {
                anyhow::bail!("{} prices must not be negative", section);
            }
            if !(0.0..=2.0).contains(&model.temperature) {
                anyhow::bail!("{}.temperature must be between 0.0 and 2.0", section);
            }
        }

        if self.embeddings.dimensions == 0 {
            anyhow::bail!("embeddings.dimensions must be greater than 0");
        }

        if self.enrichment.max_concurrency == 0 {
            anyhow::bail!("enrichment.max_concurrency must be greater than 0");
        }

        if self.enrichment.sample_size == Some(0) {
            anyhow::bail!("enrichment.sample_size must be greater than 0 when set");
        }

        if !(0.0..=1.0).contains(&self.profiler.max_distinct_ratio) {
            anyhow::bail!("profiler.max_distinct_ratio must be between 0.0 and 1.0");
        }

        if self.relations.top_k == 0 {
            anyhow::bail!("relations.top_k must be greater than 0");
        }

        if !(0.0..=1.0).contains(&self.relations.min_similarity) {
            anyhow::bail!("relations.min_similarity must be between 0.0 and 1.0");
        }

        if !(0.0..=1.0).contains(&self.relations.min_llm_confidence) {
            anyhow::bail!("relations.min_llm_confidence must be between 0.0 and 1.0");
        }

        Ok(())
    }

    /// Relational source path
    pub fn source_path(&self) -> &Path {
        &self.source.db_path
    }

    /// Graph store path
    pub fn graph_path(&self) -> &Path {
        &self.graph.db_path
    }
}

impl ModelConfig {
    /// Read the API key from the configured environment variable
    pub fn api_key(&self) -> Result<String> {
        std::env::var(&self.api_key_env)
            .with_context(|| format!("Environment variable {} not set", self.api_key_env))
    }
}

impl EmbeddingsConfig {
    /// Read the API key from the configured environment variable
    pub fn api_key(&self) -> Result<String> {
        std::env::var(&self.api_key_env)
            .with_context(|| format!("Environment variable {} not set", self.api_key_env))
    }
}

impl EnrichmentConfig {
    /// Auto-confirm is on when configured or when GENESIS_AUTO_CONFIRM=true
    pub fn auto_confirm_enabled(&self) -> bool {
        self.auto_confirm
            || std::env::var("GENESIS_AUTO_CONFIRM")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Serialize config tests that mutate process-wide env so they don't race.
    static CONFIG_TEST_LOCK: Mutex<()> = Mutex::new(());

    pub(crate) const TEST_CONFIG: &str = r#"
[source]
db_path = "./source.db"

[graph]
db_path = "./graph.db"

[synthesis]
model = "gpt-4o-mini"
api_key_env = "GENESIS_TEST_KEY"
price_input_usd_per_mtok = 0.15
price_output_usd_per_mtok = 0.60

[relation]
model = "gpt-4o"
api_key_env = "GENESIS_TEST_KEY"
temperature = 0.0
price_input_usd_per_mtok = 2.5
price_output_usd_per_mtok = 10.0

[embeddings]
model = "text-embedding-3-small"
api_key_env = "GENESIS_TEST_KEY"

[enrichment]
sample_size = 20
max_concurrency = 4
"#;

    fn with_config_env(config_path: &Path, api_key: Option<&str>, f: impl FnOnce()) {
        let original_config = std::env::var("GENESIS_CONFIG").ok();
        let original_key = std::env::var("GENESIS_TEST_KEY").ok();
        std::env::set_var("GENESIS_CONFIG", config_path.to_str().unwrap());
        match api_key {
            Some(k) => std::env::set_var("GENESIS_TEST_KEY", k),
            None => std::env::remove_var("GENESIS_TEST_KEY"),
        }
        f();
        std::env::remove_var("GENESIS_CONFIG");
        std::env::remove_var("GENESIS_TEST_KEY");
        if let Some(val) = original_config {
            std::env::set_var("GENESIS_CONFIG", val);
        }
        if let Some(val) = original_key {
            std::env::set_var("GENESIS_TEST_KEY", val);
        }
    }

    #[test]
    fn test_parse_applies_defaults() {
        let config = Config::parse(TEST_CONFIG).unwrap();
        assert_eq!(config.source.schema_name, "main");
        assert_eq!(config.embeddings.dimensions, 1536);
        assert_eq!(config.synthesis.temperature, 0.2);
        assert_eq!(config.relation.temperature, 0.0);
        assert_eq!(config.enrichment.sample_seed, 42);
        assert_eq!(config.enrichment.sample_size, Some(20));
        assert_eq!(config.profiler.min_rows, 50);
        assert_eq!(config.profiler.max_distinct_values, 30);
        assert_eq!(config.relations.top_k, 5);
        assert!((config.relations.min_llm_confidence - 0.85).abs() < 1e-9);
        assert!(config.validate_values().is_ok());
    }

    #[test]
    fn test_rejects_bad_base_url() {
        let text = TEST_CONFIG.replace(
            "model = \"gpt-4o-mini\"",
            "model = \"gpt-4o-mini\"\nbase_url = \"not a url\"",
        );
        let config = Config::parse(&text).unwrap();
        let err = config.validate_values().unwrap_err();
        assert!(err.to_string().contains("synthesis.base_url"));
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        let text = TEST_CONFIG.replace("max_concurrency = 4", "max_concurrency = 0");
        let config = Config::parse(&text).unwrap();
        assert!(config.validate_values().is_err());
    }

    #[test]
    fn test_config_load_success() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, TEST_CONFIG).unwrap();
        with_config_env(&config_path, Some("test-key"), || {
            let config = Config::load();
            assert!(config.is_ok(), "Config::load() failed: {:?}", config.err());
            assert_eq!(config.unwrap().enrichment.max_concurrency, 4);
        });
    }

    #[test]
    fn test_config_missing_api_key() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, TEST_CONFIG).unwrap();
        with_config_env(&config_path, None, || {
            let config = Config::load();
            assert!(config.is_err(), "Expected missing API key error");
            assert!(config.unwrap_err().to_string().contains("GENESIS_TEST_KEY"));
        });
    }

    #[test]
    fn test_config_invalid_path() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let original = std::env::var("GENESIS_CONFIG").ok();
        std::env::set_var("GENESIS_CONFIG", "nonexistent.toml");
        let config = Config::load();
        assert!(config.is_err());
        std::env::remove_var("GENESIS_CONFIG");
        if let Some(v) = original {
            std::env::set_var("GENESIS_CONFIG", v);
        }
    }
}
