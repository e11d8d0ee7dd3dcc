//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Every section has defaults so a partial file (or none at all) still
//! yields a playable configuration. Secrets (API keys) are referenced by
//! env-var name in the config and resolved at runtime via `std::env::var`.

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;

use crate::types::Difficulty;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub game: GameConfig,
    pub providers: ProvidersConfig,
    pub behavior: BehaviorThresholds,
    pub storage: StorageConfig,
    pub server: ServerConfig,
    /// Ticker -> sector, used by the case matcher's second tier.
    pub sectors: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GameConfig {
    pub total_rounds: u32,
    pub initial_budget: Decimal,
    pub difficulty: Difficulty,
    /// Seed for event and case selection. Unset means entropy-seeded.
    pub seed: Option<u64>,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            total_rounds: 3,
            initial_budget: dec!(1_000_000),
            difficulty: Difficulty::Intermediate,
            seed: None,
        }
    }
}

/// Which provider family backs the engine's capability slots.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderMode {
    /// Deterministic in-process providers; no network.
    #[default]
    Scripted,
    /// OpenRouter for text generation, NewsAPI for headlines, Yahoo for prices.
    Live,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProvidersConfig {
    pub mode: ProviderMode,
    /// Per-call deadline applied by the engine to every provider call.
    pub timeout_ms: u64,
    /// NewsAPI lookback window.
    pub news_days: u32,
    pub llm_model: String,
    pub llm_fallback_model: Option<String>,
    pub llm_api_key_env: String,
    pub llm_max_tokens: u32,
    pub news_api_key_env: String,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            mode: ProviderMode::Scripted,
            timeout_ms: 8_000,
            news_days: 3,
            llm_model: "anthropic/claude-3.5-haiku".to_string(),
            llm_fallback_model: Some("meta-llama/llama-3.1-8b-instruct".to_string()),
            llm_api_key_env: "OPENROUTER_API_KEY".to_string(),
            llm_max_tokens: 400,
            news_api_key_env: "NEWSAPI_KEY".to_string(),
        }
    }
}

/// Thresholds for round flags and profile classification.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BehaviorThresholds {
    /// Contradiction score above which following the commentator is flagged.
    pub high_contradiction: f64,
    pub rational_data_usage: f64,
    pub rational_consensus_alignment: f64,
    pub resisted_rate: f64,
    pub emotional_follow_rate: f64,
    pub emotional_panic_count: u32,
    pub emotional_chase_count: u32,
    pub emotional_data_usage: f64,
    pub conservative_trim_share: f64,
    /// Mean allocation / budget below which sizing counts as small.
    pub small_position_fraction: f64,
    /// Peak-to-trough cumulative P/L / budget below which drawdown counts as low.
    pub low_drawdown_fraction: f64,
    /// Realized volatility at or above which a round counts as a spike.
    pub elevated_volatility: f64,
}

impl Default for BehaviorThresholds {
    fn default() -> Self {
        Self {
            high_contradiction: 0.7,
            rational_data_usage: 0.7,
            rational_consensus_alignment: 0.6,
            resisted_rate: 0.5,
            emotional_follow_rate: 0.4,
            emotional_panic_count: 2,
            emotional_chase_count: 2,
            emotional_data_usage: 0.4,
            conservative_trim_share: 0.5,
            small_position_fraction: 0.2,
            low_drawdown_fraction: 0.05,
            elevated_volatility: 0.4,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    /// `sqlite://...` URL; unset keeps everything in memory.
    pub database_url: Option<String>,
    /// JSON file of historical cases loaded at startup.
    pub cases_path: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            cases_path: Some("data/historical_cases.json".to_string()),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 8080,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse and validate configuration text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.game.total_rounds == 0 {
            bail!("game.total_rounds must be at least 1");
        }
        if self.game.initial_budget <= Decimal::ZERO {
            bail!("game.initial_budget must be positive");
        }
        if self.providers.timeout_ms == 0 {
            bail!("providers.timeout_ms must be positive");
        }
        let b = &self.behavior;
        for (name, value) in [
            ("high_contradiction", b.high_contradiction),
            ("rational_data_usage", b.rational_data_usage),
            ("rational_consensus_alignment", b.rational_consensus_alignment),
            ("resisted_rate", b.resisted_rate),
            ("emotional_follow_rate", b.emotional_follow_rate),
            ("emotional_data_usage", b.emotional_data_usage),
            ("conservative_trim_share", b.conservative_trim_share),
        ] {
            if !(0.0..=1.0).contains(&value) {
                bail!("behavior.{name} must be within [0, 1], got {value}");
            }
        }
        Ok(())
    }

    /// Sector for a ticker, if configured.
    pub fn sector_of(&self, ticker: &str) -> Option<&str> {
        self.sectors.get(&ticker.to_uppercase()).map(String::as_str)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
