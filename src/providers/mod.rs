//! Content providers.
//!
//! Capability traits for everything the engine asks the outside world
//! for: event text, commentator takes, headlines, prices, fundamentals,
//! neutral tips and coaching. Each has a typed failure mode; the engine
//! wraps every call in a timeout and substitutes the documented defaults
//! below when a call fails.

pub mod newsapi;
pub mod openrouter;
pub mod scripted;
pub mod yahoo;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::behavior::CoachingRequest;
use crate::config::{AppConfig, ProviderMode};
use crate::types::{
    CognitiveBias, Commentary, CommentatorStance, EventType, Fundamentals, MarketEvent,
    NewsItem, PricePattern, PriceSnapshot, ProviderSlot, VolatilityLevel,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("{slot} provider timed out after {after_ms}ms")]
    Timeout { slot: ProviderSlot, after_ms: u64 },

    #[error("Provider call failed: {0}")]
    Failed(String),

    #[error("Provider unavailable: {0}")]
    Unavailable(String),
}

impl From<anyhow::Error> for ProviderError {
    fn from(e: anyhow::Error) -> Self {
        ProviderError::Failed(format!("{e:#}"))
    }
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

// ---------------------------------------------------------------------------
// Capability traits
// ---------------------------------------------------------------------------

/// Event text produced for a (ticker, event type) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedEvent {
    pub description: String,
    pub horizon_days: u32,
}

#[async_trait]
pub trait EventProvider: Send + Sync {
    async fn generate(&self, ticker: &str, event_type: EventType) -> ProviderResult<GeneratedEvent>;
}

#[async_trait]
pub trait CommentaryProvider: Send + Sync {
    async fn take(
        &self,
        event: &MarketEvent,
        rational_baseline: Option<CommentatorStance>,
    ) -> ProviderResult<Commentary>;
}

#[async_trait]
pub trait NewsProvider: Send + Sync {
    async fn fetch(&self, ticker: &str, days: u32) -> ProviderResult<Vec<NewsItem>>;
}

#[async_trait]
pub trait PriceProvider: Send + Sync {
    async fn snapshot(&self, ticker: &str) -> ProviderResult<PriceSnapshot>;
}

#[async_trait]
pub trait FundamentalsProvider: Send + Sync {
    async fn fundamentals(&self, ticker: &str) -> ProviderResult<Fundamentals>;
}

#[async_trait]
pub trait TipProvider: Send + Sync {
    async fn neutral_tip(
        &self,
        event_type: EventType,
        pattern: PricePattern,
        volatility: VolatilityLevel,
    ) -> ProviderResult<String>;
}

#[async_trait]
pub trait CoachingProvider: Send + Sync {
    async fn coaching(&self, request: &CoachingRequest) -> ProviderResult<Vec<String>>;
}

/// One implementation per capability slot.
#[derive(Clone)]
pub struct Providers {
    pub event: Arc<dyn EventProvider>,
    pub commentary: Arc<dyn CommentaryProvider>,
    pub news: Arc<dyn NewsProvider>,
    pub price: Arc<dyn PriceProvider>,
    pub fundamentals: Arc<dyn FundamentalsProvider>,
    pub tip: Arc<dyn TipProvider>,
    pub coaching: Arc<dyn CoachingProvider>,
}

impl Providers {
    /// Every slot backed by the offline scripted provider.
    pub fn scripted(seed: Option<u64>) -> Self {
        let s = Arc::new(scripted::ScriptedProvider::new(seed));
        Self {
            event: s.clone(),
            commentary: s.clone(),
            news: s.clone(),
            price: s.clone(),
            fundamentals: s.clone(),
            tip: s.clone(),
            coaching: s,
        }
    }

    /// Build the provider set selected by `[providers] mode`.
    ///
    /// In live mode a missing API key only downgrades that slot to the
    /// scripted provider; it never prevents startup.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let mut providers = Self::scripted(config.game.seed);
        if config.providers.mode == ProviderMode::Scripted {
            info!("Using scripted content providers");
            return Ok(providers);
        }

        let p = &config.providers;
        match AppConfig::resolve_env(&p.llm_api_key_env) {
            Ok(key) => {
                let llm = Arc::new(openrouter::OpenRouterClient::new(
                    key,
                    p.llm_model.clone(),
                    p.llm_fallback_model.clone(),
                    p.llm_max_tokens,
                )?);
                providers.event = llm.clone();
                providers.commentary = llm.clone();
                providers.tip = llm.clone();
                providers.coaching = llm;
                info!(model = %p.llm_model, "OpenRouter text providers enabled");
            }
            Err(e) => tracing::warn!(error = %e, "No LLM key; text slots stay scripted"),
        }

        match AppConfig::resolve_env(&p.news_api_key_env) {
            Ok(key) => {
                providers.news = Arc::new(newsapi::NewsApiClient::new(key)?);
                info!("NewsAPI headlines enabled");
            }
            Err(e) => tracing::warn!(error = %e, "No NewsAPI key; headlines stay scripted"),
        }

        let yahoo = Arc::new(yahoo::YahooChartClient::new()?);
        providers.price = yahoo.clone();
        providers.fundamentals = yahoo;
        info!("Yahoo chart prices enabled");

        Ok(providers)
    }
}

// ---------------------------------------------------------------------------
// Documented defaults for degraded slots
// ---------------------------------------------------------------------------

/// Event text used when the event provider fails.
pub fn fallback_description(ticker: &str, event_type: EventType) -> String {
    format!(
        "{ticker} experiences {} event affecting stock price.",
        event_type.phrase()
    )
}

/// Generic commentator take used when the commentary provider fails.
/// Leans against the rational baseline, bearish when there is none.
pub fn stub_commentary(event: &MarketEvent, rational_baseline: Option<CommentatorStance>) -> Commentary {
    let stance = rational_baseline
        .map(|b| b.opposite())
        .unwrap_or(CommentatorStance::Bearish);
    let (text, bias) = match stance {
        CommentatorStance::Bearish => (
            format!(
                "{} is a trap. Get out before everyone else does!",
                event.ticker
            ),
            CognitiveBias::FearAppeal,
        ),
        CommentatorStance::Bullish => (
            format!("{} only goes up from here. Load up now!", event.ticker),
            CognitiveBias::Overconfidence,
        ),
    };
    Commentary { text, stance, bias }
}

/// Neutral tip used when the tip provider fails.
pub fn fallback_tip(event_type: EventType) -> String {
    match event_type {
        EventType::EarningsSurprise => "Earnings surprises often see initial moves fade within 3-5 days. Consider scaling positions rather than going all-or-nothing.",
        EventType::RegulatoryNews => "Regulatory events typically resolve over weeks, and immediate reactions often overstate the long-term impact.",
        EventType::AnalystAction => "Analyst actions historically produce 3-5% average moves. Median returns favor holding over buying at peaks.",
        EventType::VolatilitySpike => "High volatility environments favor partial trimming to reduce risk while keeping exposure.",
        EventType::ProductNews => "Product announcements show wide outcome variance. Sizing smaller leaves room for uncertainty.",
        EventType::MacroEvent => "Macro events move whole sectors, and individual stock reactions often normalize within a week.",
    }
    .to_string()
}

/// Pull the first top-level JSON object or array out of free-form model text.
pub(crate) fn extract_json(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let open = text[start..].chars().next()?;
    let close = if open == '{' { '}' } else { ']' };
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}
