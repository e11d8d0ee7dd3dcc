//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use mayhem::behavior::CoachingRequest;
use mayhem::config::AppConfig;
use mayhem::engine::driver::PortfolioRequest;
use mayhem::engine::Orchestrator;
use mayhem::ledger::RiskTier;
use mayhem::providers::*;
use mayhem::replay::Matcher;
use mayhem::storage::{load_cases_file, MemoryStore};
use mayhem::types::{
    Commentary, CommentatorStance, EventType, Fundamentals, HistoricalCase, MarketEvent,
    NewsItem, PricePattern, PriceSnapshot, VolatilityLevel,
};

pub const CASES_FILE: &str = "data/historical_cases.json";

pub fn seed_cases() -> Vec<HistoricalCase> {
    load_cases_file(Path::new(CASES_FILE)).unwrap()
}

pub fn test_config(timeout_ms: u64) -> AppConfig {
    let mut config = AppConfig::default();
    config.game.seed = Some(7);
    config.providers.timeout_ms = timeout_ms;
    config
        .sectors
        .insert("AAPL".to_string(), "Technology".to_string());
    config
        .sectors
        .insert("JPM".to_string(), "Financials".to_string());
    config
}

/// Orchestrator over an in-memory store.
pub fn orchestrator(providers: Providers, timeout_ms: u64) -> (Orchestrator, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let config = test_config(timeout_ms);
    let matcher = Matcher::new(seed_cases(), config.sectors.clone(), config.game.seed);
    let orch = Orchestrator::new(config, providers, matcher, store.clone(), store.clone());
    (orch, store)
}

/// Two positions, 450k left in cash, explicit entry prices so no quote
/// is needed.
pub fn two_position_request() -> PortfolioRequest {
    PortfolioRequest {
        tickers: vec!["AAPL".to_string(), "JPM".to_string()],
        allocations: vec![dec!(300000), dec!(250000)],
        risk_tier: RiskTier::Balanced,
        entry_prices: Some(vec![dec!(180), dec!(150)]),
    }
}

pub fn sum_values(values: &[Decimal]) -> Decimal {
    values.iter().copied().sum()
}

// ---------------------------------------------------------------------------
// Misbehaving providers
// ---------------------------------------------------------------------------

/// Every call fails immediately.
pub struct FailingProvider;

/// Every call sleeps for `delay_ms` first, then fails.
pub struct SlowProvider {
    pub delay_ms: u64,
}

impl FailingProvider {
    async fn respond<T: Send>(&self) -> ProviderResult<T> {
        Err(ProviderError::Unavailable("upstream down".to_string()))
    }
}

impl SlowProvider {
    async fn respond<T: Send>(&self) -> ProviderResult<T> {
        tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        Err(ProviderError::Failed("too slow".to_string()))
    }
}

macro_rules! misbehaving {
    ($ty:ty) => {
        #[async_trait]
        impl EventProvider for $ty {
            async fn generate(&self, _: &str, _: EventType) -> ProviderResult<GeneratedEvent> {
                self.respond().await
            }
        }

        #[async_trait]
        impl CommentaryProvider for $ty {
            async fn take(
                &self,
                _: &MarketEvent,
                _: Option<CommentatorStance>,
            ) -> ProviderResult<Commentary> {
                self.respond().await
            }
        }

        #[async_trait]
        impl NewsProvider for $ty {
            async fn fetch(&self, _: &str, _: u32) -> ProviderResult<Vec<NewsItem>> {
                self.respond().await
            }
        }

        #[async_trait]
        impl PriceProvider for $ty {
            async fn snapshot(&self, _: &str) -> ProviderResult<PriceSnapshot> {
                self.respond().await
            }
        }

        #[async_trait]
        impl FundamentalsProvider for $ty {
            async fn fundamentals(&self, _: &str) -> ProviderResult<Fundamentals> {
                self.respond().await
            }
        }

        #[async_trait]
        impl TipProvider for $ty {
            async fn neutral_tip(
                &self,
                _: EventType,
                _: PricePattern,
                _: VolatilityLevel,
            ) -> ProviderResult<String> {
                self.respond().await
            }
        }

        #[async_trait]
        impl CoachingProvider for $ty {
            async fn coaching(&self, _: &CoachingRequest) -> ProviderResult<Vec<String>> {
                self.respond().await
            }
        }
    };
}

misbehaving!(FailingProvider);
misbehaving!(SlowProvider);

pub fn all_slots<P>(provider: P) -> Providers
where
    P: EventProvider
        + CommentaryProvider
        + NewsProvider
        + PriceProvider
        + FundamentalsProvider
        + TipProvider
        + CoachingProvider
        + 'static,
{
    let p = Arc::new(provider);
    Providers {
        event: p.clone(),
        commentary: p.clone(),
        news: p.clone(),
        price: p.clone(),
        fundamentals: p.clone(),
        tip: p.clone(),
        coaching: p,
    }
}
