//! Scripted content provider.
//!
//! Offline, seedable implementation of every capability slot. Used for
//! local play, demos, and as the per-slot fallback in live mode when an
//! API key is missing.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::sync::Mutex;

use super::{
    fallback_tip, CoachingProvider, CommentaryProvider, EventProvider, FundamentalsProvider,
    GeneratedEvent, NewsProvider, PriceProvider, ProviderError, ProviderResult, TipProvider,
};
use crate::behavior::{fallback_coaching, CoachingRequest};
use crate::types::{
    CognitiveBias, Commentary, CommentatorStance, EventType, Fundamentals, MarketEvent,
    NewsItem, PricePattern, PriceSnapshot, VolatilityLevel,
};

// ---------------------------------------------------------------------------
// Reference data
// ---------------------------------------------------------------------------

struct TickerProfile {
    ticker: &'static str,
    price: f64,
    beta: f64,
    pe: f64,
    volatility: f64,
}

const TICKERS: &[TickerProfile] = &[
    TickerProfile { ticker: "AAPL", price: 190.0, beta: 1.25, pe: 29.0, volatility: 0.24 },
    TickerProfile { ticker: "MSFT", price: 410.0, beta: 0.90, pe: 35.0, volatility: 0.22 },
    TickerProfile { ticker: "GOOGL", price: 165.0, beta: 1.05, pe: 24.0, volatility: 0.28 },
    TickerProfile { ticker: "AMZN", price: 180.0, beta: 1.15, pe: 45.0, volatility: 0.32 },
    TickerProfile { ticker: "TSLA", price: 240.0, beta: 2.00, pe: 60.0, volatility: 0.55 },
    TickerProfile { ticker: "META", price: 500.0, beta: 1.20, pe: 27.0, volatility: 0.35 },
    TickerProfile { ticker: "NVDA", price: 120.0, beta: 1.70, pe: 55.0, volatility: 0.50 },
    TickerProfile { ticker: "JPM", price: 200.0, beta: 1.10, pe: 12.0, volatility: 0.20 },
    TickerProfile { ticker: "V", price: 275.0, beta: 0.95, pe: 30.0, volatility: 0.18 },
    TickerProfile { ticker: "WMT", price: 65.0, beta: 0.50, pe: 28.0, volatility: 0.15 },
];

const DEFAULT_PROFILE: TickerProfile = TickerProfile {
    ticker: "",
    price: 100.0,
    beta: 1.0,
    pe: 20.0,
    volatility: 0.30,
};

fn profile(ticker: &str) -> &'static TickerProfile {
    TICKERS
        .iter()
        .find(|p| p.ticker.eq_ignore_ascii_case(ticker))
        .unwrap_or(&DEFAULT_PROFILE)
}

fn event_templates(event_type: EventType) -> &'static [&'static str] {
    match event_type {
        EventType::EarningsSurprise => &[
            "{t} beats quarterly EPS estimates by 8% on strong services revenue.",
            "{t} misses revenue estimates as margins come in below guidance.",
            "{t} reports in-line earnings but trims full-year outlook.",
        ],
        EventType::RegulatoryNews => &[
            "{t} faces a federal investigation into its sales practices.",
            "{t} receives regulatory approval for its flagship product line.",
            "{t} is hit with a $400M fine by European regulators.",
        ],
        EventType::AnalystAction => &[
            "Major bank issues an upgrade on {t}, lifting its price target 15%.",
            "Two analysts cut {t} to underweight, citing slowing demand.",
            "{t} initiated at neutral by a top-tier brokerage.",
        ],
        EventType::VolatilitySpike => &[
            "{t} swings 7% intraday as options volume surges.",
            "{t} trades down sharply in heavy volume with no clear catalyst.",
        ],
        EventType::ProductNews => &[
            "{t} unveils a breakthrough product at its annual event.",
            "{t} announces a recall affecting a popular product line.",
            "{t} delays its next-generation launch by one quarter.",
        ],
        EventType::MacroEvent => &[
            "Hot CPI print pushes yields higher; {t} trades with the broad market.",
            "Central bank signals rate cuts; growth names like {t} move up.",
            "Jobs report comes in mixed, leaving {t} and peers range-bound.",
        ],
    }
}

fn bias_for(stance: CommentatorStance, pick: bool) -> CognitiveBias {
    match (stance, pick) {
        (CommentatorStance::Bearish, true) => CognitiveBias::FearAppeal,
        (CommentatorStance::Bearish, false) => CognitiveBias::AuthorityLure,
        (CommentatorStance::Bullish, true) => CognitiveBias::Overconfidence,
        (CommentatorStance::Bullish, false) => CognitiveBias::RecencyBias,
    }
}

fn hot_take(ticker: &str, stance: CommentatorStance, bias: CognitiveBias) -> String {
    match (stance, bias) {
        (CommentatorStance::Bearish, CognitiveBias::AuthorityLure) => format!(
            "Every serious fund manager I know is dumping {ticker}. The smart money is already out."
        ),
        (CommentatorStance::Bearish, _) => format!(
            "{ticker} is about to collapse. Sell everything before it's too late!"
        ),
        (CommentatorStance::Bullish, CognitiveBias::RecencyBias) => format!(
            "Look at the last few days! {ticker} is on a run and it's not stopping."
        ),
        (CommentatorStance::Bullish, _) => format!(
            "{ticker} is a guaranteed winner. Back up the truck and buy more now!"
        ),
    }
}

const BULL_HEADLINES: &[&str] = &[
    "{t} shares rally as analysts upgrade outlook",
    "{t} posts record growth in key segment",
    "Investors cheer {t} strong guidance",
];

const BEAR_HEADLINES: &[&str] = &[
    "{t} slump deepens amid weak demand",
    "{t} faces lawsuit over disclosure practices",
    "Analysts warn of margin pressure at {t}",
];

const NEUTRAL_HEADLINES: &[&str] = &[
    "{t} to present at industry conference next week",
    "{t} names new chief operating officer",
    "What to watch in {t} shares this week",
];

const SOURCES: &[&str] = &["Reuters", "Bloomberg", "CNBC", "MarketWatch", "WSJ"];

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

pub struct ScriptedProvider {
    rng: Mutex<StdRng>,
}

impl ScriptedProvider {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self { rng: Mutex::new(rng) }
    }

    fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut rng)
    }

    /// Thirty daily closes ending at the current price. One in four walks
    /// ends in three straight down closes and one in four in three up.
    fn price_walk(&self, ticker: &str) -> Vec<Decimal> {
        let p = profile(ticker);
        let daily = p.volatility / 252f64.sqrt();
        self.with_rng(|rng| {
            let shape: u8 = rng.gen_range(0..4);
            let mut price = p.price * rng.gen_range(0.9..1.1);
            let mut closes = Vec::with_capacity(30);
            for i in 0..30 {
                let step = match (shape, i >= 27) {
                    (0, true) => -rng.gen_range(0.004..0.02),
                    (1, true) => rng.gen_range(0.004..0.02),
                    _ => rng.gen_range(-1.0..1.0) * daily * 3f64.sqrt(),
                };
                price *= 1.0 + step;
                closes.push(Decimal::from_f64(price).unwrap_or(Decimal::ONE_HUNDRED).round_dp(2));
            }
            closes
        })
    }
}

#[async_trait]
impl EventProvider for ScriptedProvider {
    async fn generate(&self, ticker: &str, event_type: EventType) -> ProviderResult<GeneratedEvent> {
        let template = self
            .with_rng(|rng| event_templates(event_type).choose(rng).copied())
            .ok_or_else(|| ProviderError::Unavailable(format!("no template for {event_type}")))?;
        Ok(GeneratedEvent {
            description: template.replace("{t}", ticker),
            horizon_days: event_type.default_horizon(),
        })
    }
}

#[async_trait]
impl CommentaryProvider for ScriptedProvider {
    async fn take(
        &self,
        event: &MarketEvent,
        rational_baseline: Option<CommentatorStance>,
    ) -> ProviderResult<Commentary> {
        let (stance, bias) = self.with_rng(|rng| {
            let stance = match rational_baseline {
                Some(b) => b.opposite(),
                None if rng.gen_bool(0.5) => CommentatorStance::Bullish,
                None => CommentatorStance::Bearish,
            };
            (stance, bias_for(stance, rng.gen_bool(0.5)))
        });
        Ok(Commentary {
            text: hot_take(&event.ticker, stance, bias),
            stance,
            bias,
        })
    }
}

#[async_trait]
impl NewsProvider for ScriptedProvider {
    async fn fetch(&self, ticker: &str, _days: u32) -> ProviderResult<Vec<NewsItem>> {
        let items = self.with_rng(|rng| {
            let count = rng.gen_range(3..=5);
            (0..count)
                .map(|_| {
                    let pool = match rng.gen_range(0..3) {
                        0 => BULL_HEADLINES,
                        1 => BEAR_HEADLINES,
                        _ => NEUTRAL_HEADLINES,
                    };
                    let title = pool.choose(rng).copied().unwrap_or("{t} in the news");
                    let source = SOURCES.choose(rng).copied().unwrap_or("Newswire");
                    NewsItem {
                        title: title.replace("{t}", ticker),
                        source: source.to_string(),
                    }
                })
                .collect()
        });
        Ok(items)
    }
}

#[async_trait]
impl PriceProvider for ScriptedProvider {
    async fn snapshot(&self, ticker: &str) -> ProviderResult<PriceSnapshot> {
        let closes = self.price_walk(ticker);
        let last_closes = closes[closes.len().saturating_sub(5)..].to_vec();
        let current_price = last_closes
            .last()
            .copied()
            .ok_or_else(|| ProviderError::Unavailable(format!("no closes for {ticker}")))?;
        Ok(PriceSnapshot {
            current_price,
            last_closes,
        })
    }
}

#[async_trait]
impl FundamentalsProvider for ScriptedProvider {
    async fn fundamentals(&self, ticker: &str) -> ProviderResult<Fundamentals> {
        let p = profile(ticker);
        Ok(Fundamentals {
            volatility_30d: Some(p.volatility),
            beta: Some(p.beta),
            pe_ratio: Some(p.pe),
        })
    }
}

#[async_trait]
impl TipProvider for ScriptedProvider {
    async fn neutral_tip(
        &self,
        event_type: EventType,
        pattern: PricePattern,
        volatility: VolatilityLevel,
    ) -> ProviderResult<String> {
        Ok(format!(
            "{} Recent action: {} with {} volatility.",
            fallback_tip(event_type),
            pattern.description().to_lowercase(),
            volatility
        ))
    }
}

#[async_trait]
impl CoachingProvider for ScriptedProvider {
    async fn coaching(&self, request: &CoachingRequest) -> ProviderResult<Vec<String>> {
        let m = &request.metrics;
        let mut tips = vec![format!(
            "You opened the data panel in {:.0}% of rounds and matched the headline consensus {:.0}% of the time.",
            m.data_panel_usage_rate * 100.0,
            m.consensus_alignment_rate * 100.0
        )];
        if let Some(best) = &request.best_round {
            if let Some(d) = best.decision() {
                tips.push(format!(
                    "Your best call was {} on {} in round {} ({:+.2}%).",
                    d.display_name(),
                    best.ticker,
                    best.round_number,
                    best.pl_percent() * Decimal::ONE_HUNDRED
                ));
            }
        }
        if let Some(tip) = fallback_coaching(request.classification).into_iter().next() {
            tips.push(tip);
        }
        Ok(tips)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals;

    #[tokio::test]
    async fn test_event_uses_default_horizon() {
        let p = ScriptedProvider::new(Some(1));
        let e = p.generate("NVDA", EventType::VolatilitySpike).await.unwrap();
        assert_eq!(e.horizon_days, 2);
        assert!(e.description.contains("NVDA"));
    }

    #[tokio::test]
    async fn test_commentary_opposes_baseline() {
        let p = ScriptedProvider::new(Some(2));
        let event = MarketEvent {
            ticker: "AAPL".to_string(),
            event_type: EventType::EarningsSurprise,
            description: "AAPL beats estimates".to_string(),
            horizon_days: 3,
        };
        for _ in 0..10 {
            let c = p.take(&event, Some(CommentatorStance::Bullish)).await.unwrap();
            assert_eq!(c.stance, CommentatorStance::Bearish);
            assert!(matches!(c.bias, CognitiveBias::FearAppeal | CognitiveBias::AuthorityLure));
        }
    }

    #[tokio::test]
    async fn test_news_headlines_classify() {
        let p = ScriptedProvider::new(Some(3));
        let items = p.fetch("MSFT", 3).await.unwrap();
        assert!((3..=5).contains(&items.len()));
        assert!(items.iter().all(|i| i.title.contains("MSFT")));
        // Every scripted template lands in a definite bucket.
        for t in BULL_HEADLINES {
            assert_eq!(signals::news::classify_stance(t), crate::types::HeadlineStance::Bull);
        }
        for t in BEAR_HEADLINES {
            assert_eq!(signals::news::classify_stance(t), crate::types::HeadlineStance::Bear);
        }
        for t in NEUTRAL_HEADLINES {
            assert_eq!(signals::news::classify_stance(t), crate::types::HeadlineStance::Neutral);
        }
    }

    #[tokio::test]
    async fn test_snapshot_has_five_closes() {
        let p = ScriptedProvider::new(Some(4));
        let s = p.snapshot("TSLA").await.unwrap();
        assert_eq!(s.last_closes.len(), 5);
        assert_eq!(Some(&s.current_price), s.last_closes.last());
        assert!(s.current_price > Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_seeded_runs_repeat() {
        let a = ScriptedProvider::new(Some(42));
        let b = ScriptedProvider::new(Some(42));
        assert_eq!(a.snapshot("AAPL").await.unwrap(), b.snapshot("AAPL").await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_ticker_fundamentals_default() {
        let p = ScriptedProvider::new(None);
        let f = p.fundamentals("ZZZZ").await.unwrap();
        assert_eq!(f.beta, Some(1.0));
        assert_eq!(f.volatility_30d, Some(0.30));
    }
}
