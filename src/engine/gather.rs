//! Round data gathering.
//!
//! Order matters: the event call must finish first because every other
//! provider is conditioned on it. Commentary, news, price and
//! fundamentals then run concurrently, each under its own timeout. The
//! neutral tip goes last since it needs the price pattern and volatility.
//! Any failed call is replaced by its documented default and recorded as
//! a `Degradation`; gathering itself never fails.

use rand::distributions::{Distribution, WeightedIndex};
use rand::seq::SliceRandom;
use rand::Rng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::ledger::Portfolio;
use crate::providers::{
    fallback_description, fallback_tip, stub_commentary, ProviderError, ProviderResult, Providers,
};
use crate::replay::Matcher;
use crate::signals::{
    classify_headlines, consensus, contradiction_score, detect_pattern, rational_baseline,
    realized_volatility, volatility_level,
};
use crate::types::{
    DataPanel, Degradation, Difficulty, EventType, MarketEvent, PricePattern, ProviderSlot,
    RoundRecord,
};

/// Event horizons outside this range are replaced by the type's default.
const HORIZON_RANGE: std::ops::RangeInclusive<u32> = 1..=10;

/// What a round is about, drawn before any provider is called.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundDraw {
    pub round_number: u32,
    pub ticker: String,
    pub allocation: Decimal,
    pub event_type: EventType,
}

/// Pick a held ticker with probability proportional to its allocation.
pub fn draw_ticker<R: Rng + ?Sized>(portfolio: &Portfolio, rng: &mut R) -> Option<(String, Decimal)> {
    let weights: Vec<f64> = portfolio
        .positions
        .iter()
        .map(|p| p.allocation.to_f64().unwrap_or(0.0).max(0.0))
        .collect();
    let dist = WeightedIndex::new(&weights).ok()?;
    let pos = &portfolio.positions[dist.sample(rng)];
    Some((pos.ticker.clone(), pos.allocation))
}

pub fn draw_event_type<R: Rng + ?Sized>(difficulty: Difficulty, rng: &mut R) -> EventType {
    difficulty
        .event_pool()
        .choose(rng)
        .copied()
        .unwrap_or(EventType::EarningsSurprise)
}

pub(crate) async fn bounded<T, F>(slot: ProviderSlot, timeout_ms: u64, call: F) -> ProviderResult<T>
where
    F: Future<Output = ProviderResult<T>>,
{
    match tokio::time::timeout(Duration::from_millis(timeout_ms), call).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout {
            slot,
            after_ms: timeout_ms,
        }),
    }
}

fn degrade(degraded: &mut Vec<Degradation>, slot: ProviderSlot, err: &ProviderError) {
    warn!(slot = %slot, error = %err, "Provider degraded, using default");
    degraded.push(Degradation {
        slot,
        reason: err.to_string(),
    });
}

/// Assemble the data side of a round record.
pub async fn gather_round(
    providers: &Providers,
    matcher: &Matcher,
    config: &AppConfig,
    draw: RoundDraw,
) -> RoundRecord {
    let timeout_ms = config.providers.timeout_ms;
    let mut degraded = Vec::new();
    let RoundDraw {
        round_number,
        ticker,
        allocation,
        event_type,
    } = draw;

    // 1. Event: hard predecessor of everything else.
    let event = match bounded(
        ProviderSlot::Event,
        timeout_ms,
        providers.event.generate(&ticker, event_type),
    )
    .await
    {
        Ok(generated) => {
            let horizon_days = if HORIZON_RANGE.contains(&generated.horizon_days) {
                generated.horizon_days
            } else {
                debug!(
                    horizon = generated.horizon_days,
                    "Event horizon out of range, using default"
                );
                event_type.default_horizon()
            };
            MarketEvent {
                ticker: ticker.clone(),
                event_type,
                description: generated.description,
                horizon_days,
            }
        }
        Err(e) => {
            degrade(&mut degraded, ProviderSlot::Event, &e);
            MarketEvent {
                ticker: ticker.clone(),
                event_type,
                description: fallback_description(&ticker, event_type),
                horizon_days: event_type.default_horizon(),
            }
        }
    };
    let baseline = rational_baseline(&event.description);

    // 2. Fan-out.
    let (commentary, news, price, fundamentals) = tokio::join!(
        bounded(
            ProviderSlot::Commentary,
            timeout_ms,
            providers.commentary.take(&event, baseline)
        ),
        bounded(
            ProviderSlot::News,
            timeout_ms,
            providers.news.fetch(&ticker, config.providers.news_days)
        ),
        bounded(ProviderSlot::Price, timeout_ms, providers.price.snapshot(&ticker)),
        bounded(
            ProviderSlot::Fundamentals,
            timeout_ms,
            providers.fundamentals.fundamentals(&ticker)
        ),
    );

    let commentary = commentary.unwrap_or_else(|e| {
        degrade(&mut degraded, ProviderSlot::Commentary, &e);
        stub_commentary(&event, baseline)
    });
    let headlines = match news {
        Ok(items) => classify_headlines(&items),
        Err(e) => {
            degrade(&mut degraded, ProviderSlot::News, &e);
            Vec::new()
        }
    };
    let price = price
        .map_err(|e| degrade(&mut degraded, ProviderSlot::Price, &e))
        .ok();
    let fundamentals = fundamentals
        .map_err(|e| degrade(&mut degraded, ProviderSlot::Fundamentals, &e))
        .ok();

    let pattern = price
        .as_ref()
        .map(|p| detect_pattern(&p.last_closes))
        .unwrap_or(PricePattern::Normal);
    let volatility = fundamentals
        .as_ref()
        .and_then(|f| f.volatility_30d)
        .or_else(|| price.as_ref().and_then(|p| realized_volatility(&p.last_closes)));
    let volatility = volatility_level(volatility, config.behavior.elevated_volatility);

    // 3. Tip, conditioned on pattern and volatility.
    let tip = bounded(
        ProviderSlot::Tip,
        timeout_ms,
        providers.tip.neutral_tip(event_type, pattern, volatility),
    )
    .await
    .unwrap_or_else(|e| {
        degrade(&mut degraded, ProviderSlot::Tip, &e);
        fallback_tip(event_type)
    });

    let panel = DataPanel {
        consensus: consensus(&headlines),
        contradiction_score: contradiction_score(&headlines, commentary.stance),
        headlines,
        price,
        pattern,
        fundamentals,
        volatility,
        tip,
        outcomes: matcher.summarize(event_type),
    };

    info!(
        round = round_number,
        ticker = %ticker,
        event_type = %event_type,
        pattern = pattern.as_str(),
        contradiction = panel.contradiction_score,
        degraded = degraded.len(),
        "Round data ready"
    );

    RoundRecord {
        round_number,
        ticker,
        position_allocation: allocation,
        event,
        commentary,
        rational_baseline: baseline,
        panel,
        degraded,
        resolution: None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
