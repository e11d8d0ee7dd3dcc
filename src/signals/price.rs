//! Price pattern and volatility detection from recent closes.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::types::{PricePattern, VolatilityLevel};

const TRADING_DAYS_PER_YEAR: f64 = 252.0;
const SPIKE_MOVE: Decimal = dec!(0.05);
const CONSOLIDATION_RANGE: Decimal = dec!(0.02);
/// Annualised volatility at or above which volatility counts as medium.
pub const MEDIUM_VOLATILITY: f64 = 0.20;

/// Classify the shape of `closes` (oldest first). Checks run in order and
/// the first hit wins.
pub fn detect_pattern(closes: &[Decimal]) -> PricePattern {
    if closes.len() >= 4 {
        let last4 = &closes[closes.len() - 4..];
        if last4.windows(2).all(|w| w[0] > w[1]) {
            return PricePattern::ThreeDownCloses;
        }
        if last4.windows(2).all(|w| w[0] < w[1]) {
            return PricePattern::ThreeUpCloses;
        }
    }

    if closes
        .windows(2)
        .any(|w| !w[0].is_zero() && ((w[1] - w[0]) / w[0]).abs() > SPIKE_MOVE)
    {
        return PricePattern::VolatilitySpike;
    }

    if closes.len() >= 5 {
        let last5 = &closes[closes.len() - 5..];
        let min = last5.iter().copied().min().unwrap_or_default();
        let max = last5.iter().copied().max().unwrap_or_default();
        if min > Decimal::ZERO && (max - min) / min < CONSOLIDATION_RANGE {
            return PricePattern::Consolidation;
        }
    }

    PricePattern::Normal
}

/// Daily percentage changes as f64.
pub fn daily_returns(closes: &[Decimal]) -> Vec<f64> {
    closes
        .windows(2)
        .filter(|w| !w[0].is_zero())
        .filter_map(|w| ((w[1] - w[0]) / w[0]).to_f64())
        .collect()
}

/// Annualised close-to-close volatility (sample standard deviation of daily
/// returns × √252). `None` with fewer than two returns.
pub fn realized_volatility(closes: &[Decimal]) -> Option<f64> {
    let returns = daily_returns(closes);
    if returns.len() < 2 {
        return None;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some(var.sqrt() * TRADING_DAYS_PER_YEAR.sqrt())
}

/// Bucket an annualised volatility.
pub fn volatility_level(volatility: Option<f64>, elevated: f64) -> VolatilityLevel {
    match volatility {
        Some(v) if v >= elevated => VolatilityLevel::High,
        Some(v) if v >= MEDIUM_VOLATILITY => VolatilityLevel::Medium,
        _ => VolatilityLevel::Low,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
