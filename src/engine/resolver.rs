//! Decision resolution: matcher → calculator → ledger → behavior flags.
//!
//! Pure with respect to its inputs: it returns the finalized record and
//! the updated portfolio, and the caller persists both. A rejected BUY
//! leaves both untouched.

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, warn};

use super::EngineError;
use crate::behavior::detect_flags;
use crate::config::BehaviorThresholds;
use crate::ledger::Portfolio;
use crate::replay::{evaluate, Matcher};
use crate::types::{DecisionInput, HistoricalCase, RoundRecord, RoundResolution};

/// Day-0 price for the stand-in case when no history exists.
fn synthetic_anchor(record: &RoundRecord, portfolio: &Portfolio) -> Decimal {
    portfolio
        .position(&record.ticker)
        .map(|p| p.current_price)
        .or_else(|| record.panel.price.as_ref().map(|p| p.current_price))
        .filter(|p| *p > Decimal::ZERO)
        .unwrap_or(Decimal::ONE_HUNDRED)
}

fn pick_case(record: &RoundRecord, portfolio: &Portfolio, matcher: &Matcher) -> HistoricalCase {
    let event = &record.event;
    match matcher.sample(&record.ticker, event.event_type, event.horizon_days) {
        Ok(m) => m.case,
        Err(e) => {
            warn!(
                round = record.round_number,
                error = %e,
                "Historical data unavailable, resolving with synthetic zero-return case"
            );
            HistoricalCase::synthetic(
                &record.ticker,
                event.event_type,
                event.horizon_days,
                synthetic_anchor(record, portfolio),
            )
        }
    }
}

/// Resolve an unfinalized round against `portfolio`.
pub fn resolve_round(
    record: &RoundRecord,
    input: &DecisionInput,
    portfolio: &Portfolio,
    matcher: &Matcher,
    thresholds: &BehaviorThresholds,
) -> Result<(RoundRecord, Portfolio), EngineError> {
    let case = pick_case(record, portfolio, matcher);
    let outcome = evaluate(input.decision, &case, record.position_allocation);

    // A round drawn after every position was closed has nothing to apply.
    let next_portfolio = match portfolio.position(&record.ticker) {
        Some(position) => {
            let resolved_price = position.current_price * (Decimal::ONE + case.return_pct());
            portfolio.apply_decision(
                &record.ticker,
                input.decision,
                outcome.pl_dollars,
                resolved_price,
            )?
        }
        None => portfolio.clone(),
    };

    let behavior_flags = detect_flags(record, input, thresholds);

    info!(
        round = record.round_number,
        ticker = %record.ticker,
        decision = %input.decision,
        pl_dollars = %outcome.pl_dollars,
        pl_percent = %outcome.pl_percent,
        synthetic = case.synthetic,
        flags = behavior_flags.len(),
        "Round resolved"
    );

    let mut finalized = record.clone();
    finalized.resolution = Some(RoundResolution {
        decision: input.decision,
        opened_data_panel: input.opened_data_panel,
        decision_latency_secs: input.decision_latency_secs,
        historical_case: case,
        pl_dollars: outcome.pl_dollars,
        pl_percent: outcome.pl_percent,
        behavior_flags,
        explanation: outcome.explanation,
        resolved_at: Utc::now(),
    });
    Ok((finalized, next_portfolio))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
