//! Outcome calculator: deterministic decision-to-P/L mapping.
//!
//! With r = day_h / day0 − 1 and allocation A:
//!
//! | Decision  | pl_dollars   | pl_percent |
//! |-----------|--------------|------------|
//! | SELL_ALL  | 0            | 0          |
//! | SELL_HALF | A/2 × r      | r/2        |
//! | HOLD      | A × r        | r          |
//! | BUY       | 1.10·A × r   | r          |
//!
//! Dollars are rounded to the cent; percents are exact ratios.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::ledger::{round_cents, BUY_INCREMENT};
use crate::types::{Decision, HistoricalCase};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub pl_dollars: Decimal,
    pub pl_percent: Decimal,
    /// Capital that rode the historical move.
    pub exposure: Decimal,
    pub explanation: String,
}

/// Evaluate `decision` against the historical window for a position of
/// size `allocation`.
pub fn evaluate(decision: Decision, case: &HistoricalCase, allocation: Decimal) -> Outcome {
    let r = case.return_pct();
    let (exposure, pl_percent) = match decision {
        Decision::SellAll => (Decimal::ZERO, Decimal::ZERO),
        Decision::SellHalf => (allocation / dec!(2), r / dec!(2)),
        Decision::Hold => (allocation, r),
        Decision::Buy => (round_cents(allocation * (Decimal::ONE + BUY_INCREMENT)), r),
    };
    let pl_dollars = if decision == Decision::SellAll {
        Decimal::ZERO
    } else {
        round_cents(exposure * r)
    };

    Outcome {
        pl_dollars,
        pl_percent,
        exposure,
        explanation: explain(decision, case, exposure, pl_dollars),
    }
}

fn explain(decision: Decision, case: &HistoricalCase, exposure: Decimal, pl_dollars: Decimal) -> String {
    let move_pct = case.return_pct() * dec!(100);
    let window = format!(
        "{} moved {:+.2}% over {} trading days from {} ({:.2} -> {:.2})",
        case.ticker, move_pct, case.horizon_days, case.date, case.day0_price, case.day_h_price
    );
    let source = if case.synthetic {
        " No comparable history was available, so the window is flat."
    } else {
        ""
    };
    match decision {
        Decision::SellAll => format!("{window}. You exited before the move, so P/L is $0.00.{source}"),
        Decision::SellHalf => format!(
            "{window}. Half your position (${:.2}) rode the move for ${:.2}.{source}",
            exposure, pl_dollars
        ),
        Decision::Hold => format!(
            "{window}. Your full ${:.2} rode the move for ${:.2}.{source}",
            exposure, pl_dollars
        ),
        Decision::Buy => format!(
            "{window}. Your enlarged ${:.2} position rode the move for ${:.2}.{source}",
            exposure, pl_dollars
        ),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
