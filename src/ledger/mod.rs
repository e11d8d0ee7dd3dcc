//! Portfolio ledger: positions, cash, and valuation.
//!
//! Pure bookkeeping: every operation validates first and returns a new
//! `Portfolio` value, so a rejected decision never leaves a half-applied
//! state behind. Allocation accounting keeps
//! `Σ position.allocation + cash == initial_budget` exact; gains and losses
//! realised on exits are booked separately in `realized_pl`.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::types::Decision;

/// Fraction of the pre-decision allocation added by a BUY.
pub const BUY_INCREMENT: Decimal = dec!(0.10);

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    #[error("Allocations total {requested} exceed the budget of {budget}")]
    InsufficientBudget { requested: Decimal, budget: Decimal },

    #[error("Position {ticker} allocation {allocation} exceeds the {tier} limit of {limit}")]
    PositionExceedsRiskLimit {
        ticker: String,
        allocation: Decimal,
        tier: RiskTier,
        limit: Decimal,
    },

    #[error("Duplicate ticker: {0}")]
    DuplicateTicker(String),

    #[error("Invalid ticker: {0:?}")]
    InvalidTicker(String),

    #[error("Allocation for {ticker} must be positive, got {allocation}")]
    InvalidAllocation { ticker: String, allocation: Decimal },

    #[error("Price for {ticker} must be positive, got {price}")]
    InvalidPrice { ticker: String, price: Decimal },

    #[error("Expected {tickers} allocations and entry prices, got {allocations} and {prices}")]
    MismatchedInputs {
        tickers: usize,
        allocations: usize,
        prices: usize,
    },

    #[error("No position in {0}")]
    PositionNotFound(String),

    #[error("BUY needs {needed} but only {available} cash is available")]
    InsufficientCash { needed: Decimal, available: Decimal },
}

// ---------------------------------------------------------------------------
// Risk tiers
// ---------------------------------------------------------------------------

/// Portfolio-wide cap on single-position concentration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskTier {
    Aggressive,
    Balanced,
    Conservative,
}

impl RiskTier {
    /// Maximum allocation per position as a fraction of the initial budget.
    pub fn max_position_fraction(&self) -> Decimal {
        match self {
            RiskTier::Aggressive => dec!(0.50),
            RiskTier::Balanced => dec!(0.33),
            RiskTier::Conservative => dec!(0.25),
        }
    }

    pub fn position_limit(&self, budget: Decimal) -> Decimal {
        budget * self.max_position_fraction()
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskTier::Aggressive => write!(f, "Aggressive"),
            RiskTier::Balanced => write!(f, "Balanced"),
            RiskTier::Conservative => write!(f, "Conservative"),
        }
    }
}

impl std::str::FromStr for RiskTier {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "aggressive" => Ok(RiskTier::Aggressive),
            "balanced" | "moderate" => Ok(RiskTier::Balanced),
            "conservative" => Ok(RiskTier::Conservative),
            _ => Err(anyhow::anyhow!("Unknown risk tier: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Positions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub ticker: String,
    /// Principal committed to the position.
    pub allocation: Decimal,
    pub entry_price: Decimal,
    pub current_price: Decimal,
}

impl Position {
    pub fn shares(&self) -> Decimal {
        self.allocation / self.entry_price
    }

    pub fn value(&self) -> Decimal {
        self.shares() * self.current_price
    }

    pub fn unrealized_pl(&self) -> Decimal {
        self.value() - self.allocation
    }
}

// ---------------------------------------------------------------------------
// Portfolio
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    pub id: Uuid,
    pub risk_tier: RiskTier,
    pub initial_budget: Decimal,
    /// Ordered by creation; tickers are unique.
    pub positions: Vec<Position>,
    /// Principal not committed to any position.
    pub cash: Decimal,
    /// Gains minus losses booked when positions are reduced or closed.
    pub realized_pl: Decimal,
    /// Running sum of per-round outcome P/L.
    pub session_pl: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Round a currency amount to the cent, half away from zero.
pub fn round_cents(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

fn validate_ticker(ticker: &str) -> Result<String, LedgerError> {
    let t = ticker.trim().to_uppercase();
    let valid = !t.is_empty()
        && t.len() <= 10
        && t.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
    if valid {
        Ok(t)
    } else {
        Err(LedgerError::InvalidTicker(ticker.to_string()))
    }
}

impl Portfolio {
    /// Build a portfolio, rejecting anything that would violate the budget
    /// or the tier's concentration limit.
    pub fn create(
        tickers: &[String],
        allocations: &[Decimal],
        risk_tier: RiskTier,
        entry_prices: &[Decimal],
        initial_budget: Decimal,
    ) -> Result<Self, LedgerError> {
        if tickers.is_empty()
            || tickers.len() != allocations.len()
            || tickers.len() != entry_prices.len()
        {
            return Err(LedgerError::MismatchedInputs {
                tickers: tickers.len(),
                allocations: allocations.len(),
                prices: entry_prices.len(),
            });
        }

        let limit = risk_tier.position_limit(initial_budget);
        let mut positions: Vec<Position> = Vec::with_capacity(tickers.len());

        for ((raw, &allocation), &price) in tickers.iter().zip(allocations).zip(entry_prices) {
            let ticker = validate_ticker(raw)?;
            if positions.iter().any(|p| p.ticker == ticker) {
                return Err(LedgerError::DuplicateTicker(ticker));
            }
            if allocation <= Decimal::ZERO {
                return Err(LedgerError::InvalidAllocation { ticker, allocation });
            }
            if price <= Decimal::ZERO {
                return Err(LedgerError::InvalidPrice { ticker, price });
            }
            if allocation > limit {
                return Err(LedgerError::PositionExceedsRiskLimit {
                    ticker,
                    allocation,
                    tier: risk_tier,
                    limit,
                });
            }
            positions.push(Position {
                ticker,
                allocation,
                entry_price: price,
                current_price: price,
            });
        }

        let committed: Decimal = positions.iter().map(|p| p.allocation).sum();
        if committed > initial_budget {
            return Err(LedgerError::InsufficientBudget {
                requested: committed,
                budget: initial_budget,
            });
        }

        Ok(Self {
            id: Uuid::new_v4(),
            risk_tier,
            initial_budget,
            positions,
            cash: initial_budget - committed,
            realized_pl: Decimal::ZERO,
            session_pl: Decimal::ZERO,
            created_at: Utc::now(),
        })
    }

    pub fn position(&self, ticker: &str) -> Option<&Position> {
        self.positions.iter().find(|p| p.ticker == ticker)
    }

    pub fn total_allocation(&self) -> Decimal {
        self.positions.iter().map(|p| p.allocation).sum()
    }

    /// Spendable balance: principal plus realised P/L.
    pub fn cash_balance(&self) -> Decimal {
        self.cash + self.realized_pl
    }

    /// Always recomputed from positions; never stored.
    pub fn total_value(&self) -> Decimal {
        self.positions.iter().map(Position::value).sum::<Decimal>() + self.cash_balance()
    }

    pub fn total_return_pct(&self) -> Decimal {
        if self.initial_budget.is_zero() {
            return Decimal::ZERO;
        }
        self.total_value() / self.initial_budget - Decimal::ONE
    }

    /// Whether the allocation identity holds.
    pub fn is_balanced(&self) -> bool {
        self.total_allocation() + self.cash == self.initial_budget
    }

    /// Apply a resolved decision to `ticker`, returning the updated portfolio.
    ///
    /// `resolved_price` is the price the position is marked to after the
    /// round (ignored for SELL_ALL). `pl_dollars` is the round's outcome and
    /// is accumulated into `session_pl`.
    pub fn apply_decision(
        &self,
        ticker: &str,
        decision: Decision,
        pl_dollars: Decimal,
        resolved_price: Decimal,
    ) -> Result<Portfolio, LedgerError> {
        let idx = self
            .positions
            .iter()
            .position(|p| p.ticker == ticker)
            .ok_or_else(|| LedgerError::PositionNotFound(ticker.to_string()))?;
        if decision != Decision::SellAll && resolved_price <= Decimal::ZERO {
            return Err(LedgerError::InvalidPrice {
                ticker: ticker.to_string(),
                price: resolved_price,
            });
        }

        let mut next = self.clone();
        let before = self.positions[idx].clone();

        match decision {
            Decision::SellAll => {
                next.positions.remove(idx);
                next.cash += before.allocation;
                next.realized_pl += before.value() - before.allocation;
            }
            Decision::SellHalf => {
                let half_alloc = before.allocation / dec!(2);
                let half_value = before.value() / dec!(2);
                let pos = &mut next.positions[idx];
                pos.allocation -= half_alloc;
                pos.current_price = resolved_price;
                next.cash += half_alloc;
                next.realized_pl += half_value - half_alloc;
            }
            Decision::Hold => {
                next.positions[idx].current_price = resolved_price;
            }
            Decision::Buy => {
                let spend = round_cents(before.allocation * BUY_INCREMENT);
                let limit = self.risk_tier.position_limit(self.initial_budget);
                if before.allocation + spend > limit {
                    return Err(LedgerError::PositionExceedsRiskLimit {
                        ticker: ticker.to_string(),
                        allocation: before.allocation + spend,
                        tier: self.risk_tier,
                        limit,
                    });
                }
                let available = self.cash_balance();
                if spend > available {
                    return Err(LedgerError::InsufficientCash {
                        needed: spend,
                        available,
                    });
                }
                // Re-average entry so shares() stays allocation / entry_price.
                let shares = before.shares() + spend / before.current_price;
                let pos = &mut next.positions[idx];
                pos.allocation += spend;
                pos.entry_price = pos.allocation / shares;
                pos.current_price = resolved_price;
                next.cash -= spend;
            }
        }

        next.session_pl += pl_dollars;
        Ok(next)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn tickers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn make_portfolio() -> Portfolio {
        Portfolio::create(
            &tickers(&["AAPL", "MSFT", "JPM"]),
            &[dec!(400000), dec!(300000), dec!(200000)],
            RiskTier::Aggressive,
            &[dec!(100), dec!(250), dec!(150)],
            dec!(1000000),
        )
        .unwrap()
    }

    #[test]
    fn test_create_sets_cash_to_remainder() {
        let p = make_portfolio();
        assert_eq!(p.cash, dec!(100000));
        assert_eq!(p.total_value(), dec!(1000000));
        assert!(p.is_balanced());
    }

    #[test]
    fn test_create_rejects_over_budget() {
        let err = Portfolio::create(
            &tickers(&["AAPL", "MSFT", "JPM"]),
            &[dec!(450000), dec!(450000), dec!(200000)],
            RiskTier::Aggressive,
            &[dec!(100), dec!(100), dec!(100)],
            dec!(1000000),
        )
        .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBudget { .. }));
    }

    #[test]
    fn test_create_rejects_over_tier_limit() {
        let err = Portfolio::create(
            &tickers(&["AAPL"]),
            &[dec!(300000)],
            RiskTier::Conservative,
            &[dec!(100)],
            dec!(1000000),
        )
        .unwrap_err();
        match err {
            LedgerError::PositionExceedsRiskLimit { limit, .. } => assert_eq!(limit, dec!(250000)),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_balanced_tier_limit_is_33_percent() {
        assert!(Portfolio::create(
            &tickers(&["AAPL"]),
            &[dec!(330000)],
            RiskTier::Balanced,
            &[dec!(100)],
            dec!(1000000),
        )
        .is_ok());
        assert!(Portfolio::create(
            &tickers(&["AAPL"]),
            &[dec!(330000.01)],
            RiskTier::Balanced,
            &[dec!(100)],
            dec!(1000000),
        )
        .is_err());
    }

    #[test]
    fn test_create_rejects_duplicate_ticker() {
        let err = Portfolio::create(
            &tickers(&["AAPL", "aapl"]),
            &[dec!(100000), dec!(100000)],
            RiskTier::Aggressive,
            &[dec!(100), dec!(100)],
            dec!(1000000),
        )
        .unwrap_err();
        assert_eq!(err, LedgerError::DuplicateTicker("AAPL".to_string()));
    }

    #[test]
    fn test_create_rejects_bad_inputs() {
        let bad_ticker = Portfolio::create(
            &tickers(&["NOT A TICKER"]),
            &[dec!(100)],
            RiskTier::Aggressive,
            &[dec!(100)],
            dec!(1000),
        );
        assert!(matches!(bad_ticker, Err(LedgerError::InvalidTicker(_))));

        let mismatched = Portfolio::create(
            &tickers(&["AAPL", "MSFT"]),
            &[dec!(100)],
            RiskTier::Aggressive,
            &[dec!(100), dec!(100)],
            dec!(1000),
        );
        assert!(matches!(mismatched, Err(LedgerError::MismatchedInputs { .. })));

        let zero_price = Portfolio::create(
            &tickers(&["AAPL"]),
            &[dec!(100)],
            RiskTier::Aggressive,
            &[Decimal::ZERO],
            dec!(1000),
        );
        assert!(matches!(zero_price, Err(LedgerError::InvalidPrice { .. })));
    }

    #[test]
    fn test_sell_all_removes_position_and_credits_value() {
        let p = make_portfolio();
        let next = p
            .apply_decision("AAPL", Decision::SellAll, Decimal::ZERO, dec!(110))
            .unwrap();
        assert!(next.position("AAPL").is_none());
        assert_eq!(next.cash, dec!(500000));
        assert_eq!(next.cash_balance(), dec!(500000));
        assert!(next.is_balanced());
        // Original is untouched.
        assert!(p.position("AAPL").is_some());
    }

    #[test]
    fn test_sell_all_after_gain_books_realized_pl() {
        let mut p = make_portfolio();
        p.positions[0].current_price = dec!(110);
        let next = p
            .apply_decision("AAPL", Decision::SellAll, Decimal::ZERO, dec!(110))
            .unwrap();
        assert_eq!(next.realized_pl, dec!(40000));
        assert_eq!(next.cash_balance(), dec!(540000));
        assert!(next.is_balanced());
        assert_eq!(next.total_value(), p.total_value());
    }

    #[test]
    fn test_sell_half_halves_allocation() {
        let p = make_portfolio();
        let next = p
            .apply_decision("AAPL", Decision::SellHalf, dec!(20000), dec!(110))
            .unwrap();
        let pos = next.position("AAPL").unwrap();
        assert_eq!(pos.allocation, dec!(200000));
        assert_eq!(pos.shares(), dec!(2000));
        assert_eq!(pos.current_price, dec!(110));
        assert_eq!(next.cash, dec!(300000));
        assert_eq!(next.session_pl, dec!(20000));
        assert!(next.is_balanced());
    }

    #[test]
    fn test_hold_refreshes_price_only() {
        let p = make_portfolio();
        let next = p
            .apply_decision("AAPL", Decision::Hold, dec!(40000), dec!(110))
            .unwrap();
        let pos = next.position("AAPL").unwrap();
        assert_eq!(pos.allocation, dec!(400000));
        assert_eq!(pos.current_price, dec!(110));
        assert_eq!(pos.value(), dec!(440000));
        assert_eq!(next.total_value(), dec!(1040000));
        assert!(next.is_balanced());
    }

    #[test]
    fn test_buy_adds_ten_percent_from_cash() {
        let p = make_portfolio();
        let next = p
            .apply_decision("AAPL", Decision::Buy, dec!(44000), dec!(110))
            .unwrap();
        let pos = next.position("AAPL").unwrap();
        assert_eq!(pos.allocation, dec!(440000));
        assert_eq!(pos.shares(), dec!(4400));
        assert_eq!(pos.value(), dec!(484000));
        assert_eq!(next.cash, dec!(60000));
        assert!(next.is_balanced());
    }

    #[test]
    fn test_buy_rejected_without_cash() {
        let p = Portfolio::create(
            &tickers(&["AAPL", "MSFT", "JPM"]),
            &[dec!(450000), dec!(450000), dec!(100000)],
            RiskTier::Aggressive,
            &[dec!(100), dec!(100), dec!(100)],
            dec!(1000000),
        )
        .unwrap();
        let err = p
            .apply_decision("AAPL", Decision::Buy, Decimal::ZERO, dec!(100))
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientCash {
                needed: dec!(45000),
                available: Decimal::ZERO
            }
        );
    }

    #[test]
    fn test_buy_rejected_past_tier_limit() {
        let p = Portfolio::create(
            &tickers(&["AAPL"]),
            &[dec!(500000)],
            RiskTier::Aggressive,
            &[dec!(100)],
            dec!(1000000),
        )
        .unwrap();
        let err = p
            .apply_decision("AAPL", Decision::Buy, Decimal::ZERO, dec!(100))
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::PositionExceedsRiskLimit {
                ticker: "AAPL".to_string(),
                allocation: dec!(550000),
                tier: RiskTier::Aggressive,
                limit: dec!(500000),
            }
        );

        // Headroom for a partial top-up is not enough either.
        let near = Portfolio::create(
            &tickers(&["AAPL"]),
            &[dec!(460000)],
            RiskTier::Aggressive,
            &[dec!(100)],
            dec!(1000000),
        )
        .unwrap();
        assert!(matches!(
            near.apply_decision("AAPL", Decision::Buy, Decimal::ZERO, dec!(100)),
            Err(LedgerError::PositionExceedsRiskLimit { .. })
        ));
        let ok = near
            .apply_decision("AAPL", Decision::Hold, Decimal::ZERO, dec!(100))
            .unwrap();
        assert!(ok.positions.iter().all(|pos| pos.allocation <= dec!(500000)));
    }

    #[test]
    fn test_unknown_ticker_rejected() {
        let p = make_portfolio();
        let err = p
            .apply_decision("TSLA", Decision::Hold, Decimal::ZERO, dec!(1))
            .unwrap_err();
        assert_eq!(err, LedgerError::PositionNotFound("TSLA".to_string()));
    }

    #[test]
    fn test_invariant_holds_across_decision_sequence() {
        let mut p = make_portfolio();
        let steps = [
            ("AAPL", Decision::Hold, dec!(97.13)),
            ("MSFT", Decision::SellHalf, dec!(263.41)),
            ("JPM", Decision::Buy, dec!(151.07)),
            ("AAPL", Decision::Buy, dec!(101.99)),
            ("MSFT", Decision::SellAll, dec!(240.00)),
            ("JPM", Decision::SellHalf, dec!(148.33)),
        ];
        for (ticker, decision, price) in steps {
            p = p.apply_decision(ticker, decision, Decimal::ZERO, price).unwrap();
            assert!(p.is_balanced(), "identity broken after {decision} on {ticker}");
            assert!(p.cash_balance() >= Decimal::ZERO);
        }
    }

    #[test]
    fn test_round_cents() {
        assert_eq!(round_cents(dec!(1.005)), dec!(1.01));
        assert_eq!(round_cents(dec!(-1.005)), dec!(-1.01));
        assert_eq!(round_cents(dec!(2.344)), dec!(2.34));
    }

    #[test]
    fn test_risk_tier_parse() {
        assert_eq!("Aggressive".parse::<RiskTier>().unwrap(), RiskTier::Aggressive);
        assert_eq!("moderate".parse::<RiskTier>().unwrap(), RiskTier::Balanced);
        assert!("reckless".parse::<RiskTier>().is_err());
    }
}
