//! Historical case matcher.
//!
//! Candidate sets are tried in strict priority order and the first
//! non-empty one wins:
//!   1. exact ticker + event type
//!   2. same sector + event type
//!   3. event type only
//! One case is then drawn uniformly from the winning set. The horizon is
//! carried for logging only; cases keep their own recorded horizon.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use tracing::{debug, warn};

use super::ReplayError;
use crate::types::{EventType, HistoricalCase, OutcomeSummary};

/// Which fallback tier produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTier {
    ExactTicker,
    Sector,
    EventType,
}

impl fmt::Display for MatchTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchTier::ExactTicker => write!(f, "exact_ticker"),
            MatchTier::Sector => write!(f, "sector"),
            MatchTier::EventType => write!(f, "event_type"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseMatch {
    pub case: HistoricalCase,
    pub tier: MatchTier,
    /// Size of the winning candidate set.
    pub candidates: usize,
}

pub struct Matcher {
    cases: Vec<HistoricalCase>,
    sectors: HashMap<String, String>,
    rng: Mutex<StdRng>,
}

impl Matcher {
    /// Build a matcher over `cases`. Malformed cases (path length not
    /// horizon + 1, non-positive day-0 price) are dropped with a warning.
    pub fn new(cases: Vec<HistoricalCase>, sectors: HashMap<String, String>, seed: Option<u64>) -> Self {
        let total = cases.len();
        let cases: Vec<HistoricalCase> = cases.into_iter().filter(|c| c.is_well_formed()).collect();
        if cases.len() < total {
            warn!(
                dropped = total - cases.len(),
                kept = cases.len(),
                "Dropped malformed historical cases"
            );
        }
        let sectors = sectors
            .into_iter()
            .map(|(k, v)| (k.to_uppercase(), v))
            .collect();
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self {
            cases,
            sectors,
            rng: Mutex::new(rng),
        }
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    /// Sector for `ticker`: configured lookup first, then any stored case
    /// for the same ticker.
    pub fn sector_of(&self, ticker: &str) -> Option<&str> {
        let key = ticker.to_uppercase();
        self.sectors.get(&key).map(String::as_str).or_else(|| {
            self.cases
                .iter()
                .find(|c| c.ticker == key)
                .map(|c| c.sector.as_str())
        })
    }

    /// Select one historical window for the round.
    pub fn sample(
        &self,
        ticker: &str,
        event_type: EventType,
        horizon_days: u32,
    ) -> Result<CaseMatch, ReplayError> {
        let ticker = ticker.to_uppercase();
        let by_event: Vec<&HistoricalCase> = self
            .cases
            .iter()
            .filter(|c| c.event_type == event_type)
            .collect();

        let exact: Vec<&HistoricalCase> =
            by_event.iter().copied().filter(|c| c.ticker == ticker).collect();

        let sector: Vec<&HistoricalCase> = match self.sector_of(&ticker) {
            Some(s) => by_event.iter().copied().filter(|c| c.sector == s).collect(),
            None => Vec::new(),
        };

        let (pool, tier) = if !exact.is_empty() {
            (exact, MatchTier::ExactTicker)
        } else if !sector.is_empty() {
            (sector, MatchTier::Sector)
        } else if !by_event.is_empty() {
            (by_event, MatchTier::EventType)
        } else {
            return Err(ReplayError::NotFound { ticker, event_type });
        };

        let chosen = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            pool.choose(&mut *rng).copied()
        };
        let case = chosen
            .cloned()
            .ok_or_else(|| ReplayError::NotFound { ticker: ticker.clone(), event_type })?;

        debug!(
            ticker = %ticker,
            event_type = %event_type,
            horizon_days,
            tier = %tier,
            candidates = pool.len(),
            case_date = %case.date,
            "Historical case matched"
        );

        Ok(CaseMatch {
            case,
            tier,
            candidates: pool.len(),
        })
    }

    /// Median returns per action across every stored case of `event_type`.
    pub fn summarize(&self, event_type: EventType) -> Option<OutcomeSummary> {
        let mut returns: Vec<Decimal> = self
            .cases
            .iter()
            .filter(|c| c.event_type == event_type)
            .map(HistoricalCase::return_pct)
            .collect();
        if returns.is_empty() {
            return None;
        }
        returns.sort();
        let hold = median_sorted(&returns);
        Some(OutcomeSummary {
            similar_cases: returns.len(),
            sell_all_median: Decimal::ZERO,
            sell_half_median: hold / Decimal::TWO,
            hold_median: hold,
        })
    }
}

fn median_sorted(values: &[Decimal]) -> Decimal {
    let n = values.len();
    if n == 0 {
        return Decimal::ZERO;
    }
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / Decimal::TWO
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
