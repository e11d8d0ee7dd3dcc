//! Round orchestration engine.
//!
//! - **state**: the phase machine every session moves through
//! - **gather**: per-round data assembly (event first, then the provider
//!   fan-out, then the neutral tip)
//! - **resolver**: matcher → calculator → ledger → behavior flags
//! - **driver**: the `Orchestrator` tying sessions, storage and providers
//!   together, plus the channel-driven session loop

pub mod driver;
pub mod gather;
pub mod resolver;
pub mod state;

pub use driver::Orchestrator;
pub use state::{transition, PhaseEvent};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::ledger::LedgerError;
use crate::types::{
    BehavioralProfile, Commentary, DataPanel, Degradation, MarketEvent, RoundPhase, RoundRecord,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("Portfolio not found: {0}")]
    PortfolioNotFound(Uuid),

    #[error("Invalid transition: {event} in phase {from}")]
    InvalidTransition { from: RoundPhase, event: PhaseEvent },

    #[error("Round {got} is out of order (session is at round {expected})")]
    RoundOutOfOrder { expected: u32, got: u32 },

    #[error("BUY needs {needed} but only {available} cash is available")]
    InsufficientCash { needed: Decimal, available: Decimal },

    #[error("Session {0} was abandoned before a decision arrived")]
    SessionAbandoned(Uuid),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<LedgerError> for EngineError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InsufficientCash { needed, available } => {
                EngineError::InsufficientCash { needed, available }
            }
            other => EngineError::Validation(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(e: anyhow::Error) -> Self {
        EngineError::Storage(format!("{e:#}"))
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Outbound payload for a round that is ready for a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundPayload {
    pub session_id: Uuid,
    pub round_number: u32,
    pub total_rounds: u32,
    pub ticker: String,
    pub position_allocation: Decimal,
    pub event: MarketEvent,
    pub commentary: Commentary,
    pub panel: DataPanel,
    pub degraded: Vec<Degradation>,
}

impl RoundPayload {
    pub fn from_record(session_id: Uuid, total_rounds: u32, record: &RoundRecord) -> Self {
        Self {
            session_id,
            round_number: record.round_number,
            total_rounds,
            ticker: record.ticker.clone(),
            position_allocation: record.position_allocation,
            event: record.event.clone(),
            commentary: record.commentary.clone(),
            panel: record.panel.clone(),
            degraded: record.degraded.clone(),
        }
    }
}

/// End-of-session summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalReport {
    pub session_id: Uuid,
    pub profile: BehavioralProfile,
    pub final_value: Decimal,
    /// Final value minus the initial budget. Unlike the behavior
    /// metrics' `total_pl`, this includes every open position's mark.
    pub net_change: Decimal,
    pub total_return_pct: Decimal,
}

/// Outbound payload for a resolved round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundOutcome {
    pub session_id: Uuid,
    pub record: RoundRecord,
    pub portfolio_value: Decimal,
    pub cash_balance: Decimal,
    pub phase: RoundPhase,
    pub report: Option<FinalReport>,
}

/// Result of submitting a decision. A replayed decision for an already
/// finalized round is not an error; it returns the stored outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Applied(RoundOutcome),
    Duplicate(RoundOutcome),
}

impl Resolution {
    pub fn outcome(&self) -> &RoundOutcome {
        match self {
            Resolution::Applied(o) | Resolution::Duplicate(o) => o,
        }
    }

    pub fn into_outcome(self) -> RoundOutcome {
        match self {
            Resolution::Applied(o) | Resolution::Duplicate(o) => o,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Resolution::Duplicate(_))
    }
}
