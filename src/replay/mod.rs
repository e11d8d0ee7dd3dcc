//! Historical outcome replay.
//!
//! - **matcher**: picks a historical price window for (ticker, event type)
//!   through a ticker → sector → event-type fallback chain
//! - **calculator**: turns a decision plus that window into P/L

pub mod calculator;
pub mod matcher;

pub use calculator::{evaluate, Outcome};
pub use matcher::{CaseMatch, Matcher, MatchTier};

use thiserror::Error;

use crate::types::EventType;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReplayError {
    /// No case of this event type exists anywhere in the store.
    #[error("No historical case for {event_type} (requested for {ticker})")]
    NotFound { ticker: String, event_type: EventType },
}
