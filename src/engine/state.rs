//! Session phase machine: `(RoundPhase, PhaseEvent) -> RoundPhase`.
//!
//! ```text
//! AwaitingSetup -> RoundPending(1) -> RoundDataReady(n) -> AwaitingDecision(n)
//!     -> RoundResolved(n) -> RoundPending(n+1) | Completed
//! ```
//!
//! Pure and total: every pair not listed is rejected, so no phase can be
//! skipped or re-entered.

use std::fmt;

use super::EngineError;
use crate::types::RoundPhase;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    /// A valid portfolio is attached to the session.
    PortfolioReady,
    /// Event text, commentary and panel data are assembled.
    DataGathered,
    /// The round payload was handed to the transport.
    PayloadDelivered,
    /// The decision was replayed, applied and flagged.
    DecisionResolved,
    /// Move on to the next round or finish.
    Advance,
}

impl fmt::Display for PhaseEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PhaseEvent::PortfolioReady => "PortfolioReady",
            PhaseEvent::DataGathered => "DataGathered",
            PhaseEvent::PayloadDelivered => "PayloadDelivered",
            PhaseEvent::DecisionResolved => "DecisionResolved",
            PhaseEvent::Advance => "Advance",
        };
        f.write_str(s)
    }
}

pub fn transition(
    phase: RoundPhase,
    event: PhaseEvent,
    total_rounds: u32,
) -> Result<RoundPhase, EngineError> {
    use PhaseEvent::*;
    use RoundPhase::*;

    let next = match (phase, event) {
        (AwaitingSetup, PortfolioReady) => RoundPending(1),
        (RoundPending(n), DataGathered) => RoundDataReady(n),
        (RoundDataReady(n), PayloadDelivered) => AwaitingDecision(n),
        (AwaitingDecision(n), DecisionResolved) => RoundResolved(n),
        (RoundResolved(n), Advance) if n < total_rounds => RoundPending(n + 1),
        (RoundResolved(_), Advance) => Completed,
        (from, event) => return Err(EngineError::InvalidTransition { from, event }),
    };
    Ok(next)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn drive(total: u32) -> Vec<RoundPhase> {
        let mut phase = RoundPhase::AwaitingSetup;
        let mut seen = vec![phase];
        phase = transition(phase, PhaseEvent::PortfolioReady, total).unwrap();
        seen.push(phase);
        while phase != RoundPhase::Completed {
            for ev in [
                PhaseEvent::DataGathered,
                PhaseEvent::PayloadDelivered,
                PhaseEvent::DecisionResolved,
                PhaseEvent::Advance,
            ] {
                phase = transition(phase, ev, total).unwrap();
                seen.push(phase);
            }
        }
        seen
    }

    #[test]
    fn test_full_walk_visits_every_phase_in_order() {
        let seen = drive(2);
        assert_eq!(
            seen,
            vec![
                RoundPhase::AwaitingSetup,
                RoundPhase::RoundPending(1),
                RoundPhase::RoundDataReady(1),
                RoundPhase::AwaitingDecision(1),
                RoundPhase::RoundResolved(1),
                RoundPhase::RoundPending(2),
                RoundPhase::RoundDataReady(2),
                RoundPhase::AwaitingDecision(2),
                RoundPhase::RoundResolved(2),
                RoundPhase::Completed,
            ]
        );
    }

    #[test]
    fn test_single_round_session_completes() {
        assert_eq!(drive(1).last(), Some(&RoundPhase::Completed));
    }

    #[test]
    fn test_skips_are_rejected() {
        let err = transition(RoundPhase::RoundPending(1), PhaseEvent::DecisionResolved, 3).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidTransition {
                from: RoundPhase::RoundPending(1),
                event: PhaseEvent::DecisionResolved
            }
        ));
        assert!(transition(RoundPhase::AwaitingDecision(2), PhaseEvent::Advance, 3).is_err());
        assert!(transition(RoundPhase::Completed, PhaseEvent::Advance, 3).is_err());
        assert!(transition(RoundPhase::AwaitingSetup, PhaseEvent::DataGathered, 3).is_err());
    }

    #[test]
    fn test_no_reentry_after_completion() {
        for ev in [
            PhaseEvent::PortfolioReady,
            PhaseEvent::DataGathered,
            PhaseEvent::PayloadDelivered,
            PhaseEvent::DecisionResolved,
            PhaseEvent::Advance,
        ] {
            assert!(transition(RoundPhase::Completed, ev, 3).is_err());
        }
    }
}
