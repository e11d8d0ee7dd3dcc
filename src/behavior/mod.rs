//! Behavior rule engine.
//!
//! Per-round flags are a pure function of the round's data fields plus
//! the player's decision input. Session-level classification lives in
//! `profile`.

pub mod profile;

pub use profile::{classify, fallback_coaching, normalize_tips, summarize, CoachingRequest};

use crate::config::BehaviorThresholds;
use crate::types::{
    BehaviorFlag, Decision, DecisionInput, PricePattern, RoundRecord, VolatilityLevel,
};

/// Flags for one round, in a fixed order.
pub fn detect_flags(
    record: &RoundRecord,
    input: &DecisionInput,
    thresholds: &BehaviorThresholds,
) -> Vec<BehaviorFlag> {
    let mut flags = Vec::new();
    let decision = input.decision;
    let pattern = record.panel.pattern;

    if decision == Decision::SellAll && pattern == PricePattern::ThreeDownCloses {
        flags.push(BehaviorFlag::PanicSell);
    }

    if decision == Decision::Buy
        && pattern == PricePattern::ThreeUpCloses
        && record.panel.volatility == VolatilityLevel::High
    {
        flags.push(BehaviorFlag::ChasedSpike);
    }

    if !input.opened_data_panel {
        flags.push(BehaviorFlag::IgnoredData);
    }

    if record.panel.contradiction_score > thresholds.high_contradiction {
        if record.commentary.stance.agrees_with(decision) {
            flags.push(BehaviorFlag::FollowedCommentatorHighContradiction);
        } else {
            flags.push(BehaviorFlag::ResistedCommentator);
        }
    }

    flags
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
