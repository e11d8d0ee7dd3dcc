//! Session-level behavioral classification.
//!
//! Literal additive scoring over three buckets. Every threshold comes from
//! `BehaviorThresholds` so the label can be explained line by line.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::BehaviorThresholds;
use crate::types::{
    BehaviorFlag, BehaviorMetrics, Decision, ProfileClass, ProfileScores, RoundRecord,
};

pub const MIN_COACHING_TIPS: usize = 2;
pub const MAX_COACHING_TIPS: usize = 4;

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Aggregate finalized rounds into session metrics.
pub fn summarize(records: &[RoundRecord], initial_budget: Decimal) -> BehaviorMetrics {
    let finalized: Vec<&RoundRecord> = records.iter().filter(|r| r.is_finalized()).collect();
    let total = finalized.len();
    let rate = |count: usize| if total == 0 { 0.0 } else { count as f64 / total as f64 };
    let count_flag = |flag: BehaviorFlag| finalized.iter().filter(|r| r.has_flag(flag)).count();

    let opened = finalized
        .iter()
        .filter(|r| r.resolution.as_ref().is_some_and(|res| res.opened_data_panel))
        .count();
    let aligned = finalized
        .iter()
        .filter(|r| r.decision().is_some_and(|d| r.panel.consensus.aligns_with(d)))
        .count();
    let trims = finalized
        .iter()
        .filter(|r| r.decision() == Some(Decision::SellHalf))
        .count();

    let average_position_fraction = if total == 0 || initial_budget.is_zero() {
        0.0
    } else {
        let sum: Decimal = finalized
            .iter()
            .map(|r| r.position_allocation / initial_budget)
            .sum();
        (sum / Decimal::from(total)).to_f64().unwrap_or(0.0)
    };

    // Peak-to-trough of cumulative P/L, starting from zero.
    let mut cumulative = Decimal::ZERO;
    let mut peak = Decimal::ZERO;
    let mut max_drawdown = Decimal::ZERO;
    for r in &finalized {
        cumulative += r.pl_dollars();
        peak = peak.max(cumulative);
        max_drawdown = max_drawdown.max(peak - cumulative);
    }
    let max_drawdown_fraction = if initial_budget.is_zero() {
        0.0
    } else {
        (max_drawdown / initial_budget).to_f64().unwrap_or(0.0)
    };

    BehaviorMetrics {
        total_rounds: total as u32,
        data_panel_usage_rate: rate(opened),
        consensus_alignment_rate: rate(aligned),
        panic_sell_count: count_flag(BehaviorFlag::PanicSell) as u32,
        chased_spike_count: count_flag(BehaviorFlag::ChasedSpike) as u32,
        high_contradiction_follow_count: count_flag(BehaviorFlag::FollowedCommentatorHighContradiction)
            as u32,
        resisted_commentator_count: count_flag(BehaviorFlag::ResistedCommentator) as u32,
        sell_half_share: rate(trims),
        average_position_fraction,
        max_drawdown_fraction,
        total_pl: cumulative,
    }
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

pub fn score(m: &BehaviorMetrics, t: &BehaviorThresholds) -> ProfileScores {
    let total = m.total_rounds.max(1) as f64;
    let follow_rate = m.high_contradiction_follow_count as f64 / total;
    let resisted_rate = m.resisted_commentator_count as f64 / total;

    let mut s = ProfileScores::default();

    if m.data_panel_usage_rate > t.rational_data_usage {
        s.rational += 1;
    }
    if m.consensus_alignment_rate > t.rational_consensus_alignment {
        s.rational += 1;
    }
    if resisted_rate > t.resisted_rate {
        s.rational += 1;
    }
    if m.total_pl > Decimal::ZERO {
        s.rational += 1;
    }

    if follow_rate > t.emotional_follow_rate {
        s.emotional += 2;
    }
    if m.panic_sell_count > t.emotional_panic_count {
        s.emotional += 2;
    }
    if m.chased_spike_count > t.emotional_chase_count {
        s.emotional += 1;
    }
    if m.data_panel_usage_rate < t.emotional_data_usage {
        s.emotional += 1;
    }

    if m.sell_half_share > t.conservative_trim_share {
        s.conservative += 2;
    }
    if m.average_position_fraction < t.small_position_fraction {
        s.conservative += 1;
    }
    if m.max_drawdown_fraction < t.low_drawdown_fraction {
        s.conservative += 1;
    }

    s
}

pub fn label(s: &ProfileScores) -> ProfileClass {
    if s.rational >= 3 && s.emotional == 0 {
        ProfileClass::Rational
    } else if s.emotional >= 3 {
        ProfileClass::Emotional
    } else if s.conservative >= 2 {
        ProfileClass::Conservative
    } else {
        ProfileClass::Balanced
    }
}

/// Metrics, scores and label for a completed session.
pub fn classify(
    records: &[RoundRecord],
    initial_budget: Decimal,
    t: &BehaviorThresholds,
) -> (ProfileClass, BehaviorMetrics, ProfileScores) {
    let metrics = summarize(records, initial_budget);
    let scores = score(&metrics, t);
    (label(&scores), metrics, scores)
}

// ---------------------------------------------------------------------------
// Coaching
// ---------------------------------------------------------------------------

/// Everything a coaching provider is seeded with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoachingRequest {
    pub classification: ProfileClass,
    pub metrics: BehaviorMetrics,
    pub best_round: Option<RoundRecord>,
    pub worst_round: Option<RoundRecord>,
}

impl CoachingRequest {
    pub fn new(classification: ProfileClass, metrics: BehaviorMetrics, records: &[RoundRecord]) -> Self {
        let finalized = || records.iter().filter(|r| r.is_finalized());
        let best_round = finalized().max_by_key(|r| r.pl_percent()).cloned();
        let worst_round = finalized().min_by_key(|r| r.pl_percent()).cloned();
        Self {
            classification,
            metrics,
            best_round,
            worst_round,
        }
    }
}

/// Profile-specific tips used when the coaching provider fails.
pub fn fallback_coaching(class: ProfileClass) -> Vec<String> {
    let tips: [&str; 3] = match class {
        ProfileClass::Rational => [
            "Your data-driven approach is working. Keep checking the data panel before you commit.",
            "Consider partial adjustments (Sell Half) in uncertain scenarios to cut risk while staying exposed.",
            "You resisted the commentator effectively. Keep trusting evidence over emotion.",
        ],
        ProfileClass::Emotional => [
            "Open the data panel before every decision to ground your choice in evidence.",
            "When headlines strongly disagree with the commentator (over 70% contradiction), trust the data.",
            "Avoid panic selling after three down days; historically these often recover.",
        ],
        ProfileClass::Conservative => [
            "Your risk management is solid, but consider staying exposed on high-conviction plays.",
            "Trimming early limited downside but also gave up upside on strong signals.",
            "Balance protection with opportunity: hold through clear positive catalysts.",
        ],
        ProfileClass::Balanced => [
            "Your mix of approaches is working. Focus on consistency in your decision framework.",
            "Use the data panel more often to make evidence-based decisions.",
            "Build on your wins while learning from your misses.",
        ],
    };
    tips.iter().map(|s| s.to_string()).collect()
}

/// Trim provider tips to 2 to 4 non-empty entries, padding from the fallback set.
pub fn normalize_tips(tips: Vec<String>, class: ProfileClass) -> Vec<String> {
    let mut out: Vec<String> = tips
        .into_iter()
        .map(|t| t.trim().trim_start_matches(['-', '*', '•']).trim().to_string())
        .filter(|t| !t.is_empty())
        .take(MAX_COACHING_TIPS)
        .collect();
    if out.len() < MIN_COACHING_TIPS {
        for tip in fallback_coaching(class) {
            if out.len() >= MIN_COACHING_TIPS {
                break;
            }
            if !out.contains(&tip) {
                out.push(tip);
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::tests::make_record;
    use crate::types::{Consensus, EventType, HistoricalCase, RoundResolution};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn finalize(
        mut r: RoundRecord,
        decision: Decision,
        opened: bool,
        pl: Decimal,
        flags: Vec<BehaviorFlag>,
    ) -> RoundRecord {
        r.resolution = Some(RoundResolution {
            decision,
            opened_data_panel: opened,
            decision_latency_secs: 4.0,
            historical_case: HistoricalCase::synthetic("AAPL", EventType::EarningsSurprise, 3, dec!(100)),
            pl_dollars: pl,
            pl_percent: pl / r.position_allocation,
            behavior_flags: flags,
            explanation: String::new(),
            resolved_at: Utc::now(),
        });
        r
    }

    fn bullish_round(n: u32) -> RoundRecord {
        let mut r = make_record(n);
        r.panel.consensus = Consensus::TwoThirdsBull;
        r
    }

    #[test]
    fn test_rational_scenario() {
        // 6/7 opened (0.857), 5/7 aligned (0.714), positive P/L, no flags.
        let mut records = Vec::new();
        for n in 1..=5 {
            records.push(finalize(bullish_round(n), Decision::Hold, true, dec!(1000), vec![]));
        }
        let mut mixed = make_record(6);
        mixed.panel.consensus = Consensus::Mixed;
        records.push(finalize(mixed, Decision::SellHalf, true, dec!(-200), vec![]));
        let mut mixed = make_record(7);
        mixed.panel.consensus = Consensus::Mixed;
        records.push(finalize(
            mixed,
            Decision::Hold,
            false,
            dec!(300),
            vec![BehaviorFlag::IgnoredData],
        ));

        let (class, m, s) = classify(&records, dec!(1000000), &BehaviorThresholds::default());
        assert!((m.data_panel_usage_rate - 6.0 / 7.0).abs() < 1e-9);
        assert!((m.consensus_alignment_rate - 5.0 / 7.0).abs() < 1e-9);
        assert_eq!(m.panic_sell_count, 0);
        assert_eq!(m.chased_spike_count, 0);
        assert!(m.total_pl > Decimal::ZERO);
        assert_eq!(s.rational, 3);
        assert_eq!(s.emotional, 0);
        assert_eq!(class, ProfileClass::Rational);
    }

    #[test]
    fn test_emotional_scenario() {
        // 4/7 followed under high contradiction (0.57), 3 panic sells.
        let mut records = Vec::new();
        for n in 1..=3 {
            records.push(finalize(
                make_record(n),
                Decision::SellAll,
                false,
                Decimal::ZERO,
                vec![
                    BehaviorFlag::PanicSell,
                    BehaviorFlag::IgnoredData,
                    BehaviorFlag::FollowedCommentatorHighContradiction,
                ],
            ));
        }
        records.push(finalize(
            make_record(4),
            Decision::SellHalf,
            true,
            dec!(-500),
            vec![BehaviorFlag::FollowedCommentatorHighContradiction],
        ));
        for n in 5..=7 {
            records.push(finalize(make_record(n), Decision::Hold, true, dec!(100), vec![]));
        }

        let (class, m, s) = classify(&records, dec!(1000000), &BehaviorThresholds::default());
        assert_eq!(m.high_contradiction_follow_count, 4);
        assert_eq!(m.panic_sell_count, 3);
        assert!(s.emotional >= 4);
        assert_eq!(class, ProfileClass::Emotional);
    }

    #[test]
    fn test_conservative_label() {
        let records: Vec<RoundRecord> = (1..=4)
            .map(|n| finalize(make_record(n), Decision::SellHalf, true, dec!(-100), vec![]))
            .collect();
        let (class, m, s) = classify(&records, dec!(1000000), &BehaviorThresholds::default());
        assert_eq!(m.sell_half_share, 1.0);
        assert!(s.conservative >= 2);
        assert_eq!(class, ProfileClass::Conservative);
    }

    #[test]
    fn test_balanced_when_nothing_dominates() {
        let s = ProfileScores {
            rational: 2,
            emotional: 1,
            conservative: 1,
        };
        assert_eq!(label(&s), ProfileClass::Balanced);
        let s = ProfileScores {
            rational: 4,
            emotional: 1,
            conservative: 0,
        };
        assert_eq!(label(&s), ProfileClass::Balanced);
    }

    #[test]
    fn test_drawdown_and_sizing() {
        let records = vec![
            finalize(make_record(1), Decision::Hold, true, dec!(50000), vec![]),
            finalize(make_record(2), Decision::Hold, true, dec!(-80000), vec![]),
            finalize(make_record(3), Decision::Hold, true, dec!(10000), vec![]),
        ];
        let m = summarize(&records, dec!(1000000));
        assert!((m.max_drawdown_fraction - 0.08).abs() < 1e-9);
        assert!((m.average_position_fraction - 0.1).abs() < 1e-9);
        assert_eq!(m.total_pl, dec!(-20000));
    }

    #[test]
    fn test_unfinalized_rounds_ignored() {
        let records = vec![
            finalize(make_record(1), Decision::Hold, true, dec!(10), vec![]),
            make_record(2),
        ];
        let m = summarize(&records, dec!(1000));
        assert_eq!(m.total_rounds, 1);
        assert_eq!(m.data_panel_usage_rate, 1.0);
    }

    #[test]
    fn test_coaching_request_extremes() {
        let records = vec![
            finalize(make_record(1), Decision::Hold, true, dec!(5000), vec![]),
            finalize(make_record(2), Decision::Hold, true, dec!(-3000), vec![]),
            finalize(make_record(3), Decision::Hold, true, dec!(100), vec![]),
        ];
        let m = summarize(&records, dec!(1000000));
        let req = CoachingRequest::new(ProfileClass::Balanced, m, &records);
        assert_eq!(req.best_round.unwrap().round_number, 1);
        assert_eq!(req.worst_round.unwrap().round_number, 2);
    }

    #[test]
    fn test_fallback_coaching_has_three_tips() {
        for class in [
            ProfileClass::Rational,
            ProfileClass::Emotional,
            ProfileClass::Conservative,
            ProfileClass::Balanced,
        ] {
            assert_eq!(fallback_coaching(class).len(), 3);
        }
    }

    #[test]
    fn test_normalize_tips() {
        let long: Vec<String> = (0..6).map(|i| format!("- tip {i}")).collect();
        let out = normalize_tips(long, ProfileClass::Balanced);
        assert_eq!(out.len(), 4);
        assert_eq!(out[0], "tip 0");

        let short = normalize_tips(vec!["Only one".to_string(), "  ".to_string()], ProfileClass::Emotional);
        assert_eq!(short.len(), 2);
        assert_eq!(short[0], "Only one");
        assert_eq!(short[1], fallback_coaching(ProfileClass::Emotional)[0]);
    }
}
