//! Headline stance, consensus, and contradiction scoring.
//!
//! Raw headlines from a news provider are classified with a keyword
//! sentiment score and then aggregated against the commentator's stance.

use crate::types::{CommentatorStance, Consensus, Headline, HeadlineStance, NewsItem};

const BULLISH_WORDS: &[&str] = &[
    "beat", "surge", "soar", "rally", "jump", "gain", "rise", "record", "upgrade",
    "outperform", "approval", "approve", "breakthrough", "strong", "growth", "boost",
    "bullish", "optimis", "raise",
];

const BEARISH_WORDS: &[&str] = &[
    "miss", "plunge", "tumble", "slump", "drop", "fall", "decline", "downgrade",
    "underperform", "recall", "probe", "investigat", "lawsuit", "fine", "weak", "loss",
    "warning", "warn", "bearish", "fear", "crash", "cut",
];

/// Scores above this are Bull, below its negation Bear.
pub const STANCE_THRESHOLD: f64 = 0.3;

/// Keyword sentiment: -1.0 (all bearish hits) to +1.0 (all bullish hits),
/// 0.0 when no keyword matches.
pub fn sentiment_score(text: &str) -> f64 {
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    let pos = words
        .iter()
        .filter(|w| BULLISH_WORDS.iter().any(|k| w.starts_with(k)))
        .count() as f64;
    let neg = words
        .iter()
        .filter(|w| BEARISH_WORDS.iter().any(|k| w.starts_with(k)))
        .count() as f64;

    let denom = pos + neg;
    if denom == 0.0 {
        return 0.0;
    }
    (pos - neg) / denom
}

pub fn classify_stance(title: &str) -> HeadlineStance {
    let score = sentiment_score(title);
    if score > STANCE_THRESHOLD {
        HeadlineStance::Bull
    } else if score < -STANCE_THRESHOLD {
        HeadlineStance::Bear
    } else {
        HeadlineStance::Neutral
    }
}

pub fn classify_headlines(items: &[NewsItem]) -> Vec<Headline> {
    items
        .iter()
        .map(|item| Headline {
            title: item.title.clone(),
            source: item.source.clone(),
            stance: classify_stance(&item.title),
        })
        .collect()
}

/// Aggregate headline stances into a consensus label.
pub fn consensus(headlines: &[Headline]) -> Consensus {
    if headlines.is_empty() {
        return Consensus::NoData;
    }
    let total = headlines.len() as f64;
    let bull = headlines.iter().filter(|h| h.stance == HeadlineStance::Bull).count() as f64 / total;
    let bear = headlines.iter().filter(|h| h.stance == HeadlineStance::Bear).count() as f64 / total;

    if bull >= 0.67 {
        Consensus::TwoThirdsBull
    } else if bear >= 0.67 {
        Consensus::TwoThirdsBear
    } else if bull > 0.5 {
        Consensus::MajorityBull
    } else if bear > 0.5 {
        Consensus::MajorityBear
    } else {
        Consensus::Mixed
    }
}

/// Share of headlines opposing the commentator, rounded to two decimals.
/// Always within [0, 1]; zero for an empty list.
pub fn contradiction_score(headlines: &[Headline], stance: CommentatorStance) -> f64 {
    if headlines.is_empty() {
        return 0.0;
    }
    let opposing = headlines.iter().filter(|h| h.stance.opposes(stance)).count();
    let ratio = opposing as f64 / headlines.len() as f64;
    ((ratio * 100.0).round() / 100.0).clamp(0.0, 1.0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
