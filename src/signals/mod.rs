//! Signals derived internally from provider output.
//!
//! Providers hand back raw text and numbers; everything the behavior
//! rules depend on (stance labels, consensus, contradiction, price
//! pattern, volatility bucket, rational baseline) is computed here so it
//! stays deterministic and testable without any network access.

pub mod news;
pub mod price;

pub use news::{classify_headlines, consensus, contradiction_score};
pub use price::{detect_pattern, realized_volatility, volatility_level};

use crate::types::CommentatorStance;

const BEARISH_EVENT_WORDS: &[&str] = &["miss", "down", "fine", "investigation", "recall", "warning"];
const BULLISH_EVENT_WORDS: &[&str] = &["beat", "up", "approval", "breakthrough", "upgrade", "surge"];

/// Stance a disciplined reader would take from the event text alone.
/// Bearish keywords are checked first; `None` when neither side matches.
pub fn rational_baseline(description: &str) -> Option<CommentatorStance> {
    let lower = description.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let hit = |keywords: &[&str]| words.iter().any(|w| keywords.iter().any(|k| w.starts_with(k)));

    if hit(BEARISH_EVENT_WORDS) {
        Some(CommentatorStance::Bearish)
    } else if hit(BULLISH_EVENT_WORDS) {
        Some(CommentatorStance::Bullish)
    } else {
        None
    }
}
