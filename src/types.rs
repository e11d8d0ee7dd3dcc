//! Shared types for the Market Mayhem engine.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that the replay, behavior, engine
//! and storage modules can all build on them.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

/// The four actions a player can take on the round's ticker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    SellAll,
    SellHalf,
    Hold,
    Buy,
}

impl Decision {
    pub const ALL: &'static [Decision] = &[
        Decision::SellAll,
        Decision::SellHalf,
        Decision::Hold,
        Decision::Buy,
    ];

    /// HOLD and BUY keep (or add) exposure.
    pub fn is_risk_on(&self) -> bool {
        matches!(self, Decision::Hold | Decision::Buy)
    }

    /// SELL_ALL and SELL_HALF reduce exposure.
    pub fn is_exit(&self) -> bool {
        matches!(self, Decision::SellAll | Decision::SellHalf)
    }

    /// Human-readable name.
    pub fn display_name(&self) -> &'static str {
        match self {
            Decision::SellAll => "Sell All",
            Decision::SellHalf => "Sell Half",
            Decision::Hold => "Hold",
            Decision::Buy => "Buy",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::SellAll => write!(f, "SELL_ALL"),
            Decision::SellHalf => write!(f, "SELL_HALF"),
            Decision::Hold => write!(f, "HOLD"),
            Decision::Buy => write!(f, "BUY"),
        }
    }
}

impl std::str::FromStr for Decision {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().replace([' ', '-'], "_").as_str() {
            "SELL_ALL" => Ok(Decision::SellAll),
            "SELL_HALF" => Ok(Decision::SellHalf),
            "HOLD" => Ok(Decision::Hold),
            "BUY" => Ok(Decision::Buy),
            _ => Err(anyhow::anyhow!("Unknown decision: {s}")),
        }
    }
}

/// What the transport delivers when the player commits to an action.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecisionInput {
    pub decision: Decision,
    pub opened_data_panel: bool,
    /// Seconds between the round payload being shown and the decision.
    pub decision_latency_secs: f64,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Scripted market event categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    EarningsSurprise,
    RegulatoryNews,
    AnalystAction,
    VolatilitySpike,
    ProductNews,
    MacroEvent,
}

impl EventType {
    pub const ALL: &'static [EventType] = &[
        EventType::EarningsSurprise,
        EventType::RegulatoryNews,
        EventType::AnalystAction,
        EventType::VolatilitySpike,
        EventType::ProductNews,
        EventType::MacroEvent,
    ];

    /// Default resolution window in trading days.
    pub fn default_horizon(&self) -> u32 {
        match self {
            EventType::EarningsSurprise => 3,
            EventType::RegulatoryNews => 5,
            EventType::AnalystAction => 3,
            EventType::VolatilitySpike => 2,
            EventType::ProductNews => 4,
            EventType::MacroEvent => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::EarningsSurprise => "EARNINGS_SURPRISE",
            EventType::RegulatoryNews => "REGULATORY_NEWS",
            EventType::AnalystAction => "ANALYST_ACTION",
            EventType::VolatilitySpike => "VOLATILITY_SPIKE",
            EventType::ProductNews => "PRODUCT_NEWS",
            EventType::MacroEvent => "MACRO_EVENT",
        }
    }

    /// "EARNINGS_SURPRISE" -> "earnings surprise"
    pub fn phrase(&self) -> String {
        self.as_str().replace('_', " ").to_lowercase()
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase().replace([' ', '-'], "_");
        EventType::ALL
            .iter()
            .copied()
            .find(|e| e.as_str() == normalized)
            .ok_or_else(|| anyhow::anyhow!("Unknown event type: {s}"))
    }
}

/// Difficulty selects which event types a session draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Beginner,
    #[default]
    Intermediate,
    Advanced,
}

impl Difficulty {
    pub fn event_pool(&self) -> &'static [EventType] {
        match self {
            Difficulty::Beginner => &[EventType::AnalystAction, EventType::ProductNews],
            Difficulty::Intermediate => &[EventType::EarningsSurprise, EventType::RegulatoryNews],
            Difficulty::Advanced => &[EventType::VolatilitySpike, EventType::MacroEvent],
        }
    }
}

/// A market event scenario tied to a specific ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketEvent {
    pub ticker: String,
    pub event_type: EventType,
    pub description: String,
    pub horizon_days: u32,
}

impl fmt::Display for MarketEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({}d): {}",
            self.ticker, self.event_type, self.horizon_days, self.description
        )
    }
}

// ---------------------------------------------------------------------------
// Commentary & news
// ---------------------------------------------------------------------------

/// Directional bias of the adversarial commentator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommentatorStance {
    Bullish,
    Bearish,
}

impl CommentatorStance {
    pub fn opposite(&self) -> Self {
        match self {
            CommentatorStance::Bullish => CommentatorStance::Bearish,
            CommentatorStance::Bearish => CommentatorStance::Bullish,
        }
    }

    /// Whether a decision moves in the direction this stance pushes for.
    pub fn agrees_with(&self, decision: Decision) -> bool {
        match self {
            CommentatorStance::Bullish => decision.is_risk_on(),
            CommentatorStance::Bearish => decision.is_exit(),
        }
    }
}

impl fmt::Display for CommentatorStance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommentatorStance::Bullish => write!(f, "Bullish"),
            CommentatorStance::Bearish => write!(f, "Bearish"),
        }
    }
}

impl std::str::FromStr for CommentatorStance {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bullish" | "bull" => Ok(CommentatorStance::Bullish),
            "bearish" | "bear" => Ok(CommentatorStance::Bearish),
            _ => Err(anyhow::anyhow!("Unknown stance: {s}")),
        }
    }
}

/// The cognitive bias a commentator take leans on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CognitiveBias {
    #[serde(rename = "Fear Appeal")]
    FearAppeal,
    #[serde(rename = "Overconfidence")]
    Overconfidence,
    #[serde(rename = "Authority Lure")]
    AuthorityLure,
    #[serde(rename = "Recency Bias")]
    RecencyBias,
}

impl CognitiveBias {
    pub const ALL: &'static [CognitiveBias] = &[
        CognitiveBias::FearAppeal,
        CognitiveBias::Overconfidence,
        CognitiveBias::AuthorityLure,
        CognitiveBias::RecencyBias,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            CognitiveBias::FearAppeal => "Fear Appeal",
            CognitiveBias::Overconfidence => "Overconfidence",
            CognitiveBias::AuthorityLure => "Authority Lure",
            CognitiveBias::RecencyBias => "Recency Bias",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            CognitiveBias::FearAppeal => "Creating panic and urgency to sell",
            CognitiveBias::Overconfidence => "Promoting guaranteed gains and FOMO",
            CognitiveBias::AuthorityLure => "Appealing to expert opinion",
            CognitiveBias::RecencyBias => "Overweighting recent price action",
        }
    }
}

impl fmt::Display for CognitiveBias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for CognitiveBias {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        CognitiveBias::ALL
            .iter()
            .copied()
            .find(|b| b.label().to_lowercase() == lower)
            .ok_or_else(|| anyhow::anyhow!("Unknown cognitive bias: {s}"))
    }
}

/// The commentator's take on an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commentary {
    pub text: String,
    pub stance: CommentatorStance,
    pub bias: CognitiveBias,
}

/// Headline sentiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HeadlineStance {
    Bull,
    Bear,
    Neutral,
}

impl HeadlineStance {
    /// A Bull headline opposes a Bearish take and vice versa; Neutral opposes nothing.
    pub fn opposes(&self, stance: CommentatorStance) -> bool {
        matches!(
            (self, stance),
            (HeadlineStance::Bull, CommentatorStance::Bearish)
                | (HeadlineStance::Bear, CommentatorStance::Bullish)
        )
    }
}

impl fmt::Display for HeadlineStance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeadlineStance::Bull => write!(f, "Bull"),
            HeadlineStance::Bear => write!(f, "Bear"),
            HeadlineStance::Neutral => write!(f, "Neutral"),
        }
    }
}

/// A raw headline as returned by a news provider, before classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    pub title: String,
    pub source: String,
}

/// A classified headline shown on the data panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Headline {
    pub title: String,
    pub source: String,
    pub stance: HeadlineStance,
}

/// Aggregated headline sentiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Consensus {
    #[serde(rename = "No Data")]
    NoData,
    #[serde(rename = "Two-thirds Bull")]
    TwoThirdsBull,
    #[serde(rename = "Two-thirds Bear")]
    TwoThirdsBear,
    #[serde(rename = "Majority Bull")]
    MajorityBull,
    #[serde(rename = "Majority Bear")]
    MajorityBear,
    #[serde(rename = "Mixed")]
    Mixed,
}

impl Consensus {
    pub fn label(&self) -> &'static str {
        match self {
            Consensus::NoData => "No Data",
            Consensus::TwoThirdsBull => "Two-thirds Bull",
            Consensus::TwoThirdsBear => "Two-thirds Bear",
            Consensus::MajorityBull => "Majority Bull",
            Consensus::MajorityBear => "Majority Bear",
            Consensus::Mixed => "Mixed",
        }
    }

    pub fn is_bullish(&self) -> bool {
        matches!(self, Consensus::TwoThirdsBull | Consensus::MajorityBull)
    }

    pub fn is_bearish(&self) -> bool {
        matches!(self, Consensus::TwoThirdsBear | Consensus::MajorityBear)
    }

    /// A decision aligns with a directional consensus when it moves the same way.
    pub fn aligns_with(&self, decision: Decision) -> bool {
        (self.is_bullish() && decision.is_risk_on()) || (self.is_bearish() && decision.is_exit())
    }
}

impl fmt::Display for Consensus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Price data
// ---------------------------------------------------------------------------

/// Short-horizon price shape detected from recent closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PricePattern {
    #[serde(rename = "3_down_closes")]
    ThreeDownCloses,
    #[serde(rename = "3_up_closes")]
    ThreeUpCloses,
    #[serde(rename = "volatility_spike")]
    VolatilitySpike,
    #[serde(rename = "consolidation")]
    Consolidation,
    #[serde(rename = "normal")]
    Normal,
}

impl PricePattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            PricePattern::ThreeDownCloses => "3_down_closes",
            PricePattern::ThreeUpCloses => "3_up_closes",
            PricePattern::VolatilitySpike => "volatility_spike",
            PricePattern::Consolidation => "consolidation",
            PricePattern::Normal => "normal",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            PricePattern::ThreeDownCloses => "Three consecutive down days",
            PricePattern::ThreeUpCloses => "Three consecutive up days",
            PricePattern::VolatilitySpike => "High volatility (>5% daily moves)",
            PricePattern::Consolidation => "Tight range consolidation (<2%)",
            PricePattern::Normal => "Normal price action",
        }
    }
}

impl fmt::Display for PricePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse volatility bucket used by tips and spike detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolatilityLevel {
    Low,
    Medium,
    High,
}

impl fmt::Display for VolatilityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolatilityLevel::Low => write!(f, "low"),
            VolatilityLevel::Medium => write!(f, "medium"),
            VolatilityLevel::High => write!(f, "high"),
        }
    }
}

/// Current price plus the most recent daily closes (oldest first).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub current_price: Decimal,
    pub last_closes: Vec<Decimal>,
}

/// Fundamentals for the data panel. Every field is optional because
/// upstream sources routinely omit them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fundamentals {
    /// Annualised 30-day close-to-close volatility.
    pub volatility_30d: Option<f64>,
    pub beta: Option<f64>,
    pub pe_ratio: Option<f64>,
}

// ---------------------------------------------------------------------------
// Historical cases
// ---------------------------------------------------------------------------

/// A real historical price window used to replay a decision's outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalCase {
    pub ticker: String,
    pub event_type: EventType,
    pub date: NaiveDate,
    pub horizon_days: u32,
    pub day0_price: Decimal,
    pub day_h_price: Decimal,
    /// Daily closes, day 0 through day H inclusive.
    pub price_path: Vec<Decimal>,
    pub sector: String,
    pub volatility: f64,
    /// Set only on the zero-return stand-in used when no real case exists.
    #[serde(default)]
    pub synthetic: bool,
}

impl HistoricalCase {
    /// day_h / day0 - 1, or zero for a degenerate day-0 price.
    pub fn return_pct(&self) -> Decimal {
        if self.day0_price.is_zero() {
            return Decimal::ZERO;
        }
        self.day_h_price / self.day0_price - Decimal::ONE
    }

    /// Path length must be horizon + 1 and its endpoints must match the
    /// stored day-0 / day-H prices.
    pub fn is_well_formed(&self) -> bool {
        self.day0_price > Decimal::ZERO
            && self.price_path.len() == self.horizon_days as usize + 1
            && self.price_path.first() == Some(&self.day0_price)
            && self.price_path.last() == Some(&self.day_h_price)
    }

    /// Flat, explicitly flagged window used when the store has nothing for
    /// the event type.
    pub fn synthetic(ticker: &str, event_type: EventType, horizon_days: u32, price: Decimal) -> Self {
        Self {
            ticker: ticker.to_string(),
            event_type,
            date: Utc::now().date_naive(),
            horizon_days,
            day0_price: price,
            day_h_price: price,
            price_path: vec![price; horizon_days as usize + 1],
            sector: "Unknown".to_string(),
            volatility: 0.0,
            synthetic: true,
        }
    }
}

impl fmt::Display for HistoricalCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} ({}d) {:.2} -> {:.2}{}",
            self.ticker,
            self.event_type,
            self.date,
            self.horizon_days,
            self.day0_price,
            self.day_h_price,
            if self.synthetic { " [synthetic]" } else { "" },
        )
    }
}

/// Median historical outcomes per action for the round's event type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeSummary {
    pub similar_cases: usize,
    pub sell_all_median: Decimal,
    pub sell_half_median: Decimal,
    pub hold_median: Decimal,
}

// ---------------------------------------------------------------------------
// Rounds
// ---------------------------------------------------------------------------

/// Provider slots that can degrade a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderSlot {
    Event,
    Commentary,
    News,
    Price,
    Fundamentals,
    Tip,
    Coaching,
}

impl fmt::Display for ProviderSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProviderSlot::Event => "event",
            ProviderSlot::Commentary => "commentary",
            ProviderSlot::News => "news",
            ProviderSlot::Price => "price",
            ProviderSlot::Fundamentals => "fundamentals",
            ProviderSlot::Tip => "tip",
            ProviderSlot::Coaching => "coaching",
        };
        f.write_str(s)
    }
}

/// A payload field that was filled with a documented default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Degradation {
    pub slot: ProviderSlot,
    pub reason: String,
}

/// Everything the player may consult before deciding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPanel {
    pub headlines: Vec<Headline>,
    pub consensus: Consensus,
    /// Fraction of headlines opposing the commentator, always in [0, 1].
    pub contradiction_score: f64,
    pub price: Option<PriceSnapshot>,
    pub pattern: PricePattern,
    pub fundamentals: Option<Fundamentals>,
    pub volatility: VolatilityLevel,
    pub tip: String,
    pub outcomes: Option<OutcomeSummary>,
}

/// Behavioral tags attached to a finalized round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorFlag {
    PanicSell,
    ChasedSpike,
    IgnoredData,
    FollowedCommentatorHighContradiction,
    ResistedCommentator,
}

impl fmt::Display for BehaviorFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BehaviorFlag::PanicSell => "panic_sell",
            BehaviorFlag::ChasedSpike => "chased_spike",
            BehaviorFlag::IgnoredData => "ignored_data",
            BehaviorFlag::FollowedCommentatorHighContradiction => {
                "followed_commentator_high_contradiction"
            }
            BehaviorFlag::ResistedCommentator => "resisted_commentator",
        };
        f.write_str(s)
    }
}

/// Decision-side fields, populated once when the round resolves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundResolution {
    pub decision: Decision,
    pub opened_data_panel: bool,
    pub decision_latency_secs: f64,
    pub historical_case: HistoricalCase,
    pub pl_dollars: Decimal,
    pub pl_percent: Decimal,
    pub behavior_flags: Vec<BehaviorFlag>,
    pub explanation: String,
    pub resolved_at: DateTime<Utc>,
}

/// One round of a session. Created with its data fields when the round
/// starts; `resolution` is filled exactly once when the decision resolves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    pub round_number: u32,
    pub ticker: String,
    /// Allocation of the drawn position when the round started.
    pub position_allocation: Decimal,
    pub event: MarketEvent,
    pub commentary: Commentary,
    pub rational_baseline: Option<CommentatorStance>,
    pub panel: DataPanel,
    pub degraded: Vec<Degradation>,
    pub resolution: Option<RoundResolution>,
}

impl RoundRecord {
    pub fn is_finalized(&self) -> bool {
        self.resolution.is_some()
    }

    pub fn decision(&self) -> Option<Decision> {
        self.resolution.as_ref().map(|r| r.decision)
    }

    pub fn pl_dollars(&self) -> Decimal {
        self.resolution.as_ref().map(|r| r.pl_dollars).unwrap_or_default()
    }

    pub fn pl_percent(&self) -> Decimal {
        self.resolution.as_ref().map(|r| r.pl_percent).unwrap_or_default()
    }

    pub fn has_flag(&self, flag: BehaviorFlag) -> bool {
        self.resolution
            .as_ref()
            .is_some_and(|r| r.behavior_flags.contains(&flag))
    }

    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

/// Coarse lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Pending,
    Active,
    Completed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Pending => write!(f, "Pending"),
            SessionStatus::Active => write!(f, "Active"),
            SessionStatus::Completed => write!(f, "Completed"),
        }
    }
}

/// Orchestrator phase. Transitions live in `engine::state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", content = "round")]
pub enum RoundPhase {
    AwaitingSetup,
    RoundPending(u32),
    RoundDataReady(u32),
    AwaitingDecision(u32),
    RoundResolved(u32),
    Completed,
}

impl RoundPhase {
    /// Round number the phase refers to, if any.
    pub fn round(&self) -> Option<u32> {
        match self {
            RoundPhase::RoundPending(n)
            | RoundPhase::RoundDataReady(n)
            | RoundPhase::AwaitingDecision(n)
            | RoundPhase::RoundResolved(n) => Some(*n),
            RoundPhase::AwaitingSetup | RoundPhase::Completed => None,
        }
    }
}

impl fmt::Display for RoundPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundPhase::AwaitingSetup => write!(f, "AwaitingSetup"),
            RoundPhase::RoundPending(n) => write!(f, "RoundPending({n})"),
            RoundPhase::RoundDataReady(n) => write!(f, "RoundDataReady({n})"),
            RoundPhase::AwaitingDecision(n) => write!(f, "AwaitingDecision({n})"),
            RoundPhase::RoundResolved(n) => write!(f, "RoundResolved({n})"),
            RoundPhase::Completed => write!(f, "Completed"),
        }
    }
}

/// Rule-derived classification of decision-making style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProfileClass {
    Rational,
    Emotional,
    Conservative,
    Balanced,
}

impl ProfileClass {
    pub fn description(&self) -> &'static str {
        match self {
            ProfileClass::Rational => "Data-driven decision maker who resists emotional pressure",
            ProfileClass::Emotional => "Influenced by fear and FOMO, needs more data discipline",
            ProfileClass::Conservative => "Risk-averse with careful position management",
            ProfileClass::Balanced => "Balanced approach between emotion and analysis",
        }
    }
}

impl fmt::Display for ProfileClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProfileClass::Rational => write!(f, "Rational"),
            ProfileClass::Emotional => write!(f, "Emotional"),
            ProfileClass::Conservative => write!(f, "Conservative"),
            ProfileClass::Balanced => write!(f, "Balanced"),
        }
    }
}

/// Session-level metrics feeding the classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorMetrics {
    pub total_rounds: u32,
    pub data_panel_usage_rate: f64,
    pub consensus_alignment_rate: f64,
    pub panic_sell_count: u32,
    pub chased_spike_count: u32,
    pub high_contradiction_follow_count: u32,
    pub resisted_commentator_count: u32,
    pub sell_half_share: f64,
    pub average_position_fraction: f64,
    pub max_drawdown_fraction: f64,
    pub total_pl: Decimal,
}

/// Additive bucket scores, kept so the label is explainable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileScores {
    pub rational: u32,
    pub emotional: u32,
    pub conservative: u32,
}

/// Computed once at session completion; never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehavioralProfile {
    pub classification: ProfileClass,
    pub metrics: BehaviorMetrics,
    pub scores: ProfileScores,
    pub coaching_tips: Vec<String>,
}

/// A playthrough over one portfolio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSession {
    pub id: Uuid,
    pub portfolio_id: Uuid,
    pub total_rounds: u32,
    /// Highest round number started so far (0 before the first round).
    pub current_round: u32,
    pub status: SessionStatus,
    pub phase: RoundPhase,
    pub rounds: Vec<RoundRecord>,
    pub profile: Option<BehavioralProfile>,
    pub created_at: DateTime<Utc>,
    /// Portfolio produced by the last resolved round, kept until the
    /// portfolio store has it. Replaying it is an overwrite, not a delta.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_portfolio: Option<crate::ledger::Portfolio>,
}

impl GameSession {
    pub fn new(portfolio_id: Uuid, total_rounds: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            portfolio_id,
            total_rounds,
            current_round: 0,
            status: SessionStatus::Pending,
            phase: RoundPhase::AwaitingSetup,
            rounds: Vec::new(),
            profile: None,
            created_at: Utc::now(),
            pending_portfolio: None,
        }
    }

    pub fn round(&self, round_number: u32) -> Option<&RoundRecord> {
        self.rounds.iter().find(|r| r.round_number == round_number)
    }

    pub fn round_mut(&mut self, round_number: u32) -> Option<&mut RoundRecord> {
        self.rounds.iter_mut().find(|r| r.round_number == round_number)
    }

    pub fn finalized_rounds(&self) -> impl Iterator<Item = &RoundRecord> {
        self.rounds.iter().filter(|r| r.is_finalized())
    }

    pub fn is_completed(&self) -> bool {
        self.status == SessionStatus::Completed
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
