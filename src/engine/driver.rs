//! Session orchestrator.
//!
//! Each session is worked by one caller at a time: every mutating
//! operation takes that session's async lock, loads state from the
//! repositories, advances the phase machine and writes state back.
//! Different sessions never contend.

use futures::future::join_all;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::gather::{bounded, draw_event_type, draw_ticker, gather_round, RoundDraw};
use super::resolver::resolve_round;
use super::state::{transition, PhaseEvent};
use super::{EngineError, FinalReport, Resolution, RoundOutcome, RoundPayload};
use crate::behavior::{classify, fallback_coaching, normalize_tips, CoachingRequest};
use crate::config::AppConfig;
use crate::ledger::{Portfolio, RiskTier};
use crate::providers::Providers;
use crate::replay::Matcher;
use crate::storage::{PortfolioRepository, SessionRepository};
use crate::types::{
    BehavioralProfile, DecisionInput, GameSession, ProviderSlot, RoundPhase, SessionStatus,
};

/// Portfolio setup input. Entry prices are quoted from the price
/// provider when omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioRequest {
    pub tickers: Vec<String>,
    pub allocations: Vec<Decimal>,
    pub risk_tier: RiskTier,
    #[serde(default)]
    pub entry_prices: Option<Vec<Decimal>>,
}

pub struct Orchestrator {
    config: AppConfig,
    providers: Providers,
    matcher: Matcher,
    sessions: Arc<dyn SessionRepository>,
    portfolios: Arc<dyn PortfolioRepository>,
    rng: Mutex<StdRng>,
    locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl Orchestrator {
    pub fn new(
        config: AppConfig,
        providers: Providers,
        matcher: Matcher,
        sessions: Arc<dyn SessionRepository>,
        portfolios: Arc<dyn PortfolioRepository>,
    ) -> Self {
        let rng = match config.game.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            providers,
            matcher,
            sessions,
            portfolios,
            rng: Mutex::new(rng),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn session_lock(&self, id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(id).or_default().clone()
    }

    /// Drop a session's lock entry once no caller holds or waits on it.
    fn forget_lock(&self, id: Uuid) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks.get(&id).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(&id);
            debug!(session_id = %id, "Session lock released");
        }
    }

    /// Load a session and finish any portfolio write an earlier
    /// resolution left pending.
    async fn load_settled(&self, id: Uuid) -> Result<GameSession, EngineError> {
        let mut session = self.load_session(id).await?;
        if let Some(portfolio) = session.pending_portfolio.clone() {
            self.portfolios.save_portfolio(&portfolio).await?;
            session.pending_portfolio = None;
            self.sessions.save_session(&session).await?;
            info!(
                session_id = %id,
                portfolio_id = %portfolio.id,
                "Recovered pending portfolio write"
            );
        }
        Ok(session)
    }

    async fn load_session(&self, id: Uuid) -> Result<GameSession, EngineError> {
        self.sessions
            .load_session(id)
            .await?
            .ok_or(EngineError::SessionNotFound(id))
    }

    async fn load_portfolio(&self, id: Uuid) -> Result<Portfolio, EngineError> {
        self.portfolios
            .load_portfolio(id)
            .await?
            .ok_or(EngineError::PortfolioNotFound(id))
    }

    async fn quote(&self, ticker: &str) -> Result<Decimal, EngineError> {
        let timeout_ms = self.config.providers.timeout_ms;
        bounded(ProviderSlot::Price, timeout_ms, self.providers.price.snapshot(ticker))
            .await
            .map(|s| s.current_price)
            .map_err(|e| EngineError::Validation(format!("No entry price for {ticker}: {e}")))
    }

    // -----------------------------------------------------------------------
    // Setup
    // -----------------------------------------------------------------------

    /// Validate and store a new portfolio against the configured budget.
    pub async fn create_portfolio(&self, request: PortfolioRequest) -> Result<Portfolio, EngineError> {
        let entry_prices = match request.entry_prices {
            Some(prices) => prices,
            None => {
                let quotes = join_all(request.tickers.iter().map(|ticker| async move {
                    self.quote(&ticker.trim().to_uppercase()).await
                }))
                .await;
                quotes.into_iter().collect::<Result<Vec<_>, _>>()?
            }
        };

        let portfolio = Portfolio::create(
            &request.tickers,
            &request.allocations,
            request.risk_tier,
            &entry_prices,
            self.config.game.initial_budget,
        )?;
        self.portfolios.save_portfolio(&portfolio).await?;

        info!(
            portfolio_id = %portfolio.id,
            tier = %portfolio.risk_tier,
            positions = portfolio.positions.len(),
            cash = %portfolio.cash,
            "Portfolio created"
        );
        Ok(portfolio)
    }

    /// Open a session over an existing portfolio. `total_rounds` falls
    /// back to the configured default.
    pub async fn create_session(
        &self,
        portfolio_id: Uuid,
        total_rounds: Option<u32>,
    ) -> Result<GameSession, EngineError> {
        let total_rounds = total_rounds.unwrap_or(self.config.game.total_rounds);
        if total_rounds == 0 {
            return Err(EngineError::Validation("total_rounds must be at least 1".into()));
        }
        let portfolio = self.load_portfolio(portfolio_id).await?;

        let mut session = GameSession::new(portfolio.id, total_rounds);
        session.phase = transition(session.phase, PhaseEvent::PortfolioReady, total_rounds)?;
        session.status = SessionStatus::Active;
        self.sessions.save_session(&session).await?;

        info!(
            session_id = %session.id,
            portfolio_id = %portfolio.id,
            total_rounds,
            phase = %session.phase,
            "Session created"
        );
        Ok(session)
    }

    // -----------------------------------------------------------------------
    // Rounds
    // -----------------------------------------------------------------------

    /// Gather data for the next round and hand out its payload.
    ///
    /// Calling again while the round awaits a decision returns the same
    /// payload without re-gathering.
    pub async fn start_round(&self, session_id: Uuid) -> Result<RoundPayload, EngineError> {
        let lock = self.session_lock(session_id);
        let result = {
            let _guard = lock.lock().await;
            self.start_round_locked(session_id).await
        };
        drop(lock);
        if matches!(
            result,
            Err(EngineError::InvalidTransition {
                from: RoundPhase::Completed,
                ..
            }) | Err(EngineError::SessionNotFound(_))
        ) {
            self.forget_lock(session_id);
        }
        result
    }

    async fn start_round_locked(&self, session_id: Uuid) -> Result<RoundPayload, EngineError> {
        let mut session = self.load_settled(session_id).await?;
        let round_number = match session.phase {
            RoundPhase::RoundPending(n) => n,
            RoundPhase::AwaitingDecision(n) => {
                if let Some(record) = session.round(n) {
                    debug!(session_id = %session_id, round = n, "Round already open, resending payload");
                    return Ok(RoundPayload::from_record(session_id, session.total_rounds, record));
                }
                return Err(EngineError::InvalidTransition {
                    from: session.phase,
                    event: PhaseEvent::DataGathered,
                });
            }
            from => {
                return Err(EngineError::InvalidTransition {
                    from,
                    event: PhaseEvent::DataGathered,
                })
            }
        };

        let portfolio = self.load_portfolio(session.portfolio_id).await?;
        let draw = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            let event_type = draw_event_type(self.config.game.difficulty, &mut *rng);
            let (ticker, allocation) = match draw_ticker(&portfolio, &mut *rng) {
                Some(pick) => pick,
                // Every position is closed: replay the last ticker with nothing at stake.
                None => match session.rounds.last() {
                    Some(last) => (last.ticker.clone(), Decimal::ZERO),
                    None => {
                        return Err(EngineError::Validation(
                            "Portfolio has no open positions".into(),
                        ))
                    }
                },
            };
            RoundDraw {
                round_number,
                ticker,
                allocation,
                event_type,
            }
        };

        info!(
            session_id = %session_id,
            round = round_number,
            ticker = %draw.ticker,
            event_type = %draw.event_type,
            "Round started"
        );
        let record = gather_round(&self.providers, &self.matcher, &self.config, draw).await;

        session.phase = transition(session.phase, PhaseEvent::DataGathered, session.total_rounds)?;
        let payload = RoundPayload::from_record(session_id, session.total_rounds, &record);
        session.rounds.push(record);
        session.current_round = round_number;
        session.phase = transition(session.phase, PhaseEvent::PayloadDelivered, session.total_rounds)?;
        self.sessions.save_session(&session).await?;

        debug!(session_id = %session_id, phase = %session.phase, "Awaiting decision");
        Ok(payload)
    }

    /// Resolve the player's decision for `round_number`.
    ///
    /// A decision for a round that is already finalized is a no-op that
    /// returns the stored outcome as `Resolution::Duplicate`. A BUY the
    /// cash balance cannot fund is rejected and the round keeps waiting.
    pub async fn submit_decision(
        &self,
        session_id: Uuid,
        round_number: u32,
        input: DecisionInput,
    ) -> Result<Resolution, EngineError> {
        let lock = self.session_lock(session_id);
        let result = {
            let _guard = lock.lock().await;
            self.submit_decision_locked(session_id, round_number, input).await
        };
        drop(lock);
        let finished = match &result {
            Ok(resolution) => resolution.outcome().phase == RoundPhase::Completed,
            Err(e) => matches!(e, EngineError::SessionNotFound(_)),
        };
        if finished {
            self.forget_lock(session_id);
        }
        result
    }

    async fn submit_decision_locked(
        &self,
        session_id: Uuid,
        round_number: u32,
        input: DecisionInput,
    ) -> Result<Resolution, EngineError> {
        let mut session = self.load_settled(session_id).await?;

        if let Some(record) = session.round(round_number).filter(|r| r.is_finalized()) {
            info!(session_id = %session_id, round = round_number, "Duplicate decision ignored");
            let portfolio = self.load_portfolio(session.portfolio_id).await?;
            let outcome = RoundOutcome {
                session_id,
                record: record.clone(),
                portfolio_value: portfolio.total_value(),
                cash_balance: portfolio.cash_balance(),
                phase: session.phase,
                report: final_report(&session, &portfolio),
            };
            return Ok(Resolution::Duplicate(outcome));
        }

        match session.phase {
            RoundPhase::AwaitingDecision(n) if n == round_number => {}
            RoundPhase::AwaitingDecision(n) => {
                return Err(EngineError::RoundOutOfOrder {
                    expected: n,
                    got: round_number,
                })
            }
            from => {
                return Err(EngineError::InvalidTransition {
                    from,
                    event: PhaseEvent::DecisionResolved,
                })
            }
        }
        if !input.decision_latency_secs.is_finite() || input.decision_latency_secs < 0.0 {
            return Err(EngineError::Validation(format!(
                "decision latency must be a non-negative number of seconds, got {}",
                input.decision_latency_secs
            )));
        }

        let portfolio = self.load_portfolio(session.portfolio_id).await?;
        let record = session
            .round(round_number)
            .ok_or(EngineError::RoundOutOfOrder {
                expected: session.current_round,
                got: round_number,
            })?;
        let (finalized, portfolio) = match resolve_round(
            record,
            &input,
            &portfolio,
            &self.matcher,
            &self.config.behavior,
        ) {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(session_id = %session_id, round = round_number, error = %e, "Decision rejected");
                return Err(e);
            }
        };

        if let Some(slot) = session.round_mut(round_number) {
            *slot = finalized.clone();
        }
        let total = session.total_rounds;
        session.phase = transition(session.phase, PhaseEvent::DecisionResolved, total)?;
        session.phase = transition(session.phase, PhaseEvent::Advance, total)?;

        if session.phase == RoundPhase::Completed {
            session.status = SessionStatus::Completed;
            session.profile = Some(self.build_profile(&session, &portfolio).await);
        }

        // The finalized round and the portfolio it produced land together
        // in the session first; the portfolio store is brought up to date
        // after, and an interrupted write is replayed by `load_settled`.
        session.pending_portfolio = Some(portfolio.clone());
        self.sessions.save_session(&session).await?;
        self.portfolios.save_portfolio(&portfolio).await?;
        session.pending_portfolio = None;
        if let Err(e) = self.sessions.save_session(&session).await {
            warn!(
                session_id = %session_id,
                error = %e,
                "Pending portfolio not cleared, it will be replayed on next load"
            );
        }

        info!(
            session_id = %session_id,
            round = round_number,
            phase = %session.phase,
            portfolio_value = %portfolio.total_value(),
            "Decision applied"
        );

        Ok(Resolution::Applied(RoundOutcome {
            session_id,
            record: finalized,
            portfolio_value: portfolio.total_value(),
            cash_balance: portfolio.cash_balance(),
            phase: session.phase,
            report: final_report(&session, &portfolio),
        }))
    }

    async fn build_profile(&self, session: &GameSession, portfolio: &Portfolio) -> BehavioralProfile {
        let (classification, metrics, scores) = classify(
            &session.rounds,
            portfolio.initial_budget,
            &self.config.behavior,
        );
        let request = CoachingRequest::new(classification, metrics.clone(), &session.rounds);
        let tips = match bounded(
            ProviderSlot::Coaching,
            self.config.providers.timeout_ms,
            self.providers.coaching.coaching(&request),
        )
        .await
        {
            Ok(tips) => normalize_tips(tips, classification),
            Err(e) => {
                warn!(error = %e, "Coaching provider degraded, using fallback tips");
                fallback_coaching(classification)
            }
        };

        info!(
            session_id = %session.id,
            classification = %classification,
            rational = scores.rational,
            emotional = scores.emotional,
            conservative = scores.conservative,
            "Session classified"
        );
        BehavioralProfile {
            classification,
            metrics,
            scores,
            coaching_tips: tips,
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub async fn session(&self, session_id: Uuid) -> Result<GameSession, EngineError> {
        self.load_session(session_id).await
    }

    pub async fn portfolio(&self, portfolio_id: Uuid) -> Result<Portfolio, EngineError> {
        self.load_portfolio(portfolio_id).await
    }

    /// Final report, or `None` while the session is still running.
    pub async fn report(&self, session_id: Uuid) -> Result<Option<FinalReport>, EngineError> {
        let lock = self.session_lock(session_id);
        let result = {
            let _guard = lock.lock().await;
            self.report_locked(session_id).await
        };
        drop(lock);
        if !matches!(result, Ok(None)) {
            self.forget_lock(session_id);
        }
        result
    }

    async fn report_locked(&self, session_id: Uuid) -> Result<Option<FinalReport>, EngineError> {
        let session = self.load_settled(session_id).await?;
        if !session.is_completed() {
            return Ok(None);
        }
        let portfolio = self.load_portfolio(session.portfolio_id).await?;
        Ok(final_report(&session, &portfolio))
    }

    // -----------------------------------------------------------------------
    // Channel-driven loop
    // -----------------------------------------------------------------------

    /// Play a session to completion: payloads go out on `payloads`,
    /// decisions come back on `decisions`.
    ///
    /// The wait for a decision has no timeout of its own. A rejected
    /// decision (short cash, a BUY past the tier limit, a bad latency)
    /// resends the round payload and keeps waiting. If either channel
    /// closes first the session is left as it was and `SessionAbandoned`
    /// is returned.
    pub async fn run_session(
        &self,
        session_id: Uuid,
        mut decisions: mpsc::Receiver<DecisionInput>,
        payloads: mpsc::Sender<RoundPayload>,
    ) -> Result<FinalReport, EngineError> {
        loop {
            let payload = self.start_round(session_id).await?;
            let round_number = payload.round_number;
            if payloads.send(payload).await.is_err() {
                warn!(session_id = %session_id, round = round_number, "Payload receiver closed");
                return Err(self.abandon(session_id));
            }

            let resolution = loop {
                let Some(input) = decisions.recv().await else {
                    warn!(session_id = %session_id, round = round_number, "Decision channel closed");
                    return Err(self.abandon(session_id));
                };
                match self.submit_decision(session_id, round_number, input).await {
                    Ok(resolution) => break resolution,
                    Err(e @ (EngineError::InsufficientCash { .. } | EngineError::Validation(_))) => {
                        warn!(
                            session_id = %session_id,
                            round = round_number,
                            decision = %input.decision,
                            error = %e,
                            "Decision rejected, waiting for another"
                        );
                        let payload = self.start_round(session_id).await?;
                        if payloads.send(payload).await.is_err() {
                            return Err(self.abandon(session_id));
                        }
                    }
                    Err(e) => return Err(e),
                }
            };

            if let Some(report) = resolution.into_outcome().report {
                info!(
                    session_id = %session_id,
                    profile = %report.profile.classification,
                    net_change = %report.net_change,
                    "Session completed"
                );
                return Ok(report);
            }
        }
    }

    fn abandon(&self, session_id: Uuid) -> EngineError {
        self.forget_lock(session_id);
        EngineError::SessionAbandoned(session_id)
    }
}

fn final_report(session: &GameSession, portfolio: &Portfolio) -> Option<FinalReport> {
    let profile = session.profile.clone()?;
    let final_value = portfolio.total_value();
    Some(FinalReport {
        session_id: session.id,
        profile,
        final_value,
        net_change: final_value - portfolio.initial_budget,
        total_return_pct: portfolio.total_return_pct(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, MockPortfolioRepository, MockSessionRepository};
    use crate::types::Decision;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Memory store whose next session or portfolio save can be made to fail once.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_session_save: AtomicBool,
        fail_portfolio_save: AtomicBool,
    }

    #[async_trait]
    impl SessionRepository for FlakyStore {
        async fn load_session(&self, id: Uuid) -> anyhow::Result<Option<GameSession>> {
            self.inner.load_session(id).await
        }

        async fn save_session(&self, session: &GameSession) -> anyhow::Result<()> {
            if self.fail_session_save.swap(false, Ordering::SeqCst) {
                anyhow::bail!("disk full");
            }
            self.inner.save_session(session).await
        }
    }

    #[async_trait]
    impl PortfolioRepository for FlakyStore {
        async fn load_portfolio(&self, id: Uuid) -> anyhow::Result<Option<Portfolio>> {
            self.inner.load_portfolio(id).await
        }

        async fn save_portfolio(&self, portfolio: &Portfolio) -> anyhow::Result<()> {
            if self.fail_portfolio_save.swap(false, Ordering::SeqCst) {
                anyhow::bail!("disk full");
            }
            self.inner.save_portfolio(portfolio).await
        }
    }

    fn flaky_orchestrator() -> (Orchestrator, Arc<FlakyStore>) {
        let mut config = AppConfig::default();
        config.game.seed = Some(7);
        let store = Arc::new(FlakyStore::default());
        let orch = Orchestrator::new(
            config,
            Providers::scripted(Some(7)),
            Matcher::new(Vec::new(), HashMap::new(), Some(7)),
            store.clone(),
            store.clone(),
        );
        (orch, store)
    }

    fn buy() -> DecisionInput {
        DecisionInput {
            decision: Decision::Buy,
            opened_data_panel: true,
            decision_latency_secs: 4.0,
        }
    }

    fn lock_count(orch: &Orchestrator) -> usize {
        orch.locks.lock().unwrap().len()
    }

    fn orchestrator() -> Orchestrator {
        let mut config = AppConfig::default();
        config.game.seed = Some(42);
        let store = Arc::new(MemoryStore::new());
        Orchestrator::new(
            config,
            Providers::scripted(Some(42)),
            Matcher::new(Vec::new(), HashMap::new(), Some(42)),
            store.clone(),
            store,
        )
    }

    fn request() -> PortfolioRequest {
        PortfolioRequest {
            tickers: vec!["AAPL".into(), "MSFT".into(), "JPM".into()],
            allocations: vec![dec!(400000), dec!(300000), dec!(200000)],
            risk_tier: RiskTier::Aggressive,
            entry_prices: None,
        }
    }

    fn hold() -> DecisionInput {
        DecisionInput {
            decision: Decision::Hold,
            opened_data_panel: true,
            decision_latency_secs: 3.0,
        }
    }

    #[tokio::test]
    async fn test_create_portfolio_quotes_missing_prices() {
        let orch = orchestrator();
        let p = orch.create_portfolio(request()).await.unwrap();
        assert_eq!(p.cash, dec!(100000));
        assert!(p.positions.iter().all(|pos| pos.entry_price > Decimal::ZERO));
        assert_eq!(orch.portfolio(p.id).await.unwrap(), p);
    }

    #[tokio::test]
    async fn test_create_portfolio_rejects_over_limit() {
        let orch = orchestrator();
        let mut req = request();
        req.risk_tier = RiskTier::Conservative;
        let err = orch.create_portfolio(req).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_create_session_requires_portfolio() {
        let orch = orchestrator();
        let missing = Uuid::new_v4();
        let err = orch.create_session(missing, None).await.unwrap_err();
        assert_eq!(err, EngineError::PortfolioNotFound(missing));
    }

    #[tokio::test]
    async fn test_round_lifecycle_and_duplicate() {
        let orch = orchestrator();
        let p = orch.create_portfolio(request()).await.unwrap();
        let s = orch.create_session(p.id, Some(2)).await.unwrap();
        assert_eq!(s.phase, RoundPhase::RoundPending(1));

        let payload = orch.start_round(s.id).await.unwrap();
        assert_eq!(payload.round_number, 1);
        // Re-requesting the open round returns the same payload.
        assert_eq!(orch.start_round(s.id).await.unwrap(), payload);

        // Wrong round number.
        let err = orch.submit_decision(s.id, 2, hold()).await.unwrap_err();
        assert_eq!(err, EngineError::RoundOutOfOrder { expected: 1, got: 2 });

        let first = orch.submit_decision(s.id, 1, hold()).await.unwrap();
        assert!(!first.is_duplicate());
        assert_eq!(first.outcome().phase, RoundPhase::RoundPending(2));

        let again = orch.submit_decision(s.id, 1, hold()).await.unwrap();
        assert!(again.is_duplicate());
        assert_eq!(again.outcome().record, first.outcome().record);
        assert_eq!(again.outcome().portfolio_value, first.outcome().portfolio_value);

        orch.start_round(s.id).await.unwrap();
        let last = orch.submit_decision(s.id, 2, hold()).await.unwrap();
        let outcome = last.outcome();
        assert_eq!(outcome.phase, RoundPhase::Completed);
        let report = outcome.report.as_ref().unwrap();
        assert!((2..=4).contains(&report.profile.coaching_tips.len()));
        assert_eq!(orch.report(s.id).await.unwrap().as_ref(), Some(report));

        let err = orch.start_round(s.id).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
        assert_eq!(lock_count(&orch), 0);
    }

    #[tokio::test]
    async fn test_session_save_failure_does_not_double_apply_buy() {
        let (orch, store) = flaky_orchestrator();
        let p = orch.create_portfolio(request()).await.unwrap();
        let s = orch.create_session(p.id, Some(3)).await.unwrap();
        let payload = orch.start_round(s.id).await.unwrap();
        let before = p.position(&payload.ticker).unwrap().allocation;
        let expected = before + before * dec!(0.10);

        store.fail_session_save.store(true, Ordering::SeqCst);
        let err = orch.submit_decision(s.id, 1, buy()).await.unwrap_err();
        assert_eq!(err, EngineError::Storage("disk full".into()));

        // Nothing was written: the portfolio and the open round are unchanged.
        let stored = orch.portfolio(p.id).await.unwrap();
        assert_eq!(stored.position(&payload.ticker).unwrap().allocation, before);
        let session = orch.session(s.id).await.unwrap();
        assert_eq!(session.phase, RoundPhase::AwaitingDecision(1));
        assert!(session.pending_portfolio.is_none());

        let retry = orch.submit_decision(s.id, 1, buy()).await.unwrap();
        assert!(!retry.is_duplicate());
        let stored = orch.portfolio(p.id).await.unwrap();
        assert_eq!(stored.position(&payload.ticker).unwrap().allocation, expected);

        let replay = orch.submit_decision(s.id, 1, buy()).await.unwrap();
        assert!(replay.is_duplicate());
        let stored = orch.portfolio(p.id).await.unwrap();
        assert_eq!(stored.position(&payload.ticker).unwrap().allocation, expected);
        assert_eq!(stored.cash_balance(), p.cash_balance() - (expected - before));
    }

    #[tokio::test]
    async fn test_portfolio_save_failure_is_recovered_once() {
        let (orch, store) = flaky_orchestrator();
        let p = orch.create_portfolio(request()).await.unwrap();
        let s = orch.create_session(p.id, Some(3)).await.unwrap();
        let payload = orch.start_round(s.id).await.unwrap();
        let before = p.position(&payload.ticker).unwrap().allocation;
        let expected = before + before * dec!(0.10);

        store.fail_portfolio_save.store(true, Ordering::SeqCst);
        let err = orch.submit_decision(s.id, 1, buy()).await.unwrap_err();
        assert_eq!(err, EngineError::Storage("disk full".into()));

        // The round is finalized and carries the portfolio still to be written.
        let session = orch.session(s.id).await.unwrap();
        assert_eq!(session.phase, RoundPhase::RoundPending(2));
        assert_eq!(session.finalized_rounds().count(), 1);
        assert!(session.pending_portfolio.is_some());
        let stored = orch.portfolio(p.id).await.unwrap();
        assert_eq!(stored.position(&payload.ticker).unwrap().allocation, before);

        let retry = orch.submit_decision(s.id, 1, buy()).await.unwrap();
        assert!(retry.is_duplicate());
        assert_eq!(retry.outcome().portfolio_value, p.total_value());
        let stored = orch.portfolio(p.id).await.unwrap();
        assert_eq!(stored.position(&payload.ticker).unwrap().allocation, expected);
        assert!(orch.session(s.id).await.unwrap().pending_portfolio.is_none());

        // Settling again is a no-op.
        orch.start_round(s.id).await.unwrap();
        let stored = orch.portfolio(p.id).await.unwrap();
        assert_eq!(stored.position(&payload.ticker).unwrap().allocation, expected);
    }

    #[tokio::test]
    async fn test_run_session_resends_payload_after_rejected_buy() {
        let orch = orchestrator();
        let mut req = request();
        req.allocations = vec![dec!(500000), dec!(400000), dec!(100000)];
        let p = orch.create_portfolio(req).await.unwrap();
        let s = orch.create_session(p.id, Some(1)).await.unwrap();

        let (decision_tx, decision_rx) = mpsc::channel(4);
        let (payload_tx, mut payload_rx) = mpsc::channel(4);
        let player = tokio::spawn(async move {
            let first = payload_rx.recv().await.unwrap();
            // No cash is left and AAPL sits at the tier limit, so any BUY is rejected.
            decision_tx.send(buy()).await.unwrap();
            let resent = payload_rx.recv().await.unwrap();
            assert_eq!(resent, first);
            decision_tx.send(hold()).await.unwrap();
        });

        let report = orch.run_session(s.id, decision_rx, payload_tx).await.unwrap();
        player.await.unwrap();
        assert_eq!(report.session_id, s.id);
        assert_eq!(report.net_change, report.final_value - dec!(1000000));
        assert_eq!(lock_count(&orch), 0);
    }

    #[tokio::test]
    async fn test_decision_before_round_started_is_rejected() {
        let orch = orchestrator();
        let p = orch.create_portfolio(request()).await.unwrap();
        let s = orch.create_session(p.id, None).await.unwrap();
        let err = orch.submit_decision(s.id, 1, hold()).await.unwrap_err();
        assert_eq!(
            err,
            EngineError::InvalidTransition {
                from: RoundPhase::RoundPending(1),
                event: PhaseEvent::DecisionResolved
            }
        );
        assert!(orch.report(s.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_negative_latency_is_rejected() {
        let orch = orchestrator();
        let p = orch.create_portfolio(request()).await.unwrap();
        let s = orch.create_session(p.id, None).await.unwrap();
        orch.start_round(s.id).await.unwrap();
        let mut input = hold();
        input.decision_latency_secs = -1.0;
        let err = orch.submit_decision(s.id, 1, input).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_storage_failure_surfaces_as_storage_error() {
        let mut sessions = MockSessionRepository::new();
        sessions
            .expect_load_session()
            .returning(|_| Err(anyhow::anyhow!("database is locked")));
        let mut portfolios = MockPortfolioRepository::new();
        portfolios.expect_load_portfolio().returning(|_| Ok(None));

        let orch = Orchestrator::new(
            AppConfig::default(),
            Providers::scripted(Some(1)),
            Matcher::new(Vec::new(), HashMap::new(), Some(1)),
            Arc::new(sessions),
            Arc::new(portfolios),
        );

        let err = orch.start_round(Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err, EngineError::Storage("database is locked".into()));

        let id = Uuid::new_v4();
        assert_eq!(
            orch.portfolio(id).await.unwrap_err(),
            EngineError::PortfolioNotFound(id)
        );
    }

    #[tokio::test]
    async fn test_run_session_abandoned_when_channel_closes() {
        let orch = orchestrator();
        let p = orch.create_portfolio(request()).await.unwrap();
        let s = orch.create_session(p.id, None).await.unwrap();

        let (decision_tx, decision_rx) = mpsc::channel(1);
        let (payload_tx, mut payload_rx) = mpsc::channel(1);
        drop(decision_tx);

        let err = orch.run_session(s.id, decision_rx, payload_tx).await.unwrap_err();
        assert_eq!(err, EngineError::SessionAbandoned(s.id));
        assert_eq!(payload_rx.recv().await.unwrap().round_number, 1);

        // Nothing was resolved; the round is still open.
        let stored = orch.session(s.id).await.unwrap();
        assert_eq!(stored.phase, RoundPhase::AwaitingDecision(1));
        assert_eq!(stored.finalized_rounds().count(), 0);
        assert_eq!(lock_count(&orch), 0);
    }
}
