//! Market Mayhem game server.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens storage and seeds historical cases, then either serves the HTTP
//! API or plays a scripted demo session, with graceful shutdown.

use anyhow::Result;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use mayhem::api;
use mayhem::config::AppConfig;
use mayhem::engine::driver::PortfolioRequest;
use mayhem::engine::{FinalReport, Orchestrator, RoundPayload};
use mayhem::ledger::RiskTier;
use mayhem::providers::Providers;
use mayhem::replay::Matcher;
use mayhem::storage::{
    load_cases_file, CaseRepository, MemoryStore, PortfolioRepository, SessionRepository,
    SqliteStore,
};
use mayhem::types::{Decision, DecisionInput, HistoricalCase};

const BANNER: &str = r#"
 __  __    _ __   ___   _ _____ __  __
|  \/  |  / \\ \ / / | | | ____|  \/  |
| |\/| | / _ \\ V /| |_| |  _| | |\/| |
| |  | |/ ___ \| | |  _  | |___| |  | |
|_|  |_/_/   \_\_| |_| |_|_____|_|  |_|

  Market Mayhem: trade the headline, face the history
  v0.1.0
"#;

const CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = if Path::new(CONFIG_PATH).exists() {
        AppConfig::load(CONFIG_PATH)?
    } else {
        AppConfig::default()
    };

    init_logging();

    println!("{BANNER}");
    info!(
        total_rounds = cfg.game.total_rounds,
        initial_budget = %cfg.game.initial_budget,
        difficulty = ?cfg.game.difficulty,
        mode = ?cfg.providers.mode,
        "Market Mayhem starting up"
    );

    // -- Storage and reference data --------------------------------------

    let seed_cases = match &cfg.storage.cases_path {
        Some(path) => load_cases_file(Path::new(path))?,
        None => Vec::new(),
    };

    let (sessions, portfolios, cases): (
        Arc<dyn SessionRepository>,
        Arc<dyn PortfolioRepository>,
        Vec<HistoricalCase>,
    ) = match &cfg.storage.database_url {
        Some(url) => {
            let store = Arc::new(SqliteStore::connect(url).await?);
            let inserted = store.insert_cases(&seed_cases).await?;
            let cases = store.all_cases().await?;
            info!(inserted, total = cases.len(), "Historical cases seeded");
            let sessions: Arc<dyn SessionRepository> = store.clone();
            let portfolios: Arc<dyn PortfolioRepository> = store;
            (sessions, portfolios, cases)
        }
        None => {
            info!("No database_url configured, using in-memory storage");
            let store = Arc::new(MemoryStore::new());
            let sessions: Arc<dyn SessionRepository> = store.clone();
            let portfolios: Arc<dyn PortfolioRepository> = store;
            (sessions, portfolios, seed_cases)
        }
    };

    let matcher = Matcher::new(cases, cfg.sectors.clone(), cfg.game.seed);
    info!(cases = matcher.len(), "Historical case matcher ready");

    let providers = Providers::from_config(&cfg)?;
    let server = cfg.server.clone();
    let orchestrator = Arc::new(Orchestrator::new(cfg, providers, matcher, sessions, portfolios));

    // -- Serve or demo ---------------------------------------------------

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    if server.enabled {
        tokio::select! {
            res = api::serve(orchestrator.clone(), server.port) => {
                if let Err(e) = res {
                    error!(error = %e, "API server stopped");
                    return Err(e);
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received");
            }
        }
    } else {
        tokio::select! {
            res = run_demo(orchestrator.clone()) => match res {
                Ok(report) => log_report(&report),
                Err(e) => error!(error = %e, "Demo session failed"),
            },
            _ = &mut shutdown => {
                warn!("Shutdown signal received, abandoning demo session");
            }
        }
    }

    info!("Market Mayhem shut down cleanly");
    Ok(())
}

/// Play one session with a scripted player that reads the data panel and
/// sides with the headline consensus.
async fn run_demo(orchestrator: Arc<Orchestrator>) -> Result<FinalReport> {
    let portfolio = orchestrator
        .create_portfolio(PortfolioRequest {
            tickers: vec!["AAPL".into(), "MSFT".into(), "JPM".into()],
            allocations: vec![dec!(300000), dec!(250000), dec!(200000)],
            risk_tier: RiskTier::Balanced,
            entry_prices: None,
        })
        .await?;
    let session = orchestrator.create_session(portfolio.id, None).await?;

    let (decision_tx, decision_rx) = mpsc::channel::<DecisionInput>(1);
    let (payload_tx, mut payload_rx) = mpsc::channel::<RoundPayload>(1);

    let player = tokio::spawn(async move {
        let mut last_round = 0;
        while let Some(payload) = payload_rx.recv().await {
            // A resent payload means the last decision was rejected.
            let decision = if payload.round_number == last_round {
                Decision::Hold
            } else {
                demo_decision(&payload)
            };
            last_round = payload.round_number;
            info!(
                round = payload.round_number,
                ticker = %payload.ticker,
                event = %payload.event.description,
                commentator = %payload.commentary.text,
                consensus = payload.panel.consensus.label(),
                %decision,
                "Player decides"
            );
            let input = DecisionInput {
                decision,
                opened_data_panel: true,
                decision_latency_secs: 4.0,
            };
            if decision_tx.send(input).await.is_err() {
                break;
            }
        }
    });

    let report = orchestrator
        .run_session(session.id, decision_rx, payload_tx)
        .await;
    player.abort();
    Ok(report?)
}

fn demo_decision(payload: &RoundPayload) -> Decision {
    let consensus = payload.panel.consensus;
    if consensus.is_bearish() {
        Decision::SellHalf
    } else if consensus.is_bullish() && payload.position_allocation > Decimal::ZERO {
        Decision::Buy
    } else {
        Decision::Hold
    }
}

fn log_report(report: &FinalReport) {
    info!(
        session_id = %report.session_id,
        profile = %report.profile.classification,
        final_value = %report.final_value,
        net_change = %report.net_change,
        total_return_pct = %report.total_return_pct,
        "Final report"
    );
    for (i, tip) in report.profile.coaching_tips.iter().enumerate() {
        info!(n = i + 1, tip = %tip, "Coaching");
    }
}

/// Initialise the tracing subscriber.
///
/// - Default: human-readable, `mayhem=info` unless `RUST_LOG` is set
/// - `MAYHEM_LOG_JSON` set: JSON lines with thread ids
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mayhem=info"));

    if std::env::var("MAYHEM_LOG_JSON").is_ok() {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
