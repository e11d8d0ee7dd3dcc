//! SQLite persistence.
//!
//! Sessions are stored whole as JSON in `game_sessions.state_json`, which
//! is what the engine reads back. Each round is also written out
//! relationally (`game_rounds` + `round_analytics`) so decisions and
//! behavioral flags can be queried without decoding session blobs.
//! Money columns are TEXT holding the exact decimal representation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

use super::{CaseRepository, PortfolioRepository, SessionRepository};
use crate::ledger::{Portfolio, Position, RiskTier};
use crate::types::{GameSession, HistoricalCase, RoundRecord};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS portfolios (
        id TEXT PRIMARY KEY,
        risk_tier TEXT NOT NULL,
        initial_budget TEXT NOT NULL,
        cash TEXT NOT NULL,
        realized_pl TEXT NOT NULL,
        session_pl TEXT NOT NULL,
        positions_json TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS game_sessions (
        id TEXT PRIMARY KEY,
        portfolio_id TEXT NOT NULL,
        total_rounds INTEGER NOT NULL,
        current_round INTEGER NOT NULL,
        status TEXT NOT NULL,
        phase TEXT NOT NULL,
        profile TEXT,
        state_json TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS game_rounds (
        session_id TEXT NOT NULL,
        round_number INTEGER NOT NULL,
        ticker TEXT NOT NULL,
        event_type TEXT NOT NULL,
        event_description TEXT NOT NULL,
        event_horizon INTEGER NOT NULL,
        villain_stance TEXT NOT NULL,
        villain_bias TEXT NOT NULL,
        villain_hot_take TEXT NOT NULL,
        player_decision TEXT,
        decision_time REAL,
        opened_data_tab INTEGER,
        pl_dollars TEXT,
        pl_percent TEXT,
        PRIMARY KEY (session_id, round_number)
    )",
    "CREATE TABLE IF NOT EXISTS round_analytics (
        session_id TEXT NOT NULL,
        round_number INTEGER NOT NULL,
        headlines_shown TEXT NOT NULL,
        consensus TEXT NOT NULL,
        contradiction_score REAL NOT NULL,
        price_pattern TEXT NOT NULL,
        historical_case_date TEXT,
        behavior_flags TEXT NOT NULL,
        degraded_fields TEXT NOT NULL,
        synthetic_case INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (session_id, round_number)
    )",
    "CREATE TABLE IF NOT EXISTS historical_cases (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ticker TEXT NOT NULL,
        event_type TEXT NOT NULL,
        date TEXT NOT NULL,
        horizon_days INTEGER NOT NULL,
        day0_price TEXT NOT NULL,
        day_h_price TEXT NOT NULL,
        price_path TEXT NOT NULL,
        return_pct TEXT NOT NULL,
        sector TEXT NOT NULL,
        volatility REAL NOT NULL,
        UNIQUE (ticker, event_type, date)
    )",
    "CREATE INDEX IF NOT EXISTS idx_cases_lookup ON historical_cases (ticker, event_type)",
];

pub struct SqliteStore {
    pool: SqlitePool,
}

fn parse_decimal(row: &sqlx::sqlite::SqliteRow, column: &str) -> Result<Decimal> {
    let raw: String = row.try_get(column)?;
    Decimal::from_str(&raw).with_context(|| format!("Bad decimal in {column}: {raw}"))
}

impl SqliteStore {
    /// Open (creating if needed) the database and apply the schema.
    pub async fn connect(url: &str) -> Result<Self> {
        let in_memory = url.contains(":memory:");
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid database URL: {url}"))?
            .create_if_missing(true);
        // An in-memory database lives and dies with its connection.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(4)
        };
        let pool = pool_options
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database {url}"))?;

        if !in_memory {
            sqlx::query("PRAGMA journal_mode=WAL").execute(&pool).await?;
        }

        let store = Self { pool };
        store.migrate().await?;
        info!(url, "SQLite store ready");
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(*statement)
                .execute(&self.pool)
                .await
                .context("Schema migration failed")?;
        }
        Ok(())
    }

    /// `(round_number, decision)` for every resolved round of a session.
    pub async fn decision_history(&self, session_id: Uuid) -> Result<Vec<(u32, String)>> {
        let rows = sqlx::query(
            "SELECT round_number, player_decision FROM game_rounds
             WHERE session_id = ? AND player_decision IS NOT NULL
             ORDER BY round_number",
        )
        .bind(session_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| -> Result<(u32, String)> {
                let n: i64 = row.try_get("round_number")?;
                let d: String = row.try_get("player_decision")?;
                Ok((n as u32, d))
            })
            .collect()
    }

    /// Behavioral flag tallies across all stored rounds.
    pub async fn flag_counts(&self) -> Result<Vec<(String, u32)>> {
        let rows = sqlx::query("SELECT behavior_flags FROM round_analytics")
            .fetch_all(&self.pool)
            .await?;
        let mut counts: Vec<(String, u32)> = Vec::new();
        for row in rows {
            let raw: String = row.try_get("behavior_flags")?;
            let flags: Vec<String> = serde_json::from_str(&raw).context("Bad behavior_flags")?;
            for flag in flags {
                match counts.iter_mut().find(|(f, _)| *f == flag) {
                    Some((_, c)) => *c += 1,
                    None => counts.push((flag, 1)),
                }
            }
        }
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(counts)
    }
}

async fn write_round(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    session_id: &str,
    round: &RoundRecord,
) -> Result<()> {
    let res = round.resolution.as_ref();
    sqlx::query(
        "INSERT OR REPLACE INTO game_rounds (session_id, round_number, ticker, event_type,
            event_description, event_horizon, villain_stance, villain_bias, villain_hot_take,
            player_decision, decision_time, opened_data_tab, pl_dollars, pl_percent)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(session_id)
    .bind(round.round_number as i64)
    .bind(&round.ticker)
    .bind(round.event.event_type.as_str())
    .bind(&round.event.description)
    .bind(round.event.horizon_days as i64)
    .bind(round.commentary.stance.to_string())
    .bind(round.commentary.bias.label())
    .bind(&round.commentary.text)
    .bind(res.map(|r| r.decision.to_string()))
    .bind(res.map(|r| r.decision_latency_secs))
    .bind(res.map(|r| r.opened_data_panel))
    .bind(res.map(|r| r.pl_dollars.to_string()))
    .bind(res.map(|r| r.pl_percent.to_string()))
    .execute(&mut **tx)
    .await
    .with_context(|| format!("Failed to write round {}", round.round_number))?;

    let flags: Vec<String> = res
        .map(|r| r.behavior_flags.iter().map(|f| f.to_string()).collect())
        .unwrap_or_default();
    let degraded: Vec<String> = round.degraded.iter().map(|d| d.slot.to_string()).collect();
    sqlx::query(
        "INSERT OR REPLACE INTO round_analytics (session_id, round_number, headlines_shown,
            consensus, contradiction_score, price_pattern, historical_case_date,
            behavior_flags, degraded_fields, synthetic_case)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(session_id)
    .bind(round.round_number as i64)
    .bind(serde_json::to_string(&round.panel.headlines)?)
    .bind(round.panel.consensus.label())
    .bind(round.panel.contradiction_score)
    .bind(round.panel.pattern.as_str())
    .bind(res.map(|r| r.historical_case.date.to_string()))
    .bind(serde_json::to_string(&flags)?)
    .bind(serde_json::to_string(&degraded)?)
    .bind(res.is_some_and(|r| r.historical_case.synthetic))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl SessionRepository for SqliteStore {
    async fn load_session(&self, id: Uuid) -> Result<Option<GameSession>> {
        let row = sqlx::query("SELECT state_json FROM game_sessions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let json: String = row.try_get("state_json")?;
                let session = serde_json::from_str(&json)
                    .with_context(|| format!("Corrupt session state for {id}"))?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    async fn save_session(&self, session: &GameSession) -> Result<()> {
        let id = session.id.to_string();
        let state = serde_json::to_string(session).context("Failed to serialize session")?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT OR REPLACE INTO game_sessions (id, portfolio_id, total_rounds, current_round,
                status, phase, profile, state_json, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(session.portfolio_id.to_string())
        .bind(session.total_rounds as i64)
        .bind(session.current_round as i64)
        .bind(session.status.to_string())
        .bind(session.phase.to_string())
        .bind(session.profile.as_ref().map(|p| p.classification.to_string()))
        .bind(&state)
        .bind(session.created_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await
        .context("Failed to write session")?;

        for round in &session.rounds {
            write_round(&mut tx, &id, round).await?;
        }
        tx.commit().await?;
        debug!(session_id = %session.id, phase = %session.phase, "Session saved");
        Ok(())
    }
}

#[async_trait]
impl PortfolioRepository for SqliteStore {
    async fn load_portfolio(&self, id: Uuid) -> Result<Option<Portfolio>> {
        let row = sqlx::query("SELECT * FROM portfolios WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let tier: String = row.try_get("risk_tier")?;
        let positions: String = row.try_get("positions_json")?;
        let positions: Vec<Position> =
            serde_json::from_str(&positions).context("Corrupt positions_json")?;
        let created: String = row.try_get("created_at")?;
        Ok(Some(Portfolio {
            id,
            risk_tier: tier.parse::<RiskTier>()?,
            initial_budget: parse_decimal(&row, "initial_budget")?,
            positions,
            cash: parse_decimal(&row, "cash")?,
            realized_pl: parse_decimal(&row, "realized_pl")?,
            session_pl: parse_decimal(&row, "session_pl")?,
            created_at: DateTime::parse_from_rfc3339(&created)
                .context("Bad created_at")?
                .with_timezone(&Utc),
        }))
    }

    async fn save_portfolio(&self, portfolio: &Portfolio) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO portfolios (id, risk_tier, initial_budget, cash, realized_pl,
                session_pl, positions_json, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(portfolio.id.to_string())
        .bind(portfolio.risk_tier.to_string())
        .bind(portfolio.initial_budget.to_string())
        .bind(portfolio.cash.to_string())
        .bind(portfolio.realized_pl.to_string())
        .bind(portfolio.session_pl.to_string())
        .bind(serde_json::to_string(&portfolio.positions)?)
        .bind(portfolio.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to write portfolio")?;
        Ok(())
    }
}

#[async_trait]
impl CaseRepository for SqliteStore {
    async fn all_cases(&self) -> Result<Vec<HistoricalCase>> {
        let rows = sqlx::query(
            "SELECT ticker, event_type, date, horizon_days, day0_price, day_h_price, price_path,
                    sector, volatility
             FROM historical_cases ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<HistoricalCase> {
                let event_type: String = row.try_get("event_type")?;
                let date: String = row.try_get("date")?;
                let path: String = row.try_get("price_path")?;
                let horizon: i64 = row.try_get("horizon_days")?;
                Ok(HistoricalCase {
                    ticker: row.try_get("ticker")?,
                    event_type: event_type.parse()?,
                    date: date.parse().with_context(|| format!("Bad case date {date}"))?,
                    horizon_days: horizon as u32,
                    day0_price: parse_decimal(row, "day0_price")?,
                    day_h_price: parse_decimal(row, "day_h_price")?,
                    price_path: serde_json::from_str(&path).context("Corrupt price_path")?,
                    sector: row.try_get("sector")?,
                    volatility: row.try_get("volatility")?,
                    synthetic: false,
                })
            })
            .collect()
    }

    async fn insert_cases(&self, cases: &[HistoricalCase]) -> Result<usize> {
        let mut added = 0;
        for case in cases {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO historical_cases (ticker, event_type, date, horizon_days,
                    day0_price, day_h_price, price_path, return_pct, sector, volatility)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&case.ticker)
            .bind(case.event_type.as_str())
            .bind(case.date.to_string())
            .bind(case.horizon_days as i64)
            .bind(case.day0_price.to_string())
            .bind(case.day_h_price.to_string())
            .bind(serde_json::to_string(&case.price_path)?)
            .bind(case.return_pct().to_string())
            .bind(&case.sector)
            .bind(case.volatility)
            .execute(&self.pool)
            .await?;
            added += result.rows_affected() as usize;
        }
        if added > 0 {
            info!(added, "Historical cases seeded");
        }
        Ok(added)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
