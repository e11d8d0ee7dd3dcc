//! In-memory repositories.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{CaseRepository, PortfolioRepository, SessionRepository};
use crate::ledger::Portfolio;
use crate::types::{GameSession, HistoricalCase};

#[derive(Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<Uuid, GameSession>>,
    portfolios: RwLock<HashMap<Uuid, Portfolio>>,
    cases: RwLock<Vec<HistoricalCase>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait]
impl SessionRepository for MemoryStore {
    async fn load_session(&self, id: Uuid) -> Result<Option<GameSession>> {
        Ok(self.sessions.read().await.get(&id).cloned())
    }

    async fn save_session(&self, session: &GameSession) -> Result<()> {
        self.sessions.write().await.insert(session.id, session.clone());
        Ok(())
    }
}

#[async_trait]
impl PortfolioRepository for MemoryStore {
    async fn load_portfolio(&self, id: Uuid) -> Result<Option<Portfolio>> {
        Ok(self.portfolios.read().await.get(&id).cloned())
    }

    async fn save_portfolio(&self, portfolio: &Portfolio) -> Result<()> {
        self.portfolios
            .write()
            .await
            .insert(portfolio.id, portfolio.clone());
        Ok(())
    }
}

#[async_trait]
impl CaseRepository for MemoryStore {
    async fn all_cases(&self) -> Result<Vec<HistoricalCase>> {
        Ok(self.cases.read().await.clone())
    }

    async fn insert_cases(&self, cases: &[HistoricalCase]) -> Result<usize> {
        let mut stored = self.cases.write().await;
        let mut added = 0;
        for case in cases {
            let exists = stored.iter().any(|c| {
                c.ticker == case.ticker && c.event_type == case.event_type && c.date == case.date
            });
            if !exists {
                stored.push(case.clone());
                added += 1;
            }
        }
        Ok(added)
    }
}
