//! Persistence layer.
//!
//! The engine reads and writes through the narrow repository traits
//! below. Two backends are provided: an in-memory store for tests and
//! scripted play, and SQLite with the relational round layout used by
//! analytics. Historical reference cases can be seeded from a JSON file.

pub mod cases;
pub mod memory;
pub mod sqlite;

pub use cases::load_cases_file;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::ledger::Portfolio;
use crate::types::{GameSession, HistoricalCase};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn load_session(&self, id: Uuid) -> Result<Option<GameSession>>;
    async fn save_session(&self, session: &GameSession) -> Result<()>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PortfolioRepository: Send + Sync {
    async fn load_portfolio(&self, id: Uuid) -> Result<Option<Portfolio>>;
    async fn save_portfolio(&self, portfolio: &Portfolio) -> Result<()>;
}

#[async_trait]
pub trait CaseRepository: Send + Sync {
    async fn all_cases(&self) -> Result<Vec<HistoricalCase>>;
    /// Insert cases, skipping ones already stored. Returns how many were new.
    async fn insert_cases(&self, cases: &[HistoricalCase]) -> Result<usize>;
}
