//! HTTP route handlers.
//!
//! Every handler is a thin mapping from a request onto one orchestrator
//! call. Engine errors become JSON bodies with a status per error kind.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::engine::driver::PortfolioRequest;
use crate::engine::{EngineError, FinalReport, Orchestrator, RoundOutcome, RoundPayload};
use crate::ledger::Portfolio;
use crate::types::{DecisionInput, GameSession};

pub type AppState = Arc<Orchestrator>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        let (status, kind) = match &e {
            EngineError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation"),
            EngineError::SessionNotFound(_) => (StatusCode::NOT_FOUND, "session_not_found"),
            EngineError::PortfolioNotFound(_) => (StatusCode::NOT_FOUND, "portfolio_not_found"),
            EngineError::InvalidTransition { .. } => (StatusCode::CONFLICT, "invalid_transition"),
            EngineError::RoundOutOfOrder { .. } => (StatusCode::CONFLICT, "round_out_of_order"),
            EngineError::InsufficientCash { .. } => (StatusCode::CONFLICT, "insufficient_cash"),
            EngineError::SessionAbandoned(_) => (StatusCode::GONE, "session_abandoned"),
            EngineError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage"),
        };
        Self {
            status,
            kind,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.kind, "message": self.message }));
        (self.status, body).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSessionRequest {
    pub portfolio_id: Uuid,
    #[serde(default)]
    pub total_rounds: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PortfolioResponse {
    #[serde(flatten)]
    pub portfolio: Portfolio,
    pub cash_balance: Decimal,
    pub total_value: Decimal,
}

impl From<Portfolio> for PortfolioResponse {
    fn from(portfolio: Portfolio) -> Self {
        Self {
            cash_balance: portfolio.cash_balance(),
            total_value: portfolio.total_value(),
            portfolio,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DecisionResponse {
    /// True when the round had already been resolved.
    pub duplicate: bool,
    #[serde(flatten)]
    pub outcome: RoundOutcome,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/portfolios
pub async fn create_portfolio(
    State(state): State<AppState>,
    Json(request): Json<PortfolioRequest>,
) -> ApiResult<(StatusCode, Json<PortfolioResponse>)> {
    let portfolio = state.create_portfolio(request).await?;
    Ok((StatusCode::CREATED, Json(portfolio.into())))
}

/// POST /api/sessions
pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> ApiResult<(StatusCode, Json<GameSession>)> {
    let session = state
        .create_session(request.portfolio_id, request.total_rounds)
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// POST /api/sessions/:id/rounds
pub async fn start_round(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<RoundPayload>> {
    Ok(Json(state.start_round(session_id).await?))
}

/// POST /api/sessions/:id/rounds/:n/decision
pub async fn submit_decision(
    State(state): State<AppState>,
    Path((session_id, round_number)): Path<(Uuid, u32)>,
    Json(input): Json<DecisionInput>,
) -> ApiResult<Json<DecisionResponse>> {
    let resolution = state.submit_decision(session_id, round_number, input).await?;
    Ok(Json(DecisionResponse {
        duplicate: resolution.is_duplicate(),
        outcome: resolution.into_outcome(),
    }))
}

/// GET /api/sessions/:id
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<GameSession>> {
    Ok(Json(state.session(session_id).await?))
}

/// GET /api/sessions/:id/report
pub async fn get_report(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<FinalReport>> {
    match state.report(session_id).await? {
        Some(report) => Ok(Json(report)),
        None => Err(ApiError {
            status: StatusCode::CONFLICT,
            kind: "not_completed",
            message: format!("Session {session_id} has not completed"),
        }),
    }
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}
