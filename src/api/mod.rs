//! HTTP transport: axum router over the orchestrator.
//!
//! CORS is open for local front-end development.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, Method},
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

pub use routes::AppState;

/// Build the router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/portfolios", post(routes::create_portfolio))
        .route("/api/sessions", post(routes::create_session))
        .route("/api/sessions/:id", get(routes::get_session))
        .route("/api/sessions/:id/rounds", post(routes::start_round))
        .route(
            "/api/sessions/:id/rounds/:n/decision",
            post(routes::submit_decision),
        )
        .route("/api/sessions/:id/report", get(routes::get_report))
        .route("/health", get(routes::health))
        .layer(cors)
        .with_state(state)
}

/// Serve the API until the task is dropped or the listener fails.
pub async fn serve(state: AppState, port: u16) -> Result<()> {
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind API port {port}"))?;
    info!(port, "API server listening on http://localhost:{port}");
    axum::serve(listener, app).await.context("API server error")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::engine::Orchestrator;
    use crate::providers::Providers;
    use crate::replay::Matcher;
    use crate::storage::MemoryStore;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let mut config = AppConfig::default();
        config.game.seed = Some(9);
        let store = Arc::new(MemoryStore::new());
        Arc::new(Orchestrator::new(
            config,
            Providers::scripted(Some(9)),
            Matcher::new(Vec::new(), HashMap::new(), Some(9)),
            store.clone(),
            store,
        ))
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let req = match body {
            Some(b) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), 1_000_000).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    fn portfolio_body() -> Value {
        json!({
            "tickers": ["AAPL", "NVDA"],
            "allocations": ["300000", "200000"],
            "risk_tier": "Balanced",
            "entry_prices": ["190.00", "480.00"]
        })
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = build_router(test_state());
        let (status, _) = call(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_full_session_over_http() {
        let app = build_router(test_state());

        let (status, portfolio) = call(&app, "POST", "/api/portfolios", Some(portfolio_body())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(portfolio["cash"], "500000");
        let portfolio_id = portfolio["id"].as_str().unwrap().to_string();

        let (status, session) = call(
            &app,
            "POST",
            "/api/sessions",
            Some(json!({ "portfolio_id": portfolio_id, "total_rounds": 1 })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let sid = session["id"].as_str().unwrap().to_string();

        let (status, _) = call(&app, "GET", &format!("/api/sessions/{sid}/report"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, payload) = call(&app, "POST", &format!("/api/sessions/{sid}/rounds"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload["round_number"], 1);

        let decision = json!({
            "decision": "SELL_HALF",
            "opened_data_panel": true,
            "decision_latency_secs": 6.5
        });
        let uri = format!("/api/sessions/{sid}/rounds/1/decision");
        let (status, outcome) = call(&app, "POST", &uri, Some(decision.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome["duplicate"], false);
        assert!(outcome["report"].is_object());

        let (status, replay) = call(&app, "POST", &uri, Some(decision)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(replay["duplicate"], true);
        assert_eq!(replay["record"], outcome["record"]);

        let (status, report) = call(&app, "GET", &format!("/api/sessions/{sid}/report"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(report["profile"]["classification"].is_string());

        let (status, session) = call(&app, "GET", &format!("/api/sessions/{sid}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(session["status"], "Completed");
    }

    #[tokio::test]
    async fn test_over_limit_portfolio_is_422() {
        let app = build_router(test_state());
        let mut body = portfolio_body();
        body["risk_tier"] = json!("Conservative");
        let (status, err) = call(&app, "POST", "/api/portfolios", Some(body)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err["error"], "validation");
    }

    #[tokio::test]
    async fn test_unknown_session_is_404() {
        let app = build_router(test_state());
        let uri = format!("/api/sessions/{}", uuid::Uuid::new_v4());
        let (status, err) = call(&app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(err["error"], "session_not_found");
    }

    #[tokio::test]
    async fn test_decision_before_round_is_409() {
        let app = build_router(test_state());
        let (_, portfolio) = call(&app, "POST", "/api/portfolios", Some(portfolio_body())).await;
        let (_, session) = call(
            &app,
            "POST",
            "/api/sessions",
            Some(json!({ "portfolio_id": portfolio["id"] })),
        )
        .await;
        let sid = session["id"].as_str().unwrap();
        let (status, err) = call(
            &app,
            "POST",
            &format!("/api/sessions/{sid}/rounds/1/decision"),
            Some(json!({ "decision": "HOLD", "opened_data_panel": false, "decision_latency_secs": 1.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(err["error"], "invalid_transition");
    }
}
