//! Dashboard API route handlers.
//!
//! All endpoints return JSON read from the latest engine snapshot.

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::watch;

use crate::engine::budget::BudgetView;
use crate::engine::{EngineSnapshot, WatchedView};
use crate::types::Position;

pub type AppState = watch::Receiver<EngineSnapshot>;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub agent_name: String,
    pub dry_run: bool,
    pub wallet: String,
    pub open_positions: usize,
    pub total_invested: Decimal,
    pub budget_status: String,
    pub trades_remaining: u32,
    pub ticks: u64,
    pub failed_ticks: u64,
    pub last_tick: String,
    pub uptime_secs: i64,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let snap = state.borrow();
    Json(StatusResponse {
        agent_name: snap.agent_name.clone(),
        dry_run: snap.dry_run,
        wallet: snap.wallet.to_string(),
        open_positions: snap.positions.len(),
        total_invested: snap.total_invested,
        budget_status: snap.budget.status.to_string(),
        trades_remaining: snap.budget.trades_remaining,
        ticks: snap.ticks,
        failed_ticks: snap.failed_ticks,
        last_tick: snap.updated_at.to_rfc3339(),
        uptime_secs: (Utc::now() - snap.started_at).num_seconds(),
    })
}

/// GET /api/positions
pub async fn get_positions(State(state): State<AppState>) -> Json<Vec<Position>> {
    Json(state.borrow().positions.clone())
}

/// GET /api/budget
pub async fn get_budget(State(state): State<AppState>) -> Json<BudgetView> {
    Json(state.borrow().budget.clone())
}

/// GET /api/watched
pub async fn get_watched(State(state): State<AppState>) -> Json<Vec<WatchedView>> {
    Json(state.borrow().watched.clone())
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
