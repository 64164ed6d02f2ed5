//! HTTP surface: inbound webhook plus read-only listing and analytics
//!
//! - POST /webhook/telegram
//! - GET  /api/signals, /api/wallets, /api/dashboard/stats
//! - GET  /api/analytics/{patterns,clusters,performance,time-patterns,rules}
//! - GET  /api/analytics/wallet/:wallet_id, /api/analytics/signal/:signal_id
//! - GET  /health

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::analytics::{
    self, ClusterAnalysis, DashboardStats, IndividualPerformance, PatternInsights, SignalAnalysis,
    SuggestedRules, TimePatterns, WalletAnalysis,
};
use crate::dispatch::{DispatchOutcome, Dispatcher, WebhookPayload};
use crate::error::Error;
use crate::ledger::{SignalLedger, WalletLedger};
use crate::types::{PerformanceStatus, Signal, WalletId, WalletStats};

const DEFAULT_SIGNALS_PER_PAGE: usize = 20;
const DEFAULT_WALLETS_PER_PAGE: usize = 50;
const MAX_PER_PAGE: usize = 200;

/// Shared server state
pub struct ServerState {
    pub dispatcher: Arc<Dispatcher>,
    pub start_time: Instant,
}

impl ServerState {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            start_time: Instant::now(),
        }
    }
}

/// JSON error body with a status code
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        let status = match e {
            Error::InvalidClusterSize(_) | Error::InvalidWalletId(_) => StatusCode::BAD_REQUEST,
            Error::SignalNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

// API types

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
    pub result: DispatchOutcome,
}

#[derive(Debug, Default, Deserialize)]
pub struct SignalsQuery {
    pub status: Option<String>,
    pub page: Option<usize>,
    pub per_page: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WalletsQuery {
    pub sort_by: Option<String>,
    pub page: Option<usize>,
    pub per_page: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ClustersQuery {
    pub size: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SignalsPage {
    pub signals: Vec<Signal>,
    pub total: usize,
    pub pages: usize,
    pub current_page: usize,
}

#[derive(Debug, Serialize)]
pub struct WalletsPage {
    pub wallets: Vec<WalletStats>,
    pub total: usize,
    pub pages: usize,
    pub current_page: usize,
}

/// Ordering for wallet listings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletSort {
    SuccessRate,
    TotalCalls,
    LastSeen,
}

impl WalletSort {
    /// Unrecognized keys fall back to most recently seen
    pub fn from_query(value: Option<&str>) -> Self {
        match value.unwrap_or("success_rate") {
            "success_rate" => WalletSort::SuccessRate,
            "total_calls" => WalletSort::TotalCalls,
            _ => WalletSort::LastSeen,
        }
    }

    pub fn sort(&self, wallets: &mut [WalletStats]) {
        match self {
            WalletSort::SuccessRate => wallets.sort_by(|a, b| b.success_rate.total_cmp(&a.success_rate)),
            WalletSort::TotalCalls => wallets.sort_by(|a, b| b.total_calls.cmp(&a.total_calls)),
            WalletSort::LastSeen => wallets.sort_by(|a, b| b.last_seen.cmp(&a.last_seen)),
        }
    }
}

/// Slice one 1-based page; returns (items, total, pages, page)
fn paginate<T>(
    items: Vec<T>,
    page: Option<usize>,
    per_page: Option<usize>,
    default_per_page: usize,
) -> (Vec<T>, usize, usize, usize) {
    let page = page.unwrap_or(1).max(1);
    let per_page = per_page.unwrap_or(default_per_page).clamp(1, MAX_PER_PAGE);
    let total = items.len();
    let pages = total.div_ceil(per_page);
    let slice = items.into_iter().skip((page - 1).saturating_mul(per_page)).take(per_page).collect();
    (slice, total, pages, page)
}

// Handlers

/// POST /webhook/telegram
async fn webhook_handler(
    State(state): State<Arc<ServerState>>,
    payload: std::result::Result<Json<WebhookPayload>, JsonRejection>,
) -> ApiResult<WebhookResponse> {
    let Json(payload) = payload.map_err(|rejection| {
        warn!("Webhook rejected: {}", rejection.body_text());
        ApiError::bad_request(format!("Invalid JSON body: {}", rejection.body_text()))
    })?;

    if !payload.has_required_fields() {
        warn!("Webhook rejected: missing signal_type or message_text");
        return Err(ApiError::bad_request("Missing required fields: signal_type, message_text"));
    }

    let result = state.dispatcher.handle_webhook(&payload).await;
    Ok(Json(WebhookResponse {
        status: "success",
        result,
    }))
}

/// GET /api/signals
async fn signals_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<SignalsQuery>,
) -> ApiResult<SignalsPage> {
    let status = match query.status.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => Some(
            raw.parse::<PerformanceStatus>()
                .map_err(|_| ApiError::bad_request(format!("Unknown status: {}", raw)))?,
        ),
        None => None,
    };

    let mut signals: Vec<Signal> = state
        .dispatcher
        .signals()
        .list()
        .await?
        .into_iter()
        .filter(|s| status.map_or(true, |st| s.performance_status == st))
        .collect();
    signals.sort_by(|a, b| b.signal_time.cmp(&a.signal_time));

    let (signals, total, pages, current_page) =
        paginate(signals, query.page, query.per_page, DEFAULT_SIGNALS_PER_PAGE);
    Ok(Json(SignalsPage {
        signals,
        total,
        pages,
        current_page,
    }))
}

/// GET /api/wallets
async fn wallets_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<WalletsQuery>,
) -> ApiResult<WalletsPage> {
    let mut wallets = state.dispatcher.wallets().list().await?;
    WalletSort::from_query(query.sort_by.as_deref()).sort(&mut wallets);

    let (wallets, total, pages, current_page) =
        paginate(wallets, query.page, query.per_page, DEFAULT_WALLETS_PER_PAGE);
    Ok(Json(WalletsPage {
        wallets,
        total,
        pages,
        current_page,
    }))
}

/// GET /api/dashboard/stats
async fn dashboard_handler(State(state): State<Arc<ServerState>>) -> ApiResult<DashboardStats> {
    let signals = state.dispatcher.signals().list().await?;
    let wallets = state.dispatcher.wallets().list().await?;
    Ok(Json(analytics::dashboard_stats(&signals, &wallets)))
}

/// GET /api/analytics/patterns
async fn patterns_handler(State(state): State<Arc<ServerState>>) -> ApiResult<PatternInsights> {
    let signals = state.dispatcher.signals().list().await?;
    let wallets = state.dispatcher.wallets().list().await?;
    Ok(Json(analytics::pattern_insights(&signals, &wallets)?))
}

/// GET /api/analytics/clusters
async fn clusters_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<ClustersQuery>,
) -> ApiResult<ClusterAnalysis> {
    let signals = state.dispatcher.signals().list().await?;
    Ok(Json(analytics::analyze_clusters(&signals, query.size.unwrap_or(2))?))
}

/// GET /api/analytics/performance
async fn performance_handler(State(state): State<Arc<ServerState>>) -> ApiResult<IndividualPerformance> {
    let wallets = state.dispatcher.wallets().list().await?;
    Ok(Json(analytics::analyze_individual_performance(&wallets)))
}

/// GET /api/analytics/time-patterns
async fn time_patterns_handler(State(state): State<Arc<ServerState>>) -> ApiResult<TimePatterns> {
    let signals = state.dispatcher.signals().list().await?;
    Ok(Json(analytics::analyze_time_patterns(&signals)))
}

/// GET /api/analytics/rules
async fn rules_handler(State(state): State<Arc<ServerState>>) -> ApiResult<SuggestedRules> {
    let signals = state.dispatcher.signals().list().await?;
    let wallets = state.dispatcher.wallets().list().await?;
    Ok(Json(analytics::suggest_rules(&signals, &wallets)))
}

/// GET /api/analytics/wallet/:wallet_id
async fn wallet_analysis_handler(
    State(state): State<Arc<ServerState>>,
    Path(wallet_id): Path<String>,
) -> ApiResult<WalletAnalysis> {
    let id: WalletId = wallet_id.parse()?;
    let signals = state.dispatcher.signals().list().await?;
    let wallets = state.dispatcher.wallets().list().await?;
    analytics::analyze_wallet(&id, &wallets, &signals)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Wallet not found: {}", id)))
}

/// GET /api/analytics/signal/:signal_id
async fn signal_analysis_handler(
    State(state): State<Arc<ServerState>>,
    Path(signal_id): Path<String>,
) -> ApiResult<SignalAnalysis> {
    let signal = state
        .dispatcher
        .signals()
        .get(&signal_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Signal not found: {}", signal_id)))?;
    let wallets = state.dispatcher.wallets().list().await?;
    Ok(Json(analytics::analyze_signal(&signal, &wallets)))
}

/// GET /health
async fn health_handler(State(state): State<Arc<ServerState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// Build the application router
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/webhook/telegram", post(webhook_handler))
        .route("/api/signals", get(signals_handler))
        .route("/api/wallets", get(wallets_handler))
        .route("/api/dashboard/stats", get(dashboard_handler))
        .route("/api/analytics/patterns", get(patterns_handler))
        .route("/api/analytics/clusters", get(clusters_handler))
        .route("/api/analytics/performance", get(performance_handler))
        .route("/api/analytics/time-patterns", get(time_patterns_handler))
        .route("/api/analytics/rules", get(rules_handler))
        .route("/api/analytics/wallet/:wallet_id", get(wallet_analysis_handler))
        .route("/api/analytics/signal/:signal_id", get(signal_analysis_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Serve until Ctrl+C
pub async fn run_server(bind_addr: SocketAddr, dispatcher: Arc<Dispatcher>) -> anyhow::Result<()> {
    let app = router(Arc::new(ServerState::new(dispatcher)));

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!("Listening on http://{}", bind_addr);
    info!("  Webhook: POST http://{}/webhook/telegram", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}
