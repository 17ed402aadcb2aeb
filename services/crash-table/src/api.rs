use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use liftoff_execution::{MemoryStore, StoreError, HISTORY_WINDOW};
use liftoff_types::{Bet, BetError, HistoryRecord, Round};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

const DEFAULT_HISTORY_LIMIT: usize = 50;
const MAX_HISTORY_LIMIT: usize = HISTORY_WINDOW;

#[derive(Clone)]
pub struct AppState {
    store: MemoryStore,
    admin_token: Option<Arc<str>>,
}

impl AppState {
    pub fn new(store: MemoryStore, admin_token: Option<String>) -> Self {
        Self {
            store,
            admin_token: admin_token.map(Arc::from),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/round", get(round_handler))
        .route("/history", get(history_handler))
        .route("/bets", post(bet_handler))
        .route("/cashout", post(cashout_handler))
        .route("/admin/force-crash", post(force_crash_handler))
        .route("/admin/reset", post(reset_handler))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

struct ApiError(StoreError);

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            StoreError::Missing | StoreError::Rejected(BetError::NoRound) => {
                (StatusCode::NOT_FOUND, "NO_ROUND")
            }
            StoreError::Rejected(BetError::BettingClosed { .. }) => {
                (StatusCode::CONFLICT, "BETTING_CLOSED")
            }
            StoreError::Rejected(BetError::DuplicateBet { .. }) => {
                (StatusCode::CONFLICT, "DUPLICATE_BET")
            }
            StoreError::Rejected(BetError::InvalidAmount { .. }) => {
                (StatusCode::BAD_REQUEST, "INVALID_AMOUNT")
            }
            StoreError::Rejected(BetError::NoBet { .. }) => (StatusCode::NOT_FOUND, "NO_BET"),
            StoreError::Rejected(BetError::AlreadyCashedOut { .. }) => {
                (StatusCode::CONFLICT, "ALREADY_CASHED_OUT")
            }
            StoreError::Rejected(BetError::NotRunning { .. }) => {
                (StatusCode::CONFLICT, "NOT_RUNNING")
            }
            StoreError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE"),
        };
        let body = ErrorBody {
            code,
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

fn authorize_admin(headers: &HeaderMap, token: Option<&str>) -> Result<(), StatusCode> {
    if let Some(token) = token {
        let bearer = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));
        if bearer != Some(token) {
            return Err(StatusCode::UNAUTHORIZED);
        }
    }
    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn round_handler(State(state): State<AppState>) -> Result<Json<Round>, ApiError> {
    let round = state.store.snapshot()?.ok_or(StoreError::Missing)?;
    Ok(Json(round))
}

#[derive(Deserialize)]
struct HistoryParams {
    limit: Option<usize>,
}

async fn history_handler(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<HistoryRecord>>, ApiError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .min(MAX_HISTORY_LIMIT);
    Ok(Json(state.store.history(limit)?))
}

#[derive(Deserialize)]
struct BetRequest {
    user: String,
    amount: f64,
}

async fn bet_handler(
    State(state): State<AppState>,
    Json(request): Json<BetRequest>,
) -> Result<Json<Round>, ApiError> {
    let round = state.store.place_bet(&request.user, request.amount)?;
    debug!(round_id = %round.round_id, user = %request.user, amount = request.amount, "bet placed");
    Ok(Json(round))
}

#[derive(Deserialize)]
struct CashoutRequest {
    user: String,
}

async fn cashout_handler(
    State(state): State<AppState>,
    Json(request): Json<CashoutRequest>,
) -> Result<Json<Bet>, ApiError> {
    let bet = state.store.cash_out(&request.user)?;
    debug!(user = %request.user, multiplier = ?bet.cashout_multiplier, "cashed out");
    Ok(Json(bet))
}

async fn force_crash_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, Response> {
    authorize_admin(&headers, state.admin_token.as_deref()).map_err(IntoResponse::into_response)?;
    state
        .store
        .set_force_crash(true)
        .map_err(|err| ApiError(err).into_response())?;
    info!("force-crash requested");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
struct ResetResponse {
    removed: bool,
}

async fn reset_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ResetResponse>, Response> {
    authorize_admin(&headers, state.admin_token.as_deref()).map_err(IntoResponse::into_response)?;
    let removed = state
        .store
        .remove_round()
        .map_err(|err| ApiError(err).into_response())?;
    info!(removed, "round reset requested");
    Ok(Json(ResetResponse { removed }))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state.store))
}

async fn handle_socket(socket: WebSocket, store: MemoryStore) {
    let (mut sender, mut receiver) = socket.split();
    let mut updates = store.subscribe();
    let initial = store.snapshot().ok().flatten();

    let write_task = tokio::spawn(async move {
        if let Some(round) = initial {
            if send_round(&mut sender, &round).await.is_err() {
                return;
            }
        }
        loop {
            match updates.recv().await {
                Ok(round) => {
                    if send_round(&mut sender, &round).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "round feed subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    while let Some(Ok(message)) = receiver.next().await {
        if let Message::Close(_) = message {
            break;
        }
    }

    write_task.abort();
}

async fn send_round(
    sender: &mut SplitSink<WebSocket, Message>,
    round: &Round,
) -> Result<(), axum::Error> {
    let payload = serde_json::to_string(round).map_err(axum::Error::new)?;
    sender.send(Message::Text(payload)).await
}
