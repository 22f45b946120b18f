//! HTTP + WebSocket API
//!
//! Endpoints:
//! - POST /engage - Score and commit a human engagement
//! - POST /witness - Comment on an existing block
//! - GET /chain - Recent blocks
//! - GET /chain/verify - Verify the whole chain, reporting the first bad block
//! - GET /chain/:index - Block by index, with verification up to it
//! - GET /chain/digest/:digest - Block by digest, with verification up to it
//! - GET /engagements - Recent engagement results, optionally for one participant
//! - GET /economics - Supply, headroom and curve factor
//! - GET /accounts/:id - Participant account
//! - GET /pantheon - The four agents
//! - WS /ws/chain - Live block feed
//! - GET /health - Health check

use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::core::economy::ThoughtEconomy;
use crate::error::EconomyError;
use crate::types::{
    BlockQuery, Digest, EconomyOverview, EngagementReceipt, EngagementRecord, EngagementRequest,
    PantheonAgent, ParticipantAccount, ThoughtBlock, WitnessReport, WitnessRequest,
};

/// Blocks returned by GET /chain when no limit is given
const DEFAULT_CHAIN_LIMIT: usize = 20;
const MAX_CHAIN_LIMIT: usize = 500;

/// App state
pub struct AppState {
    pub economy: Arc<ThoughtEconomy>,
}

/// Error body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub retryable: bool,
}

/// Maps economy errors onto status codes
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Economy(EconomyError),
}

impl From<EconomyError> for ApiError {
    fn from(e: EconomyError) -> Self {
        ApiError::Economy(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Economy(e) => match e {
                EconomyError::ProviderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                EconomyError::CommitFailed { .. } | EconomyError::SlotTaken { .. } => StatusCode::CONFLICT,
                EconomyError::Store(s) if s.is_conflict() => StatusCode::CONFLICT,
                EconomyError::UnknownBlock(_) => StatusCode::NOT_FOUND,
                EconomyError::EmptyBlock => StatusCode::BAD_REQUEST,
                EconomyError::Integrity(_)
                | EconomyError::Curve(_)
                | EconomyError::Store(_)
                | EconomyError::Encoding(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::BadRequest(msg) | ApiError::NotFound(msg) => ErrorResponse {
                error: msg.clone(),
                retryable: false,
            },
            ApiError::Economy(e) => {
                if status.is_server_error() {
                    tracing::error!(error = %e, "request failed");
                }
                ErrorResponse {
                    error: e.to_string(),
                    retryable: e.is_retryable(),
                }
            }
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Health response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub chain_length: u64,
}

/// GET /chain query
#[derive(Debug, Deserialize)]
pub struct ChainQuery {
    pub limit: Option<usize>,
}

/// Recent blocks, oldest first
#[derive(Debug, Serialize, Deserialize)]
pub struct ChainResponse {
    pub length: u64,
    pub tip: Option<Digest>,
    pub blocks: Vec<ThoughtBlock>,
}

/// GET /engagements query
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub participant: Option<String>,
    pub limit: Option<usize>,
}

/// Recent engagement results, newest first
#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub results: Vec<EngagementRecord>,
    pub count: usize,
    pub timestamp: DateTime<Utc>,
}

/// Chain verification result
#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub valid: bool,
    /// Blocks that verified before the first failure, or all of them
    pub verified_blocks: u64,
    /// First index that failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault: Option<String>,
}

/// One Pantheon agent
#[derive(Debug, Serialize, Deserialize)]
pub struct AgentInfo {
    pub key: String,
    pub name: String,
    pub title: String,
    pub domain: String,
    pub personality: String,
}

/// Create the API router
pub fn create_router(economy: Arc<ThoughtEconomy>) -> Router {
    let state = Arc::new(AppState { economy });

    Router::new()
        .route("/health", get(health))
        .route("/engage", post(engage))
        .route("/witness", post(witness))
        .route("/chain", get(chain))
        .route("/chain/verify", get(verify))
        .route("/chain/digest/:digest", get(block_by_digest))
        .route("/chain/:index", get(block_by_index))
        .route("/engagements", get(engagements))
        .route("/economics", get(economics))
        .route("/accounts/:id", get(account))
        .route("/pantheon", get(pantheon))
        .route("/ws/chain", get(websocket_handler))
        .with_state(state)
}

/// Health check endpoint
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::VERSION.to_string(),
        chain_length: state.economy.chain().len(),
    })
}

/// Score and commit one engagement. The commit runs detached inside
/// `submit`, so a client disconnect cannot abandon it half way.
async fn engage(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EngagementRequest>,
) -> ApiResult<EngagementReceipt> {
    if req.participant_id.trim().is_empty() {
        return Err(ApiError::BadRequest("participant_id is required".into()));
    }
    Ok(Json(state.economy.submit(req).await?))
}

async fn witness(
    State(state): State<Arc<AppState>>,
    Json(req): Json<WitnessRequest>,
) -> ApiResult<EngagementReceipt> {
    if req.witness_id.trim().is_empty() {
        return Err(ApiError::BadRequest("witness_id is required".into()));
    }
    Ok(Json(state.economy.witness(req).await?))
}

async fn chain(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ChainQuery>,
) -> Json<ChainResponse> {
    let limit = query.limit.unwrap_or(DEFAULT_CHAIN_LIMIT).min(MAX_CHAIN_LIMIT);
    let chain = state.economy.chain();
    Json(ChainResponse {
        length: chain.len(),
        tip: chain.tip().map(|b| b.digest),
        blocks: chain.recent(limit).iter().map(|b| (**b).clone()).collect(),
    })
}

/// A broken chain is a normal answer here, not a failed request
async fn verify(State(state): State<Arc<AppState>>) -> ApiResult<VerifyResponse> {
    match state.economy.verify() {
        Ok(verified_blocks) => Ok(Json(VerifyResponse {
            valid: true,
            verified_blocks,
            failed_at: None,
            fault: None,
        })),
        Err(EconomyError::Integrity(e)) => {
            tracing::warn!(index = e.index, fault = %e.fault, "chain verification failed");
            Ok(Json(VerifyResponse {
                valid: false,
                verified_blocks: e.index,
                failed_at: Some(e.index),
                fault: Some(e.fault.to_string()),
            }))
        }
        Err(e) => Err(e.into()),
    }
}

async fn block_by_index(
    State(state): State<Arc<AppState>>,
    Path(index): Path<u64>,
) -> ApiResult<WitnessReport> {
    Ok(Json(state.economy.witness_query(BlockQuery::Index(index))?))
}

async fn block_by_digest(
    State(state): State<Arc<AppState>>,
    Path(digest): Path<String>,
) -> ApiResult<WitnessReport> {
    let digest = Digest::from_hex(&digest).ok_or(EconomyError::UnknownBlock(digest))?;
    Ok(Json(state.economy.witness_query(BlockQuery::Digest(digest))?))
}

async fn engagements(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<HistoryResponse> {
    let limit = query.limit.unwrap_or(DEFAULT_CHAIN_LIMIT).min(MAX_CHAIN_LIMIT);
    let results = state
        .economy
        .engagement_history(query.participant.as_deref(), limit)?;
    Ok(Json(HistoryResponse {
        count: results.len(),
        results,
        timestamp: Utc::now(),
    }))
}

async fn economics(State(state): State<Arc<AppState>>) -> ApiResult<EconomyOverview> {
    Ok(Json(state.economy.overview()?))
}

async fn account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ParticipantAccount>, ApiError> {
    match state.economy.account(&id)? {
        Some(account) => Ok(Json(account)),
        None => Err(ApiError::NotFound(format!("no account for {id}"))),
    }
}

async fn pantheon() -> Json<Vec<AgentInfo>> {
    Json(
        PantheonAgent::ROTATION
            .iter()
            .map(|a| AgentInfo {
                key: a.key().to_string(),
                name: a.name().to_string(),
                title: a.title().to_string(),
                domain: a.domain().to_string(),
                personality: a.personality().to_string(),
            })
            .collect(),
    )
}

/// WebSocket handler for the live block feed
async fn websocket_handler(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let rx = state.economy.subscribe();
    ws.on_upgrade(move |socket| handle_websocket(socket, rx))
}

/// Forward committed blocks until either side goes away
async fn handle_websocket(socket: WebSocket, mut rx: broadcast::Receiver<Arc<ThoughtBlock>>) {
    let (mut sender, mut receiver) = socket.split();
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(block) => {
                    let json = match serde_json::to_string(block.as_ref()) {
                        Ok(json) => json,
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to encode block event");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "websocket subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

/// Run the API server until `shutdown` resolves
pub async fn run_server<F>(addr: &str, economy: Arc<ThoughtEconomy>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = create_router(economy);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "thought keeper API listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}
