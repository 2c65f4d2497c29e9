//! HTTP API for the gateway

use crate::builder::IntentKind;
use crate::error::{GatewayError, GatewayResult};
use crate::ledger::ClaimRecord;
use crate::orchestrator::{as_decimal, ClaimReceipt, FaucetStatus, Orchestrator, TransferReceipt};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokengate_common::types::Address;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[derive(Debug, Clone, Copy)]
pub struct RouterOptions {
    pub cors_enabled: bool,
    pub metrics_enabled: bool,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            cors_enabled: true,
            metrics_enabled: true,
        }
    }
}

struct ApiState {
    orchestrator: Arc<Orchestrator>,
    metrics_enabled: bool,
}

type SharedState = Arc<ApiState>;

pub fn router(orchestrator: Arc<Orchestrator>, options: RouterOptions) -> Router {
    let state = Arc::new(ApiState {
        orchestrator,
        metrics_enabled: options.metrics_enabled,
    });

    let mut app = Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/status", get(status_handler))
        .route("/request/:address", get(claim_path_handler))
        .route("/request-tokens", post(claim_body_handler))
        .route("/transfer", post(transfer_handler))
        .route("/approve", post(approve_handler))
        .route("/mint", post(mint_handler))
        .route("/balance/:address", get(balance_handler))
        .route("/allowance/:owner/:spender", get(allowance_handler))
        .route("/request-history", get(history_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if options.cors_enabled {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        app = app.layer(cors);
        info!("CORS enabled");
    }

    app
}

/// Claim request body
#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    pub address: Option<String>,
}

/// Transfer and mint request body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientRequest {
    pub recipient_address: Option<String>,
    #[serde(default)]
    pub amount: Value,
}

/// Approve request body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpenderRequest {
    pub spender_address: Option<String>,
    #[serde(default)]
    pub amount: Value,
}

/// Success response
#[derive(Debug, Serialize)]
pub struct SuccessResponse<T> {
    #[serde(flatten)]
    pub data: T,
    pub timestamp: String,
}

impl<T> SuccessResponse<T> {
    fn new(data: T) -> Json<Self> {
        Json(Self {
            data,
            timestamp: chrono::Utc::now().to_rfc3339(),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub address: Address,
    #[serde(serialize_with = "as_decimal")]
    pub balance: u128,
}

#[derive(Debug, Serialize)]
pub struct AllowanceResponse {
    pub owner: Address,
    pub spender: Address,
    #[serde(serialize_with = "as_decimal")]
    pub allowance: u128,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub count: usize,
    pub records: Vec<ClaimRecord>,
}

/// Runs the orchestration on its own task so a dropped connection cannot
/// abandon a transaction between broadcast and ledger write.
async fn detached<T, F>(work: F) -> GatewayResult<T>
where
    F: Future<Output = GatewayResult<T>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(work).await.map_err(|e| {
        error!("Request task aborted: {}", e);
        GatewayError::Internal(format!("request task aborted: {}", e))
    })?
}

async fn claim(state: SharedState, address: String) -> GatewayResult<Json<SuccessResponse<ClaimReceipt>>> {
    info!("Claim request: address={}", address);
    let receipt = detached(async move { state.orchestrator.claim(&address).await }).await?;
    Ok(SuccessResponse::new(receipt))
}

async fn claim_path_handler(
    State(state): State<SharedState>,
    Path(address): Path<String>,
) -> GatewayResult<Json<SuccessResponse<ClaimReceipt>>> {
    claim(state, address).await
}

async fn claim_body_handler(
    State(state): State<SharedState>,
    payload: Result<Json<ClaimRequest>, JsonRejection>,
) -> GatewayResult<Json<SuccessResponse<ClaimReceipt>>> {
    let Json(request) = payload.map_err(body_error)?;
    let address = required(request.address, "address")?;
    claim(state, address).await
}

async fn execute(
    state: SharedState,
    kind: IntentKind,
    target: Option<String>,
    amount: Value,
) -> GatewayResult<Json<SuccessResponse<TransferReceipt>>> {
    let target = required(target, kind.target_field())?;
    let amount = parse_amount(&amount)?;
    info!(kind = %kind, "Intent request: target={} amount={}", target, amount);

    let receipt = detached(async move { state.orchestrator.execute(kind, &target, amount).await }).await?;
    Ok(SuccessResponse::new(receipt))
}

async fn transfer_handler(
    State(state): State<SharedState>,
    payload: Result<Json<RecipientRequest>, JsonRejection>,
) -> GatewayResult<Json<SuccessResponse<TransferReceipt>>> {
    let Json(request) = payload.map_err(body_error)?;
    execute(state, IntentKind::Transfer, request.recipient_address, request.amount).await
}

async fn approve_handler(
    State(state): State<SharedState>,
    payload: Result<Json<SpenderRequest>, JsonRejection>,
) -> GatewayResult<Json<SuccessResponse<TransferReceipt>>> {
    let Json(request) = payload.map_err(body_error)?;
    execute(state, IntentKind::Approve, request.spender_address, request.amount).await
}

async fn mint_handler(
    State(state): State<SharedState>,
    payload: Result<Json<RecipientRequest>, JsonRejection>,
) -> GatewayResult<Json<SuccessResponse<TransferReceipt>>> {
    let Json(request) = payload.map_err(body_error)?;
    execute(state, IntentKind::Mint, request.recipient_address, request.amount).await
}

async fn balance_handler(
    State(state): State<SharedState>,
    Path(address): Path<String>,
) -> GatewayResult<Json<SuccessResponse<BalanceResponse>>> {
    let balance = state.orchestrator.balance(&address).await?;
    let address = address
        .parse::<Address>()
        .map_err(|e| GatewayError::validation("address", e.to_string()))?;
    Ok(SuccessResponse::new(BalanceResponse { address, balance }))
}

async fn allowance_handler(
    State(state): State<SharedState>,
    Path((owner, spender)): Path<(String, String)>,
) -> GatewayResult<Json<SuccessResponse<AllowanceResponse>>> {
    let allowance = state.orchestrator.allowance(&owner, &spender).await?;
    let owner = owner
        .parse::<Address>()
        .map_err(|e| GatewayError::validation("owner", e.to_string()))?;
    let spender = spender
        .parse::<Address>()
        .map_err(|e| GatewayError::validation("spender", e.to_string()))?;
    Ok(SuccessResponse::new(AllowanceResponse {
        owner,
        spender,
        allowance,
    }))
}

async fn history_handler(State(state): State<SharedState>) -> GatewayResult<Json<SuccessResponse<HistoryResponse>>> {
    let records = state.orchestrator.history()?;
    Ok(SuccessResponse::new(HistoryResponse {
        count: records.len(),
        records,
    }))
}

async fn status_handler(State(state): State<SharedState>) -> GatewayResult<Json<SuccessResponse<FaucetStatus>>> {
    let status = state.orchestrator.status().await?;
    Ok(SuccessResponse::new(status))
}

async fn metrics_handler(State(state): State<SharedState>) -> impl IntoResponse {
    if !state.metrics_enabled {
        return (StatusCode::NOT_FOUND, "metrics disabled".to_string()).into_response();
    }

    match state.orchestrator.metrics().render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to render metrics: {}", e);
            GatewayError::Internal(e.to_string()).into_response()
        }
    }
}

/// Health check handler
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Root handler with info
async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": "Tokengate",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Token faucet and transfer gateway",
        "endpoints": {
            "GET /request/{address}": "Claim faucet tokens",
            "POST /request-tokens": "Claim faucet tokens",
            "POST /transfer": "Transfer tokens from the gateway account",
            "POST /approve": "Approve a spender",
            "POST /mint": "Mint tokens",
            "GET /balance/{address}": "Token balance",
            "GET /allowance/{owner}/{spender}": "Token allowance",
            "GET /request-history": "Faucet claim ledger",
            "GET /api/status": "Gateway status",
            "GET /health": "Health check",
            "GET /metrics": "Prometheus metrics"
        }
    }))
}

fn body_error(rejection: JsonRejection) -> GatewayError {
    GatewayError::validation("body", rejection.body_text())
}

fn required(value: Option<String>, field: &'static str) -> GatewayResult<String> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(GatewayError::validation(field, "is required")),
    }
}

/// Accepts a non-negative JSON integer or a decimal string.
pub fn parse_amount(value: &Value) -> GatewayResult<u128> {
    match value {
        Value::Null => Err(GatewayError::validation("amount", "is required")),
        Value::Number(number) => number.as_u64().map(u128::from).ok_or_else(|| {
            GatewayError::validation(
                "amount",
                format!("{} is not a non-negative integer; large amounts must be decimal strings", number),
            )
        }),
        Value::String(text) => {
            let digits = text.trim();
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(GatewayError::validation(
                    "amount",
                    format!("{:?} is not a decimal integer", text),
                ));
            }
            digits
                .parse::<u128>()
                .map_err(|_| GatewayError::validation("amount", format!("{} exceeds the maximum amount", digits)))
        }
        other => Err(GatewayError::validation(
            "amount",
            format!("expected a number or decimal string, got {}", other),
        )),
    }
}
