//! HTTP surface of `a2a-node`.

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::error;

use crate::address::Address;
use crate::database::LedgerStore;
use crate::error::{MarketError, ProtocolError};
use crate::instruction::Transaction;
use crate::ledger::{AccountFilter, AccountLookup, KeyedAccount, Ledger, Receipt};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramAccountsRequest {
    #[serde(default)]
    pub filters: Vec<AccountFilter>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AirdropRequest {
    pub address: Address,
    pub lamports: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub address: Address,
    pub lamports: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotResponse {
    pub slot: u64,
}

/// Error payload. `error` is set when the failure is a protocol rejection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: Option<ProtocolError>,
    pub message: String,
}

#[derive(Clone)]
pub struct AppState {
    ledger: Arc<Ledger>,
    store: Option<LedgerStore>,
    persist_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(ledger: Arc<Ledger>, store: Option<LedgerStore>) -> Self {
        Self {
            ledger,
            store,
            persist_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Write the current ledger state through to the store, if any.
    /// Snapshots are taken under the lock so a later commit is never
    /// overwritten by an earlier one. Runs after the ledger has committed,
    /// so a failed write is logged and the commit still stands.
    async fn persist(&self) {
        if let Some(store) = &self.store {
            let _guard = self.persist_lock.lock().await;
            if let Err(e) = store.save_snapshot(&self.ledger.snapshot()).await {
                error!(
                    slot = self.ledger.current_slot(),
                    "Failed to persist ledger snapshot: {}", e
                );
            }
        }
    }
}

pub struct ApiError(MarketError);

impl<E: Into<MarketError>> From<E> for ApiError {
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

pub fn protocol_status(err: &ProtocolError) -> StatusCode {
    match err {
        ProtocolError::NotFound { .. } => StatusCode::NOT_FOUND,
        ProtocolError::AddressCollision { .. } | ProtocolError::DuplicateTransaction { .. } => {
            StatusCode::CONFLICT
        }
        ProtocolError::Unauthorized { .. }
        | ProtocolError::InvalidSignature
        | ProtocolError::IllegalOwner { .. } => StatusCode::FORBIDDEN,
        ProtocolError::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
        ProtocolError::InvalidState { .. }
        | ProtocolError::ServiceTypeTooLong { .. }
        | ProtocolError::EndpointTooLong { .. }
        | ProtocolError::InvalidPrice
        | ProtocolError::InvalidAmount => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::BAD_REQUEST,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match &self.0 {
            MarketError::Protocol(err) => (protocol_status(err), Some(err.clone())),
            MarketError::Validation(_) | MarketError::Serialization(_) => {
                (StatusCode::BAD_REQUEST, None)
            }
            other => {
                error!("Request failed: {}", other);
                (StatusCode::INTERNAL_SERVER_ERROR, None)
            }
        };
        let body = ErrorBody {
            error,
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/transactions", post(submit_transaction))
        .route("/accounts/:address", get(get_account))
        .route("/programs/:program/accounts", post(program_accounts))
        .route("/balances/:address", get(get_balance))
        .route("/slot", get(get_slot))
        .route("/airdrop", post(airdrop))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn submit_transaction(
    State(state): State<AppState>,
    Json(tx): Json<Transaction>,
) -> Result<Json<Receipt>, ApiError> {
    let receipt = state.ledger.submit(&tx)?;
    state.persist().await;
    Ok(Json(receipt))
}

async fn get_account(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<AccountLookup>, ApiError> {
    let address = Address::from_str(&address)?;
    Ok(Json(state.ledger.lookup(&address)))
}

async fn program_accounts(
    State(state): State<AppState>,
    Path(program): Path<String>,
    Json(request): Json<ProgramAccountsRequest>,
) -> Result<Json<Vec<KeyedAccount>>, ApiError> {
    let program = Address::from_str(&program)?;
    Ok(Json(state.ledger.program_accounts(&program, &request.filters)))
}

async fn get_balance(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let address = Address::from_str(&address)?;
    Ok(Json(BalanceResponse {
        address,
        lamports: state.ledger.balance(&address),
    }))
}

async fn get_slot(State(state): State<AppState>) -> Json<SlotResponse> {
    Json(SlotResponse {
        slot: state.ledger.current_slot(),
    })
}

async fn airdrop(
    State(state): State<AppState>,
    Json(request): Json<AirdropRequest>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let lamports = state.ledger.airdrop(&request.address, request.lamports)?;
    state.persist().await;
    Ok(Json(BalanceResponse {
        address: request.address,
        lamports,
    }))
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "a2a-node",
        "slot": state.ledger.current_slot(),
    }))
}
