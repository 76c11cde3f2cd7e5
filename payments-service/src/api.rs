use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use bigdecimal::BigDecimal;
use diesel_async::{pooled_connection::bb8::Pool, AsyncPgConnection};
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::handlers;
use crate::models::Account;

type DbPool = Pool<AsyncPgConnection>;

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
}

#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct DepositRequest {
    pub user_id: Uuid,
    pub amount: BigDecimal,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub user_id: Uuid,
    pub balance: BigDecimal,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_response(status: StatusCode, message: &str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
}

fn internal(e: impl std::fmt::Display) -> ApiError {
    tracing::error!("request failed: {e}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/accounts", post(create_account))
        .route("/accounts/deposit", post(deposit))
        .route("/accounts/:user_id", get(get_balance))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

pub async fn create_account(
    State(state): State<AppState>,
    Json(request): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<Account>), ApiError> {
    let mut conn = state.pool.get().await.map_err(internal)?;
    match handlers::create_account(&mut conn, request.user_id)
        .await
        .map_err(internal)?
    {
        Some(account) => {
            tracing::info!(account_id = account.id, "created account");
            Ok((StatusCode::CREATED, Json(account)))
        }
        None => Err(error_response(
            StatusCode::CONFLICT,
            "Account already exists",
        )),
    }
}

pub async fn deposit(
    State(state): State<AppState>,
    Json(request): Json<DepositRequest>,
) -> Result<Json<BalanceResponse>, ApiError> {
    if request.amount <= BigDecimal::zero() {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "Amount must be positive",
        ));
    }

    let mut conn = state.pool.get().await.map_err(internal)?;
    match handlers::deposit(&mut conn, request.user_id, request.amount)
        .await
        .map_err(internal)?
    {
        Some(account) => Ok(Json(BalanceResponse {
            user_id: account.user_id,
            balance: account.balance,
        })),
        None => Err(error_response(StatusCode::NOT_FOUND, "Account not found")),
    }
}

pub async fn get_balance(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let mut conn = state.pool.get().await.map_err(internal)?;
    match handlers::get_account(&mut conn, user_id)
        .await
        .map_err(internal)?
    {
        Some(account) => Ok(Json(BalanceResponse {
            user_id: account.user_id,
            balance: account.balance,
        })),
        None => Err(error_response(StatusCode::NOT_FOUND, "Account not found")),
    }
}

pub async fn health_check() -> &'static str {
    "OK"
}
