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
use crate::models::Order;

type DbPool = Pool<AsyncPgConnection>;

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub user_id: Uuid,
    pub amount: BigDecimal,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn bad_request(message: &str) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
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
        .route("/orders", post(create_order).get(list_orders))
        .route("/orders/:id", get(get_order))
        .route("/users/:user_id/orders", get(user_orders))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

pub async fn create_order(
    State(state): State<AppState>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    if request.amount <= BigDecimal::zero() {
        return Err(bad_request("Amount must be positive"));
    }

    let mut conn = state.pool.get().await.map_err(internal)?;
    let order = handlers::create_order(&mut conn, request.user_id, request.amount)
        .await
        .map_err(internal)?;

    tracing::info!(order_id = order.id, "created order");
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<Order>, ApiError> {
    let mut conn = state.pool.get().await.map_err(internal)?;
    match handlers::get_order(&mut conn, id).await.map_err(internal)? {
        Some(order) => Ok(Json(order)),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "Order not found".to_string(),
            }),
        )),
    }
}

pub async fn list_orders(State(state): State<AppState>) -> Result<Json<Vec<Order>>, ApiError> {
    let mut conn = state.pool.get().await.map_err(internal)?;
    let orders = handlers::all_orders(&mut conn).await.map_err(internal)?;
    Ok(Json(orders))
}

pub async fn user_orders(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<Order>>, ApiError> {
    let mut conn = state.pool.get().await.map_err(internal)?;
    let orders = handlers::orders_for_user(&mut conn, user_id)
        .await
        .map_err(internal)?;
    Ok(Json(orders))
}

pub async fn health_check() -> &'static str {
    "OK"
}
