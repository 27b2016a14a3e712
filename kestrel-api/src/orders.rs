use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;
use kestrel_core::payment::PaymentSession;
use kestrel_core::{Order, OrderLine, OrderStatus};
use kestrel_order::{PageQuery, Paginated, PlacedOrder};
use crate::error::{AppError, AppJson, AppPath, AppQuery};
use crate::state::AppState;

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub items: Vec<OrderLine>,
}

#[derive(Debug, Deserialize)]
pub struct ChangeStatusRequest {
    pub status: OrderStatus,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/orders", post(create_order).get(list_orders))
        .route("/v1/orders/{id}", get(get_order))
        .route("/v1/orders/{id}/status", patch(change_status))
        .route("/v1/orders/{id}/payment-session", post(renew_payment_session))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /v1/orders
/// Price the items against the catalog, store the order and open a payment session
pub async fn create_order(
    State(state): State<AppState>,
    AppJson(req): AppJson<CreateOrderRequest>,
) -> Result<(StatusCode, Json<PlacedOrder>), AppError> {
    let placed = state.orchestrator.place_order(req.items).await?;
    Ok((StatusCode::CREATED, Json(placed)))
}

/// GET /v1/orders?page&limit&status
pub async fn list_orders(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<PageQuery>,
) -> Result<Json<Paginated<Order>>, AppError> {
    Ok(Json(state.orchestrator.find_all(query).await?))
}

/// GET /v1/orders/{id}
pub async fn get_order(
    State(state): State<AppState>,
    AppPath(order_id): AppPath<Uuid>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.orchestrator.find_one(order_id).await?))
}

/// PATCH /v1/orders/{id}/status
pub async fn change_status(
    State(state): State<AppState>,
    AppPath(order_id): AppPath<Uuid>,
    AppJson(req): AppJson<ChangeStatusRequest>,
) -> Result<Json<Order>, AppError> {
    let order = state
        .orchestrator
        .change_order_status(order_id, req.status)
        .await?;
    Ok(Json(order))
}

/// POST /v1/orders/{id}/payment-session
/// Open a fresh session for an order whose first session could not be created
pub async fn renew_payment_session(
    State(state): State<AppState>,
    AppPath(order_id): AppPath<Uuid>,
) -> Result<Json<PaymentSession>, AppError> {
    Ok(Json(state.orchestrator.renew_payment_session(order_id).await?))
}
