//! Cart endpoints. Every route acts on the authenticated user's cart.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::ProductId;
use serde::{Deserialize, Serialize};
use store::{CartLineRecord, Store};

use crate::AppState;
use crate::auth::AuthUser;
use crate::error::ApiError;

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct AddItemParams {
    /// Units to add; defaults to one.
    pub quantity: Option<u32>,
}

// -- Response types --

#[derive(Serialize)]
pub struct CartResponse {
    pub cart_id: String,
}

#[derive(Serialize)]
pub struct CartLineResponse {
    pub product_id: i64,
    pub quantity: u32,
    pub unit_price_cents: i64,
    pub subtotal_cents: Option<i64>,
    pub product_title: String,
    pub product_image: Option<String>,
    pub added_at: DateTime<Utc>,
}

impl From<CartLineRecord> for CartLineResponse {
    fn from(line: CartLineRecord) -> Self {
        Self {
            product_id: line.product_id.as_i64(),
            quantity: line.quantity,
            unit_price_cents: line.unit_price.cents(),
            subtotal_cents: line.subtotal().map(|subtotal| subtotal.cents()),
            product_title: line.product_title,
            product_image: line.product_image,
            added_at: line.added_at,
        }
    }
}

#[derive(Serialize)]
pub struct RemovedUnitResponse {
    pub product_id: i64,
    /// Zero once the line has been deleted.
    pub remaining_quantity: u32,
}

#[derive(Serialize)]
pub struct CartTotalResponse {
    pub total_cents: i64,
}

// -- Handlers --

/// POST /cart: returns the user's cart, creating it if needed.
#[tracing::instrument(skip(state))]
pub async fn ensure<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<CartResponse>, ApiError> {
    let cart_id = state.carts.ensure_cart(user_id).await?;
    Ok(Json(CartResponse {
        cart_id: cart_id.to_string(),
    }))
}

/// GET /cart/items
#[tracing::instrument(skip(state))]
pub async fn lines<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Vec<CartLineResponse>>, ApiError> {
    let lines = state.carts.lines(user_id).await?;
    Ok(Json(lines.into_iter().map(CartLineResponse::from).collect()))
}

/// POST /cart/items/{product_id}: adds units, pricing a new line at the
/// current effective price.
#[tracing::instrument(skip(state))]
pub async fn add_item<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user_id): AuthUser,
    Path(product_id): Path<String>,
    params: Result<Query<AddItemParams>, QueryRejection>,
) -> Result<(StatusCode, Json<CartLineResponse>), ApiError> {
    let product_id = parse_product_id(&product_id)?;
    let Query(params) = params?;
    let line = state
        .carts
        .add_item(user_id, product_id, params.quantity.unwrap_or(1))
        .await?;
    Ok((StatusCode::CREATED, Json(line.into())))
}

/// DELETE /cart/items/{product_id}: removes a single unit.
#[tracing::instrument(skip(state))]
pub async fn remove_one_unit<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user_id): AuthUser,
    Path(product_id): Path<String>,
) -> Result<Json<RemovedUnitResponse>, ApiError> {
    let product_id = parse_product_id(&product_id)?;
    let remaining = state.carts.remove_one_unit(user_id, product_id).await?;
    Ok(Json(RemovedUnitResponse {
        product_id: product_id.as_i64(),
        remaining_quantity: remaining.map_or(0, |line| line.quantity),
    }))
}

/// DELETE /cart/items/{product_id}/remove: removes the whole line.
#[tracing::instrument(skip(state))]
pub async fn remove_line<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user_id): AuthUser,
    Path(product_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let product_id = parse_product_id(&product_id)?;
    state.carts.remove_line(user_id, product_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /cart/total
#[tracing::instrument(skip(state))]
pub async fn total<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<CartTotalResponse>, ApiError> {
    let total = state.carts.total(user_id).await?;
    Ok(Json(CartTotalResponse {
        total_cents: total.cents(),
    }))
}

/// DELETE /cart
#[tracing::instrument(skip(state))]
pub async fn clear<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user_id): AuthUser,
) -> Result<StatusCode, ApiError> {
    state.carts.clear(user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn parse_product_id(raw: &str) -> Result<ProductId, ApiError> {
    raw.parse::<i64>()
        .map(ProductId::new)
        .map_err(|e| ApiError::BadRequest(format!("invalid product id {raw:?}: {e}")))
}
