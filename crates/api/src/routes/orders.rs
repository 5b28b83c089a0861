//! Checkout and order endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::OrderId;
use domain::StockAdjustment;
use fulfillment::{CheckoutRequest, OrderWithItems};
use serde::{Deserialize, Serialize};
use store::{OrderLineRecord, OrderRecord, Store};

use crate::AppState;
use crate::auth::AuthUser;
use crate::error::ApiError;

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct CheckoutBody {
    pub payment_method: String,
    #[serde(default)]
    pub payment_reference: String,
}

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    pub status: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct OrderQuery {
    #[serde(default)]
    pub with_items: bool,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub order_id: String,
    pub status: &'static str,
    pub total_amount_cents: i64,
    pub payment_method: &'static str,
    pub payment_reference: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<OrderItemResponse>>,
}

impl OrderResponse {
    fn from_record(order: OrderRecord, items: Option<Vec<OrderLineRecord>>) -> Self {
        Self {
            order_id: order.id.to_string(),
            status: order.status.as_str(),
            total_amount_cents: order.total_amount.cents(),
            payment_method: order.payment_method.as_str(),
            payment_reference: order.payment_reference,
            created_at: order.created_at,
            items: items.map(|lines| lines.into_iter().map(OrderItemResponse::from).collect()),
        }
    }
}

impl From<OrderWithItems> for OrderResponse {
    fn from(value: OrderWithItems) -> Self {
        Self::from_record(value.order, Some(value.items))
    }
}

#[derive(Serialize)]
pub struct OrderItemResponse {
    pub product_id: i64,
    pub quantity: u32,
    pub unit_price_cents: i64,
    pub subtotal_cents: Option<i64>,
}

impl From<OrderLineRecord> for OrderItemResponse {
    fn from(line: OrderLineRecord) -> Self {
        Self {
            product_id: line.product_id.as_i64(),
            quantity: line.quantity,
            unit_price_cents: line.unit_price.cents(),
            subtotal_cents: line.subtotal().map(|subtotal| subtotal.cents()),
        }
    }
}

#[derive(Serialize)]
pub struct StockLevelResponse {
    pub product_id: i64,
    pub stock_quantity: i64,
    pub version: i64,
}

impl From<StockAdjustment> for StockLevelResponse {
    fn from(adjustment: StockAdjustment) -> Self {
        Self {
            product_id: adjustment.product_id.as_i64(),
            stock_quantity: adjustment.new_stock,
            version: adjustment.new_version.as_i64(),
        }
    }
}

#[derive(Serialize)]
pub struct CheckoutResponse {
    #[serde(flatten)]
    pub order: OrderResponse,
    pub attempts: u32,
    pub stock_levels: Vec<StockLevelResponse>,
}

// -- Handlers --

/// POST /orders: checks out the user's cart.
#[tracing::instrument(skip(state, body))]
pub async fn checkout<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user_id): AuthUser,
    body: Result<Json<CheckoutBody>, JsonRejection>,
) -> Result<(StatusCode, Json<CheckoutResponse>), ApiError> {
    let Json(body) = body?;
    let request = CheckoutRequest::new(body.payment_method, body.payment_reference);
    let receipt = state.checkout.checkout(user_id, &request).await?;

    let response = CheckoutResponse {
        order: OrderResponse::from_record(receipt.order, Some(receipt.lines)),
        attempts: receipt.attempts,
        stock_levels: receipt
            .stock_levels
            .into_iter()
            .map(StockLevelResponse::from)
            .collect(),
    };
    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /orders: lists the user's orders, newest first.
#[tracing::instrument(skip(state))]
pub async fn list<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user_id): AuthUser,
    query: Result<Query<OrderQuery>, QueryRejection>,
) -> Result<Json<Vec<OrderResponse>>, ApiError> {
    let Query(query) = query?;
    let responses: Vec<OrderResponse> = if query.with_items {
        state
            .orders
            .orders_with_items(user_id)
            .await?
            .into_iter()
            .map(OrderResponse::from)
            .collect()
    } else {
        state
            .orders
            .orders_for_user(user_id)
            .await?
            .into_iter()
            .map(|order| OrderResponse::from_record(order, None))
            .collect()
    };
    Ok(Json(responses))
}

/// GET /orders/{id}
#[tracing::instrument(skip(state))]
pub async fn get<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
    query: Result<Query<OrderQuery>, QueryRejection>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let Query(query) = query?;
    let response: OrderResponse = if query.with_items {
        state
            .orders
            .get_order_with_items(user_id, order_id)
            .await?
            .into()
    } else {
        OrderResponse::from_record(state.orders.get_order(user_id, order_id).await?, None)
    };
    Ok(Json(response))
}

/// PATCH /orders/{id}/status
#[tracing::instrument(skip(state, body))]
pub async fn update_status<S: Store + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
    body: Result<Json<StatusBody>, JsonRejection>,
) -> Result<Json<OrderResponse>, ApiError> {
    let Json(body) = body?;
    let order_id = parse_order_id(&id)?;
    let order = state
        .orders
        .update_status(user_id, order_id, &body.status)
        .await?;
    Ok(Json(OrderResponse::from_record(order, None)))
}

fn parse_order_id(raw: &str) -> Result<OrderId, ApiError> {
    uuid::Uuid::parse_str(raw)
        .map(OrderId::from_uuid)
        .map_err(|e| ApiError::BadRequest(format!("invalid order id {raw:?}: {e}")))
}
