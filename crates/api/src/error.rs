//! API error types with HTTP response mapping.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::{DomainError, ErrorKind};
use fulfillment::FulfillmentError;
use serde_json::{Value, json};

/// API-level error type that maps to HTTP responses.
///
/// The body is always `{ "error_kind", "message", "details" }`.
#[derive(Debug)]
pub enum ApiError {
    /// No trusted user id on the request.
    Unauthorized(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Domain logic error.
    Domain(DomainError),
    /// Checkout or order management error.
    Fulfillment(FulfillmentError),
}

/// Returns the HTTP status for an error kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Validation | ErrorKind::InsufficientStock => StatusCode::BAD_REQUEST,
        ErrorKind::Conflict | ErrorKind::InvalidTransition => StatusCode::CONFLICT,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_kind, message, details) = match self {
            ApiError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, "unauthorized", msg, Value::Null)
            }
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorKind::Validation.as_str(),
                msg,
                Value::Null,
            ),
            ApiError::Domain(err) => kind_to_parts(err.kind(), &err, domain_details(&err)),
            ApiError::Fulfillment(err) => {
                kind_to_parts(err.kind(), &err, fulfillment_details(&err))
            }
        };

        let body = json!({
            "error_kind": error_kind,
            "message": message,
            "details": details,
        });
        (status, axum::Json(body)).into_response()
    }
}

fn kind_to_parts(
    kind: ErrorKind,
    err: &dyn std::error::Error,
    details: Value,
) -> (StatusCode, &'static str, String, Value) {
    if kind == ErrorKind::Internal {
        tracing::error!(error = %err, "internal server error");
        return (
            status_for(kind),
            kind.as_str(),
            "internal server error".to_string(),
            Value::Null,
        );
    }
    (status_for(kind), kind.as_str(), err.to_string(), details)
}

fn domain_details(err: &DomainError) -> Value {
    match err {
        DomainError::NotFound { entity, id } => json!({ "entity": entity, "id": id }),
        DomainError::Validation { field, .. } => json!({ "field": field }),
        DomainError::InsufficientStock {
            product_id,
            available,
            requested,
        } => json!({
            "product_id": product_id,
            "available": available,
            "requested": requested,
        }),
        DomainError::Conflict {
            product_id,
            expected,
        } => json!({ "product_id": product_id, "expected_version": expected }),
        DomainError::Store(_) => Value::Null,
    }
}

fn fulfillment_details(err: &FulfillmentError) -> Value {
    match err {
        FulfillmentError::Domain(inner) => domain_details(inner),
        FulfillmentError::OrderNotFound(order_id) => {
            json!({ "entity": "order", "id": order_id.to_string() })
        }
        FulfillmentError::Forbidden { order_id, .. } => {
            json!({ "order_id": order_id.to_string() })
        }
        FulfillmentError::InvalidTransition { from, to } => json!({ "from": from, "to": to }),
        FulfillmentError::RetriesExhausted { attempts, .. } => json!({ "attempts": attempts }),
        FulfillmentError::Store(_) => Value::Null,
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Domain(err)
    }
}

impl From<FulfillmentError> for ApiError {
    fn from(err: FulfillmentError) -> Self {
        ApiError::Fulfillment(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ProductId;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(ErrorKind::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_for(ErrorKind::Validation), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(ErrorKind::InsufficientStock),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_for(ErrorKind::Conflict), StatusCode::CONFLICT);
        assert_eq!(
            status_for(ErrorKind::InvalidTransition),
            StatusCode::CONFLICT
        );
        assert_eq!(status_for(ErrorKind::Forbidden), StatusCode::FORBIDDEN);
        assert_eq!(
            status_for(ErrorKind::Internal),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_insufficient_stock_response() {
        let err = ApiError::from(DomainError::InsufficientStock {
            product_id: ProductId::new(4),
            available: 0,
            requested: 1,
        });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_unauthorized_response() {
        let response = ApiError::Unauthorized("missing x-user-id".into()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
