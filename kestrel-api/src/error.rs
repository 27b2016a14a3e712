use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    extract::FromRequest,
    extract::FromRequestParts,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use kestrel_core::{OrderError, RpcError};

#[derive(Debug)]
pub enum AppError {
    Order(OrderError),
    BadRequest(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Order(OrderError::ServerFault(msg)) => {
                tracing::error!(status = 500, error = %msg, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
            }
            AppError::Order(err) => {
                let status = StatusCode::from_u16(err.status()).unwrap_or(StatusCode::BAD_REQUEST);
                (status, err.to_string())
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };

        let body = Json(RpcError {
            status: status.as_u16(),
            message,
        });

        (status, body).into_response()
    }
}

impl From<OrderError> for AppError {
    fn from(err: OrderError) -> Self {
        Self::Order(err)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

/// `Json` whose rejections render as [`AppError`].
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);

/// `Path` whose rejections render as [`AppError`].
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(AppError))]
pub struct AppPath<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AppError))]
pub struct AppQuery<T>(pub T);
