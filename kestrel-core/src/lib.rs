pub mod models;
pub mod events;
pub mod catalog;
pub mod payment;
pub mod repository;

pub use models::{
    NewOrder, Order, OrderItem, OrderLine, OrderReceipt, OrderStatus, ProductId, TotalsOverflow,
};

use serde::{Deserialize, Serialize};

/// Failure taxonomy surfaced by every order operation.
///
/// The message is meant for the caller. Internal causes are logged where the
/// error is classified and never carried verbatim into a `ServerFault`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    #[error("{0}")]
    ClientFault(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    ServerFault(String),
}

impl OrderError {
    pub fn order_not_found(id: uuid::Uuid) -> Self {
        Self::NotFound(format!("Order with id {} not found", id))
    }

    /// HTTP-style status code for the failure kind.
    pub fn status(&self) -> u16 {
        match self {
            Self::ClientFault(_) => 400,
            Self::NotFound(_) => 404,
            Self::ServerFault(_) => 500,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ServerFault(_))
    }
}

pub type OrderResult<T> = Result<T, OrderError>;

/// Machine-readable error body returned to request/response callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    pub status: u16,
    pub message: String,
}

impl From<&OrderError> for RpcError {
    fn from(err: &OrderError) -> Self {
        Self {
            status: err.status(),
            message: err.to_string(),
        }
    }
}
