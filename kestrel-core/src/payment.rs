use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentMetadata {
    pub order_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentLineItem {
    pub name: String,
    /// Unit price in minor currency units (cents).
    pub unit_amount: i64,
    pub quantity: u32,
}

/// Request sent to the payment gateway to open a checkout session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentSessionRequest {
    pub metadata: PaymentMetadata,
    pub line_items: Vec<PaymentLineItem>,
    pub currency: String,
}

/// Gateway-defined session object, passed through to the caller untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct PaymentSession(pub serde_json::Value);

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Payment gateway rejected session: {0}")]
    Rejected(String),

    #[error("Payment gateway unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed payment gateway response: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Open a payment session for an order.
    async fn create_session(
        &self,
        request: &PaymentSessionRequest,
    ) -> Result<PaymentSession, GatewayError>;
}

/// Convert a decimal amount into minor units, rounding half away from zero.
pub fn to_minor_units(amount: Decimal) -> Option<i64> {
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, rust_decimal::RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_minor_units() {
        assert_eq!(to_minor_units(dec!(5.00)), Some(500));
        assert_eq!(to_minor_units(dec!(19.99)), Some(1999));
        assert_eq!(to_minor_units(dec!(0.005)), Some(1));
        assert_eq!(to_minor_units(dec!(0)), Some(0));
    }

    #[test]
    fn test_session_is_passed_through_verbatim() {
        let raw = serde_json::json!({"url": "https://checkout/s/1", "id": "cs_1"});
        let session: PaymentSession = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(serde_json::to_value(&session).unwrap(), raw);
    }
}
