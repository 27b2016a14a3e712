use uuid::Uuid;

/// Published by the payments service once a charge has been captured.
///
/// Delivery is at-least-once: consumers must tolerate seeing the same
/// `(order_id, payment_charge_id)` pair more than once.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct PaymentSucceededEvent {
    pub order_id: Uuid,
    pub payment_charge_id: String,
    pub receipt_url: crate::redact::Redacted<String>,
}

/// Envelope for a message the payment-completion worker gave up on.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct DeadLetterEvent {
    pub source_topic: String,
    pub key: Option<String>,
    pub payload: String,
    pub reason: String,
    pub attempts: u32,
    pub failed_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_succeeded_wire_format() {
        let order_id = Uuid::new_v4();
        let raw = serde_json::json!({
            "order_id": order_id,
            "payment_charge_id": "ch_1",
            "receipt_url": "http://r",
        });

        let event: PaymentSucceededEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(event.order_id, order_id);
        assert_eq!(event.payment_charge_id, "ch_1");
        assert_eq!(event.receipt_url.expose(), "http://r");

        // Receipt links are bearer URLs, keep them out of debug logs.
        assert!(!format!("{:?}", event).contains("http://r"));
    }
}
