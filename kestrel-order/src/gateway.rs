use async_trait::async_trait;
use std::time::Duration;
use kestrel_core::payment::{GatewayError, PaymentGateway, PaymentSession, PaymentSessionRequest};

/// Payment gateway client speaking JSON over HTTP.
///
/// `POST {base_url}/payments/sessions`; whatever JSON comes back is the session.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    http: reqwest::Client,
    sessions_url: String,
}

impl HttpPaymentGateway {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            sessions_url: format!("{}/payments/sessions", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn create_session(
        &self,
        request: &PaymentSessionRequest,
    ) -> Result<PaymentSession, GatewayError> {
        let response = self
            .http
            .post(&self.sessions_url)
            .json(request)
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected(format!("{}: {}", status, body)));
        }
        if !status.is_success() {
            return Err(GatewayError::Unavailable(format!("gateway answered {}", status)));
        }

        response
            .json::<serde_json::Value>()
            .await
            .map(PaymentSession)
            .map_err(|e| GatewayError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use kestrel_core::payment::{PaymentLineItem, PaymentMetadata};
    use uuid::Uuid;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn request(order_id: Uuid) -> PaymentSessionRequest {
        PaymentSessionRequest {
            metadata: PaymentMetadata { order_id },
            line_items: vec![PaymentLineItem {
                name: "Widget".to_string(),
                unit_amount: 500,
                quantity: 2,
            }],
            currency: "usd".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_session_posts_line_items() {
        let router = Router::new().route(
            "/payments/sessions",
            post(|Json(body): Json<serde_json::Value>| async move {
                Json(serde_json::json!({
                    "url": "https://checkout.example/s/1",
                    "echo": body,
                }))
            }),
        );
        let base = serve(router).await;
        let gateway = HttpPaymentGateway::new(&base, Duration::from_secs(2)).unwrap();

        let order_id = Uuid::new_v4();
        let session = gateway.create_session(&request(order_id)).await.unwrap();

        assert_eq!(session.0["url"], "https://checkout.example/s/1");
        assert_eq!(session.0["echo"]["metadata"]["order_id"], order_id.to_string());
        assert_eq!(session.0["echo"]["line_items"][0]["unit_amount"], 500);
        assert_eq!(session.0["echo"]["line_items"][0]["quantity"], 2);
    }

    #[tokio::test]
    async fn test_gateway_failures_are_classified() {
        let router = Router::new()
            .route("/bad/payments/sessions", post(|| async { StatusCode::UNPROCESSABLE_ENTITY }))
            .route("/down/payments/sessions", post(|| async { StatusCode::BAD_GATEWAY }));
        let base = serve(router).await;

        let bad = HttpPaymentGateway::new(&format!("{}/bad", base), Duration::from_secs(2)).unwrap();
        let err = bad.create_session(&request(Uuid::new_v4())).await.unwrap_err();
        assert!(matches!(err, GatewayError::Rejected(_)));

        let down = HttpPaymentGateway::new(&format!("{}/down", base), Duration::from_secs(2)).unwrap();
        let err = down.create_session(&request(Uuid::new_v4())).await.unwrap_err();
        assert!(matches!(err, GatewayError::Unavailable(_)));
    }
}
