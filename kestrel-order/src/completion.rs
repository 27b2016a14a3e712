use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use kestrel_core::events::DeadLetterSink;
use kestrel_core::OrderError;
use kestrel_shared::{DeadLetterEvent, PaymentSucceededEvent};
use crate::orchestrator::{OrderOrchestrator, PaymentApplied};

/// Retry settings for payment-succeeded notifications.
#[derive(Debug, Clone)]
pub struct CompletionPolicy {
    /// Attempts including the first one. Zero is treated as one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for CompletionPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl CompletionPolicy {
    /// Exponential delay before retry number `attempt` (1-based), plus up to
    /// 50% random jitter, capped at `max_backoff`.
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self
            .initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
            .min(self.max_backoff);
        let jitter_ms = rand::thread_rng().gen_range(0..=base.as_millis() as u64 / 2);
        (base + Duration::from_millis(jitter_ms)).min(self.max_backoff)
    }
}

/// What the handler did with one message.
///
/// Every variant except `Unacknowledged` means the message is done and its
/// offset may be committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Applied,
    Duplicate,
    /// The order does not exist. Logged and skipped.
    Dropped,
    DeadLettered,
    /// The message had to be dead-lettered but the publish failed. It must be
    /// handled again before its offset is committed.
    Unacknowledged,
}

impl Disposition {
    pub fn is_acknowledged(&self) -> bool {
        !matches!(self, Self::Unacknowledged)
    }
}

/// Applies payment-succeeded notifications to orders.
///
/// Transient failures are retried with backoff. Messages that can never
/// succeed, or that keep failing, are handed to the dead-letter sink so the
/// consumer can move on.
pub struct PaymentCompletionHandler {
    orchestrator: Arc<OrderOrchestrator>,
    dead_letters: Arc<dyn DeadLetterSink>,
    policy: CompletionPolicy,
    source_topic: String,
}

impl PaymentCompletionHandler {
    pub fn new(
        orchestrator: Arc<OrderOrchestrator>,
        dead_letters: Arc<dyn DeadLetterSink>,
        policy: CompletionPolicy,
        source_topic: impl Into<String>,
    ) -> Self {
        Self {
            orchestrator,
            dead_letters,
            policy,
            source_topic: source_topic.into(),
        }
    }

    pub fn source_topic(&self) -> &str {
        &self.source_topic
    }

    /// Handle one raw message. Never fails: every outcome ends in a
    /// [`Disposition`]. Only an acknowledged disposition lets the caller
    /// commit the message.
    pub async fn handle(&self, key: Option<&str>, payload: &[u8]) -> Disposition {
        let event: PaymentSucceededEvent = match serde_json::from_slice(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(topic = %self.source_topic, error = %e, "Malformed payment notification");
                return self
                    .dead_letter(key, payload, format!("Malformed payload: {}", e), 0)
                    .await;
            }
        };

        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.orchestrator.mark_order_as_paid(event.clone()).await {
                Ok(PaymentApplied::Applied(_)) => return Disposition::Applied,
                Ok(PaymentApplied::Duplicate(_)) => return Disposition::Duplicate,
                Err(OrderError::NotFound(msg)) => {
                    warn!(order_id = %event.order_id, reason = %msg, "Dropping payment notification");
                    return Disposition::Dropped;
                }
                Err(err @ OrderError::ClientFault(_)) => {
                    return self.dead_letter(key, payload, err.to_string(), attempt).await;
                }
                Err(err @ OrderError::ServerFault(_)) => {
                    if attempt >= max_attempts {
                        error!(
                            order_id = %event.order_id,
                            attempts = attempt,
                            error = %err,
                            "Giving up on payment notification"
                        );
                        return self.dead_letter(key, payload, err.to_string(), attempt).await;
                    }
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        order_id = %event.order_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying payment notification"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn dead_letter(
        &self,
        key: Option<&str>,
        payload: &[u8],
        reason: String,
        attempts: u32,
    ) -> Disposition {
        let event = DeadLetterEvent {
            source_topic: self.source_topic.clone(),
            key: key.map(str::to_string),
            payload: String::from_utf8_lossy(payload).into_owned(),
            reason,
            attempts,
            failed_at: chrono::Utc::now().timestamp(),
        };

        match self.dead_letters.dead_letter(&event).await {
            Ok(()) => {
                info!(topic = %self.source_topic, attempts, reason = %event.reason, "Payment notification dead-lettered");
                Disposition::DeadLettered
            }
            Err(e) => {
                error!(topic = %self.source_topic, error = %e, "Failed to dead-letter payment notification");
                Disposition::Unacknowledged
            }
        }
    }
}
