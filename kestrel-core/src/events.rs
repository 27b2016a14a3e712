use async_trait::async_trait;
use kestrel_shared::DeadLetterEvent;

#[derive(Debug, thiserror::Error)]
#[error("Failed to publish dead letter: {0}")]
pub struct PublishError(pub String);

/// Destination for messages the payment-completion worker gives up on.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn dead_letter(&self, event: &DeadLetterEvent) -> Result<(), PublishError>;
}
