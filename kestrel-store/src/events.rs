use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;
use tracing::{error, info};
use kestrel_core::events::{DeadLetterSink, PublishError};
use kestrel_shared::DeadLetterEvent;

/// Kafka producer for the dead-letter topic of the payment worker.
#[derive(Clone)]
pub struct EventProducer {
    producer: FutureProducer,
    dead_letter_topic: String,
}

impl EventProducer {
    pub fn new(brokers: &str, dead_letter_topic: &str) -> Result<Self, rdkafka::error::KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self {
            producer,
            dead_letter_topic: dead_letter_topic.to_string(),
        })
    }

    pub fn dead_letter_topic(&self) -> &str {
        &self.dead_letter_topic
    }

    async fn send(&self, key: &str, payload: &str) -> Result<(), rdkafka::error::KafkaError> {
        let record = FutureRecord::to(&self.dead_letter_topic).key(key).payload(payload);

        // Wait up to a second for room in the local queue.
        let (partition, offset) = self
            .producer
            .send(record, Timeout::After(Duration::from_secs(1)))
            .await
            .map(|delivery| (delivery.partition, delivery.offset))
            .map_err(|(e, _)| e)?;

        info!(topic = %self.dead_letter_topic, key, partition, offset, "Dead letter delivered");
        Ok(())
    }
}

#[async_trait]
impl DeadLetterSink for EventProducer {
    async fn dead_letter(&self, event: &DeadLetterEvent) -> Result<(), PublishError> {
        let payload = serde_json::to_string(event).map_err(|e| PublishError(e.to_string()))?;
        let key = event.key.as_deref().unwrap_or(event.source_topic.as_str());

        self.send(key, &payload).await.map_err(|e| {
            error!(topic = %self.dead_letter_topic, error = %e, "Dead letter delivery failed");
            PublishError(e.to_string())
        })
    }
}
