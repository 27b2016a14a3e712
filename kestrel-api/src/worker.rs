use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};
use tracing::{debug, error, info};
use kestrel_order::{CompletionDispatcher, Delivery, Handled, OffsetTracker};
use kestrel_store::app_config::KafkaConfig;

/// Consume payment notifications until the process exits.
///
/// Auto-commit is off. A partition's offset only advances past messages the
/// dispatcher has acknowledged, so a crash means redelivery, never loss.
pub async fn start_payment_worker(
    kafka: &KafkaConfig,
    dispatcher: CompletionDispatcher,
    mut handled: mpsc::UnboundedReceiver<Handled>,
) -> Result<(), KafkaError> {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", &kafka.brokers)
        .set("group.id", &kafka.group_id)
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "earliest")
        .create()?;

    consumer.subscribe(&[kafka.payment_topic.as_str()])?;

    info!(topic = %kafka.payment_topic, "Payment worker started");

    let mut offsets = OffsetTracker::new();

    loop {
        tokio::select! {
            received = consumer.recv() => {
                let delivery = match received {
                    Err(e) => {
                        error!(error = %e, "Kafka error");
                        sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                    Ok(m) => Delivery {
                        topic: m.topic().to_string(),
                        partition: m.partition(),
                        offset: m.offset(),
                        key: m.key_view::<str>().and_then(Result::ok).map(str::to_string),
                        payload: m.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                    },
                };
                offsets.track(&delivery.topic, delivery.partition, delivery.offset);
                dispatcher.dispatch(delivery).await;
            }
            Some(done) = handled.recv() => {
                debug!(
                    topic = %done.topic,
                    partition = done.partition,
                    offset = done.offset,
                    disposition = ?done.disposition,
                    "Payment notification handled"
                );
                if let Some(position) = offsets.complete(&done.topic, done.partition, done.offset) {
                    commit(&consumer, &done.topic, done.partition, position);
                }
            }
        }
    }
}

fn commit(consumer: &StreamConsumer, topic: &str, partition: i32, position: i64) {
    let mut list = TopicPartitionList::new();
    if let Err(e) = list.add_partition_offset(topic, partition, Offset::Offset(position)) {
        error!(topic, partition, position, error = %e, "Invalid commit position");
        return;
    }
    if let Err(e) = consumer.commit(&list, CommitMode::Async) {
        error!(topic, partition, position, error = %e, "Failed to commit offset");
    }
}
