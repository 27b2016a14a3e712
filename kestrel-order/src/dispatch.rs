//! Concurrent handling of payment notifications with in-order commits.
//!
//! Notifications for different orders are handled in parallel, so one order
//! stuck in retries does not hold back the rest of its partition. Messages
//! for the same order still run one at a time, in arrival order.

use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as AsyncMutex, Semaphore};
use tracing::{error, warn};
use uuid::Uuid;
use crate::completion::{Disposition, PaymentCompletionHandler};

/// One message taken off the notification topic.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

/// A delivery whose handling is finished and acknowledged.
#[derive(Debug, Clone)]
pub struct Handled {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub disposition: Disposition,
}

#[derive(Deserialize)]
struct OrderRef {
    order_id: Uuid,
}

/// Per-order locks. An entry lives only while some task holds or waits on it.
#[derive(Default)]
struct Lanes {
    inner: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl Lanes {
    fn join(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut lanes = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        lanes.entry(key.to_string()).or_default().clone()
    }

    fn leave(&self, key: &str, lane: Arc<AsyncMutex<()>>) {
        let mut lanes = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        drop(lane);
        if lanes.get(key).is_some_and(|l| Arc::strong_count(l) == 1) {
            lanes.remove(key);
        }
    }
}

/// Spawns one task per delivery and reports each through the channel
/// returned by [`CompletionDispatcher::new`] once it is acknowledged.
///
/// A delivery whose dead-letter publish failed is handled again after
/// `redelivery_delay` and is not reported until that succeeds.
pub struct CompletionDispatcher {
    handler: Arc<PaymentCompletionHandler>,
    permits: Arc<Semaphore>,
    lanes: Arc<Lanes>,
    redelivery_delay: Duration,
    done: mpsc::UnboundedSender<Handled>,
}

impl CompletionDispatcher {
    pub fn new(
        handler: Arc<PaymentCompletionHandler>,
        max_in_flight: usize,
        redelivery_delay: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<Handled>) {
        let (done, done_rx) = mpsc::unbounded_channel();
        let dispatcher = Self {
            handler,
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
            lanes: Arc::new(Lanes::default()),
            redelivery_delay,
            done,
        };
        (dispatcher, done_rx)
    }

    /// Start handling `delivery`. Waits only when `max_in_flight` deliveries
    /// are already running.
    pub async fn dispatch(&self, delivery: Delivery) {
        let Ok(permit) = self.permits.clone().acquire_owned().await else {
            error!(topic = %delivery.topic, offset = delivery.offset, "Dispatcher closed");
            return;
        };

        let handler = self.handler.clone();
        let lanes = self.lanes.clone();
        let delay = self.redelivery_delay;
        let done = self.done.clone();
        let lane_key = lane_key(&delivery);

        tokio::spawn(async move {
            let disposition = match lane_key {
                Some(key) => {
                    let lane = lanes.join(&key);
                    let disposition = {
                        let _turn = lane.lock().await;
                        handle_until_acknowledged(&handler, &delivery, delay).await
                    };
                    lanes.leave(&key, lane);
                    disposition
                }
                None => handle_until_acknowledged(&handler, &delivery, delay).await,
            };

            let _ = done.send(Handled {
                topic: delivery.topic,
                partition: delivery.partition,
                offset: delivery.offset,
                disposition,
            });
            drop(permit);
        });
    }
}

/// Messages are grouped by order id, falling back to the message key.
/// Unparseable keyless messages run on their own.
fn lane_key(delivery: &Delivery) -> Option<String> {
    serde_json::from_slice::<OrderRef>(&delivery.payload)
        .ok()
        .map(|r| r.order_id.to_string())
        .or_else(|| delivery.key.clone())
}

async fn handle_until_acknowledged(
    handler: &PaymentCompletionHandler,
    delivery: &Delivery,
    delay: Duration,
) -> Disposition {
    loop {
        let disposition = handler.handle(delivery.key.as_deref(), &delivery.payload).await;
        if disposition.is_acknowledged() {
            return disposition;
        }
        warn!(
            topic = %delivery.topic,
            partition = delivery.partition,
            offset = delivery.offset,
            delay_ms = delay.as_millis() as u64,
            "Payment notification not acknowledged, handling again"
        );
        tokio::time::sleep(delay).await;
    }
}

#[derive(Debug, Default)]
struct PartitionOffsets {
    in_flight: BTreeSet<i64>,
    highest_done: Option<i64>,
    committed: i64,
}

/// Tracks in-flight offsets per partition and yields the position that is
/// safe to commit: nothing below it is still being handled.
#[derive(Debug, Default)]
pub struct OffsetTracker {
    partitions: HashMap<(String, i32), PartitionOffsets>,
}

impl OffsetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, topic: &str, partition: i32, offset: i64) {
        let entry = self
            .partitions
            .entry((topic.to_string(), partition))
            .or_insert_with(|| PartitionOffsets { committed: offset, ..Default::default() });
        entry.in_flight.insert(offset);
    }

    /// Mark `offset` done. Returns the new commit position if it moved.
    pub fn complete(&mut self, topic: &str, partition: i32, offset: i64) -> Option<i64> {
        let p = self.partitions.get_mut(&(topic.to_string(), partition))?;
        if !p.in_flight.remove(&offset) {
            return None;
        }
        p.highest_done = Some(p.highest_done.map_or(offset, |h| h.max(offset)));

        let position = match p.in_flight.first() {
            Some(&lowest) => lowest,
            None => p.highest_done? + 1,
        };
        if position > p.committed {
            p.committed = position;
            Some(position)
        } else {
            None
        }
    }

    pub fn in_flight(&self) -> usize {
        self.partitions.values().map(|p| p.in_flight.len()).sum()
    }
}
