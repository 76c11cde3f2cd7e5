use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::BorrowedMessage;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{Message, Offset};
use tracing::warn;

/// Deliveries of one message before it is routed to the dead-letter queue.
pub const MAX_DELIVERY_ATTEMPTS: u32 = 5;

pub fn producer(brokers: &str) -> Result<FutureProducer> {
    let producer = ClientConfig::new()
        .set("bootstrap.servers", brokers)
        .set("message.timeout.ms", "5000")
        .create()?;
    Ok(producer)
}

/// Consumer for one durable queue. Offsets are committed manually after the
/// transactional effect has committed, never before.
pub fn consumer(brokers: &str, group_id: &str, queue: &str) -> Result<StreamConsumer> {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("group.id", group_id)
        .set("bootstrap.servers", brokers)
        .set("enable.partition.eof", "false")
        .set("session.timeout.ms", "6000")
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "earliest")
        .create()?;
    consumer.subscribe(&[queue])?;
    Ok(consumer)
}

pub async fn publish(
    producer: &FutureProducer,
    queue: &str,
    key: &str,
    payload: &str,
) -> Result<()> {
    let record = FutureRecord::to(queue).payload(payload).key(key);
    producer
        .send(record, Duration::from_secs(5))
        .await
        .map_err(|(e, _)| anyhow::anyhow!("failed to publish to {}: {}", queue, e))?;
    Ok(())
}

/// Acknowledge: commit the message offset.
pub fn ack(consumer: &StreamConsumer, message: &BorrowedMessage<'_>) -> Result<()> {
    consumer.commit_message(message, CommitMode::Async)?;
    Ok(())
}

/// Negative-acknowledge: seek the partition back so the message is
/// redelivered on the next fetch.
pub fn nack(consumer: &StreamConsumer, message: &BorrowedMessage<'_>) -> Result<()> {
    consumer.seek(
        message.topic(),
        message.partition(),
        Offset::Offset(message.offset()),
        Duration::from_secs(5),
    )?;
    Ok(())
}

pub fn dead_letter_queue(queue: &str) -> String {
    format!("{queue}-dead-letter")
}

/// Counts failed deliveries per (partition, offset) so a poison message is
/// retried a bounded number of times instead of being requeued forever.
#[derive(Debug, Default)]
pub struct RetryTracker {
    attempts: HashMap<(i32, i64), u32>,
}

impl RetryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failed delivery. Returns true once the message has used up
    /// its attempts and should be dead-lettered.
    pub fn record_failure(&mut self, partition: i32, offset: i64) -> bool {
        let attempts = self.attempts.entry((partition, offset)).or_insert(0);
        *attempts += 1;
        if *attempts >= MAX_DELIVERY_ATTEMPTS {
            warn!(
                partition,
                offset, attempts, "message exhausted its delivery attempts"
            );
            true
        } else {
            false
        }
    }

    /// Forgets a message once it has been acknowledged or dead-lettered.
    pub fn clear(&mut self, partition: i32, offset: i64) {
        self.attempts.remove(&(partition, offset));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gives_up_after_max_attempts() {
        let mut tracker = RetryTracker::new();
        for _ in 0..MAX_DELIVERY_ATTEMPTS - 1 {
            assert!(!tracker.record_failure(0, 17));
        }
        assert!(tracker.record_failure(0, 17));
    }

    #[test]
    fn tracks_messages_independently() {
        let mut tracker = RetryTracker::new();
        for _ in 0..MAX_DELIVERY_ATTEMPTS {
            tracker.record_failure(0, 1);
        }
        assert!(!tracker.record_failure(0, 2));
        assert!(!tracker.record_failure(1, 1));
    }

    #[test]
    fn clear_resets_the_count() {
        let mut tracker = RetryTracker::new();
        for _ in 0..MAX_DELIVERY_ATTEMPTS - 1 {
            tracker.record_failure(3, 9);
        }
        tracker.clear(3, 9);
        assert!(!tracker.record_failure(3, 9));
    }

    #[test]
    fn dead_letter_queue_name() {
        assert_eq!(dead_letter_queue("order-payments"), "order-payments-dead-letter");
    }
}
