use diesel_async::{pooled_connection::bb8::Pool, AsyncPgConnection};
use rdkafka::consumer::StreamConsumer;
use rdkafka::message::BorrowedMessage;
use rdkafka::producer::FutureProducer;
use rdkafka::Message;
use shared::broker::{self, RetryTracker};
use shared::OrderCreated;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::handlers;

type DbPool = Pool<AsyncPgConnection>;

fn parse_order_created(payload: &str) -> Option<(OrderCreated, serde_json::Value)> {
    let value: serde_json::Value = serde_json::from_str(payload).ok()?;
    let event = serde_json::from_value::<OrderCreated>(value.clone()).ok()?;
    Some((event, value))
}

/// Consumes OrderCreated events, debits or rejects under a row lock, and
/// always leaves behind a definitive result event — exactly once per event id.
pub struct InboxListener {
    pool: DbPool,
    producer: FutureProducer,
    retries: RetryTracker,
    shutdown: watch::Receiver<bool>,
}

impl InboxListener {
    pub fn new(pool: DbPool, producer: FutureProducer, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            pool,
            producer,
            retries: RetryTracker::new(),
            shutdown,
        }
    }

    pub async fn run(mut self, consumer: StreamConsumer) {
        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    info!("inbox listener stopping");
                    break;
                }
                message = consumer.recv() => match message {
                    Ok(m) => self.handle(&consumer, &m).await,
                    Err(e) => error!("error receiving message: {e}"),
                }
            }
        }
    }

    async fn handle(&mut self, consumer: &StreamConsumer, message: &BorrowedMessage<'_>) {
        let payload = match message.payload_view::<str>() {
            Some(Ok(payload)) => payload,
            _ => {
                self.reject(consumer, message, "payload is not valid UTF-8").await;
                return;
            }
        };

        let Some((event, raw)) = parse_order_created(payload) else {
            self.reject(consumer, message, "malformed OrderCreated event").await;
            return;
        };

        match self.process(&event, raw).await {
            Ok(()) => self.acknowledge(consumer, message),
            Err(e) => {
                let why = format!("error processing order: {e:#}");
                self.reject(consumer, message, &why).await;
            }
        }
    }

    async fn process(&self, event: &OrderCreated, raw: serde_json::Value) -> anyhow::Result<()> {
        let mut conn = self.pool.get().await?;

        if handlers::already_seen(&mut conn, event.id).await? {
            info!(event_id = %event.id, "order event already processed, skipping");
            return Ok(());
        }

        let result = handlers::apply_order_created(&mut conn, event, raw).await?;
        info!(
            order_id = event.order_id,
            success = result.success,
            reason = result.reason.as_deref().unwrap_or(""),
            "processed order payment"
        );
        Ok(())
    }

    fn acknowledge(&mut self, consumer: &StreamConsumer, message: &BorrowedMessage<'_>) {
        if let Err(e) = broker::ack(consumer, message) {
            error!("error committing message: {e:#}");
            return;
        }
        self.retries.clear(message.partition(), message.offset());
    }

    async fn reject(&mut self, consumer: &StreamConsumer, message: &BorrowedMessage<'_>, why: &str) {
        if !self.retries.record_failure(message.partition(), message.offset()) {
            warn!(offset = message.offset(), "requeueing message: {why}");
            if let Err(e) = broker::nack(consumer, message) {
                error!("error requeueing message: {e:#}");
            }
            return;
        }

        let payload = String::from_utf8_lossy(message.payload().unwrap_or_default()).into_owned();
        let key = message
            .key()
            .map(|k| String::from_utf8_lossy(k).into_owned())
            .unwrap_or_else(|| message.offset().to_string());
        let dlq = broker::dead_letter_queue(message.topic());

        match broker::publish(&self.producer, &dlq, &key, &payload).await {
            Ok(()) => {
                warn!(offset = message.offset(), "dead-lettered message: {why}");
                self.acknowledge(consumer, message);
            }
            Err(e) => {
                error!("failed to dead-letter message: {e:#}");
                if let Err(e) = broker::nack(consumer, message) {
                    error!("error requeueing message: {e:#}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use std::str::FromStr;
    use uuid::Uuid;

    #[test]
    fn parses_a_well_formed_event() {
        let event = OrderCreated {
            id: Uuid::new_v4(),
            order_id: 12,
            user_id: Uuid::new_v4(),
            amount: BigDecimal::from_str("42.50").unwrap(),
        };
        let payload = serde_json::to_string(&event).unwrap();

        let (parsed, raw) = parse_order_created(&payload).expect("should parse");
        assert_eq!(parsed.id, event.id);
        assert_eq!(parsed.order_id, 12);
        assert_eq!(raw["Amount"], "42.50");
    }

    #[test]
    fn rejects_missing_fields() {
        let payload = r#"{"Id":"6f2e1f4e-32a7-44cf-9f1b-6a35a7a1e001","OrderId":12}"#;
        assert!(parse_order_created(payload).is_none());
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_order_created("{{{").is_none());
    }
}
