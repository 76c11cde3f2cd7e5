use diesel_async::{pooled_connection::bb8::Pool, AsyncPgConnection};
use rdkafka::consumer::StreamConsumer;
use rdkafka::message::BorrowedMessage;
use rdkafka::producer::FutureProducer;
use rdkafka::Message;
use shared::broker::{self, RetryTracker};
use shared::PaymentResult;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::handlers;

type DbPool = Pool<AsyncPgConnection>;

/// The payment-results queue carries payment-side audit events (deposit
/// receipts, account creations) alongside saga results; only messages that
/// parse as a full result are applied.
enum Incoming {
    Result(PaymentResult, serde_json::Value),
    Unrelated,
    Malformed,
}

fn classify(payload: &str) -> Incoming {
    let value: serde_json::Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(_) => return Incoming::Malformed,
    };
    match serde_json::from_value::<PaymentResult>(value.clone()) {
        Ok(result) => Incoming::Result(result, value),
        // A payload carrying the result keys that still fails the full parse
        // is a corrupt result, not foreign traffic; it must reach the
        // retry/dead-letter path instead of being dropped.
        Err(_) if value.get("OrderId").is_some() && value.get("Success").is_some() => {
            Incoming::Malformed
        }
        Err(_) => Incoming::Unrelated,
    }
}

/// Consumes payment results and drives each order to its terminal status
/// exactly once.
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

        match classify(payload) {
            Incoming::Malformed => {
                self.reject(consumer, message, "malformed payment result").await;
            }
            Incoming::Unrelated => {
                debug!("ignoring non-result event on {}", message.topic());
                self.acknowledge(consumer, message);
            }
            Incoming::Result(result, raw) => match self.process(&result, raw).await {
                Ok(()) => self.acknowledge(consumer, message),
                Err(e) => {
                    let why = format!("error applying payment result: {e:#}");
                    self.reject(consumer, message, &why).await;
                }
            },
        }
    }

    async fn process(&self, result: &PaymentResult, raw: serde_json::Value) -> anyhow::Result<()> {
        let mut conn = self.pool.get().await?;

        if handlers::already_seen(&mut conn, result.id).await? {
            info!(event_id = %result.id, "payment result already processed, skipping");
            return Ok(());
        }

        handlers::apply_payment_result(&mut conn, result, raw).await?;
        info!(
            order_id = result.order_id,
            success = result.success,
            "applied payment result"
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

    #[test]
    fn classifies_a_payment_result() {
        let payload = serde_json::to_string(&PaymentResult::failed(5, "Insufficient funds")).unwrap();
        match classify(&payload) {
            Incoming::Result(result, raw) => {
                assert_eq!(result.order_id, 5);
                assert!(!result.success);
                assert_eq!(raw["OrderId"], 5);
            }
            _ => panic!("expected a payment result"),
        }
    }

    #[test]
    fn deposit_receipts_are_unrelated() {
        // Same queue and tag as results, but no OrderId.
        let payload = r#"{"Id":"6f2e1f4e-32a7-44cf-9f1b-6a35a7a1e001","UserId":"a4f2e1f4-32a7-44cf-9f1b-6a35a7a1e002","Amount":"100","NewBalance":"150"}"#;
        assert!(matches!(classify(payload), Incoming::Unrelated));
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(classify("not json at all"), Incoming::Malformed));
    }

    #[test]
    fn corrupt_result_is_malformed_not_unrelated() {
        // Carries the result keys, so it is a result — just a broken one.
        let payload = r#"{"Id":"6f2e1f4e-32a7-44cf-9f1b-6a35a7a1e001","OrderId":5,"Success":true,"ProcessedAt":"not-a-date"}"#;
        assert!(matches!(classify(payload), Incoming::Malformed));
    }

    #[test]
    fn account_created_events_are_unrelated() {
        let payload = r#"{"Id":"6f2e1f4e-32a7-44cf-9f1b-6a35a7a1e003","AccountId":9,"UserId":"a4f2e1f4-32a7-44cf-9f1b-6a35a7a1e002"}"#;
        assert!(matches!(classify(payload), Incoming::Unrelated));
    }
}
