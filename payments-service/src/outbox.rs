use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{pooled_connection::bb8::Pool, AsyncPgConnection, RunQueryDsl};
use rdkafka::producer::FutureProducer;
use shared::broker;
use tokio::sync::watch;
use tokio::time;
use tracing::{error, info};

use crate::models::OutboxMessage;
use crate::schema::outbox_messages;

type DbPool = Pool<AsyncPgConnection>;

/// Drains committed-but-unshipped outbox rows (payment results and audit
/// events) to the broker. At-least-once: a crash between publish and
/// mark-processed replays the row, and the orders-side inbox deduplicates.
pub struct OutboxPublisher {
    pool: DbPool,
    producer: FutureProducer,
    queue: &'static str,
    shutdown: watch::Receiver<bool>,
}

impl OutboxPublisher {
    pub fn new(
        pool: DbPool,
        producer: FutureProducer,
        queue: &'static str,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            pool,
            producer,
            queue,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut interval = time::interval(Duration::from_secs(1));

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    info!("outbox publisher stopping");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.drain().await {
                        error!("error draining outbox: {e:#}");
                    }
                }
            }
        }
    }

    async fn drain(&self) -> Result<()> {
        let mut conn = self.pool.get().await?;

        let pending = outbox_messages::table
            .filter(outbox_messages::processed_at.is_null())
            .order(outbox_messages::created.asc())
            .limit(50)
            .load::<OutboxMessage>(&mut conn)
            .await?;

        for message in pending {
            let payload = serde_json::to_string(&message.data)?;
            if let Err(e) =
                broker::publish(&self.producer, self.queue, &message.id.to_string(), &payload)
                    .await
            {
                // Left unprocessed; the next cycle retries it.
                error!("failed to publish outbox message {}: {e:#}", message.id);
                continue;
            }

            diesel::update(outbox_messages::table.find(message.id))
                .set(outbox_messages::processed_at.eq(Utc::now()))
                .execute(&mut conn)
                .await?;

            info!(id = %message.id, event_type = %message.event_type, "published outbox message");
        }

        Ok(())
    }
}
