use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Queryable, Serialize)]
pub struct Account {
    pub id: i32,
    pub user_id: Uuid,
    pub balance: bigdecimal::BigDecimal,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::accounts)]
pub struct NewAccount {
    pub user_id: Uuid,
    pub balance: bigdecimal::BigDecimal,
}

#[derive(Debug, Clone, Queryable)]
pub struct OutboxMessage {
    pub id: Uuid,
    pub event_type: String,
    pub data: serde_json::Value,
    pub created: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::outbox_messages)]
pub struct NewOutboxMessage {
    pub id: Uuid,
    pub event_type: String,
    pub data: serde_json::Value,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable)]
pub struct InboxMessage {
    pub id: Uuid,
    pub message_type: String,
    pub data: serde_json::Value,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::inbox_messages)]
pub struct NewInboxMessage {
    pub id: Uuid,
    pub message_type: String,
    pub data: serde_json::Value,
    pub received_at: DateTime<Utc>,
}
