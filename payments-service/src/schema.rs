diesel::table! {
    accounts (id) {
        id -> Int4,
        user_id -> Uuid,
        balance -> Numeric,
    }
}

diesel::table! {
    outbox_messages (id) {
        id -> Uuid,
        event_type -> Varchar,
        data -> Jsonb,
        created -> Timestamptz,
        processed_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    inbox_messages (id) {
        id -> Uuid,
        message_type -> Varchar,
        data -> Jsonb,
        received_at -> Timestamptz,
        processed_at -> Nullable<Timestamptz>,
    }
}

diesel::allow_tables_to_appear_in_same_query!(accounts, outbox_messages, inbox_messages,);
