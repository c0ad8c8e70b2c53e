diesel::table! {
    users (id) {
        id -> Integer,
        name -> Text,
        email -> Nullable<Text>,
        rating -> Nullable<Double>,
        identity_verified -> Bool,
        active -> Bool,
        created_at -> BigInt,
    }
}

diesel::table! {
    auth_tokens (id) {
        id -> Integer,
        user_id -> Integer,
        token_hash -> Text,
        created_at -> BigInt,
    }
}

diesel::table! {
    trips (id) {
        id -> Integer,
        user_id -> Integer,
        departure_city -> Text,
        arrival_city -> Text,
        departure_at -> BigInt,
        arrival_at -> Nullable<BigInt>,
        available_weight -> Nullable<Double>,
        price_per_kg -> Nullable<Double>,
        status -> Text,
        created_at -> BigInt,
    }
}

diesel::table! {
    parcels (id) {
        id -> Integer,
        sender_id -> Integer,
        pickup_city -> Text,
        delivery_city -> Text,
        pickup_date -> Nullable<BigInt>,
        weight -> Nullable<Double>,
        max_price -> Nullable<Double>,
        description -> Nullable<Text>,
        status -> Text,
        created_at -> BigInt,
        updated_at -> BigInt,
    }
}

diesel::table! {
    conversations (id) {
        id -> Integer,
        parcel_id -> Nullable<Integer>,
        trip_id -> Nullable<Integer>,
        created_at -> BigInt,
    }
}

diesel::table! {
    conversation_participants (id) {
        id -> Integer,
        conversation_id -> Integer,
        user_id -> Integer,
        joined_at -> BigInt,
    }
}

diesel::table! {
    messages (id) {
        id -> Integer,
        conversation_id -> Integer,
        sender_id -> Integer,
        content -> Text,
        message_type -> Text,
        metadata -> Nullable<Text>,
        status -> Text,
        read_at -> Nullable<BigInt>,
        created_at -> BigInt,
    }
}

diesel::table! {
    notifications (id) {
        id -> Integer,
        user_id -> Integer,
        kind -> Text,
        title -> Text,
        body -> Text,
        data -> Nullable<Text>,
        is_read -> Bool,
        created_at -> BigInt,
    }
}

diesel::joinable!(trips -> users (user_id));
diesel::joinable!(auth_tokens -> users (user_id));

diesel::allow_tables_to_appear_in_same_query!(
    users,
    auth_tokens,
    trips,
    parcels,
    conversations,
    conversation_participants,
    messages,
    notifications,
);

diesel::table! {
    app_config (id) {
        id -> Integer,
        config_json -> Text,
        updated_at -> BigInt,
    }
}
