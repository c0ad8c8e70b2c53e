use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::sql_types::BigInt;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};
use serde_json::Value;

use crate::auth::{generate_token, hash_token};
use crate::db::{self, SqlitePool, SqlitePooledConn};
use crate::domains::conversation::{
    Conversation, Message, MessageStatus, MessageType, NewConversation, NewMessage,
};
use crate::domains::notification::{NewNotification, Notification};
use crate::domains::parcel::{NewParcel, Parcel, ParcelStatus};
use crate::domains::trip::{NewTrip, Trip, TripStatus};
use crate::domains::user::{NewUser, User, UserIdentity};
use crate::error::{ParcelExchangeError, Result};
use crate::interfaces::providers::{
    ConversationStore, IdentityProvider, NotificationStore, ParcelStore, TripStore, UserDirectory,
};
use crate::matching;

pub(crate) mod schema;
use schema::{
    auth_tokens, conversation_participants, conversations, messages, notifications, parcels,
    trips, users,
};

#[derive(QueryableByName)]
struct RowId {
    #[diesel(sql_type = BigInt)]
    id: i64,
}

#[derive(Queryable)]
struct UserRow {
    id: i32,
    name: String,
    email: Option<String>,
    rating: Option<f64>,
    identity_verified: bool,
    active: bool,
    created_at: i64,
}

#[derive(Insertable)]
#[diesel(table_name = users)]
struct NewUserRow<'a> {
    name: &'a str,
    email: Option<&'a str>,
    rating: Option<f64>,
    identity_verified: bool,
    active: bool,
    created_at: i64,
}

#[derive(Insertable)]
#[diesel(table_name = auth_tokens)]
struct NewTokenRow<'a> {
    user_id: i32,
    token_hash: &'a str,
    created_at: i64,
}

#[derive(Queryable)]
struct TripRow {
    id: i32,
    user_id: i32,
    departure_city: String,
    arrival_city: String,
    departure_at: i64,
    arrival_at: Option<i64>,
    available_weight: Option<f64>,
    price_per_kg: Option<f64>,
    status: String,
    created_at: i64,
}

#[derive(Insertable)]
#[diesel(table_name = trips)]
struct NewTripRow<'a> {
    user_id: i32,
    departure_city: &'a str,
    arrival_city: &'a str,
    departure_at: i64,
    arrival_at: Option<i64>,
    available_weight: Option<f64>,
    price_per_kg: Option<f64>,
    status: &'a str,
    created_at: i64,
}

#[derive(Queryable)]
struct ParcelRow {
    id: i32,
    sender_id: i32,
    pickup_city: String,
    delivery_city: String,
    pickup_date: Option<i64>,
    weight: Option<f64>,
    max_price: Option<f64>,
    description: Option<String>,
    status: String,
    created_at: i64,
    updated_at: i64,
}

#[derive(Insertable)]
#[diesel(table_name = parcels)]
struct NewParcelRow<'a> {
    sender_id: i32,
    pickup_city: &'a str,
    delivery_city: &'a str,
    pickup_date: Option<i64>,
    weight: Option<f64>,
    max_price: Option<f64>,
    description: Option<&'a str>,
    status: &'a str,
    created_at: i64,
    updated_at: i64,
}

#[derive(Queryable)]
struct ConversationRow {
    id: i32,
    parcel_id: Option<i32>,
    trip_id: Option<i32>,
    created_at: i64,
}

#[derive(Insertable)]
#[diesel(table_name = conversations)]
struct NewConversationRow {
    parcel_id: Option<i32>,
    trip_id: Option<i32>,
    created_at: i64,
}

#[derive(Insertable)]
#[diesel(table_name = conversation_participants)]
struct NewParticipantRow {
    conversation_id: i32,
    user_id: i32,
    joined_at: i64,
}

#[derive(Queryable)]
struct MessageRow {
    id: i32,
    conversation_id: i32,
    sender_id: i32,
    content: String,
    message_type: String,
    metadata: Option<String>,
    status: String,
    read_at: Option<i64>,
    created_at: i64,
}

#[derive(Insertable)]
#[diesel(table_name = messages)]
struct NewMessageRow<'a> {
    conversation_id: i32,
    sender_id: i32,
    content: &'a str,
    message_type: &'a str,
    metadata: Option<&'a str>,
    status: &'a str,
    read_at: Option<i64>,
    created_at: i64,
}

#[derive(Queryable)]
struct NotificationRow {
    id: i32,
    user_id: i32,
    kind: String,
    title: String,
    body: String,
    data: Option<String>,
    is_read: bool,
    created_at: i64,
}

#[derive(Insertable)]
#[diesel(table_name = notifications)]
struct NewNotificationRow<'a> {
    user_id: i32,
    kind: &'a str,
    title: &'a str,
    body: &'a str,
    data: Option<&'a str>,
    is_read: bool,
    created_at: i64,
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn new(sqlite_path: impl AsRef<str>) -> Result<Self> {
        let pool = db::connect(sqlite_path.as_ref()).await?;
        Ok(Self { pool })
    }

    async fn conn(&self) -> Result<SqlitePooledConn<'_>> {
        self.pool
            .get()
            .await
            .map_err(|e| ParcelExchangeError::Storage(e.to_string()))
    }

    async fn last_insert_id(conn: &mut SqlitePooledConn<'_>) -> Result<i32> {
        let row: RowId = diesel::sql_query("SELECT last_insert_rowid() AS id")
            .get_result(conn)
            .await
            .map_err(storage_err)?;
        Ok(row.id as i32)
    }
}

fn storage_err(e: diesel::result::Error) -> ParcelExchangeError {
    ParcelExchangeError::Storage(e.to_string())
}

fn now_ts() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

fn encode_json(value: Option<&Value>) -> Result<Option<String>> {
    value
        .map(|v| {
            serde_json::to_string(v).map_err(|e| ParcelExchangeError::Serialization(e.to_string()))
        })
        .transpose()
}

fn decode_json(raw: Option<String>) -> Option<Value> {
    raw.and_then(|raw| serde_json::from_str(&raw).ok())
}

fn map_user(row: UserRow) -> User {
    User {
        id: row.id,
        name: row.name,
        email: row.email,
        rating: row.rating,
        identity_verified: row.identity_verified,
        active: row.active,
        created_at: row.created_at,
    }
}

fn map_trip(row: TripRow, owner_rating: Option<f64>, owner_verified: bool) -> Result<Trip> {
    Ok(Trip {
        id: row.id,
        user_id: row.user_id,
        departure_city: row.departure_city,
        arrival_city: row.arrival_city,
        departure_at: row.departure_at,
        arrival_at: row.arrival_at,
        available_weight: row.available_weight,
        price_per_kg: row.price_per_kg,
        status: TripStatus::parse(&row.status)?,
        owner_rating,
        owner_verified,
        created_at: row.created_at,
    })
}

fn map_parcel(row: ParcelRow) -> Result<Parcel> {
    Ok(Parcel {
        id: row.id,
        sender_id: row.sender_id,
        pickup_city: row.pickup_city,
        delivery_city: row.delivery_city,
        pickup_date: row.pickup_date,
        weight: row.weight,
        max_price: row.max_price,
        description: row.description,
        status: ParcelStatus::parse(&row.status)?,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

fn map_message(row: MessageRow) -> Result<Message> {
    Ok(Message {
        id: row.id,
        conversation_id: row.conversation_id,
        sender_id: row.sender_id,
        content: row.content,
        message_type: MessageType::parse(&row.message_type)?,
        metadata: decode_json(row.metadata),
        status: MessageStatus::parse(&row.status)?,
        read_at: row.read_at,
        created_at: row.created_at,
    })
}

fn map_notification(row: NotificationRow) -> Notification {
    Notification {
        id: row.id,
        user_id: row.user_id,
        kind: row.kind,
        title: row.title,
        body: row.body,
        data: decode_json(row.data),
        read: row.is_read,
        created_at: row.created_at,
    }
}

type TripWithOwner = (TripRow, Option<f64>, bool);

#[async_trait]
impl UserDirectory for SqliteStore {
    async fn create_user(&self, user: NewUser) -> Result<User> {
        let new = NewUserRow {
            name: user.name.trim(),
            email: user.email.as_deref(),
            rating: user.rating,
            identity_verified: user.identity_verified,
            active: true,
            created_at: now_ts(),
        };
        let mut conn = self.conn().await?;
        diesel::insert_into(users::table)
            .values(&new)
            .execute(&mut conn)
            .await
            .map_err(storage_err)?;
        let id = Self::last_insert_id(&mut conn).await?;
        drop(conn);
        self.get_user(id).await
    }

    async fn get_user(&self, id: i32) -> Result<User> {
        let mut conn = self.conn().await?;
        let row: Option<UserRow> = users::table
            .filter(users::id.eq(id))
            .first(&mut conn)
            .await
            .optional()
            .map_err(storage_err)?;
        row.map(map_user)
            .ok_or_else(|| ParcelExchangeError::NotFound(format!("user {id}")))
    }

    async fn set_user_active(&self, id: i32, active: bool) -> Result<()> {
        let mut conn = self.conn().await?;
        let count = diesel::update(users::table.filter(users::id.eq(id)))
            .set(users::active.eq(active))
            .execute(&mut conn)
            .await
            .map_err(storage_err)?;
        if count == 0 {
            return Err(ParcelExchangeError::NotFound(format!("user {id}")));
        }
        Ok(())
    }

    async fn issue_token(&self, user_id: i32) -> Result<String> {
        self.get_user(user_id).await?;
        let token = generate_token();
        let token_hash = hash_token(&token);
        let new = NewTokenRow {
            user_id,
            token_hash: &token_hash,
            created_at: now_ts(),
        };
        let mut conn = self.conn().await?;
        diesel::insert_into(auth_tokens::table)
            .values(&new)
            .execute(&mut conn)
            .await
            .map_err(storage_err)?;
        Ok(token)
    }
}

#[async_trait]
impl IdentityProvider for SqliteStore {
    async fn authenticate(&self, token: &str) -> Result<UserIdentity> {
        let token_hash = hash_token(token);
        let mut conn = self.conn().await?;
        let row: Option<UserRow> = auth_tokens::table
            .inner_join(users::table)
            .filter(auth_tokens::token_hash.eq(&token_hash))
            .select(users::all_columns)
            .first(&mut conn)
            .await
            .optional()
            .map_err(storage_err)?;
        let user = row
            .map(map_user)
            .ok_or_else(|| ParcelExchangeError::Unauthorized("invalid token".to_string()))?;
        if !user.active {
            return Err(ParcelExchangeError::Unauthorized(
                "account is inactive".to_string(),
            ));
        }
        Ok(UserIdentity::from(&user))
    }
}

#[async_trait]
impl TripStore for SqliteStore {
    async fn create_trip(&self, user_id: i32, trip: NewTrip) -> Result<Trip> {
        trip.validate()?;
        self.get_user(user_id).await?;
        let new = NewTripRow {
            user_id,
            departure_city: trip.departure_city.trim(),
            arrival_city: trip.arrival_city.trim(),
            departure_at: trip.departure_at,
            arrival_at: trip.arrival_at,
            available_weight: trip.available_weight,
            price_per_kg: trip.price_per_kg,
            status: TripStatus::Active.as_str(),
            created_at: now_ts(),
        };
        let mut conn = self.conn().await?;
        diesel::insert_into(trips::table)
            .values(&new)
            .execute(&mut conn)
            .await
            .map_err(storage_err)?;
        let id = Self::last_insert_id(&mut conn).await?;
        drop(conn);
        self.get_trip(id).await
    }

    async fn get_trip(&self, id: i32) -> Result<Trip> {
        let mut conn = self.conn().await?;
        let row: Option<TripWithOwner> = trips::table
            .inner_join(users::table)
            .filter(trips::id.eq(id))
            .select((trips::all_columns, users::rating, users::identity_verified))
            .first(&mut conn)
            .await
            .optional()
            .map_err(storage_err)?;
        let (row, rating, verified) =
            row.ok_or_else(|| ParcelExchangeError::NotFound(format!("trip {id}")))?;
        map_trip(row, rating, verified)
    }

    async fn list_trips_by_user(&self, user_id: i32) -> Result<Vec<Trip>> {
        let mut conn = self.conn().await?;
        let rows: Vec<TripWithOwner> = trips::table
            .inner_join(users::table)
            .filter(trips::user_id.eq(user_id))
            .select((trips::all_columns, users::rating, users::identity_verified))
            .order(trips::departure_at.asc())
            .load(&mut conn)
            .await
            .map_err(storage_err)?;
        rows.into_iter()
            .map(|(row, rating, verified)| map_trip(row, rating, verified))
            .collect()
    }

    async fn candidate_trips(&self, parcel: &Parcel, window_days: i64) -> Result<Vec<Trip>> {
        let mut conn = self.conn().await?;
        let mut query = trips::table
            .inner_join(users::table)
            .select((trips::all_columns, users::rating, users::identity_verified))
            .filter(trips::status.eq(TripStatus::Active.as_str()))
            .filter(trips::user_id.ne(parcel.sender_id))
            .into_boxed();

        if let Some(pickup) = parcel.pickup_date {
            let window = i64::try_from(matching::window_seconds(window_days)).unwrap_or(i64::MAX);
            query = query
                .filter(trips::departure_at.ge(pickup.saturating_sub(window)))
                .filter(trips::departure_at.le(pickup.saturating_add(window)));
        }

        let rows: Vec<TripWithOwner> = query
            .order((trips::departure_at.asc(), trips::id.asc()))
            .load(&mut conn)
            .await
            .map_err(storage_err)?;

        // City names are compared case-insensitively beyond ASCII, so the
        // route check happens here rather than in SQL.
        let mut trips = Vec::with_capacity(rows.len());
        for (row, rating, verified) in rows {
            let trip = map_trip(row, rating, verified)?;
            if matching::is_candidate(parcel, &trip, window_days) {
                trips.push(trip);
            }
        }
        Ok(trips)
    }
}

#[async_trait]
impl ParcelStore for SqliteStore {
    async fn create_parcel(&self, sender_id: i32, parcel: NewParcel) -> Result<Parcel> {
        parcel.validate()?;
        self.get_user(sender_id).await?;
        let now = now_ts();
        let new = NewParcelRow {
            sender_id,
            pickup_city: parcel.pickup_city.trim(),
            delivery_city: parcel.delivery_city.trim(),
            pickup_date: parcel.pickup_date,
            weight: parcel.weight,
            max_price: parcel.max_price,
            description: parcel.description.as_deref(),
            status: ParcelStatus::Pending.as_str(),
            created_at: now,
            updated_at: now,
        };
        let mut conn = self.conn().await?;
        diesel::insert_into(parcels::table)
            .values(&new)
            .execute(&mut conn)
            .await
            .map_err(storage_err)?;
        let id = Self::last_insert_id(&mut conn).await?;
        drop(conn);
        self.get_parcel(id).await
    }

    async fn get_parcel(&self, id: i32) -> Result<Parcel> {
        let mut conn = self.conn().await?;
        let row: Option<ParcelRow> = parcels::table
            .filter(parcels::id.eq(id))
            .first(&mut conn)
            .await
            .optional()
            .map_err(storage_err)?;
        let row = row.ok_or_else(|| ParcelExchangeError::NotFound(format!("parcel {id}")))?;
        map_parcel(row)
    }

    async fn list_parcels_by_sender(&self, sender_id: i32) -> Result<Vec<Parcel>> {
        let mut conn = self.conn().await?;
        let rows: Vec<ParcelRow> = parcels::table
            .filter(parcels::sender_id.eq(sender_id))
            .order(parcels::id.asc())
            .load(&mut conn)
            .await
            .map_err(storage_err)?;
        rows.into_iter().map(map_parcel).collect()
    }

    async fn set_parcel_status(&self, id: i32, status: ParcelStatus) -> Result<Parcel> {
        let mut conn = self.conn().await?;
        let count = diesel::update(parcels::table.filter(parcels::id.eq(id)))
            .set((
                parcels::status.eq(status.as_str()),
                parcels::updated_at.eq(now_ts()),
            ))
            .execute(&mut conn)
            .await
            .map_err(storage_err)?;
        drop(conn);
        if count == 0 {
            return Err(ParcelExchangeError::NotFound(format!("parcel {id}")));
        }
        self.get_parcel(id).await
    }
}

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn create_conversation(&self, conversation: NewConversation) -> Result<Conversation> {
        let mut participants = conversation.participants;
        participants.sort_unstable();
        participants.dedup();
        if participants.is_empty() {
            return Err(ParcelExchangeError::Validation(
                "a conversation needs participants".to_string(),
            ));
        }

        let now = now_ts();
        let new = NewConversationRow {
            parcel_id: conversation.parcel_id,
            trip_id: conversation.trip_id,
            created_at: now,
        };
        let members = participants.clone();

        let mut conn = self.conn().await?;
        let id = conn
            .transaction::<i32, diesel::result::Error, _>(|conn| {
                async move {
                    diesel::insert_into(conversations::table)
                        .values(&new)
                        .execute(conn)
                        .await?;
                    let row: RowId = diesel::sql_query("SELECT last_insert_rowid() AS id")
                        .get_result(conn)
                        .await?;
                    let id = row.id as i32;
                    for user_id in members {
                        diesel::insert_into(conversation_participants::table)
                            .values(&NewParticipantRow {
                                conversation_id: id,
                                user_id,
                                joined_at: now,
                            })
                            .execute(conn)
                            .await?;
                    }
                    Ok(id)
                }
                .scope_boxed()
            })
            .await
            .map_err(storage_err)?;

        Ok(Conversation {
            id,
            parcel_id: conversation.parcel_id,
            trip_id: conversation.trip_id,
            participants,
            created_at: now,
        })
    }

    async fn get_conversation(&self, id: i32) -> Result<Conversation> {
        let mut conn = self.conn().await?;
        let row: Option<ConversationRow> = conversations::table
            .filter(conversations::id.eq(id))
            .first(&mut conn)
            .await
            .optional()
            .map_err(storage_err)?;
        let row = row.ok_or_else(|| ParcelExchangeError::NotFound(format!("conversation {id}")))?;
        drop(conn);
        let participants = self.participants(id).await?;
        Ok(Conversation {
            id: row.id,
            parcel_id: row.parcel_id,
            trip_id: row.trip_id,
            participants,
            created_at: row.created_at,
        })
    }

    async fn is_participant(&self, conversation_id: i32, user_id: i32) -> Result<bool> {
        let mut conn = self.conn().await?;
        let count: i64 = conversation_participants::table
            .filter(conversation_participants::conversation_id.eq(conversation_id))
            .filter(conversation_participants::user_id.eq(user_id))
            .count()
            .get_result(&mut conn)
            .await
            .map_err(storage_err)?;
        Ok(count > 0)
    }

    async fn participants(&self, conversation_id: i32) -> Result<Vec<i32>> {
        let mut conn = self.conn().await?;
        conversation_participants::table
            .filter(conversation_participants::conversation_id.eq(conversation_id))
            .select(conversation_participants::user_id)
            .order(conversation_participants::user_id.asc())
            .load(&mut conn)
            .await
            .map_err(storage_err)
    }

    async fn create_message(&self, message: NewMessage) -> Result<Message> {
        let metadata = encode_json(message.metadata.as_ref())?;
        let new = NewMessageRow {
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            content: &message.content,
            message_type: message.message_type.as_str(),
            metadata: metadata.as_deref(),
            status: MessageStatus::Sent.as_str(),
            read_at: None,
            created_at: now_ts(),
        };
        let mut conn = self.conn().await?;
        let exists: i64 = conversations::table
            .filter(conversations::id.eq(message.conversation_id))
            .count()
            .get_result(&mut conn)
            .await
            .map_err(storage_err)?;
        if exists == 0 {
            return Err(ParcelExchangeError::NotFound(format!(
                "conversation {}",
                message.conversation_id
            )));
        }
        diesel::insert_into(messages::table)
            .values(&new)
            .execute(&mut conn)
            .await
            .map_err(storage_err)?;
        let id = Self::last_insert_id(&mut conn).await?;
        let row: MessageRow = messages::table
            .filter(messages::id.eq(id))
            .first(&mut conn)
            .await
            .map_err(storage_err)?;
        map_message(row)
    }

    async fn set_message_status(
        &self,
        message_id: i32,
        status: MessageStatus,
    ) -> Result<MessageStatus> {
        let mut conn = self.conn().await?;
        let current: Option<String> = messages::table
            .filter(messages::id.eq(message_id))
            .select(messages::status)
            .first(&mut conn)
            .await
            .optional()
            .map_err(storage_err)?;
        let current = current
            .ok_or_else(|| ParcelExchangeError::NotFound(format!("message {message_id}")))?;
        let current = MessageStatus::parse(&current)?;
        if status <= current {
            return Ok(current);
        }
        diesel::update(messages::table.filter(messages::id.eq(message_id)))
            .set(messages::status.eq(status.as_str()))
            .execute(&mut conn)
            .await
            .map_err(storage_err)?;
        Ok(status)
    }

    async fn list_messages(&self, conversation_id: i32, limit: usize) -> Result<Vec<Message>> {
        let mut conn = self.conn().await?;
        let rows: Vec<MessageRow> = messages::table
            .filter(messages::conversation_id.eq(conversation_id))
            .order((messages::created_at.desc(), messages::id.desc()))
            .limit(limit as i64)
            .load(&mut conn)
            .await
            .map_err(storage_err)?;
        let mut messages = rows
            .into_iter()
            .map(map_message)
            .collect::<Result<Vec<_>>>()?;
        messages.reverse();
        Ok(messages)
    }

    async fn mark_read(
        &self,
        conversation_id: i32,
        reader_id: i32,
        read_at: i64,
    ) -> Result<usize> {
        let mut conn = self.conn().await?;
        diesel::update(
            messages::table
                .filter(messages::conversation_id.eq(conversation_id))
                .filter(messages::sender_id.ne(reader_id))
                .filter(messages::status.ne(MessageStatus::Read.as_str())),
        )
        .set((
            messages::status.eq(MessageStatus::Read.as_str()),
            messages::read_at.eq(Some(read_at)),
        ))
        .execute(&mut conn)
        .await
        .map_err(storage_err)
    }
}

#[async_trait]
impl NotificationStore for SqliteStore {
    async fn create_notification(&self, notification: NewNotification) -> Result<Notification> {
        let data = encode_json(notification.data.as_ref())?;
        let new = NewNotificationRow {
            user_id: notification.user_id,
            kind: &notification.kind,
            title: &notification.title,
            body: &notification.body,
            data: data.as_deref(),
            is_read: false,
            created_at: now_ts(),
        };
        let mut conn = self.conn().await?;
        diesel::insert_into(notifications::table)
            .values(&new)
            .execute(&mut conn)
            .await
            .map_err(storage_err)?;
        let id = Self::last_insert_id(&mut conn).await?;
        let row: NotificationRow = notifications::table
            .filter(notifications::id.eq(id))
            .first(&mut conn)
            .await
            .map_err(storage_err)?;
        Ok(map_notification(row))
    }

    async fn unread_notifications(&self, user_id: i32, limit: usize) -> Result<Vec<Notification>> {
        let mut conn = self.conn().await?;
        let rows: Vec<NotificationRow> = notifications::table
            .filter(notifications::user_id.eq(user_id))
            .filter(notifications::is_read.eq(false))
            .order((notifications::created_at.desc(), notifications::id.desc()))
            .limit(limit as i64)
            .load(&mut conn)
            .await
            .map_err(storage_err)?;
        Ok(rows.into_iter().map(map_notification).collect())
    }

    async fn mark_notification_read(&self, user_id: i32, id: i32) -> Result<bool> {
        let mut conn = self.conn().await?;
        let count = diesel::update(
            notifications::table
                .filter(notifications::id.eq(id))
                .filter(notifications::user_id.eq(user_id)),
        )
        .set(notifications::is_read.eq(true))
        .execute(&mut conn)
        .await
        .map_err(storage_err)?;
        Ok(count > 0)
    }
}
