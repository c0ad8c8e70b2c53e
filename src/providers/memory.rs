use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::auth::{generate_token, hash_token};
use crate::domains::conversation::{
    Conversation, Message, MessageStatus, NewConversation, NewMessage,
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

#[derive(Default)]
struct State {
    next_id: i32,
    users: HashMap<i32, User>,
    tokens: HashMap<String, i32>,
    trips: Vec<Trip>,
    parcels: HashMap<i32, Parcel>,
    conversations: HashMap<i32, Conversation>,
    messages: Vec<Message>,
    notifications: Vec<Notification>,
}

impl State {
    fn next_id(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }

    fn with_owner(&self, mut trip: Trip) -> Trip {
        if let Some(owner) = self.users.get(&trip.user_id) {
            trip.owner_rating = owner.rating;
            trip.owner_verified = owner.identity_verified;
        }
        trip
    }
}

/// Process-local store with the same behaviour as the SQLite one.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn now_ts() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[async_trait]
impl UserDirectory for InMemoryStore {
    async fn create_user(&self, user: NewUser) -> Result<User> {
        let mut state = self.state.write().await;
        let id = state.next_id();
        let user = User {
            id,
            name: user.name,
            email: user.email,
            rating: user.rating,
            identity_verified: user.identity_verified,
            active: true,
            created_at: now_ts(),
        };
        state.users.insert(id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: i32) -> Result<User> {
        let state = self.state.read().await;
        state
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| ParcelExchangeError::NotFound(format!("user {id}")))
    }

    async fn set_user_active(&self, id: i32, active: bool) -> Result<()> {
        let mut state = self.state.write().await;
        let user = state
            .users
            .get_mut(&id)
            .ok_or_else(|| ParcelExchangeError::NotFound(format!("user {id}")))?;
        user.active = active;
        Ok(())
    }

    async fn issue_token(&self, user_id: i32) -> Result<String> {
        let mut state = self.state.write().await;
        if !state.users.contains_key(&user_id) {
            return Err(ParcelExchangeError::NotFound(format!("user {user_id}")));
        }
        let token = generate_token();
        state.tokens.insert(hash_token(&token), user_id);
        Ok(token)
    }
}

#[async_trait]
impl IdentityProvider for InMemoryStore {
    async fn authenticate(&self, token: &str) -> Result<UserIdentity> {
        let state = self.state.read().await;
        let user = state
            .tokens
            .get(&hash_token(token))
            .and_then(|id| state.users.get(id))
            .ok_or_else(|| ParcelExchangeError::Unauthorized("invalid token".to_string()))?;
        if !user.active {
            return Err(ParcelExchangeError::Unauthorized(
                "account is inactive".to_string(),
            ));
        }
        Ok(UserIdentity::from(user))
    }
}

#[async_trait]
impl TripStore for InMemoryStore {
    async fn create_trip(&self, user_id: i32, trip: NewTrip) -> Result<Trip> {
        trip.validate()?;
        let mut state = self.state.write().await;
        if !state.users.contains_key(&user_id) {
            return Err(ParcelExchangeError::NotFound(format!("user {user_id}")));
        }
        let id = state.next_id();
        let trip = Trip {
            id,
            user_id,
            departure_city: trip.departure_city.trim().to_string(),
            arrival_city: trip.arrival_city.trim().to_string(),
            departure_at: trip.departure_at,
            arrival_at: trip.arrival_at,
            available_weight: trip.available_weight,
            price_per_kg: trip.price_per_kg,
            status: TripStatus::Active,
            owner_rating: None,
            owner_verified: false,
            created_at: now_ts(),
        };
        state.trips.push(trip.clone());
        Ok(state.with_owner(trip))
    }

    async fn get_trip(&self, id: i32) -> Result<Trip> {
        let state = self.state.read().await;
        state
            .trips
            .iter()
            .find(|trip| trip.id == id)
            .cloned()
            .map(|trip| state.with_owner(trip))
            .ok_or_else(|| ParcelExchangeError::NotFound(format!("trip {id}")))
    }

    async fn list_trips_by_user(&self, user_id: i32) -> Result<Vec<Trip>> {
        let state = self.state.read().await;
        Ok(state
            .trips
            .iter()
            .filter(|trip| trip.user_id == user_id)
            .cloned()
            .map(|trip| state.with_owner(trip))
            .collect())
    }

    async fn candidate_trips(&self, parcel: &Parcel, window_days: i64) -> Result<Vec<Trip>> {
        let state = self.state.read().await;
        let mut trips: Vec<Trip> = state
            .trips
            .iter()
            .filter(|trip| matching::is_candidate(parcel, trip, window_days))
            .cloned()
            .map(|trip| state.with_owner(trip))
            .collect();
        trips.sort_by_key(|trip| (trip.departure_at, trip.id));
        Ok(trips)
    }
}

#[async_trait]
impl ParcelStore for InMemoryStore {
    async fn create_parcel(&self, sender_id: i32, parcel: NewParcel) -> Result<Parcel> {
        parcel.validate()?;
        let mut state = self.state.write().await;
        if !state.users.contains_key(&sender_id) {
            return Err(ParcelExchangeError::NotFound(format!("user {sender_id}")));
        }
        let id = state.next_id();
        let now = now_ts();
        let parcel = Parcel {
            id,
            sender_id,
            pickup_city: parcel.pickup_city.trim().to_string(),
            delivery_city: parcel.delivery_city.trim().to_string(),
            pickup_date: parcel.pickup_date,
            weight: parcel.weight,
            max_price: parcel.max_price,
            description: parcel.description,
            status: ParcelStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        state.parcels.insert(id, parcel.clone());
        Ok(parcel)
    }

    async fn get_parcel(&self, id: i32) -> Result<Parcel> {
        let state = self.state.read().await;
        state
            .parcels
            .get(&id)
            .cloned()
            .ok_or_else(|| ParcelExchangeError::NotFound(format!("parcel {id}")))
    }

    async fn list_parcels_by_sender(&self, sender_id: i32) -> Result<Vec<Parcel>> {
        let state = self.state.read().await;
        let mut parcels: Vec<Parcel> = state
            .parcels
            .values()
            .filter(|parcel| parcel.sender_id == sender_id)
            .cloned()
            .collect();
        parcels.sort_by_key(|parcel| parcel.id);
        Ok(parcels)
    }

    async fn set_parcel_status(&self, id: i32, status: ParcelStatus) -> Result<Parcel> {
        let mut state = self.state.write().await;
        let parcel = state
            .parcels
            .get_mut(&id)
            .ok_or_else(|| ParcelExchangeError::NotFound(format!("parcel {id}")))?;
        parcel.status = status;
        parcel.updated_at = now_ts();
        Ok(parcel.clone())
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn create_conversation(&self, conversation: NewConversation) -> Result<Conversation> {
        let mut state = self.state.write().await;
        let mut participants = conversation.participants;
        participants.sort_unstable();
        participants.dedup();
        if participants.is_empty() {
            return Err(ParcelExchangeError::Validation(
                "a conversation needs participants".to_string(),
            ));
        }
        let id = state.next_id();
        let conversation = Conversation {
            id,
            parcel_id: conversation.parcel_id,
            trip_id: conversation.trip_id,
            participants,
            created_at: now_ts(),
        };
        state.conversations.insert(id, conversation.clone());
        Ok(conversation)
    }

    async fn get_conversation(&self, id: i32) -> Result<Conversation> {
        let state = self.state.read().await;
        state
            .conversations
            .get(&id)
            .cloned()
            .ok_or_else(|| ParcelExchangeError::NotFound(format!("conversation {id}")))
    }

    async fn is_participant(&self, conversation_id: i32, user_id: i32) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state
            .conversations
            .get(&conversation_id)
            .is_some_and(|c| c.participants.contains(&user_id)))
    }

    async fn participants(&self, conversation_id: i32) -> Result<Vec<i32>> {
        let state = self.state.read().await;
        Ok(state
            .conversations
            .get(&conversation_id)
            .map(|c| c.participants.clone())
            .unwrap_or_default())
    }

    async fn create_message(&self, message: NewMessage) -> Result<Message> {
        let mut state = self.state.write().await;
        if !state.conversations.contains_key(&message.conversation_id) {
            return Err(ParcelExchangeError::NotFound(format!(
                "conversation {}",
                message.conversation_id
            )));
        }
        let id = state.next_id();
        let message = Message {
            id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            content: message.content,
            message_type: message.message_type,
            metadata: message.metadata,
            status: MessageStatus::Sent,
            read_at: None,
            created_at: now_ts(),
        };
        state.messages.push(message.clone());
        Ok(message)
    }

    async fn set_message_status(
        &self,
        message_id: i32,
        status: MessageStatus,
    ) -> Result<MessageStatus> {
        let mut state = self.state.write().await;
        let message = state
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or_else(|| ParcelExchangeError::NotFound(format!("message {message_id}")))?;
        if status > message.status {
            message.status = status;
        }
        Ok(message.status)
    }

    async fn list_messages(&self, conversation_id: i32, limit: usize) -> Result<Vec<Message>> {
        let state = self.state.read().await;
        let messages: Vec<Message> = state
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        let skip = messages.len().saturating_sub(limit);
        Ok(messages.into_iter().skip(skip).collect())
    }

    async fn mark_read(
        &self,
        conversation_id: i32,
        reader_id: i32,
        read_at: i64,
    ) -> Result<usize> {
        let mut state = self.state.write().await;
        let mut count = 0;
        for message in state.messages.iter_mut().filter(|m| {
            m.conversation_id == conversation_id
                && m.sender_id != reader_id
                && m.status != MessageStatus::Read
        }) {
            message.status = MessageStatus::Read;
            message.read_at = Some(read_at);
            count += 1;
        }
        Ok(count)
    }
}

#[async_trait]
impl NotificationStore for InMemoryStore {
    async fn create_notification(&self, notification: NewNotification) -> Result<Notification> {
        let mut state = self.state.write().await;
        let id = state.next_id();
        let notification = Notification {
            id,
            user_id: notification.user_id,
            kind: notification.kind,
            title: notification.title,
            body: notification.body,
            data: notification.data,
            read: false,
            created_at: now_ts(),
        };
        state.notifications.push(notification.clone());
        Ok(notification)
    }

    async fn unread_notifications(&self, user_id: i32, limit: usize) -> Result<Vec<Notification>> {
        let state = self.state.read().await;
        let mut unread: Vec<Notification> = state
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id && !n.read)
            .cloned()
            .collect();
        unread.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        unread.truncate(limit);
        Ok(unread)
    }

    async fn mark_notification_read(&self, user_id: i32, id: i32) -> Result<bool> {
        let mut state = self.state.write().await;
        match state
            .notifications
            .iter_mut()
            .find(|n| n.id == id && n.user_id == user_id)
        {
            Some(notification) => {
                notification.read = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
