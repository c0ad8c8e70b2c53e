use async_trait::async_trait;

use crate::domains::conversation::{Conversation, Message, MessageStatus, NewConversation, NewMessage};
use crate::domains::notification::{NewNotification, Notification};
use crate::domains::parcel::{NewParcel, Parcel, ParcelStatus};
use crate::domains::trip::{NewTrip, Trip};
use crate::domains::user::{NewUser, User, UserIdentity};
use crate::error::Result;

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn create_user(&self, user: NewUser) -> Result<User>;

    async fn get_user(&self, id: i32) -> Result<User>;

    async fn set_user_active(&self, id: i32, active: bool) -> Result<()>;

    /// Mints a fresh bearer credential. Only a digest of it is kept.
    async fn issue_token(&self, user_id: i32) -> Result<String>;
}

/// Resolves a bearer credential to the user it was issued for.
///
/// Unknown credentials and inactive users are both `Unauthorized`.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<UserIdentity>;
}

#[async_trait]
pub trait TripStore: Send + Sync {
    async fn create_trip(&self, user_id: i32, trip: NewTrip) -> Result<Trip>;

    async fn get_trip(&self, id: i32) -> Result<Trip>;

    async fn list_trips_by_user(&self, user_id: i32) -> Result<Vec<Trip>>;

    /// Active trips on the parcel's route, excluding the sender's own trips,
    /// departing within `window_days` of the pickup date when one is set.
    async fn candidate_trips(&self, parcel: &Parcel, window_days: i64) -> Result<Vec<Trip>>;
}

#[async_trait]
pub trait ParcelStore: Send + Sync {
    async fn create_parcel(&self, sender_id: i32, parcel: NewParcel) -> Result<Parcel>;

    async fn get_parcel(&self, id: i32) -> Result<Parcel>;

    async fn list_parcels_by_sender(&self, sender_id: i32) -> Result<Vec<Parcel>>;

    async fn set_parcel_status(&self, id: i32, status: ParcelStatus) -> Result<Parcel>;
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create_conversation(&self, conversation: NewConversation) -> Result<Conversation>;

    async fn get_conversation(&self, id: i32) -> Result<Conversation>;

    async fn is_participant(&self, conversation_id: i32, user_id: i32) -> Result<bool>;

    async fn participants(&self, conversation_id: i32) -> Result<Vec<i32>>;

    /// Stores the message with status `sent`.
    async fn create_message(&self, message: NewMessage) -> Result<Message>;

    /// Raises the status if `status` is further along and returns the
    /// status now stored, which may be ahead of the one requested.
    async fn set_message_status(
        &self,
        message_id: i32,
        status: MessageStatus,
    ) -> Result<MessageStatus>;

    /// Oldest first, at most `limit` of the most recent messages.
    async fn list_messages(&self, conversation_id: i32, limit: usize) -> Result<Vec<Message>>;

    /// Marks every not-yet-read message in the conversation that was not
    /// authored by `reader_id` as read. Returns how many changed.
    async fn mark_read(&self, conversation_id: i32, reader_id: i32, read_at: i64)
        -> Result<usize>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn create_notification(&self, notification: NewNotification) -> Result<Notification>;

    /// Newest first.
    async fn unread_notifications(&self, user_id: i32, limit: usize) -> Result<Vec<Notification>>;

    async fn mark_notification_read(&self, user_id: i32, id: i32) -> Result<bool>;
}

/// Everything the relay and the HTTP layer need from persistence.
pub trait MarketplaceStore:
    UserDirectory + IdentityProvider + TripStore + ParcelStore + ConversationStore + NotificationStore
{
}

impl<T> MarketplaceStore for T where
    T: UserDirectory
        + IdentityProvider
        + TripStore
        + ParcelStore
        + ConversationStore
        + NotificationStore
{
}
