use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::json;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::domains::conversation::{Message, MessageStatus, NewMessage};
use crate::domains::events::{ClientEvent, SendMessagePayload, ServerEvent};
use crate::domains::notification::NewNotification;
use crate::domains::user::UserIdentity;
use crate::error::{ParcelExchangeError, Result};
use crate::interfaces::providers::{ConversationStore, NotificationStore};
use crate::interfaces::registry::{ConnectionId, ConnectionRegistry};

pub const MAX_MESSAGE_CHARS: usize = 5_000;
pub const UNREAD_NOTIFICATION_LIMIT: usize = 10;
const DEFAULT_OUTBOUND_BUFFER: usize = 256;

struct Session {
    identity: UserIdentity,
    sender: mpsc::Sender<ServerEvent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelayStats {
    pub connected_users: usize,
    pub connections: usize,
    pub rooms: Vec<String>,
}

/// Authenticated realtime sessions, conversation rooms and event fan-out.
///
/// Every client event is handled to completion and failures are reported
/// back to the originating connection only.
pub struct Relay {
    conversations: Arc<dyn ConversationStore>,
    notifications: Arc<dyn NotificationStore>,
    registry: Arc<dyn ConnectionRegistry>,
    sessions: RwLock<HashMap<ConnectionId, Session>>,
    rooms: RwLock<HashMap<i32, HashSet<ConnectionId>>>,
    send_locks: Mutex<HashMap<i32, Arc<Mutex<()>>>>,
    next_connection: AtomicU64,
    outbound_buffer: usize,
}

fn room_name(conversation_id: i32) -> String {
    format!("conversation:{conversation_id}")
}

fn now_ts() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

impl Relay {
    pub fn new(
        conversations: Arc<dyn ConversationStore>,
        notifications: Arc<dyn NotificationStore>,
        registry: Arc<dyn ConnectionRegistry>,
    ) -> Self {
        Self {
            conversations,
            notifications,
            registry,
            sessions: RwLock::new(HashMap::new()),
            rooms: RwLock::new(HashMap::new()),
            send_locks: Mutex::new(HashMap::new()),
            next_connection: AtomicU64::new(1),
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
        }
    }

    pub fn with_outbound_buffer(mut self, size: usize) -> Self {
        self.outbound_buffer = size.max(1);
        self
    }

    /// Opens a session for an already authenticated user.
    pub async fn connect(
        &self,
        identity: UserIdentity,
    ) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let connection = self.next_connection.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.outbound_buffer);
        let user_id = identity.id;
        let _ = sender.try_send(ServerEvent::Connected {
            user_id,
            connection_id: connection,
        });
        self.sessions
            .write()
            .await
            .insert(connection, Session { identity, sender });
        self.registry.register(user_id, connection).await;
        info!(user_id, connection, "realtime session opened");
        (connection, receiver)
    }

    pub async fn disconnect(&self, connection: ConnectionId) {
        let removed = self.sessions.write().await.remove(&connection);
        {
            let mut rooms = self.rooms.write().await;
            rooms.retain(|_, members| {
                members.remove(&connection);
                !members.is_empty()
            });
        }
        let user_id = self.registry.unregister(connection).await;
        if removed.is_some() {
            info!(?user_id, connection, "realtime session closed");
        }
    }

    /// Parses and dispatches one text frame.
    pub async fn handle_text(&self, connection: ConnectionId, text: &str) {
        match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => self.handle(connection, event).await,
            Err(err) => {
                let err = ParcelExchangeError::Serialization(err.to_string());
                self.report(connection, None, &err).await;
            }
        }
    }

    pub async fn handle(&self, connection: ConnectionId, event: ClientEvent) {
        let name = event.name();
        let result = match event {
            ClientEvent::JoinConversation { conversation_id } => {
                self.join_conversation(connection, conversation_id).await
            }
            ClientEvent::LeaveConversation { conversation_id } => {
                self.leave_conversation(connection, conversation_id).await
            }
            ClientEvent::SendMessage(payload) => self.send_message(connection, payload).await,
            ClientEvent::TypingStart { conversation_id } => {
                self.typing(connection, conversation_id, true).await
            }
            ClientEvent::TypingStop { conversation_id } => {
                self.typing(connection, conversation_id, false).await
            }
            ClientEvent::GetUnreadNotifications(_) => {
                self.get_unread_notifications(connection).await
            }
        };
        if let Err(err) = result {
            self.report(connection, Some(name), &err).await;
        }
    }

    async fn report(&self, connection: ConnectionId, event: Option<&str>, err: &ParcelExchangeError) {
        warn!(connection, event, error = %err, "realtime event failed");
        self.send_to_connection(
            connection,
            ServerEvent::Error {
                code: err.code().to_string(),
                message: err.to_string(),
                event: event.map(str::to_string),
            },
        )
        .await;
    }

    async fn identity(&self, connection: ConnectionId) -> Result<UserIdentity> {
        self.sessions
            .read()
            .await
            .get(&connection)
            .map(|session| session.identity.clone())
            .ok_or_else(|| ParcelExchangeError::Unauthorized("unknown connection".to_string()))
    }

    pub async fn join_conversation(
        &self,
        connection: ConnectionId,
        conversation_id: i32,
    ) -> Result<()> {
        let identity = self.identity(connection).await?;
        if !self
            .conversations
            .is_participant(conversation_id, identity.id)
            .await?
        {
            return Err(ParcelExchangeError::Forbidden(format!(
                "not a participant of conversation {conversation_id}"
            )));
        }

        self.rooms
            .write()
            .await
            .entry(conversation_id)
            .or_default()
            .insert(connection);

        let read_at = now_ts();
        let marked_read = self
            .conversations
            .mark_read(conversation_id, identity.id, read_at)
            .await?;
        debug!(connection, conversation_id, marked_read, "joined conversation");

        self.send_to_connection(
            connection,
            ServerEvent::JoinedConversation {
                conversation_id,
                marked_read,
            },
        )
        .await;
        if marked_read > 0 {
            self.send_to_room(
                conversation_id,
                ServerEvent::MessagesRead {
                    conversation_id,
                    reader_id: identity.id,
                    count: marked_read,
                    read_at,
                },
                Some(connection),
            )
            .await;
        }
        Ok(())
    }

    pub async fn leave_conversation(
        &self,
        connection: ConnectionId,
        conversation_id: i32,
    ) -> Result<()> {
        {
            let mut rooms = self.rooms.write().await;
            if let Some(members) = rooms.get_mut(&conversation_id) {
                members.remove(&connection);
                if members.is_empty() {
                    rooms.remove(&conversation_id);
                }
            }
        }
        self.send_to_connection(connection, ServerEvent::LeftConversation { conversation_id })
            .await;
        Ok(())
    }

    pub async fn send_message(
        &self,
        connection: ConnectionId,
        payload: SendMessagePayload,
    ) -> Result<()> {
        let identity = self.identity(connection).await?;
        let content = payload.content.trim().to_string();
        if content.is_empty() {
            return Err(ParcelExchangeError::Validation(
                "message content is empty".to_string(),
            ));
        }
        if content.chars().count() > MAX_MESSAGE_CHARS {
            return Err(ParcelExchangeError::Validation(format!(
                "message exceeds {MAX_MESSAGE_CHARS} characters"
            )));
        }
        let conversation_id = payload.conversation_id;
        if !self
            .conversations
            .is_participant(conversation_id, identity.id)
            .await?
        {
            return Err(ParcelExchangeError::Forbidden(format!(
                "not a participant of conversation {conversation_id}"
            )));
        }

        // Holding the room lock from persist to fan-out keeps broadcast order
        // equal to acceptance order within a conversation.
        let lock = self.send_lock(conversation_id).await;
        let sent = {
            let _guard = lock.lock().await;
            self.persist_and_broadcast(
                &identity,
                NewMessage {
                    conversation_id,
                    sender_id: identity.id,
                    content,
                    message_type: payload.message_type,
                    metadata: payload.metadata,
                },
            )
            .await
        };
        self.release_send_lock(conversation_id, lock).await;
        let message = sent?;

        self.notify_absent_participants(&identity, conversation_id, message.id, &message.content)
            .await;
        Ok(())
    }

    async fn persist_and_broadcast(
        &self,
        sender: &UserIdentity,
        new: NewMessage,
    ) -> Result<Message> {
        let conversation_id = new.conversation_id;
        let mut message = self.conversations.create_message(new).await?;

        let members = self.room_members(conversation_id).await;
        let has_recipient = {
            let sessions = self.sessions.read().await;
            members.iter().any(|member| {
                sessions
                    .get(member)
                    .is_some_and(|s| s.identity.id != sender.id)
            })
        };
        if has_recipient {
            // A failed upgrade still broadcasts the message as sent.
            match self
                .conversations
                .set_message_status(message.id, MessageStatus::Delivered)
                .await
            {
                Ok(stored) => message.status = stored,
                Err(err) => {
                    warn!(message_id = message.id, error = %err, "could not mark message delivered");
                }
            }
        }

        self.send_to_room(conversation_id, ServerEvent::NewMessage(message.clone()), None)
            .await;
        Ok(message)
    }

    async fn notify_absent_participants(
        &self,
        sender: &UserIdentity,
        conversation_id: i32,
        message_id: i32,
        content: &str,
    ) {
        let participants = match self.conversations.participants(conversation_id).await {
            Ok(participants) => participants,
            Err(err) => {
                warn!(conversation_id, error = %err, "could not load participants");
                return;
            }
        };
        let members = self.room_members(conversation_id).await;
        let preview: String = content.chars().take(120).collect();
        let title = format!("New message from {}", sender.name);
        let data = json!({
            "conversation_id": conversation_id,
            "message_id": message_id,
            "sender_id": sender.id,
        });

        for user_id in participants.into_iter().filter(|id| *id != sender.id) {
            match self.registry.connection_for(user_id).await {
                Some(connection) if members.contains(&connection) => {}
                Some(_) => {
                    self.send_to_user(
                        user_id,
                        ServerEvent::Notification {
                            kind: "new_message".to_string(),
                            title: title.clone(),
                            body: preview.clone(),
                            data: Some(data.clone()),
                        },
                    )
                    .await;
                }
                None => {
                    let stored = self
                        .notifications
                        .create_notification(NewNotification {
                            user_id,
                            kind: "new_message".to_string(),
                            title: title.clone(),
                            body: preview.clone(),
                            data: Some(data.clone()),
                        })
                        .await;
                    if let Err(err) = stored {
                        warn!(user_id, conversation_id, error = %err, "could not store notification");
                    }
                }
            }
        }
    }

    pub async fn typing(
        &self,
        connection: ConnectionId,
        conversation_id: i32,
        typing: bool,
    ) -> Result<()> {
        let identity = self.identity(connection).await?;
        if !self.room_members(conversation_id).await.contains(&connection) {
            debug!(connection, conversation_id, "typing signal outside joined room ignored");
            return Ok(());
        }
        self.send_to_room(
            conversation_id,
            ServerEvent::UserTyping {
                conversation_id,
                user_id: identity.id,
                name: identity.name,
                typing,
            },
            Some(connection),
        )
        .await;
        Ok(())
    }

    pub async fn get_unread_notifications(&self, connection: ConnectionId) -> Result<()> {
        let identity = self.identity(connection).await?;
        let notifications = self
            .notifications
            .unread_notifications(identity.id, UNREAD_NOTIFICATION_LIMIT)
            .await?;
        self.send_to_connection(connection, ServerEvent::UnreadNotifications { notifications })
            .await;
        Ok(())
    }

    async fn send_lock(&self, conversation_id: i32) -> Arc<Mutex<()>> {
        self.send_locks
            .lock()
            .await
            .entry(conversation_id)
            .or_default()
            .clone()
    }

    /// Drops the conversation's lock entry once no other send holds it.
    /// Clones are only handed out under the map lock, so a count of one
    /// seen here cannot race with a new sender.
    async fn release_send_lock(&self, conversation_id: i32, lock: Arc<Mutex<()>>) {
        drop(lock);
        let mut locks = self.send_locks.lock().await;
        if locks
            .get(&conversation_id)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            locks.remove(&conversation_id);
        }
    }

    async fn room_members(&self, conversation_id: i32) -> HashSet<ConnectionId> {
        self.rooms
            .read()
            .await
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    async fn send_to_room(
        &self,
        conversation_id: i32,
        event: ServerEvent,
        exclude: Option<ConnectionId>,
    ) -> usize {
        let members = self.room_members(conversation_id).await;
        let sessions = self.sessions.read().await;
        let mut delivered = 0;
        for member in members {
            if Some(member) == exclude {
                continue;
            }
            if let Some(session) = sessions.get(&member) {
                if deliver(member, session, event.clone()) {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    async fn send_to_connection(&self, connection: ConnectionId, event: ServerEvent) -> bool {
        let sessions = self.sessions.read().await;
        sessions
            .get(&connection)
            .is_some_and(|session| deliver(connection, session, event))
    }

    /// Delivers to the user's live connection. Nothing is queued for
    /// offline users; returns whether the event was handed off.
    pub async fn send_to_user(&self, user_id: i32, event: ServerEvent) -> bool {
        match self.registry.connection_for(user_id).await {
            Some(connection) => self.send_to_connection(connection, event).await,
            None => false,
        }
    }

    pub async fn broadcast_all(&self, event: ServerEvent) -> usize {
        let sessions = self.sessions.read().await;
        sessions
            .iter()
            .filter(|(connection, session)| deliver(**connection, session, event.clone()))
            .count()
    }

    pub async fn is_user_online(&self, user_id: i32) -> bool {
        self.registry.is_online(user_id).await
    }

    pub async fn online_users(&self) -> Vec<i32> {
        self.registry.online_users().await
    }

    pub async fn stats(&self) -> RelayStats {
        let mut rooms: Vec<i32> = self.rooms.read().await.keys().copied().collect();
        rooms.sort_unstable();
        RelayStats {
            connected_users: self.registry.online_users().await.len(),
            connections: self.sessions.read().await.len(),
            rooms: rooms.into_iter().map(room_name).collect(),
        }
    }
}

fn deliver(connection: ConnectionId, session: &Session, event: ServerEvent) -> bool {
    match session.sender.try_send(event) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(connection, "outbound buffer full, dropping event");
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}
