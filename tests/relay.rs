mod common;

use std::sync::Arc;

use async_trait::async_trait;

use common::{drain, next_event, relay, user};
use parcel_exchange::domains::conversation::{
    Conversation, Message, MessageStatus, NewConversation, NewMessage,
};
use parcel_exchange::domains::events::{ClientEvent, SendMessagePayload, ServerEvent};
use parcel_exchange::domains::notification::NewNotification;
use parcel_exchange::domains::user::UserIdentity;
use parcel_exchange::interfaces::providers::{ConversationStore, NotificationStore};
use parcel_exchange::services::registry::InMemoryConnectionRegistry;
use parcel_exchange::{InMemoryStore, ParcelExchangeError, Relay, Result};

async fn conversation(store: &InMemoryStore, participants: Vec<i32>) -> i32 {
    store
        .create_conversation(NewConversation {
            parcel_id: None,
            trip_id: None,
            participants,
        })
        .await
        .unwrap()
        .id
}

fn send(conversation_id: i32, content: &str) -> ClientEvent {
    ClientEvent::SendMessage(SendMessagePayload {
        conversation_id,
        content: content.to_string(),
        message_type: Default::default(),
        metadata: None,
    })
}

fn assert_error(event: ServerEvent, expected_code: &str) {
    match event {
        ServerEvent::Error { code, .. } => assert_eq!(code, expected_code),
        other => panic!("expected error event, got {other:?}"),
    }
}

enum StatusFault {
    /// The recipient reads the message before the relay marks it delivered.
    ReadFirst { reader: i32 },
    /// Raising the status fails.
    Unwritable,
}

struct FaultyStatusStore {
    inner: Arc<InMemoryStore>,
    fault: StatusFault,
}

#[async_trait]
impl ConversationStore for FaultyStatusStore {
    async fn create_conversation(&self, conversation: NewConversation) -> Result<Conversation> {
        self.inner.create_conversation(conversation).await
    }

    async fn get_conversation(&self, id: i32) -> Result<Conversation> {
        self.inner.get_conversation(id).await
    }

    async fn is_participant(&self, conversation_id: i32, user_id: i32) -> Result<bool> {
        self.inner.is_participant(conversation_id, user_id).await
    }

    async fn participants(&self, conversation_id: i32) -> Result<Vec<i32>> {
        self.inner.participants(conversation_id).await
    }

    async fn create_message(&self, message: NewMessage) -> Result<Message> {
        let conversation_id = message.conversation_id;
        let created = self.inner.create_message(message).await?;
        if let StatusFault::ReadFirst { reader } = self.fault {
            self.inner.mark_read(conversation_id, reader, 42).await?;
        }
        Ok(created)
    }

    async fn set_message_status(
        &self,
        message_id: i32,
        status: MessageStatus,
    ) -> Result<MessageStatus> {
        match self.fault {
            StatusFault::Unwritable => Err(ParcelExchangeError::Storage("disk I/O error".to_string())),
            StatusFault::ReadFirst { .. } => self.inner.set_message_status(message_id, status).await,
        }
    }

    async fn list_messages(&self, conversation_id: i32, limit: usize) -> Result<Vec<Message>> {
        self.inner.list_messages(conversation_id, limit).await
    }

    async fn mark_read(&self, conversation_id: i32, reader_id: i32, read_at: i64) -> Result<usize> {
        self.inner.mark_read(conversation_id, reader_id, read_at).await
    }
}

/// Alice and Bob both joined to one conversation over a faulty status store.
async fn faulty_room(
    fault: impl FnOnce(i32) -> StatusFault,
) -> (
    Relay,
    Arc<InMemoryStore>,
    i32,
    u64,
    tokio::sync::mpsc::Receiver<ServerEvent>,
    tokio::sync::mpsc::Receiver<ServerEvent>,
) {
    let store = Arc::new(InMemoryStore::new());
    let (alice, _) = user(store.as_ref(), "Alice").await;
    let (bob, _) = user(store.as_ref(), "Bob").await;
    let cid = conversation(&store, vec![alice.id, bob.id]).await;
    let relay = Relay::new(
        Arc::new(FaultyStatusStore {
            inner: store.clone(),
            fault: fault(bob.id),
        }),
        store.clone(),
        Arc::new(InMemoryConnectionRegistry::new()),
    );

    let (alice_conn, mut alice_rx) = relay.connect(UserIdentity::from(&alice)).await;
    let (bob_conn, mut bob_rx) = relay.connect(UserIdentity::from(&bob)).await;
    relay
        .handle(alice_conn, ClientEvent::JoinConversation { conversation_id: cid })
        .await;
    relay
        .handle(bob_conn, ClientEvent::JoinConversation { conversation_id: cid })
        .await;
    drain(&mut alice_rx);
    drain(&mut bob_rx);
    (relay, store, cid, alice_conn, alice_rx, bob_rx)
}

#[tokio::test]
async fn connect_announces_session_and_presence() {
    let store = Arc::new(InMemoryStore::new());
    let (alice, _) = user(store.as_ref(), "Alice").await;
    let relay = relay(store.clone());

    let (conn, mut rx) = relay.connect(UserIdentity::from(&alice)).await;
    match next_event(&mut rx).await {
        ServerEvent::Connected {
            user_id,
            connection_id,
        } => {
            assert_eq!(user_id, alice.id);
            assert_eq!(connection_id, conn);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(relay.is_user_online(alice.id).await);
    assert_eq!(relay.online_users().await, vec![alice.id]);

    relay.disconnect(conn).await;
    assert!(!relay.is_user_online(alice.id).await);
    let stats = relay.stats().await;
    assert_eq!(stats.connections, 0);
    assert_eq!(stats.connected_users, 0);
}

#[tokio::test]
async fn non_participant_cannot_join_or_mark_read() {
    let store = Arc::new(InMemoryStore::new());
    let (alice, _) = user(store.as_ref(), "Alice").await;
    let (bob, _) = user(store.as_ref(), "Bob").await;
    let (carol, _) = user(store.as_ref(), "Carol").await;
    let cid = conversation(&store, vec![alice.id, bob.id]).await;
    let relay = relay(store.clone());

    let (alice_conn, mut alice_rx) = relay.connect(UserIdentity::from(&alice)).await;
    next_event(&mut alice_rx).await;
    relay.handle(alice_conn, send(cid, "hello bob")).await;

    let (carol_conn, mut carol_rx) = relay.connect(UserIdentity::from(&carol)).await;
    next_event(&mut carol_rx).await;
    relay
        .handle(carol_conn, ClientEvent::JoinConversation { conversation_id: cid })
        .await;
    match next_event(&mut carol_rx).await {
        ServerEvent::Error { code, event, .. } => {
            assert_eq!(code, "forbidden");
            assert_eq!(event.as_deref(), Some("join_conversation"));
        }
        other => panic!("unexpected {other:?}"),
    }

    assert!(relay.stats().await.rooms.is_empty());
    let messages = store.list_messages(cid, 10).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].status, MessageStatus::Sent);
    assert!(messages[0].read_at.is_none());
}

#[tokio::test]
async fn joining_marks_earlier_messages_read() {
    let store = Arc::new(InMemoryStore::new());
    let (alice, _) = user(store.as_ref(), "Alice").await;
    let (bob, _) = user(store.as_ref(), "Bob").await;
    let cid = conversation(&store, vec![alice.id, bob.id]).await;
    let relay = relay(store.clone());

    let (alice_conn, mut alice_rx) = relay.connect(UserIdentity::from(&alice)).await;
    next_event(&mut alice_rx).await;
    relay
        .handle(alice_conn, ClientEvent::JoinConversation { conversation_id: cid })
        .await;
    relay.handle(alice_conn, send(cid, "  parcel is ready  ")).await;
    let events = drain(&mut alice_rx);
    assert!(matches!(
        events[0],
        ServerEvent::JoinedConversation { marked_read: 0, .. }
    ));
    match &events[1] {
        ServerEvent::NewMessage(message) => {
            assert_eq!(message.content, "parcel is ready");
            assert_eq!(message.status, MessageStatus::Sent);
        }
        other => panic!("unexpected {other:?}"),
    }

    let (bob_conn, mut bob_rx) = relay.connect(UserIdentity::from(&bob)).await;
    next_event(&mut bob_rx).await;
    relay
        .handle(bob_conn, ClientEvent::JoinConversation { conversation_id: cid })
        .await;
    assert!(matches!(
        next_event(&mut bob_rx).await,
        ServerEvent::JoinedConversation { marked_read: 1, .. }
    ));
    match next_event(&mut alice_rx).await {
        ServerEvent::MessagesRead {
            reader_id, count, ..
        } => {
            assert_eq!(reader_id, bob.id);
            assert_eq!(count, 1);
        }
        other => panic!("unexpected {other:?}"),
    }

    let messages = store.list_messages(cid, 10).await.unwrap();
    assert_eq!(messages[0].status, MessageStatus::Read);
    assert!(messages[0].read_at.is_some());
}

#[tokio::test]
async fn message_is_delivered_when_recipient_is_in_room() {
    let store = Arc::new(InMemoryStore::new());
    let (alice, _) = user(store.as_ref(), "Alice").await;
    let (bob, _) = user(store.as_ref(), "Bob").await;
    let cid = conversation(&store, vec![alice.id, bob.id]).await;
    let relay = relay(store.clone());

    let (alice_conn, mut alice_rx) = relay.connect(UserIdentity::from(&alice)).await;
    let (bob_conn, mut bob_rx) = relay.connect(UserIdentity::from(&bob)).await;
    relay
        .handle(alice_conn, ClientEvent::JoinConversation { conversation_id: cid })
        .await;
    relay
        .handle(bob_conn, ClientEvent::JoinConversation { conversation_id: cid })
        .await;
    drain(&mut alice_rx);
    drain(&mut bob_rx);

    relay.handle(alice_conn, send(cid, "on my way")).await;
    for rx in [&mut alice_rx, &mut bob_rx] {
        match next_event(rx).await {
            ServerEvent::NewMessage(message) => {
                assert_eq!(message.sender_id, alice.id);
                assert_eq!(message.status, MessageStatus::Delivered);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
    let stored = store.list_messages(cid, 10).await.unwrap();
    assert_eq!(stored[0].status, MessageStatus::Delivered);
    // Bob saw it live, so nothing is queued for him.
    assert!(store.unread_notifications(bob.id, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn broadcast_carries_the_stored_status() {
    let (relay, store, cid, alice_conn, mut alice_rx, mut bob_rx) =
        faulty_room(|bob| StatusFault::ReadFirst { reader: bob }).await;

    relay.handle(alice_conn, send(cid, "already seen")).await;
    for rx in [&mut alice_rx, &mut bob_rx] {
        match next_event(rx).await {
            ServerEvent::NewMessage(message) => assert_eq!(message.status, MessageStatus::Read),
            other => panic!("unexpected {other:?}"),
        }
    }
    let stored = store.list_messages(cid, 10).await.unwrap();
    assert_eq!(stored[0].status, MessageStatus::Read);
    assert_eq!(stored[0].read_at, Some(42));
}

#[tokio::test]
async fn failed_delivery_mark_still_broadcasts_as_sent() {
    let (relay, store, cid, alice_conn, mut alice_rx, mut bob_rx) =
        faulty_room(|_| StatusFault::Unwritable).await;

    relay.handle(alice_conn, send(cid, "still here")).await;
    for rx in [&mut alice_rx, &mut bob_rx] {
        match next_event(rx).await {
            ServerEvent::NewMessage(message) => {
                assert_eq!(message.content, "still here");
                assert_eq!(message.status, MessageStatus::Sent);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
    assert!(drain(&mut alice_rx).is_empty());
    let stored = store.list_messages(cid, 10).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].status, MessageStatus::Sent);
}

#[tokio::test]
async fn broadcasts_follow_acceptance_order() {
    let store = Arc::new(InMemoryStore::new());
    let (alice, _) = user(store.as_ref(), "Alice").await;
    let (bob, _) = user(store.as_ref(), "Bob").await;
    let cid = conversation(&store, vec![alice.id, bob.id]).await;
    let relay = Arc::new(relay(store.clone()));

    let (alice_conn, _alice_rx) = relay.connect(UserIdentity::from(&alice)).await;
    let (bob_conn, mut bob_rx) = relay.connect(UserIdentity::from(&bob)).await;
    relay
        .handle(bob_conn, ClientEvent::JoinConversation { conversation_id: cid })
        .await;
    drain(&mut bob_rx);

    let mut handles = Vec::new();
    for i in 0..20 {
        let relay = relay.clone();
        handles.push(tokio::spawn(async move {
            relay.handle(alice_conn, send(cid, &format!("m{i}"))).await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let received: Vec<i32> = drain(&mut bob_rx)
        .into_iter()
        .filter_map(|event| match event {
            ServerEvent::NewMessage(message) => Some(message.id),
            _ => None,
        })
        .collect();
    let stored: Vec<i32> = store
        .list_messages(cid, 50)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(received.len(), 20);
    assert_eq!(received, stored);
}

#[tokio::test]
async fn non_participant_send_is_forbidden_and_not_stored() {
    let store = Arc::new(InMemoryStore::new());
    let (alice, _) = user(store.as_ref(), "Alice").await;
    let (bob, _) = user(store.as_ref(), "Bob").await;
    let (mallory, _) = user(store.as_ref(), "Mallory").await;
    let cid = conversation(&store, vec![alice.id, bob.id]).await;
    let relay = relay(store.clone());

    let (conn, mut rx) = relay.connect(UserIdentity::from(&mallory)).await;
    next_event(&mut rx).await;
    relay.handle(conn, send(cid, "let me in")).await;
    assert_error(next_event(&mut rx).await, "forbidden");

    assert!(store.list_messages(cid, 10).await.unwrap().is_empty());
    assert!(store.unread_notifications(bob.id, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn invalid_content_and_frames_are_rejected() {
    let store = Arc::new(InMemoryStore::new());
    let (alice, _) = user(store.as_ref(), "Alice").await;
    let (bob, _) = user(store.as_ref(), "Bob").await;
    let cid = conversation(&store, vec![alice.id, bob.id]).await;
    let relay = relay(store.clone());

    let (conn, mut rx) = relay.connect(UserIdentity::from(&alice)).await;
    next_event(&mut rx).await;

    relay.handle(conn, send(cid, "   ")).await;
    assert_error(next_event(&mut rx).await, "invalid_payload");

    relay.handle(conn, send(cid, &"x".repeat(5_001))).await;
    assert_error(next_event(&mut rx).await, "invalid_payload");

    relay.handle_text(conn, "{not json").await;
    match next_event(&mut rx).await {
        ServerEvent::Error { code, event, .. } => {
            assert_eq!(code, "invalid_payload");
            assert!(event.is_none());
        }
        other => panic!("unexpected {other:?}"),
    }

    relay
        .handle_text(conn, r#"{"event":"send_message","data":{"conversation_id":"one"}}"#)
        .await;
    assert_error(next_event(&mut rx).await, "invalid_payload");

    assert!(store.list_messages(cid, 10).await.unwrap().is_empty());
    assert!(relay.is_user_online(alice.id).await);
}

#[tokio::test]
async fn typing_is_relayed_to_other_room_members_only() {
    let store = Arc::new(InMemoryStore::new());
    let (alice, _) = user(store.as_ref(), "Alice").await;
    let (bob, _) = user(store.as_ref(), "Bob").await;
    let cid = conversation(&store, vec![alice.id, bob.id]).await;
    let relay = relay(store.clone());

    let (alice_conn, mut alice_rx) = relay.connect(UserIdentity::from(&alice)).await;
    let (bob_conn, mut bob_rx) = relay.connect(UserIdentity::from(&bob)).await;
    drain(&mut alice_rx);
    drain(&mut bob_rx);

    relay
        .handle(alice_conn, ClientEvent::TypingStart { conversation_id: cid })
        .await;
    assert!(drain(&mut alice_rx).is_empty());
    assert!(drain(&mut bob_rx).is_empty());

    relay
        .handle(alice_conn, ClientEvent::JoinConversation { conversation_id: cid })
        .await;
    relay
        .handle(bob_conn, ClientEvent::JoinConversation { conversation_id: cid })
        .await;
    drain(&mut alice_rx);
    drain(&mut bob_rx);

    relay
        .handle(alice_conn, ClientEvent::TypingStart { conversation_id: cid })
        .await;
    match next_event(&mut bob_rx).await {
        ServerEvent::UserTyping {
            user_id,
            name,
            typing,
            ..
        } => {
            assert_eq!(user_id, alice.id);
            assert_eq!(name, "Alice");
            assert!(typing);
        }
        other => panic!("unexpected {other:?}"),
    }
    relay
        .handle(alice_conn, ClientEvent::TypingStop { conversation_id: cid })
        .await;
    assert!(matches!(
        next_event(&mut bob_rx).await,
        ServerEvent::UserTyping { typing: false, .. }
    ));
    assert!(drain(&mut alice_rx).is_empty());

    relay
        .handle(bob_conn, ClientEvent::LeaveConversation { conversation_id: cid })
        .await;
    assert!(matches!(
        next_event(&mut bob_rx).await,
        ServerEvent::LeftConversation { .. }
    ));
    relay
        .handle(alice_conn, ClientEvent::TypingStart { conversation_id: cid })
        .await;
    assert!(drain(&mut bob_rx).is_empty());
}

#[tokio::test]
async fn absent_participants_are_notified() {
    let store = Arc::new(InMemoryStore::new());
    let (alice, _) = user(store.as_ref(), "Alice").await;
    let (bob, _) = user(store.as_ref(), "Bob").await;
    let (carol, _) = user(store.as_ref(), "Carol").await;
    let cid = conversation(&store, vec![alice.id, bob.id, carol.id]).await;
    let relay = relay(store.clone());

    let (alice_conn, mut alice_rx) = relay.connect(UserIdentity::from(&alice)).await;
    let (_bob_conn, mut bob_rx) = relay.connect(UserIdentity::from(&bob)).await;
    drain(&mut alice_rx);
    drain(&mut bob_rx);

    relay.handle(alice_conn, send(cid, "pickup at noon")).await;

    match next_event(&mut bob_rx).await {
        ServerEvent::Notification {
            kind, title, body, ..
        } => {
            assert_eq!(kind, "new_message");
            assert_eq!(title, "New message from Alice");
            assert_eq!(body, "pickup at noon");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(store.unread_notifications(bob.id, 10).await.unwrap().is_empty());

    let queued = store.unread_notifications(carol.id, 10).await.unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].kind, "new_message");
    assert!(store.unread_notifications(alice.id, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn unread_notifications_are_capped_newest_first() {
    let store = Arc::new(InMemoryStore::new());
    let (alice, _) = user(store.as_ref(), "Alice").await;
    for i in 0..12 {
        store
            .create_notification(NewNotification {
                user_id: alice.id,
                kind: "trip_match".to_string(),
                title: format!("n{i}"),
                body: String::new(),
                data: None,
            })
            .await
            .unwrap();
    }
    let relay = relay(store.clone());
    let (conn, mut rx) = relay.connect(UserIdentity::from(&alice)).await;
    next_event(&mut rx).await;

    relay
        .handle_text(conn, r#"{"event":"get_unread_notifications"}"#)
        .await;
    match next_event(&mut rx).await {
        ServerEvent::UnreadNotifications { notifications } => {
            assert_eq!(notifications.len(), 10);
            assert_eq!(notifications[0].title, "n11");
            assert_eq!(notifications[9].title, "n2");
        }
        other => panic!("unexpected {other:?}"),
    }

    relay
        .handle_text(conn, r#"{"event":"get_unread_notifications","data":{}}"#)
        .await;
    match next_event(&mut rx).await {
        ServerEvent::UnreadNotifications { notifications } => {
            assert_eq!(notifications.len(), 10);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn send_to_user_and_broadcast_reach_live_sessions() {
    let store = Arc::new(InMemoryStore::new());
    let (alice, _) = user(store.as_ref(), "Alice").await;
    let (bob, _) = user(store.as_ref(), "Bob").await;
    let relay = relay(store.clone());

    let (_a, mut alice_rx) = relay.connect(UserIdentity::from(&alice)).await;
    let (bob_conn, mut bob_rx) = relay.connect(UserIdentity::from(&bob)).await;
    drain(&mut alice_rx);
    drain(&mut bob_rx);

    let notice = ServerEvent::Notification {
        kind: "system".to_string(),
        title: "maintenance".to_string(),
        body: String::new(),
        data: None,
    };
    assert!(relay.send_to_user(bob.id, notice.clone()).await);
    assert_eq!(drain(&mut bob_rx).len(), 1);
    assert!(drain(&mut alice_rx).is_empty());

    assert_eq!(relay.broadcast_all(notice.clone()).await, 2);

    relay.disconnect(bob_conn).await;
    assert!(!relay.send_to_user(bob.id, notice).await);
}
