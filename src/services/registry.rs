use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::interfaces::registry::{ConnectionId, ConnectionRegistry};

#[derive(Default)]
struct Maps {
    by_user: HashMap<i32, ConnectionId>,
    by_connection: HashMap<ConnectionId, i32>,
}

/// Registry local to this process. Presence is not shared across workers.
#[derive(Default)]
pub struct InMemoryConnectionRegistry {
    maps: RwLock<Maps>,
}

impl InMemoryConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConnectionRegistry for InMemoryConnectionRegistry {
    async fn register(&self, user_id: i32, connection: ConnectionId) {
        let mut maps = self.maps.write().await;
        maps.by_user.insert(user_id, connection);
        maps.by_connection.insert(connection, user_id);
    }

    async fn unregister(&self, connection: ConnectionId) -> Option<i32> {
        let mut maps = self.maps.write().await;
        let user_id = maps.by_connection.remove(&connection)?;
        if maps.by_user.get(&user_id) == Some(&connection) {
            maps.by_user.remove(&user_id);
        }
        Some(user_id)
    }

    async fn connection_for(&self, user_id: i32) -> Option<ConnectionId> {
        self.maps.read().await.by_user.get(&user_id).copied()
    }

    async fn user_for(&self, connection: ConnectionId) -> Option<i32> {
        self.maps.read().await.by_connection.get(&connection).copied()
    }

    async fn online_users(&self) -> Vec<i32> {
        let mut users: Vec<i32> = self.maps.read().await.by_user.keys().copied().collect();
        users.sort_unstable();
        users
    }

    async fn connection_count(&self) -> usize {
        self.maps.read().await.by_connection.len()
    }
}
