use async_trait::async_trait;

pub type ConnectionId = u64;

/// Maps online users to their live connection and back.
///
/// A user has at most one entry: registering again replaces the previous
/// connection. Implementations backed by a shared store make
/// "deliver to user" work across processes.
#[async_trait]
pub trait ConnectionRegistry: Send + Sync {
    async fn register(&self, user_id: i32, connection: ConnectionId);

    /// Removes the connection. The user entry is only cleared when it still
    /// points at this connection. Returns the user the connection belonged to.
    async fn unregister(&self, connection: ConnectionId) -> Option<i32>;

    async fn connection_for(&self, user_id: i32) -> Option<ConnectionId>;

    async fn user_for(&self, connection: ConnectionId) -> Option<i32>;

    async fn online_users(&self) -> Vec<i32>;

    async fn connection_count(&self) -> usize;

    async fn is_online(&self, user_id: i32) -> bool {
        self.connection_for(user_id).await.is_some()
    }
}
