//! Room registry: in-memory fan-out state for the relay.
//!
//! One room per chat channel id.  A connection registers once, may join any
//! number of rooms, and is swept out of all of them on disconnect.  Nothing
//! here is durable; a reconnecting client re-joins its rooms.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use kabu_core::RelayPublisher;
use kabu_shared::protocol::ServerEvent;
use kabu_shared::types::{ChannelId, UserId};

/// Identifier of one live socket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Connection {
    /// Set once the client announces itself with `userConnected`.
    user_id: Option<UserId>,
    tx: mpsc::Sender<ServerEvent>,
    rooms: HashSet<ChannelId>,
}

#[derive(Default)]
struct Inner {
    connections: HashMap<ConnectionId, Connection>,
    rooms: HashMap<ChannelId, HashSet<ConnectionId>>,
}

#[derive(Clone)]
pub struct RoomRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
        }
    }

    /// Register a connection.  Returns its id and the receiver the socket
    /// writer drains.
    pub async fn connect(&self, buffer: usize) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(buffer);
        let id = ConnectionId::new();

        self.inner.write().await.connections.insert(
            id,
            Connection {
                user_id: None,
                tx,
                rooms: HashSet::new(),
            },
        );

        debug!(conn = %id, "connection registered");
        (id, rx)
    }

    /// Record which user a connection belongs to.
    pub async fn identify(&self, conn_id: ConnectionId, user_id: UserId) {
        let mut inner = self.inner.write().await;
        if let Some(connection) = inner.connections.get_mut(&conn_id) {
            info!(conn = %conn_id, user = %user_id, "user connected");
            connection.user_id = Some(user_id);
        }
    }

    /// Add a connection to a room, creating the room if needed.
    pub async fn join(&self, conn_id: ConnectionId, channel_id: ChannelId) {
        let mut inner = self.inner.write().await;
        if let Some(connection) = inner.connections.get_mut(&conn_id) {
            connection.rooms.insert(channel_id.clone());
        } else {
            warn!(conn = %conn_id, "join from unknown connection");
            return;
        }

        let members = inner.rooms.entry(channel_id.clone()).or_default();
        members.insert(conn_id);

        info!(
            room = %channel_id,
            conn = %conn_id,
            members = members.len(),
            "connection joined room"
        );
    }

    /// Broadcast an event to every member of a room, the sender included.
    pub async fn broadcast(&self, channel_id: &ChannelId, event: ServerEvent) {
        self.fan_out(channel_id, None, event).await;
    }

    /// Broadcast to every member except one connection (typing indicators).
    pub async fn broadcast_except(
        &self,
        channel_id: &ChannelId,
        except: ConnectionId,
        event: ServerEvent,
    ) {
        self.fan_out(channel_id, Some(except), event).await;
    }

    async fn fan_out(
        &self,
        channel_id: &ChannelId,
        except: Option<ConnectionId>,
        event: ServerEvent,
    ) {
        let inner = self.inner.read().await;
        let Some(members) = inner.rooms.get(channel_id) else {
            debug!(room = %channel_id, "broadcast to empty room");
            return;
        };

        for member in members {
            if Some(*member) == except {
                continue;
            }
            let Some(connection) = inner.connections.get(member) else {
                continue;
            };
            if connection.tx.try_send(event.clone()).is_err() {
                debug!(
                    room = %channel_id,
                    conn = %member,
                    "dropping event for slow connection"
                );
            }
        }
    }

    /// Remove a connection from every room it joined and from presence.
    /// Rooms left empty are deleted.
    pub async fn disconnect(&self, conn_id: ConnectionId) {
        let mut inner = self.inner.write().await;
        let Some(connection) = inner.connections.remove(&conn_id) else {
            return;
        };

        for channel_id in &connection.rooms {
            let remove_room = match inner.rooms.get_mut(channel_id) {
                Some(members) => {
                    members.remove(&conn_id);
                    members.is_empty()
                }
                None => false,
            };
            if remove_room {
                inner.rooms.remove(channel_id);
                info!(room = %channel_id, "removed empty room");
            }
        }

        match connection.user_id {
            Some(user_id) => info!(conn = %conn_id, user = %user_id, "user disconnected"),
            None => debug!(conn = %conn_id, "connection closed"),
        }
    }

    pub async fn member_count(&self, channel_id: &ChannelId) -> usize {
        self.inner
            .read()
            .await
            .rooms
            .get(channel_id)
            .map(|members| members.len())
            .unwrap_or(0)
    }

    pub async fn room_count(&self) -> usize {
        self.inner.read().await.rooms.len()
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    /// Users currently announced on an open connection.
    pub async fn online_users(&self) -> Vec<UserId> {
        self.inner
            .read()
            .await
            .connections
            .values()
            .filter_map(|c| c.user_id.clone())
            .collect()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// In-process publish path for the durable chat manager: the event is handed
/// to the fan-out without blocking the caller.
impl RelayPublisher for RoomRegistry {
    fn publish(&self, channel_id: &ChannelId, event: ServerEvent) {
        let registry = self.clone();
        let channel_id = channel_id.clone();
        tokio::spawn(async move {
            registry.broadcast(&channel_id, event).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_message(text: &str) -> ServerEvent {
        ServerEvent::NewMessage {
            id: Uuid::new_v4().to_string(),
            text: text.to_string(),
            sender_id: UserId::new("u1"),
            timestamp: 0,
            read: false,
        }
    }

    #[tokio::test]
    async fn test_join_and_disconnect() {
        let registry = RoomRegistry::new();
        let room = ChannelId("ride_r1".to_string());

        let (conn, _rx) = registry.connect(8).await;
        registry.join(conn, room.clone()).await;
        assert_eq!(registry.member_count(&room).await, 1);

        registry.disconnect(conn).await;
        assert_eq!(registry.member_count(&room).await, 0);
        assert_eq!(registry.room_count().await, 0, "empty room is deleted");
        assert_eq!(registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_broadcast_includes_the_sender() {
        let registry = RoomRegistry::new();
        let room = ChannelId("ride_r1".to_string());

        let (sender, mut sender_rx) = registry.connect(8).await;
        let (receiver, mut receiver_rx) = registry.connect(8).await;
        registry.join(sender, room.clone()).await;
        registry.join(receiver, room.clone()).await;

        registry.broadcast(&room, new_message("hello")).await;

        assert!(sender_rx.try_recv().is_ok(), "sender gets its own message");
        assert!(receiver_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_typing_excludes_the_sender() {
        let registry = RoomRegistry::new();
        let room = ChannelId("ride_r1".to_string());

        let (sender, mut sender_rx) = registry.connect(8).await;
        let (receiver, mut receiver_rx) = registry.connect(8).await;
        registry.join(sender, room.clone()).await;
        registry.join(receiver, room.clone()).await;

        registry
            .broadcast_except(
                &room,
                sender,
                ServerEvent::UserTyping {
                    user_id: UserId::new("u1"),
                    is_typing: true,
                },
            )
            .await;

        assert!(sender_rx.try_recv().is_err());
        assert!(receiver_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_broadcast_does_not_cross_rooms() {
        let registry = RoomRegistry::new();
        let room_a = ChannelId("ride_a".to_string());
        let room_b = ChannelId("ride_b".to_string());

        let (a, mut a_rx) = registry.connect(8).await;
        let (b, mut b_rx) = registry.connect(8).await;
        registry.join(a, room_a.clone()).await;
        registry.join(b, room_b.clone()).await;

        registry.broadcast(&room_a, new_message("only for a")).await;

        assert!(a_rx.try_recv().is_ok());
        assert!(b_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_trait_fans_out_in_background() {
        let registry = RoomRegistry::new();
        let room = ChannelId("ride_r1".to_string());

        let (conn, mut rx) = registry.connect(8).await;
        registry.join(conn, room.clone()).await;

        RelayPublisher::publish(&registry, &room, new_message("hi"));

        // The publish is handed to a background task; wait for delivery.
        let event = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .expect("timely delivery")
            .expect("event");
        assert!(matches!(event, ServerEvent::NewMessage { .. }));
    }

    #[tokio::test]
    async fn test_presence_tracks_identified_users() {
        let registry = RoomRegistry::new();

        let (conn, _rx) = registry.connect(8).await;
        assert!(registry.online_users().await.is_empty());

        registry.identify(conn, UserId::new("u1")).await;
        assert_eq!(registry.online_users().await, vec![UserId::new("u1")]);

        registry.disconnect(conn).await;
        assert!(registry.online_users().await.is_empty());
    }
}
