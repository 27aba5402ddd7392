//! Chat channel manager.
//!
//! One durable channel per ride, append-only messages, per-role unread
//! counters on the channel document.  A message is persisted first and only
//! then handed to the relay; clients receiving both the relay broadcast and
//! the store snapshot deduplicate by message id (see [`ChatFeed`]).

use std::collections::HashSet;
use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use kabu_shared::notify::{NotificationKind, PushPayload};
use kabu_shared::protocol::ServerEvent;
use kabu_shared::types::{Actor, ChannelId, RideId, Role, UserId};
use kabu_shared::KabuError;
use kabu_store::{
    chat_doc, collections, message_collection, message_doc, now_ms, ChatChannel, Database,
    Direction, Filter, Message, Query, Subscription,
};

use crate::notify::Notifier;
use crate::relay::RelayPublisher;

/// Longest last-message preview stored on the channel document.
const PREVIEW_CHARS: usize = 120;

pub struct ChatService {
    db: Arc<Database>,
    relay: Arc<dyn RelayPublisher>,
    notifier: Arc<Notifier>,
}

impl ChatService {
    pub fn new(
        db: Arc<Database>,
        relay: Arc<dyn RelayPublisher>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            db,
            relay,
            notifier,
        }
    }

    /// Create the channel for a ride if it does not exist yet.  Idempotent:
    /// the id is derived from the ride, and the check-then-create runs in a
    /// transaction.
    pub fn ensure_channel(
        &self,
        ride_id: &RideId,
        driver_id: &UserId,
        passenger_id: &UserId,
    ) -> Result<ChatChannel, KabuError> {
        let channel_id = ChannelId::for_ride(ride_id);

        self.db.run_transaction(|tx| {
            if let Some(existing) = tx.get::<ChatChannel>(&chat_doc(&channel_id))? {
                return Ok(existing);
            }

            let channel = ChatChannel {
                id: channel_id.clone(),
                ride_id: *ride_id,
                driver_id: driver_id.clone(),
                passenger_id: passenger_id.clone(),
                created_at: now_ms(),
                last_message: None,
                last_message_at: None,
                unread_driver_messages: 0,
                unread_passenger_messages: 0,
            };
            tx.set(&chat_doc(&channel_id), &channel)?;
            Ok(channel)
        })
    }

    /// Append a message to a channel.
    ///
    /// The message, the channel's preview, and the recipient's unread
    /// counter are committed together; only after the commit is the message
    /// offered to the relay and the push gateway, both best-effort.
    pub fn post_message(
        &self,
        actor: &Actor,
        channel_id: &ChannelId,
        text: &str,
    ) -> Result<Message, KabuError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(KabuError::InvalidArgument(
                "message text is empty".to_string(),
            ));
        }

        let (message, recipient) = self.db.run_transaction(|tx| {
            let mut channel: ChatChannel = tx
                .get(&chat_doc(channel_id))?
                .ok_or_else(|| KabuError::NotFound(format!("channel {channel_id}")))?;

            let recipient_role = if actor.user_id == channel.driver_id {
                Role::Passenger
            } else if actor.user_id == channel.passenger_id {
                Role::Driver
            } else {
                return Err(KabuError::InvalidArgument(
                    "sender is not a channel participant".to_string(),
                ));
            };

            let message = Message {
                id: Uuid::new_v4(),
                channel_id: channel_id.clone(),
                sender_id: actor.user_id.clone(),
                text: text.to_string(),
                timestamp: now_ms(),
                read: false,
            };

            channel.last_message = Some(preview(text));
            channel.last_message_at = Some(message.timestamp);
            let recipient = match recipient_role {
                Role::Driver => {
                    channel.unread_driver_messages += 1;
                    channel.driver_id.clone()
                }
                Role::Passenger => {
                    channel.unread_passenger_messages += 1;
                    channel.passenger_id.clone()
                }
            };

            tx.set(&message_doc(channel_id, &message.id), &message)?;
            tx.set(&chat_doc(channel_id), &channel)?;
            Ok((message, recipient))
        })?;

        info!(channel = %channel_id, message = %message.id, sender = %actor.user_id, "message posted");

        // Durable write is committed; everything below is best-effort.
        self.relay.publish(
            channel_id,
            ServerEvent::NewMessage {
                id: message.id.to_string(),
                text: message.text.clone(),
                sender_id: message.sender_id.clone(),
                timestamp: message.timestamp.timestamp_millis(),
                read: false,
            },
        );
        self.notifier.notify(
            &recipient,
            &actor.user_id,
            NotificationKind::Chat {
                channel_id: channel_id.clone(),
            },
            PushPayload::new("New Message", message.text.clone()),
        );

        Ok(message)
    }

    /// Reset the caller's unread counter on one channel.
    pub fn mark_read(&self, actor: &Actor, channel_id: &ChannelId) -> Result<(), KabuError> {
        self.db.run_transaction(|tx| {
            let mut channel: ChatChannel = tx
                .get(&chat_doc(channel_id))?
                .ok_or_else(|| KabuError::NotFound(format!("channel {channel_id}")))?;

            if actor.user_id == channel.driver_id {
                channel.unread_driver_messages = 0;
            } else if actor.user_id == channel.passenger_id {
                channel.unread_passenger_messages = 0;
            } else {
                return Err(KabuError::InvalidArgument(
                    "reader is not a channel participant".to_string(),
                ));
            }

            tx.set(&chat_doc(channel_id), &channel)?;
            Ok(())
        })
    }

    /// Reset the caller's unread counter on every channel they belong to,
    /// in one transaction.  Returns how many channels were reset.
    pub fn mark_all_read(&self, actor: &Actor) -> Result<usize, KabuError> {
        self.db.run_transaction(|tx| {
            let channels: Vec<ChatChannel> = tx.query(&Self::channels_query(actor))?;

            let mut reset = 0;
            for mut channel in channels {
                if channel.unread_for(actor.role) == 0 {
                    continue;
                }
                match actor.role {
                    Role::Driver => channel.unread_driver_messages = 0,
                    Role::Passenger => channel.unread_passenger_messages = 0,
                }
                tx.set(&chat_doc(&channel.id), &channel)?;
                reset += 1;
            }
            Ok(reset)
        })
    }

    /// The caller's channels, most recently created first.
    pub fn list_channels(&self, actor: &Actor) -> Result<Vec<ChatChannel>, KabuError> {
        Ok(self.db.query(&Self::channels_query(actor))?)
    }

    /// Messages of a channel in delivery order: ascending server timestamp,
    /// insertion sequence breaking ties.
    pub fn messages(&self, channel_id: &ChannelId) -> Result<Vec<Message>, KabuError> {
        Ok(self.db.query(&Self::messages_query(channel_id))?)
    }

    /// Live snapshots of a channel's messages.  Drop the subscription when
    /// leaving the conversation.
    pub fn watch_messages(&self, channel_id: &ChannelId) -> Subscription<Message> {
        self.db.subscribe(Self::messages_query(channel_id))
    }

    fn channels_query(actor: &Actor) -> Query {
        let field = match actor.role {
            Role::Driver => "driverId",
            Role::Passenger => "passengerId",
        };
        Query::collection(collections::CHATS)
            .filter(Filter::eq(field, actor.user_id.as_str()))
            .order_by("createdAt", Direction::Desc)
    }

    fn messages_query(channel_id: &ChannelId) -> Query {
        Query::collection(message_collection(channel_id)).order_by("timestamp", Direction::Asc)
    }
}

fn preview(text: &str) -> String {
    text.chars().take(PREVIEW_CHARS).collect()
}

// ---------------------------------------------------------------------------
// ChatFeed
// ---------------------------------------------------------------------------

/// Client-side view of a conversation fed by two independent paths: store
/// snapshots (authoritative, at-least-once) and relay broadcasts (fast,
/// lossy).  Both can deliver the same message, so everything is keyed by
/// message id.  Messages are kept ascending by timestamp, arrival order
/// breaking ties.
pub struct ChatFeed {
    channel_id: ChannelId,
    messages: Vec<Message>,
}

impl ChatFeed {
    pub fn new(channel_id: ChannelId) -> Self {
        Self {
            channel_id,
            messages: Vec::new(),
        }
    }

    /// Replace the feed with a store snapshot, keeping any relay-delivered
    /// messages the snapshot has not caught up to yet.
    pub fn apply_snapshot(&mut self, docs: Vec<Message>) {
        let snapshot_ids: HashSet<Uuid> = docs.iter().map(|m| m.id).collect();
        let extras: Vec<Message> = self
            .messages
            .drain(..)
            .filter(|m| !snapshot_ids.contains(&m.id))
            .collect();

        self.messages = docs;
        for extra in extras {
            self.insert_ordered(extra);
        }
    }

    /// Merge a relay event into the feed.  Returns `true` if it was new.
    /// Events for other channels or with ids the feed cannot key by are
    /// ignored.
    pub fn apply_relay(&mut self, event: &ServerEvent) -> bool {
        let ServerEvent::NewMessage {
            id,
            text,
            sender_id,
            timestamp,
            read,
        } = event
        else {
            return false;
        };
        let Ok(id) = Uuid::parse_str(id) else {
            return false;
        };
        if self.messages.iter().any(|m| m.id == id) {
            return false;
        }

        let Some(timestamp) = chrono::DateTime::from_timestamp_millis(*timestamp) else {
            return false;
        };
        self.insert_ordered(Message {
            id,
            channel_id: self.channel_id.clone(),
            sender_id: sender_id.clone(),
            text: text.clone(),
            timestamp,
            read: *read,
        });
        true
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn insert_ordered(&mut self, message: Message) {
        let at = self
            .messages
            .partition_point(|m| m.timestamp <= message.timestamp);
        self.messages.insert(at, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NoopGateway;
    use chrono::Utc;
    use std::sync::Mutex;

    /// Relay stub that records what was published after the durable write.
    #[derive(Default)]
    struct RecordingRelay {
        events: Mutex<Vec<(ChannelId, ServerEvent)>>,
    }

    impl RelayPublisher for RecordingRelay {
        fn publish(&self, channel_id: &ChannelId, event: ServerEvent) {
            self.events
                .lock()
                .unwrap()
                .push((channel_id.clone(), event));
        }
    }

    struct Fixture {
        db: Arc<Database>,
        chat: ChatService,
        relay: Arc<RecordingRelay>,
    }

    fn fixture() -> Fixture {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let relay = Arc::new(RecordingRelay::default());
        let notifier = Arc::new(Notifier::new(Arc::clone(&db), Arc::new(NoopGateway)));
        let chat = ChatService::new(
            Arc::clone(&db),
            Arc::clone(&relay) as Arc<dyn RelayPublisher>,
            notifier,
        );
        Fixture { db, chat, relay }
    }

    fn channel(fx: &Fixture) -> ChatChannel {
        fx.chat
            .ensure_channel(&RideId::new(), &UserId::new("d1"), &UserId::new("p1"))
            .unwrap()
    }

    #[test]
    fn test_ensure_channel_is_idempotent() {
        let fx = fixture();
        let ride_id = RideId::new();

        let first = fx
            .chat
            .ensure_channel(&ride_id, &UserId::new("d1"), &UserId::new("p1"))
            .unwrap();
        let second = fx
            .chat
            .ensure_channel(&ride_id, &UserId::new("d1"), &UserId::new("p1"))
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.created_at, second.created_at);
    }

    #[test]
    fn test_empty_message_is_rejected() {
        let fx = fixture();
        let channel = channel(&fx);

        for text in ["", "   ", "\n\t"] {
            let err = fx
                .chat
                .post_message(&Actor::passenger("p1"), &channel.id, text)
                .unwrap_err();
            assert!(matches!(err, KabuError::InvalidArgument(_)));
        }
        assert!(fx.relay.events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_outsider_cannot_post() {
        let fx = fixture();
        let channel = channel(&fx);

        let err = fx
            .chat
            .post_message(&Actor::passenger("p2"), &channel.id, "hi")
            .unwrap_err();
        assert!(matches!(err, KabuError::InvalidArgument(_)));
    }

    #[test]
    fn test_post_updates_counters_preview_and_relay() {
        let fx = fixture();
        let channel_id = channel(&fx).id;

        let message = fx
            .chat
            .post_message(&Actor::passenger("p1"), &channel_id, "I'm at the gate")
            .unwrap();

        let stored: ChatChannel = fx.db.get(&chat_doc(&channel_id)).unwrap().unwrap();
        assert_eq!(stored.last_message.as_deref(), Some("I'm at the gate"));
        assert_eq!(stored.last_message_at, Some(message.timestamp));
        assert_eq!(stored.unread_driver_messages, 1);
        assert_eq!(stored.unread_passenger_messages, 0);

        // The relay saw the persisted message, not a provisional one.
        let events = fx.relay.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        match &events[0].1 {
            ServerEvent::NewMessage { id, read, .. } => {
                assert_eq!(*id, message.id.to_string());
                assert!(!read);
            }
            other => panic!("unexpected relay event: {other:?}"),
        }
    }

    #[test]
    fn test_mark_read_resets_only_the_reader() {
        let fx = fixture();
        let channel_id = channel(&fx).id;
        let driver = Actor::driver("d1");
        let passenger = Actor::passenger("p1");

        fx.chat.post_message(&passenger, &channel_id, "one").unwrap();
        fx.chat.post_message(&driver, &channel_id, "two").unwrap();

        fx.chat.mark_read(&driver, &channel_id).unwrap();

        let stored: ChatChannel = fx.db.get(&chat_doc(&channel_id)).unwrap().unwrap();
        assert_eq!(stored.unread_driver_messages, 0);
        assert_eq!(stored.unread_passenger_messages, 1);
    }

    #[test]
    fn test_mark_all_read_sweeps_every_channel() {
        let fx = fixture();
        let passenger = Actor::passenger("p1");

        for _ in 0..3 {
            let channel = fx
                .chat
                .ensure_channel(&RideId::new(), &UserId::new("d1"), &UserId::new("p1"))
                .unwrap();
            fx.chat
                .post_message(&Actor::driver("d1"), &channel.id, "hello")
                .unwrap();
        }

        assert_eq!(fx.chat.mark_all_read(&passenger).unwrap(), 3);
        assert_eq!(fx.chat.mark_all_read(&passenger).unwrap(), 0);

        for channel in fx.chat.list_channels(&passenger).unwrap() {
            assert_eq!(channel.unread_passenger_messages, 0);
        }
    }

    #[test]
    fn test_messages_come_back_in_timestamp_order() {
        let fx = fixture();
        let channel_id = channel(&fx).id;

        for text in ["first", "second", "third"] {
            fx.chat
                .post_message(&Actor::passenger("p1"), &channel_id, text)
                .unwrap();
        }

        let messages = fx.chat.messages(&channel_id).unwrap();
        let texts: Vec<&str> = messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);

        let mut last = None;
        for message in &messages {
            assert!(last.map_or(true, |prev| prev <= message.timestamp));
            last = Some(message.timestamp);
        }
    }

    #[test]
    fn test_same_millisecond_messages_keep_insertion_order() {
        let fx = fixture();
        let channel_id = channel(&fx).id;
        let ts = Utc::now();

        // Two senders land in the same millisecond; write directly to pin
        // the timestamps.
        for (n, sender) in [("a", "p1"), ("b", "d1")] {
            let message = Message {
                id: Uuid::new_v4(),
                channel_id: channel_id.clone(),
                sender_id: UserId::new(sender),
                text: n.to_string(),
                timestamp: ts,
                read: false,
            };
            fx.db
                .set(&message_doc(&channel_id, &message.id), &message)
                .unwrap();
        }

        let messages = fx.chat.messages(&channel_id).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].text, "a");
        assert_eq!(messages[1].text, "b");
        assert_ne!(messages[0].id, messages[1].id);
    }

    #[test]
    fn test_feed_dedups_across_relay_and_snapshot() {
        let fx = fixture();
        let channel_id = channel(&fx).id;
        let mut feed = ChatFeed::new(channel_id.clone());

        let message = fx
            .chat
            .post_message(&Actor::passenger("p1"), &channel_id, "hello")
            .unwrap();

        // Relay delivers first...
        let (_, event) = fx.relay.events.lock().unwrap()[0].clone();
        assert!(feed.apply_relay(&event));
        assert!(!feed.apply_relay(&event), "duplicate broadcast is ignored");

        // ...then the store snapshot catches up with the same message.
        feed.apply_snapshot(fx.chat.messages(&channel_id).unwrap());
        assert_eq!(feed.len(), 1);
        assert_eq!(feed.messages()[0].id, message.id);
    }

    #[tokio::test]
    async fn test_watch_messages_feeds_snapshots() {
        let fx = fixture();
        let channel_id = channel(&fx).id;

        let mut sub = fx.chat.watch_messages(&channel_id);
        let initial = sub.recv().await.unwrap();
        assert!(initial.docs.is_empty());

        let posted = fx
            .chat
            .post_message(&Actor::passenger("p1"), &channel_id, "hello")
            .unwrap();

        let next = sub.recv().await.unwrap();
        assert_eq!(next.docs.len(), 1);

        let mut feed = ChatFeed::new(channel_id);
        feed.apply_snapshot(next.docs);
        assert_eq!(feed.len(), 1);
        assert_eq!(feed.messages()[0].id, posted.id);
    }

    #[test]
    fn test_feed_keeps_relay_messages_missing_from_stale_snapshot() {
        let channel_id = ChannelId::for_ride(&RideId::new());
        let mut feed = ChatFeed::new(channel_id.clone());

        let stored = Message {
            id: Uuid::new_v4(),
            channel_id: channel_id.clone(),
            sender_id: UserId::new("p1"),
            text: "older".to_string(),
            timestamp: Utc::now(),
            read: false,
        };

        // A relay-only message arrives before the snapshot includes it.
        let relay_only = ServerEvent::NewMessage {
            id: Uuid::new_v4().to_string(),
            text: "newer".to_string(),
            sender_id: UserId::new("d1"),
            timestamp: stored.timestamp.timestamp_millis() + 10,
            read: false,
        };
        assert!(feed.apply_relay(&relay_only));

        feed.apply_snapshot(vec![stored.clone()]);

        assert_eq!(feed.len(), 2);
        assert_eq!(feed.messages()[0].id, stored.id);
        assert_eq!(feed.messages()[1].text, "newer");
    }
}
