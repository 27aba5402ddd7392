//! Notification fan-out: best-effort push delivery plus the stored inbox.
//!
//! Delivery is advisory.  Every failure on this path is logged and swallowed;
//! a booking or chat transaction never waits on, or fails because of, a
//! notification.

use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use kabu_shared::notify::{NotificationKind, PushPayload};
use kabu_shared::types::UserId;
use kabu_shared::KabuError;
use kabu_store::{
    notification_doc, now_ms, user_doc, Database, Direction, Filter, Notification, Query,
    Subscription, UserProfile,
};

/// Push gateway contract: hand a payload to a device token, best effort.
pub trait NotificationGateway: Send + Sync {
    fn send(&self, device_token: &str, payload: PushPayload);
}

/// Gateway that drops everything.  Used in tests.
pub struct NoopGateway;

impl NotificationGateway for NoopGateway {
    fn send(&self, _device_token: &str, _payload: PushPayload) {}
}

// ---------------------------------------------------------------------------
// Expo push gateway
// ---------------------------------------------------------------------------

/// Sends pushes through the Expo push HTTP API.
///
/// `send` spawns a delivery task and returns immediately, so it must be
/// called from within a tokio runtime.
pub struct ExpoPushGateway {
    client: reqwest::Client,
    endpoint: String,
}

impl ExpoPushGateway {
    pub const DEFAULT_ENDPOINT: &'static str = "https://exp.host/--/api/v2/push/send";

    pub fn new() -> Self {
        Self::with_endpoint(Self::DEFAULT_ENDPOINT)
    }

    /// Point the gateway at a different endpoint (test servers, proxies).
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

impl Default for ExpoPushGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationGateway for ExpoPushGateway {
    fn send(&self, device_token: &str, payload: PushPayload) {
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        let token = device_token.to_string();

        tokio::spawn(async move {
            let message = serde_json::json!({
                "to": token,
                "sound": "default",
                "title": payload.title,
                "body": payload.body,
                "priority": "high",
            });

            match client.post(&endpoint).json(&message).send().await {
                Ok(response) if !response.status().is_success() => {
                    warn!(status = %response.status(), "push gateway rejected notification");
                }
                Ok(_) => debug!("push notification delivered"),
                Err(e) => warn!(error = %e, "push delivery failed"),
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

/// Stores notification documents and fans them out to the push gateway.
pub struct Notifier {
    db: Arc<Database>,
    gateway: Arc<dyn NotificationGateway>,
}

impl Notifier {
    pub fn new(db: Arc<Database>, gateway: Arc<dyn NotificationGateway>) -> Self {
        Self { db, gateway }
    }

    /// Record a notification for `recipient` and push it to their registered
    /// device, if any.  Never fails: storage and delivery errors are logged.
    pub fn notify(
        &self,
        recipient: &UserId,
        sender: &UserId,
        kind: NotificationKind,
        payload: PushPayload,
    ) {
        let notification = Notification {
            id: Uuid::new_v4(),
            recipient_id: recipient.clone(),
            sender_id: sender.clone(),
            title: payload.title.clone(),
            body: payload.body.clone(),
            kind,
            read: false,
            created_at: now_ms(),
        };

        if let Err(e) = self
            .db
            .set(&notification_doc(&notification.id), &notification)
        {
            warn!(recipient = %recipient, error = %e, "failed to store notification");
        }

        match self.db.get::<UserProfile>(&user_doc(recipient)) {
            Ok(Some(profile)) => {
                if let Some(token) = profile.expo_push_token {
                    self.gateway.send(&token, payload);
                } else {
                    debug!(recipient = %recipient, "no push token registered");
                }
            }
            Ok(None) => debug!(recipient = %recipient, "no profile for push recipient"),
            Err(e) => warn!(recipient = %recipient, error = %e, "push token lookup failed"),
        }
    }

    /// Register (or replace) a user's push token, creating the profile
    /// document if needed.
    pub fn register_push_token(&self, user: &UserId, token: &str) -> Result<(), KabuError> {
        self.db.run_transaction(|tx| {
            match tx.get::<UserProfile>(&user_doc(user))? {
                Some(mut profile) => {
                    profile.expo_push_token = Some(token.to_string());
                    tx.set(&user_doc(user), &profile)?;
                }
                None => {
                    let profile = UserProfile {
                        user_id: user.clone(),
                        display_name: None,
                        expo_push_token: Some(token.to_string()),
                        created_at: now_ms(),
                    };
                    tx.set(&user_doc(user), &profile)?;
                }
            }
            Ok::<_, KabuError>(())
        })
    }

    // ------------------------------------------------------------------
    // Inbox
    // ------------------------------------------------------------------

    fn unread_query(user: &UserId) -> Query {
        Query::collection(kabu_store::collections::NOTIFICATIONS)
            .filter(Filter::eq("recipientId", user.as_str()))
            .filter(Filter::eq("read", false))
            .order_by("createdAt", Direction::Desc)
    }

    /// Unread notifications for a user, newest first.
    pub fn list_unread(&self, user: &UserId) -> Result<Vec<Notification>, KabuError> {
        Ok(self.db.query(&Self::unread_query(user))?)
    }

    /// Mark every unread notification for a user as read, in one
    /// transaction.  Returns the number updated.
    pub fn mark_all_read(&self, user: &UserId) -> Result<usize, KabuError> {
        self.db.run_transaction(|tx| {
            let unread: Vec<Notification> = tx.query(&Self::unread_query(user))?;
            let count = unread.len();
            for mut notification in unread {
                notification.read = true;
                tx.set(&notification_doc(&notification.id), &notification)?;
            }
            Ok::<_, KabuError>(count)
        })
    }

    /// Delete a notification (e.g. when the recipient opens it).
    pub fn delete(&self, id: &Uuid) -> Result<bool, KabuError> {
        Ok(self.db.delete(&notification_doc(id))?)
    }

    /// Live unread set for badge counts.
    pub fn watch_unread(&self, user: &UserId) -> Subscription<Notification> {
        self.db.subscribe(Self::unread_query(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kabu_shared::types::RideId;

    fn notifier() -> (Arc<Database>, Notifier) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let notifier = Notifier::new(Arc::clone(&db), Arc::new(NoopGateway));
        (db, notifier)
    }

    #[test]
    fn test_notify_then_inbox_round_trip() {
        let (_db, notifier) = notifier();
        let recipient = UserId::new("d1");
        let sender = UserId::new("p1");

        notifier.notify(
            &recipient,
            &sender,
            NotificationKind::Schedule {
                ride_id: RideId::new(),
            },
            PushPayload::new("Booking Update", "Your booking has been confirmed"),
        );

        let unread = notifier.list_unread(&recipient).unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].title, "Booking Update");

        assert_eq!(notifier.mark_all_read(&recipient).unwrap(), 1);
        assert!(notifier.list_unread(&recipient).unwrap().is_empty());
    }

    #[test]
    fn test_delete_notification() {
        let (_db, notifier) = notifier();
        let recipient = UserId::new("d1");

        notifier.notify(
            &recipient,
            &UserId::new("p1"),
            NotificationKind::Schedule {
                ride_id: RideId::new(),
            },
            PushPayload::new("t", "b"),
        );

        let unread = notifier.list_unread(&recipient).unwrap();
        assert!(notifier.delete(&unread[0].id).unwrap());
        assert!(notifier.list_unread(&recipient).unwrap().is_empty());
    }

    #[test]
    fn test_register_push_token_upserts() {
        let (db, notifier) = notifier();
        let user = UserId::new("p1");

        notifier.register_push_token(&user, "ExponentPushToken[abc]").unwrap();
        notifier.register_push_token(&user, "ExponentPushToken[def]").unwrap();

        let profile: UserProfile = db.get(&user_doc(&user)).unwrap().unwrap();
        assert_eq!(
            profile.expo_push_token.as_deref(),
            Some("ExponentPushToken[def]")
        );
    }
}
