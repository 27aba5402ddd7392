//! Notification payloads.
//!
//! Each notification kind carries its own required references instead of one
//! loosely-typed record with optional fields for everything.

use serde::{Deserialize, Serialize};

use crate::types::{BookingId, ChannelId, RideId};

/// What a push gateway actually delivers to a device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
}

impl PushPayload {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
        }
    }
}

/// Tagged notification kind; the tag is stored with the notification
/// document so inboxes can route taps to the right screen.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NotificationKind {
    /// A booking was created or changed status.
    #[serde(rename_all = "camelCase")]
    Booking {
        booking_id: BookingId,
        ride_id: RideId,
    },

    /// A chat message arrived.
    #[serde(rename_all = "camelCase")]
    Chat { channel_id: ChannelId },

    /// A ride offering was published or withdrawn.
    #[serde(rename_all = "camelCase")]
    Schedule { ride_id: RideId },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UserId;

    #[test]
    fn test_kind_tag_round_trip() {
        let ride = RideId::new();
        let kind = NotificationKind::Booking {
            booking_id: BookingId::derive(&ride, &UserId::new("p1")),
            ride_id: ride,
        };

        let json = serde_json::to_string(&kind).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "booking");

        let restored: NotificationKind = serde_json::from_str(&json).unwrap();
        assert_eq!(kind, restored);
    }
}
