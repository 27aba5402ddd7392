//! Domain model structs persisted as JSON documents.
//!
//! Field names are camelCase on the wire so the documents match what the
//! mobile clients read and write.  Timestamps are epoch milliseconds, which
//! keeps them sortable by the query layer.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use kabu_shared::notify::NotificationKind;
use kabu_shared::types::{BookingId, BookingStatus, ChannelId, RideId, RideStatus, Role, UserId};

use crate::documents::DocPath;

/// Current time truncated to millisecond precision, matching how timestamps
/// are persisted.  Models created with this round-trip without losing
/// equality.
pub fn now_ms() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

// ---------------------------------------------------------------------------
// Collections
// ---------------------------------------------------------------------------

pub mod collections {
    pub const RIDES: &str = "rides";
    pub const BOOKINGS: &str = "bookings";
    pub const CHATS: &str = "chats";
    pub const USERS: &str = "users";
    pub const NOTIFICATIONS: &str = "notifications";
    pub const DRIVER_PROFILES: &str = "driverProfiles";
}

pub fn ride_doc(id: &RideId) -> DocPath {
    DocPath::new(collections::RIDES, id.to_string())
}

pub fn booking_doc(id: &BookingId) -> DocPath {
    DocPath::new(collections::BOOKINGS, id.to_string())
}

pub fn chat_doc(id: &ChannelId) -> DocPath {
    DocPath::new(collections::CHATS, id.to_string())
}

/// Messages live in a per-channel subcollection, `chats/{channelId}/messages`.
pub fn message_collection(channel: &ChannelId) -> String {
    format!("{}/{}/messages", collections::CHATS, channel)
}

pub fn message_doc(channel: &ChannelId, id: &Uuid) -> DocPath {
    DocPath::new(message_collection(channel), id.to_string())
}

pub fn user_doc(id: &UserId) -> DocPath {
    DocPath::new(collections::USERS, id.to_string())
}

pub fn notification_doc(id: &Uuid) -> DocPath {
    DocPath::new(collections::NOTIFICATIONS, id.to_string())
}

pub fn driver_profile_doc(id: &UserId) -> DocPath {
    DocPath::new(collections::DRIVER_PROFILES, id.to_string())
}

// ---------------------------------------------------------------------------
// Location & vehicle snapshots
// ---------------------------------------------------------------------------

/// A named point on a route.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub title: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// The vehicle details copied onto a ride offering when it is published.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VehicleSummary {
    pub vehicle_id: String,
    pub make: String,
    pub model: String,
    pub license_plate: String,
}

// ---------------------------------------------------------------------------
// RideOffering
// ---------------------------------------------------------------------------

/// A driver-published route + schedule + price available for booking.
/// Immutable except for `status`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RideOffering {
    pub id: RideId,
    pub driver_id: UserId,
    pub start_location: Location,
    pub end_location: Location,
    pub optional_stops: Vec<Location>,
    pub schedule_date: NaiveDate,
    pub start_time: NaiveTime,
    /// Price in minor currency units.
    pub ride_price: i64,
    pub vehicle: VehicleSummary,
    pub available_seats: u32,
    pub status: RideStatus,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Booking
// ---------------------------------------------------------------------------

/// A passenger's claim against a ride offering.
///
/// The price/location/schedule fields are copied from the ride at creation
/// time, so later changes to the offering never retroactively alter an
/// existing booking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: BookingId,
    pub ride_id: RideId,
    pub passenger_id: UserId,
    pub driver_id: UserId,
    pub status: BookingStatus,

    // Snapshot copied from the ride.
    pub price: i64,
    pub start_location: Location,
    pub end_location: Location,
    pub schedule_date: NaiveDate,
    pub start_time: NaiveTime,

    /// 1-5, set at most once after completion.
    pub rating: Option<u8>,
    pub review: Option<String>,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub confirmed_at: Option<DateTime<Utc>>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub rated_at: Option<DateTime<Utc>>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<Role>,
}

// ---------------------------------------------------------------------------
// ChatChannel
// ---------------------------------------------------------------------------

/// A persistent, ride-scoped messaging thread between one driver and one
/// passenger.  The unread counters are the canonical read-tracking
/// mechanism; messages themselves are append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatChannel {
    pub id: ChannelId,
    pub ride_id: RideId,
    pub driver_id: UserId,
    pub passenger_id: UserId,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    /// Denormalized preview of the most recent message.
    pub last_message: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread_driver_messages: u32,
    pub unread_passenger_messages: u32,
}

impl ChatChannel {
    /// The unread counter belonging to a role's own inbox view.
    pub fn unread_for(&self, role: Role) -> u32 {
        match role {
            Role::Driver => self.unread_driver_messages,
            Role::Passenger => self.unread_passenger_messages,
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single chat message.  Append-only; `read` is written once as `false`
/// and read state is tracked on the channel counters instead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub channel_id: ChannelId,
    pub sender_id: UserId,
    pub text: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub read: bool,
}

// ---------------------------------------------------------------------------
// DriverRatingSummary
// ---------------------------------------------------------------------------

/// Derived average-rating statistic attached to a driver profile.  Mutated
/// only by the rating recomputation, never incrementally.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DriverRatingSummary {
    pub driver_id: UserId,
    pub average_rating: f64,
    pub total_ratings: u32,
}

// ---------------------------------------------------------------------------
// UserProfile
// ---------------------------------------------------------------------------

/// Minimal per-user document: display name and the registered push token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: UserId,
    pub display_name: Option<String>,
    pub expo_push_token: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

/// A stored notification, shown in the recipient's inbox until read or
/// deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub recipient_id: UserId,
    pub sender_id: UserId,
    pub title: String,
    pub body: String,
    #[serde(flatten)]
    pub kind: NotificationKind,
    pub read: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_booking_document_shape() {
        let ride = RideId::new();
        let booking = Booking {
            id: BookingId::derive(&ride, &UserId::new("p1")),
            ride_id: ride,
            passenger_id: UserId::new("p1"),
            driver_id: UserId::new("d1"),
            status: BookingStatus::Pending,
            price: 1500,
            start_location: Location {
                title: "Campus Gate".to_string(),
                latitude: 6.52,
                longitude: 3.37,
            },
            end_location: Location {
                title: "City Mall".to_string(),
                latitude: 6.45,
                longitude: 3.39,
            },
            schedule_date: NaiveDate::from_ymd_opt(2026, 8, 10).unwrap(),
            start_time: NaiveTime::from_hms_opt(8, 30, 0).unwrap(),
            rating: None,
            review: None,
            created_at: now_ms(),
            confirmed_at: None,
            completed_at: None,
            rated_at: None,
            cancelled_at: None,
            cancelled_by: None,
        };

        let value = serde_json::to_value(&booking).unwrap();
        assert_eq!(value["status"], "pending");
        assert_eq!(value["rideId"], ride.to_string());
        assert_eq!(value["rating"], serde_json::Value::Null);

        let restored: Booking = serde_json::from_value(value).unwrap();
        assert_eq!(restored, booking);
    }

    #[test]
    fn test_notification_kind_is_flattened() {
        let ride = RideId::new();
        let notification = Notification {
            id: Uuid::new_v4(),
            recipient_id: UserId::new("d1"),
            sender_id: UserId::new("p1"),
            title: "New Booking Request".to_string(),
            body: "You have a new ride booking request".to_string(),
            kind: NotificationKind::Schedule { ride_id: ride },
            read: false,
            created_at: now_ms(),
        };

        let value = serde_json::to_value(&notification).unwrap();
        assert_eq!(value["type"], "schedule");
        assert_eq!(value["rideId"], ride.to_string());
    }
}
