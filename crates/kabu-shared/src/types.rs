use serde::{Deserialize, Serialize};
use uuid::Uuid;

// User identity = the auth provider's opaque uid string
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RideId(pub Uuid);

impl RideId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for RideId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RideId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Booking identifier, derived as `{rideId}_{passengerId}` so that one
/// (ride, passenger) pair can never own two bookings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct BookingId(pub String);

impl BookingId {
    pub fn derive(ride_id: &RideId, passenger_id: &UserId) -> Self {
        Self(format!("{}_{}", ride_id, passenger_id))
    }

    /// Split the id back into its (ride, passenger) parts.
    ///
    /// The ride id is a UUID and therefore contains no underscore, so the
    /// first `_` is always the separator even if the passenger id has some.
    pub fn parts(&self) -> Option<(RideId, UserId)> {
        let (ride, passenger) = self.0.split_once('_')?;
        let ride_id = RideId::parse(ride).ok()?;
        Some((ride_id, UserId::new(passenger)))
    }
}

impl std::fmt::Display for BookingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Chat channel identifier, derived as `ride_{rideId}`: one channel per ride.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ChannelId(pub String);

impl ChannelId {
    pub fn for_ride(ride_id: &RideId) -> Self {
        Self(format!("ride_{}", ride_id))
    }

    pub fn ride_id(&self) -> Option<RideId> {
        let raw = self.0.strip_prefix("ride_")?;
        RideId::parse(raw).ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Driver,
    Passenger,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Driver => write!(f, "driver"),
            Role::Passenger => write!(f, "passenger"),
        }
    }
}

/// The identity performing an operation.
///
/// Every booking/chat operation takes the actor explicitly instead of reading
/// an ambient session, so role checks are plain function arguments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Actor {
    pub user_id: UserId,
    pub role: Role,
}

impl Actor {
    pub fn driver(user_id: impl Into<String>) -> Self {
        Self {
            user_id: UserId::new(user_id),
            role: Role::Driver,
        }
    }

    pub fn passenger(user_id: impl Into<String>) -> Self {
        Self {
            user_id: UserId::new(user_id),
            role: Role::Passenger,
        }
    }
}

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RideStatus {
    Active,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Rejected,
    Cancelled,
    Completed,
}

impl BookingStatus {
    /// The booking lifecycle edge table.
    ///
    /// `pending -> {confirmed, rejected, cancelled}`,
    /// `confirmed -> {completed, cancelled}`; everything else is terminal.
    pub fn can_transition_to(self, target: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, target),
            (Pending, Confirmed)
                | (Pending, Rejected)
                | (Pending, Cancelled)
                | (Confirmed, Completed)
                | (Confirmed, Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BookingStatus::Rejected | BookingStatus::Cancelled | BookingStatus::Completed
        )
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Rejected => "rejected",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_booking_id_round_trip() {
        let ride = RideId::new();
        let passenger = UserId::new("user_with_underscores");

        let id = BookingId::derive(&ride, &passenger);
        let (r, p) = id.parts().unwrap();

        assert_eq!(r, ride);
        assert_eq!(p, passenger);
    }

    #[test]
    fn test_channel_id_for_ride() {
        let ride = RideId::new();
        let channel = ChannelId::for_ride(&ride);

        assert!(channel.as_str().starts_with("ride_"));
        assert_eq!(channel.ride_id(), Some(ride));
    }

    #[test]
    fn test_transition_table() {
        use BookingStatus::*;

        assert!(Pending.can_transition_to(Confirmed));
        assert!(Pending.can_transition_to(Rejected));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Confirmed.can_transition_to(Completed));
        assert!(Confirmed.can_transition_to(Cancelled));

        // No edges out of terminal states.
        for terminal in [Rejected, Cancelled, Completed] {
            assert!(terminal.is_terminal());
            for target in [Pending, Confirmed, Rejected, Cancelled, Completed] {
                assert!(!terminal.can_transition_to(target));
            }
        }

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Confirmed.can_transition_to(Rejected));
    }
}
