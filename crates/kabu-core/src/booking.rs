//! Booking lifecycle state machine.
//!
//! A booking moves `pending -> {confirmed, rejected, cancelled}` and
//! `confirmed -> {completed, cancelled}`; the terminal states have no
//! outgoing edges.  The driver confirms, rejects, and completes; the
//! passenger cancels while pending; a confirmed booking can only be
//! cancelled by the driver.
//!
//! Every mutation runs as one store transaction.  Racing transitions are
//! serialized by the store's optimistic-concurrency retry: the loser re-reads
//! the committed state and fails with `InvalidTransition` instead of
//! overwriting it.

use std::sync::Arc;

use tracing::info;

use kabu_shared::notify::{NotificationKind, PushPayload};
use kabu_shared::types::{Actor, BookingId, BookingStatus, ChannelId, RideId, RideStatus, Role};
use kabu_shared::KabuError;
use kabu_store::{
    booking_doc, chat_doc, now_ms, ride_doc, Booking, ChatChannel, Database, RideOffering,
};

use crate::notify::Notifier;
use crate::rating;

pub struct BookingService {
    db: Arc<Database>,
    notifier: Arc<Notifier>,
}

impl BookingService {
    pub fn new(db: Arc<Database>, notifier: Arc<Notifier>) -> Self {
        Self { db, notifier }
    }

    /// Book a ride for the acting passenger.
    ///
    /// Fails with `NotFound` if the ride is absent or no longer active, and
    /// with `AlreadyExists` if this passenger already holds a booking on the
    /// ride.  The booking (with a price/location/schedule snapshot copied
    /// from the ride) and the ride's chat channel are created in the same
    /// transaction.
    pub fn create_booking(&self, actor: &Actor, ride_id: &RideId) -> Result<Booking, KabuError> {
        if actor.role != Role::Passenger {
            return Err(KabuError::InvalidArgument(
                "only a passenger can book a ride".to_string(),
            ));
        }

        let booking_id = BookingId::derive(ride_id, &actor.user_id);
        let channel_id = ChannelId::for_ride(ride_id);

        let booking = self.db.run_transaction(|tx| {
            let ride: RideOffering = tx
                .get(&ride_doc(ride_id))?
                .ok_or_else(|| KabuError::NotFound(format!("ride {ride_id}")))?;
            if ride.status != RideStatus::Active {
                return Err(KabuError::NotFound(format!("ride {ride_id} is not active")));
            }

            if tx.get::<Booking>(&booking_doc(&booking_id))?.is_some() {
                return Err(KabuError::AlreadyExists(format!("booking {booking_id}")));
            }

            let existing_channel: Option<ChatChannel> = tx.get(&chat_doc(&channel_id))?;

            let now = now_ms();
            let booking = Booking {
                id: booking_id.clone(),
                ride_id: *ride_id,
                passenger_id: actor.user_id.clone(),
                driver_id: ride.driver_id.clone(),
                status: BookingStatus::Pending,
                price: ride.ride_price,
                start_location: ride.start_location.clone(),
                end_location: ride.end_location.clone(),
                schedule_date: ride.schedule_date,
                start_time: ride.start_time,
                rating: None,
                review: None,
                created_at: now,
                confirmed_at: None,
                completed_at: None,
                rated_at: None,
                cancelled_at: None,
                cancelled_by: None,
            };
            tx.set(&booking_doc(&booking_id), &booking)?;

            if existing_channel.is_none() {
                let channel = ChatChannel {
                    id: channel_id.clone(),
                    ride_id: *ride_id,
                    driver_id: ride.driver_id.clone(),
                    passenger_id: actor.user_id.clone(),
                    created_at: now,
                    last_message: None,
                    last_message_at: None,
                    unread_driver_messages: 0,
                    unread_passenger_messages: 0,
                };
                tx.set(&chat_doc(&channel_id), &channel)?;
            }

            Ok(booking)
        })?;

        info!(booking = %booking.id, ride = %ride_id, passenger = %actor.user_id, "booking created");

        self.notifier.notify(
            &booking.driver_id,
            &actor.user_id,
            NotificationKind::Booking {
                booking_id: booking.id.clone(),
                ride_id: *ride_id,
            },
            PushPayload::new("New Booking Request", "You have a new ride booking request"),
        );

        Ok(booking)
    }

    /// Move a booking along one edge of the lifecycle table.
    ///
    /// Completing a booking also flips the linked ride offering to
    /// `completed` in the same transaction; both documents change or
    /// neither does.
    pub fn transition_booking(
        &self,
        actor: &Actor,
        booking_id: &BookingId,
        target: BookingStatus,
    ) -> Result<Booking, KabuError> {
        let booking = self.db.run_transaction(|tx| {
            let mut booking: Booking = tx
                .get(&booking_doc(booking_id))?
                .ok_or_else(|| KabuError::NotFound(format!("booking {booking_id}")))?;

            let from = booking.status;
            if !from.can_transition_to(target) || !Self::actor_may(actor, &booking, target) {
                return Err(KabuError::InvalidTransition { from, to: target });
            }

            let now = now_ms();
            booking.status = target;
            match target {
                BookingStatus::Confirmed => booking.confirmed_at = Some(now),
                BookingStatus::Completed => booking.completed_at = Some(now),
                BookingStatus::Cancelled => {
                    booking.cancelled_at = Some(now);
                    booking.cancelled_by = Some(actor.role);
                }
                BookingStatus::Rejected | BookingStatus::Pending => {}
            }

            if target == BookingStatus::Completed {
                let mut ride: RideOffering = tx
                    .get(&ride_doc(&booking.ride_id))?
                    .ok_or_else(|| KabuError::NotFound(format!("ride {}", booking.ride_id)))?;
                ride.status = RideStatus::Completed;
                tx.set(&booking_doc(booking_id), &booking)?;
                tx.set(&ride_doc(&booking.ride_id), &ride)?;
            } else {
                tx.set(&booking_doc(booking_id), &booking)?;
            }

            Ok(booking)
        })?;

        info!(booking = %booking_id, status = %booking.status, actor = %actor.user_id, "booking transitioned");

        // Notify the counterparty.
        let recipient = if actor.user_id == booking.driver_id {
            booking.passenger_id.clone()
        } else {
            booking.driver_id.clone()
        };
        self.notifier.notify(
            &recipient,
            &actor.user_id,
            NotificationKind::Booking {
                booking_id: booking.id.clone(),
                ride_id: booking.ride_id,
            },
            PushPayload::new(
                "Booking Update",
                format!("Your booking has been {}", booking.status),
            ),
        );

        Ok(booking)
    }

    /// Rate a completed, unrated booking and recompute the driver's rating
    /// summary, all in one transaction.
    pub fn rate_booking(
        &self,
        actor: &Actor,
        booking_id: &BookingId,
        rating: u8,
        review: Option<String>,
    ) -> Result<Booking, KabuError> {
        if !(1..=5).contains(&rating) {
            return Err(KabuError::InvalidArgument(format!(
                "rating must be between 1 and 5, got {rating}"
            )));
        }

        let booking = self.db.run_transaction(|tx| {
            let mut booking: Booking = tx
                .get(&booking_doc(booking_id))?
                .ok_or_else(|| KabuError::NotFound(format!("booking {booking_id}")))?;

            if actor.role != Role::Passenger || actor.user_id != booking.passenger_id {
                return Err(KabuError::InvalidArgument(
                    "only the booking passenger can rate the ride".to_string(),
                ));
            }
            if booking.status != BookingStatus::Completed {
                return Err(KabuError::InvalidState(format!(
                    "booking {booking_id} is not completed"
                )));
            }
            if booking.rating.is_some() {
                return Err(KabuError::InvalidState(format!(
                    "booking {booking_id} is already rated"
                )));
            }

            booking.rating = Some(rating);
            booking.review = review.clone();
            booking.rated_at = Some(now_ms());

            let driver_id = booking.driver_id.clone();
            let summary = rating::recompute_driver_summary(tx, &driver_id, &booking)?;
            tx.set(&booking_doc(booking_id), &booking)?;

            info!(
                booking = %booking_id,
                driver = %driver_id,
                average = summary.average_rating,
                "booking rated"
            );
            Ok(booking)
        })?;

        Ok(booking)
    }

    pub fn get(&self, booking_id: &BookingId) -> Result<Option<Booking>, KabuError> {
        Ok(self.db.get(&booking_doc(booking_id))?)
    }

    /// Whether `actor` is allowed to drive this edge.
    fn actor_may(actor: &Actor, booking: &Booking, target: BookingStatus) -> bool {
        let is_driver = actor.role == Role::Driver && actor.user_id == booking.driver_id;
        let is_passenger =
            actor.role == Role::Passenger && actor.user_id == booking.passenger_id;

        match target {
            BookingStatus::Confirmed | BookingStatus::Rejected | BookingStatus::Completed => {
                is_driver
            }
            BookingStatus::Cancelled => match booking.status {
                BookingStatus::Pending => is_passenger,
                BookingStatus::Confirmed => is_driver,
                _ => false,
            },
            BookingStatus::Pending => false,
        }
    }
}
