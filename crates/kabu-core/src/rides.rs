//! Ride offerings: what drivers publish and passengers browse.
//!
//! An offering is immutable once published apart from its status; completion
//! happens only through the booking lifecycle.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use tracing::info;

use kabu_shared::types::{Actor, RideId, RideStatus, Role, UserId};
use kabu_shared::KabuError;
use kabu_store::{
    collections, now_ms, ride_doc, Database, Direction, Filter, Location, Query, RideOffering,
    VehicleSummary,
};

/// Everything a driver supplies when publishing a schedule.
#[derive(Debug, Clone)]
pub struct NewRideOffering {
    pub start_location: Location,
    pub end_location: Location,
    pub optional_stops: Vec<Location>,
    pub schedule_date: NaiveDate,
    pub start_time: NaiveTime,
    pub ride_price: i64,
    pub vehicle: VehicleSummary,
    pub available_seats: u32,
}

pub struct RideService {
    db: Arc<Database>,
}

impl RideService {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Publish a new active offering.
    pub fn publish_offering(
        &self,
        actor: &Actor,
        new: NewRideOffering,
    ) -> Result<RideOffering, KabuError> {
        if actor.role != Role::Driver {
            return Err(KabuError::InvalidArgument(
                "only a driver can publish a ride offering".to_string(),
            ));
        }
        if new.ride_price <= 0 {
            return Err(KabuError::InvalidArgument(format!(
                "ride price must be positive, got {}",
                new.ride_price
            )));
        }

        let offering = RideOffering {
            id: RideId::new(),
            driver_id: actor.user_id.clone(),
            start_location: new.start_location,
            end_location: new.end_location,
            optional_stops: new.optional_stops,
            schedule_date: new.schedule_date,
            start_time: new.start_time,
            ride_price: new.ride_price,
            vehicle: new.vehicle,
            available_seats: new.available_seats,
            status: RideStatus::Active,
            created_at: now_ms(),
        };

        self.db.set(&ride_doc(&offering.id), &offering)?;
        info!(ride = %offering.id, driver = %offering.driver_id, "ride offering published");

        Ok(offering)
    }

    /// Withdraw an active offering.  Only the publishing driver may cancel,
    /// and only while the offering is still active.
    pub fn cancel_offering(
        &self,
        actor: &Actor,
        ride_id: &RideId,
    ) -> Result<RideOffering, KabuError> {
        let offering = self.db.run_transaction(|tx| {
            let mut ride: RideOffering = tx
                .get(&ride_doc(ride_id))?
                .ok_or_else(|| KabuError::NotFound(format!("ride {ride_id}")))?;

            if actor.role != Role::Driver || ride.driver_id != actor.user_id {
                return Err(KabuError::InvalidArgument(
                    "only the publishing driver can cancel an offering".to_string(),
                ));
            }
            if ride.status != RideStatus::Active {
                return Err(KabuError::InvalidState(format!(
                    "ride {ride_id} is not active"
                )));
            }

            ride.status = RideStatus::Cancelled;
            tx.set(&ride_doc(ride_id), &ride)?;
            Ok(ride)
        })?;

        info!(ride = %ride_id, "ride offering cancelled");
        Ok(offering)
    }

    pub fn get(&self, ride_id: &RideId) -> Result<Option<RideOffering>, KabuError> {
        Ok(self.db.get(&ride_doc(ride_id))?)
    }

    /// Active offerings, newest first.  This is the passenger browse view.
    pub fn list_active(&self) -> Result<Vec<RideOffering>, KabuError> {
        Ok(self.db.query(
            &Query::collection(collections::RIDES)
                .filter(Filter::eq("status", "active"))
                .order_by("createdAt", Direction::Desc),
        )?)
    }

    /// Every offering a driver has published, newest first.
    pub fn list_for_driver(&self, driver_id: &UserId) -> Result<Vec<RideOffering>, KabuError> {
        Ok(self.db.query(
            &Query::collection(collections::RIDES)
                .filter(Filter::eq("driverId", driver_id.as_str()))
                .order_by("createdAt", Direction::Desc),
        )?)
    }
}
