//! Driver rating aggregation.
//!
//! The summary is always recomputed from the full set of rated bookings
//! rather than maintained incrementally: an incremental counter can drift
//! when a rating lands without its matching aggregate write, a full re-scan
//! inside the same transaction cannot.

use kabu_shared::types::UserId;
use kabu_shared::KabuError;
use kabu_store::{
    collections, driver_profile_doc, Booking, DriverRatingSummary, Filter, Query, Transaction,
};

/// Recompute a driver's rating summary inside the caller's transaction.
///
/// `pending` is the booking whose rating triggered the recomputation; its
/// rating is not yet visible to the collection query (the write is still
/// buffered), so it is folded in by id.
pub fn recompute_driver_summary(
    tx: &mut Transaction<'_>,
    driver_id: &UserId,
    pending: &Booking,
) -> Result<DriverRatingSummary, KabuError> {
    let rated: Vec<Booking> = tx.query(
        &Query::collection(collections::BOOKINGS)
            .filter(Filter::eq("driverId", driver_id.as_str()))
            .filter(Filter::gt("rating", 0)),
    )?;

    let mut ratings: Vec<u8> = rated
        .iter()
        .filter(|b| b.id != pending.id)
        .filter_map(|b| b.rating)
        .collect();
    if let Some(rating) = pending.rating {
        ratings.push(rating);
    }

    let total = ratings.len() as u32;
    let average = if ratings.is_empty() {
        0.0
    } else {
        ratings.iter().map(|&r| f64::from(r)).sum::<f64>() / f64::from(total)
    };

    let summary = DriverRatingSummary {
        driver_id: driver_id.clone(),
        average_rating: average,
        total_ratings: total,
    };
    tx.set(&driver_profile_doc(driver_id), &summary)?;

    Ok(summary)
}
