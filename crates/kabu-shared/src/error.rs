use thiserror::Error;

use crate::types::BookingStatus;

/// Domain error taxonomy for booking, chat, and notification operations.
#[derive(Error, Debug)]
pub enum KabuError {
    /// A referenced ride / booking / channel does not exist (or, for rides,
    /// is no longer active).
    #[error("Not found: {0}")]
    NotFound(String),

    /// The requested booking transition is not an edge of the lifecycle
    /// table, or was attempted by the wrong role.
    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },

    /// A precondition for the operation is not met (e.g. rating a booking
    /// that is not completed, or rating it twice).
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A booking already exists for this (ride, passenger) pair.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Malformed input (empty message text, rating out of range, ...).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Optimistic concurrency retries exhausted; the operation did not
    /// commit and may be retried by the caller.
    #[error("Transaction conflict: retries exhausted")]
    TransactionConflict,

    /// The realtime relay is unreachable. Durable state is unaffected.
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    /// Underlying storage failure.
    #[error("Storage error: {0}")]
    Storage(String),
}
