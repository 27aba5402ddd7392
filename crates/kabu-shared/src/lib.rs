//! # kabu-shared
//!
//! Types shared across the Kabu workspace: identifiers, actor roles, booking
//! and ride status enums (including the booking transition table), the error
//! taxonomy, the realtime relay wire protocol, and notification payloads.

pub mod error;
pub mod notify;
pub mod protocol;
pub mod types;

pub use error::KabuError;
