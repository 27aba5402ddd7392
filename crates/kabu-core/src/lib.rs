//! # kabu-core
//!
//! The booking/chat consistency core: the booking lifecycle state machine,
//! the driver rating aggregator, the chat channel manager, ride offerings,
//! and the notification fan-out path.
//!
//! Every operation takes an explicit [`kabu_shared::types::Actor`]; nothing
//! reads an ambient session.  The document store is the single source of
//! truth -- the realtime relay and the push gateway are best-effort side
//! channels that can never fail a durable write.

pub mod booking;
pub mod chat;
pub mod notify;
pub mod rating;
pub mod relay;
pub mod rides;

pub use booking::BookingService;
pub use chat::{ChatFeed, ChatService};
pub use notify::{ExpoPushGateway, NoopGateway, NotificationGateway, Notifier};
pub use relay::{NoopRelay, RelayPublisher};
pub use rides::{NewRideOffering, RideService};
