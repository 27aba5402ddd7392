//! Seam between the durable chat path and the realtime relay.
//!
//! Publishing is fire-and-forget: the durable write has already committed by
//! the time an event is handed to the relay, and a relay failure must never
//! surface to the caller.  Clients that miss a broadcast converge through
//! their store subscription.

use kabu_shared::protocol::ServerEvent;
use kabu_shared::types::ChannelId;

pub trait RelayPublisher: Send + Sync {
    fn publish(&self, channel_id: &ChannelId, event: ServerEvent);
}

/// Relay that drops everything.  Used in tests and store-only deployments.
pub struct NoopRelay;

impl RelayPublisher for NoopRelay {
    fn publish(&self, _channel_id: &ChannelId, _event: ServerEvent) {}
}
