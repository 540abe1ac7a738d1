//! Live status feed
//!
//! [`StatusHub`] is a single-owner actor: one task owns the subscriber set
//! and applies registrations, removals and outgoing messages one at a time.
//! Producers hold a [`HubHandle`] and never wait on delivery.

pub mod actor;
pub mod handle;

pub use actor::StatusHub;
pub use handle::{HubHandle, PublishOutcome, Subscription, SubscriberId};

/// Default capacity of the outgoing message queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Default per-subscriber buffer
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 32;

/// The hub has shut down
#[derive(Debug, thiserror::Error)]
#[error("status hub is closed")]
pub struct HubClosed;
