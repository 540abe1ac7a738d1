//! Producer and subscriber side of the hub

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use super::HubClosed;
use crate::model::StatusMessage;

/// Identity of a registered subscriber
pub type SubscriberId = u64;

/// Serialized payload shared by every subscriber
pub(crate) type Payload = Arc<str>;

pub(crate) struct Subscriber {
    pub id: SubscriberId,
    pub tx: mpsc::Sender<Payload>,
}

pub(crate) enum HubEvent {
    Register(Subscriber),
    Unregister(SubscriberId),
    Count(oneshot::Sender<usize>),
}

/// What happened to a published message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Queued,
    /// Queue full, message discarded
    Dropped,
    /// Hub has shut down
    Closed,
}

/// Cloneable handle used to publish and subscribe
#[derive(Clone)]
pub struct HubHandle {
    pub(crate) control: mpsc::Sender<HubEvent>,
    pub(crate) outbound: mpsc::Sender<Payload>,
    pub(crate) next_id: Arc<AtomicU64>,
    pub(crate) subscriber_buffer: usize,
}

impl HubHandle {
    /// Queue a status message for fan-out without waiting.
    pub fn publish(&self, message: &StatusMessage) -> PublishOutcome {
        let payload: Payload = match serde_json::to_string(message) {
            Ok(json) => json.into(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode status message");
                return PublishOutcome::Dropped;
            }
        };

        match self.outbound.try_send(payload) {
            Ok(()) => PublishOutcome::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!(
                    service_id = message.service_id,
                    "Status queue full, dropping message"
                );
                PublishOutcome::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => PublishOutcome::Closed,
        }
    }

    /// Register a new subscriber
    pub async fn subscribe(&self) -> Result<Subscription, HubClosed> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::channel(self.subscriber_buffer.max(1));

        self.control
            .send(HubEvent::Register(Subscriber { id, tx }))
            .await
            .map_err(|_| HubClosed)?;

        Ok(Subscription {
            id,
            rx,
            control: self.control.clone(),
        })
    }

    /// Remove a subscriber and close its feed
    pub async fn unsubscribe(&self, id: SubscriberId) -> Result<(), HubClosed> {
        self.control
            .send(HubEvent::Unregister(id))
            .await
            .map_err(|_| HubClosed)
    }

    /// Number of currently registered subscribers
    pub async fn subscriber_count(&self) -> Result<usize, HubClosed> {
        let (tx, rx) = oneshot::channel();
        self.control
            .send(HubEvent::Count(tx))
            .await
            .map_err(|_| HubClosed)?;
        rx.await.map_err(|_| HubClosed)
    }
}

/// Receiving end of one subscriber.
///
/// `recv` yields `None` once the hub has removed the subscriber or shut
/// down. Dropping the subscription asks the hub to remove it.
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::Receiver<Payload>,
    control: mpsc::Sender<HubEvent>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub async fn recv(&mut self) -> Option<Arc<str>> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Best effort; a closed receiver is also pruned on the next fan-out
        let _ = self.control.try_send(HubEvent::Unregister(self.id));
    }
}
