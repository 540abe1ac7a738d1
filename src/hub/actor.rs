//! The hub's owner task

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::handle::{HubEvent, HubHandle, Payload, Subscriber};
use super::SubscriberId;

/// Control events are rare; keep their queue small
const CONTROL_CAPACITY: usize = 16;

/// Broadcast hub owning the subscriber set
pub struct StatusHub {
    handle: HubHandle,
    control_rx: mpsc::Receiver<HubEvent>,
    outbound_rx: mpsc::Receiver<Payload>,
    subscribers: HashMap<SubscriberId, mpsc::Sender<Payload>>,
}

impl StatusHub {
    /// Create a hub with a bounded outgoing queue of `capacity` messages
    pub fn new(capacity: usize, subscriber_buffer: usize) -> Self {
        let (control, control_rx) = mpsc::channel(CONTROL_CAPACITY);
        let (outbound, outbound_rx) = mpsc::channel(capacity.max(1));

        Self {
            handle: HubHandle {
                control,
                outbound,
                next_id: Arc::new(AtomicU64::new(0)),
                subscriber_buffer,
            },
            control_rx,
            outbound_rx,
            subscribers: HashMap::new(),
        }
    }

    pub fn handle(&self) -> HubHandle {
        self.handle.clone()
    }

    /// Spawn the owner task. It runs until `shutdown` is cancelled.
    pub fn start(self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(mut self, shutdown: CancellationToken) {
        tracing::info!("Status hub started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(event) = self.control_rx.recv() => self.handle_event(event),
                Some(payload) = self.outbound_rx.recv() => self.fan_out(payload),
                else => break,
            }
        }

        let closed = self.subscribers.len();
        // Dropping each sender closes that subscriber's feed
        self.subscribers.clear();
        self.control_rx.close();
        self.outbound_rx.close();

        tracing::info!(subscribers = closed, "Status hub stopped");
    }

    fn handle_event(&mut self, event: HubEvent) {
        match event {
            HubEvent::Register(Subscriber { id, tx }) => {
                self.subscribers.insert(id, tx);
                tracing::debug!(subscriber = id, total = self.subscribers.len(), "Subscriber registered");
            }
            HubEvent::Unregister(id) => {
                if self.subscribers.remove(&id).is_some() {
                    tracing::debug!(subscriber = id, total = self.subscribers.len(), "Subscriber removed");
                }
            }
            HubEvent::Count(reply) => {
                let _ = reply.send(self.subscribers.len());
            }
        }
    }

    fn fan_out(&mut self, payload: Payload) {
        self.subscribers.retain(|id, tx| match tx.try_send(Arc::clone(&payload)) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(subscriber = *id, error = %e, "Delivery failed, removing subscriber");
                false
            }
        });
    }
}
