//! Fan-out of incoming messages to whoever is listening.
//!
//! The host pushes every message it receives into a [`DeliveryBus`]; each open
//! conversation holds a [`DeliverySubscription`] filtered to its peer and
//! drops it when the conversation goes away.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::model::{Message, UserId};

pub const DEFAULT_BUS_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeliveryEvent {
    MessageReceived(Message),
}

#[derive(Debug, Clone)]
pub struct DeliveryBus {
    tx: broadcast::Sender<DeliveryEvent>,
}

impl Default for DeliveryBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl DeliveryBus {
    /// `capacity` events are buffered per subscriber before the slowest
    /// starts losing the oldest ones.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Returns how many subscribers will see the event.
    pub fn publish(&self, event: DeliveryEvent) -> usize {
        match self.tx.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                debug!("no delivery subscribers, event dropped");
                0
            }
        }
    }

    pub fn deliver(&self, message: Message) -> usize {
        self.publish(DeliveryEvent::MessageReceived(message))
    }

    pub fn subscribe(&self) -> DeliverySubscription {
        DeliverySubscription {
            rx: self.tx.subscribe(),
            from: None,
        }
    }

    /// Only messages sent by `peer` come through.
    pub fn subscribe_from(&self, peer: UserId) -> DeliverySubscription {
        DeliverySubscription {
            rx: self.tx.subscribe(),
            from: Some(peer),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

pub struct DeliverySubscription {
    rx: broadcast::Receiver<DeliveryEvent>,
    from: Option<UserId>,
}

impl DeliverySubscription {
    /// Next matching message, or `None` once every bus handle is gone.
    pub async fn recv(&mut self) -> Option<Message> {
        loop {
            match self.rx.recv().await {
                Ok(DeliveryEvent::MessageReceived(message)) => {
                    if self.from.map_or(true, |peer| message.from == peer) {
                        return Some(message);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "delivery subscriber lagged, messages lost");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
