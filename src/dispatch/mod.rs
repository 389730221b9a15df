//! Message delivery: charging active subscribers and fanning deliveries out
//! to whoever is watching a topic.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::config::MAX_EVENT_CAPACITY;
use crate::error::PubSubError;
use crate::escrow::{ChargeOutcome, EscrowLedger};
use crate::ledger::{AccountId, Amount, FundsLedger, TopicName};
use crate::topics::TopicRegistry;

/// Immutable message payload.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct Message(String);

impl Message {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Message {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Message {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One message handed to one charged subscriber.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Delivery {
    pub topic: TopicName,
    pub message: Message,
    pub subscriber: AccountId,
}

/// Outcome of a publish call. `delivered` is in delivery order; `skipped`
/// lists active subscribers whose balance could not cover the fee.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryReport {
    pub topic: TopicName,
    pub fee: Amount,
    pub delivered: Vec<AccountId>,
    pub skipped: Vec<AccountId>,
}

impl DeliveryReport {
    /// Amount credited to the publisher by this call.
    pub fn total_charged(&self) -> Amount {
        self.fee * self.delivered.len() as Amount
    }
}

/// Per-topic broadcast streams of deliveries.
///
/// Deliveries are sent to the receivers registered at the time of sending
/// and to nobody else. A receiver that falls more than `capacity` events
/// behind loses the oldest ones. Streams nobody listens to any more are
/// dropped, so the map only holds topics with live receivers.
#[derive(Debug)]
pub struct DeliveryBus {
    capacity: usize,
    streams: Mutex<HashMap<TopicName, broadcast::Sender<Delivery>>>,
}

impl DeliveryBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.clamp(1, MAX_EVENT_CAPACITY),
            streams: Mutex::new(HashMap::new()),
        }
    }

    pub fn watch(&self, topic: &str) -> broadcast::Receiver<Delivery> {
        let mut streams = self.lock_streams();
        streams.retain(|_, tx| tx.receiver_count() > 0);
        streams
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Returns how many observers received the delivery.
    pub fn emit(&self, delivery: Delivery) -> usize {
        let mut streams = self.lock_streams();
        let Some(tx) = streams.get(&delivery.topic) else {
            return 0;
        };
        let topic = delivery.topic.clone();
        match tx.send(delivery) {
            Ok(observers) => observers,
            Err(_) => {
                // every receiver is gone
                streams.remove(&topic);
                0
            }
        }
    }

    /// Number of topic streams currently held.
    pub fn stream_count(&self) -> usize {
        self.lock_streams().len()
    }

    fn lock_streams(&self) -> MutexGuard<'_, HashMap<TopicName, broadcast::Sender<Delivery>>> {
        match self.streams.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("delivery bus lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

impl Default for DeliveryBus {
    fn default() -> Self {
        Self::new(64)
    }
}

/// Drives one publish against borrowed ledger state.
pub struct MessageDispatcher<'a> {
    topics: &'a TopicRegistry,
    escrow: &'a mut EscrowLedger,
    funds: &'a mut FundsLedger,
    bus: &'a DeliveryBus,
}

impl<'a> MessageDispatcher<'a> {
    pub fn new(
        topics: &'a TopicRegistry,
        escrow: &'a mut EscrowLedger,
        funds: &'a mut FundsLedger,
        bus: &'a DeliveryBus,
    ) -> Self {
        Self {
            topics,
            escrow,
            funds,
            bus,
        }
    }

    pub fn publish(
        &mut self,
        topic: &str,
        message: Message,
        caller: &AccountId,
        fee: Amount,
    ) -> Result<DeliveryReport, PubSubError> {
        let topics = self.topics;
        let record = topics.require(topic)?;
        if !topics.is_publisher(topic, caller) {
            return Err(PubSubError::Unauthorized {
                topic: topic.to_string(),
                caller: caller.clone(),
                action: "publish to",
            });
        }

        let mut report = DeliveryReport {
            topic: topic.to_string(),
            fee,
            ..Default::default()
        };
        for subscriber in self.escrow.active_subscribers(topic) {
            match self.escrow.charge(self.funds, record, &subscriber, fee)? {
                ChargeOutcome::Charged { remaining } => {
                    tracing::debug!(topic, %subscriber, fee, remaining, "charged");
                    report.delivered.push(subscriber);
                }
                ChargeOutcome::InsufficientFunds { balance } => {
                    tracing::warn!(
                        topic,
                        %subscriber,
                        fee,
                        balance,
                        "insufficient escrow, message not delivered"
                    );
                    report.skipped.push(subscriber);
                }
            }
        }

        for subscriber in &report.delivered {
            let observers = self.bus.emit(Delivery {
                topic: topic.to_string(),
                message: message.clone(),
                subscriber: subscriber.clone(),
            });
            tracing::trace!(topic, subscriber = %subscriber, observers, "delivery emitted");
        }

        Ok(report)
    }
}
