use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::broadcast;

use crate::config::{event_capacity_in_range, LedgerConfig};
use crate::dispatch::{Delivery, DeliveryBus, DeliveryReport, Message, MessageDispatcher};
use crate::error::PubSubError;
use crate::escrow::EscrowLedger;
use crate::identity::CallContext;
use crate::ledger::{AccountBalance, AccountId, Amount, FundsLedger, JournalEntry};
use crate::snapshot::LedgerSnapshot;
use crate::topics::{Advertised, TopicRegistry};

#[derive(Debug, Default)]
struct LedgerCore {
    funds: FundsLedger,
    topics: TopicRegistry,
    escrow: EscrowLedger,
}

/// The metered pub/sub ledger.
///
/// All state sits behind one lock: mutating calls hold the write side from
/// validation through fund movement and delivery emission, reads share the
/// read side. A failed call leaves the state exactly as it found it.
#[derive(Debug)]
pub struct PubSubLedger {
    core: RwLock<LedgerCore>,
    bus: DeliveryBus,
}

impl Default for PubSubLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl PubSubLedger {
    pub fn new() -> Self {
        Self {
            core: RwLock::new(LedgerCore::default()),
            bus: DeliveryBus::default(),
        }
    }

    pub fn from_config(config: &LedgerConfig) -> Result<Self, PubSubError> {
        if !event_capacity_in_range(config.event_capacity) {
            return Err(PubSubError::InvalidArgument(
                "event_capacity must be within 1..=65536",
            ));
        }
        let ledger = Self {
            core: RwLock::new(LedgerCore::default()),
            bus: DeliveryBus::new(config.event_capacity),
        };
        for genesis in &config.genesis {
            ledger.mint(&genesis.account, genesis.balance)?;
        }
        Ok(ledger)
    }

    /// Credit new funds to an external account.
    pub fn mint(&self, account: &AccountId, amount: Amount) -> Result<(), PubSubError> {
        let mut core = self.write();
        core.funds.mint(account, amount)?;
        let height = core.funds.commit();
        tracing::debug!(account = %account, amount, height, "minted");
        Ok(())
    }

    pub fn advertise(&self, ctx: &CallContext, topic: &str) -> Result<Advertised, PubSubError> {
        ctx.require_no_value()?;
        let mut core = self.write();
        let outcome = core.topics.advertise(topic, &ctx.caller)?;
        let height = core.funds.commit();
        match outcome {
            Advertised::Created => {
                tracing::info!(topic, owner = %ctx.caller, height, "topic advertised")
            }
            Advertised::AlreadyOwned => {
                tracing::debug!(topic, owner = %ctx.caller, height, "topic already owned by caller")
            }
        }
        Ok(outcome)
    }

    /// Open a subscription funded by the value attached to the call.
    pub fn subscribe(&self, ctx: &CallContext, topic: &str) -> Result<(), PubSubError> {
        let mut core = self.write();
        let LedgerCore {
            funds,
            topics,
            escrow,
        } = &mut *core;
        let record = topics.require(topic)?;
        escrow.open(funds, record, &ctx.caller, ctx.value)?;
        let height = funds.commit();
        tracing::info!(topic, subscriber = %ctx.caller, deposit = ctx.value, height, "subscribed");
        Ok(())
    }

    pub fn publish(
        &self,
        ctx: &CallContext,
        topic: &str,
        message: impl Into<Message>,
        fee: Amount,
    ) -> Result<DeliveryReport, PubSubError> {
        ctx.require_no_value()?;
        let mut core = self.write();
        let LedgerCore {
            funds,
            topics,
            escrow,
        } = &mut *core;
        let report = MessageDispatcher::new(topics, escrow, funds, &self.bus).publish(
            topic,
            message.into(),
            &ctx.caller,
            fee,
        )?;
        let height = funds.commit();
        tracing::info!(
            topic,
            publisher = %ctx.caller,
            fee,
            delivered = report.delivered.len(),
            skipped = report.skipped.len(),
            height,
            "message published"
        );
        Ok(report)
    }

    /// Close the caller's subscription and return the refunded amount.
    pub fn unsubscribe(&self, ctx: &CallContext, topic: &str) -> Result<Amount, PubSubError> {
        ctx.require_no_value()?;
        let mut core = self.write();
        let LedgerCore {
            funds,
            topics,
            escrow,
        } = &mut *core;
        let record = topics.require(topic)?;
        let refund = escrow.close(funds, record, &ctx.caller)?;
        let height = funds.commit();
        tracing::info!(topic, subscriber = %ctx.caller, refund, height, "unsubscribed");
        Ok(refund)
    }

    pub fn subscriber_balance(&self, topic: &str, subscriber: &str) -> Amount {
        self.read().escrow.balance_of(topic, subscriber)
    }

    pub fn is_subscribed(&self, topic: &str, subscriber: &str) -> bool {
        self.read().escrow.is_active(topic, subscriber)
    }

    pub fn active_subscribers(&self, topic: &str) -> Vec<AccountId> {
        self.read().escrow.active_subscribers(topic)
    }

    pub fn topic_owner(&self, topic: &str) -> Option<AccountId> {
        self.read().topics.owner(topic).cloned()
    }

    pub fn account(&self, account: &str) -> AccountBalance {
        self.read().funds.account(account)
    }

    pub fn journal(&self) -> Vec<JournalEntry> {
        self.read().funds.journal().to_vec()
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let core = self.read();
        LedgerSnapshot::new(
            core.funds.height(),
            core.funds.accounts().clone(),
            core.topics.topics().cloned().collect(),
            core.escrow.subscriptions().cloned().collect(),
        )
    }

    /// Register an observer for deliveries on `topic`. Only deliveries
    /// emitted after this call are received.
    pub fn watch(&self, topic: &str) -> broadcast::Receiver<Delivery> {
        self.bus.watch(topic)
    }

    fn read(&self) -> RwLockReadGuard<'_, LedgerCore> {
        match self.core.read() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("ledger read lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, LedgerCore> {
        match self.core.write() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("ledger write lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}
