use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::PubSubError;
use crate::ledger::{AccountId, Amount, FundsLedger, TopicName};
use crate::topics::Topic;

/// A subscriber's escrowed deposit against one topic.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subscription {
    pub topic: TopicName,
    pub subscriber: AccountId,
    pub balance: Amount,
    pub active: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChargeOutcome {
    Charged { remaining: Amount },
    /// Balance below the fee; the subscription was left untouched.
    InsufficientFunds { balance: Amount },
}

/// Subscriptions of one topic, kept in the order their keys were first opened.
#[derive(Clone, Debug, Default)]
struct TopicBook {
    order: Vec<AccountId>,
    records: HashMap<AccountId, Subscription>,
}

impl TopicBook {
    fn active(&self) -> impl Iterator<Item = &Subscription> {
        self.order
            .iter()
            .filter_map(move |s| self.records.get(s))
            .filter(|r| r.active)
    }
}

#[derive(Clone, Debug, Default)]
pub struct EscrowLedger {
    books: BTreeMap<TopicName, TopicBook>,
}

impl EscrowLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (or reopen) a subscription and lock `deposit` from the
    /// subscriber's available funds.
    pub fn open(
        &mut self,
        funds: &mut FundsLedger,
        topic: &Topic,
        subscriber: &AccountId,
        deposit: Amount,
    ) -> Result<(), PubSubError> {
        if deposit == 0 {
            return Err(PubSubError::InvalidArgument("deposit must be positive"));
        }
        if self.is_active(&topic.name, subscriber) {
            return Err(PubSubError::AlreadySubscribed {
                topic: topic.name.clone(),
                subscriber: subscriber.clone(),
            });
        }
        funds.lock(subscriber, &topic.name, deposit)?;

        let book = self.books.entry(topic.name.clone()).or_default();
        if !book.records.contains_key(subscriber) {
            book.order.push(subscriber.clone());
        }
        book.records.insert(
            subscriber.clone(),
            Subscription {
                topic: topic.name.clone(),
                subscriber: subscriber.clone(),
                balance: deposit,
                active: true,
            },
        );
        Ok(())
    }

    /// Take `fee` from an active subscription and pay it to the topic owner.
    pub fn charge(
        &mut self,
        funds: &mut FundsLedger,
        topic: &Topic,
        subscriber: &AccountId,
        fee: Amount,
    ) -> Result<ChargeOutcome, PubSubError> {
        let record = self.active_record_mut(&topic.name, subscriber)?;
        if record.balance < fee {
            return Ok(ChargeOutcome::InsufficientFunds {
                balance: record.balance,
            });
        }
        funds.settle(subscriber, &topic.owner, &topic.name, fee)?;
        record.balance -= fee;
        Ok(ChargeOutcome::Charged {
            remaining: record.balance,
        })
    }

    /// Deactivate the subscription and refund whatever is left of the deposit.
    pub fn close(
        &mut self,
        funds: &mut FundsLedger,
        topic: &Topic,
        subscriber: &AccountId,
    ) -> Result<Amount, PubSubError> {
        let record = self.active_record_mut(&topic.name, subscriber)?;
        let refund = record.balance;
        funds.release(subscriber, &topic.name, refund)?;
        record.balance = 0;
        record.active = false;
        Ok(refund)
    }

    /// Stored balance, active or not. Unknown keys read as zero.
    pub fn balance_of(&self, topic: &str, subscriber: &str) -> Amount {
        self.get(topic, subscriber).map(|r| r.balance).unwrap_or(0)
    }

    pub fn get(&self, topic: &str, subscriber: &str) -> Option<&Subscription> {
        self.books.get(topic).and_then(|b| b.records.get(subscriber))
    }

    pub fn is_active(&self, topic: &str, subscriber: &str) -> bool {
        self.get(topic, subscriber).map(|r| r.active).unwrap_or(false)
    }

    /// Active subscribers of `topic` in delivery order.
    pub fn active_subscribers(&self, topic: &str) -> Vec<AccountId> {
        self.books
            .get(topic)
            .map(|b| b.active().map(|r| r.subscriber.clone()).collect())
            .unwrap_or_default()
    }

    /// Every subscription record, grouped by topic in name order and by
    /// subscriber in delivery order.
    pub fn subscriptions(&self) -> impl Iterator<Item = &Subscription> {
        self.books
            .values()
            .flat_map(|b| b.order.iter().filter_map(move |s| b.records.get(s)))
    }

    pub fn total_escrowed(&self) -> Amount {
        self.subscriptions()
            .filter(|r| r.active)
            .map(|r| r.balance)
            .sum()
    }

    fn active_record_mut(
        &mut self,
        topic: &str,
        subscriber: &AccountId,
    ) -> Result<&mut Subscription, PubSubError> {
        self.books
            .get_mut(topic)
            .and_then(|b| b.records.get_mut(subscriber))
            .filter(|r| r.active)
            .ok_or_else(|| PubSubError::NotSubscribed {
                topic: topic.to_string(),
                subscriber: subscriber.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (EscrowLedger, FundsLedger, Topic) {
        let mut funds = FundsLedger::new();
        funds.mint(&"s1".to_string(), 1_000).unwrap();
        funds.mint(&"s2".to_string(), 1_000).unwrap();
        let topic = Topic {
            name: "news".into(),
            owner: "publisher".into(),
        };
        (EscrowLedger::new(), funds, topic)
    }

    #[test]
    fn open_locks_deposit_and_records_balance() {
        let (mut escrow, mut funds, topic) = setup();
        let s1 = "s1".to_string();
        escrow.open(&mut funds, &topic, &s1, 300).unwrap();
        assert_eq!(escrow.balance_of("news", "s1"), 300);
        assert!(escrow.is_active("news", "s1"));
        assert_eq!(funds.account("s1").available, 700);
        assert_eq!(funds.account("s1").locked, 300);
    }

    #[test]
    fn open_rejects_zero_deposit_and_double_subscribe() {
        let (mut escrow, mut funds, topic) = setup();
        let s1 = "s1".to_string();
        let err = escrow.open(&mut funds, &topic, &s1, 0).unwrap_err();
        assert!(matches!(err, PubSubError::InvalidArgument(_)));

        escrow.open(&mut funds, &topic, &s1, 100).unwrap();
        let err = escrow.open(&mut funds, &topic, &s1, 100).unwrap_err();
        assert!(matches!(err, PubSubError::AlreadySubscribed { .. }));
        assert_eq!(escrow.balance_of("news", "s1"), 100);
        assert_eq!(funds.account("s1").locked, 100);
    }

    #[test]
    fn open_without_funds_records_nothing() {
        let (mut escrow, mut funds, topic) = setup();
        let err = escrow
            .open(&mut funds, &topic, &"s1".to_string(), 5_000)
            .unwrap_err();
        assert!(matches!(err, PubSubError::Ledger(_)));
        assert!(escrow.get("news", "s1").is_none());
        assert_eq!(funds.account("s1").available, 1_000);
    }

    #[test]
    fn charge_moves_fee_to_owner_or_skips_when_short() {
        let (mut escrow, mut funds, topic) = setup();
        let s1 = "s1".to_string();
        escrow.open(&mut funds, &topic, &s1, 120).unwrap();

        let outcome = escrow.charge(&mut funds, &topic, &s1, 50).unwrap();
        assert_eq!(outcome, ChargeOutcome::Charged { remaining: 70 });
        let outcome = escrow.charge(&mut funds, &topic, &s1, 50).unwrap();
        assert_eq!(outcome, ChargeOutcome::Charged { remaining: 20 });
        let outcome = escrow.charge(&mut funds, &topic, &s1, 50).unwrap();
        assert_eq!(outcome, ChargeOutcome::InsufficientFunds { balance: 20 });

        assert!(escrow.is_active("news", "s1"));
        assert_eq!(escrow.balance_of("news", "s1"), 20);
        assert_eq!(funds.account("publisher").available, 100);
        assert_eq!(funds.account("s1").locked, 20);
    }

    #[test]
    fn charge_requires_active_subscription() {
        let (mut escrow, mut funds, topic) = setup();
        let err = escrow
            .charge(&mut funds, &topic, &"s1".to_string(), 0)
            .unwrap_err();
        assert!(matches!(err, PubSubError::NotSubscribed { .. }));
    }

    #[test]
    fn close_refunds_and_allows_fresh_subscription() {
        let (mut escrow, mut funds, topic) = setup();
        let s1 = "s1".to_string();
        let s2 = "s2".to_string();
        escrow.open(&mut funds, &topic, &s1, 300).unwrap();
        escrow.open(&mut funds, &topic, &s2, 300).unwrap();
        escrow.charge(&mut funds, &topic, &s1, 40).unwrap();

        assert_eq!(escrow.close(&mut funds, &topic, &s1).unwrap(), 260);
        assert_eq!(escrow.balance_of("news", "s1"), 0);
        assert!(!escrow.is_active("news", "s1"));
        assert_eq!(funds.account("s1").available, 960);
        assert_eq!(funds.account("s1").locked, 0);

        let err = escrow.close(&mut funds, &topic, &s1).unwrap_err();
        assert!(matches!(err, PubSubError::NotSubscribed { .. }));
        assert_eq!(escrow.active_subscribers("news"), vec![s2.clone()]);

        // reopening keeps the first delivery slot
        escrow.open(&mut funds, &topic, &s1, 10).unwrap();
        assert_eq!(escrow.active_subscribers("news"), vec![s1, s2]);
        assert_eq!(escrow.balance_of("news", "s1"), 10);
        assert_eq!(escrow.total_escrowed(), 310);
        assert_eq!(funds.account("s1").locked + funds.account("s2").locked, 310);
    }

    #[test]
    fn unknown_keys_read_as_zero() {
        let escrow = EscrowLedger::new();
        assert_eq!(escrow.balance_of("nope", "nobody"), 0);
        assert!(escrow.active_subscribers("nope").is_empty());
    }
}
