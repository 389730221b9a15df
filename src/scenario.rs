//! Scripted sequences of ledger calls.
//!
//! A scenario file carries a [`LedgerConfig`] and an ordered list of steps;
//! the runner applies them to a [`PubSubLedger`], watching every topic it
//! touches so deliveries can be reported next to the publish that caused them.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::TryRecvError};

use crate::config::{load_json, ConfigError, LedgerConfig};
use crate::dispatch::{Delivery, DeliveryReport};
use crate::error::PubSubError;
use crate::identity::CallContext;
use crate::ledger::{AccountBalance, AccountId, Amount, TopicName};
use crate::pubsub::PubSubLedger;
use crate::topics::Advertised;

#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("building ledger: {0}")]
    Genesis(PubSubError),
    #[error("step {index} ({op}) failed: {source}")]
    Step {
        index: usize,
        op: &'static str,
        source: PubSubError,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Advertise {
        from: AccountId,
        topic: TopicName,
    },
    Subscribe {
        from: AccountId,
        topic: TopicName,
        value: Amount,
    },
    Publish {
        from: AccountId,
        topic: TopicName,
        message: String,
        #[serde(default)]
        fee: Amount,
    },
    Unsubscribe {
        from: AccountId,
        topic: TopicName,
    },
    Balance {
        topic: TopicName,
        subscriber: AccountId,
    },
    Accounts {
        label: String,
        accounts: Vec<AccountId>,
    },
}

impl Step {
    pub fn op(&self) -> &'static str {
        match self {
            Step::Advertise { .. } => "advertise",
            Step::Subscribe { .. } => "subscribe",
            Step::Publish { .. } => "publish",
            Step::Unsubscribe { .. } => "unsubscribe",
            Step::Balance { .. } => "balance",
            Step::Accounts { .. } => "accounts",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StepOutcome {
    Advertised {
        topic: TopicName,
        owner: AccountId,
        created: bool,
    },
    Subscribed {
        topic: TopicName,
        subscriber: AccountId,
        deposit: Amount,
    },
    Published {
        report: DeliveryReport,
        received: Vec<Delivery>,
    },
    Unsubscribed {
        topic: TopicName,
        subscriber: AccountId,
        refund: Amount,
    },
    Balance {
        topic: TopicName,
        subscriber: AccountId,
        amount: Amount,
    },
    Accounts {
        label: String,
        balances: BTreeMap<AccountId, AccountBalance>,
    },
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Scenario {
    #[serde(default)]
    pub config: LedgerConfig,
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ScenarioError> {
        Ok(load_json(path.as_ref())?)
    }

    pub fn build_ledger(&self) -> Result<PubSubLedger, ScenarioError> {
        PubSubLedger::from_config(&self.config).map_err(ScenarioError::Genesis)
    }

    /// Apply every step in order, stopping at the first failing call.
    /// `on_step` sees each outcome as soon as it is produced.
    pub fn run(
        &self,
        ledger: &PubSubLedger,
        mut on_step: impl FnMut(usize, &StepOutcome),
    ) -> Result<Vec<StepOutcome>, ScenarioError> {
        let mut watchers: HashMap<TopicName, broadcast::Receiver<Delivery>> = HashMap::new();
        let mut outcomes = Vec::with_capacity(self.steps.len());
        for (index, step) in self.steps.iter().enumerate() {
            let outcome = apply(ledger, step, &mut watchers).map_err(|source| {
                ScenarioError::Step {
                    index,
                    op: step.op(),
                    source,
                }
            })?;
            on_step(index, &outcome);
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }
}

fn apply(
    ledger: &PubSubLedger,
    step: &Step,
    watchers: &mut HashMap<TopicName, broadcast::Receiver<Delivery>>,
) -> Result<StepOutcome, PubSubError> {
    match step {
        Step::Advertise { from, topic } => {
            let outcome = ledger.advertise(&CallContext::new(from.clone()), topic)?;
            watchers
                .entry(topic.clone())
                .or_insert_with(|| ledger.watch(topic));
            Ok(StepOutcome::Advertised {
                topic: topic.clone(),
                owner: from.clone(),
                created: outcome == Advertised::Created,
            })
        }
        Step::Subscribe { from, topic, value } => {
            ledger.subscribe(&CallContext::new(from.clone()).with_value(*value), topic)?;
            Ok(StepOutcome::Subscribed {
                topic: topic.clone(),
                subscriber: from.clone(),
                deposit: *value,
            })
        }
        Step::Publish {
            from,
            topic,
            message,
            fee,
        } => {
            let rx = watchers
                .entry(topic.clone())
                .or_insert_with(|| ledger.watch(topic));
            let report = ledger.publish(
                &CallContext::new(from.clone()),
                topic,
                message.as_str(),
                *fee,
            )?;
            Ok(StepOutcome::Published {
                report,
                received: drain(rx),
            })
        }
        Step::Unsubscribe { from, topic } => {
            let refund = ledger.unsubscribe(&CallContext::new(from.clone()), topic)?;
            Ok(StepOutcome::Unsubscribed {
                topic: topic.clone(),
                subscriber: from.clone(),
                refund,
            })
        }
        Step::Balance { topic, subscriber } => Ok(StepOutcome::Balance {
            topic: topic.clone(),
            subscriber: subscriber.clone(),
            amount: ledger.subscriber_balance(topic, subscriber),
        }),
        Step::Accounts { label, accounts } => Ok(StepOutcome::Accounts {
            label: label.clone(),
            balances: accounts
                .iter()
                .map(|a| (a.clone(), ledger.account(a)))
                .collect(),
        }),
    }
}

fn drain(rx: &mut broadcast::Receiver<Delivery>) -> Vec<Delivery> {
    let mut received = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(delivery) => received.push(delivery),
            Err(TryRecvError::Lagged(missed)) => {
                tracing::warn!(missed, "delivery watcher lagged");
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
    received
}
