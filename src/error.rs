use thiserror::Error;

use crate::ledger::{AccountId, LedgerError, TopicName};

/// Failure of a ledger operation. Every variant leaves the ledger unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PubSubError {
    /// The operation needs an advertised topic and none exists under this name.
    #[error("topic {topic} not found")]
    TopicNotFound { topic: TopicName },

    /// Publishing to (or re-advertising) a topic owned by someone else.
    #[error("{caller} may not {action} topic {topic}")]
    Unauthorized {
        topic: TopicName,
        caller: AccountId,
        action: &'static str,
    },

    #[error("{subscriber} is already subscribed to topic {topic}")]
    AlreadySubscribed {
        topic: TopicName,
        subscriber: AccountId,
    },

    #[error("{subscriber} is not subscribed to topic {topic}")]
    NotSubscribed {
        topic: TopicName,
        subscriber: AccountId,
    },

    /// Empty topic name, zero deposit, or value attached to a non-payable call.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Movement of funds on the external accounts failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}
