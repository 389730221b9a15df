//! Metered publish/subscribe ledger.
//!
//! Publishers advertise named topics, subscribers lock a deposit against a
//! topic, every published message is charged against each active
//! subscriber's deposit, and unsubscribing refunds what is left.
//!
//! * [`topics`]: topic registry and publish rights.
//! * [`escrow`]: per (topic, subscriber) locked balances.
//! * [`dispatch`]: charging subscribers and broadcasting deliveries.
//! * [`ledger`]: external funds accounts and the fund-movement journal.
//! * [`pubsub`]: [`PubSubLedger`], the thread-safe facade over all of the above.
//! * [`scenario`]: scripted runs of ledger calls, used by the CLI.

pub mod config;
pub mod dispatch;
pub mod escrow;
pub mod identity;
pub mod ledger;
pub mod pubsub;
pub mod scenario;
pub mod snapshot;
pub mod topics;

mod error;

pub use config::{ConfigError, GenesisAccount, LedgerConfig};
pub use dispatch::{Delivery, DeliveryReport, Message};
pub use error::PubSubError;
pub use identity::CallContext;
pub use ledger::{AccountBalance, AccountId, Amount, LedgerError, TopicName};
pub use pubsub::PubSubLedger;
pub use snapshot::LedgerSnapshot;
pub use topics::Advertised;
