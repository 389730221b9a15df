use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::escrow::Subscription;
use crate::ledger::{AccountBalance, AccountId};
use crate::topics::Topic;

/// Consistent copy of the whole ledger taken under one read lock.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub height: u64,
    pub accounts: BTreeMap<AccountId, AccountBalance>,
    pub topics: Vec<Topic>,
    pub subscriptions: Vec<Subscription>,
    #[serde(with = "hex_root")]
    pub state_root: [u8; 32],
}

impl LedgerSnapshot {
    pub fn new(
        height: u64,
        accounts: BTreeMap<AccountId, AccountBalance>,
        topics: Vec<Topic>,
        subscriptions: Vec<Subscription>,
    ) -> Self {
        let state_root = compute_state_root(&accounts, &topics, &subscriptions);
        Self {
            height,
            accounts,
            topics,
            subscriptions,
            state_root,
        }
    }

    pub fn state_root_hex(&self) -> String {
        hex::encode(self.state_root)
    }
}

fn compute_state_root(
    accounts: &BTreeMap<AccountId, AccountBalance>,
    topics: &[Topic],
    subscriptions: &[Subscription],
) -> [u8; 32] {
    let mut leaves: Vec<[u8; 32]> = Vec::new();
    for (account, balance) in accounts {
        let mut hasher = Sha256::new();
        hasher.update(b"acct");
        hasher.update(account.as_bytes());
        hasher.update(balance.available.to_le_bytes());
        hasher.update(balance.locked.to_le_bytes());
        leaves.push(hasher.finalize().into());
    }
    for topic in topics {
        let mut hasher = Sha256::new();
        hasher.update(b"topic");
        hasher.update((topic.name.len() as u64).to_le_bytes());
        hasher.update(topic.name.as_bytes());
        hasher.update(topic.owner.as_bytes());
        leaves.push(hasher.finalize().into());
    }
    for sub in subscriptions {
        let mut hasher = Sha256::new();
        hasher.update(b"sub");
        hasher.update((sub.topic.len() as u64).to_le_bytes());
        hasher.update(sub.topic.as_bytes());
        hasher.update(sub.subscriber.as_bytes());
        hasher.update(sub.balance.to_le_bytes());
        hasher.update([sub.active as u8]);
        leaves.push(hasher.finalize().into());
    }
    build_merkle(leaves)
}

fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"topic-ledger-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity((leaves.len() + 1) / 2);
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            hasher.update(chunk.get(1).unwrap_or(&chunk[0]));
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}

mod hex_root {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let bytes = hex::decode(&encoded).map_err(D::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| D::Error::custom("state root must be 32 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accounts(pairs: &[(&str, u64, u64)]) -> BTreeMap<AccountId, AccountBalance> {
        pairs
            .iter()
            .map(|(id, available, locked)| {
                (
                    id.to_string(),
                    AccountBalance {
                        available: *available,
                        locked: *locked,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn state_root_is_deterministic_and_sensitive() {
        let snap = |bob: (u64, u64)| {
            let balances = accounts(&[("alice", 10, 0), ("bob", bob.0, bob.1)]);
            LedgerSnapshot::new(1, balances, vec![], vec![])
        };
        let a = snap((5, 5));
        let b = snap((5, 5));
        let c = snap((6, 4));
        assert_eq!(a.state_root, b.state_root);
        assert_ne!(a.state_root, c.state_root);
    }

    #[test]
    fn snapshot_json_carries_hex_root() {
        let snap = LedgerSnapshot::new(
            3,
            accounts(&[("alice", 1, 2)]),
            vec![Topic {
                name: "news".into(),
                owner: "alice".into(),
            }],
            vec![],
        );
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["state_root"], snap.state_root_hex());
        let back: LedgerSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back, snap);
    }
}
