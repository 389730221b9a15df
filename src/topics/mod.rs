use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::PubSubError;
use crate::ledger::{AccountId, TopicName};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Topic {
    pub name: TopicName,
    pub owner: AccountId,
}

/// Result of a successful `advertise`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Advertised {
    Created,
    /// The caller already owns the topic; nothing changed.
    AlreadyOwned,
}

/// Advertised topics and their publishers. Topics are never removed and
/// their owner never changes.
#[derive(Clone, Debug, Default)]
pub struct TopicRegistry {
    topics: BTreeMap<TopicName, Topic>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advertise(
        &mut self,
        topic: &str,
        caller: &AccountId,
    ) -> Result<Advertised, PubSubError> {
        if topic.is_empty() {
            return Err(PubSubError::InvalidArgument("topic name must not be empty"));
        }
        if let Some(existing) = self.topics.get(topic) {
            if &existing.owner == caller {
                return Ok(Advertised::AlreadyOwned);
            }
            return Err(PubSubError::Unauthorized {
                topic: topic.to_string(),
                caller: caller.clone(),
                action: "advertise",
            });
        }
        self.topics.insert(
            topic.to_string(),
            Topic {
                name: topic.to_string(),
                owner: caller.clone(),
            },
        );
        Ok(Advertised::Created)
    }

    pub fn is_publisher(&self, topic: &str, caller: &str) -> bool {
        self.topics
            .get(topic)
            .map(|t| t.owner == caller)
            .unwrap_or(false)
    }

    pub fn get(&self, topic: &str) -> Option<&Topic> {
        self.topics.get(topic)
    }

    pub fn require(&self, topic: &str) -> Result<&Topic, PubSubError> {
        self.topics
            .get(topic)
            .ok_or_else(|| PubSubError::TopicNotFound {
                topic: topic.to_string(),
            })
    }

    pub fn owner(&self, topic: &str) -> Option<&AccountId> {
        self.topics.get(topic).map(|t| &t.owner)
    }

    pub fn topics(&self) -> impl Iterator<Item = &Topic> {
        self.topics.values()
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_advertiser_owns_the_topic() {
        let mut registry = TopicRegistry::new();
        let publisher = "publisher".to_string();
        assert_eq!(
            registry.advertise("news", &publisher).unwrap(),
            Advertised::Created
        );
        assert!(registry.is_publisher("news", "publisher"));
        assert!(!registry.is_publisher("news", "someone"));
        assert!(!registry.is_publisher("weather", "publisher"));
        assert_eq!(registry.owner("news"), Some(&publisher));
    }

    #[test]
    fn readvertise_by_owner_is_noop_and_by_other_is_rejected() {
        let mut registry = TopicRegistry::new();
        let a = "a".to_string();
        let b = "b".to_string();
        registry.advertise("news", &a).unwrap();
        assert_eq!(
            registry.advertise("news", &a).unwrap(),
            Advertised::AlreadyOwned
        );
        let err = registry.advertise("news", &b).unwrap_err();
        assert!(matches!(err, PubSubError::Unauthorized { action: "advertise", .. }));
        assert_eq!(registry.owner("news"), Some(&a));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn empty_topic_name_is_invalid() {
        let mut registry = TopicRegistry::new();
        let err = registry.advertise("", &"a".to_string()).unwrap_err();
        assert!(matches!(err, PubSubError::InvalidArgument(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn require_reports_unknown_topics() {
        let registry = TopicRegistry::new();
        let err = registry.require("missing").unwrap_err();
        assert_eq!(
            err,
            PubSubError::TopicNotFound {
                topic: "missing".into()
            }
        );
    }
}
