//! Topic registry: topic name to subscribed sessions.
//!
//! Plain data, no locking. The [`ConnectionManager`](super::manager::ConnectionManager)
//! owns one behind its lock, so every mutation here is already exclusive.

use std::collections::{HashMap, HashSet};

use apex_core::SessionId;

/// Maps topic names to the sessions subscribed to them.
///
/// Topics are created on first subscribe and left in place when they empty.
#[derive(Debug, Default)]
pub struct TopicRegistry {
    topics: HashMap<String, HashSet<SessionId>>,
}

impl TopicRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `session` to `topic`. Returns `false` if it was already there.
    pub fn subscribe(&mut self, session: &SessionId, topic: &str) -> bool {
        self.topics
            .entry(topic.to_owned())
            .or_default()
            .insert(session.clone())
    }

    /// Remove `session` from `topic`. Returns `false` if it was not there.
    pub fn unsubscribe(&mut self, session: &SessionId, topic: &str) -> bool {
        self.topics
            .get_mut(topic)
            .is_some_and(|set| set.remove(session))
    }

    /// Purge `session` from every topic. Returns how many sets it was in.
    pub fn remove_session(&mut self, session: &SessionId) -> usize {
        let mut removed = 0;
        for set in self.topics.values_mut() {
            if set.remove(session) {
                removed += 1;
            }
        }
        removed
    }

    /// Snapshot of a topic's subscribers, in no particular order.
    pub fn subscribers_of(&self, topic: &str) -> Vec<SessionId> {
        self.topics
            .get(topic)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Iterate a topic's subscribers without copying.
    pub(crate) fn iter_subscribers<'a>(
        &'a self,
        topic: &str,
    ) -> impl Iterator<Item = &'a SessionId> + 'a {
        self.topics.get(topic).into_iter().flatten()
    }

    /// Subscribers of one topic.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map_or(0, HashSet::len)
    }

    /// Topics ever subscribed to, including emptied ones.
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    /// Topics with at least one subscriber.
    pub fn active_topic_count(&self) -> usize {
        self.topics.values().filter(|set| !set.is_empty()).count()
    }

    /// Whether `session` is subscribed to `topic`.
    pub fn is_subscribed(&self, session: &SessionId, topic: &str) -> bool {
        self.topics
            .get(topic)
            .is_some_and(|set| set.contains(session))
    }
}
