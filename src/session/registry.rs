//! Topic registry: listeners, cached values and live channels per topic.
//!
//! ```text
//!   topics:          TopicKey  ─► TopicEntry { topic, listeners, value?, channel? }
//!   subscriptions:   ChannelId ─► TopicKey        (live wire subscriptions)
//!   aliases:         ChannelId ─► ChannelId       (merged away ─► surviving)
//!   listener_topics: ListenerId ─► TopicKey       (where each listener lives now)
//! ```
//!
//! Invariants: a topic's `channel` is `Some` iff `subscriptions` maps that
//! channel back to it; a topic with no listeners is removed immediately;
//! patches only apply on top of a value set by a reset.

use std::collections::HashMap;
use std::rc::Rc;

use super::listener::{ListenerEntry, ListenerId};
use crate::protocol::ChannelId;
use crate::topic::{Topic, TopicKey};
use crate::updates::{apply_updates, Update, UpdateError};
use crate::value::Value;

/// Upper bound on alias hops followed when resolving a channel.
const MAX_ALIAS_HOPS: usize = 32;

#[derive(Debug)]
struct TopicEntry {
    topic: Topic,
    listeners: Vec<Rc<ListenerEntry>>,
    value: Option<Value>,
    channel: Option<ChannelId>,
}

/// Listeners to notify and the value to give them.
pub(crate) type Broadcast = (Vec<Rc<ListenerEntry>>, Value);

/// Result of adding a listener.
#[derive(Debug)]
pub(crate) struct Added {
    /// The topic did not exist before.
    pub(crate) created: bool,
    /// Cached value to replay to the new listener.
    pub(crate) replay: Option<Value>,
}

/// Result of removing a listener.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Removed {
    /// The topic the listener belonged to.
    pub(crate) key: TopicKey,
    /// The topic lost its last listener and is gone.
    pub(crate) emptied: bool,
    /// Live channel to release on the wire, if the topic is gone.
    pub(crate) release: Option<ChannelId>,
}

#[derive(Debug, Default)]
pub(crate) struct Registry {
    topics: HashMap<TopicKey, TopicEntry>,
    subscriptions: HashMap<ChannelId, TopicKey>,
    aliases: HashMap<ChannelId, ChannelId>,
    listener_topics: HashMap<ListenerId, TopicKey>,
}

impl Registry {
    /// Register `listener` on `topic`, creating the topic if needed.
    pub(crate) fn add_listener(&mut self, topic: Topic, listener: Rc<ListenerEntry>) -> Added {
        let key = topic.key();
        self.listener_topics.insert(listener.id(), key.clone());
        match self.topics.get_mut(&key) {
            Some(entry) => {
                entry.listeners.push(listener);
                Added {
                    created: false,
                    replay: entry.value.clone(),
                }
            }
            None => {
                self.topics.insert(
                    key,
                    TopicEntry {
                        topic,
                        listeners: vec![listener],
                        value: None,
                        channel: None,
                    },
                );
                Added {
                    created: true,
                    replay: None,
                }
            }
        }
    }

    /// Remove one listener. `None` if it is not registered (anymore).
    pub(crate) fn remove_listener(&mut self, id: ListenerId) -> Option<Removed> {
        let key = self.listener_topics.remove(&id)?;
        let entry = self.topics.get_mut(&key)?;
        entry.listeners.retain(|l| l.id() != id);
        if !entry.listeners.is_empty() {
            return Some(Removed {
                key,
                emptied: false,
                release: None,
            });
        }

        let release = self.remove_topic(&key).and_then(|entry| entry.channel);
        Some(Removed {
            key,
            emptied: true,
            release,
        })
    }

    /// Topics waiting for a wire subscription, in key order.
    pub(crate) fn unbound(&self) -> Vec<(TopicKey, Topic)> {
        let mut pending: Vec<(TopicKey, Topic)> = self
            .topics
            .iter()
            .filter(|(_, entry)| entry.channel.is_none())
            .map(|(key, entry)| (key.clone(), entry.topic.clone()))
            .collect();
        pending.sort_by(|a, b| a.0.cmp(&b.0));
        pending
    }

    /// Record that `key` is live on the wire as `channel`.
    pub(crate) fn bind(&mut self, key: &TopicKey, channel: ChannelId) {
        if let Some(entry) = self.topics.get_mut(key) {
            if let Some(old) = entry.channel.replace(channel) {
                self.subscriptions.remove(&old);
            }
            self.subscriptions.insert(channel, key.clone());
        }
    }

    /// Follow aliases from `channel` to the channel that now carries it.
    pub(crate) fn resolve_channel(&self, channel: ChannelId) -> ChannelId {
        let mut current = channel;
        for _ in 0..MAX_ALIAS_HOPS {
            match self.aliases.get(&current) {
                Some(&next) => current = next,
                None => return current,
            }
        }
        log::warn!("[Session] Alias chain from channel {channel} is too long");
        current
    }

    /// Whether `channel` (after aliasing) is a live subscription.
    pub(crate) fn is_subscribed(&self, channel: ChannelId) -> bool {
        self.subscriptions.contains_key(&self.resolve_channel(channel))
    }

    /// Replace the value of the topic on `channel`.
    pub(crate) fn reset(&mut self, channel: ChannelId, value: Value) -> Option<Broadcast> {
        let entry = self.entry_for_channel(channel)?;
        entry.value = Some(value.clone());
        Some((entry.listeners.clone(), value))
    }

    /// Apply a patch batch to the topic on `channel`.
    ///
    /// `Ok(None)` if there is no such topic or it has no baseline yet. On
    /// error the cached value is left as it was.
    pub(crate) fn apply(
        &mut self,
        channel: ChannelId,
        updates: &[Update],
    ) -> Result<Option<Broadcast>, UpdateError> {
        let Some(entry) = self.entry_for_channel(channel) else {
            return Ok(None);
        };
        let Some(current) = &entry.value else {
            log::warn!("[Session] Patch for {} before any reset, ignoring", entry.topic);
            return Ok(None);
        };
        let next = apply_updates(current, updates)?;
        entry.value = Some(next.clone());
        Ok(Some((entry.listeners.clone(), next)))
    }

    /// Tear down the topic on `channel` after a server error. Returns its
    /// listeners.
    pub(crate) fn fail(&mut self, channel: ChannelId) -> Option<Vec<Rc<ListenerEntry>>> {
        let key = self.subscriptions.get(&self.resolve_channel(channel))?.clone();
        let entry = self.remove_topic(&key)?;
        for listener in &entry.listeners {
            self.listener_topics.remove(&listener.id());
        }
        Some(entry.listeners)
    }

    /// Merge the topic on `aliased` into the topic on `target`.
    ///
    /// Returns the migrated listeners together with the target's cached
    /// value, if it has one. `None` when either side is unknown.
    pub(crate) fn alias(
        &mut self,
        aliased: ChannelId,
        target: ChannelId,
    ) -> Option<(Vec<Rc<ListenerEntry>>, Option<Value>)> {
        let aliased = self.resolve_channel(aliased);
        let target = self.resolve_channel(target);
        if aliased == target {
            return None;
        }
        let aliased_key = self.subscriptions.get(&aliased)?.clone();
        let target_key = self.subscriptions.get(&target)?.clone();

        self.subscriptions.remove(&aliased);
        let moved = self.topics.remove(&aliased_key)?.listeners;
        for listener in &moved {
            self.listener_topics.insert(listener.id(), target_key.clone());
        }
        for hop in self.aliases.values_mut() {
            if *hop == aliased {
                *hop = target;
            }
        }
        self.aliases.insert(aliased, target);

        let entry = self.topics.get_mut(&target_key)?;
        entry.listeners.extend(moved.iter().map(Rc::clone));
        Some((moved, entry.value.clone()))
    }

    /// Forget every live channel and cached value; keep listeners.
    pub(crate) fn disconnect(&mut self) {
        for entry in self.topics.values_mut() {
            entry.channel = None;
            entry.value = None;
        }
        self.subscriptions.clear();
        self.aliases.clear();
    }

    /// Forget everything.
    pub(crate) fn clear(&mut self) {
        self.topics.clear();
        self.subscriptions.clear();
        self.aliases.clear();
        self.listener_topics.clear();
    }

    /// Cached value of the topic with `key`.
    pub(crate) fn value(&self, key: &TopicKey) -> Option<Value> {
        self.topics.get(key).and_then(|entry| entry.value.clone())
    }

    /// Live channel of the topic with `key`.
    #[cfg(test)]
    pub(crate) fn channel(&self, key: &TopicKey) -> Option<ChannelId> {
        self.topics.get(key).and_then(|entry| entry.channel)
    }

    /// Whether listener `id` is still registered on some topic.
    pub(crate) fn contains_listener(&self, id: ListenerId) -> bool {
        self.listener_topics.contains_key(&id)
    }

    pub(crate) fn topic_count(&self) -> usize {
        self.topics.len()
    }

    fn entry_for_channel(&mut self, channel: ChannelId) -> Option<&mut TopicEntry> {
        let key = self.subscriptions.get(&self.resolve_channel(channel))?;
        self.topics.get_mut(key)
    }

    fn remove_topic(&mut self, key: &TopicKey) -> Option<TopicEntry> {
        let entry = self.topics.remove(key)?;
        if let Some(channel) = entry.channel {
            self.subscriptions.remove(&channel);
            self.aliases.retain(|_, target| *target != channel);
        }
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Listener;
    use crate::updates::PathKey;
    use serde_json::json;

    fn topic(segments: &[&str]) -> Topic {
        Topic::new(segments.iter().copied()).unwrap()
    }

    fn listener(id: ListenerId) -> Rc<ListenerEntry> {
        Rc::new(Listener::new(|_: &Value| {}).into_entry(id))
    }

    fn ids(listeners: &[Rc<ListenerEntry>]) -> Vec<ListenerId> {
        listeners.iter().map(|l| l.id()).collect()
    }

    #[test]
    fn test_second_listener_joins_existing_topic() {
        let mut registry = Registry::default();
        assert!(registry.add_listener(topic(&["a"]), listener(1)).created);
        let added = registry.add_listener(topic(&["a"]), listener(2));
        assert!(!added.created);
        assert!(added.replay.is_none());
        assert_eq!(registry.topic_count(), 1);
    }

    #[test]
    fn test_replay_cached_value_to_new_listener() {
        let mut registry = Registry::default();
        let t = topic(&["a"]);
        registry.add_listener(t.clone(), listener(1));
        registry.bind(&t.key(), 1);
        registry.reset(1, Value::from(json!({"n": 1})));

        let added = registry.add_listener(t, listener(2));
        assert_eq!(added.replay, Some(Value::from(json!({"n": 1}))));
    }

    #[test]
    fn test_remove_last_listener_releases_channel() {
        let mut registry = Registry::default();
        let t = topic(&["a"]);
        registry.add_listener(t.clone(), listener(1));
        registry.add_listener(t.clone(), listener(2));
        registry.bind(&t.key(), 7);

        let first = registry.remove_listener(1).unwrap();
        assert!(!first.emptied);
        assert_eq!(first.release, None);

        let last = registry.remove_listener(2).unwrap();
        assert!(last.emptied);
        assert_eq!(last.release, Some(7));
        assert_eq!(registry.topic_count(), 0);
        assert!(!registry.is_subscribed(7));
        assert!(registry.remove_listener(2).is_none());
    }

    #[test]
    fn test_patch_without_baseline_is_ignored() {
        let mut registry = Registry::default();
        let t = topic(&["a"]);
        registry.add_listener(t.clone(), listener(1));
        registry.bind(&t.key(), 1);
        let set = Update::Set {
            path: vec![PathKey::Key("x".into())],
            value: Value::from(json!(1)),
        };
        assert!(registry.apply(1, &[set]).unwrap().is_none());
        assert!(registry.value(&t.key()).is_none());
    }

    #[test]
    fn test_failed_batch_keeps_previous_value() {
        let mut registry = Registry::default();
        let t = topic(&["a"]);
        registry.add_listener(t.clone(), listener(1));
        registry.bind(&t.key(), 1);
        registry.reset(1, Value::from(json!({"list": [1]})));

        let batch = [
            Update::Set {
                path: vec![PathKey::Key("ok".into())],
                value: Value::from(json!(true)),
            },
            Update::Delete {
                path: vec![PathKey::Key("list".into())],
                key: "x".into(),
            },
        ];
        assert!(registry.apply(1, &batch).is_err());
        assert_eq!(registry.value(&t.key()), Some(Value::from(json!({"list": [1]}))));
    }

    #[test]
    fn test_alias_migrates_listeners_and_redirects() {
        let mut registry = Registry::default();
        let (a, b) = (topic(&["a"]), topic(&["b"]));
        registry.add_listener(a.clone(), listener(1));
        registry.add_listener(b.clone(), listener(2));
        registry.bind(&a.key(), 1);
        registry.bind(&b.key(), 2);
        registry.reset(2, Value::from(json!("target")));

        let (moved, value) = registry.alias(1, 2).unwrap();
        assert_eq!(ids(&moved), vec![1]);
        assert_eq!(value, Some(Value::from(json!("target"))));
        assert_eq!(registry.topic_count(), 1);
        assert_eq!(registry.resolve_channel(1), 2);

        // Late frames on the aliased channel land on the target.
        let (listeners, _) = registry.reset(1, Value::from(json!("late"))).unwrap();
        assert_eq!(ids(&listeners), vec![2, 1]);

        // The migrated listener alone does not release the target.
        assert_eq!(registry.remove_listener(1).unwrap().release, None);
        assert_eq!(registry.remove_listener(2).unwrap().release, Some(2));
        assert_eq!(registry.resolve_channel(1), 1);
    }

    #[test]
    fn test_alias_chain_points_at_final_target() {
        let mut registry = Registry::default();
        let (a, b, c) = (topic(&["a"]), topic(&["b"]), topic(&["c"]));
        registry.add_listener(a.clone(), listener(1));
        registry.add_listener(b.clone(), listener(2));
        registry.add_listener(c.clone(), listener(3));
        registry.bind(&a.key(), 1);
        registry.bind(&b.key(), 2);
        registry.bind(&c.key(), 3);

        registry.alias(1, 2).unwrap();
        registry.alias(2, 3).unwrap();
        assert_eq!(registry.aliases.get(&1), Some(&3));
        assert_eq!(registry.resolve_channel(1), 3);
        assert_eq!(registry.resolve_channel(2), 3);
        assert_eq!(registry.topic_count(), 1);

        // Removing the surviving topic drops every alias that led to it.
        registry.remove_listener(1).unwrap();
        registry.remove_listener(2).unwrap();
        assert_eq!(registry.remove_listener(3).unwrap().release, Some(3));
        assert!(registry.aliases.is_empty());
        assert_eq!(registry.resolve_channel(1), 1);
        assert_eq!(registry.resolve_channel(2), 2);
    }

    #[test]
    fn test_alias_with_unknown_side_is_ignored() {
        let mut registry = Registry::default();
        let a = topic(&["a"]);
        registry.add_listener(a.clone(), listener(1));
        registry.bind(&a.key(), 1);
        assert!(registry.alias(1, 9).is_none());
        assert!(registry.alias(9, 1).is_none());
        assert!(registry.alias(1, 1).is_none());
        assert_eq!(registry.channel(&a.key()), Some(1));
    }

    #[test]
    fn test_fail_removes_topic_and_listeners() {
        let mut registry = Registry::default();
        let a = topic(&["a"]);
        registry.add_listener(a.clone(), listener(1));
        registry.add_listener(a.clone(), listener(2));
        registry.bind(&a.key(), 3);

        let failed = registry.fail(3).unwrap();
        assert_eq!(ids(&failed), vec![1, 2]);
        assert_eq!(registry.topic_count(), 0);
        assert!(registry.remove_listener(1).is_none());
        assert!(registry.fail(3).is_none());
    }

    #[test]
    fn test_disconnect_keeps_listeners_drops_channels_and_values() {
        let mut registry = Registry::default();
        let (a, b) = (topic(&["a"]), topic(&["b"]));
        registry.add_listener(a.clone(), listener(1));
        registry.add_listener(b.clone(), listener(2));
        registry.bind(&a.key(), 1);
        registry.reset(1, Value::from(json!(1)));

        registry.disconnect();

        assert_eq!(registry.topic_count(), 2);
        assert!(!registry.is_subscribed(1));
        assert!(registry.value(&a.key()).is_none());
        let unbound: Vec<TopicKey> = registry.unbound().into_iter().map(|(k, _)| k).collect();
        assert_eq!(unbound, vec![a.key(), b.key()]);
    }
}
