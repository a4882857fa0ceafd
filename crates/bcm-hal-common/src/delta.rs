//! State deltas.
//!
//! The state-management layer hands the hardware layer immutable snapshots.
//! A [`StateDelta`] is the ordered list of per-object events between two
//! snapshots of one feature map (ACLs keyed by name, mirrors keyed by name,
//! TeFlow entries keyed by flow).
//!
//! Removals are ordered before changes and additions. A retired object must
//! release its shared resources before a replacement can take a reference on
//! the same key, otherwise the replacement creates a duplicate instead of
//! reusing it.

use std::collections::BTreeMap;
use std::sync::Arc;

/// One object-level change.
#[derive(Debug)]
pub enum DeltaEvent<T> {
    Added(Arc<T>),
    Removed(Arc<T>),
    Changed { old: Arc<T>, new: Arc<T> },
}

impl<T> Clone for DeltaEvent<T> {
    fn clone(&self) -> Self {
        match self {
            DeltaEvent::Added(v) => DeltaEvent::Added(Arc::clone(v)),
            DeltaEvent::Removed(v) => DeltaEvent::Removed(Arc::clone(v)),
            DeltaEvent::Changed { old, new } => DeltaEvent::Changed {
                old: Arc::clone(old),
                new: Arc::clone(new),
            },
        }
    }
}

impl<T> DeltaEvent<T> {
    /// The object as it is after this event, `None` for removals.
    pub fn new_value(&self) -> Option<&Arc<T>> {
        match self {
            DeltaEvent::Added(v) | DeltaEvent::Changed { new: v, .. } => Some(v),
            DeltaEvent::Removed(_) => None,
        }
    }

    /// The object as it was before this event, `None` for additions.
    pub fn old_value(&self) -> Option<&Arc<T>> {
        match self {
            DeltaEvent::Removed(v) | DeltaEvent::Changed { old: v, .. } => Some(v),
            DeltaEvent::Added(_) => None,
        }
    }
}

/// Ordered events between two snapshots of a feature map.
#[derive(Debug)]
pub struct StateDelta<T> {
    events: Vec<DeltaEvent<T>>,
}

impl<T> Clone for StateDelta<T> {
    fn clone(&self) -> Self {
        Self {
            events: self.events.clone(),
        }
    }
}

impl<T> Default for StateDelta<T> {
    fn default() -> Self {
        Self { events: Vec::new() }
    }
}

impl<T: PartialEq> StateDelta<T> {
    /// Computes the delta from `old` to `new`.
    ///
    /// Objects that are the same `Arc` or compare equal produce no event.
    pub fn between<K: Ord>(old: &BTreeMap<K, Arc<T>>, new: &BTreeMap<K, Arc<T>>) -> Self {
        let mut removed = Vec::new();
        let mut changed = Vec::new();
        let mut added = Vec::new();

        for (key, old_value) in old {
            match new.get(key) {
                None => removed.push(DeltaEvent::Removed(Arc::clone(old_value))),
                Some(new_value) => {
                    if !Arc::ptr_eq(old_value, new_value) && old_value != new_value {
                        changed.push(DeltaEvent::Changed {
                            old: Arc::clone(old_value),
                            new: Arc::clone(new_value),
                        });
                    }
                }
            }
        }
        for (key, new_value) in new {
            if !old.contains_key(key) {
                added.push(DeltaEvent::Added(Arc::clone(new_value)));
            }
        }

        removed.append(&mut changed);
        removed.append(&mut added);
        Self { events: removed }
    }
}

impl<T> StateDelta<T> {
    /// Builds a delta from explicit events, keeping their order.
    pub fn from_events(events: Vec<DeltaEvent<T>>) -> Self {
        Self { events }
    }

    /// Every object of `snapshot` as an addition.
    pub fn all_added<K>(snapshot: &BTreeMap<K, Arc<T>>) -> Self {
        Self {
            events: snapshot
                .values()
                .map(|v| DeltaEvent::Added(Arc::clone(v)))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeltaEvent<T>> {
        self.events.iter()
    }
}

impl<T> IntoIterator for StateDelta<T> {
    type Item = DeltaEvent<T>;
    type IntoIter = std::vec::IntoIter<DeltaEvent<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn snapshot(items: &[(&'static str, i32)]) -> BTreeMap<&'static str, Arc<i32>> {
        items.iter().map(|(k, v)| (*k, Arc::new(*v))).collect()
    }

    fn describe(delta: &StateDelta<i32>) -> Vec<String> {
        delta
            .iter()
            .map(|e| match e {
                DeltaEvent::Added(v) => format!("+{}", v),
                DeltaEvent::Removed(v) => format!("-{}", v),
                DeltaEvent::Changed { old, new } => format!("{}->{}", old, new),
            })
            .collect()
    }

    #[test]
    fn test_removals_come_first() {
        let old = snapshot(&[("a", 1), ("b", 2), ("z", 26)]);
        let new = snapshot(&[("a", 1), ("b", 3), ("c", 4)]);
        let delta = StateDelta::between(&old, &new);
        assert_eq!(describe(&delta), vec!["-26", "2->3", "+4"]);
    }

    #[test]
    fn test_equal_snapshots_produce_nothing() {
        let old = snapshot(&[("a", 1)]);
        let new = snapshot(&[("a", 1)]);
        assert!(StateDelta::between(&old, &new).is_empty());
    }

    #[test]
    fn test_all_added() {
        let delta = StateDelta::all_added(&snapshot(&[("a", 1), ("b", 2)]));
        assert_eq!(describe(&delta), vec!["+1", "+2"]);
        assert!(delta.iter().all(|e| e.old_value().is_none()));
    }
}
