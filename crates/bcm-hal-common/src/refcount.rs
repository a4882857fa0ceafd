//! Reference-counted shared-resource table.
//!
//! Several software owners may share one hardware object (a named counter,
//! an exact port range). `RefCountMap` keeps `(object, refcount)` per key and
//! never auto-vivifies: `map[key].refs++` on a missing key is a bug upstream,
//! so it is reported instead of silently creating an entry.
//!
//! Dropping the last reference hands the object back to the caller. With
//! RAII hardware wrappers that is where the destroy call happens.

use std::collections::BTreeMap;
use thiserror::Error;

/// Refcount misuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RefCountError {
    #[error("key not found")]
    KeyNotFound,

    #[error("reference count underflow")]
    RefCountUnderflow,
}

/// Trait for types that carry a reference count.
pub trait HasRefCount {
    /// Increments the reference count and returns the new value.
    fn increment_ref(&mut self) -> u32;

    /// Decrements the reference count and returns the new value.
    ///
    /// Returns `None` if the count is already zero.
    fn decrement_ref(&mut self) -> Option<u32>;

    fn ref_count(&self) -> u32;
}

/// A value together with the number of owners referencing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefCounted<T> {
    value: T,
    refs: u32,
}

impl<T> RefCounted<T> {
    /// Wraps a freshly created value with one reference.
    pub fn new(value: T) -> Self {
        Self { value, refs: 1 }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> HasRefCount for RefCounted<T> {
    fn increment_ref(&mut self) -> u32 {
        self.refs += 1;
        self.refs
    }

    fn decrement_ref(&mut self) -> Option<u32> {
        self.refs = self.refs.checked_sub(1)?;
        Some(self.refs)
    }

    fn ref_count(&self) -> u32 {
        self.refs
    }
}

/// Ordered map from a semantic key to a shared, refcounted object.
#[derive(Debug)]
pub struct RefCountMap<K, V> {
    inner: BTreeMap<K, RefCounted<V>>,
}

impl<K: Ord, V> RefCountMap<K, V> {
    pub fn new() -> Self {
        Self {
            inner: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.contains_key(key)
    }

    /// Returns the object for `key`. **This never creates entries.**
    pub fn get(&self, key: &K) -> Option<&V> {
        self.inner.get(key).map(RefCounted::value)
    }

    pub fn ref_count(&self, key: &K) -> Option<u32> {
        self.inner.get(key).map(HasRefCount::ref_count)
    }

    /// Takes a reference on `key`, creating the object with refcount 1 if
    /// absent.
    ///
    /// `create` runs only when the key is absent; its error is returned
    /// unchanged and nothing is inserted.
    pub fn inc_ref_or_create<F, E>(&mut self, key: K, create: F) -> Result<(&V, u32), E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        use std::collections::btree_map::Entry;

        match self.inner.entry(key) {
            Entry::Occupied(occupied) => {
                let entry = occupied.into_mut();
                let refs = entry.increment_ref();
                Ok((&entry.value, refs))
            }
            Entry::Vacant(vacant) => {
                let entry = vacant.insert(RefCounted::new(create()?));
                Ok((&entry.value, 1))
            }
        }
    }

    /// Takes another reference on an existing key.
    pub fn inc_ref(&mut self, key: &K) -> Result<u32, RefCountError> {
        self.inner
            .get_mut(key)
            .map(HasRefCount::increment_ref)
            .ok_or(RefCountError::KeyNotFound)
    }

    /// Drops one reference on `key`.
    ///
    /// Returns the object once its last reference is gone, `None` while other
    /// owners remain.
    pub fn deref(&mut self, key: &K) -> Result<Option<V>, RefCountError> {
        let entry = self.inner.get_mut(key).ok_or(RefCountError::KeyNotFound)?;
        let remaining = entry
            .decrement_ref()
            .ok_or(RefCountError::RefCountUnderflow)?;
        if remaining > 0 {
            return Ok(None);
        }
        Ok(self.inner.remove(key).map(RefCounted::into_inner))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.inner.iter().map(|(k, v)| (k, &v.value))
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.inner.keys()
    }

    /// Removes every entry regardless of refcount, returning the objects in
    /// key order.
    pub fn drain(&mut self) -> Vec<(K, V)> {
        std::mem::take(&mut self.inner)
            .into_iter()
            .map(|(k, v)| (k, v.into_inner()))
            .collect()
    }
}

impl<K: Ord, V> Default for RefCountMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn create_ok(v: i32) -> impl FnOnce() -> Result<i32, String> {
        move || Ok(v)
    }

    #[test]
    fn test_get_never_creates() {
        let map: RefCountMap<String, i32> = RefCountMap::new();
        assert!(map.get(&"missing".to_string()).is_none());
        assert_eq!(map.ref_count(&"missing".to_string()), None);
        assert!(map.is_empty());
    }

    #[test]
    fn test_inc_ref_or_create_shares_object() {
        let mut map = RefCountMap::new();
        let (v, refs) = map.inc_ref_or_create("a", create_ok(1)).unwrap();
        assert_eq!((*v, refs), (1, 1));

        // second create closure must not run
        let (v, refs) = map
            .inc_ref_or_create("a", || Err::<i32, String>("called".into()))
            .unwrap();
        assert_eq!((*v, refs), (1, 2));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_failed_create_inserts_nothing() {
        let mut map: RefCountMap<&str, i32> = RefCountMap::new();
        let err = map
            .inc_ref_or_create("a", || Err::<i32, _>("full"))
            .unwrap_err();
        assert_eq!(err, "full");
        assert!(!map.contains_key(&"a"));
    }

    #[test]
    fn test_deref_releases_on_last_reference() {
        let mut map = RefCountMap::new();
        map.inc_ref_or_create("a", create_ok(5)).unwrap();
        map.inc_ref_or_create("a", create_ok(6)).unwrap();

        assert_eq!(map.deref(&"a"), Ok(None));
        assert_eq!(map.ref_count(&"a"), Some(1));
        assert_eq!(map.deref(&"a"), Ok(Some(5)));
        assert!(map.is_empty());
    }

    #[test]
    fn test_deref_missing_is_error() {
        let mut map: RefCountMap<&str, i32> = RefCountMap::new();
        assert_eq!(map.deref(&"a"), Err(RefCountError::KeyNotFound));
        assert_eq!(map.inc_ref(&"a"), Err(RefCountError::KeyNotFound));

        map.inc_ref_or_create("a", create_ok(1)).unwrap();
        map.deref(&"a").unwrap();
        assert_eq!(map.deref(&"a"), Err(RefCountError::KeyNotFound));
    }

    #[test]
    fn test_refcounted_underflow() {
        let mut v = RefCounted::new(());
        assert_eq!(v.decrement_ref(), Some(0));
        assert_eq!(v.decrement_ref(), None);
    }
}
