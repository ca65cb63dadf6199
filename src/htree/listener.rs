//! Record listeners
//!
//! Observers of a map's mutations. They run after the mutation has been
//! applied and after the store lock is released, in registration order.
//! An error from a listener is returned to the caller; the mutation stays.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::Result;

/// Callbacks for changes to a map
pub trait RecordListener<K, V>: Send + Sync {
    fn inserted(&self, _key: &K, _value: &V) -> Result<()> {
        Ok(())
    }

    fn updated(&self, _key: &K, _old: &V, _new: &V) -> Result<()> {
        Ok(())
    }

    fn removed(&self, _key: &K, _value: &V) -> Result<()> {
        Ok(())
    }
}

type Snapshot<K, V> = Arc<[Arc<dyn RecordListener<K, V>>]>;

/// Copy-on-write listener list. Registration swaps in a new snapshot, so a
/// callback may add or remove listeners while notifications are running.
pub(crate) struct Listeners<K, V> {
    current: RwLock<Snapshot<K, V>>,
}

impl<K, V> Listeners<K, V> {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::from(Vec::new())),
        }
    }

    pub fn add(&self, listener: Arc<dyn RecordListener<K, V>>) {
        let mut current = self.current.write();
        let mut next: Vec<_> = current.iter().cloned().collect();
        next.push(listener);
        *current = Arc::from(next);
    }

    /// Unregister by identity; false when it was not registered
    pub fn remove(&self, listener: &Arc<dyn RecordListener<K, V>>) -> bool {
        let mut current = self.current.write();
        let before = current.len();
        let next: Vec<_> = current
            .iter()
            .filter(|existing| !Arc::ptr_eq(*existing, listener))
            .cloned()
            .collect();
        let removed = next.len() != before;
        *current = Arc::from(next);
        removed
    }

    pub fn snapshot(&self) -> Snapshot<K, V> {
        self.current.read().clone()
    }

    pub fn len(&self) -> usize {
        self.current.read().len()
    }

    pub fn notify_put(&self, key: &K, old: Option<&V>, new: &V) -> Result<()> {
        for listener in self.snapshot().iter() {
            match old {
                Some(old) => listener.updated(key, old, new)?,
                None => listener.inserted(key, new)?,
            }
        }
        Ok(())
    }

    pub fn notify_removed(&self, key: &K, value: &V) -> Result<()> {
        for listener in self.snapshot().iter() {
            listener.removed(key, value)?;
        }
        Ok(())
    }
}
