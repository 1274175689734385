use crate::core::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

/// Per-field maps from key text to the single live instance holding that key.
///
/// Slots hold `Weak` references only; a slot whose target has been dropped is
/// treated as empty and evicted on the next lookup or prune.
pub struct IdentityMap<T> {
    slots: Mutex<HashMap<String, HashMap<String, Weak<T>>>>,
}

impl<T> IdentityMap<T> {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let slots = fields
            .into_iter()
            .map(|f| (f.into(), HashMap::new()))
            .collect();
        Self {
            slots: Mutex::new(slots),
        }
    }

    pub fn tracks(&self, field: &str) -> bool {
        self.slots
            .lock()
            .map(|s| s.contains_key(field))
            .unwrap_or(false)
    }

    /// Live instance mapped under `key`, evicting the slot if its target is gone.
    pub fn get(&self, field: &str, key: &str) -> Result<Option<Arc<T>>> {
        let mut slots = self.slots.lock()?;
        let Some(map) = slots.get_mut(field) else {
            return Ok(None);
        };
        match map.get(key).map(Weak::upgrade) {
            Some(Some(live)) => Ok(Some(live)),
            Some(None) => {
                map.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Maps `key` to `candidate` unless a live instance already holds it.
    ///
    /// Returns whichever instance owns the slot afterwards. Untracked fields
    /// return the candidate unchanged.
    pub fn install(&self, field: &str, key: &str, candidate: &Arc<T>) -> Result<Arc<T>> {
        let mut slots = self.slots.lock()?;
        let Some(map) = slots.get_mut(field) else {
            return Ok(Arc::clone(candidate));
        };
        if let Some(live) = map.get(key).and_then(Weak::upgrade) {
            return Ok(live);
        }
        map.insert(key.to_string(), Arc::downgrade(candidate));
        Ok(Arc::clone(candidate))
    }

    pub fn remove(&self, field: &str, key: &str) -> Result<()> {
        let mut slots = self.slots.lock()?;
        if let Some(map) = slots.get_mut(field) {
            map.remove(key);
        }
        Ok(())
    }

    /// Removes the slot only if it points at `owner` or at nothing live.
    pub fn release(&self, field: &str, key: &str, owner: &Arc<T>) -> Result<()> {
        let mut slots = self.slots.lock()?;
        if let Some(map) = slots.get_mut(field) {
            let held_by_other = map
                .get(key)
                .and_then(Weak::upgrade)
                .is_some_and(|live| !Arc::ptr_eq(&live, owner));
            if !held_by_other {
                map.remove(key);
            }
        }
        Ok(())
    }

    /// Drops every dead slot, returning how many were evicted.
    pub fn prune(&self) -> Result<usize> {
        let mut slots = self.slots.lock()?;
        let mut evicted = 0;
        for map in slots.values_mut() {
            let before = map.len();
            map.retain(|_, weak| weak.strong_count() > 0);
            evicted += before - map.len();
        }
        Ok(evicted)
    }

    /// Number of live instances mapped for `field`.
    pub fn live_count(&self, field: &str) -> usize {
        self.slots
            .lock()
            .ok()
            .and_then(|s| {
                s.get(field)
                    .map(|m| m.values().filter(|w| w.strong_count() > 0).count())
            })
            .unwrap_or(0)
    }
}
