//! Instance cache with build reservations.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::adapter::Adapter;

/// Cache key for an adapter instance.
///
/// `lower(adapter_id)`, then `__<item key>` when an item config was resolved,
/// then `__<hash>` of the context when the adapter is context-aware.
pub(crate) fn cache_key(
    adapter_id: &str,
    item: Option<&str>,
    contextual: bool,
    context: Option<&Path>,
) -> String {
    let mut key = adapter_id.to_lowercase();
    if let Some(item) = item.filter(|i| !i.is_empty()) {
        key.push_str("__");
        key.push_str(item);
    }

    let Some(context) = context.filter(|_| contextual) else {
        return key;
    };
    let context = context.to_string_lossy();
    if context.is_empty() {
        return key;
    }

    let hash = fnv1a64(&[key.as_bytes(), &[0], context.as_bytes()]);
    format!("{key}__{hash:016x}")
}

fn fnv1a64(chunks: &[&[u8]]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    chunks.iter().flat_map(|c| c.iter()).fold(OFFSET, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(PRIME)
    })
}

enum Entry {
    Building,
    Ready(Arc<dyn Adapter>),
}

pub(crate) enum Probe<'a> {
    Ready(Arc<dyn Adapter>),
    Reserved(Reservation<'a>),
}

/// Ready instances by key, plus placeholders for instances being built.
///
/// Only ready instances are ever handed out. Callers that find a placeholder
/// wait until its builder either fills it or gives up.
#[derive(Default)]
pub(crate) struct InstanceCache {
    entries: Mutex<HashMap<String, Entry>>,
    changed: Condvar,
}

impl InstanceCache {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the ready instance for `key`, or reserves `key` for the caller
    /// to build. Probe and reservation happen under one lock.
    pub(crate) fn probe_or_reserve(&self, key: &str) -> Probe<'_> {
        let mut entries = self.lock();
        loop {
            match entries.get(key) {
                Some(Entry::Ready(adapter)) => return Probe::Ready(Arc::clone(adapter)),
                Some(Entry::Building) => {
                    entries = self
                        .changed
                        .wait(entries)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                None => {
                    entries.insert(key.to_string(), Entry::Building);
                    return Probe::Reserved(Reservation {
                        cache: self,
                        key: key.to_string(),
                        fulfilled: false,
                    });
                }
            }
        }
    }

    /// Keys of ready instances, sorted.
    pub(crate) fn ready_keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self
            .lock()
            .iter()
            .filter(|(_, e)| matches!(e, Entry::Ready(_)))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Drops every ready instance. Builds in flight are unaffected.
    pub(crate) fn clear(&self) {
        self.lock().retain(|_, e| matches!(e, Entry::Building));
    }
}

/// Exclusive right to build one cache key. Dropping it unfulfilled releases
/// the key so a later request can try again.
pub(crate) struct Reservation<'a> {
    cache: &'a InstanceCache,
    key: String,
    fulfilled: bool,
}

impl Reservation<'_> {
    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn fulfill(mut self, adapter: Arc<dyn Adapter>) {
        self.cache
            .lock()
            .insert(self.key.clone(), Entry::Ready(adapter));
        self.fulfilled = true;
        self.cache.changed.notify_all();
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.fulfilled {
            return;
        }
        let mut entries = self.cache.lock();
        if matches!(entries.get(&self.key), Some(Entry::Building)) {
            entries.remove(&self.key);
        }
        drop(entries);
        self.cache.changed.notify_all();
    }
}
