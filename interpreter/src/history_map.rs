// Copyright 2021-2023 Protocol Labs
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::Hash;

/// A hash map that records an undo entry for every mutation, so that it can be rewound to any
/// earlier point in its history.
///
/// Values loaded lazily through [`HistoryMap::get_or_try_insert_with`] are treated as clean reads
/// and are not recorded: rewinding past them keeps them cached.
#[derive(Debug)]
pub(crate) struct HistoryMap<K, V> {
    map: HashMap<K, V>,
    undo: Vec<(K, Option<V>)>,
}

impl<K, V> Default for HistoryMap<K, V> {
    fn default() -> Self {
        Self {
            map: HashMap::new(),
            undo: Vec::new(),
        }
    }
}

impl<K, V> HistoryMap<K, V>
where
    K: Hash + Eq + Clone,
    V: Eq,
{
    /// Insert a value, recording the previous value (if any) in the undo log. Inserting a value
    /// equal to the current one is a no-op.
    pub fn insert(&mut self, k: K, v: V) {
        match self.map.entry(k) {
            Entry::Occupied(mut e) => {
                if e.get() == &v {
                    return;
                }
                let prev = std::mem::replace(e.get_mut(), v);
                self.undo.push((e.key().clone(), Some(prev)));
            }
            Entry::Vacant(e) => {
                self.undo.push((e.key().clone(), None));
                e.insert(v);
            }
        }
    }

    pub fn get(&self, k: &K) -> Option<&V> {
        self.map.get(k)
    }

    /// Return the cached value for `k`, loading it with `f` on a miss.
    pub fn get_or_try_insert_with<F, E>(&mut self, k: K, f: F) -> Result<&V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        match self.map.entry(k) {
            Entry::Occupied(e) => Ok(e.into_mut()),
            Entry::Vacant(e) => Ok(e.insert(f()?)),
        }
    }

    /// Undo every mutation recorded after `height`.
    pub fn rollback(&mut self, height: usize) {
        if height >= self.undo.len() {
            return;
        }
        for (k, prev) in self.undo.drain(height..).rev() {
            match prev {
                Some(v) => {
                    self.map.insert(k, v);
                }
                None => {
                    self.map.remove(&k);
                }
            }
        }
    }

    /// The current length of the undo log, usable as a rollback point.
    pub fn history_len(&self) -> usize {
        self.undo.len()
    }

    /// Forget the undo log, making all current values permanent.
    pub fn discard_history(&mut self) {
        self.undo.clear();
    }

    /// Iterate mutably over the entries. Changes made this way bypass the undo log.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&K, &mut V)> {
        self.map.iter_mut()
    }
}
