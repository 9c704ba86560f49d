//! Keyed directory of live unit handles.
//!
//! A [`Directory`] maps a string key to the handle of the unit currently
//! serving it. Registration is atomic per key: two racing registrations for
//! the same key resolve to a single live handle. Handles whose unit has
//! terminated are treated as absent and pruned on access.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// What a directory needs to know about a handle.
pub trait DirectoryEntry: Clone + Send + Sync + 'static {
    /// Identifies one incarnation of a unit; a restarted unit gets a new id.
    fn instance_id(&self) -> u64;

    /// Whether the unit behind the handle can still receive messages.
    fn is_alive(&self) -> bool;
}

/// A concurrent key to handle map.
#[derive(Debug)]
pub struct Directory<H> {
    entries: DashMap<String, H>,
}

impl<H> Default for Directory<H> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<H: DirectoryEntry> Directory<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the live handle under `key`, or register the one built by
    /// `spawn`. The flag is `true` when `spawn` ran.
    ///
    /// `spawn` runs while the key's shard is locked and must not touch this
    /// directory.
    pub fn get_or_register_with<F>(&self, key: &str, spawn: F) -> (H, bool)
    where
        F: FnOnce() -> H,
    {
        match self.entries.entry(key.to_owned()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_alive() {
                    (occupied.get().clone(), false)
                } else {
                    let handle = spawn();
                    occupied.insert(handle.clone());
                    (handle, true)
                }
            }
            Entry::Vacant(vacant) => {
                let handle = spawn();
                vacant.insert(handle.clone());
                (handle, true)
            }
        }
    }

    /// Live handle under `key`, pruning a dead one.
    pub fn lookup(&self, key: &str) -> Option<H> {
        let handle = self.entries.get(key).map(|h| h.value().clone())?;
        if handle.is_alive() {
            Some(handle)
        } else {
            let id = handle.instance_id();
            self.entries.remove_if(key, |_, h| h.instance_id() == id);
            None
        }
    }

    /// Remove `key` only if it still points at `instance_id`.
    pub fn deregister(&self, key: &str, instance_id: u64) -> bool {
        self.entries
            .remove_if(key, |_, h| h.instance_id() == instance_id)
            .is_some()
    }

    /// Every live handle at the time of the call.
    pub fn handles(&self) -> Vec<H> {
        self.entries
            .iter()
            .map(|e| e.value().clone())
            .filter(H::is_alive)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
