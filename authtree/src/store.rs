//! Node stores.
//!
//! [`MemoryStore`] keeps nodes in a shared hash map. [`Overlay`] stages writes over any other
//! store until they are committed, which lets a mutation touch the store all at once or not at
//! all.

use std::{collections::HashMap, convert::Infallible, sync::Arc};

use parking_lot::{Mutex, RwLock};

use crate::NodeStore;

type NodeMap<V> = HashMap<Vec<u8>, V, ahash::RandomState>;

/// An in-memory content-addressed store.
///
/// Cloning produces another handle to the same nodes, so readers on other threads may share a
/// store with its writer.
#[derive(Clone, Default)]
pub struct MemoryStore {
    nodes: Arc<RwLock<NodeMap<Vec<u8>>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of stored nodes.
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    /// Whether no nodes are stored.
    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// Whether a node is stored under `key`.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.nodes.read().contains_key(key)
    }
}

impl NodeStore for MemoryStore {
    type Error = Infallible;

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Infallible> {
        Ok(self.nodes.read().get(key).cloned())
    }

    fn set(&self, key: &[u8], value: Vec<u8>) -> Result<(), Infallible> {
        self.nodes.write().insert(key.to_vec(), value);
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), Infallible> {
        self.nodes.write().remove(key);
        Ok(())
    }
}

/// Writes and deletes staged over a base store.
///
/// Reads observe staged changes first. Nothing reaches the base until [`Overlay::commit`];
/// dropping the overlay discards the staged changes.
pub struct Overlay<S> {
    base: S,
    // `None` stages a delete.
    staged: Mutex<NodeMap<Option<Vec<u8>>>>,
}

impl<S: NodeStore> Overlay<S> {
    /// Create an empty overlay over `base`.
    pub fn new(base: S) -> Self {
        Overlay {
            base,
            staged: Mutex::new(NodeMap::default()),
        }
    }

    /// The base store.
    pub fn base(&self) -> &S {
        &self.base
    }

    /// The number of staged changes.
    pub fn len(&self) -> usize {
        self.staged.lock().len()
    }

    /// Whether nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.staged.lock().is_empty()
    }

    /// Apply every staged change to the base store.
    ///
    /// A failing base store may be left with part of the changes applied.
    pub fn commit(self) -> Result<(), S::Error> {
        for (key, change) in self.staged.into_inner() {
            match change {
                Some(value) => self.base.set(&key, value)?,
                None => self.base.delete(&key)?,
            }
        }
        Ok(())
    }
}

impl<S: NodeStore> NodeStore for Overlay<S> {
    type Error = S::Error;

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, S::Error> {
        if let Some(change) = self.staged.lock().get(key) {
            return Ok(change.clone());
        }
        self.base.get(key)
    }

    fn set(&self, key: &[u8], value: Vec<u8>) -> Result<(), S::Error> {
        self.staged.lock().insert(key.to_vec(), Some(value));
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), S::Error> {
        self.staged.lock().insert(key.to_vec(), None);
        Ok(())
    }
}
