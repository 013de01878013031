//! The contract of a content-addressed node store.
//!
//! This is not intended so much for abstraction as it is for dependency injection: the sparse
//! tree only needs `get`, `set` and `delete` over node hashes. Durability and transactional
//! semantics belong to the implementation.

use alloc::vec::Vec;

/// A key-value store where nodes are kept under their content hash.
///
/// All methods take `&self`; implementations are expected to use interior mutability. Nodes
/// referenced by a published root are immutable, so any number of readers may share a store
/// while a single writer per root adds new nodes.
pub trait NodeStore {
    /// The error produced by store I/O.
    type Error: core::fmt::Debug + core::fmt::Display;

    /// Load the value stored under `key`. `None` if nothing is stored there.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Store `value` under `key`, replacing any previous value.
    fn set(&self, key: &[u8], value: Vec<u8>) -> Result<(), Self::Error>;

    /// Delete the value under `key`. Deleting an absent key is not an error.
    fn delete(&self, key: &[u8]) -> Result<(), Self::Error>;
}

impl<S: NodeStore + ?Sized> NodeStore for &S {
    type Error = S::Error;

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Self::Error> {
        (**self).get(key)
    }

    fn set(&self, key: &[u8], value: Vec<u8>) -> Result<(), Self::Error> {
        (**self).set(key, value)
    }

    fn delete(&self, key: &[u8]) -> Result<(), Self::Error> {
        (**self).delete(key)
    }
}
