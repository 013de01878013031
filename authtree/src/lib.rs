//! Authenticated state and payload commitments.
//!
//! This crate pairs the trees of `authtree-core` with the pieces needed to run them: an
//! in-memory content-addressed store, staged writes which make mutations all-or-nothing, and
//! `StateTree`, a long-lived handle over a sparse tree which adopts its own roots.
//!
//! Dense trees need no store. They are re-exported here as they are.

pub use authtree_core::{
    codec,
    dense::{self, MerkleTree, NodeLocation},
    hasher::{self, BinaryHash, NodeHash, Sha2Hasher},
    proof::{self, Proof, SparseProof, VerifiedSparseProof},
    sparse::{self, SparseMerkleTree, DEFAULT_KEY_LENGTH},
    NodeStore,
};

#[cfg(feature = "blake3-hasher")]
pub use authtree_core::hasher::Blake3Hasher;

pub use options::Options;
pub use state::{Op, StateTree, StateView};
pub use store::{MemoryStore, Overlay};

mod options;
mod state;
mod store;
