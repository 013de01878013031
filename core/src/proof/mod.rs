//! Proofs and proof verification.
//!
//! Both trees are authenticated data structures: a holder of the root can check a claim about a
//! few leaves without the rest of the tree. This module exposes the proof types of each tree and
//! the functions which check them.
//!
//! A dense tree proves the leaves at a set of positions ([`Proof`]). The same proof also yields
//! the root after those leaves are replaced ([`calculate_root_from_update_data`]).
//!
//! A sparse tree proves the values of a set of keys, or their absence ([`SparseProof`]).

pub use dense_proof::{
    calculate_path_nodes, calculate_root_from_update_data, verify as verify_dense_proof,
    DenseProofError, Proof, SiblingHash,
};
pub use sparse_proof::{
    KeyOutOfScope, Query, QueryTerminal, SparseProof, SparseProofError, VerifiedSparseProof,
};

pub(crate) mod dense_proof;
pub(crate) mod sparse_proof;
