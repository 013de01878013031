//! Core operations and types of the authenticated tree layer.
//!
//! This crate defines two hash trees and the canonical node schema they share, in a
//! backend-agnostic manner:
//!   - the [`dense`] Merkle tree, committing an ordered sequence of leaves (block payloads,
//!     transaction lists),
//!   - the [`sparse`] Merkle tree, a binary trie over fixed-length keys committing mutable state.
//!
//! Both produce roots and proofs which must be byte-identical across implementations.
//!
//! The codecs, the dense tree and all proof verification routines of this crate do not require
//! the standard library, but do require Rust's alloc crate.

#![cfg_attr(all(not(feature = "std"), not(test)), no_std)]

extern crate alloc;

pub mod codec;
pub mod dense;
pub mod hasher;
pub mod proof;
pub mod sparse;
pub mod store;

pub use hasher::{BinaryHash, NodeHash};
pub use store::NodeStore;
