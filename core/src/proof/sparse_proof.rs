//! Proofs of the values of several keys in a sparse tree.
//!
//! Each query follows its key from the root until it meets the terminal of the key's path: an
//! empty sub-tree, or a leaf. A leaf holding the queried key proves its value. An empty sub-tree,
//! or a leaf holding a different key, proves that the key has no value.
//!
//! Siblings which are empty sub-trees are not transmitted. Each query carries a bitmap with one
//! bit per level of its path, set where the sibling is a real node. Paths are merged deepest
//! first so that siblings shared by several queries appear once, and siblings lying on another
//! query's path are not transmitted at all.

use crate::{
    codec::{branch_hash, encode_sparse_leaf},
    hasher::{BinaryHash, NodeHash},
};

use alloc::{collections::BTreeMap, vec::Vec};
use bitvec::prelude::*;
use core::cmp::Ordering;

/// The terminal node met by a query.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "borsh",
    derive(borsh::BorshDeserialize, borsh::BorshSerialize)
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum QueryTerminal {
    /// An empty sub-tree.
    Empty,
    /// A leaf. Its key shares the first `depth` bits with the queried key.
    Leaf {
        /// The key of the leaf.
        key: Vec<u8>,
        /// The value of the leaf.
        value: Vec<u8>,
    },
}

impl QueryTerminal {
    pub(crate) fn hash<H: BinaryHash>(&self) -> NodeHash {
        match self {
            QueryTerminal::Empty => H::EMPTY,
            QueryTerminal::Leaf { key, value } => encode_sparse_leaf::<H>(key, value).hash,
        }
    }
}

/// The path of one queried key.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "borsh",
    derive(borsh::BorshDeserialize, borsh::BorshSerialize)
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Query {
    /// The queried key.
    pub key: Vec<u8>,
    /// The node ending the key's path.
    pub terminal: QueryTerminal,
    /// The number of branches above the terminal.
    pub depth: u16,
    /// `depth` bits, most significant first. Bit `i` is set when the sibling of the node at
    /// depth `i + 1` is not empty.
    pub bitmap: Vec<u8>,
}

/// A proof of the values of several keys.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "borsh",
    derive(borsh::BorshDeserialize, borsh::BorshSerialize)
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SparseProof {
    /// The queries, ordered by key.
    pub queries: Vec<Query>,
    /// The non-empty siblings which cannot be derived from the queries, in consumption order.
    pub sibling_hashes: Vec<NodeHash>,
}

/// Errors in sparse proof verification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SparseProofError {
    /// The proof is consistent but commits to a different root.
    #[error("root mismatch")]
    RootMismatch,
    /// The sibling hashes ran out.
    #[error("missing sibling hashes")]
    MissingSiblings,
    /// Some sibling hashes were never used.
    #[error("{0} sibling hashes were not used")]
    TooManySiblings(usize),
    /// A key of the proof has another length than the rest.
    #[error("key has {actual} bytes, expected {expected}")]
    KeyLengthMismatch {
        /// The key length of the proof.
        expected: usize,
        /// The offending key length.
        actual: usize,
    },
    /// A leaf terminal is not on the path of its query, or holds no value.
    #[error("query terminal is out of scope of its key")]
    TerminalOutOfScope,
    /// Two queries disagree about the tree.
    #[error("conflicting queries")]
    ConflictingQueries,
    /// A depth exceeding the key bits, or a bitmap not fitting the depth. Bitmap bits past the
    /// depth must be clear.
    #[error("query depth out of range")]
    DepthOutOfRange,
    /// Nothing to prove.
    #[error("proof has no queries")]
    EmptyProof,
}

/// The key was not queried by the verified proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("key is out of scope of this proof")]
pub struct KeyOutOfScope;

#[derive(Debug, Clone)]
struct VerifiedPath {
    path: Position,
    terminal: QueryTerminal,
}

/// A sparse proof which was checked against a root.
#[derive(Debug, Clone)]
pub struct VerifiedSparseProof {
    paths: Vec<VerifiedPath>,
    root: NodeHash,
}

impl VerifiedSparseProof {
    /// The root the proof was verified against.
    pub fn root(&self) -> NodeHash {
        self.root
    }

    /// The value of `key`: `Some` if it is proven present, `None` if it is proven absent.
    ///
    /// Any key ending on one of the proven terminals is in scope, not only the queried keys.
    pub fn value(&self, key: &[u8]) -> Result<Option<&[u8]>, KeyOutOfScope> {
        let path = self
            .paths
            .iter()
            .find(|p| p.path.covers(key))
            .ok_or(KeyOutOfScope)?;

        Ok(match path.terminal {
            QueryTerminal::Leaf {
                key: ref leaf_key,
                ref value,
            } if leaf_key == key => Some(value.as_slice()),
            _ => None,
        })
    }

    /// Whether the proof shows that `key` has no value.
    pub fn confirm_nonexistence(&self, key: &[u8]) -> Result<bool, KeyOutOfScope> {
        Ok(self.value(key)?.is_none())
    }
}

impl SparseProof {
    /// Verify the proof against `root`.
    pub fn verify<H: BinaryHash>(&self, root: NodeHash) -> Result<VerifiedSparseProof, SparseProofError> {
        let key_length = self
            .queries
            .first()
            .map(|q| q.key.len())
            .ok_or(SparseProofError::EmptyProof)?;

        for query in &self.queries {
            check_query(query, key_length)?;
        }

        let entries = self.queries.iter().map(|query| PathEntry {
            key: &query.key,
            depth: query.depth,
            hash: query.terminal.hash::<H>(),
            bitmap: &query.bitmap,
        });

        let mut siblings = self.sibling_hashes.iter();
        let computed = merge::<H>(entries, |_| {
            siblings
                .next()
                .copied()
                .ok_or(SparseProofError::MissingSiblings)
        })?;

        let unused = siblings.len();
        if unused > 0 {
            return Err(SparseProofError::TooManySiblings(unused));
        }
        if computed != root {
            return Err(SparseProofError::RootMismatch);
        }

        let mut paths: Vec<VerifiedPath> = self
            .queries
            .iter()
            .map(|query| VerifiedPath {
                path: Position::of(&query.key, query.depth),
                terminal: query.terminal.clone(),
            })
            .collect();
        paths.sort_by(|a, b| a.path.cmp(&b.path));
        paths.dedup_by(|a, b| a.path == b.path);

        Ok(VerifiedSparseProof { paths, root })
    }
}

fn check_query(query: &Query, key_length: usize) -> Result<(), SparseProofError> {
    if query.key.len() != key_length {
        return Err(SparseProofError::KeyLengthMismatch {
            expected: key_length,
            actual: query.key.len(),
        });
    }

    let depth = query.depth as usize;
    if depth > key_length * 8 || query.bitmap.len() != bitmap_len(query.depth) {
        return Err(SparseProofError::DepthOutOfRange);
    }
    if query.bitmap.view_bits::<Msb0>()[depth..].any() {
        return Err(SparseProofError::DepthOutOfRange);
    }

    if let QueryTerminal::Leaf { key, value } = &query.terminal {
        if key.len() != key_length {
            return Err(SparseProofError::KeyLengthMismatch {
                expected: key_length,
                actual: key.len(),
            });
        }
        let shares_path =
            key.view_bits::<Msb0>()[..depth] == query.key.view_bits::<Msb0>()[..depth];
        if !shares_path || value.is_empty() {
            return Err(SparseProofError::TerminalOutOfScope);
        }
    }

    Ok(())
}

/// The number of bytes of a bitmap covering `depth` levels.
pub(crate) fn bitmap_len(depth: u16) -> usize {
    (depth as usize + 7) / 8
}

/// A node position: the first `depth` bits of any key below it, the remaining bits cleared.
///
/// Positions order deepest first, then by path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Position {
    depth: u16,
    path: Vec<u8>,
}

impl Position {
    pub(crate) fn of(key: &[u8], depth: u16) -> Self {
        let mut path = key.to_vec();
        path.view_bits_mut::<Msb0>()[depth as usize..].fill(false);
        Position { depth, path }
    }

    fn covers(&self, key: &[u8]) -> bool {
        let depth = self.depth as usize;
        key.len() == self.path.len()
            && key.view_bits::<Msb0>()[..depth] == self.path.view_bits::<Msb0>()[..depth]
    }

    // the last bit of the path. the position must be below the root.
    fn is_right(&self) -> bool {
        self.path.view_bits::<Msb0>()[self.depth as usize - 1]
    }

    fn sibling(&self) -> Self {
        let mut sibling = self.clone();
        let bit = self.depth as usize - 1;
        let bits = sibling.path.view_bits_mut::<Msb0>();
        let flipped = !bits[bit];
        bits.set(bit, flipped);
        sibling
    }

    fn parent(&self) -> Self {
        Position::of(&self.path, self.depth - 1)
    }
}

impl Ord for Position {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .depth
            .cmp(&self.depth)
            .then_with(|| self.path.cmp(&other.path))
    }
}

impl PartialOrd for Position {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A query path entering the merge.
pub(crate) struct PathEntry<'a> {
    pub key: &'a [u8],
    pub depth: u16,
    pub hash: NodeHash,
    pub bitmap: &'a [u8],
}

/// Merge query paths into the root, deepest position first.
///
/// `resolve` is asked for the sibling of each position whose sibling is neither empty nor on the
/// path of another query, in the canonical sibling order. Generation and verification share the
/// merge, so generated siblings are listed exactly in consumption order.
///
/// Entries must have been checked for consistent key lengths, depths and bitmap lengths.
pub(crate) fn merge<'a, H: BinaryHash>(
    entries: impl IntoIterator<Item = PathEntry<'a>>,
    mut resolve: impl FnMut(&Position) -> Result<NodeHash, SparseProofError>,
) -> Result<NodeHash, SparseProofError> {
    let mut pending: BTreeMap<Position, (NodeHash, BitVec<u8, Msb0>)> = BTreeMap::new();
    for entry in entries {
        let position = Position::of(entry.key, entry.depth);
        let bits = entry.bitmap.view_bits::<Msb0>()[..entry.depth as usize].to_bitvec();
        match pending.get(&position) {
            Some((hash, existing_bits)) => {
                if *hash != entry.hash || *existing_bits != bits {
                    return Err(SparseProofError::ConflictingQueries);
                }
            }
            None => {
                pending.insert(position, (entry.hash, bits));
            }
        }
    }

    while let Some((position, (hash, mut bits))) = pending.pop_first() {
        if position.depth == 0 {
            if !pending.is_empty() {
                return Err(SparseProofError::ConflictingQueries);
            }
            return Ok(hash);
        }

        let level = position.depth as usize - 1;
        let sibling_hash = match pending.remove(&position.sibling()) {
            Some((sibling_hash, sibling_bits)) => {
                if sibling_bits[..level] != bits[..level] {
                    return Err(SparseProofError::ConflictingQueries);
                }
                sibling_hash
            }
            None if bits[level] => resolve(&position)?,
            None => H::EMPTY,
        };

        let parent_hash = if position.is_right() {
            branch_hash::<H>(&sibling_hash, &hash)
        } else {
            branch_hash::<H>(&hash, &sibling_hash)
        };

        // a query ending at the parent would claim a terminal where there is a branch.
        let parent = position.parent();
        if pending.contains_key(&parent) {
            return Err(SparseProofError::ConflictingQueries);
        }
        bits.truncate(level);
        pending.insert(parent, (parent_hash, bits));
    }

    Err(SparseProofError::EmptyProof)
}
