//! Multi-leaf proofs of a dense tree.
//!
//! A proof carries the tree size, the proven locations and the sibling hashes which cannot be
//! derived from the proven nodes themselves. Siblings are listed in the order the verifier needs
//! them: nodes are combined lowest location first, and every pair which is not on the path of
//! some proven node is taken from the front of the list.

use crate::{
    codec::{branch_hash, dense_leaf_hash, split_children, MalformedNode, NODE_HASH_SIZE},
    dense::layout::{contains, layer_structure, pair_within, parent_location, root_location},
    dense::{NodeLocation, NodeSide},
    hasher::{BinaryHash, NodeHash},
};

use alloc::{
    collections::{BTreeMap, BTreeSet},
    vec::Vec,
};

/// The hash of a node needed to verify a proof, along with its location.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "borsh",
    derive(borsh::BorshDeserialize, borsh::BorshSerialize)
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SiblingHash {
    /// The node hash.
    pub hash: NodeHash,
    /// The layer of the node.
    pub layer_index: u8,
    /// The position of the node within its layer.
    pub node_index: u32,
}

impl SiblingHash {
    /// The location of the node.
    pub fn location(&self) -> NodeLocation {
        NodeLocation::new(self.layer_index, self.node_index)
    }
}

/// A proof of inclusion of several nodes of a dense tree.
///
/// Order matters in both lists and must be preserved exactly as generated.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "borsh",
    derive(borsh::BorshDeserialize, borsh::BorshSerialize)
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Proof {
    /// The number of leaves in the tree.
    pub size: u32,
    /// The proven locations, ascending.
    pub indexes: Vec<NodeLocation>,
    /// The sibling hashes, in consumption order.
    pub sibling_hashes: Vec<SiblingHash>,
}

/// Errors in dense proof generation and verification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DenseProofError {
    /// The number of query values differs from the number of proven locations.
    #[error("{data} query values for {indexes} indexes")]
    ProofShapeMismatch {
        /// The number of query values.
        data: usize,
        /// The number of proven locations.
        indexes: usize,
    },
    /// Nothing to prove.
    #[error("proof has no indexes")]
    EmptyProof,
    /// A location outside of the tree, or not usable where it was given.
    #[error("location {0} is not valid for this tree")]
    InvalidLocation(NodeLocation),
    /// A location was proven twice.
    #[error("location {0} appears twice")]
    DuplicateIndex(NodeLocation),
    /// The next sibling hash is not the one needed.
    #[error("expected sibling at {expected}, found {found}")]
    SiblingMismatch {
        /// The location the verifier needed.
        expected: NodeLocation,
        /// The location of the next supplied sibling.
        found: NodeLocation,
    },
    /// A proven location lies on the path of another one to the root.
    #[error("location {0} lies below another proven location")]
    NestedIndex(NodeLocation),
    /// The sibling hashes ran out.
    #[error("missing sibling at {0}")]
    MissingSibling(NodeLocation),
    /// Some sibling hashes were never used.
    #[error("{0} sibling hashes were not used")]
    TooManySiblings(usize),
    /// A query value could not be read as a node.
    #[error(transparent)]
    Malformed(#[from] MalformedNode),
}

/// Reconstruct every node needed to recompute the root from the given query values.
///
/// `query_data[i]` belongs at `indexes[i]`. Leaf queries carry a leaf hash and branch queries a
/// stored branch encoding, of which only the trailing child hashes are read.
///
/// Returns the table of known nodes, which holds the root on success.
pub fn calculate_path_nodes<H: BinaryHash, D: AsRef<[u8]>>(
    query_data: &[D],
    size: u32,
    indexes: &[NodeLocation],
    sibling_hashes: &[SiblingHash],
) -> Result<BTreeMap<NodeLocation, NodeHash>, DenseProofError> {
    if query_data.len() != indexes.len() {
        return Err(DenseProofError::ProofShapeMismatch {
            data: query_data.len(),
            indexes: indexes.len(),
        });
    }
    if indexes.is_empty() {
        return Err(DenseProofError::EmptyProof);
    }

    let mut table = BTreeMap::new();
    for (data, &location) in query_data.iter().zip(indexes) {
        if !contains(location, size) {
            return Err(DenseProofError::InvalidLocation(location));
        }
        let hash = query_hash::<H>(data.as_ref(), location)?;
        if table.insert(location, hash).is_some() {
            return Err(DenseProofError::DuplicateIndex(location));
        }
    }

    let mut siblings = sibling_hashes.iter();
    let table = reconstruct::<H>(size, table, |expected| {
        let sibling = siblings
            .next()
            .ok_or(DenseProofError::MissingSibling(expected))?;
        if sibling.location() != expected {
            return Err(DenseProofError::SiblingMismatch {
                expected,
                found: sibling.location(),
            });
        }
        Ok(sibling.hash)
    })?;

    match siblings.len() {
        0 => Ok(table),
        unused => Err(DenseProofError::TooManySiblings(unused)),
    }
}

/// Recompute the root of a tree in which the proven leaves hold `update_data`.
///
/// With the original leaf values this is the root the proof was generated against.
pub fn calculate_root_from_update_data<H: BinaryHash, D: AsRef<[u8]>>(
    update_data: &[D],
    proof: &Proof,
) -> Result<NodeHash, DenseProofError> {
    if let Some(&branch) = proof.indexes.iter().find(|l| l.layer_index != 0) {
        return Err(DenseProofError::InvalidLocation(branch));
    }

    let leaf_hashes: Vec<NodeHash> = update_data
        .iter()
        .map(|leaf| dense_leaf_hash::<H>(leaf.as_ref()))
        .collect();
    let table = calculate_path_nodes::<H, _>(
        &leaf_hashes,
        proof.size,
        &proof.indexes,
        &proof.sibling_hashes,
    )?;

    let root = root_location(proof.size);
    table
        .get(&root)
        .copied()
        .ok_or(DenseProofError::InvalidLocation(root))
}

/// Verify that the proven leaves hold `leaves` in the tree with the given root.
///
/// `Ok(false)` means the proof is well-formed but proves a different root.
pub fn verify<H: BinaryHash, D: AsRef<[u8]>>(
    leaves: &[D],
    proof: &Proof,
    root: NodeHash,
) -> Result<bool, DenseProofError> {
    Ok(calculate_root_from_update_data::<H, D>(leaves, proof)? == root)
}

fn query_hash<H: BinaryHash>(data: &[u8], location: NodeLocation) -> Result<NodeHash, MalformedNode> {
    if location.layer_index == 0 {
        return data.try_into().map_err(|_| MalformedNode::Length {
            kind: "leaf query",
            expected: NODE_HASH_SIZE,
            actual: data.len(),
        });
    }

    if data.len() < 2 * NODE_HASH_SIZE {
        return Err(MalformedNode::Length {
            kind: "branch query",
            expected: 2 * NODE_HASH_SIZE,
            actual: data.len(),
        });
    }
    let (left, right) = split_children(&data[data.len() - 2 * NODE_HASH_SIZE..]);
    Ok(branch_hash::<H>(&left, &right))
}

/// Walk from the seeded nodes to the root, filling `table` with every node on the way.
///
/// Every pair which cannot be derived from the seeds is requested from `resolve`, in the
/// canonical sibling order. Generation and verification share this walk, so a generated proof
/// lists its siblings exactly in the order verification consumes them.
pub(crate) fn reconstruct<H: BinaryHash>(
    size: u32,
    mut table: BTreeMap<NodeLocation, NodeHash>,
    mut resolve: impl FnMut(NodeLocation) -> Result<NodeHash, DenseProofError>,
) -> Result<BTreeMap<NodeLocation, NodeHash>, DenseProofError> {
    let structure = layer_structure(size);
    let root = root_location(size);
    let pair_of = |location| {
        pair_within(&structure, location).ok_or(DenseProofError::InvalidLocation(location))
    };

    // every node on the path of a seed to the root. a seed below another would never be
    // bound to the root.
    let mut derivable = BTreeSet::new();
    for &seed in table.keys() {
        let mut location = seed;
        derivable.insert(location);
        while location != root {
            location = parent_location(location, pair_of(location)?);
            if table.contains_key(&location) {
                return Err(DenseProofError::NestedIndex(seed));
            }
            derivable.insert(location);
        }
    }

    let mut pending: BTreeSet<NodeLocation> = table.keys().copied().collect();
    while let Some(location) = pending.pop_first() {
        if location == root {
            continue;
        }

        let pair = pair_of(location)?;
        let pair_hash = if derivable.contains(&pair) {
            // a derivable pair above is combined once it is computed itself.
            if pair.layer_index > location.layer_index {
                continue;
            }
            table
                .get(&pair)
                .copied()
                .ok_or(DenseProofError::InvalidLocation(pair))?
        } else {
            let hash = resolve(pair)?;
            table.insert(pair, hash);
            hash
        };

        let parent = parent_location(location, pair);
        if table.contains_key(&parent) {
            continue;
        }

        let hash = table[&location];
        let parent_hash = match NodeSide::of_pair(location, pair) {
            NodeSide::Right => branch_hash::<H>(&hash, &pair_hash),
            NodeSide::Left => branch_hash::<H>(&pair_hash, &hash),
        };
        table.insert(parent, parent_hash);
        pending.insert(parent);
    }

    Ok(table)
}
