//! The dense Merkle tree.
//!
//! A dense tree commits an ordered sequence of leaves, such as the payload of a block. It is
//! built fresh for each commitment and discarded once its root and proofs have been extracted,
//! so it lives entirely in memory.
//!
//! See [`layout`] for the shape of trees whose leaf count is not a power of two.

use crate::{
    codec::{dense_branch, dense_leaf, DenseNode, MalformedNode},
    hasher::{BinaryHash, NodeHash},
    proof::{dense_proof, DenseProofError, Proof, SiblingHash},
};

use alloc::{collections::BTreeMap, vec::Vec};
use core::marker::PhantomData;

pub mod layout;

pub use layout::{NodeLocation, NodeSide};

use layout::{layer_structure, pair_within, parent_location, root_location};

/// Errors encountered while building a dense tree.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    /// Node indices are 32 bits wide.
    #[error("a dense tree holds at most 2^32 - 1 leaves")]
    TooManyLeaves,
    /// A pre-hashed leaf was not a hash.
    #[error(transparent)]
    Malformed(#[from] MalformedNode),
}

/// An in-memory dense Merkle tree over an ordered sequence of leaves.
#[derive(Debug, Clone)]
pub struct MerkleTree<H> {
    size: u32,
    pre_hashed: bool,
    nodes: BTreeMap<NodeLocation, DenseNode>,
    _marker: PhantomData<H>,
}

impl<H: BinaryHash> MerkleTree<H> {
    /// Build a tree over the given raw leaf values, in order.
    pub fn new<I>(leaves: I) -> Result<Self, BuildError>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        Self::build(leaves, false)
    }

    /// Build a tree over leaves which are already hashed. Every item must be a 32-byte hash.
    pub fn from_leaf_hashes<I>(leaf_hashes: I) -> Result<Self, BuildError>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        Self::build(leaf_hashes, true)
    }

    fn build<I>(leaves: I, pre_hashed: bool) -> Result<Self, BuildError>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        let mut nodes = BTreeMap::new();
        let mut size = 0u32;
        for leaf in leaves {
            let node = dense_leaf::<H>(leaf.as_ref(), size, pre_hashed)?;
            nodes.insert(node_location(&node), node);
            size = size.checked_add(1).ok_or(BuildError::TooManyLeaves)?;
        }
        if size == u32::MAX {
            return Err(BuildError::TooManyLeaves);
        }

        let mut tree = MerkleTree {
            size,
            pre_hashed,
            nodes,
            _marker: PhantomData,
        };
        tree.hash_layers();
        Ok(tree)
    }

    // Combine every node with its pair, bottom-up. A node whose pair lives in a higher layer is
    // carried: it is combined once that pair has been computed.
    fn hash_layers(&mut self) {
        if self.size == 0 {
            return;
        }

        let structure = layer_structure(self.size);
        let top = structure.len() - 1;
        for (layer, &count) in structure.iter().enumerate().take(top) {
            for index in 0..count {
                let location = NodeLocation::new(layer as u8, index);
                // UNWRAP: every location within the structure has a pair.
                let pair = pair_within(&structure, location).unwrap();
                let carried = pair.layer_index > location.layer_index;
                let combined_earlier =
                    pair.layer_index == location.layer_index && pair.node_index < index;
                if carried || combined_earlier {
                    continue;
                }

                // the pair is either the right neighbour or a node carried from below: both sit
                // on the right.
                let parent = parent_location(location, pair);
                let branch = dense_branch::<H>(
                    &self.nodes[&location].hash,
                    &self.nodes[&pair].hash,
                    parent.layer_index,
                    parent.node_index,
                );
                self.nodes.insert(parent, branch);
            }
        }
    }

    /// The root of the tree. The root of an empty tree is [`BinaryHash::EMPTY`].
    pub fn root(&self) -> NodeHash {
        self.nodes
            .get(&root_location(self.size))
            .map_or(H::EMPTY, |node| node.hash)
    }

    /// The number of leaves.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Whether the tree has no leaves.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// The number of layers, including the leaf layer.
    pub fn height(&self) -> u8 {
        layout::height(self.size)
    }

    /// The node at `location`, if it exists.
    pub fn node(&self, location: NodeLocation) -> Option<&DenseNode> {
        self.nodes.get(&location)
    }

    /// The data carried by the leaf at `index`.
    pub fn leaf_value(&self, index: u32) -> Option<&[u8]> {
        self.nodes
            .get(&NodeLocation::leaf(index))
            .and_then(DenseNode::leaf_data)
    }

    /// All nodes of the tree, ordered by location.
    pub fn nodes(&self) -> impl Iterator<Item = &DenseNode> {
        self.nodes.values()
    }

    /// Append a leaf, returning the new root.
    ///
    /// Trees built from leaf hashes take a leaf hash here as well.
    pub fn append(&mut self, value: &[u8]) -> Result<NodeHash, BuildError> {
        if self.size == u32::MAX - 1 {
            return Err(BuildError::TooManyLeaves);
        }
        let leaf = dense_leaf::<H>(value, self.size, self.pre_hashed)?;

        // branches are positioned by the final tree size, so only the leaves survive.
        self.nodes.retain(|location, _| location.layer_index == 0);
        self.nodes.insert(node_location(&leaf), leaf);
        self.size += 1;
        self.hash_layers();
        Ok(self.root())
    }

    /// Generate a proof of inclusion for the leaves at `indexes`.
    ///
    /// Indexes are deduplicated and proven in ascending order.
    pub fn generate_proof(&self, indexes: &[u32]) -> Result<Proof, DenseProofError> {
        if indexes.is_empty() {
            return Err(DenseProofError::EmptyProof);
        }

        let mut indexes = indexes.to_vec();
        indexes.sort_unstable();
        indexes.dedup();

        let mut seeds = BTreeMap::new();
        for &index in &indexes {
            let location = NodeLocation::leaf(index);
            let Some(node) = self.nodes.get(&location) else {
                return Err(DenseProofError::InvalidLocation(location));
            };
            seeds.insert(location, node.hash);
        }

        let mut sibling_hashes = Vec::new();
        dense_proof::reconstruct::<H>(self.size, seeds, |location| {
            let node = self
                .nodes
                .get(&location)
                .ok_or(DenseProofError::InvalidLocation(location))?;
            sibling_hashes.push(SiblingHash {
                hash: node.hash,
                layer_index: location.layer_index,
                node_index: location.node_index,
            });
            Ok(node.hash)
        })?;

        Ok(Proof {
            size: self.size,
            indexes: indexes.into_iter().map(NodeLocation::leaf).collect(),
            sibling_hashes,
        })
    }
}

fn node_location(node: &DenseNode) -> NodeLocation {
    NodeLocation::new(node.layer_index, node.node_index)
}
