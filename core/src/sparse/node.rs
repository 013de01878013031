//! Nodes of the sparse tree.

use crate::{
    codec::{decode_sparse_node, encode_sparse_branch, encode_sparse_leaf, MalformedNode, SparseNodeData},
    hasher::{BinaryHash, NodeHash},
};

use alloc::vec::Vec;

/// A leaf: a single key and its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafNode {
    /// The node hash.
    pub hash: NodeHash,
    /// The full key.
    pub key: Vec<u8>,
    /// The value. Never empty.
    pub value: Vec<u8>,
}

impl LeafNode {
    /// Create a leaf, returning it along with its stored encoding.
    pub fn new<H: BinaryHash>(key: Vec<u8>, value: Vec<u8>) -> (Self, Vec<u8>) {
        let encoded = encode_sparse_leaf::<H>(&key, &value);
        let leaf = LeafNode {
            hash: encoded.hash,
            key,
            value,
        };
        (leaf, encoded.value)
    }
}

/// A branch with two children, identified by hash only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BranchNode {
    /// The node hash.
    pub hash: NodeHash,
    /// The hash of the left child.
    pub left: NodeHash,
    /// The hash of the right child.
    pub right: NodeHash,
}

impl BranchNode {
    /// Create a branch, returning it along with its stored encoding.
    pub fn new<H: BinaryHash>(left: NodeHash, right: NodeHash) -> (Self, Vec<u8>) {
        let encoded = encode_sparse_branch::<H>(&left, &right);
        let branch = BranchNode {
            hash: encoded.hash,
            left,
            right,
        };
        (branch, encoded.value)
    }

    /// The child on the given side: right for a set bit.
    pub fn child(&self, bit: bool) -> NodeHash {
        if bit {
            self.right
        } else {
            self.left
        }
    }
}

/// A node of the sparse tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SparseNode {
    /// An empty sub-tree. Never stored.
    Empty,
    /// A sub-tree holding a single key.
    Leaf(LeafNode),
    /// A sub-tree holding at least two keys.
    Branch(BranchNode),
}

impl SparseNode {
    /// The hash of the node. For an empty sub-tree, [`BinaryHash::EMPTY`].
    pub fn hash<H: BinaryHash>(&self) -> NodeHash {
        match self {
            SparseNode::Empty => H::EMPTY,
            SparseNode::Leaf(leaf) => leaf.hash,
            SparseNode::Branch(branch) => branch.hash,
        }
    }

    /// Whether this is an empty sub-tree.
    pub fn is_empty(&self) -> bool {
        matches!(self, SparseNode::Empty)
    }

    /// Decode a stored node, taking its hash as given.
    pub fn decode(hash: NodeHash, value: &[u8], key_length: usize) -> Result<Self, MalformedNode> {
        Ok(match decode_sparse_node(value, key_length)? {
            SparseNodeData::Leaf { key, value } => SparseNode::Leaf(LeafNode { hash, key, value }),
            SparseNodeData::Branch { left, right } => {
                SparseNode::Branch(BranchNode { hash, left, right })
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::Blake3Hasher;

    #[test]
    fn decode_restores_nodes() {
        let (leaf, stored) = LeafNode::new::<Blake3Hasher>(vec![1, 2], b"v".to_vec());
        assert_eq!(
            SparseNode::decode(leaf.hash, &stored, 2),
            Ok(SparseNode::Leaf(leaf.clone()))
        );

        let (branch, stored) = BranchNode::new::<Blake3Hasher>(leaf.hash, Blake3Hasher::EMPTY);
        let decoded = SparseNode::decode(branch.hash, &stored, 2).unwrap();
        assert_eq!(decoded, SparseNode::Branch(branch));
        assert_eq!(decoded.hash::<Blake3Hasher>(), branch.hash);
        assert_eq!(branch.child(false), leaf.hash);
        assert_eq!(branch.child(true), Blake3Hasher::EMPTY);
    }

    #[test]
    fn empty_hash() {
        assert!(SparseNode::Empty.is_empty());
        assert_eq!(
            SparseNode::Empty.hash::<Blake3Hasher>(),
            Blake3Hasher::EMPTY
        );
    }
}
