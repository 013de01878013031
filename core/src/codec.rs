//! The canonical binary encoding of tree nodes.
//!
//! Every stored node begins with a single discriminating prefix byte: [`LEAF_PREFIX`] or
//! [`BRANCH_PREFIX`]. The prefix is part of every hash preimage, which domain-separates leaves
//! from branches.
//!
//! Dense tree layouts:
//!   - leaf: `LEAF_PREFIX ‖ u32be(node_index) ‖ value`, hashed as `H(LEAF_PREFIX ‖ value)`.
//!   - branch: `BRANCH_PREFIX ‖ u8(layer_index) ‖ u32be(node_index) ‖ left ‖ right`, hashed
//!     as `H(BRANCH_PREFIX ‖ left ‖ right)`.
//!
//! The position fields are stored only so that a node's location can be recovered from its
//! stored bytes; they never enter a hash.
//!
//! Sparse tree layouts:
//!   - leaf: `LEAF_PREFIX ‖ key ‖ value`, hashed whole.
//!   - branch: `BRANCH_PREFIX ‖ left ‖ right`, hashed whole.

use crate::hasher::{BinaryHash, NodeHash};

use alloc::vec::Vec;

/// Prefix of every leaf encoding.
pub const LEAF_PREFIX: u8 = 0x00;
/// Prefix of every branch encoding.
pub const BRANCH_PREFIX: u8 = 0x01;
/// Size of the layer index field of a dense branch.
pub const LAYER_INDEX_SIZE: usize = 1;
/// Size of the big-endian node index field of dense nodes.
pub const NODE_INDEX_SIZE: usize = 4;
/// Size of a node hash.
pub const NODE_HASH_SIZE: usize = 32;

const DENSE_LEAF_HEADER: usize = 1 + NODE_INDEX_SIZE;
const DENSE_BRANCH_SIZE: usize = 1 + LAYER_INDEX_SIZE + NODE_INDEX_SIZE + 2 * NODE_HASH_SIZE;
const SPARSE_BRANCH_SIZE: usize = 1 + 2 * NODE_HASH_SIZE;

/// A stored node encoding rejected by a decoder.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedNode {
    /// The encoding was empty.
    #[error("empty node encoding")]
    Empty,
    /// The discriminator byte is neither a leaf nor a branch prefix.
    #[error("unknown node prefix {0:#04x}")]
    UnknownPrefix(u8),
    /// The encoding has a length which does not fit its node type.
    #[error("{kind} encoding has {actual} bytes, expected {expected}")]
    Length {
        /// The discriminated node type.
        kind: &'static str,
        /// The expected length, or the minimum length for variable-length nodes.
        expected: usize,
        /// The actual length.
        actual: usize,
    },
}

/// A node in its stored form, along with its hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedNode {
    /// The bytes to store.
    pub value: Vec<u8>,
    /// The node hash.
    pub hash: NodeHash,
}

/// The shape of a decoded dense node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenseNodeKind {
    /// A leaf.
    Leaf,
    /// A branch with the hashes of its two children.
    Branch {
        /// The hash of the left child.
        left: NodeHash,
        /// The hash of the right child.
        right: NodeHash,
    },
}

/// A decoded dense tree node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenseNode {
    /// The node hash.
    pub hash: NodeHash,
    /// The stored encoding of the node.
    pub value: Vec<u8>,
    /// Leaf or branch.
    pub kind: DenseNodeKind,
    /// The layer of the node. Always zero for leaves.
    pub layer_index: u8,
    /// The position of the node within its layer.
    pub node_index: u32,
}

impl DenseNode {
    /// Whether this is a leaf.
    pub fn is_leaf(&self) -> bool {
        self.kind == DenseNodeKind::Leaf
    }

    /// The data carried by a leaf: the raw value, or the leaf hash for pre-hashed leaves.
    pub fn leaf_data(&self) -> Option<&[u8]> {
        match self.kind {
            DenseNodeKind::Leaf => Some(&self.value[DENSE_LEAF_HEADER..]),
            DenseNodeKind::Branch { .. } => None,
        }
    }
}

/// The hash of a dense leaf carrying `value`. Independent of the leaf's position.
pub fn dense_leaf_hash<H: BinaryHash>(value: &[u8]) -> NodeHash {
    H::hash_parts(&[&[LEAF_PREFIX], value])
}

/// The hash of a branch with the given children. Shared by both trees.
pub fn branch_hash<H: BinaryHash>(left: &NodeHash, right: &NodeHash) -> NodeHash {
    H::hash_parts(&[&[BRANCH_PREFIX], left, right])
}

/// Encode a dense leaf at `node_index`.
///
/// With `pre_hashed`, `value` is taken to be the leaf hash itself and must be exactly
/// [`NODE_HASH_SIZE`] bytes.
pub fn encode_dense_leaf<H: BinaryHash>(
    value: &[u8],
    node_index: u32,
    pre_hashed: bool,
) -> Result<EncodedNode, MalformedNode> {
    let hash: NodeHash = if pre_hashed {
        value.try_into().map_err(|_| MalformedNode::Length {
            kind: "pre-hashed leaf",
            expected: NODE_HASH_SIZE,
            actual: value.len(),
        })?
    } else {
        dense_leaf_hash::<H>(value)
    };

    let mut stored = Vec::with_capacity(DENSE_LEAF_HEADER + value.len());
    stored.push(LEAF_PREFIX);
    stored.extend_from_slice(&node_index.to_be_bytes());
    stored.extend_from_slice(value);

    Ok(EncodedNode {
        value: stored,
        hash,
    })
}

/// Encode a dense branch at the given layer and position.
pub fn encode_dense_branch<H: BinaryHash>(
    left: &NodeHash,
    right: &NodeHash,
    layer_index: u8,
    node_index: u32,
) -> EncodedNode {
    let mut stored = Vec::with_capacity(DENSE_BRANCH_SIZE);
    stored.push(BRANCH_PREFIX);
    stored.push(layer_index);
    stored.extend_from_slice(&node_index.to_be_bytes());
    stored.extend_from_slice(left);
    stored.extend_from_slice(right);

    EncodedNode {
        value: stored,
        hash: branch_hash::<H>(left, right),
    }
}

/// Decode a stored dense node. The hash is taken as given.
pub fn decode_dense_node(hash: NodeHash, value: Vec<u8>) -> Result<DenseNode, MalformedNode> {
    let prefix = *value.first().ok_or(MalformedNode::Empty)?;
    match prefix {
        LEAF_PREFIX => {
            if value.len() < DENSE_LEAF_HEADER {
                return Err(MalformedNode::Length {
                    kind: "dense leaf",
                    expected: DENSE_LEAF_HEADER,
                    actual: value.len(),
                });
            }
            let node_index = read_u32_be(&value[1..DENSE_LEAF_HEADER]);
            Ok(DenseNode {
                hash,
                value,
                kind: DenseNodeKind::Leaf,
                layer_index: 0,
                node_index,
            })
        }
        BRANCH_PREFIX => {
            if value.len() != DENSE_BRANCH_SIZE {
                return Err(MalformedNode::Length {
                    kind: "dense branch",
                    expected: DENSE_BRANCH_SIZE,
                    actual: value.len(),
                });
            }
            let layer_index = value[1];
            let node_index = read_u32_be(&value[2..2 + NODE_INDEX_SIZE]);
            let (left, right) = split_children(&value[value.len() - 2 * NODE_HASH_SIZE..]);
            Ok(DenseNode {
                hash,
                value,
                kind: DenseNodeKind::Branch { left, right },
                layer_index,
                node_index,
            })
        }
        other => Err(MalformedNode::UnknownPrefix(other)),
    }
}

/// Build a dense leaf node in one step.
pub fn dense_leaf<H: BinaryHash>(
    value: &[u8],
    node_index: u32,
    pre_hashed: bool,
) -> Result<DenseNode, MalformedNode> {
    let encoded = encode_dense_leaf::<H>(value, node_index, pre_hashed)?;
    decode_dense_node(encoded.hash, encoded.value)
}

/// Build a dense branch node in one step.
pub fn dense_branch<H: BinaryHash>(
    left: &NodeHash,
    right: &NodeHash,
    layer_index: u8,
    node_index: u32,
) -> DenseNode {
    let encoded = encode_dense_branch::<H>(left, right, layer_index, node_index);
    DenseNode {
        hash: encoded.hash,
        value: encoded.value,
        kind: DenseNodeKind::Branch {
            left: *left,
            right: *right,
        },
        layer_index,
        node_index,
    }
}

/// The decoded content of a stored sparse node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SparseNodeData {
    /// A leaf carrying a full key and a non-empty value.
    Leaf {
        /// The key of the leaf.
        key: Vec<u8>,
        /// The value of the leaf.
        value: Vec<u8>,
    },
    /// A branch with the hashes of its two children.
    Branch {
        /// The hash of the left child.
        left: NodeHash,
        /// The hash of the right child.
        right: NodeHash,
    },
}

/// Encode a sparse leaf.
pub fn encode_sparse_leaf<H: BinaryHash>(key: &[u8], value: &[u8]) -> EncodedNode {
    let mut stored = Vec::with_capacity(1 + key.len() + value.len());
    stored.push(LEAF_PREFIX);
    stored.extend_from_slice(key);
    stored.extend_from_slice(value);
    let hash = H::hash(&stored);
    EncodedNode {
        value: stored,
        hash,
    }
}

/// Encode a sparse branch.
pub fn encode_sparse_branch<H: BinaryHash>(left: &NodeHash, right: &NodeHash) -> EncodedNode {
    let mut stored = Vec::with_capacity(SPARSE_BRANCH_SIZE);
    stored.push(BRANCH_PREFIX);
    stored.extend_from_slice(left);
    stored.extend_from_slice(right);
    let hash = H::hash(&stored);
    EncodedNode {
        value: stored,
        hash,
    }
}

/// Decode a stored sparse node for a tree with the given key length.
pub fn decode_sparse_node(value: &[u8], key_length: usize) -> Result<SparseNodeData, MalformedNode> {
    let prefix = *value.first().ok_or(MalformedNode::Empty)?;
    match prefix {
        LEAF_PREFIX => {
            // values are never empty.
            if value.len() <= 1 + key_length {
                return Err(MalformedNode::Length {
                    kind: "sparse leaf",
                    expected: 2 + key_length,
                    actual: value.len(),
                });
            }
            Ok(SparseNodeData::Leaf {
                key: value[1..1 + key_length].to_vec(),
                value: value[1 + key_length..].to_vec(),
            })
        }
        BRANCH_PREFIX => {
            if value.len() != SPARSE_BRANCH_SIZE {
                return Err(MalformedNode::Length {
                    kind: "sparse branch",
                    expected: SPARSE_BRANCH_SIZE,
                    actual: value.len(),
                });
            }
            let (left, right) = split_children(&value[1..]);
            Ok(SparseNodeData::Branch { left, right })
        }
        other => Err(MalformedNode::UnknownPrefix(other)),
    }
}

/// Split the trailing 64 bytes of a branch encoding into its child hashes.
///
/// Panics if `children` is shorter than two hashes.
pub(crate) fn split_children(children: &[u8]) -> (NodeHash, NodeHash) {
    let mut left = [0u8; NODE_HASH_SIZE];
    let mut right = [0u8; NODE_HASH_SIZE];
    left.copy_from_slice(&children[..NODE_HASH_SIZE]);
    right.copy_from_slice(&children[NODE_HASH_SIZE..2 * NODE_HASH_SIZE]);
    (left, right)
}

fn read_u32_be(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; NODE_INDEX_SIZE];
    buf.copy_from_slice(bytes);
    u32::from_be_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::Blake3Hasher;

    #[test]
    fn dense_leaf_hash_excludes_position() {
        let a = encode_dense_leaf::<Blake3Hasher>(b"payload", 0, false).unwrap();
        let b = encode_dense_leaf::<Blake3Hasher>(b"payload", 7, false).unwrap();
        assert_eq!(a.hash, b.hash);
        assert_ne!(a.value, b.value);
        assert_eq!(a.hash, Blake3Hasher::hash(b"\x00payload"));
        assert_eq!(&b.value[..5], &[LEAF_PREFIX, 0, 0, 0, 7]);
    }

    #[test]
    fn dense_branch_layout() {
        let left = [1u8; 32];
        let right = [2u8; 32];
        let encoded = encode_dense_branch::<Blake3Hasher>(&left, &right, 3, 0x01020304);
        assert_eq!(encoded.value.len(), 70);
        assert_eq!(&encoded.value[..6], &[BRANCH_PREFIX, 3, 1, 2, 3, 4]);
        assert_eq!(encoded.hash, branch_hash::<Blake3Hasher>(&left, &right));

        let decoded = decode_dense_node(encoded.hash, encoded.value).unwrap();
        assert_eq!(decoded.layer_index, 3);
        assert_eq!(decoded.node_index, 0x01020304);
        assert_eq!(decoded.kind, DenseNodeKind::Branch { left, right });
    }

    #[test]
    fn dense_leaf_index_is_recoverable() {
        let node = dense_leaf::<Blake3Hasher>(b"tx", 42, false).unwrap();
        assert!(node.is_leaf());
        assert_eq!(node.node_index, 42);
        assert_eq!(node.leaf_data(), Some(&b"tx"[..]));
    }

    #[test]
    fn pre_hashed_leaf_requires_hash_length() {
        let hash = [9u8; 32];
        let node = dense_leaf::<Blake3Hasher>(&hash, 1, true).unwrap();
        assert_eq!(node.hash, hash);
        assert!(matches!(
            encode_dense_leaf::<Blake3Hasher>(b"short", 1, true),
            Err(MalformedNode::Length { actual: 5, .. })
        ));
    }

    #[test]
    fn decode_rejects_malformed() {
        assert_eq!(decode_dense_node([0; 32], vec![]), Err(MalformedNode::Empty));
        assert_eq!(
            decode_dense_node([0; 32], vec![7, 0, 0]),
            Err(MalformedNode::UnknownPrefix(7))
        );
        assert!(matches!(
            decode_dense_node([0; 32], vec![BRANCH_PREFIX; 69]),
            Err(MalformedNode::Length { expected: 70, .. })
        ));
        assert!(matches!(
            decode_sparse_node(&[LEAF_PREFIX, 1, 2, 3, 4], 4),
            Err(MalformedNode::Length { .. })
        ));
        assert!(matches!(
            decode_sparse_node(&[BRANCH_PREFIX; 66], 4),
            Err(MalformedNode::Length { expected: 65, .. })
        ));
    }

    #[test]
    fn sparse_leaf_layout() {
        let encoded = encode_sparse_leaf::<Blake3Hasher>(&[0, 0, 0, 1], b"a");
        assert_eq!(encoded.value, vec![LEAF_PREFIX, 0, 0, 0, 1, b'a']);
        assert_eq!(encoded.hash, Blake3Hasher::hash(&encoded.value));
        assert_eq!(
            decode_sparse_node(&encoded.value, 4).unwrap(),
            SparseNodeData::Leaf {
                key: vec![0, 0, 0, 1],
                value: b"a".to_vec(),
            }
        );
    }

    #[test]
    fn decoding_arbitrary_bytes() {
        fn prop(bytes: Vec<u8>, key_length: u8) -> bool {
            let key_length = key_length as usize % 40 + 1;
            let _ = decode_dense_node([0; 32], bytes.clone());
            // whatever decodes re-encodes to the same bytes.
            match decode_sparse_node(&bytes, key_length) {
                Ok(SparseNodeData::Leaf { key, value }) => {
                    encode_sparse_leaf::<Blake3Hasher>(&key, &value).value == bytes
                }
                Ok(SparseNodeData::Branch { left, right }) => {
                    encode_sparse_branch::<Blake3Hasher>(&left, &right).value == bytes
                }
                Err(_) => true,
            }
        }

        quickcheck::QuickCheck::new()
            .tests(10_000)
            .quickcheck(prop as fn(Vec<u8>, u8) -> bool);
    }

    #[test]
    fn sparse_branch_hash_matches_dense_branch_hash() {
        let encoded = encode_sparse_branch::<Blake3Hasher>(&[3; 32], &[4; 32]);
        assert_eq!(encoded.hash, branch_hash::<Blake3Hasher>(&[3; 32], &[4; 32]));
    }
}
