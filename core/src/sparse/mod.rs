//! The sparse Merkle tree.
//!
//! A binary trie over fixed-length keys. Each key is expanded into bits, most significant first,
//! which select the left (`0`) or right (`1`) child on the way down from the root. A sub-tree
//! holding a single key is that key's leaf, however deep the key's path would reach: nodes never
//! branch to accommodate a single key, and empty sub-trees are [`BinaryHash::EMPTY`].
//!
//! Nodes are persisted in a [`NodeStore`] under their hash and never modified afterwards. A
//! mutation writes the new path of the mutated key and returns the new root, leaving every node
//! of the old root in place. Adopting the new root is up to the caller.

use crate::{
    codec::MalformedNode,
    hasher::{BinaryHash, NodeHash},
    proof::{
        sparse_proof::{merge, PathEntry, Position},
        Query, QueryTerminal, SparseProof, SparseProofError,
    },
    store::NodeStore,
};

use alloc::{collections::BTreeMap, vec, vec::Vec};
use bitvec::prelude::*;
use core::marker::PhantomData;

pub use node::{BranchNode, LeafNode, SparseNode};

mod node;

/// The key length of a tree unless configured otherwise.
pub const DEFAULT_KEY_LENGTH: usize = 36;

/// Errors of sparse tree operations.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum SparseTreeError<E> {
    /// A node referenced by the tree is missing from the store: corruption, or a wrong root.
    #[error("node {} not found in store", hex::encode(.0))]
    NodeNotFound(NodeHash),
    /// Values must not be empty.
    #[error("empty value")]
    InvalidValue,
    /// The key does not have the length of the tree's keys.
    #[error("key has {actual} bytes, expected {expected}")]
    KeyLengthMismatch {
        /// The key length of the tree.
        expected: usize,
        /// The length of the given key.
        actual: usize,
    },
    /// A stored node could not be decoded.
    #[error(transparent)]
    Malformed(#[from] MalformedNode),
    /// A path has more branches than its key has bits.
    #[error("path runs deeper than the key")]
    PathTooDeep,
    /// A proof could not be assembled.
    #[error(transparent)]
    Proof(#[from] SparseProofError),
    /// The store failed.
    #[error("store: {0}")]
    Store(E),
}

/// The result of a mutation: the new root, along with the nodes of the old tree which are no
/// longer part of the new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    /// The new root node.
    pub root: SparseNode,
    /// Hashes of superseded nodes. Deleting them is safe only once no reader needs the old root.
    pub stale: Vec<NodeHash>,
}

// The walk from the root to the terminal of a key.
struct Descent {
    // hashes of the branches passed, root first.
    path: Vec<NodeHash>,
    // `siblings[i]` is the sibling of the node at depth `i + 1`.
    siblings: Vec<NodeHash>,
    // empty or a leaf.
    terminal: SparseNode,
}

/// A sparse Merkle tree at a given root.
///
/// The tree is a view: changing it means writing nodes to the store and moving to another root.
/// Any number of trees may share a store. Mutations of trees sharing a root must be serialized
/// by the caller.
pub struct SparseMerkleTree<S, H> {
    store: S,
    root: NodeHash,
    key_length: usize,
    _marker: PhantomData<H>,
}

impl<S: NodeStore, H: BinaryHash> SparseMerkleTree<S, H> {
    /// An empty tree with keys of [`DEFAULT_KEY_LENGTH`] bytes.
    pub fn new(store: S) -> Self {
        Self::with_root(store, H::EMPTY, DEFAULT_KEY_LENGTH)
    }

    /// The tree at `root`, which must be persisted in `store`.
    pub fn with_root(store: S, root: NodeHash, key_length: usize) -> Self {
        SparseMerkleTree {
            store,
            root,
            key_length,
            _marker: PhantomData,
        }
    }

    /// The current root.
    pub fn root(&self) -> NodeHash {
        self.root
    }

    /// Move the tree to another root.
    pub fn set_root(&mut self, root: NodeHash) {
        self.root = root;
    }

    /// The length of keys, in bytes.
    pub fn key_length(&self) -> usize {
        self.key_length
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Load the node with the given hash.
    pub fn node(&self, hash: NodeHash) -> Result<SparseNode, SparseTreeError<S::Error>> {
        if hash == H::EMPTY {
            return Ok(SparseNode::Empty);
        }
        let stored = self
            .store
            .get(&hash)
            .map_err(SparseTreeError::Store)?
            .ok_or(SparseTreeError::NodeNotFound(hash))?;
        Ok(SparseNode::decode(hash, &stored, self.key_length)?)
    }

    /// The value of `key`, if any.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, SparseTreeError<S::Error>> {
        self.check_key(key)?;
        match self.descend(key)?.terminal {
            SparseNode::Leaf(leaf) if leaf.key == key => Ok(Some(leaf.value)),
            _ => Ok(None),
        }
    }

    /// Set the value of `key`, returning the new root node.
    pub fn update(&self, key: &[u8], value: &[u8]) -> Result<SparseNode, SparseTreeError<S::Error>> {
        self.update_tracked(key, value).map(|mutation| mutation.root)
    }

    /// [`update`](Self::update), also reporting stale nodes.
    pub fn update_tracked(
        &self,
        key: &[u8],
        value: &[u8],
    ) -> Result<Mutation, SparseTreeError<S::Error>> {
        self.check_key(key)?;
        if value.is_empty() {
            return Err(SparseTreeError::InvalidValue);
        }

        let bits = key.view_bits::<Msb0>();
        let Descent {
            mut path,
            mut siblings,
            terminal,
        } = self.descend(key)?;

        let (leaf, stored_leaf) = LeafNode::new::<H>(key.to_vec(), value.to_vec());
        let leaf_hash = leaf.hash;
        let mut written = vec![leaf_hash];

        let bottom = match terminal {
            SparseNode::Leaf(existing) if existing.key != key => {
                // extend the path with one-sided branches while the keys agree, then split.
                let existing_bits = existing.key.view_bits::<Msb0>();
                let mut depth = siblings.len();
                while depth < bits.len() && bits[depth] == existing_bits[depth] {
                    siblings.push(H::EMPTY);
                    depth += 1;
                }
                if depth == bits.len() {
                    return Err(SparseTreeError::PathTooDeep);
                }

                let (left, right) = if bits[depth] {
                    (existing.hash, leaf.hash)
                } else {
                    (leaf.hash, existing.hash)
                };
                let (branch, stored) = BranchNode::new::<H>(left, right);
                self.store
                    .set(&branch.hash, stored)
                    .map_err(SparseTreeError::Store)?;
                written.push(branch.hash);
                SparseNode::Branch(branch)
            }
            SparseNode::Leaf(existing) => {
                path.push(existing.hash);
                SparseNode::Leaf(leaf)
            }
            _ => SparseNode::Leaf(leaf),
        };
        self.store
            .set(&leaf_hash, stored_leaf)
            .map_err(SparseTreeError::Store)?;

        let root = self.ascend(bits, bottom, &siblings, &mut written)?;
        Ok(Mutation {
            root,
            stale: stale_nodes(path, &written),
        })
    }

    /// Remove `key`, returning the new root node, or `None` if the key has no value.
    ///
    /// Removing from an empty tree returns the empty root.
    pub fn remove(&self, key: &[u8]) -> Result<Option<SparseNode>, SparseTreeError<S::Error>> {
        Ok(self.remove_tracked(key)?.map(|mutation| mutation.root))
    }

    /// [`remove`](Self::remove), also reporting stale nodes.
    pub fn remove_tracked(&self, key: &[u8]) -> Result<Option<Mutation>, SparseTreeError<S::Error>> {
        self.check_key(key)?;
        if self.root == H::EMPTY {
            return Ok(Some(Mutation {
                root: SparseNode::Empty,
                stale: Vec::new(),
            }));
        }

        let Descent {
            mut path,
            mut siblings,
            terminal,
        } = self.descend(key)?;
        match terminal {
            SparseNode::Leaf(leaf) if leaf.key == key => path.push(leaf.hash),
            _ => return Ok(None),
        }

        let bottom = match siblings.last().copied() {
            None => SparseNode::Empty,
            Some(sibling) => match self.node(sibling)? {
                // a lone leaf moves up past every ancestor with nothing else below it.
                sibling @ SparseNode::Leaf(_) => {
                    siblings.pop();
                    while siblings.last() == Some(&H::EMPTY) {
                        siblings.pop();
                    }
                    sibling
                }
                _ => SparseNode::Empty,
            },
        };

        let mut written = Vec::new();
        let root = self.ascend(key.view_bits::<Msb0>(), bottom, &siblings, &mut written)?;
        Ok(Some(Mutation {
            root,
            stale: stale_nodes(path, &written),
        }))
    }

    /// Prove the values of `keys`, or their absence.
    pub fn prove<K: AsRef<[u8]>>(&self, keys: &[K]) -> Result<SparseProof, SparseTreeError<S::Error>> {
        let mut keys: Vec<&[u8]> = keys.iter().map(|key| key.as_ref()).collect();
        for key in &keys {
            self.check_key(key)?;
        }
        keys.sort_unstable();
        keys.dedup();

        let mut queries = Vec::with_capacity(keys.len());
        let mut known_siblings = BTreeMap::new();
        for key in keys {
            let Descent {
                siblings, terminal, ..
            } = self.descend(key)?;
            let depth = u16::try_from(siblings.len()).map_err(|_| SparseTreeError::PathTooDeep)?;

            let mut bitmap = bitvec![u8, Msb0; 0; siblings.len()];
            for (level, sibling) in siblings.iter().enumerate() {
                bitmap.set(level, *sibling != H::EMPTY);
                known_siblings.insert(Position::of(key, level as u16 + 1), *sibling);
            }

            let terminal = match terminal {
                SparseNode::Leaf(leaf) => QueryTerminal::Leaf {
                    key: leaf.key,
                    value: leaf.value,
                },
                _ => QueryTerminal::Empty,
            };
            queries.push(Query {
                key: key.to_vec(),
                terminal,
                depth,
                bitmap: bitmap.into_vec(),
            });
        }

        let mut sibling_hashes = Vec::new();
        let entries = queries.iter().map(|query| PathEntry {
            key: &query.key,
            depth: query.depth,
            hash: query.terminal.hash::<H>(),
            bitmap: &query.bitmap,
        });
        let root = merge::<H>(entries, |position| {
            let sibling = known_siblings
                .get(position)
                .copied()
                .ok_or(SparseProofError::MissingSiblings)?;
            sibling_hashes.push(sibling);
            Ok(sibling)
        })?;
        // the merge recomputes the root from the tree's own nodes.
        if root != self.root {
            return Err(SparseProofError::RootMismatch.into());
        }

        Ok(SparseProof {
            queries,
            sibling_hashes,
        })
    }

    fn check_key(&self, key: &[u8]) -> Result<(), SparseTreeError<S::Error>> {
        if key.len() != self.key_length {
            return Err(SparseTreeError::KeyLengthMismatch {
                expected: self.key_length,
                actual: key.len(),
            });
        }
        Ok(())
    }

    fn descend(&self, key: &[u8]) -> Result<Descent, SparseTreeError<S::Error>> {
        let bits = key.view_bits::<Msb0>();
        let mut path = Vec::new();
        let mut siblings = Vec::new();
        let mut node = self.node(self.root)?;

        let terminal = loop {
            match node {
                SparseNode::Branch(branch) => {
                    let bit = *bits
                        .get(siblings.len())
                        .ok_or(SparseTreeError::PathTooDeep)?;
                    path.push(branch.hash);
                    siblings.push(branch.child(!bit));
                    node = self.node(branch.child(bit))?;
                }
                terminal => break terminal,
            }
        };

        Ok(Descent {
            path,
            siblings,
            terminal,
        })
    }

    // Rebuild the branches from the node at depth `siblings.len()` up to the root.
    fn ascend(
        &self,
        bits: &BitSlice<u8, Msb0>,
        mut bottom: SparseNode,
        siblings: &[NodeHash],
        written: &mut Vec<NodeHash>,
    ) -> Result<SparseNode, SparseTreeError<S::Error>> {
        for (depth, sibling) in siblings.iter().enumerate().rev() {
            let child = bottom.hash::<H>();
            let (left, right) = if bits[depth] {
                (*sibling, child)
            } else {
                (child, *sibling)
            };
            let (branch, stored) = BranchNode::new::<H>(left, right);
            self.store
                .set(&branch.hash, stored)
                .map_err(SparseTreeError::Store)?;
            written.push(branch.hash);
            bottom = SparseNode::Branch(branch);
        }
        Ok(bottom)
    }
}

fn stale_nodes(mut old: Vec<NodeHash>, written: &[NodeHash]) -> Vec<NodeHash> {
    old.retain(|hash| !written.contains(hash));
    old
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{hasher::Blake3Hasher, store::test_store::TestStore};

    type Tree<'a> = SparseMerkleTree<&'a TestStore, Blake3Hasher>;

    fn tree(store: &TestStore) -> Tree<'_> {
        SparseMerkleTree::with_root(store, Blake3Hasher::EMPTY, 4)
    }

    fn key(i: u32) -> [u8; 4] {
        i.to_be_bytes()
    }

    fn put(tree: &mut Tree<'_>, k: u32, value: &[u8]) {
        let root = tree.update(&key(k), value).unwrap();
        tree.set_root(root.hash::<Blake3Hasher>());
    }

    fn delete(tree: &mut Tree<'_>, k: u32) {
        let root = tree.remove(&key(k)).unwrap().expect("key present");
        tree.set_root(root.hash::<Blake3Hasher>());
    }

    // the root of a tree holding exactly `items`, built top-down.
    fn canonical_root(items: &[([u8; 4], Vec<u8>)], depth: usize) -> NodeHash {
        match items {
            [] => Blake3Hasher::EMPTY,
            [(k, v)] => LeafNode::new::<Blake3Hasher>(k.to_vec(), v.clone()).0.hash,
            _ => {
                let (left, right): (Vec<_>, Vec<_>) = items
                    .iter()
                    .cloned()
                    .partition(|(k, _)| !k.view_bits::<Msb0>()[depth]);
                BranchNode::new::<Blake3Hasher>(
                    canonical_root(&left, depth + 1),
                    canonical_root(&right, depth + 1),
                )
                .0
                .hash
            }
        }
    }

    fn reachable(tree: &Tree<'_>, hash: NodeHash) -> usize {
        match tree.node(hash).unwrap() {
            SparseNode::Empty => 0,
            SparseNode::Leaf(_) => 1,
            SparseNode::Branch(b) => 1 + reachable(tree, b.left) + reachable(tree, b.right),
        }
    }

    #[test]
    fn three_keys_then_remove_middle() {
        let store = TestStore::default();
        let mut tree = tree(&store);
        put(&mut tree, 1, b"a");
        put(&mut tree, 2, b"b");
        put(&mut tree, 3, b"c");
        assert_eq!(tree.get(&key(2)).unwrap(), Some(b"b".to_vec()));

        delete(&mut tree, 2);
        assert_eq!(tree.get(&key(2)).unwrap(), None);
        assert_eq!(tree.get(&key(1)).unwrap(), Some(b"a".to_vec()));
        assert_eq!(tree.get(&key(3)).unwrap(), Some(b"c".to_vec()));
    }

    #[cfg(feature = "sha2-hasher")]
    #[test]
    fn sha2_vectors() {
        use crate::hasher::Sha2Hasher;
        use hex_literal::hex;

        let store = TestStore::default();
        let mut tree = SparseMerkleTree::<_, Sha2Hasher>::with_root(&store, Sha2Hasher::EMPTY, 4);
        let root = tree.update(&key(1), b"a").unwrap();
        assert_eq!(
            root.hash::<Sha2Hasher>(),
            hex!("5ce0c36729575ed8f79033158ff52da7f125edf52c79186fd033eaa02475b42d")
        );
        tree.set_root(root.hash::<Sha2Hasher>());
        for (k, v) in [(2, b"b"), (3, b"c")] {
            let root = tree.update(&key(k), v).unwrap();
            tree.set_root(root.hash::<Sha2Hasher>());
        }
        assert_eq!(
            tree.root(),
            hex!("1248afaec5a2e7a5a1ef45e1fbdb096ffb6b9007e995039dcb3653b7ff42e4bc")
        );
        let root = tree.remove(&key(2)).unwrap().unwrap();
        assert_eq!(
            root.hash::<Sha2Hasher>(),
            hex!("2cf40a099c5b0a20f6634456b15d8176aade6981fa73ca3cbace5061fcdaeca1")
        );
    }

    #[test]
    fn single_key_round_trip_is_empty() {
        let store = TestStore::default();
        let mut tree = tree(&store);
        put(&mut tree, 7, b"x");
        assert!(matches!(tree.node(tree.root()).unwrap(), SparseNode::Leaf(_)));
        delete(&mut tree, 7);
        assert_eq!(tree.root(), Blake3Hasher::EMPTY);
    }

    #[test]
    fn overwrite_with_same_value_is_idempotent() {
        let store = TestStore::default();
        let mut tree = tree(&store);
        put(&mut tree, 1, b"a");
        put(&mut tree, 5, b"e");
        let root = tree.root();
        put(&mut tree, 5, b"e");
        assert_eq!(tree.root(), root);

        put(&mut tree, 5, b"f");
        assert_ne!(tree.root(), root);
        assert_eq!(tree.get(&key(5)).unwrap(), Some(b"f".to_vec()));
    }

    #[test]
    fn updates_do_not_interfere() {
        let store = TestStore::default();
        let mut tree = tree(&store);
        put(&mut tree, 0x1000_0000, b"first");
        let proof = tree.prove(&[key(0x1000_0000)]).unwrap();
        put(&mut tree, 0x9000_0000, b"second");
        put(&mut tree, 0x1000_0001, b"third");

        assert_eq!(tree.get(&key(0x1000_0000)).unwrap(), Some(b"first".to_vec()));
        let after = tree.prove(&[key(0x1000_0000)]).unwrap();
        assert_eq!(after.queries[0].terminal, proof.queries[0].terminal);
    }

    #[test]
    fn matches_canonical_shape() {
        let store = TestStore::default();
        let mut tree = tree(&store);
        let mut items: Vec<([u8; 4], Vec<u8>)> = Vec::new();
        let keys = [5u32, 0xffff_ffff, 4, 6, 0x8000_0000, 0, 1 << 20, 7];
        for k in keys {
            put(&mut tree, k, &k.to_le_bytes());
            items.push((key(k), k.to_le_bytes().to_vec()));
            assert_eq!(tree.root(), canonical_root(&items, 0));
        }
        for k in [4u32, 0xffff_ffff, 0, 7] {
            delete(&mut tree, k);
            items.retain(|(item, _)| *item != key(k));
            assert_eq!(tree.root(), canonical_root(&items, 0));
        }
    }

    #[test]
    fn insertion_order_does_not_matter() {
        let store = TestStore::default();
        let mut forward = tree(&store);
        let mut backward = tree(&store);
        let keys = [3u32, 9, 0x0100_0000, 12, 2];
        for k in keys {
            put(&mut forward, k, b"v");
        }
        for k in keys.iter().rev() {
            put(&mut backward, *k, b"v");
        }
        assert_eq!(forward.root(), backward.root());
    }

    #[test]
    fn remove_absent_key_is_noop() {
        let store = TestStore::default();
        let mut tree = tree(&store);
        assert_eq!(tree.remove(&key(1)).unwrap(), Some(SparseNode::Empty));
        put(&mut tree, 1, b"a");
        assert_eq!(tree.remove(&key(2)).unwrap(), None);
        put(&mut tree, 3, b"c");
        // leads into the empty right half of the root.
        assert_eq!(tree.remove(&key(0x8000_0000)).unwrap(), None);
    }

    #[test]
    fn rejects_bad_input() {
        let store = TestStore::default();
        let tree = tree(&store);
        assert_eq!(
            tree.update(&[1, 2], b"v"),
            Err(SparseTreeError::KeyLengthMismatch {
                expected: 4,
                actual: 2
            })
        );
        assert_eq!(tree.update(&key(1), b""), Err(SparseTreeError::InvalidValue));
        assert_eq!(
            tree.get(&[0; 5]),
            Err(SparseTreeError::KeyLengthMismatch {
                expected: 4,
                actual: 5
            })
        );
        assert!(matches!(
            tree.remove(&[0; 3]),
            Err(SparseTreeError::KeyLengthMismatch { .. })
        ));
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn missing_node_is_reported() {
        let store = TestStore::default();
        let tree: Tree<'_> = SparseMerkleTree::with_root(&store, [7; 32], 4);
        assert_eq!(
            tree.get(&key(1)),
            Err(SparseTreeError::NodeNotFound([7; 32]))
        );
    }

    #[test]
    fn failed_update_writes_nothing() {
        let store = TestStore::default();
        let tree: Tree<'_> = SparseMerkleTree::with_root(&store, [7; 32], 4);
        assert_eq!(
            tree.update_tracked(&key(1), b"a"),
            Err(SparseTreeError::NodeNotFound([7; 32]))
        );
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn stale_nodes_can_be_pruned() {
        let store = TestStore::default();
        let mut tree = tree(&store);
        let apply = |tree: &mut Tree<'_>, mutation: Mutation| {
            for hash in &mutation.stale {
                store.nodes.borrow_mut().remove(&hash[..]);
            }
            tree.set_root(mutation.root.hash::<Blake3Hasher>());
        };

        for k in [1u32, 2, 3, 0x8000_0000, 0x4000_0000] {
            let mutation = tree.update_tracked(&key(k), b"one").unwrap();
            apply(&mut tree, mutation);
            assert_eq!(store.len(), reachable(&tree, tree.root()));
        }
        let mutation = tree.update_tracked(&key(2), b"two").unwrap();
        apply(&mut tree, mutation);
        let mutation = tree.update_tracked(&key(2), b"two").unwrap();
        assert!(mutation.stale.is_empty());
        apply(&mut tree, mutation);
        assert_eq!(store.len(), reachable(&tree, tree.root()));

        for k in [2u32, 0x8000_0000, 1] {
            let mutation = tree.remove_tracked(&key(k)).unwrap().unwrap();
            apply(&mut tree, mutation);
            assert_eq!(store.len(), reachable(&tree, tree.root()));
        }
        assert_eq!(tree.get(&key(3)).unwrap(), Some(b"one".to_vec()));
        assert_eq!(tree.get(&key(0x4000_0000)).unwrap(), Some(b"one".to_vec()));
    }

    #[test]
    fn old_roots_stay_readable() {
        let store = TestStore::default();
        let mut tree = tree(&store);
        put(&mut tree, 1, b"a");
        let old_root = tree.root();
        put(&mut tree, 1, b"b");
        put(&mut tree, 2, b"c");

        let old: Tree<'_> = SparseMerkleTree::with_root(&store, old_root, 4);
        assert_eq!(old.get(&key(1)).unwrap(), Some(b"a".to_vec()));
        assert_eq!(old.get(&key(2)).unwrap(), None);
    }

    #[test]
    fn proofs_verify() {
        let store = TestStore::default();
        let mut tree = tree(&store);
        let spread = |k: u32| k.wrapping_mul(0x9e37_79b9);
        for k in 0..40u32 {
            put(&mut tree, spread(k), &k.to_be_bytes());
        }
        let keys: Vec<[u8; 4]> = (0..60u32).map(|k| key(spread(k))).collect();
        let proof = tree.prove(&keys).unwrap();
        let verified = proof.verify::<Blake3Hasher>(tree.root()).unwrap();
        for k in 0..60u32 {
            let expected = (k < 40).then(|| k.to_be_bytes());
            assert_eq!(
                verified.value(&key(spread(k))).unwrap(),
                expected.as_ref().map(|v| &v[..])
            );
        }
    }
}
