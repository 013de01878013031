//! The long-lived state tree.

use std::marker::PhantomData;

use anyhow::{ensure, Context as _};
use authtree_core::{
    proof::{SparseProof, VerifiedSparseProof},
    sparse::{Mutation, SparseMerkleTree, SparseNode},
    BinaryHash, NodeHash, NodeStore,
};

use crate::{hasher::Sha2Hasher, Options, Overlay};

/// A change to the state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// Set the value of a key. Values must not be empty.
    Put(Vec<u8>, Vec<u8>),
    /// Remove a key. Removing an absent key changes nothing.
    Delete(Vec<u8>),
}

impl Op {
    /// The key the operation acts on.
    pub fn key(&self) -> &[u8] {
        match self {
            Op::Put(key, _) | Op::Delete(key) => key,
        }
    }
}

/// A sparse tree over a store which keeps track of its own root.
///
/// Mutations are staged in an [`Overlay`] and reach the store only once the whole mutation has
/// succeeded, at which point the new root is adopted. A failed mutation leaves both the store
/// and the root as they were.
///
/// Mutations need exclusive access. Readers of any root still present in the store can use a
/// [`StateView`], on this thread or another.
pub struct StateTree<S: NodeStore, H: BinaryHash = Sha2Hasher> {
    store: S,
    root: NodeHash,
    options: Options,
    _marker: PhantomData<H>,
}

impl<S, H> StateTree<S, H>
where
    S: NodeStore,
    S::Error: std::error::Error + Send + Sync + 'static,
    H: BinaryHash,
{
    /// Open an empty state tree.
    pub fn open(store: S, options: Options) -> anyhow::Result<Self> {
        Self::open_at(store, H::EMPTY, options)
    }

    /// Open the state tree at `root`, which must be present in `store`.
    pub fn open_at(store: S, root: NodeHash, options: Options) -> anyhow::Result<Self> {
        ensure!(options.key_length > 0, "key length must be positive");

        let tree = SparseMerkleTree::<_, H>::with_root(&store, root, options.key_length);
        tree.node(root)
            .with_context(|| format!("failed to load root {}", hex::encode(root)))?;

        tracing::debug!(root = %hex::encode(root), key_length = options.key_length, "opened state tree");
        Ok(StateTree {
            store,
            root,
            options,
            _marker: PhantomData,
        })
    }

    /// The current root.
    pub fn root(&self) -> NodeHash {
        self.root
    }

    /// The length of every key, in bytes.
    pub fn key_length(&self) -> usize {
        self.options.key_length
    }

    /// Whether the state holds no keys.
    pub fn is_empty(&self) -> bool {
        self.root == H::EMPTY
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The value of `key` at the current root.
    pub fn get(&self, key: &[u8]) -> anyhow::Result<Option<Vec<u8>>> {
        self.view(self.root).get(key)
    }

    /// Set the value of `key`, returning the new root.
    pub fn update(&mut self, key: &[u8], value: &[u8]) -> anyhow::Result<NodeHash> {
        self.commit([Op::Put(key.to_vec(), value.to_vec())])
    }

    /// Remove `key`, returning the new root, or `None` if the key had no value.
    pub fn remove(&mut self, key: &[u8]) -> anyhow::Result<Option<NodeHash>> {
        if self.get(key)?.is_none() {
            tracing::trace!(key = %hex::encode(key), "remove of absent key");
            return Ok(None);
        }
        self.commit([Op::Delete(key.to_vec())]).map(Some)
    }

    /// Apply `ops` in order, adopting the resulting root.
    ///
    /// Either every operation takes effect, or none does.
    #[tracing::instrument(level = "debug", skip_all, fields(ops = tracing::field::Empty))]
    pub fn commit(&mut self, ops: impl IntoIterator<Item = Op>) -> anyhow::Result<NodeHash> {
        let overlay = Overlay::new(&self.store);
        let mut tree =
            SparseMerkleTree::<_, H>::with_root(&overlay, self.root, self.options.key_length);

        let mut applied = 0usize;
        for op in ops {
            tracing::trace!(key = %hex::encode(op.key()), put = matches!(op, Op::Put(..)), "apply");
            let mutation = match &op {
                Op::Put(key, value) => Some(
                    tree.update_tracked(key, value)
                        .with_context(|| format!("failed to update key {}", hex::encode(key)))?,
                ),
                Op::Delete(key) => tree
                    .remove_tracked(key)
                    .with_context(|| format!("failed to remove key {}", hex::encode(key)))?,
            };
            applied += 1;

            let Some(Mutation { root, stale }) = mutation else {
                continue;
            };
            if self.options.prune_stale {
                for hash in &stale {
                    overlay
                        .delete(hash)
                        .context("failed to delete stale node")?;
                }
            }
            tree.set_root(root.hash::<H>());

            if self.options.verify_writes {
                verify_write(&tree, &op)?;
            }
        }

        let root = tree.root();
        drop(tree);
        overlay.commit().context("failed to commit staged nodes")?;

        tracing::Span::current().record("ops", applied);
        if root != self.root {
            tracing::debug!(
                old = %hex::encode(self.root),
                new = %hex::encode(root),
                "adopted new root"
            );
        }
        self.root = root;
        Ok(root)
    }

    /// Prove the values of `keys` at the current root, or their absence.
    pub fn prove<K: AsRef<[u8]>>(&self, keys: &[K]) -> anyhow::Result<SparseProof> {
        self.view(self.root).prove(keys)
    }

    /// Verify `proof` against `root`, checking that it proves keys of this tree's length.
    pub fn verify(&self, proof: &SparseProof, root: NodeHash) -> anyhow::Result<VerifiedSparseProof> {
        if let Some(query) = proof
            .queries
            .iter()
            .find(|query| query.key.len() != self.options.key_length)
        {
            anyhow::bail!(
                "proof queries a key of {} bytes, expected {}",
                query.key.len(),
                self.options.key_length
            );
        }
        proof
            .verify::<H>(root)
            .with_context(|| format!("proof does not verify against {}", hex::encode(root)))
    }

    /// A read-only view of the state at `root`.
    pub fn view(&self, root: NodeHash) -> StateView<&S, H> {
        StateView::new(&self.store, root, self.options.key_length)
    }
}

fn verify_write<S, H>(tree: &SparseMerkleTree<S, H>, op: &Op) -> anyhow::Result<()>
where
    S: NodeStore,
    S::Error: std::error::Error + Send + Sync + 'static,
    H: BinaryHash,
{
    let found = tree
        .get(op.key())
        .with_context(|| format!("failed to read back key {}", hex::encode(op.key())))?;
    let expected = match op {
        Op::Put(_, value) => Some(value),
        Op::Delete(_) => None,
    };
    ensure!(
        found.as_ref() == expected,
        "key {} does not read back as written",
        hex::encode(op.key())
    );
    Ok(())
}

/// A read-only sparse tree at a fixed root.
pub struct StateView<S, H = Sha2Hasher> {
    tree: SparseMerkleTree<S, H>,
}

impl<S, H> StateView<S, H>
where
    S: NodeStore,
    S::Error: std::error::Error + Send + Sync + 'static,
    H: BinaryHash,
{
    /// A view of the tree at `root` in `store`.
    pub fn new(store: S, root: NodeHash, key_length: usize) -> Self {
        StateView {
            tree: SparseMerkleTree::with_root(store, root, key_length),
        }
    }

    /// The root of the view.
    pub fn root(&self) -> NodeHash {
        self.tree.root()
    }

    /// The value of `key`.
    pub fn get(&self, key: &[u8]) -> anyhow::Result<Option<Vec<u8>>> {
        self.tree
            .get(key)
            .with_context(|| format!("failed to read key {}", hex::encode(key)))
    }

    /// The root node of the view.
    pub fn root_node(&self) -> anyhow::Result<SparseNode> {
        self.tree
            .node(self.tree.root())
            .context("failed to load root node")
    }

    /// Prove the values of `keys`, or their absence.
    pub fn prove<K: AsRef<[u8]>>(&self, keys: &[K]) -> anyhow::Result<SparseProof> {
        self.tree.prove(keys).context("failed to generate proof")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use std::convert::Infallible;

    fn options() -> Options {
        let mut options = Options::new();
        options.key_length(4);
        options
    }

    // fails every write after the first `writes_left` ones.
    struct FailingStore {
        inner: MemoryStore,
        writes_left: std::cell::Cell<usize>,
    }

    #[derive(Debug)]
    struct OutOfSpace;

    impl std::fmt::Display for OutOfSpace {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("out of space")
        }
    }

    impl std::error::Error for OutOfSpace {}

    impl NodeStore for FailingStore {
        type Error = OutOfSpace;

        fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, OutOfSpace> {
            Ok(self.inner.get(key).unwrap_or_else(|e: Infallible| match e {}))
        }

        fn set(&self, key: &[u8], value: Vec<u8>) -> Result<(), OutOfSpace> {
            match self.writes_left.get() {
                0 => Err(OutOfSpace),
                n => {
                    self.writes_left.set(n - 1);
                    self.inner.set(key, value).map_err(|e| match e {})
                }
            }
        }

        fn delete(&self, key: &[u8]) -> Result<(), OutOfSpace> {
            self.inner.delete(key).map_err(|e| match e {})
        }
    }

    #[test]
    fn update_adopts_root() {
        let mut state = StateTree::<_, Sha2Hasher>::open(MemoryStore::new(), options()).unwrap();
        assert!(state.is_empty());
        let root = state.update(&[0, 0, 0, 1], b"a").unwrap();
        assert_eq!(state.root(), root);
        assert_eq!(state.get(&[0, 0, 0, 1]).unwrap(), Some(b"a".to_vec()));
        assert_eq!(state.remove(&[0, 0, 0, 2]).unwrap(), None);
        assert_eq!(state.remove(&[0, 0, 0, 1]).unwrap(), Some(Sha2Hasher::EMPTY));
        assert!(state.is_empty());
    }

    #[test]
    fn failed_batch_changes_nothing() {
        let store = MemoryStore::new();
        let mut state = StateTree::<_, Sha2Hasher>::open(&store, options()).unwrap();
        state.update(&[0, 0, 0, 1], b"a").unwrap();
        let root = state.root();
        let stored = store.len();

        let err = state
            .commit([
                Op::Put(vec![0, 0, 0, 2], b"b".to_vec()),
                Op::Put(vec![0, 0, 0, 3], b"".to_vec()),
            ])
            .unwrap_err();
        assert!(format!("{err:#}").contains("empty value"));
        assert_eq!(state.root(), root);
        assert_eq!(store.len(), stored);
        assert_eq!(state.get(&[0, 0, 0, 2]).unwrap(), None);
    }

    #[test]
    fn store_failure_is_reported() {
        let store = FailingStore {
            inner: MemoryStore::new(),
            writes_left: std::cell::Cell::new(usize::MAX),
        };
        let mut state = StateTree::<_, Sha2Hasher>::open(&store, options()).unwrap();
        state.update(&[0, 0, 0, 1], b"a").unwrap();
        let root = state.root();

        store.writes_left.set(0);
        let err = state.update(&[0, 0, 0, 2], b"b").unwrap_err();
        assert!(format!("{err:#}").contains("out of space"));
        assert_eq!(state.root(), root);
        assert_eq!(state.get(&[0, 0, 0, 1]).unwrap(), Some(b"a".to_vec()));
    }

    #[test]
    fn open_at_unknown_root_fails() {
        let result = StateTree::<_, Sha2Hasher>::open_at(MemoryStore::new(), [1; 32], options());
        assert!(result.is_err());
    }

    #[test]
    fn verify_checks_key_length() {
        let mut state = StateTree::<_, Sha2Hasher>::open(MemoryStore::new(), options()).unwrap();
        state.update(&[0, 0, 0, 1], b"a").unwrap();
        let proof = state.prove(&[[0u8, 0, 0, 1]]).unwrap();
        assert!(state.verify(&proof, state.root()).is_ok());

        let mut other = Options::new();
        other.key_length(8);
        let wide = StateTree::<_, Sha2Hasher>::open(MemoryStore::new(), other).unwrap();
        assert!(wide.verify(&proof, state.root()).is_err());
    }
}
