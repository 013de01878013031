use crate::DEFAULT_KEY_LENGTH;

/// Options when opening a [`crate::StateTree`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// The length of every key, in bytes.
    pub(crate) key_length: usize,
    /// Delete the nodes superseded by each mutation.
    pub(crate) prune_stale: bool,
    /// Read every written value back before adopting a new root.
    pub(crate) verify_writes: bool,
}

impl Options {
    /// Create a new `Options` instance with the default values.
    pub fn new() -> Self {
        Self {
            key_length: DEFAULT_KEY_LENGTH,
            prune_stale: false,
            verify_writes: false,
        }
    }

    /// Set the length of keys in bytes.
    ///
    /// Must be more than 0.
    ///
    /// Default: 36.
    pub fn key_length(&mut self, key_length: usize) {
        assert!(key_length > 0);
        self.key_length = key_length;
    }

    /// Set to `true` to delete the nodes of the previous root which a mutation supersedes.
    ///
    /// Earlier roots are no longer readable once pruned. Leave this off while readers may still
    /// need them.
    ///
    /// Default: off.
    pub fn prune_stale(&mut self, prune_stale: bool) {
        self.prune_stale = prune_stale;
    }

    /// Set to `true` to read every written key back from the new root before adopting it.
    ///
    /// Default: off.
    pub fn verify_writes(&mut self, verify_writes: bool) {
        self.verify_writes = verify_writes;
    }
}

impl Default for Options {
    fn default() -> Self {
        Self::new()
    }
}
