//! Hashers (feature-gated) and utilities for implementing them.

/// The output of a node hash. In this schema, it is always 256 bits.
pub type NodeHash = [u8; 32];

/// A simple trait for representing binary hash functions.
///
/// Every tree in this crate is generic over one of these. The hash must behave approximately
/// like a random oracle over the space 2^256; Sha2 and Blake3 both meet this criterion.
pub trait BinaryHash {
    /// The hash of the empty byte string. Stands in for an empty sub-tree at any height.
    ///
    /// Implementations must keep this equal to `Self::hash(&[])`.
    const EMPTY: NodeHash;

    /// Given a bit-string, produce a 32-byte hash.
    fn hash(input: &[u8]) -> NodeHash;

    /// Hash the concatenation of `parts`.
    ///
    /// An optional specialization of `hash` which avoids building the concatenated buffer.
    fn hash_parts(parts: &[&[u8]]) -> NodeHash {
        let len = parts.iter().map(|p| p.len()).sum();
        let mut buf = alloc::vec::Vec::with_capacity(len);
        for part in parts {
            buf.extend_from_slice(part);
        }
        Self::hash(&buf)
    }
}

#[cfg(any(feature = "blake3-hasher", test))]
pub use blake3::Blake3Hasher;

/// A node hasher making use of blake3.
#[cfg(any(feature = "blake3-hasher", test))]
pub mod blake3 {
    use super::{BinaryHash, NodeHash};

    /// A [`BinaryHash`] implementation for Blake3.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct Blake3Hasher;

    impl BinaryHash for Blake3Hasher {
        const EMPTY: NodeHash = [
            0xaf, 0x13, 0x49, 0xb9, 0xf5, 0xf9, 0xa1, 0xa6, 0xa0, 0x40, 0x4d, 0xea, 0x36, 0xdc,
            0xc9, 0x49, 0x9b, 0xcb, 0x25, 0xc9, 0xad, 0xc1, 0x12, 0xb7, 0xcc, 0x9a, 0x93, 0xca,
            0xe4, 0x1f, 0x32, 0x62,
        ];

        fn hash(value: &[u8]) -> NodeHash {
            blake3::hash(value).into()
        }

        fn hash_parts(parts: &[&[u8]]) -> NodeHash {
            let mut hasher = blake3::Hasher::new();
            for part in parts {
                hasher.update(part);
            }
            hasher.finalize().into()
        }
    }
}

#[cfg(feature = "sha2-hasher")]
pub use sha2::Sha2Hasher;

/// A node hasher making use of sha2-256. This is the canonical hash of the network.
#[cfg(feature = "sha2-hasher")]
pub mod sha2 {
    use super::{BinaryHash, NodeHash};
    use sha2::{Digest, Sha256};

    /// A [`BinaryHash`] implementation for Sha2.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct Sha2Hasher;

    impl BinaryHash for Sha2Hasher {
        const EMPTY: NodeHash = [
            0xe3, 0xb0, 0xc4, 0x42, 0x98, 0xfc, 0x1c, 0x14, 0x9a, 0xfb, 0xf4, 0xc8, 0x99, 0x6f,
            0xb9, 0x24, 0x27, 0xae, 0x41, 0xe4, 0x64, 0x9b, 0x93, 0x4c, 0xa4, 0x95, 0x99, 0x1b,
            0x78, 0x52, 0xb8, 0x55,
        ];

        fn hash(value: &[u8]) -> NodeHash {
            let mut hasher = Sha256::new();
            hasher.update(value);
            hasher.finalize().into()
        }

        fn hash_parts(parts: &[&[u8]]) -> NodeHash {
            let mut hasher = Sha256::new();
            for part in parts {
                hasher.update(part);
            }
            hasher.finalize().into()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BinaryHash, Blake3Hasher};

    #[test]
    fn blake3_empty_is_hash_of_nothing() {
        assert_eq!(Blake3Hasher::EMPTY, Blake3Hasher::hash(&[]));
    }

    #[cfg(feature = "sha2-hasher")]
    #[test]
    fn sha2_empty_is_hash_of_nothing() {
        use super::Sha2Hasher;
        assert_eq!(Sha2Hasher::EMPTY, Sha2Hasher::hash(&[]));
        assert_eq!(
            Sha2Hasher::EMPTY,
            hex_literal::hex!("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855")
        );
    }

    #[test]
    fn hash_parts_matches_concatenation() {
        let parts: [&[u8]; 3] = [b"\x01", b"left", b"right"];
        assert_eq!(
            Blake3Hasher::hash_parts(&parts),
            Blake3Hasher::hash(b"\x01leftright")
        );
    }
}
