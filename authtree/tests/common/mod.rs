use authtree::{MemoryStore, Options, Sha2Hasher, StateTree};

pub const KEY_LENGTH: usize = 8;

pub fn key_path(id: u64) -> Vec<u8> {
    // Keys should be spread evenly over the key space, so use a PRNG seeded with the id.
    use rand::{RngCore as _, SeedableRng as _};
    let mut seed = [0; 16];
    seed[0..8].copy_from_slice(&id.to_le_bytes());
    let mut rng = rand_pcg::Lcg64Xsh32::from_seed(seed);
    let mut key = vec![0; KEY_LENGTH];
    for chunk in key.chunks_mut(4) {
        chunk.copy_from_slice(&rng.next_u32().to_le_bytes());
    }
    key
}

#[allow(dead_code)]
pub fn value(id: u64) -> Vec<u8> {
    format!("value-{id}").into_bytes()
}

#[allow(dead_code)]
pub fn opts(key_length: usize) -> Options {
    let mut opts = Options::new();
    opts.key_length(key_length);
    opts
}

#[allow(dead_code)]
pub fn open(store: &MemoryStore, opts: Options) -> StateTree<&MemoryStore, Sha2Hasher> {
    StateTree::open(store, opts).unwrap()
}
