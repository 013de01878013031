//! File formats read and written by the binary.

use anyhow::Context as _;
use authtree::{
    proof::{Proof, SiblingHash},
    NodeHash, NodeLocation,
};
use serde::{Deserialize, Serialize};

/// A dense proof as written by `dense-prove`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ProofFile {
    pub size: u32,
    pub indexes: Vec<u32>,
    pub siblings: Vec<SiblingEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SiblingEntry {
    pub layer: u8,
    pub index: u32,
    pub hash: String,
}

impl ProofFile {
    pub fn from_proof(proof: &Proof) -> Self {
        ProofFile {
            size: proof.size,
            indexes: proof.indexes.iter().map(|l| l.node_index).collect(),
            siblings: proof
                .sibling_hashes
                .iter()
                .map(|sibling| SiblingEntry {
                    layer: sibling.layer_index,
                    index: sibling.node_index,
                    hash: hex::encode(sibling.hash),
                })
                .collect(),
        }
    }

    pub fn into_proof(self) -> anyhow::Result<Proof> {
        let sibling_hashes = self
            .siblings
            .into_iter()
            .map(|entry| {
                Ok(SiblingHash {
                    hash: parse_hash(&entry.hash)?,
                    layer_index: entry.layer,
                    node_index: entry.index,
                })
            })
            .collect::<anyhow::Result<_>>()?;
        Ok(Proof {
            size: self.size,
            indexes: self.indexes.into_iter().map(NodeLocation::leaf).collect(),
            sibling_hashes,
        })
    }
}

/// A sequence of operations on a sparse tree.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Script {
    #[serde(default = "default_key_length")]
    pub key_length: usize,
    #[serde(default)]
    pub prune_stale: bool,
    #[serde(default)]
    pub steps: Vec<Step>,
    /// Keys to prove once every step has run.
    #[serde(default)]
    pub prove: Vec<String>,
}

fn default_key_length() -> usize {
    authtree::DEFAULT_KEY_LENGTH
}

/// Keys are hex. Values are text.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase", deny_unknown_fields)]
pub enum Step {
    Put { key: String, value: String },
    Delete { key: String },
    Get { key: String },
}

impl Script {
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let script: Script = toml::from_str(text).context("invalid script")?;
        anyhow::ensure!(script.key_length > 0, "key_length must be positive");
        Ok(script)
    }
}

pub fn parse_hash(text: &str) -> anyhow::Result<NodeHash> {
    let mut hash = NodeHash::default();
    hex::decode_to_slice(text.trim_start_matches("0x"), &mut hash)
        .with_context(|| format!("{text:?} is not a 32-byte hex hash"))?;
    Ok(hash)
}

pub fn parse_key(text: &str) -> anyhow::Result<Vec<u8>> {
    hex::decode(text.trim_start_matches("0x")).with_context(|| format!("key {text:?} is not hex"))
}
