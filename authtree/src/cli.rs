use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Hash function used for every node.
    #[arg(long, global = true, value_enum, default_value_t = HasherKind::Sha2)]
    pub hasher: HasherKind,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum HasherKind {
    /// SHA-256
    Sha2,
    /// BLAKE3. Needs the `blake3-hasher` feature.
    Blake3,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the root of a dense tree over the given leaves.
    DenseRoot(Leaves),

    /// Prove the values of some leaves of a dense tree.
    ///
    /// The proof is printed as TOML, ready for `dense-verify`.
    DenseProve {
        /// Index of a leaf to prove. May be repeated.
        #[arg(long = "index", short, required = true)]
        indexes: Vec<u32>,

        #[command(flatten)]
        leaves: Leaves,
    },

    /// Check a dense proof against a root.
    ///
    /// The leaves given are the values of the proven leaves, in index order.
    DenseVerify {
        /// Proof file written by `dense-prove`.
        #[arg(long)]
        proof: PathBuf,

        /// The expected root, in hex.
        #[arg(long)]
        root: String,

        #[command(flatten)]
        leaves: Leaves,
    },

    /// Run a script of operations against an in-memory sparse tree.
    ///
    /// Example script:
    ///
    /// key_length = 4 {n}
    /// prune_stale = true {n}
    /// [[steps]] {n}
    /// op = "put" {n}
    /// key = "00000001" {n}
    /// value = "hello" {n}
    /// [[steps]] {n}
    /// op = "get" {n}
    /// key = "00000001" {n}
    /// prove = ["00000001", "00000002"]
    SparseRun {
        /// Path to the TOML script.
        script: PathBuf,
    },
}

#[derive(Clone, Debug, Args)]
pub struct Leaves {
    /// Leaf values, in order.
    #[arg(required = true)]
    pub leaves: Vec<String>,

    /// Read every leaf value as hex instead of text.
    #[arg(long)]
    pub hex: bool,
}

impl Leaves {
    pub fn decode(&self) -> anyhow::Result<Vec<Vec<u8>>> {
        self.leaves
            .iter()
            .map(|leaf| match self.hex {
                true => hex::decode(leaf)
                    .map_err(|e| anyhow::anyhow!("leaf {leaf:?} is not valid hex: {e}")),
                false => Ok(leaf.as_bytes().to_vec()),
            })
            .collect()
    }
}
