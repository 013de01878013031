use anyhow::{bail, Context as _};
use authtree::{BinaryHash, MemoryStore, MerkleTree, Op, Options, Sha2Hasher, StateTree};
use clap::Parser;
use cli::{Cli, Commands, HasherKind, Leaves};
use script::{ProofFile, Script, Step};

mod cli;
mod logging;
mod script;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init()?;

    match cli.hasher {
        HasherKind::Sha2 => run::<Sha2Hasher>(cli.command),
        #[cfg(feature = "blake3-hasher")]
        HasherKind::Blake3 => run::<authtree::Blake3Hasher>(cli.command),
        #[cfg(not(feature = "blake3-hasher"))]
        HasherKind::Blake3 => bail!("built without the blake3-hasher feature"),
    }
}

fn run<H: BinaryHash>(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::DenseRoot(leaves) => dense_root::<H>(&leaves),
        Commands::DenseProve { indexes, leaves } => dense_prove::<H>(&indexes, &leaves),
        Commands::DenseVerify {
            proof,
            root,
            leaves,
        } => {
            let text = std::fs::read_to_string(&proof)
                .with_context(|| format!("failed to read {}", proof.display()))?;
            dense_verify::<H>(&text, &root, &leaves)
        }
        Commands::SparseRun { script } => {
            let text = std::fs::read_to_string(&script)
                .with_context(|| format!("failed to read {}", script.display()))?;
            sparse_run::<H>(&text)
        }
    }
}

fn dense_root<H: BinaryHash>(leaves: &Leaves) -> anyhow::Result<()> {
    let tree = MerkleTree::<H>::new(leaves.decode()?)?;
    tracing::debug!(size = tree.size(), height = tree.height(), "built dense tree");
    println!("{}", hex::encode(tree.root()));
    Ok(())
}

fn dense_prove<H: BinaryHash>(indexes: &[u32], leaves: &Leaves) -> anyhow::Result<()> {
    let tree = MerkleTree::<H>::new(leaves.decode()?)?;
    let proof = tree
        .generate_proof(indexes)
        .context("failed to generate proof")?;
    tracing::info!(
        root = %hex::encode(tree.root()),
        siblings = proof.sibling_hashes.len(),
        "generated proof"
    );
    print!("{}", toml::to_string(&ProofFile::from_proof(&proof))?);
    Ok(())
}

fn dense_verify<H: BinaryHash>(proof: &str, root: &str, leaves: &Leaves) -> anyhow::Result<()> {
    let proof = toml::from_str::<ProofFile>(proof)
        .context("invalid proof file")?
        .into_proof()?;
    let root = script::parse_hash(root)?;
    let leaves = leaves.decode()?;

    if !authtree::proof::verify_dense_proof::<H, _>(&leaves, &proof, root)? {
        bail!("proof does not match root {}", hex::encode(root));
    }
    println!("ok");
    Ok(())
}

fn sparse_run<H: BinaryHash>(text: &str) -> anyhow::Result<()> {
    let script = Script::parse(text)?;
    let mut options = Options::new();
    options.key_length(script.key_length);
    options.prune_stale(script.prune_stale);

    let store = MemoryStore::new();
    let mut state = StateTree::<_, H>::open(store.clone(), options)?;

    for (i, step) in script.steps.iter().enumerate() {
        match step {
            Step::Put { key, value } => {
                let key = script::parse_key(key)?;
                state
                    .commit([Op::Put(key, value.as_bytes().to_vec())])
                    .with_context(|| format!("step {i} failed"))?;
            }
            Step::Delete { key } => {
                let key = script::parse_key(key)?;
                state
                    .commit([Op::Delete(key)])
                    .with_context(|| format!("step {i} failed"))?;
            }
            Step::Get { key } => {
                let value = state
                    .get(&script::parse_key(key)?)
                    .with_context(|| format!("step {i} failed"))?;
                match value {
                    Some(value) => println!("{key} = {}", String::from_utf8_lossy(&value)),
                    None => println!("{key} absent"),
                }
            }
        }
    }
    tracing::info!(nodes = store.len(), "ran {} steps", script.steps.len());
    println!("root {}", hex::encode(state.root()));

    if script.prove.is_empty() {
        return Ok(());
    }
    let keys = script
        .prove
        .iter()
        .map(|key| script::parse_key(key))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let proof = state.prove(&keys)?;
    let verified = state.verify(&proof, state.root())?;
    println!(
        "proof of {} keys with {} siblings",
        proof.queries.len(),
        proof.sibling_hashes.len()
    );
    for (key, text) in keys.iter().zip(&script.prove) {
        match verified.value(key)? {
            Some(value) => println!("  {text} = {}", String::from_utf8_lossy(value)),
            None => println!("  {text} absent"),
        }
    }
    Ok(())
}
