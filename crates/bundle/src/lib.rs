// # -----------------------------
// # crates/bundle/src/lib.rs
// # -----------------------------
//! Proof bundle writer, attestation, and replay (spec §4.G, §4.H).
use std::path::Path;

use pp_common::{sha256_hex, Result};

pub mod attest;
pub mod manifest;
pub mod replay;
pub mod writer;

pub use attest::{compute_bundle_manifest, sign, verify};
pub use replay::{replay_bundle, ReplayOutcome, ReplayTargetResult};
pub use writer::{write_bundle, EnvironmentInfo, GitProvenance};

pub(crate) fn sha256_file(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(sha256_hex(&bytes))
}
