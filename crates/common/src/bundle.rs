// # -----------------------------
// # crates/common/src/bundle.rs
// # -----------------------------
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::canonical::{canonical_json, sha256_hex};
use crate::error::{PpError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: String,
    pub sha256: String,
    pub size: u64,
}

/// `{files: [{path, sha256, size}], root_sha256}` covering the user's
/// workspace pre-run (excluding the artifact directory and `.git/`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceManifest {
    pub files: Vec<ManifestEntry>,
    pub root_sha256: String,
}

impl WorkspaceManifest {
    /// `root_sha256` is the digest of the sorted `path\tsha256\n` list.
    pub fn compute_root_sha256(files: &[ManifestEntry]) -> String {
        let mut sorted: Vec<&ManifestEntry> = files.iter().collect();
        sorted.sort_by(|a, b| a.path.cmp(&b.path));
        let mut buf = String::new();
        for f in sorted {
            buf.push_str(&f.path);
            buf.push('\t');
            buf.push_str(&f.sha256);
            buf.push('\n');
        }
        sha256_hex(buf.as_bytes())
    }
}

/// `{mode, bundle_manifest: {path -> sha256}, manifest_digest, signature?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attestation {
    pub mode: crate::policy::AttestationMode,
    pub bundle_manifest: BTreeMap<String, String>,
    pub manifest_digest: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Attestation {
    /// sha256 of the canonical serialization of `bundle_manifest` (paths
    /// sorted lexicographically already, since it's a BTreeMap).
    pub fn compute_manifest_digest(bundle_manifest: &BTreeMap<String, String>) -> Result<String> {
        let json =
            canonical_json(bundle_manifest).map_err(|e| PpError::InvalidConfig(e.to_string()))?;
        Ok(sha256_hex(json.as_bytes()))
    }
}

/// Top-level fields of `repro.json`, written last in the bundle (§4.G).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReproJson {
    pub session_id: String,
    pub command: String,
    #[serde(default)]
    pub argv: Option<Vec<String>>,
    pub policy_hash: String,
    pub workspace_root: String,
    pub workspace_manifest_sha256: String,
    pub provider: String,
    pub sandbox_backend: String,
    #[serde(default)]
    pub container_runtime_version: Option<String>,
    #[serde(default)]
    pub git_commit: Option<String>,
    #[serde(default)]
    pub git_branch: Option<String>,
    #[serde(default)]
    pub git_remote_url: Option<String>,
    pub git_dirty: bool,
    pub started_at: String,
    pub ended_at: String,
    pub duration_ms: u128,
    pub attempts_used: u32,
    pub result: crate::session::ResultKind,
}
