// # -----------------------------
// # crates/bundle/src/attest.rs
// # -----------------------------
//! Attestation sign/verify (spec §4.H), grounded on the teacher's
//! `devit-cli::attest::attest_diff` HMAC-over-manifest-digest idiom, adapted
//! from a single diff-signature to a whole-bundle file manifest.
use std::collections::BTreeMap;
use std::path::Path;

use base64::Engine;
use hmac::{Hmac, Mac};
use pp_common::{Attestation, AttestationMode, PpError, Result};
use sha2::Sha256;

use crate::sha256_file;

type HmacSha256 = Hmac<Sha256>;

const ATTESTATION_FILE: &str = "attestation.json";

/// Walk `bundle_dir`, hash every file except `attestation.json` itself, and
/// return the sorted `{path -> sha256}` map (spec §4.H, §3 invariant).
pub fn compute_bundle_manifest(bundle_dir: &Path) -> Result<BTreeMap<String, String>> {
    let mut manifest = BTreeMap::new();
    for entry in walkdir::WalkDir::new(bundle_dir)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(bundle_dir)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        if rel == ATTESTATION_FILE {
            continue;
        }
        let digest = sha256_file(entry.path())?;
        manifest.insert(rel, digest);
    }
    Ok(manifest)
}

/// Sign the bundle at `bundle_dir` and write `attestation.json`. `key` is the
/// raw bytes read from the env var named by `policy.attestation.key_env`;
/// its absence for `mode=hmac-sha256` is an `invalid_config` error (spec §7).
pub fn sign(bundle_dir: &Path, mode: AttestationMode, key: Option<&[u8]>) -> Result<Attestation> {
    let bundle_manifest = compute_bundle_manifest(bundle_dir)?;
    let manifest_digest = Attestation::compute_manifest_digest(&bundle_manifest)?;

    let signature = match mode {
        AttestationMode::None => None,
        AttestationMode::HmacSha256 => {
            let key = key.ok_or_else(|| {
                PpError::InvalidConfig("attestation key_env is unset but mode=hmac-sha256".into())
            })?;
            let mut mac = HmacSha256::new_from_slice(key)
                .map_err(|e| PpError::InvalidConfig(e.to_string()))?;
            mac.update(manifest_digest.as_bytes());
            Some(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
        }
    };

    let attestation = Attestation {
        mode,
        bundle_manifest,
        manifest_digest,
        signature,
    };
    let json = pp_common::canonical_json(&attestation)
        .map_err(|e| PpError::InvalidConfig(e.to_string()))?;
    std::fs::write(bundle_dir.join(ATTESTATION_FILE), json)?;
    Ok(attestation)
}

/// Recompute the bundle manifest and digest; compare against the recorded
/// `attestation.json`. On `mode=hmac-sha256`, recomputes the HMAC and
/// compares it in constant time (spec §4.H "Verify").
pub fn verify(bundle_dir: &Path, key: Option<&[u8]>) -> Result<()> {
    let recorded_text = std::fs::read_to_string(bundle_dir.join(ATTESTATION_FILE))?;
    let recorded: Attestation =
        serde_json::from_str(&recorded_text).map_err(|e| PpError::InvalidConfig(e.to_string()))?;

    let current_manifest = compute_bundle_manifest(bundle_dir)?;
    for (path, recorded_hash) in &recorded.bundle_manifest {
        match current_manifest.get(path) {
            Some(current_hash) if current_hash == recorded_hash => {}
            _ => {
                return Err(PpError::AttestationMismatch { path: path.clone() });
            }
        }
    }
    for path in current_manifest.keys() {
        if !recorded.bundle_manifest.contains_key(path) {
            return Err(PpError::AttestationMismatch { path: path.clone() });
        }
    }

    let recomputed_digest = Attestation::compute_manifest_digest(&current_manifest)?;
    if recomputed_digest != recorded.manifest_digest {
        return Err(PpError::AttestationMismatch {
            path: "manifest_digest".into(),
        });
    }

    if recorded.mode == AttestationMode::HmacSha256 {
        let key = key.ok_or_else(|| {
            PpError::InvalidConfig("attestation key_env is unset but mode=hmac-sha256".into())
        })?;
        let mut mac = HmacSha256::new_from_slice(key)
            .map_err(|e| PpError::InvalidConfig(e.to_string()))?;
        mac.update(recomputed_digest.as_bytes());
        let expected = recorded
            .signature
            .as_deref()
            .ok_or_else(|| PpError::AttestationMismatch {
                path: "signature".into(),
            })?;
        let expected_bytes = base64::engine::general_purpose::STANDARD
            .decode(expected)
            .map_err(|_| PpError::AttestationMismatch {
                path: "signature".into(),
            })?;
        mac.verify_slice(&expected_bytes)
            .map_err(|_| PpError::AttestationMismatch {
                path: "signature".into(),
            })?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("policy.json"), "{}").unwrap();
        std::fs::write(dir.path().join("final.patch"), "").unwrap();

        let key = b"a-32-byte-test-signing-key-value";
        sign(dir.path(), AttestationMode::HmacSha256, Some(key)).unwrap();
        verify(dir.path(), Some(key)).unwrap();
    }

    #[test]
    fn flipping_a_byte_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("policy.json"), "{}").unwrap();
        std::fs::write(dir.path().join("final.patch"), "original").unwrap();

        let key = b"a-32-byte-test-signing-key-value";
        sign(dir.path(), AttestationMode::HmacSha256, Some(key)).unwrap();

        std::fs::write(dir.path().join("final.patch"), "tampered").unwrap();
        let err = verify(dir.path(), Some(key)).unwrap_err();
        assert_eq!(err.kind(), pp_common::ErrorKind::AttestationMismatch);
    }

    #[test]
    fn attestation_file_excludes_itself_from_its_own_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("policy.json"), "{}").unwrap();
        let attestation = sign(dir.path(), AttestationMode::None, None).unwrap();
        assert!(!attestation.bundle_manifest.contains_key(ATTESTATION_FILE));
    }
}
