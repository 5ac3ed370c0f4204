// # -----------------------------
// # crates/bundle/src/replay.rs
// # -----------------------------
//! Replay (spec §4.H "Replay"). Reconstructs a fresh sandbox from a bundle's
//! recorded `workspace_manifest.json` and `final.patch`, then reruns every
//! `proof_target` from the bundle's `policy.json` under 4.C.
use std::path::{Path, PathBuf};
use std::time::Duration;

use pp_common::{EnvSnapshot, Policy, PpError, Result, WorkspaceManifest};
use pp_exec::{run_host, should_run_unshelled, RunRequest};
use serde::Serialize;

use crate::attest;

#[derive(Debug, Clone, Serialize)]
pub struct ReplayTargetResult {
    pub name: String,
    pub exit_code: i32,
    pub timed_out: bool,
    pub passed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayOutcome {
    pub sandbox_path: PathBuf,
    pub targets: Vec<ReplayTargetResult>,
}

impl ReplayOutcome {
    pub fn all_passed(&self) -> bool {
        self.targets.iter().all(|t| t.passed)
    }
}

/// `source_root` is the tree `workspace_manifest.json` was computed against
/// (normally the bundle's own recorded `workspace_root`, overridable by
/// `--cwd`). `dest_sandbox` is a fresh, empty directory to materialize into.
pub fn replay_bundle(
    bundle_dir: &Path,
    source_root: &Path,
    dest_sandbox: &Path,
    verify_attestation: bool,
    attest_key: Option<&[u8]>,
) -> Result<ReplayOutcome> {
    if verify_attestation {
        attest::verify(bundle_dir, attest_key)?;
    }

    let manifest_text = std::fs::read_to_string(bundle_dir.join("workspace_manifest.json"))?;
    let manifest: WorkspaceManifest =
        serde_json::from_str(&manifest_text).map_err(|e| PpError::InvalidConfig(e.to_string()))?;

    std::fs::create_dir_all(dest_sandbox)?;
    for entry in &manifest.files {
        let src = source_root.join(&entry.path);
        let bytes = std::fs::read(&src)?;
        let actual = pp_common::sha256_hex(&bytes);
        if actual != entry.sha256 {
            return Err(PpError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} does not match the recorded manifest digest", entry.path),
            )));
        }
        let dst = dest_sandbox.join(&entry.path);
        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&dst, &bytes)?;
    }

    let patch_text = std::fs::read_to_string(bundle_dir.join("final.patch"))?;
    if !patch_text.trim().is_empty() {
        let patch = pp_patch::parse(&patch_text)?;
        pp_patch::apply_in_process(dest_sandbox, &patch, &recorded_policy(bundle_dir)?)?;
    }

    let policy = recorded_policy(bundle_dir)?;
    let snapshot = EnvSnapshot::capture(None);
    let mut targets = Vec::new();
    for target in &policy.proof_targets {
        let unshelled = should_run_unshelled(&policy, target.argv.as_deref());
        let req = RunRequest {
            cwd: dest_sandbox,
            cmd: &target.cmd,
            argv: target.argv.as_deref(),
            unshelled,
            timeout: Duration::from_secs(policy.limits.per_command_timeout_sec),
            env_snapshot: &snapshot,
            extra_env_to_drop: &[],
        };
        let result = run_host(req)?;
        targets.push(ReplayTargetResult {
            name: target.name.clone(),
            exit_code: result.exit_code,
            timed_out: result.timed_out,
            passed: result.is_pass(),
        });
    }

    Ok(ReplayOutcome {
        sandbox_path: dest_sandbox.to_path_buf(),
        targets,
    })
}

fn recorded_policy(bundle_dir: &Path) -> Result<Policy> {
    let text = std::fs::read_to_string(bundle_dir.join("policy.json"))?;
    serde_json::from_str(&text).map_err(|e| PpError::InvalidConfig(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pp_common::{
        AttestationCfg, AttestationMode, Limits, Network, ProofTarget, SandboxBackend, SandboxCfg,
    };
    use std::collections::BTreeSet;

    fn policy() -> Policy {
        Policy {
            network: Network::Deny,
            allowed_commands: BTreeSet::from(["true".to_string()]),
            allowed_argv: BTreeSet::new(),
            write_allowlist: vec!["**".into()],
            deny_write: vec![],
            limits: Limits {
                max_attempts: 1,
                max_files_changed: None,
                max_patch_bytes: None,
                per_command_timeout_sec: 5,
            },
            minimize: false,
            sandbox: SandboxCfg {
                backend: SandboxBackend::Copy,
                container_runtime: None,
                container_image: None,
                container_workdir: None,
                cpu_limit: None,
                memory_limit: None,
            },
            attestation: AttestationCfg {
                enabled: false,
                mode: AttestationMode::None,
                key_env: None,
            },
            proof_targets: vec![ProofTarget {
                name: "smoke".into(),
                cmd: "true".into(),
                argv: None,
            }],
        }
    }

    #[test]
    fn replays_an_unattested_bundle_and_reruns_targets() {
        let source = tempfile::tempdir().unwrap();
        std::fs::write(source.path().join("a.txt"), "hi\n").unwrap();

        let bundle = tempfile::tempdir().unwrap();
        let manifest = crate::manifest::compute(source.path(), bundle.path()).unwrap();
        std::fs::write(
            bundle.path().join("workspace_manifest.json"),
            serde_json::to_string(&manifest).unwrap(),
        )
        .unwrap();
        std::fs::write(
            bundle.path().join("policy.json"),
            serde_json::to_string(&policy()).unwrap(),
        )
        .unwrap();
        std::fs::write(bundle.path().join("final.patch"), "").unwrap();

        let dest = tempfile::tempdir().unwrap();
        let sandbox = dest.path().join("sandbox");
        let outcome = replay_bundle(bundle.path(), source.path(), &sandbox, false, None).unwrap();
        assert!(outcome.all_passed());
        assert!(sandbox.join("a.txt").exists());
    }
}
