// # -----------------------------
// # crates/bundle/src/writer.rs
// # -----------------------------
//! Proof bundle writer (spec §4.G). Writes files in the canonical order
//! required for deterministic, replayable artifacts: `policy.json`,
//! `environment.json`, `workspace_manifest.json`, optional `source_git.diff`,
//! `attempts/<i>/...`, `final.patch`, `final_summary.md`, and `repro.json`
//! last, since it references digests of everything already on disk.
use std::path::Path;

use pp_common::{canonical_json, Policy, ProofTarget, ReproJson, Result, Session, WorkspaceManifest};
use serde::Serialize;

use crate::manifest;

#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentInfo {
    pub os: String,
    pub arch: String,
    pub pp_version: String,
    #[serde(default)]
    pub container_runtime_version: Option<String>,
    /// Names (not values) of the environment variables this session
    /// consulted, per spec §5's "not logged" requirement on secrets.
    pub env_whitelist: Vec<String>,
}

impl EnvironmentInfo {
    pub fn capture(container_runtime_version: Option<String>) -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            pp_version: env!("CARGO_PKG_VERSION").to_string(),
            container_runtime_version,
            env_whitelist: vec![
                "PP_PROVIDER".to_string(),
                "PP_OPENAI_BASE_URL".to_string(),
                "PP_OPENAI_MODEL".to_string(),
                "PP_OPENAI_MAX_TOKENS".to_string(),
                "PP_LOCAL_BASE_URL".to_string(),
                "PP_LOCAL_MODEL".to_string(),
                "PP_LOCAL_TIMEOUT_SEC".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone)]
pub struct GitProvenance {
    pub commit: Option<String>,
    pub branch: Option<String>,
    pub remote_url: Option<String>,
    pub dirty: bool,
    pub dirty_diff: Option<String>,
}

fn write_canonical<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = canonical_json(value)
        .map_err(|e| pp_common::PpError::InvalidConfig(e.to_string()))?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Write every bundle file for a finished `session` into `bundle_dir`
/// (created if missing), in the order spec §4.G requires.
pub fn write_bundle(
    bundle_dir: &Path,
    workspace_root: &Path,
    policy: &Policy,
    session: &Session,
    target: &ProofTarget,
    git: &GitProvenance,
    provider: &str,
    sandbox_backend: &str,
    container_runtime_version: Option<String>,
    started_at: &str,
    ended_at: &str,
) -> Result<WorkspaceManifest> {
    std::fs::create_dir_all(bundle_dir)?;

    write_canonical(&bundle_dir.join("policy.json"), policy)?;

    let environment = EnvironmentInfo::capture(container_runtime_version.clone());
    write_canonical(&bundle_dir.join("environment.json"), &environment)?;

    let workspace_manifest = manifest::compute(workspace_root, bundle_dir)?;
    write_canonical(&bundle_dir.join("workspace_manifest.json"), &workspace_manifest)?;

    if git.dirty {
        if let Some(diff) = &git.dirty_diff {
            std::fs::write(bundle_dir.join("source_git.diff"), diff)?;
        }
    }

    let attempts_dir = bundle_dir.join("attempts");
    for attempt in &session.attempts {
        let dir_name = if attempt.index == 0 {
            "0_baseline".to_string()
        } else {
            attempt.index.to_string()
        };
        let dir = attempts_dir.join(&dir_name);
        std::fs::create_dir_all(&dir)?;
        write_canonical(&dir.join("verify.json"), &attempt.verify)?;
        if attempt.index > 0 {
            if let Some(proposed) = &attempt.proposed_diff {
                write_canonical(
                    &dir.join("proposed.json"),
                    &serde_json::json!({ "diff": proposed }),
                )?;
            }
            if let Some(applied) = &attempt.applied_patch {
                std::fs::write(dir.join("applied.patch"), applied)?;
            }
        }
    }

    let final_patch = session.final_patch.clone().unwrap_or_default();
    std::fs::write(bundle_dir.join("final.patch"), &final_patch)?;

    let summary = render_summary(session, &final_patch);
    std::fs::write(bundle_dir.join("final_summary.md"), summary)?;

    let policy_hash = policy.policy_hash()?;
    let repro = ReproJson {
        session_id: session.session_id.clone(),
        command: target.cmd.clone(),
        argv: target.argv.clone(),
        policy_hash,
        workspace_root: workspace_root.to_string_lossy().to_string(),
        workspace_manifest_sha256: workspace_manifest.root_sha256.clone(),
        provider: provider.to_string(),
        sandbox_backend: sandbox_backend.to_string(),
        container_runtime_version,
        git_commit: git.commit.clone(),
        git_branch: git.branch.clone(),
        git_remote_url: git.remote_url.clone(),
        git_dirty: git.dirty,
        started_at: started_at.to_string(),
        ended_at: ended_at.to_string(),
        duration_ms: session
            .attempts
            .last()
            .map(|a| a.verify.duration_ms)
            .unwrap_or(0),
        attempts_used: session.attempts_used(),
        result: session.result,
    };
    write_canonical(&bundle_dir.join("repro.json"), &repro)?;

    Ok(workspace_manifest)
}

fn render_summary(session: &Session, final_patch: &str) -> String {
    let files_changed = pp_patch::parse(final_patch)
        .map(|p| p.files_changed())
        .unwrap_or(0);
    let mut out = String::new();
    out.push_str(&format!("# Session {}\n\n", session.session_id));
    out.push_str(&format!("Result: **{:?}**\n\n", session.result));
    out.push_str(&format!("Attempts used: {}\n\n", session.attempts_used()));
    out.push_str(&format!("Files changed: {}\n\n", files_changed));
    out.push_str("## Attempts\n\n");
    for attempt in &session.attempts {
        out.push_str(&format!(
            "- attempt {}: outcome={:?} exit_code={} timed_out={}\n",
            attempt.index, attempt.outcome, attempt.verify.exit_code, attempt.verify.timed_out
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pp_common::{
        AttestationCfg, AttestationMode, Limits, Network, Outcome, ResultKind, SandboxBackend,
        SandboxCfg, VerifyResult,
    };
    use pp_common::Attempt;
    use std::collections::BTreeSet;

    fn policy() -> Policy {
        Policy {
            network: Network::Deny,
            allowed_commands: BTreeSet::from(["pytest -q".to_string()]),
            allowed_argv: BTreeSet::new(),
            write_allowlist: vec!["**".into()],
            deny_write: vec![],
            limits: Limits {
                max_attempts: 3,
                max_files_changed: None,
                max_patch_bytes: None,
                per_command_timeout_sec: 30,
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
            proof_targets: vec![pp_common::ProofTarget {
                name: "unit".into(),
                cmd: "pytest -q".into(),
                argv: None,
            }],
        }
    }

    #[test]
    fn writes_files_in_canonical_order_and_repro_last() {
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("a.txt"), "hi\n").unwrap();
        let bundle_dir = src.path().join(".proof");

        let session = Session {
            session_id: "sess-1".into(),
            workspace_root: src.path().to_path_buf(),
            sandbox_path: src.path().join("sandbox"),
            attempts: vec![Attempt {
                index: 0,
                proposed_diff: None,
                applied_patch: None,
                verify: VerifyResult {
                    exit_code: 0,
                    duration_ms: 10,
                    stdout_tail: String::new(),
                    stderr_tail: String::new(),
                    timed_out: false,
                },
                outcome: Outcome::Pass,
                reject_reason: None,
            }],
            final_patch: Some(String::new()),
            result: ResultKind::Pass,
        };

        let git = GitProvenance {
            commit: None,
            branch: None,
            remote_url: None,
            dirty: false,
            dirty_diff: None,
        };

        write_bundle(
            &bundle_dir,
            src.path(),
            &policy(),
            &session,
            &pp_common::ProofTarget {
                name: "unit".into(),
                cmd: "pytest -q".into(),
                argv: None,
            },
            &git,
            "openai",
            "copy",
            None,
            "2026-01-01T00:00:00Z",
            "2026-01-01T00:00:01Z",
        )
        .unwrap();

        for name in [
            "policy.json",
            "environment.json",
            "workspace_manifest.json",
            "final.patch",
            "final_summary.md",
            "repro.json",
        ] {
            assert!(bundle_dir.join(name).exists(), "missing {name}");
        }
        assert!(bundle_dir.join("attempts/0_baseline/verify.json").exists());
    }
}
