// # -----------------------------
// # crates/orchestrator/src/minimize.rs
// # -----------------------------
//! Wires `pp_patch::minimize`'s pure hunk-removal search to a real
//! re-apply-and-reverify loop (spec §4.A step 5 / §4.F), each candidate
//! checked against a disposable copy of the workspace so the winning
//! sandbox is never touched by a rejected candidate.
use std::path::Path;
use std::time::Duration;

use pp_common::{EnvSnapshot, Patch, Policy, ProofTarget, Result};
use pp_exec::{run_host, should_run_unshelled, RunRequest};

pub fn minimize_patch(
    workspace_root: &Path,
    policy: &Policy,
    target: &ProofTarget,
    env_snapshot: &EnvSnapshot,
    patch: &Patch,
) -> Patch {
    let timeout = Duration::from_secs(policy.limits.per_command_timeout_sec);
    pp_patch::minimize(patch, |candidate| {
        still_passes(workspace_root, policy, target, env_snapshot, candidate, timeout)
            .unwrap_or(false)
    })
}

fn still_passes(
    workspace_root: &Path,
    policy: &Policy,
    target: &ProofTarget,
    env_snapshot: &EnvSnapshot,
    candidate: &Patch,
    timeout: Duration,
) -> Result<bool> {
    let tmp = tempfile::tempdir()?;
    let sandbox = pp_sandbox::materialize(workspace_root, tmp.path(), pp_common::SandboxBackend::Copy)?;
    if candidate.is_empty() {
        // An empty candidate means "remove everything"; the baseline must
        // already pass for this to succeed, which the caller never expects
        // (patch.minimize never offers an empty patch unless it verified it
        // first), but guard anyway rather than applying a no-op.
    } else {
        pp_patch::apply_in_process(&sandbox.root, candidate, policy)?;
    }
    let unshelled = should_run_unshelled(policy, target.argv.as_deref());
    let req = RunRequest {
        cwd: &sandbox.root,
        cmd: &target.cmd,
        argv: target.argv.as_deref(),
        unshelled,
        timeout,
        env_snapshot,
        extra_env_to_drop: &[],
    };
    let result = run_host(req)?;
    Ok(result.is_pass())
}
