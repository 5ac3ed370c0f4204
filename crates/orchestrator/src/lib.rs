// # -----------------------------
// # crates/orchestrator/src/lib.rs
// # -----------------------------
//! Attempt orchestrator (spec §4.A), grounded on the teacher's
//! `devit-agent::Agent`: the top component that wires sandbox, exec, policy,
//! patch, proposer, and bundle together for one session.
mod context;
mod diff;
mod minimize;
mod provenance;
mod session;

pub use session::{run_session, RunSessionInput, RunSessionOutput};

use pp_common::{EnvSnapshot, Policy, ProofTarget, Result};
use pp_proposer::Proposer;
use std::path::Path;

/// Run every `policy.proof_targets[*]` as its own session (spec §6 `prove`),
/// since a `Session` is defined against a single verification command.
pub async fn prove_all<'a>(
    workspace_root: &'a Path,
    artifact_root: &'a Path,
    policy: &'a Policy,
    proposer: &'a dyn Proposer,
    env_snapshot: &'a EnvSnapshot,
    provider: &'a str,
) -> Result<Vec<RunSessionOutput>> {
    let mut outputs = Vec::new();
    for target in &policy.proof_targets {
        let input = RunSessionInput {
            workspace_root,
            artifact_root,
            policy,
            target: target.clone(),
            proposer,
            env_snapshot,
            provider,
        };
        outputs.push(run_session(input).await?);
    }
    Ok(outputs)
}

/// Run a single ad-hoc target (spec §6 `run <cmd>`), not necessarily a
/// member of `policy.proof_targets`.
pub async fn run_adhoc<'a>(
    workspace_root: &'a Path,
    artifact_root: &'a Path,
    policy: &'a Policy,
    cmd: &str,
    argv: Option<Vec<String>>,
    proposer: &'a dyn Proposer,
    env_snapshot: &'a EnvSnapshot,
    provider: &'a str,
) -> Result<RunSessionOutput> {
    let target = ProofTarget {
        name: "ad-hoc".to_string(),
        cmd: cmd.to_string(),
        argv,
    };
    let input = RunSessionInput {
        workspace_root,
        artifact_root,
        policy,
        target,
        proposer,
        env_snapshot,
        provider,
    };
    run_session(input).await
}
