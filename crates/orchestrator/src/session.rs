// # -----------------------------
// # crates/orchestrator/src/session.rs
// # -----------------------------
//! Attempt orchestrator (spec §4.A): drives one session from baseline
//! verification through the propose/apply/verify loop to a terminal
//! `Session`, then writes (and optionally attests) the proof bundle.
use std::path::{Path, PathBuf};
use std::time::Duration;

use pp_common::{
    Attempt, EnvSnapshot, ErrorKind, Outcome, Patch, Policy, PpError, ProofTarget, Result,
    ResultKind, Session, VerifyResult,
};
use pp_exec::{run_container, run_host, should_run_unshelled, ExecResult, RunRequest};
use pp_proposer::Proposer;
use pp_sandbox::{ResolvedBackend, Sandbox};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{context, diff, minimize, provenance};

pub struct RunSessionInput<'a> {
    pub workspace_root: &'a Path,
    /// Parent directory under which `<session_id>/` (bundle + sandbox) is
    /// created.
    pub artifact_root: &'a Path,
    pub policy: &'a Policy,
    pub target: ProofTarget,
    pub proposer: &'a dyn Proposer,
    pub env_snapshot: &'a EnvSnapshot,
    pub provider: &'a str,
}

pub struct RunSessionOutput {
    pub session: Session,
    pub bundle_dir: PathBuf,
}

fn to_verify_result(r: &ExecResult) -> VerifyResult {
    VerifyResult {
        exit_code: r.exit_code,
        duration_ms: r.duration_ms,
        stdout_tail: r.stdout_tail(),
        stderr_tail: r.stderr_tail(),
        timed_out: r.timed_out,
    }
}

fn reason_str(kind: ErrorKind) -> String {
    serde_json::to_value(kind)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Gate every verification run against the policy's command allowlist
/// (spec §4.D) before it ever reaches `run_host`/`run_container`.
fn run_verify(
    sandbox: &Sandbox,
    policy: &Policy,
    target: &ProofTarget,
    env_snapshot: &EnvSnapshot,
) -> Result<ExecResult> {
    let decision = pp_policy::check_command(policy, &target.cmd, target.argv.as_deref());
    if !decision.allowed {
        return Err(PpError::CommandNotAllowed(target.cmd.clone()));
    }
    let timeout = Duration::from_secs(policy.limits.per_command_timeout_sec);
    match sandbox.backend {
        ResolvedBackend::Container => {
            run_container(&sandbox.root, &target.cmd, &policy.sandbox, policy.network, timeout)
        }
        ResolvedBackend::Copy | ResolvedBackend::GitWorktree => {
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
            run_host(req)
        }
    }
}

fn is_noop_text(text: &str) -> bool {
    text.trim().is_empty() || pp_patch::parse(text).map(|p| p.is_empty()).unwrap_or(false)
}

async fn obtain_diff(proposer: &dyn Proposer, sys: &str, user: &str) -> Result<String> {
    let first = proposer.propose(sys, user).await?;
    if !is_noop_text(&first) {
        return Ok(first);
    }
    warn!("proposer returned a no-op diff, requesting once more");
    let amended =
        format!("{user}\n\nYour previous response was a no-op diff. Provide a diff that actually changes a file.");
    proposer.propose(sys, &amended).await
}

/// Drive one session per spec §4.A's algorithm.
pub async fn run_session(input: RunSessionInput<'_>) -> Result<RunSessionOutput> {
    let session_id = Uuid::new_v4().to_string();
    let bundle_dir = input.artifact_root.join(&session_id);
    let sandbox_path = bundle_dir.join("sandbox");

    let git = provenance::capture(input.workspace_root);
    let started_at = chrono::Utc::now().to_rfc3339();

    let sandbox = pp_sandbox::materialize(input.workspace_root, &sandbox_path, input.policy.sandbox.backend)?;
    info!(session_id, backend = sandbox.backend.as_str(), "sandbox materialized");

    let baseline_exec = run_verify(&sandbox, input.policy, &input.target, input.env_snapshot)?;
    let mut last_verify = to_verify_result(&baseline_exec);
    let baseline_outcome = if last_verify.is_pass() { Outcome::Pass } else { Outcome::Fail };

    let mut attempts = vec![Attempt {
        index: 0,
        proposed_diff: None,
        applied_patch: None,
        verify: last_verify.clone(),
        outcome: baseline_outcome,
        reject_reason: None,
    }];

    let mut result = if last_verify.is_pass() { ResultKind::Pass } else { ResultKind::Fail };

    if !last_verify.is_pass() {
        let mut prior_diffs: Vec<String> = Vec::new();
        // The baseline (already pushed above) counts against max_attempts,
        // so max_attempts=1 performs zero repair attempts.
        'attempts: while (attempts.len() as u32) < input.policy.limits.max_attempts {
            let index = attempts.len() as u32;
            let (sys, user) = context::build_prompt(
                &input.target.cmd,
                &last_verify,
                &input.policy.write_allowlist,
                &prior_diffs,
            );

            let diff_text = match obtain_diff(input.proposer, &sys, &user).await {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "proposer error");
                    attempts.push(Attempt {
                        index,
                        proposed_diff: None,
                        applied_patch: None,
                        verify: last_verify.clone(),
                        outcome: Outcome::Error,
                        reject_reason: Some(reason_str(ErrorKind::ProposerError)),
                    });
                    continue 'attempts;
                }
            };

            if is_noop_text(&diff_text) {
                attempts.push(Attempt {
                    index,
                    proposed_diff: Some(diff_text),
                    applied_patch: None,
                    verify: last_verify.clone(),
                    outcome: Outcome::Rejected,
                    reject_reason: Some("proposer_noop".to_string()),
                });
                result = ResultKind::Fail;
                break 'attempts;
            }

            let parsed = pp_patch::parse(&diff_text);
            let apply_outcome = apply_proposed(&sandbox, input.policy, &diff_text, parsed.as_ref().ok());

            match apply_outcome {
                Err((kind, reason)) => {
                    attempts.push(Attempt {
                        index,
                        proposed_diff: Some(diff_text),
                        applied_patch: None,
                        verify: last_verify.clone(),
                        outcome: Outcome::Rejected,
                        reject_reason: Some(reason),
                    });
                    let _ = kind;
                    prior_diffs.push(attempts.last().unwrap().proposed_diff.clone().unwrap_or_default());
                    continue 'attempts;
                }
                Ok(()) => {
                    let exec = run_verify(&sandbox, input.policy, &input.target, input.env_snapshot)?;
                    let verify = to_verify_result(&exec);
                    let outcome = if verify.is_pass() { Outcome::Pass } else { Outcome::Fail };
                    attempts.push(Attempt {
                        index,
                        proposed_diff: Some(diff_text.clone()),
                        applied_patch: Some(diff_text.clone()),
                        verify: verify.clone(),
                        outcome,
                        reject_reason: None,
                    });
                    prior_diffs.push(diff_text);
                    last_verify = verify;
                    if outcome == Outcome::Pass {
                        result = ResultKind::Pass;
                        break 'attempts;
                    }
                    result = ResultKind::Fail;
                }
            }
        }
    }

    let mut final_patch = diff::diff_trees(input.workspace_root, &sandbox.root)?;

    if result == ResultKind::Pass && input.policy.minimize && !final_patch.trim().is_empty() {
        if let Ok(full_patch) = pp_patch::parse(&final_patch) {
            let minimized = minimize::minimize_patch(
                input.workspace_root,
                input.policy,
                &input.target,
                input.env_snapshot,
                &full_patch,
            );
            final_patch = pp_patch::serialize(&minimized);
        }
    }

    let session = Session {
        session_id: session_id.clone(),
        workspace_root: input.workspace_root.to_path_buf(),
        sandbox_path: sandbox.root.clone(),
        attempts,
        final_patch: Some(final_patch),
        result,
    };

    let ended_at = chrono::Utc::now().to_rfc3339();
    pp_bundle::write_bundle(
        &bundle_dir,
        input.workspace_root,
        input.policy,
        &session,
        &input.target,
        &git,
        input.provider,
        sandbox.backend.as_str(),
        None,
        &started_at,
        &ended_at,
    )?;

    if input.policy.attestation.enabled {
        let key = input.env_snapshot.attest_key.as_deref().map(str::as_bytes);
        pp_bundle::sign(&bundle_dir, input.policy.attestation.mode, key)?;
    }

    Ok(RunSessionOutput { session, bundle_dir })
}

/// Validate+apply one proposed diff per spec §4.D/§4.E's strategy order.
/// Returns `Err((kind, reason_string))` on rejection or apply failure; the
/// sandbox is left unchanged in that case (policy rejection never writes,
/// and `apply_in_process`/`apply_git_worktree` roll back on failure).
fn apply_proposed(
    sandbox: &Sandbox,
    policy: &Policy,
    diff_text: &str,
    parsed: Option<&Patch>,
) -> std::result::Result<(), (ErrorKind, String)> {
    if let Some(patch) = parsed {
        if !patch.is_empty() {
            let decision = pp_policy::check_patch(policy, patch, diff_text.len());
            if !decision.allowed {
                let kind = decision.reason.map(|r| r.as_error_kind()).unwrap_or(ErrorKind::PathNotAllowed);
                return Err((kind, reason_str(kind)));
            }
            let apply_result = if sandbox.backend == ResolvedBackend::GitWorktree {
                pp_patch::apply_git_worktree(&sandbox.root, diff_text).map(|_| ())
            } else {
                pp_patch::apply_in_process(&sandbox.root, patch, policy).map(|_| ())
            };
            return apply_result.map_err(|e| (e.kind(), reason_str(e.kind())));
        }
    }
    if let Some((path, content)) = pp_patch::parse_rewrite_block(diff_text) {
        return pp_patch::apply_rewrite_block(&sandbox.root, &path, &content, policy)
            .map(|_| ())
            .map_err(|e| (e.kind(), reason_str(e.kind())));
    }
    Err((
        ErrorKind::PatchParseError,
        reason_str(ErrorKind::PatchParseError),
    ))
}
