// # -----------------------------
// # crates/policy/src/lib.rs
// # -----------------------------
//! Policy evaluator (spec §4.D). Pure: no I/O, no subprocess, no filesystem.
//! Dependency-order leaf per spec §2: everything else depends on this, this
//! depends only on `pp-common`'s data types.
use globset::GlobBuilder;
use pp_common::{ErrorKind, Patch, Policy};

/// Stable reason enum returned alongside an allow/deny decision (spec §4.D).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    CommandNotAllowed,
    PathNotAllowed,
    TooManyFiles,
    PatchTooLarge,
}

impl RejectReason {
    pub fn as_error_kind(self) -> ErrorKind {
        match self {
            RejectReason::CommandNotAllowed => ErrorKind::CommandNotAllowed,
            RejectReason::PathNotAllowed => ErrorKind::PathNotAllowed,
            RejectReason::TooManyFiles => ErrorKind::TooManyFiles,
            RejectReason::PatchTooLarge => ErrorKind::PatchTooLarge,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub reason: Option<RejectReason>,
}

impl Decision {
    fn allow() -> Self {
        Decision {
            allowed: true,
            reason: None,
        }
    }

    fn deny(reason: RejectReason) -> Self {
        Decision {
            allowed: false,
            reason: Some(reason),
        }
    }
}

/// The target command string (or argv vector) must be a member of
/// `allowed_commands` (or `allowed_argv`) by exact match. No prefix, shell
/// expansion, or glob. Spec §3's Open Question resolves disagreement between
/// the two allowlists as a union: either grants permission.
pub fn check_command(policy: &Policy, cmd: &str, argv: Option<&[String]>) -> Decision {
    if policy.allowed_commands.contains(cmd) {
        return Decision::allow();
    }
    if let Some(argv) = argv {
        if policy.allowed_argv.contains(&argv.to_vec()) {
            return Decision::allow();
        }
    }
    Decision::deny(RejectReason::CommandNotAllowed)
}

/// True when `allowed_argv` contains an exact vector match for `argv` — used
/// by the command runner to choose unshelled execution (spec §4.C).
pub fn prefers_unshelled(policy: &Policy, argv: &[String]) -> bool {
    policy.allowed_argv.contains(&argv.to_vec())
}

/// Normalize a candidate write path relative to the sandbox root, rejecting
/// `..` traversal and absolute paths (spec §4.B / §4.D / §4.E).
pub fn normalize_write_path(p: &str) -> Option<String> {
    let path = std::path::Path::new(p);
    if path.is_absolute() {
        return None;
    }
    let mut normalized = Vec::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => return None,
            std::path::Component::CurDir => {}
            std::path::Component::Normal(seg) => normalized.push(seg.to_string_lossy().to_string()),
            _ => return None,
        }
    }
    Some(normalized.join("/"))
}

/// `p` is permitted iff it matches at least one `write_allowlist` glob AND
/// matches no `deny_write` glob (deny wins on overlap).
pub fn check_path(policy: &Policy, p: &str) -> Decision {
    let Some(normalized) = normalize_write_path(p) else {
        return Decision::deny(RejectReason::PathNotAllowed);
    };
    let denied = policy
        .deny_write
        .iter()
        .filter_map(|pat| GlobBuilder::new(pat).literal_separator(true).build().ok())
        .any(|g| g.compile_matcher().is_match(&normalized));
    if denied {
        return Decision::deny(RejectReason::PathNotAllowed);
    }
    let allowed = policy
        .write_allowlist
        .iter()
        .filter_map(|pat| GlobBuilder::new(pat).literal_separator(true).build().ok())
        .any(|g| g.compile_matcher().is_match(&normalized));
    if allowed {
        Decision::allow()
    } else {
        Decision::deny(RejectReason::PathNotAllowed)
    }
}

/// Reject a patch when it touches too many files, is too large, or touches a
/// path the policy forbids. This is the composite check applied before
/// attempting to apply a proposer-supplied patch (spec §4.D).
pub fn check_patch(policy: &Policy, patch: &Patch, serialized_bytes: usize) -> Decision {
    if let Some(max_files) = policy.limits.max_files_changed {
        if patch.files_changed() > max_files as usize {
            return Decision::deny(RejectReason::TooManyFiles);
        }
    }
    if let Some(max_bytes) = policy.limits.max_patch_bytes {
        if serialized_bytes as u64 > max_bytes {
            return Decision::deny(RejectReason::PatchTooLarge);
        }
    }
    for file in &patch.files {
        let decision = check_path(policy, file.path());
        if !decision.allowed {
            return decision;
        }
    }
    Decision::allow()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pp_common::{
        AttestationCfg, AttestationMode, ChangeMode, FileChange, Limits, Network, SandboxBackend,
        SandboxCfg,
    };
    use std::collections::BTreeSet;

    fn policy(write_allowlist: Vec<&str>, deny_write: Vec<&str>) -> Policy {
        Policy {
            network: Network::Deny,
            allowed_commands: BTreeSet::from(["pytest -q".to_string()]),
            allowed_argv: BTreeSet::new(),
            write_allowlist: write_allowlist.into_iter().map(String::from).collect(),
            deny_write: deny_write.into_iter().map(String::from).collect(),
            limits: Limits {
                max_attempts: 3,
                max_files_changed: Some(2),
                max_patch_bytes: Some(1000),
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
            proof_targets: vec![],
        }
    }

    #[test]
    fn command_must_match_exactly() {
        let p = policy(vec!["**"], vec![]);
        assert!(check_command(&p, "pytest -q", None).allowed);
        assert!(!check_command(&p, "pytest -q -v", None).allowed);
    }

    #[test]
    fn deny_wins_on_overlap() {
        let p = policy(vec!["**"], vec!["secrets/**"]);
        assert!(check_path(&p, "src/lib.rs").allowed);
        let d = check_path(&p, "secrets/key");
        assert!(!d.allowed);
        assert_eq!(d.reason, Some(RejectReason::PathNotAllowed));
    }

    #[test]
    fn empty_allowlist_rejects_everything() {
        let p = policy(vec![], vec![]);
        assert!(!check_path(&p, "src/lib.rs").allowed);
    }

    #[test]
    fn traversal_and_absolute_paths_rejected() {
        let p = policy(vec!["**"], vec![]);
        assert!(!check_path(&p, "../outside").allowed);
        assert!(!check_path(&p, "/etc/passwd").allowed);
    }

    #[test]
    fn too_many_files_rejected() {
        let p = policy(vec!["**"], vec![]);
        let patch = Patch {
            files: vec![
                FileChange {
                    old_path: Some("a".into()),
                    new_path: Some("a".into()),
                    mode: ChangeMode::Modify,
                    hunks: vec![],
                },
                FileChange {
                    old_path: Some("b".into()),
                    new_path: Some("b".into()),
                    mode: ChangeMode::Modify,
                    hunks: vec![],
                },
                FileChange {
                    old_path: Some("c".into()),
                    new_path: Some("c".into()),
                    mode: ChangeMode::Modify,
                    hunks: vec![],
                },
            ],
        };
        let d = check_patch(&p, &patch, 10);
        assert_eq!(d.reason, Some(RejectReason::TooManyFiles));
    }

    #[test]
    fn oversized_patch_rejected() {
        let p = policy(vec!["**"], vec![]);
        let patch = Patch { files: vec![] };
        let d = check_patch(&p, &patch, 2048);
        assert_eq!(d.reason, Some(RejectReason::PatchTooLarge));
    }
}
