// # -----------------------------
// # crates/orchestrator/src/provenance.rs
// # -----------------------------
//! Source provenance capture (spec §4.A step 1), grounded on
//! `devit-tools::git`'s head/worktree-clean helpers, extended with branch and
//! remote URL for `repro.json`.
use std::path::Path;
use std::process::Command;

use pp_bundle::GitProvenance;

fn git(root: &Path, args: &[&str]) -> Option<String> {
    let out = Command::new("git").current_dir(root).args(args).output().ok()?;
    if !out.status.success() {
        return None;
    }
    let s = String::from_utf8_lossy(&out.stdout).trim().to_string();
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn is_dirty(root: &Path) -> bool {
    let clean = Command::new("git")
        .current_dir(root)
        .args(["diff", "--quiet"])
        .status()
        .map(|s| s.success())
        .unwrap_or(true)
        && Command::new("git")
            .current_dir(root)
            .args(["diff", "--cached", "--quiet"])
            .status()
            .map(|s| s.success())
            .unwrap_or(true);
    !clean
}

pub fn capture(workspace_root: &Path) -> GitProvenance {
    let in_repo = Command::new("git")
        .current_dir(workspace_root)
        .args(["rev-parse", "--is-inside-work-tree"])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false);
    if !in_repo {
        return GitProvenance {
            commit: None,
            branch: None,
            remote_url: None,
            dirty: false,
            dirty_diff: None,
        };
    }
    let commit = git(workspace_root, &["rev-parse", "HEAD"]);
    let branch = git(workspace_root, &["rev-parse", "--abbrev-ref", "HEAD"]);
    let remote_url = git(workspace_root, &["remote", "get-url", "origin"]);
    let dirty = is_dirty(workspace_root);
    let dirty_diff = if dirty { git_diff(workspace_root) } else { None };
    GitProvenance {
        commit,
        branch,
        remote_url,
        dirty,
        dirty_diff,
    }
}

fn git_diff(root: &Path) -> Option<String> {
    let out = Command::new("git").current_dir(root).arg("diff").output().ok()?;
    if out.stdout.is_empty() {
        None
    } else {
        Some(String::from_utf8_lossy(&out.stdout).to_string())
    }
}
