// # -----------------------------
// # crates/sandbox/src/lib.rs
// # -----------------------------
//! Sandbox manager (spec §4.B). Materializes a writable copy of the
//! workspace that all verification and patch application happen inside.
//! Retained on disk after the session ends, since it *is* the replay
//! material (spec §4.B "Teardown").
use std::path::{Path, PathBuf};
use std::process::Command;

use pp_common::{PpError, Result, SandboxBackend};
use tracing::{debug, info, warn};

/// Which backend actually materialized the sandbox, after `auto` resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedBackend {
    Copy,
    GitWorktree,
    Container,
}

impl ResolvedBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            ResolvedBackend::Copy => "copy",
            ResolvedBackend::GitWorktree => "git_worktree",
            ResolvedBackend::Container => "container",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Sandbox {
    pub root: PathBuf,
    pub backend: ResolvedBackend,
}

fn is_git_available() -> bool {
    Command::new("git").arg("--version").output().is_ok()
}

fn in_repo(path: &Path) -> bool {
    Command::new("git")
        .current_dir(path)
        .args(["rev-parse", "--is-inside-work-tree"])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Worktree and index both clean, per the teacher's
/// `devit-tools::git::is_worktree_clean` idiom.
fn is_clean_git_repo(path: &Path) -> bool {
    if !is_git_available() || !in_repo(path) {
        return false;
    }
    let wt = Command::new("git")
        .current_dir(path)
        .args(["diff", "--quiet"])
        .status()
        .map(|s| s.success())
        .unwrap_or(false);
    let idx = Command::new("git")
        .current_dir(path)
        .args(["diff", "--cached", "--quiet"])
        .status()
        .map(|s| s.success())
        .unwrap_or(false);
    wt && idx
}

fn resolve_backend(workspace_root: &Path, requested: SandboxBackend) -> ResolvedBackend {
    match requested {
        SandboxBackend::Copy => ResolvedBackend::Copy,
        SandboxBackend::GitWorktree => ResolvedBackend::GitWorktree,
        SandboxBackend::Container => ResolvedBackend::Container,
        SandboxBackend::Auto => {
            if is_clean_git_repo(workspace_root) {
                ResolvedBackend::GitWorktree
            } else {
                ResolvedBackend::Copy
            }
        }
    }
}

/// Recursive copy of `src` into `dst`, excluding `exclude` (the artifact
/// directory itself, to avoid copying the bundle into the bundle) and any
/// `.git` directory (provenance is captured separately, see spec §4.A).
fn copy_tree(src: &Path, dst: &Path, exclude: &Path) -> Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in walkdir::WalkDir::new(src).into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.starts_with(exclude) {
            continue;
        }
        if path
            .components()
            .any(|c| c.as_os_str() == std::ffi::OsStr::new(".git"))
        {
            continue;
        }
        let rel = path.strip_prefix(src).unwrap_or(path);
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(path, &target)?;
        }
    }
    Ok(())
}

fn materialize_git_worktree(workspace_root: &Path, sandbox_path: &Path) -> Result<()> {
    if let Some(parent) = sandbox_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let out = Command::new("git")
        .current_dir(workspace_root)
        .args([
            "worktree",
            "add",
            "--detach",
            &sandbox_path.to_string_lossy(),
            "HEAD",
        ])
        .output()?;
    if !out.status.success() {
        return Err(PpError::Io(std::io::Error::other(format!(
            "git worktree add failed: {}",
            String::from_utf8_lossy(&out.stderr)
        ))));
    }
    Ok(())
}

/// Materialize a writable sandbox at `sandbox_path`, resolving `auto` to
/// `git_worktree` when `workspace_root` is a clean git repository, else
/// `copy`. `container` sandboxes are materialized via `copy` and mounted by
/// `pp-exec` at run time.
pub fn materialize(
    workspace_root: &Path,
    sandbox_path: &Path,
    requested: SandboxBackend,
) -> Result<Sandbox> {
    let resolved = resolve_backend(workspace_root, requested);
    info!(backend = resolved.as_str(), "materializing sandbox");
    match resolved {
        ResolvedBackend::GitWorktree => {
            materialize_git_worktree(workspace_root, sandbox_path)?;
        }
        ResolvedBackend::Copy | ResolvedBackend::Container => {
            copy_tree(workspace_root, sandbox_path, sandbox_path)?;
        }
    }
    debug!(path = %sandbox_path.display(), "sandbox ready");
    Ok(Sandbox {
        root: sandbox_path.to_path_buf(),
        backend: resolved,
    })
}

/// No-op: sandboxes are retained inside the artifact tree to support replay
/// (spec §4.B "Teardown").
pub fn teardown(sandbox: &Sandbox) {
    warn!(path = %sandbox.root.display(), "sandbox retained on disk for replay, not removed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_backend_excludes_dotgit_and_artifact_dir() {
        let src = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(src.path().join(".git")).unwrap();
        std::fs::write(src.path().join(".git/HEAD"), "ref: refs/heads/main\n").unwrap();
        std::fs::write(src.path().join("lib.rs"), "fn main() {}\n").unwrap();
        let dst = tempfile::tempdir().unwrap();
        let sandbox_path = dst.path().join("sandbox");

        let sandbox = materialize(src.path(), &sandbox_path, SandboxBackend::Copy).unwrap();
        assert_eq!(sandbox.backend, ResolvedBackend::Copy);
        assert!(sandbox_path.join("lib.rs").exists());
        assert!(!sandbox_path.join(".git").exists());
    }

    #[test]
    fn auto_falls_back_to_copy_outside_a_git_repo() {
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("a.txt"), "hi\n").unwrap();
        let dst = tempfile::tempdir().unwrap();
        let sandbox_path = dst.path().join("sandbox");
        let sandbox = materialize(src.path(), &sandbox_path, SandboxBackend::Auto).unwrap();
        assert_eq!(sandbox.backend, ResolvedBackend::Copy);
    }
}
