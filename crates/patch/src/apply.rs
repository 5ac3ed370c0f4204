// # -----------------------------
// # crates/patch/src/apply.rs
// # -----------------------------
//! Patch application (spec §4.E). Strategy order: (1) `git apply --index` in
//! a git-worktree sandbox, (2) an in-process hunk applier, (3) a single-file
//! full-rewrite fallback. All write paths are re-validated against policy
//! immediately before write; a failed application leaves the sandbox
//! byte-for-byte unchanged (transactional apply via snapshot + revert),
//! grounded on the teacher's `devit-tools::git` apply/numstat/apply_index
//! trio and its `--3way` fallback idiom.
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use pp_common::{ChangeMode, Hunk, LineTag, Patch, Policy, PpError, Result};
use pp_policy::check_path;

pub struct ApplyOutcome {
    pub touched_paths: Vec<String>,
    pub strategy: &'static str,
}

struct Snapshot {
    path: PathBuf,
    original: Option<Vec<u8>>,
}

/// Apply every hunk of `fc` to `text`, verifying context+remove lines match
/// verbatim before replacing them with context+add lines.
fn apply_hunks_to_text(text: &str, hunks: &[Hunk]) -> Result<String> {
    let mut out_lines: Vec<String> = Vec::new();
    let src_lines: Vec<&str> = if text.is_empty() {
        Vec::new()
    } else {
        text.lines().collect()
    };
    let mut cursor = 0usize; // 0-indexed position in src_lines already emitted
    let mut sorted: Vec<&Hunk> = hunks.iter().collect();
    sorted.sort_by_key(|h| h.old_start);

    for hunk in sorted {
        let start = hunk.old_start.saturating_sub(1) as usize;
        if start < cursor {
            return Err(PpError::PatchApplyFailed("hunks out of order or overlap".into()));
        }
        // Emit untouched lines before this hunk verbatim.
        while cursor < start {
            out_lines.push(src_lines.get(cursor).copied().unwrap_or("").to_string());
            cursor += 1;
        }
        for line in &hunk.lines {
            match line.tag {
                LineTag::Context | LineTag::Remove => {
                    let actual = src_lines.get(cursor).copied().unwrap_or("");
                    if actual != line.text {
                        return Err(PpError::PatchApplyFailed(format!(
                            "context mismatch at line {}: expected {:?}, found {:?}",
                            cursor + 1,
                            line.text,
                            actual
                        )));
                    }
                    cursor += 1;
                    if matches!(line.tag, LineTag::Context) {
                        out_lines.push(line.text.clone());
                    }
                }
                LineTag::Add => out_lines.push(line.text.clone()),
            }
        }
    }
    while cursor < src_lines.len() {
        out_lines.push(src_lines[cursor].to_string());
        cursor += 1;
    }
    Ok(out_lines.join("\n") + if out_lines.is_empty() { "" } else { "\n" })
}

fn render_new_file(hunks: &[Hunk]) -> String {
    let mut out = String::new();
    for hunk in hunks {
        for line in &hunk.lines {
            if matches!(line.tag, LineTag::Add) {
                out.push_str(&line.text);
                out.push('\n');
            }
        }
    }
    out
}

fn validate_paths(root: &Path, patch: &Patch, policy: &Policy) -> Result<()> {
    for fc in &patch.files {
        let decision = check_path(policy, fc.path());
        if !decision.allowed {
            return Err(PpError::PathNotAllowed(fc.path().to_string()));
        }
        let _ = root; // root is only used for writes, not for the decision itself
    }
    Ok(())
}

/// Strategy 2: in-process, three-way-unaware applier with full transactional
/// rollback on any per-file failure.
pub fn apply_in_process(root: &Path, patch: &Patch, policy: &Policy) -> Result<ApplyOutcome> {
    validate_paths(root, patch, policy)?;

    let mut snapshots: Vec<Snapshot> = Vec::new();
    let mut touched = Vec::new();

    let outcome: Result<()> = (|| {
        for fc in &patch.files {
            match fc.mode {
                ChangeMode::Delete => {
                    let abs = root.join(fc.old_path.as_deref().unwrap_or(fc.path()));
                    snapshot_once(&mut snapshots, &abs)?;
                    std::fs::remove_file(&abs)?;
                }
                ChangeMode::Create => {
                    let abs = root.join(fc.path());
                    snapshot_once(&mut snapshots, &abs)?;
                    if let Some(parent) = abs.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&abs, render_new_file(&fc.hunks))?;
                }
                ChangeMode::Modify | ChangeMode::Rename => {
                    let old_abs = root.join(fc.old_path.as_deref().unwrap_or(fc.path()));
                    let new_abs = root.join(fc.path());
                    snapshot_once(&mut snapshots, &old_abs)?;
                    if old_abs != new_abs {
                        snapshot_once(&mut snapshots, &new_abs)?;
                    }
                    let original = std::fs::read_to_string(&old_abs)
                        .map_err(|e| PpError::PatchApplyFailed(format!("{}: {e}", old_abs.display())))?;
                    let patched = apply_hunks_to_text(&original, &fc.hunks)?;
                    if matches!(fc.mode, ChangeMode::Rename) && old_abs != new_abs {
                        std::fs::remove_file(&old_abs)?;
                    }
                    if let Some(parent) = new_abs.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&new_abs, patched)?;
                }
            }
            touched.push(fc.path().to_string());
        }
        Ok(())
    })();

    match outcome {
        Ok(()) => Ok(ApplyOutcome {
            touched_paths: touched,
            strategy: "in_process",
        }),
        Err(e) => {
            revert(&snapshots);
            Err(e)
        }
    }
}

fn snapshot_once(snapshots: &mut Vec<Snapshot>, path: &Path) -> Result<()> {
    if snapshots.iter().any(|s| s.path == path) {
        return Ok(());
    }
    let original = if path.exists() {
        Some(std::fs::read(path)?)
    } else {
        None
    };
    snapshots.push(Snapshot {
        path: path.to_path_buf(),
        original,
    });
    Ok(())
}

fn revert(snapshots: &[Snapshot]) {
    for snap in snapshots.iter().rev() {
        match &snap.original {
            Some(bytes) => {
                let _ = std::fs::write(&snap.path, bytes);
            }
            None => {
                let _ = std::fs::remove_file(&snap.path);
            }
        }
    }
}

/// Strategy 1: `git apply --index --whitespace=nowarn`, with a `--3way`
/// fallback, against a temp patch file. Only meaningful in a git-worktree
/// sandbox.
pub fn apply_git_worktree(root: &Path, raw_patch: &str) -> Result<ApplyOutcome> {
    let (ok, out) = run_git_apply(root, &["apply", "--index", "--whitespace=nowarn"], raw_patch)?;
    if ok {
        return Ok(ApplyOutcome {
            touched_paths: extract_touched_paths(raw_patch),
            strategy: "git_worktree",
        });
    }
    let (ok2, out2) = run_git_apply(root, &["apply", "--3way", "--index"], raw_patch)?;
    if ok2 {
        return Ok(ApplyOutcome {
            touched_paths: extract_touched_paths(raw_patch),
            strategy: "git_worktree_3way",
        });
    }
    Err(PpError::PatchApplyFailed(format!(
        "git apply --index failed:\n{out}\n--- 3-way fallback ---\n{out2}"
    )))
}

fn run_git_apply(root: &Path, args: &[&str], patch: &str) -> Result<(bool, String)> {
    let mut child = Command::new("git")
        .current_dir(root)
        .args(args)
        .arg("-")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    if let Some(stdin) = child.stdin.as_mut() {
        stdin.write_all(patch.as_bytes())?;
    }
    let out = child.wait_with_output()?;
    let ok = out.status.success();
    let stdout = String::from_utf8_lossy(&out.stdout).to_string();
    let stderr = String::from_utf8_lossy(&out.stderr).to_string();
    Ok((ok, format!("{stdout}{stderr}")))
}

fn extract_touched_paths(raw_patch: &str) -> Vec<String> {
    let patch = super::parse::parse(raw_patch).unwrap_or_default();
    patch.files.iter().map(|f| f.path().to_string()).collect()
}

/// Strategy 3: single-file full-rewrite fallback. Detected by a `file:
/// <path>` directive followed by a fenced code block, per the framing this
/// implementation fixes for spec §4.E / §9's open question. Overwrites the
/// file atomically (write temp + rename) only if the path passes policy.
pub fn apply_rewrite_block(root: &Path, path: &str, content: &str, policy: &Policy) -> Result<ApplyOutcome> {
    let decision = check_path(policy, path);
    if !decision.allowed {
        return Err(PpError::PathNotAllowed(path.to_string()));
    }
    let abs = root.join(path);
    if let Some(parent) = abs.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = abs.with_extension("pp-tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, &abs)?;
    Ok(ApplyOutcome {
        touched_paths: vec![path.to_string()],
        strategy: "rewrite_block",
    })
}

/// Parses a proposer response shaped as:
/// ```text
/// file: src/math_utils.py
/// ```lang
/// <full file content>
/// ```
/// ```
/// Returns `None` when the text doesn't match this framing.
pub fn parse_rewrite_block(text: &str) -> Option<(String, String)> {
    let mut lines = text.lines();
    let first = lines.find(|l| !l.trim().is_empty())?;
    let path = first.trim().strip_prefix("file:")?.trim().to_string();
    let rest: Vec<&str> = lines.collect();
    let fence_start = rest.iter().position(|l| l.trim_start().starts_with("```"))?;
    let fence_end = rest[fence_start + 1..]
        .iter()
        .position(|l| l.trim_start().starts_with("```"))?
        + fence_start
        + 1;
    let content = rest[fence_start + 1..fence_end].join("\n") + "\n";
    Some((path, content))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pp_common::{AttestationCfg, AttestationMode, Limits, Network, SandboxBackend, SandboxCfg};
    use std::collections::BTreeSet;

    fn permissive_policy() -> Policy {
        Policy {
            network: Network::Deny,
            allowed_commands: BTreeSet::new(),
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
            proof_targets: vec![],
        }
    }

    #[test]
    fn applies_a_simple_modify_and_rejects_mismatched_context() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("math_utils.py");
        std::fs::write(&file, "def add(a, b):\n    return resultx\n").unwrap();

        let patch_text = "--- a/math_utils.py\n+++ b/math_utils.py\n@@ -1,2 +1,2 @@\n def add(a, b):\n-    return resultx\n+    return result\n";
        let patch = crate::parse::parse(patch_text).unwrap();
        let policy = permissive_policy();
        let outcome = apply_in_process(dir.path(), &patch, &policy).unwrap();
        assert_eq!(outcome.touched_paths, vec!["math_utils.py".to_string()]);
        let got = std::fs::read_to_string(&file).unwrap();
        assert_eq!(got, "def add(a, b):\n    return result\n");
    }

    #[test]
    fn failed_apply_leaves_file_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("x.py");
        std::fs::write(&file, "original\n").unwrap();
        let patch_text = "--- a/x.py\n+++ b/x.py\n@@ -1,1 +1,1 @@\n-does not match\n+changed\n";
        let patch = crate::parse::parse(patch_text).unwrap();
        let policy = permissive_policy();
        assert!(apply_in_process(dir.path(), &patch, &policy).is_err());
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "original\n");
    }

    #[test]
    fn rejects_write_outside_policy() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("secret.py"), "x = 1\n").unwrap();
        let mut policy = permissive_policy();
        policy.deny_write = vec!["secret.py".into()];
        let patch_text = "--- a/secret.py\n+++ b/secret.py\n@@ -1,1 +1,1 @@\n-x = 1\n+x = 2\n";
        let patch = crate::parse::parse(patch_text).unwrap();
        assert!(apply_in_process(dir.path(), &patch, &policy).is_err());
    }

    #[test]
    fn parses_rewrite_block_framing() {
        let text = "file: src/a.py\n```python\nprint('hi')\n```\n";
        let (path, content) = parse_rewrite_block(text).unwrap();
        assert_eq!(path, "src/a.py");
        assert_eq!(content, "print('hi')\n");
    }
}
