// # -----------------------------
// # crates/orchestrator/src/diff.rs
// # -----------------------------
//! Computes `final.patch` = diff(workspace_root, sandbox_path), restricted
//! to text files, using `similar`'s unified-diff renderer so the result
//! round-trips through `pp_patch::parse` (spec §4.A step 6).
use std::collections::BTreeSet;
use std::path::Path;

use pp_common::Result;
use similar::TextDiff;

fn collect_relative_paths(root: &Path, out: &mut BTreeSet<String>) -> Result<()> {
    for entry in walkdir::WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        if entry
            .path()
            .components()
            .any(|c| c.as_os_str() == std::ffi::OsStr::new(".git"))
        {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        out.insert(rel);
    }
    Ok(())
}

fn read_text(path: &Path) -> Option<String> {
    let bytes = std::fs::read(path).ok()?;
    if bytes.contains(&0) {
        return None; // binary, skip per spec "restricted to text files"
    }
    String::from_utf8(bytes).ok()
}

/// Unified diff from `old_root` to `new_root`, text files only.
pub fn diff_trees(old_root: &Path, new_root: &Path) -> Result<String> {
    let mut paths = BTreeSet::new();
    collect_relative_paths(old_root, &mut paths)?;
    collect_relative_paths(new_root, &mut paths)?;

    let mut out = String::new();
    for rel in paths {
        let old_path = old_root.join(&rel);
        let new_path = new_root.join(&rel);
        let old_text = read_text(&old_path).unwrap_or_default();
        let new_text = read_text(&new_path).unwrap_or_default();
        if old_text == new_text {
            continue;
        }
        let a_label = if old_path.exists() {
            format!("a/{rel}")
        } else {
            "/dev/null".to_string()
        };
        let b_label = if new_path.exists() {
            format!("b/{rel}")
        } else {
            "/dev/null".to_string()
        };
        let diff = TextDiff::from_lines(&old_text, &new_text);
        out.push_str(
            &diff
                .unified_diff()
                .context_radius(3)
                .header(&a_label, &b_label)
                .to_string(),
        );
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_a_parseable_unified_diff_for_a_single_edit() {
        let old = tempfile::tempdir().unwrap();
        let new = tempfile::tempdir().unwrap();
        std::fs::write(old.path().join("a.py"), "x = 1\n").unwrap();
        std::fs::write(new.path().join("a.py"), "x = 2\n").unwrap();

        let diff = diff_trees(old.path(), new.path()).unwrap();
        assert!(diff.contains("--- a/a.py"));
        assert!(diff.contains("+++ b/a.py"));
        let parsed = pp_patch::parse(&diff).unwrap();
        assert_eq!(parsed.files.len(), 1);
    }

    #[test]
    fn identical_trees_produce_an_empty_diff() {
        let old = tempfile::tempdir().unwrap();
        let new = tempfile::tempdir().unwrap();
        std::fs::write(old.path().join("a.py"), "x = 1\n").unwrap();
        std::fs::write(new.path().join("a.py"), "x = 1\n").unwrap();
        assert_eq!(diff_trees(old.path(), new.path()).unwrap(), "");
    }
}
