// # -----------------------------
// # crates/bundle/src/manifest.rs
// # -----------------------------
//! Workspace manifest computation (spec §3 `WorkspaceManifest`). Walks a
//! source tree, hashing every file except the artifact directory itself and
//! any `.git/`, grounded on `pp_sandbox`'s own copy-exclusion walk.
use std::path::Path;

use pp_common::{ManifestEntry, Result, WorkspaceManifest};

use crate::sha256_file;

/// `artifact_dir` is excluded (it's where the bundle itself lives, usually
/// nested under the workspace root).
pub fn compute(workspace_root: &Path, artifact_dir: &Path) -> Result<WorkspaceManifest> {
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(workspace_root)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if path.starts_with(artifact_dir) {
            continue;
        }
        if path
            .components()
            .any(|c| c.as_os_str() == std::ffi::OsStr::new(".git"))
        {
            continue;
        }
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = path
            .strip_prefix(workspace_root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        let sha256 = sha256_file(path)?;
        files.push(ManifestEntry {
            path: rel,
            sha256,
            size,
        });
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    let root_sha256 = WorkspaceManifest::compute_root_sha256(&files);
    Ok(WorkspaceManifest { files, root_sha256 })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excludes_artifact_dir_and_dotgit() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hi\n").unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/HEAD"), "x").unwrap();
        let artifact = dir.path().join(".proof");
        std::fs::create_dir_all(&artifact).unwrap();
        std::fs::write(artifact.join("repro.json"), "{}").unwrap();

        let manifest = compute(dir.path(), &artifact).unwrap();
        let paths: Vec<_> = manifest.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt"]);
    }
}
