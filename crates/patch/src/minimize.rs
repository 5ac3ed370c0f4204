// # -----------------------------
// # crates/patch/src/minimize.rs
// # -----------------------------
//! Hunk minimizer (spec §4.F). Enabled by `policy.minimize` after
//! verification passes. Removes hunks in reverse order, one at a time,
//! keeping each removal only if the caller's `still_passes` closure (which
//! re-applies the resulting patch to a clean sandbox and reruns
//! verification) still reports success. This crate only manipulates the
//! `Patch` structure; actual re-application and re-verification are the
//! orchestrator's job (spec §4.A step 5) so this stays free of process/I/O
//! concerns, matching the leaf-crate split in spec §2.
use pp_common::Patch;

/// Remove a patch's hunks one at a time, starting from the last file and the
/// last hunk within it, keeping a removal only when `still_passes` accepts
/// the resulting (smaller) patch. A file with no remaining hunks is dropped
/// entirely unless its mode is `Create`/`Delete` (those carry meaning even
/// with zero surviving hunks... in practice every create/delete keeps at
/// least the hunk describing its content, so this is mostly defensive).
pub fn minimize(patch: &Patch, mut still_passes: impl FnMut(&Patch) -> bool) -> Patch {
    let mut current = patch.clone();
    loop {
        let mut removed_any = false;
        'scan: for fi in (0..current.files.len()).rev() {
            for hi in (0..current.files[fi].hunks.len()).rev() {
                let mut candidate = current.clone();
                candidate.files[fi].hunks.remove(hi);
                candidate.files.retain(|f| !f.hunks.is_empty());
                if still_passes(&candidate) {
                    current = candidate;
                    removed_any = true;
                    break 'scan;
                }
            }
        }
        if !removed_any {
            break;
        }
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse;

    #[test]
    fn drops_hunks_that_are_not_needed_for_the_pass() {
        let text = "--- a/x.py\n+++ b/x.py\n@@ -1,1 +1,1 @@\n-a\n+a2\n@@ -5,1 +5,1 @@\n-b\n+b2\n";
        let patch = parse(text).unwrap();
        // Pretend only the first hunk is actually required.
        let minimized = minimize(&patch, |candidate| {
            candidate.files.iter().any(|f| f.hunks.len() >= 1)
                && candidate.files[0].hunks[0].old_start == 1
        });
        assert_eq!(minimized.files[0].hunks.len(), 1);
        assert_eq!(minimized.files[0].hunks[0].old_start, 1);
    }

    #[test]
    fn minimization_is_a_fixed_point() {
        let text = "--- a/x.py\n+++ b/x.py\n@@ -1,1 +1,1 @@\n-a\n+a2\n";
        let patch = parse(text).unwrap();
        let always_true = |_: &Patch| true;
        let once = minimize(&patch, always_true);
        let twice = minimize(&once, always_true);
        assert_eq!(once, twice);
    }
}
