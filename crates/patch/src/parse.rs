// # -----------------------------
// # crates/patch/src/parse.rs
// # -----------------------------
//! Unified-diff parser (spec §4.E). Accepts the conventional `--- a/<path>` /
//! `+++ b/<path>` headers and `@@ -l,s +l,s @@` hunk headers, plus
//! `/dev/null` (create/delete) and `rename from`/`rename to` lines.
use once_cell::sync::Lazy;
use pp_common::{ChangeMode, FileChange, Hunk, Line, LineTag, Patch, PpError, Result};
use regex::Regex;

static HUNK_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").expect("valid hunk header regex")
});

fn strip_prefix_path(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw == "/dev/null" {
        return None;
    }
    // Conventional a/ and b/ prefixes; tolerate their absence.
    let stripped = raw.strip_prefix("a/").or_else(|| raw.strip_prefix("b/")).unwrap_or(raw);
    Some(stripped.to_string())
}

/// Normalize line endings to LF before hashing/diffing; callers that need
/// the original bytes for storage should retain the raw patch text
/// separately (spec §4.E).
pub fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

pub fn parse(text: &str) -> Result<Patch> {
    let text = normalize_line_endings(text);
    let lines: Vec<&str> = text.lines().collect();
    let mut i = 0usize;
    let mut files = Vec::new();

    while i < lines.len() {
        let line = lines[i];
        if line.starts_with("diff --git ") {
            i += 1;
            continue;
        }
        let mut rename_from: Option<String> = None;
        let mut rename_to: Option<String> = None;
        while i < lines.len()
            && (lines[i].starts_with("rename from ")
                || lines[i].starts_with("rename to ")
                || lines[i].starts_with("index ")
                || lines[i].starts_with("old mode ")
                || lines[i].starts_with("new mode "))
        {
            if let Some(rest) = lines[i].strip_prefix("rename from ") {
                rename_from = Some(rest.trim().to_string());
            } else if let Some(rest) = lines[i].strip_prefix("rename to ") {
                rename_to = Some(rest.trim().to_string());
            }
            i += 1;
        }
        if i >= lines.len() || !lines[i].starts_with("--- ") {
            if rename_from.is_some() {
                return Err(PpError::PatchParseError(
                    "rename header without --- / +++ block".into(),
                ));
            }
            i += 1;
            continue;
        }
        let old_header = &lines[i][4..];
        i += 1;
        if i >= lines.len() || !lines[i].starts_with("+++ ") {
            return Err(PpError::PatchParseError(format!(
                "expected '+++' header after '--- {old_header}'"
            )));
        }
        let new_header = &lines[i][4..];
        i += 1;

        let old_path = strip_prefix_path(old_header);
        let new_path = strip_prefix_path(new_header);
        let mode = if old_path.is_none() {
            ChangeMode::Create
        } else if new_path.is_none() {
            ChangeMode::Delete
        } else if rename_from.is_some() || old_path != new_path {
            ChangeMode::Rename
        } else {
            ChangeMode::Modify
        };

        let mut hunks = Vec::new();
        while i < lines.len() {
            let Some(caps) = HUNK_HEADER.captures(lines[i]) else {
                break;
            };
            let old_start: u64 = caps[1].parse().unwrap_or(0);
            let old_len: u64 = caps.get(2).map(|m| m.as_str().parse().unwrap_or(1)).unwrap_or(1);
            let new_start: u64 = caps[3].parse().unwrap_or(0);
            let new_len: u64 = caps.get(4).map(|m| m.as_str().parse().unwrap_or(1)).unwrap_or(1);
            i += 1;
            let mut body = Vec::new();
            while i < lines.len() {
                let l = lines[i];
                if l.starts_with("@@ ")
                    || l.starts_with("--- ")
                    || l.starts_with("diff --git ")
                {
                    break;
                }
                let (tag, text) = if let Some(rest) = l.strip_prefix('+') {
                    (LineTag::Add, rest.to_string())
                } else if let Some(rest) = l.strip_prefix('-') {
                    (LineTag::Remove, rest.to_string())
                } else if let Some(rest) = l.strip_prefix(' ') {
                    (LineTag::Context, rest.to_string())
                } else if l.starts_with("\\ No newline at end of file") {
                    i += 1;
                    continue;
                } else if l.is_empty() {
                    (LineTag::Context, String::new())
                } else {
                    return Err(PpError::PatchParseError(format!(
                        "malformed hunk line: {l:?}"
                    )));
                };
                body.push(Line { tag, text });
                i += 1;
            }
            let hunk = Hunk {
                old_start,
                old_len,
                new_start,
                new_len,
                lines: body,
            };
            if !hunk.is_consistent() {
                return Err(PpError::PatchParseError(format!(
                    "hunk size mismatch at @@ -{old_start},{old_len} +{new_start},{new_len} @@"
                )));
            }
            hunks.push(hunk);
        }

        if has_overlapping_hunks(&hunks) {
            return Err(PpError::PatchParseError(format!(
                "overlapping hunks in file {}",
                new_path.as_deref().or(old_path.as_deref()).unwrap_or("?")
            )));
        }

        files.push(FileChange {
            old_path,
            new_path,
            mode,
            hunks,
        });
    }

    Ok(Patch { files })
}

fn has_overlapping_hunks(hunks: &[Hunk]) -> bool {
    let mut ranges: Vec<_> = hunks.iter().map(Hunk::old_range).collect();
    ranges.sort_by_key(|r| r.start);
    ranges.windows(2).any(|w| w[0].end > w[1].start)
}

/// Round-trip serialization back to unified-diff text (used by the
/// minimizer and for the idempotence property in spec §8).
pub fn serialize(patch: &Patch) -> String {
    let mut out = String::new();
    for fc in &patch.files {
        let old = fc
            .old_path
            .as_ref()
            .map(|p| format!("a/{p}"))
            .unwrap_or_else(|| "/dev/null".to_string());
        let new = fc
            .new_path
            .as_ref()
            .map(|p| format!("b/{p}"))
            .unwrap_or_else(|| "/dev/null".to_string());
        out.push_str(&format!("--- {old}\n"));
        out.push_str(&format!("+++ {new}\n"));
        for h in &fc.hunks {
            out.push_str(&format!(
                "@@ -{},{} +{},{} @@\n",
                h.old_start, h.old_len, h.new_start, h.new_len
            ));
            for l in &h.lines {
                let marker = match l.tag {
                    LineTag::Context => ' ',
                    LineTag::Add => '+',
                    LineTag::Remove => '-',
                };
                out.push(marker);
                out.push_str(&l.text);
                out.push('\n');
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "--- a/math_utils.py\n+++ b/math_utils.py\n@@ -1,3 +1,3 @@\n def add(a, b):\n-    return resultx\n+    return result\n";

    #[test]
    fn parses_a_simple_modify() {
        let patch = parse(SAMPLE).unwrap();
        assert_eq!(patch.files.len(), 1);
        let fc = &patch.files[0];
        assert_eq!(fc.mode, ChangeMode::Modify);
        assert_eq!(fc.hunks.len(), 1);
        assert!(fc.hunks[0].is_consistent());
    }

    #[test]
    fn rejects_hunk_size_mismatch() {
        let bad = "--- a/x\n+++ b/x\n@@ -1,1 +1,1 @@\n-a\n-b\n+c\n";
        assert!(parse(bad).is_err());
    }

    #[test]
    fn rejects_overlapping_hunks() {
        let bad = "--- a/x\n+++ b/x\n@@ -1,3 +1,3 @@\n a\n a\n a\n@@ -2,3 +2,3 @@\n a\n a\n a\n";
        assert!(parse(bad).is_err());
    }

    #[test]
    fn detects_create_and_delete() {
        let created = "--- /dev/null\n+++ b/new.txt\n@@ -0,0 +1,1 @@\n+hello\n";
        let p = parse(created).unwrap();
        assert_eq!(p.files[0].mode, ChangeMode::Create);

        let deleted = "--- a/old.txt\n+++ /dev/null\n@@ -1,1 +0,0 @@\n-hello\n";
        let p = parse(deleted).unwrap();
        assert_eq!(p.files[0].mode, ChangeMode::Delete);
    }

    #[test]
    fn detects_rename() {
        let renamed = "rename from old.txt\nrename to new.txt\n--- a/old.txt\n+++ b/new.txt\n@@ -1,1 +1,1 @@\n-hi\n+hi!\n";
        let p = parse(renamed).unwrap();
        assert_eq!(p.files[0].mode, ChangeMode::Rename);
    }

    #[test]
    fn parse_then_serialize_is_idempotent_modulo_line_endings() {
        let p1 = parse(SAMPLE).unwrap();
        let s1 = serialize(&p1);
        let p2 = parse(&s1).unwrap();
        let s2 = serialize(&p2);
        assert_eq!(s1, s2);
    }
}
