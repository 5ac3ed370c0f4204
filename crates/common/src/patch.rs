// # -----------------------------
// # crates/common/src/patch.rs
// # -----------------------------
//! Parsed unified-diff data model. Parsing/serialization lives in `pp-patch`;
//! this crate only owns the shapes so `pp-policy` and `pp-bundle` can depend
//! on them without depending on the parser.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeMode {
    Modify,
    Create,
    Delete,
    Rename,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineTag {
    Context,
    Add,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Line {
    pub tag: LineTag,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hunk {
    pub old_start: u64,
    pub old_len: u64,
    pub new_start: u64,
    pub new_len: u64,
    pub lines: Vec<Line>,
}

impl Hunk {
    /// Invariant from spec §3: context+remove == old_len, context+add == new_len.
    pub fn is_consistent(&self) -> bool {
        let old = self
            .lines
            .iter()
            .filter(|l| matches!(l.tag, LineTag::Context | LineTag::Remove))
            .count() as u64;
        let new = self
            .lines
            .iter()
            .filter(|l| matches!(l.tag, LineTag::Context | LineTag::Add))
            .count() as u64;
        old == self.old_len && new == self.new_len
    }

    pub fn old_range(&self) -> std::ops::Range<u64> {
        self.old_start..self.old_start + self.old_len
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub old_path: Option<String>,
    pub new_path: Option<String>,
    pub mode: ChangeMode,
    pub hunks: Vec<Hunk>,
}

impl FileChange {
    pub fn path(&self) -> &str {
        self.new_path
            .as_deref()
            .or(self.old_path.as_deref())
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    pub files: Vec<FileChange>,
}

impl Patch {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn files_changed(&self) -> usize {
        self.files.len()
    }
}
