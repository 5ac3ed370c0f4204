// # -----------------------------
// # crates/common/src/session.rs
// # -----------------------------
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    Pass,
    Fail,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Pass,
    Fail,
    Rejected,
    Error,
}

/// Result of running the proof target's command once (4.C).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResult {
    pub exit_code: i32,
    pub duration_ms: u128,
    pub stdout_tail: String,
    pub stderr_tail: String,
    pub timed_out: bool,
}

impl VerifyResult {
    pub fn is_pass(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }
}

/// One cycle of propose -> apply -> verify, indexed from 1. Index 0 is the
/// baseline (verify-only) attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    pub index: u32,
    #[serde(default)]
    pub proposed_diff: Option<String>,
    #[serde(default)]
    pub applied_patch: Option<String>,
    pub verify: VerifyResult,
    pub outcome: Outcome,
    #[serde(default)]
    pub reject_reason: Option<String>,
}

/// One invocation of `run`/`prove`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub workspace_root: std::path::PathBuf,
    pub sandbox_path: std::path::PathBuf,
    pub attempts: Vec<Attempt>,
    #[serde(default)]
    pub final_patch: Option<String>,
    pub result: ResultKind,
}

impl Session {
    pub fn attempts_used(&self) -> u32 {
        // The baseline verify counts against max_attempts: max_attempts=1
        // means the baseline runs and no repair attempt is made.
        self.attempts.len() as u32
    }
}
