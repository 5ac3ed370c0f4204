// # -----------------------------
// # crates/orchestrator/src/context.rs
// # -----------------------------
//! Builds the proposer prompt from the current failure (spec §4.A step 4
//! "build a context bundle").
use pp_common::VerifyResult;

const SYSTEM_PROMPT: &str = "You are a code-repair assistant. Output ONLY a unified diff \
(--- a/<path> / +++ b/<path> with @@ hunks) or a single-file rewrite block (a `file: <path>` \
line followed by a fenced code block). Do not include any other prose.";

pub fn build_prompt(
    cmd: &str,
    verify: &VerifyResult,
    write_allowlist: &[String],
    prior_diffs: &[String],
) -> (String, String) {
    let mut user = String::new();
    user.push_str(&format!("The verification command `{cmd}` is failing.\n\n"));
    user.push_str(&format!(
        "exit_code={} timed_out={}\n\n",
        verify.exit_code, verify.timed_out
    ));
    user.push_str("stdout (tail):\n");
    user.push_str(&verify.stdout_tail);
    user.push_str("\n\nstderr (tail):\n");
    user.push_str(&verify.stderr_tail);
    user.push_str("\n\nYou may only write to paths matching these patterns:\n");
    for pattern in write_allowlist {
        user.push_str(&format!("- {pattern}\n"));
    }
    if !prior_diffs.is_empty() {
        user.push_str("\nPrevious attempts did not fix the failure:\n");
        for (i, d) in prior_diffs.iter().enumerate() {
            user.push_str(&format!("--- attempt {} ---\n{}\n", i + 1, d));
        }
    }
    (SYSTEM_PROMPT.to_string(), user)
}
