// # -----------------------------
// # crates/cli/tests/cli.rs
// # -----------------------------
use assert_cmd::Command;
use std::fs;

fn bin() -> Command {
    Command::cargo_bin("pp").unwrap()
}

#[test]
fn run_with_missing_policy_file_exits_4() {
    let dir = tempfile::tempdir().unwrap();
    bin()
        .current_dir(dir.path())
        .args(["run", "true", "--policy", "missing.json"])
        .assert()
        .code(4);
}

#[test]
fn attest_then_verify_attestation_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("policy.json"), sample_policy_json()).unwrap();
    fs::write(dir.path().join("final.patch"), "").unwrap();

    bin()
        .current_dir(dir.path())
        .env("PP_TEST_KEY", "a-32-byte-test-signing-key-value")
        .args(["attest", ".", "--mode", "hmac-sha256", "--key-env", "PP_TEST_KEY"])
        .assert()
        .code(0);
    assert!(dir.path().join("attestation.json").exists());

    bin()
        .current_dir(dir.path())
        .env("PP_TEST_KEY", "a-32-byte-test-signing-key-value")
        .args(["verify-attestation", "."])
        .assert()
        .code(0);
}

#[test]
fn verify_attestation_detects_tampering() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("policy.json"), sample_policy_json()).unwrap();
    fs::write(dir.path().join("final.patch"), "original").unwrap();

    bin()
        .current_dir(dir.path())
        .env("PP_TEST_KEY", "a-32-byte-test-signing-key-value")
        .args(["attest", ".", "--mode", "hmac-sha256", "--key-env", "PP_TEST_KEY"])
        .assert()
        .code(0);

    fs::write(dir.path().join("final.patch"), "tampered").unwrap();

    bin()
        .current_dir(dir.path())
        .env("PP_TEST_KEY", "a-32-byte-test-signing-key-value")
        .args(["verify-attestation", "."])
        .assert()
        .code(3);
}

fn sample_policy_json() -> &'static str {
    r#"{
      "network": "deny",
      "allowed_commands": ["true"],
      "allowed_argv": [],
      "write_allowlist": ["**"],
      "deny_write": [],
      "limits": {"max_attempts": 1, "per_command_timeout_sec": 5},
      "minimize": false,
      "sandbox": {"backend": "copy"},
      "attestation": {"enabled": true, "mode": "hmac-sha256", "key_env": "PP_TEST_KEY"},
      "proof_targets": [{"name": "smoke", "cmd": "true"}]
    }"#
}
