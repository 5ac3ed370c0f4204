// # -----------------------------
// # crates/common/src/config.rs
// # -----------------------------
//! Policy file loading. Spec §6 allows JSON or YAML; we additionally accept
//! TOML for parity with the teacher's `devit.toml` convention. Format is
//! sniffed from the file extension, defaulting to TOML when absent.
use std::path::Path;

use crate::error::{PpError, Result};
use crate::policy::Policy;

pub fn load_policy(path: &Path) -> Result<Policy> {
    let text = std::fs::read_to_string(path)?;
    let policy = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&text)
            .map_err(|e| PpError::InvalidConfig(format!("{}: {e}", path.display())))?,
        Some("yaml") | Some("yml") => serde_yaml::from_str(&text)
            .map_err(|e| PpError::InvalidConfig(format!("{}: {e}", path.display())))?,
        _ => toml::from_str(&text)
            .map_err(|e| PpError::InvalidConfig(format!("{}: {e}", path.display())))?,
    };
    let policy: Policy = policy;
    policy.validate()?;
    Ok(policy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_max_attempts_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.json");
        std::fs::write(
            &path,
            r#"{
              "network": "deny",
              "allowed_commands": ["pytest -q"],
              "allowed_argv": [],
              "write_allowlist": ["src/**"],
              "deny_write": [],
              "limits": {"max_attempts": 0, "per_command_timeout_sec": 30},
              "minimize": false,
              "sandbox": {"backend": "copy"},
              "attestation": {"enabled": false, "mode": "none"}
            }"#,
        )
        .unwrap();
        assert!(load_policy(&path).is_err());
    }

    #[test]
    fn loads_a_well_formed_json_policy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.json");
        std::fs::write(
            &path,
            r#"{
              "network": "deny",
              "allowed_commands": ["pytest -q"],
              "allowed_argv": [],
              "write_allowlist": ["src/**"],
              "deny_write": [],
              "limits": {"max_attempts": 3, "per_command_timeout_sec": 30},
              "minimize": true,
              "sandbox": {"backend": "auto"},
              "attestation": {"enabled": false, "mode": "none"}
            }"#,
        )
        .unwrap();
        let p = load_policy(&path).unwrap();
        assert_eq!(p.limits.max_attempts, 3);
    }
}
