// # -----------------------------
// # crates/common/src/policy.rs
// # -----------------------------
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::canonical::{canonical_json, sha256_hex};
use crate::error::{PpError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Network {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxBackend {
    Auto,
    Copy,
    GitWorktree,
    Container,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttestationMode {
    None,
    HmacSha256,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Limits {
    pub max_attempts: u32,
    #[serde(default)]
    pub max_files_changed: Option<u32>,
    #[serde(default)]
    pub max_patch_bytes: Option<u64>,
    pub per_command_timeout_sec: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SandboxCfg {
    pub backend: SandboxBackend,
    #[serde(default)]
    pub container_runtime: Option<String>,
    #[serde(default)]
    pub container_image: Option<String>,
    #[serde(default)]
    pub container_workdir: Option<String>,
    #[serde(default)]
    pub cpu_limit: Option<String>,
    #[serde(default)]
    pub memory_limit: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttestationCfg {
    pub enabled: bool,
    pub mode: AttestationMode,
    #[serde(default)]
    pub key_env: Option<String>,
}

/// Immutable, hashed record of allowed commands, paths, limits, sandbox, and
/// attestation choices for a session. See spec §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Policy {
    pub network: Network,
    #[serde(default)]
    pub allowed_commands: BTreeSet<String>,
    #[serde(default)]
    pub allowed_argv: BTreeSet<Vec<String>>,
    #[serde(default)]
    pub write_allowlist: Vec<String>,
    #[serde(default)]
    pub deny_write: Vec<String>,
    pub limits: Limits,
    #[serde(default)]
    pub minimize: bool,
    pub sandbox: SandboxCfg,
    pub attestation: AttestationCfg,
    /// Named targets `prove` iterates over; each `cmd` (or `argv`) must also
    /// appear in `allowed_commands`/`allowed_argv`.
    #[serde(default)]
    pub proof_targets: Vec<ProofTarget>,
}

impl Policy {
    /// sha256 of the canonical serialization; recorded as `repro.json.policy_hash`.
    pub fn policy_hash(&self) -> Result<String> {
        let json = canonical_json(self).map_err(|e| PpError::InvalidConfig(e.to_string()))?;
        Ok(sha256_hex(json.as_bytes()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.limits.max_attempts < 1 {
            return Err(PpError::InvalidConfig(
                "limits.max_attempts must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

/// `{name, cmd}` pair; `cmd` must appear in `allowed_commands` (or its argv
/// in `allowed_argv`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProofTarget {
    pub name: String,
    pub cmd: String,
    #[serde(default)]
    pub argv: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Policy {
        Policy {
            network: Network::Deny,
            allowed_commands: BTreeSet::from(["pytest -q".to_string()]),
            allowed_argv: BTreeSet::new(),
            write_allowlist: vec!["src/**".into()],
            deny_write: vec!["secrets/**".into()],
            limits: Limits {
                max_attempts: 3,
                max_files_changed: Some(5),
                max_patch_bytes: Some(10_000),
                per_command_timeout_sec: 60,
            },
            minimize: true,
            sandbox: SandboxCfg {
                backend: SandboxBackend::Auto,
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
            proof_targets: vec![ProofTarget {
                name: "unit".into(),
                cmd: "pytest -q".into(),
                argv: None,
            }],
        }
    }

    #[test]
    fn policy_hash_is_deterministic() {
        let p = sample();
        assert_eq!(p.policy_hash().unwrap(), p.policy_hash().unwrap());
    }

    #[test]
    fn max_attempts_zero_rejected() {
        let mut p = sample();
        p.limits.max_attempts = 0;
        assert!(p.validate().is_err());
    }
}
