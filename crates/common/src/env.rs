// # -----------------------------
// # crates/common/src/env.rs
// # -----------------------------
//! Environment variables are read once at session start into a frozen
//! `EnvSnapshot` and passed explicitly from then on (spec §9's "global state"
//! design note). Nothing below the CLI boundary calls `std::env::var` again.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiEnv {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalEnv {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub timeout_sec: Option<u64>,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvSnapshot {
    pub provider: String,
    pub openai: OpenAiEnv,
    pub local: LocalEnv,
    /// Value of `policy.attestation.key_env`, read once and never logged.
    pub attest_key: Option<String>,
}

/// Environment variable name prefixes that must never be forwarded to a
/// spawned verification command (spec §4.C / §5).
pub const SECRET_NAME_PATTERNS: &[&str] =
    &["PP_OPENAI_", "PP_LOCAL_API_KEY", "PP_ATTEST_"];

pub fn is_secret_env_name(name: &str) -> bool {
    SECRET_NAME_PATTERNS
        .iter()
        .any(|pat| name.starts_with(pat))
}

impl EnvSnapshot {
    /// Read once from process environment. `key_env` is the policy's
    /// `attestation.key_env` field, if attestation is configured.
    pub fn capture(key_env: Option<&str>) -> Self {
        let provider = std::env::var("PP_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let openai = OpenAiEnv {
            api_key: std::env::var("PP_OPENAI_API_KEY").ok(),
            base_url: std::env::var("PP_OPENAI_BASE_URL").ok(),
            model: std::env::var("PP_OPENAI_MODEL").ok(),
            max_tokens: std::env::var("PP_OPENAI_MAX_TOKENS")
                .ok()
                .and_then(|s| s.parse().ok()),
        };
        let local = LocalEnv {
            base_url: std::env::var("PP_LOCAL_BASE_URL").ok(),
            model: std::env::var("PP_LOCAL_MODEL").ok(),
            timeout_sec: std::env::var("PP_LOCAL_TIMEOUT_SEC")
                .ok()
                .and_then(|s| s.parse().ok()),
            api_key: std::env::var("PP_LOCAL_API_KEY").ok(),
        };
        let attest_key = key_env.and_then(|name| std::env::var(name).ok());
        Self {
            provider,
            openai,
            local,
            attest_key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_names_match_expected_prefixes() {
        assert!(is_secret_env_name("PP_OPENAI_API_KEY"));
        assert!(is_secret_env_name("PP_LOCAL_API_KEY"));
        assert!(is_secret_env_name("PP_ATTEST_SIGNING_KEY"));
        assert!(!is_secret_env_name("PP_LOCAL_BASE_URL"));
        assert!(!is_secret_env_name("PATH"));
    }
}
