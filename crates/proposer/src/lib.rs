// # -----------------------------
// # crates/proposer/src/lib.rs
// # -----------------------------
//! Proposer client (spec §6 "Proposer protocol"), grounded on the teacher's
//! `devit-backend-openai::OpenAiLike`. Talks to an OpenAI-compatible
//! `/chat/completions` endpoint and returns the fence-stripped text of the
//! model's reply, which the orchestrator then tries to parse as a unified
//! diff or a single-file rewrite block.
use std::time::Duration;

use async_trait::async_trait;
use pp_common::{EnvSnapshot, PpError, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const RETRY_SUFFIX: &str = "\n\nYour previous response was empty. Respond with ONLY a unified diff (--- a/... / +++ b/... with @@ hunks) or a single-file rewrite block (a `file: <path>` line followed by a fenced code block). Do not include any other prose.";

#[async_trait]
pub trait Proposer: Send + Sync {
    /// Ask the model for a patch. Retries once, per spec §6, if the first
    /// response is empty or whitespace-only.
    async fn propose(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;
}

pub struct OpenAiCompatProposer {
    base_url: String,
    model: String,
    api_key: Option<String>,
    max_tokens: Option<u32>,
    http: Client,
}

impl OpenAiCompatProposer {
    /// Build a client from the frozen `EnvSnapshot`, selecting the `openai`
    /// or `local` provider config per `PP_PROVIDER` (spec §6).
    pub fn from_env(snapshot: &EnvSnapshot) -> Result<Self> {
        match snapshot.provider.as_str() {
            "local" => Ok(Self {
                base_url: snapshot
                    .local
                    .base_url
                    .clone()
                    .unwrap_or_else(|| "http://localhost:11434/v1".to_string()),
                model: snapshot
                    .local
                    .model
                    .clone()
                    .unwrap_or_else(|| "local-model".to_string()),
                api_key: snapshot.local.api_key.clone(),
                max_tokens: None,
                http: build_client(snapshot.local.timeout_sec)?,
            }),
            _ => Ok(Self {
                base_url: snapshot
                    .openai
                    .base_url
                    .clone()
                    .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
                model: snapshot
                    .openai
                    .model
                    .clone()
                    .unwrap_or_else(|| "gpt-4o-mini".to_string()),
                api_key: snapshot.openai.api_key.clone(),
                max_tokens: snapshot.openai.max_tokens,
                http: build_client(None)?,
            }),
        }
    }

    async fn chat_once(&self, sys: &str, user: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let req = ChatReq {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: sys,
                },
                Msg {
                    role: "user",
                    content: user,
                },
            ],
            max_tokens: self.max_tokens,
            stream: false,
        };

        let mut rb = self.http.post(&url).json(&req);
        if let Some(key) = &self.api_key {
            rb = rb.bearer_auth(key);
        }

        let resp = rb
            .send()
            .await
            .map_err(|e| PpError::ProposerError(e.to_string()))?
            .error_for_status()
            .map_err(|e| PpError::ProposerError(e.to_string()))?;
        let body: ChatResp = resp
            .json()
            .await
            .map_err(|e| PpError::ProposerError(e.to_string()))?;
        let raw = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();
        Ok(strip_fence(&raw))
    }
}

#[async_trait]
impl Proposer for OpenAiCompatProposer {
    async fn propose(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let first = self.chat_once(system_prompt, user_prompt).await?;
        if !first.trim().is_empty() {
            return Ok(first);
        }
        warn!("proposer returned an empty response, retrying once with an amended prompt");
        let amended = format!("{user_prompt}{RETRY_SUFFIX}");
        let second = self.chat_once(system_prompt, &amended).await?;
        if second.trim().is_empty() {
            debug!("proposer retry also returned empty");
        }
        Ok(second)
    }
}

fn build_client(timeout_sec: Option<u64>) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_sec.unwrap_or(60)))
        .build()
        .map_err(|e| PpError::ProposerError(e.to_string()))
}

/// Strip a leading/trailing triple-backtick fence (with an optional
/// language tag) around the model's response, per spec §6.
fn strip_fence(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.trim_start_matches(|c: char| c.is_alphanumeric());
        let rest = rest.strip_prefix('\n').unwrap_or(rest);
        if let Some(body) = rest.strip_suffix("```") {
            return body.trim_end_matches('\n').to_string();
        }
        return rest.to_string();
    }
    trimmed.to_string()
}

#[derive(Serialize)]
struct ChatReq<'a> {
    model: &'a str,
    messages: Vec<Msg<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResp {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMsg,
}

#[derive(Deserialize)]
struct ChoiceMsg {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fenced_diff_with_language_tag() {
        let raw = "```diff\n--- a/x.py\n+++ b/x.py\n```";
        assert_eq!(strip_fence(raw), "--- a/x.py\n+++ b/x.py");
    }

    #[test]
    fn leaves_unfenced_text_unchanged() {
        let raw = "--- a/x.py\n+++ b/x.py\n";
        assert_eq!(strip_fence(raw), "--- a/x.py\n+++ b/x.py");
    }

    #[test]
    fn local_provider_picks_local_defaults() {
        let snapshot = EnvSnapshot {
            provider: "local".to_string(),
            openai: pp_common::OpenAiEnv {
                api_key: None,
                base_url: None,
                model: None,
                max_tokens: None,
            },
            local: pp_common::LocalEnv {
                base_url: Some("http://127.0.0.1:8080/v1".to_string()),
                model: Some("qwen".to_string()),
                timeout_sec: Some(5),
                api_key: None,
            },
            attest_key: None,
        };
        let proposer = OpenAiCompatProposer::from_env(&snapshot).unwrap();
        assert_eq!(proposer.base_url, "http://127.0.0.1:8080/v1");
        assert_eq!(proposer.model, "qwen");
    }
}
