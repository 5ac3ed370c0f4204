// # -----------------------------
// # crates/common/src/lib.rs
// # -----------------------------
//! Shared data model, canonical JSON, config loading, and error types for the
//! proving engine. Leaf crate: no dependency on any other `pp-*` crate.

pub mod bundle;
pub mod canonical;
pub mod config;
pub mod env;
pub mod error;
pub mod patch;
pub mod policy;
pub mod session;

pub use bundle::{Attestation, ManifestEntry, ReproJson, WorkspaceManifest};
pub use canonical::{canonical_json, sha256_hex};
pub use env::{is_secret_env_name, EnvSnapshot, LocalEnv, OpenAiEnv};
pub use error::{ErrorKind, PpError, Result};
pub use patch::{ChangeMode, FileChange, Hunk, Line, LineTag, Patch};
pub use policy::{AttestationCfg, AttestationMode, Limits, Network, Policy, ProofTarget, SandboxBackend, SandboxCfg};
pub use session::{Attempt, Outcome, ResultKind, Session, VerifyResult};
