// # -----------------------------
// # crates/common/src/error.rs
// # -----------------------------
use thiserror::Error;

/// Stable reason tags surfaced in attempt records and CLI output.
///
/// These correspond 1:1 to the error-kind column in spec §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    CommandNotAllowed,
    PathNotAllowed,
    TooManyFiles,
    PatchTooLarge,
    PatchParseError,
    PatchApplyFailed,
    CommandTimeout,
    ProposerError,
    AttestationMismatch,
    InvalidConfig,
    Io,
    Canceled,
}

impl ErrorKind {
    /// Exit code per spec §6 / §7.
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorKind::CommandNotAllowed
            | ErrorKind::PathNotAllowed
            | ErrorKind::TooManyFiles
            | ErrorKind::PatchTooLarge
            | ErrorKind::InvalidConfig => 2,
            ErrorKind::AttestationMismatch => 3,
            ErrorKind::Io | ErrorKind::Canceled => 4,
            ErrorKind::PatchParseError
            | ErrorKind::PatchApplyFailed
            | ErrorKind::CommandTimeout
            | ErrorKind::ProposerError => 1,
        }
    }
}

#[derive(Debug, Error)]
pub enum PpError {
    #[error("command not allowed: {0}")]
    CommandNotAllowed(String),
    #[error("path not allowed: {0}")]
    PathNotAllowed(String),
    #[error("too many files changed: {changed} > {max}")]
    TooManyFiles { changed: usize, max: usize },
    #[error("patch too large: {bytes} > {max} bytes")]
    PatchTooLarge { bytes: usize, max: usize },
    #[error("patch parse error: {0}")]
    PatchParseError(String),
    #[error("patch apply failed: {0}")]
    PatchApplyFailed(String),
    #[error("command timed out after {0}s")]
    CommandTimeout(u64),
    #[error("proposer error: {0}")]
    ProposerError(String),
    #[error("attestation mismatch at {path}")]
    AttestationMismatch { path: String },
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("canceled")]
    Canceled,
}

impl PpError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PpError::CommandNotAllowed(_) => ErrorKind::CommandNotAllowed,
            PpError::PathNotAllowed(_) => ErrorKind::PathNotAllowed,
            PpError::TooManyFiles { .. } => ErrorKind::TooManyFiles,
            PpError::PatchTooLarge { .. } => ErrorKind::PatchTooLarge,
            PpError::PatchParseError(_) => ErrorKind::PatchParseError,
            PpError::PatchApplyFailed(_) => ErrorKind::PatchApplyFailed,
            PpError::CommandTimeout(_) => ErrorKind::CommandTimeout,
            PpError::ProposerError(_) => ErrorKind::ProposerError,
            PpError::AttestationMismatch { .. } => ErrorKind::AttestationMismatch,
            PpError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            PpError::Io(_) => ErrorKind::Io,
            PpError::Canceled => ErrorKind::Canceled,
        }
    }
}

pub type Result<T> = std::result::Result<T, PpError>;
