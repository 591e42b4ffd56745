//! A single pooled API key and its health

use common::Secret;
use serde::{Deserialize, Serialize};

/// Health of a key as last observed.
///
/// Transitions:
/// - Unchecked → Active (validation probe succeeded)
/// - Unchecked/Active → Errored (probe failed, or a request hit a credential-class error)
/// - Errored → Active (a later validation pass succeeded)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialStatus {
    Unchecked,
    Active,
    Errored,
}

impl CredentialStatus {
    /// Status label for listings/logging.
    pub fn label(&self) -> &'static str {
        match self {
            CredentialStatus::Unchecked => "unchecked",
            CredentialStatus::Active => "active",
            CredentialStatus::Errored => "errored",
        }
    }
}

/// One pool entry.
///
/// `id` is assigned at insertion and never changes. `error_count` only grows;
/// replacing the whole pool is the only way to start a key over at zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: String,
    pub secret: Secret<String>,
    pub status: CredentialStatus,
    /// Last validation as unix timestamp in milliseconds
    #[serde(default)]
    pub last_checked_at: Option<u64>,
    #[serde(default)]
    pub error_count: u32,
}

impl Credential {
    /// Fresh, unchecked entry with a new id.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            secret: Secret::new(secret.into()),
            status: CredentialStatus::Unchecked,
            last_checked_at: None,
            error_count: 0,
        }
    }
}

/// Split pasted key text into individual keys.
///
/// Newlines, commas and whitespace runs all separate keys; empty tokens are
/// dropped. Order is preserved.
pub fn parse_keys(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

/// Current time as unix milliseconds.
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
