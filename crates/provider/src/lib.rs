//! Provider abstraction for the upstream generation service
//!
//! Defines the `Provider` trait that decouples the key pool and the resilient
//! client from the concrete transport. `GeminiProvider` speaks the
//! `generateContent` REST API; tests substitute scripted providers.
//!
//! Payloads are opaque: the request carries the model id, the content
//! structure and generation config exactly as the caller built them, and
//! the response hands back text plus whatever candidates/inline data the
//! service returned.

pub mod gemini;

pub use gemini::GeminiProvider;

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Why a credential-class failure was attributed to the key itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialFault {
    /// "API key not valid"
    InvalidKey,
    /// "permission denied", or a bare 401/403
    PermissionDenied,
    /// "quota", or a bare 429
    QuotaExceeded,
    /// "invalid argument" (the service reports malformed keys this way)
    InvalidArgument,
}

/// Classification of upstream errors to decide between rotation and failure.
///
/// - Credential errors mark the key invalid and rotate to the next one
/// - Upstream errors are terminal and surfaced verbatim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Credential(CredentialFault),
    Upstream,
}

impl ErrorClass {
    pub fn is_credential(&self) -> bool {
        matches!(self, ErrorClass::Credential(_))
    }

    /// Label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorClass::Credential(CredentialFault::InvalidKey) => "invalid_key",
            ErrorClass::Credential(CredentialFault::PermissionDenied) => "permission_denied",
            ErrorClass::Credential(CredentialFault::QuotaExceeded) => "quota_exceeded",
            ErrorClass::Credential(CredentialFault::InvalidArgument) => "invalid_argument",
            ErrorClass::Upstream => "upstream",
        }
    }
}

/// One generation request, passed through to the service untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// Model identifier, e.g. "gemini-2.0-flash"
    pub model: String,
    /// Content structure in the service's own shape
    pub contents: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<serde_json::Value>,
}

impl GenerateRequest {
    /// Single-turn text prompt with no generation config.
    pub fn text(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            contents: serde_json::json!([{ "role": "user", "parts": [{ "text": prompt.into() }] }]),
            generation_config: None,
        }
    }

    pub fn with_generation_config(mut self, config: serde_json::Value) -> Self {
        self.generation_config = Some(config);
        self
    }
}

/// Binary part returned inline (images), kept base64-encoded as received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

/// Response from a successful generation call.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GenerateResponse {
    /// Concatenated text parts of the first candidate
    pub text: String,
    /// Raw candidates array for callers that need more than text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidates: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inline_data: Vec<InlineData>,
}

/// Failure from the remote call.
///
/// `message` is human-readable and shown to users as-is. `status` is the HTTP
/// status when the transport got that far; connection failures have none.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ProviderError {
    pub message: String,
    pub status: Option<u16>,
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: Some(status),
        }
    }
}

/// Result alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Abstraction over the remote generation service.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn Provider>`).
pub trait Provider: Send + Sync {
    /// Identifier for logging (e.g. "gemini")
    fn id(&self) -> &str;

    /// Issue one generation call authenticated with `secret`.
    fn generate<'a>(
        &'a self,
        secret: &'a str,
        request: &'a GenerateRequest,
    ) -> Pin<Box<dyn Future<Output = Result<GenerateResponse>> + Send + 'a>>;

    /// Minimal low-cost call used only to decide whether `secret` works.
    fn probe<'a>(&'a self, secret: &'a str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}
