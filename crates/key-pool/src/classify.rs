//! Credential-class error detection
//!
//! The upstream client library gives no stable structured error codes, so
//! classification is a best-effort heuristic over the error message. Status
//! codes are consulted only when no message signature matches.

use provider::{CredentialFault, ErrorClass, ProviderError};

/// Message signatures that blame the key rather than the request.
///
/// Matched case-insensitively against the message text. The upstream status
/// token (`INVALID_ARGUMENT`, `PERMISSION_DENIED`) is not a signature: every
/// 400 carries `INVALID_ARGUMENT`, including plain bad-payload errors. Order
/// matters: the first hit decides the fault.
const CREDENTIAL_SIGNATURES: &[(&str, CredentialFault)] = &[
    ("api key not valid", CredentialFault::InvalidKey),
    ("permission denied", CredentialFault::PermissionDenied),
    ("quota", CredentialFault::QuotaExceeded),
    ("invalid argument", CredentialFault::InvalidArgument),
];

/// Classify a failure by its message, falling back to the HTTP status.
///
/// Fallback statuses: 401/403 are `PermissionDenied`, 429 is `QuotaExceeded`.
/// Everything else is `Upstream` (terminal, surfaced verbatim).
pub fn classify(status: Option<u16>, message: &str) -> ErrorClass {
    let normalized = message.to_lowercase();
    for (signature, fault) in CREDENTIAL_SIGNATURES {
        if normalized.contains(signature) {
            return ErrorClass::Credential(*fault);
        }
    }

    match status {
        Some(401) | Some(403) => ErrorClass::Credential(CredentialFault::PermissionDenied),
        Some(429) => ErrorClass::Credential(CredentialFault::QuotaExceeded),
        _ => ErrorClass::Upstream,
    }
}

/// Classify a `ProviderError`.
pub fn classify_error(error: &ProviderError) -> ErrorClass {
    classify(error.status, &error.message)
}
