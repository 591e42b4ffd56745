//! Observable client state and progress events

use provider::GenerateResponse;

use crate::error::GenerateError;

/// Three-slot state a UI renders from.
///
/// Reset at the start of every call. `cancel()` clears `is_loading` at once,
/// before the in-flight attempt settles.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientState {
    pub is_loading: bool,
    pub last_error: Option<GenerateError>,
    pub last_result: Option<GenerateResponse>,
}

/// Progress of a generate call, broadcast to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Started,
    /// About to call upstream; `attempt` counts from 1
    Attempt { attempt: usize, credential_id: String },
    /// Credential-class failure moved the pool cursor
    Rotated { from: String, to: String },
    Succeeded { attempts: usize },
    Failed { error: GenerateError },
}
