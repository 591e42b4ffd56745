//! Resilient generation client
//!
//! Wraps one logical "generate" call: takes the active key from the shared
//! `KeyPool`, calls the provider, and on a credential-class failure marks the
//! key invalid, rotates, and retries. Attempts are sequential and bounded by
//! the pool size. Cancellation is cooperative: a token checked between
//! attempts, never a transport-level abort.
//!
//! Callers either await the returned `Result`, or read `state()` / subscribe
//! to `ClientEvent`s for live progress.

pub mod cancel;
pub mod client;
pub mod error;
pub mod metrics;
pub mod state;

pub use cancel::CancelToken;
pub use client::ResilientClient;
pub use error::{GenerateError, Result};
pub use state::{ClientEvent, ClientState};
