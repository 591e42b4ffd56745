//! API key pool for the generation service
//!
//! Holds an ordered list of API keys with per-key health, a cursor selecting
//! the active key, and an auto-rotate toggle. Every mutation is written
//! through to a `PoolStorage` so the pool survives restarts.
//!
//! Key lifecycle:
//! 1. User pastes or uploads a key list → `replace_all`, every key `Unchecked`
//! 2. Optional `validate_all` pass probes each key in order → `Active` or `Errored`
//! 3. A request fails with a credential-class error → `mark_invalid`, then
//!    `rotate_to_next` moves the cursor to the next key that is not `Errored`
//! 4. User deletes a key → `remove`, cursor clamped
//! 5. When every key is `Errored`, rotation returns `None` (pool exhausted)

pub mod classify;
pub mod credential;
pub mod error;
pub mod pool;
pub mod storage;
pub mod validate;

pub use classify::{classify, classify_error};
pub use credential::{Credential, CredentialStatus, parse_keys};
pub use error::{Error, Result};
pub use pool::{KeyPool, PoolOptions};
pub use storage::{FileStorage, MemoryStorage, PoolStorage, StoredPool};
pub use validate::ValidationSummary;
