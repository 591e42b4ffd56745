//! Pool state, cursor and rotation
//!
//! The pool is one shared mutable resource. All state lives behind a single
//! `RwLock` so the credential list, the cursor and the toggle always change
//! together, and every mutation persists while still holding the write lock:
//! storage sees writes in the same order memory does (last writer wins).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::credential::{Credential, CredentialStatus, parse_keys};
use crate::error::{Error, Result};
use crate::storage::{PoolStorage, StoredPool};

/// Minimum gap between validation probes.
pub const DEFAULT_VALIDATION_DELAY: Duration = Duration::from_millis(1100);

/// Construction-time settings.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Gap enforced between successive probes in `validate_all`
    pub validation_delay: Duration,
    /// Auto-rotate value used when storage has none
    pub default_auto_rotate: bool,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            validation_delay: DEFAULT_VALIDATION_DELAY,
            default_auto_rotate: true,
        }
    }
}

#[derive(Debug)]
pub(crate) struct PoolState {
    pub(crate) credentials: Vec<Credential>,
    pub(crate) active_index: usize,
    pub(crate) auto_rotate: bool,
}

impl PoolState {
    fn to_stored(&self) -> StoredPool {
        StoredPool {
            credentials: self.credentials.clone(),
            active_index: self.active_index,
            auto_rotate: Some(self.auto_rotate),
        }
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.credentials.iter().position(|c| c.id == id)
    }
}

/// Ordered set of API keys with a cursor and durable persistence.
pub struct KeyPool {
    pub(crate) state: RwLock<PoolState>,
    pub(crate) validating: AtomicBool,
    pub(crate) validation_delay: Duration,
    storage: Arc<dyn PoolStorage>,
}

impl KeyPool {
    /// Hydrate a pool from storage.
    ///
    /// A stored cursor past the end of the list is clamped to the last entry.
    pub async fn load(storage: Arc<dyn PoolStorage>, options: PoolOptions) -> Self {
        let stored = storage.load().await;
        let len = stored.credentials.len();
        let active_index = if len == 0 {
            0
        } else if stored.active_index >= len {
            warn!(
                stored = stored.active_index,
                credentials = len,
                "stored cursor out of range, clamping"
            );
            len - 1
        } else {
            stored.active_index
        };
        let auto_rotate = stored.auto_rotate.unwrap_or(options.default_auto_rotate);

        info!(credentials = len, active_index, auto_rotate, "key pool initialized");
        Self {
            state: RwLock::new(PoolState {
                credentials: stored.credentials,
                active_index,
                auto_rotate,
            }),
            validating: AtomicBool::new(false),
            validation_delay: options.validation_delay,
            storage,
        }
    }

    /// Write the current state through to storage.
    ///
    /// Failures are logged, not returned: the in-memory mutation stands and
    /// the next successful write catches storage up.
    pub(crate) async fn persist(&self, state: &PoolState) {
        if let Err(e) = self.storage.save(&state.to_stored()).await {
            warn!(error = %e, "failed to persist key pool");
        }
    }

    /// Replace every key with the tokens parsed from `raw_text`.
    ///
    /// All new entries start `Unchecked` with fresh ids; the cursor resets to 0.
    /// Returns the new pool size.
    pub async fn replace_all(&self, raw_text: &str) -> usize {
        let credentials: Vec<Credential> = parse_keys(raw_text)
            .into_iter()
            .map(Credential::new)
            .collect();
        let count = credentials.len();

        let mut state = self.state.write().await;
        state.credentials = credentials;
        state.active_index = 0;
        self.persist(&state).await;
        info!(credentials = count, "key pool replaced");
        count
    }

    /// Remove one key by id.
    ///
    /// If the removed entry sat at or before the cursor, the cursor is clamped
    /// to the new last index (0 when the pool becomes empty).
    pub async fn remove(&self, id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let idx = state
            .position(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        state.credentials.remove(idx);

        if idx <= state.active_index {
            let last = state.credentials.len().saturating_sub(1);
            state.active_index = state.active_index.min(last);
        }
        self.persist(&state).await;
        info!(credential_id = id, active_index = state.active_index, "credential removed");
        Ok(())
    }

    /// Flip auto-rotate and return the new value.
    pub async fn toggle_auto_rotate(&self) -> bool {
        let mut state = self.state.write().await;
        state.auto_rotate = !state.auto_rotate;
        self.persist(&state).await;
        info!(auto_rotate = state.auto_rotate, "auto-rotate toggled");
        state.auto_rotate
    }

    /// Credential under the cursor, if any.
    pub async fn get_active(&self) -> Option<Credential> {
        let state = self.state.read().await;
        state.credentials.get(state.active_index).cloned()
    }

    /// Move the cursor to the next key that is not `Errored`.
    ///
    /// Scans cyclically starting just after the cursor. A pool with one entry
    /// has nothing to rotate to. Returns `None` without touching the cursor
    /// when every other key is `Errored`.
    pub async fn rotate_to_next(&self) -> Option<Credential> {
        let mut state = self.state.write().await;
        let n = state.credentials.len();
        if n <= 1 {
            debug!(credentials = n, "nothing to rotate to");
            return None;
        }

        let start = state.active_index;
        for offset in 1..n {
            let idx = (start + offset) % n;
            if state.credentials[idx].status != CredentialStatus::Errored {
                state.active_index = idx;
                let next = state.credentials[idx].clone();
                self.persist(&state).await;
                info!(from = start, to = idx, credential_id = %next.id, "rotated to next credential");
                return Some(next);
            }
        }

        warn!(credentials = n, "no non-errored credential to rotate to");
        None
    }

    /// Mark a key `Errored` and bump its error count.
    pub async fn mark_invalid(&self, id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let idx = state
            .position(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        let credential = &mut state.credentials[idx];
        credential.status = CredentialStatus::Errored;
        credential.error_count += 1;
        let error_count = credential.error_count;
        self.persist(&state).await;
        warn!(credential_id = id, error_count, "credential marked invalid");
        Ok(())
    }

    /// Snapshot of all credentials in pool order.
    pub async fn credentials(&self) -> Vec<Credential> {
        self.state.read().await.credentials.clone()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.credentials.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn active_index(&self) -> usize {
        self.state.read().await.active_index
    }

    pub async fn auto_rotate_enabled(&self) -> bool {
        self.state.read().await.auto_rotate
    }

    /// True while a `validate_all` pass is running.
    pub fn is_validating(&self) -> bool {
        self.validating.load(Ordering::Acquire)
    }

    /// Pool health summary.
    ///
    /// Status mapping: no errored keys → healthy, some usable keys → degraded,
    /// nothing usable (or empty) → unhealthy.
    pub async fn health(&self) -> serde_json::Value {
        let state = self.state.read().await;

        let mut credentials = Vec::new();
        let mut unchecked = 0usize;
        let mut active = 0usize;
        let mut errored = 0usize;

        for (idx, c) in state.credentials.iter().enumerate() {
            match c.status {
                CredentialStatus::Unchecked => unchecked += 1,
                CredentialStatus::Active => active += 1,
                CredentialStatus::Errored => errored += 1,
            }
            credentials.push(serde_json::json!({
                "id": c.id,
                "key": c.secret.hint(),
                "status": c.status.label(),
                "error_count": c.error_count,
                "last_checked_at": c.last_checked_at,
                "selected": idx == state.active_index,
            }));
        }

        let total = state.credentials.len();
        let usable = unchecked + active;
        let pool_status = if total > 0 && errored == 0 {
            "healthy"
        } else if usable > 0 {
            "degraded"
        } else {
            "unhealthy"
        };

        serde_json::json!({
            "status": pool_status,
            "credentials_total": total,
            "credentials_unchecked": unchecked,
            "credentials_active": active,
            "credentials_errored": errored,
            "active_index": state.active_index,
            "auto_rotate": state.auto_rotate,
            "credentials": credentials
        })
    }
}
