//! Sequential validation pass over every key
//!
//! Probes keys one at a time, in pool order, with a fixed gap between probes
//! so a long key list does not trip the upstream rate limit. There is no
//! cancellation: once started a pass runs to completion, and a second pass
//! is refused while one is running.

use std::sync::atomic::{AtomicBool, Ordering};

use common::Secret;
use provider::Provider;
use tracing::{debug, info, warn};

use crate::credential::{CredentialStatus, now_millis};
use crate::error::{Error, Result};
use crate::pool::KeyPool;

/// Outcome counts of one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationSummary {
    pub active: usize,
    pub errored: usize,
    /// Keys removed or replaced while their probe was in flight
    pub skipped: usize,
}

/// Holds the validating flag for the lifetime of a pass.
struct ValidationGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> ValidationGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::ValidationInProgress)?;
        Ok(Self { flag })
    }
}

impl Drop for ValidationGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl KeyPool {
    /// Probe every key in order and record `Active`/`Errored`.
    ///
    /// Per-key failures never abort the pass. Afterwards the cursor moves to
    /// the first `Active` key, or to 0 when none validated.
    pub async fn validate_all(&self, provider: &dyn Provider) -> Result<ValidationSummary> {
        let _guard = ValidationGuard::acquire(&self.validating)?;

        let targets: Vec<(String, Secret<String>)> = self
            .state
            .read()
            .await
            .credentials
            .iter()
            .map(|c| (c.id.clone(), c.secret.clone()))
            .collect();
        info!(
            credentials = targets.len(),
            provider = provider.id(),
            delay_ms = self.validation_delay.as_millis() as u64,
            "starting validation pass"
        );

        let mut summary = ValidationSummary::default();
        for (i, (id, secret)) in targets.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.validation_delay).await;
            }

            let ok = match provider.probe(secret.expose()).await {
                Ok(()) => {
                    debug!(credential_id = %id, "probe succeeded");
                    true
                }
                Err(e) => {
                    warn!(credential_id = %id, error = %e, "probe failed");
                    false
                }
            };

            if !self.record_probe(id, ok).await {
                debug!(credential_id = %id, "credential gone before probe result, skipping");
                summary.skipped += 1;
            } else if ok {
                summary.active += 1;
            } else {
                summary.errored += 1;
            }
        }

        let active_index = self.select_first_active().await;
        info!(
            active = summary.active,
            errored = summary.errored,
            skipped = summary.skipped,
            active_index,
            "validation pass complete"
        );
        Ok(summary)
    }

    /// Write one probe result. Returns false when the key no longer exists.
    async fn record_probe(&self, id: &str, ok: bool) -> bool {
        let mut state = self.state.write().await;
        let Some(credential) = state.credentials.iter_mut().find(|c| c.id == id) else {
            return false;
        };
        if ok {
            credential.status = CredentialStatus::Active;
        } else {
            credential.status = CredentialStatus::Errored;
            credential.error_count += 1;
        }
        credential.last_checked_at = Some(now_millis());
        self.persist(&state).await;
        true
    }

    /// Point the cursor at the first `Active` key (0 if none) and persist.
    async fn select_first_active(&self) -> usize {
        let mut state = self.state.write().await;
        state.active_index = state
            .credentials
            .iter()
            .position(|c| c.status == CredentialStatus::Active)
            .unwrap_or(0);
        self.persist(&state).await;
        state.active_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::tests::memory_pool;
    use provider::{GenerateRequest, GenerateResponse, ProviderError};
    use std::collections::HashSet;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Probe succeeds only for keys in `good`; records probe order.
    struct ScriptedProbe {
        good: HashSet<String>,
        probed: Mutex<Vec<String>>,
    }

    impl ScriptedProbe {
        fn new(good: &[&str]) -> Self {
            Self {
                good: good.iter().map(|s| s.to_string()).collect(),
                probed: Mutex::new(Vec::new()),
            }
        }

        fn probed(&self) -> Vec<String> {
            self.probed.lock().unwrap().clone()
        }
    }

    impl Provider for ScriptedProbe {
        fn id(&self) -> &str {
            "scripted"
        }

        fn generate<'a>(
            &'a self,
            _secret: &'a str,
            _request: &'a GenerateRequest,
        ) -> Pin<Box<dyn Future<Output = provider::Result<GenerateResponse>> + Send + 'a>> {
            Box::pin(async { Err(ProviderError::new("not used")) })
        }

        fn probe<'a>(
            &'a self,
            secret: &'a str,
        ) -> Pin<Box<dyn Future<Output = provider::Result<()>> + Send + 'a>> {
            self.probed.lock().unwrap().push(secret.to_string());
            let ok = self.good.contains(secret);
            Box::pin(async move {
                if ok {
                    Ok(())
                } else {
                    Err(ProviderError::with_status(
                        400,
                        "[400] API key not valid. (INVALID_ARGUMENT)",
                    ))
                }
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_active_becomes_cursor() {
        let (pool, _) = memory_pool("good bad").await;
        let probe = ScriptedProbe::new(&["good"]);

        let summary = pool.validate_all(&probe).await.unwrap();

        assert_eq!(summary, ValidationSummary { active: 1, errored: 1, skipped: 0 });
        assert_eq!(pool.active_index().await, 0);
        let creds = pool.credentials().await;
        assert_eq!(creds[0].status, CredentialStatus::Active);
        assert_eq!(creds[1].status, CredentialStatus::Errored);
        assert!(creds[0].last_checked_at.is_some());
        assert!(creds[1].last_checked_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn cursor_moves_past_leading_failures() {
        let (pool, _) = memory_pool("bad1 bad2 good1 good2").await;
        let probe = ScriptedProbe::new(&["good1", "good2"]);

        pool.validate_all(&probe).await.unwrap();

        assert_eq!(pool.active_index().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn no_active_resets_cursor_to_zero() {
        let (pool, _) = memory_pool("a b c").await;
        pool.rotate_to_next().await;
        let probe = ScriptedProbe::new(&[]);

        let summary = pool.validate_all(&probe).await.unwrap();

        assert_eq!(summary.errored, 3);
        assert_eq!(pool.active_index().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_do_not_abort_pass_and_order_is_preserved() {
        let (pool, _) = memory_pool("a b c d").await;
        let probe = ScriptedProbe::new(&["d"]);

        pool.validate_all(&probe).await.unwrap();

        assert_eq!(probe.probed(), vec!["a", "b", "c", "d"]);
        assert_eq!(pool.active_index().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_bumps_error_count_and_recovery_restores_active() {
        let (pool, _) = memory_pool("k").await;

        pool.validate_all(&ScriptedProbe::new(&[])).await.unwrap();
        let c = pool.get_active().await.unwrap();
        assert_eq!(c.status, CredentialStatus::Errored);
        assert_eq!(c.error_count, 1);

        pool.validate_all(&ScriptedProbe::new(&["k"])).await.unwrap();
        let c = pool.get_active().await.unwrap();
        assert_eq!(c.status, CredentialStatus::Active);
        // Never reset by a later success
        assert_eq!(c.error_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn probes_are_spaced_by_validation_delay() {
        let (pool, _) = memory_pool("a b c").await;
        let probe = ScriptedProbe::new(&["a", "b", "c"]);

        let started = tokio::time::Instant::now();
        pool.validate_all(&probe).await.unwrap();
        let elapsed = started.elapsed();

        // Two gaps between three probes, none after the last
        assert!(elapsed >= Duration::from_millis(2200), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(3300), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn single_key_has_no_delay() {
        let (pool, _) = memory_pool("a").await;
        let started = tokio::time::Instant::now();
        pool.validate_all(&ScriptedProbe::new(&["a"])).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(1100));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_pool_validates_trivially() {
        let (pool, _) = memory_pool("").await;
        let summary = pool.validate_all(&ScriptedProbe::new(&[])).await.unwrap();
        assert_eq!(summary, ValidationSummary::default());
        assert_eq!(pool.active_index().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_pass_is_rejected_and_flag_clears() {
        let (pool, _) = memory_pool("a b c").await;
        let pool = Arc::new(pool);
        let probe: Arc<dyn Provider> = Arc::new(ScriptedProbe::new(&["a"]));

        let running = {
            let pool = pool.clone();
            let probe = probe.clone();
            tokio::spawn(async move { pool.validate_all(probe.as_ref()).await })
        };
        while !pool.is_validating() {
            tokio::task::yield_now().await;
        }

        let second = pool.validate_all(probe.as_ref()).await;
        assert!(matches!(second, Err(Error::ValidationInProgress)));

        running.await.unwrap().unwrap();
        assert!(!pool.is_validating());
    }

    #[tokio::test(start_paused = true)]
    async fn key_removed_mid_pass_is_skipped() {
        let (pool, _) = memory_pool("a b").await;
        let pool = Arc::new(pool);
        let second_id = pool.credentials().await[1].id.clone();
        let probe: Arc<dyn Provider> = Arc::new(ScriptedProbe::new(&["a", "b"]));

        let running = {
            let pool = pool.clone();
            let probe = probe.clone();
            tokio::spawn(async move { pool.validate_all(probe.as_ref()).await })
        };
        while !pool.is_validating() {
            tokio::task::yield_now().await;
        }
        // The pass is now sleeping between probes
        pool.remove(&second_id).await.unwrap();

        let summary = running.await.unwrap().unwrap();
        assert_eq!(summary.active, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(pool.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn custom_delay_is_honored() {
        let storage = Arc::new(crate::MemoryStorage::default());
        let options = crate::PoolOptions {
            validation_delay: Duration::from_millis(250),
            ..crate::PoolOptions::default()
        };
        let pool = KeyPool::load(storage, options).await;
        pool.replace_all("a b").await;

        let started = tokio::time::Instant::now();
        pool.validate_all(&ScriptedProbe::new(&["a", "b"])).await.unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(250) && elapsed < Duration::from_millis(1100));
    }
}
