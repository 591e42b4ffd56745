//! Retry-with-rotation loop around one generation request

use std::sync::{Arc, Mutex};

use key_pool::{Credential, KeyPool, classify_error};
use provider::{GenerateRequest, GenerateResponse, Provider};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::error::{GenerateError, Result};
use crate::metrics;
use crate::state::{ClientEvent, ClientState};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Generation client with automatic key failover.
///
/// Many clients may share one `KeyPool`; each keeps its own state and
/// cancellation token. Pool mutations from concurrent calls interleave
/// last-writer-wins.
pub struct ResilientClient {
    pool: Arc<KeyPool>,
    provider: Arc<dyn Provider>,
    state: Mutex<ClientState>,
    current_token: Mutex<CancelToken>,
    events: broadcast::Sender<ClientEvent>,
}

impl ResilientClient {
    pub fn new(pool: Arc<KeyPool>, provider: Arc<dyn Provider>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            pool,
            provider,
            state: Mutex::new(ClientState::default()),
            current_token: Mutex::new(CancelToken::new()),
            events,
        }
    }

    pub fn pool(&self) -> &Arc<KeyPool> {
        &self.pool
    }

    /// Snapshot of the observable state.
    pub fn state(&self) -> ClientState {
        self.with_state(|s| s.clone())
    }

    /// Live progress events for calls made after subscribing.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Run one request with a fresh cancellation token.
    pub async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse> {
        self.generate_with(request, &CancelToken::new()).await
    }

    /// Run one request, checking `token` between attempts.
    ///
    /// `token` becomes the one `cancel()` fires, so `cancel()` always applies
    /// to the most recently started call on this client.
    /// Tries the active key, then on credential-class failures (when
    /// auto-rotate is on) marks it invalid and moves to the next usable key.
    /// At most one attempt per key in the pool at call start. Any other
    /// failure ends the call at once with the upstream message.
    #[instrument(skip_all, fields(model = %request.model))]
    pub async fn generate_with(
        &self,
        request: &GenerateRequest,
        token: &CancelToken,
    ) -> Result<GenerateResponse> {
        *self
            .current_token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = token.clone();
        self.with_state(|s| {
            s.is_loading = true;
            s.last_error = None;
            s.last_result = None;
        });
        self.emit(ClientEvent::Started);

        let max_attempts = self.pool.len().await;
        if max_attempts == 0 {
            return self.fail(GenerateError::NoCredentialsConfigured);
        }
        let Some(first) = self.pool.get_active().await else {
            return self.fail(GenerateError::NoActiveCredential);
        };

        let mut current: Option<Credential> = Some(first);
        let mut attempts = 0usize;

        loop {
            let Some(credential) = current.take() else {
                break;
            };
            if attempts >= max_attempts || token.is_cancelled() {
                break;
            }
            attempts += 1;
            debug!(attempt = attempts, max_attempts, credential_id = %credential.id, "calling upstream");
            self.emit(ClientEvent::Attempt {
                attempt: attempts,
                credential_id: credential.id.clone(),
            });

            match self
                .provider
                .generate(credential.secret.expose(), request)
                .await
            {
                Ok(response) => {
                    if token.is_cancelled() {
                        metrics::record_attempt("cancelled");
                        break;
                    }
                    metrics::record_attempt("success");
                    metrics::record_result("success");
                    info!(attempts, credential_id = %credential.id, "generation succeeded");
                    self.with_state(|s| {
                        s.last_result = Some(response.clone());
                        s.is_loading = false;
                    });
                    self.emit(ClientEvent::Succeeded { attempts });
                    return Ok(response);
                }
                Err(e) => {
                    if token.is_cancelled() {
                        metrics::record_attempt("cancelled");
                        break;
                    }

                    let class = classify_error(&e);
                    metrics::record_attempt(class.label());
                    let auto_rotate = self.pool.auto_rotate_enabled().await;
                    if !(auto_rotate && class.is_credential()) {
                        warn!(
                            error = %e,
                            class = class.label(),
                            auto_rotate,
                            "upstream failure is terminal"
                        );
                        return self.fail(GenerateError::Upstream(e.message));
                    }

                    warn!(
                        credential_id = %credential.id,
                        class = class.label(),
                        error = %e,
                        "credential rejected, rotating"
                    );
                    if let Err(err) = self.pool.mark_invalid(&credential.id).await {
                        // Removed or replaced by someone else mid-call
                        debug!(credential_id = %credential.id, error = %err, "could not mark credential invalid");
                    }
                    current = self.pool.rotate_to_next().await;
                    if let Some(next) = &current {
                        metrics::record_rotation();
                        self.emit(ClientEvent::Rotated {
                            from: credential.id.clone(),
                            to: next.id.clone(),
                        });
                    }
                }
            }
        }

        if token.is_cancelled() {
            info!(attempts, "generation cancelled");
            return self.fail(GenerateError::Cancelled);
        }
        warn!(attempts, "every credential failed");
        self.fail(GenerateError::CredentialsExhausted { attempts })
    }

    /// Cancel the most recently started call.
    ///
    /// Loading clears immediately and the state shows the cancellation; the
    /// in-flight attempt still runs to completion but its outcome is dropped.
    pub fn cancel(&self) {
        self.current_token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .cancel();
        self.with_state(|s| {
            s.is_loading = false;
            s.last_error = Some(GenerateError::Cancelled);
        });
        info!("cancellation requested");
    }

    /// Forget the last error and result. Loading state and the pool are untouched.
    pub fn clear(&self) {
        self.with_state(|s| {
            s.last_error = None;
            s.last_result = None;
        });
    }

    fn fail(&self, error: GenerateError) -> Result<GenerateResponse> {
        metrics::record_result(error.kind());
        self.with_state(|s| {
            s.last_error = Some(error.clone());
            s.is_loading = false;
        });
        self.emit(ClientEvent::Failed {
            error: error.clone(),
        });
        Err(error)
    }

    fn emit(&self, event: ClientEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut ClientState) -> R) -> R {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut state)
    }
}
