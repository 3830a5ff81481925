//! Refreshing configuration provider backed by Infisical.
//!
//! Lifecycle:
//! 1. **Construct**: validate options, schedule the reload timer if one is
//!    configured. No client is built and no request is sent.
//! 2. **Load**: one bounded fetch. Failures are slowed to a minimum duration,
//!    then either returned or swallowed depending on `optional`.
//! 3. **Refresh**: each timer tick fetches again once the initial load has
//!    completed, at most one fetch at a time. Successes are broadcast as
//!    [`ProviderEvent::Reloaded`].
//! 4. **Dispose**: stop the timer and close the client if one was built.

mod bounded;
mod lazy;
mod shutdown;
mod snapshot;
mod state;

pub use snapshot::{mask_value, Snapshot};
pub use state::RefreshState;

use crate::client::{secrets_to_map, ClientFactory, ListSecretsRequest};
use crate::config::{
    validate_options_object, SourceOptions, EVENT_CHANNEL_CAPACITY,
    MIN_DELAY_FOR_UNHANDLED_FAILURE_MS,
};
use crate::error::ProviderError;
use bounded::load_bounded;
use lazy::LazyClient;
use parking_lot::Mutex;
use shutdown::ShutdownSignal;
use snapshot::SnapshotCell;
use state::{CompletionMark, RefreshGate};
use std::sync::atomic::{fence, AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

// ============================================================================
// Events and Outcomes
// ============================================================================

/// Notifications published to subscribers.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    /// A background refresh published a new snapshot.
    Reloaded { generation: u64, key_count: usize },
    /// A background refresh of a non-optional source failed. The previous
    /// snapshot is still served.
    RefreshFailed(Arc<ProviderError>),
}

/// Why a refresh attempt did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disposed,
    InitialLoadPending,
    InFlight,
}

/// Result of one refresh attempt.
#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    Reloaded { generation: u64 },
    Failed(Arc<ProviderError>),
    Skipped(SkipReason),
}

impl RefreshOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, RefreshOutcome::Skipped(_))
    }
}

// ============================================================================
// Provider
// ============================================================================

struct Inner {
    optional: bool,
    timeout: Duration,
    request: ListSecretsRequest,
    client: LazyClient,
    snapshot: SnapshotCell,
    initial_load_done: AtomicBool,
    refresh: RefreshGate,
    shutdown: ShutdownSignal,
    events: broadcast::Sender<ProviderEvent>,
}

impl Inner {
    /// Fetch under the bounded wait and publish on success.
    ///
    /// Nothing is built, awaited or published once the provider is disposed.
    async fn fetch(&self) -> Result<Arc<Snapshot>, ProviderError> {
        if self.shutdown.is_triggered() {
            return Err(ProviderError::Disposed);
        }

        let client = self.client.get()?;
        // Pairs with the fence in `dispose`: either it sees this client or
        // we see its signal and release the client ourselves.
        fence(Ordering::SeqCst);
        if self.shutdown.is_triggered() {
            self.client.release();
            return Err(ProviderError::Disposed);
        }

        let request = self.request.clone();
        let secrets = self
            .shutdown
            .run_until_triggered(load_bounded(self.timeout, async move {
                client.list_secrets(&request).await
            }))
            .await
            .ok_or(ProviderError::Disposed)??;
        let data = secrets_to_map(secrets)?;

        if self.shutdown.is_triggered() {
            return Err(ProviderError::Disposed);
        }
        Ok(self.snapshot.publish(data))
    }

    async fn refresh(&self) -> RefreshOutcome {
        if self.shutdown.is_triggered() {
            return RefreshOutcome::Skipped(SkipReason::Disposed);
        }

        if !self.initial_load_done.load(Ordering::Acquire) {
            debug!("Skipping secret reload: initial load has not completed");
            return RefreshOutcome::Skipped(SkipReason::InitialLoadPending);
        }

        let Some(_guard) = self.refresh.try_begin() else {
            debug!("Skipping secret reload: previous reload still running");
            return RefreshOutcome::Skipped(SkipReason::InFlight);
        };

        match self.fetch().await {
            Ok(snapshot) => {
                debug!(
                    "Reloaded {} secret(s) (generation {})",
                    snapshot.len(),
                    snapshot.generation()
                );
                // No subscribers is fine.
                let _ = self.events.send(ProviderEvent::Reloaded {
                    generation: snapshot.generation(),
                    key_count: snapshot.len(),
                });
                RefreshOutcome::Reloaded {
                    generation: snapshot.generation(),
                }
            }
            Err(ProviderError::Disposed) => RefreshOutcome::Skipped(SkipReason::Disposed),
            Err(err) => {
                let err = Arc::new(err);
                if self.optional {
                    debug!("Optional secret reload failed, keeping last snapshot: {}", err);
                } else {
                    error!("Secret reload failed, keeping last snapshot: {}", err);
                    let _ = self
                        .events
                        .send(ProviderEvent::RefreshFailed(Arc::clone(&err)));
                }
                RefreshOutcome::Failed(err)
            }
        }
    }
}

/// Configuration provider serving the latest Infisical snapshot.
pub struct RefreshProvider {
    inner: Arc<Inner>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshProvider {
    /// Validate `options` and schedule the reload timer, if any.
    ///
    /// Fails with [`ProviderError::Configuration`] when a required option is
    /// empty, whatever `optional` says. With a reload interval this must run
    /// inside a tokio runtime.
    pub fn new(options: SourceOptions, factory: ClientFactory) -> Result<Self, ProviderError> {
        validate_options_object(&options)?;

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let inner = Arc::new(Inner {
            optional: options.optional,
            timeout: options.timeout(),
            request: ListSecretsRequest::from(&options.infisical),
            client: LazyClient::new(options.infisical.clone(), factory),
            snapshot: SnapshotCell::new(),
            initial_load_done: AtomicBool::new(false),
            refresh: RefreshGate::new(),
            shutdown: ShutdownSignal::new(),
            events,
        });

        let timer = match options.reload_after() {
            Some(period) => {
                let runtime = tokio::runtime::Handle::try_current()
                    .map_err(|_| ProviderError::NoRuntime)?;
                info!("Scheduling secret reload every {:?}", period);
                Some(runtime.spawn(run_refresh_timer(
                    Arc::downgrade(&inner),
                    inner.shutdown.clone(),
                    period,
                )))
            }
            None => None,
        };

        Ok(Self {
            inner,
            timer: Mutex::new(timer),
        })
    }

    /// Perform the initial (or a host-requested) load.
    ///
    /// A failed attempt takes at least five seconds to return so that hosts
    /// retrying construction in a loop do not hammer the service.
    ///
    /// After [`dispose`](Self::dispose) this fails at once with
    /// [`ProviderError::Disposed`], whatever `optional` says.
    pub async fn load(&self) -> Result<(), ProviderError> {
        if self.inner.shutdown.is_triggered() {
            return Err(ProviderError::Disposed);
        }

        let started = Instant::now();
        let _done = CompletionMark::new(&self.inner.initial_load_done);

        match self.inner.fetch().await {
            Ok(snapshot) => {
                info!(
                    "Loaded {} secret(s) from Infisical (generation {})",
                    snapshot.len(),
                    snapshot.generation()
                );
                Ok(())
            }
            Err(ProviderError::Disposed) => {
                debug!("Provider disposed during load");
                Err(ProviderError::Disposed)
            }
            Err(err) => {
                let floor = Duration::from_millis(MIN_DELAY_FOR_UNHANDLED_FAILURE_MS);
                let remaining = floor.saturating_sub(started.elapsed());
                if !remaining.is_zero() {
                    tokio::time::sleep(remaining).await;
                }

                if self.inner.optional {
                    warn!(
                        "Optional Infisical source failed to load, serving {} cached key(s): {}",
                        self.inner.snapshot.load().len(),
                        err
                    );
                    Ok(())
                } else {
                    error!("Failed to load secrets from Infisical: {}", err);
                    Err(err)
                }
            }
        }
    }

    /// Run one refresh attempt, as a timer tick would.
    pub async fn refresh(&self) -> RefreshOutcome {
        self.inner.refresh().await
    }

    /// The current snapshot. Never blocks, even during a refresh.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.inner.snapshot.load()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.snapshot.load().get(key).map(str::to_string)
    }

    /// Receive reload and failure notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_optional(&self) -> bool {
        self.inner.optional
    }

    pub fn is_initial_load_complete(&self) -> bool {
        self.inner.initial_load_done.load(Ordering::Acquire)
    }

    pub fn is_client_created(&self) -> bool {
        self.inner.client.created().is_some()
    }

    pub fn refresh_state(&self) -> RefreshState {
        self.inner.refresh.state()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.shutdown.is_triggered()
    }

    /// Stop the timer and any in-flight fetch, then close the client if it
    /// was ever built.
    ///
    /// Idempotent. Never constructs a client. A refresh still running when
    /// this is called publishes nothing and sends no event.
    pub fn dispose(&self) {
        if !self.inner.shutdown.trigger() {
            return;
        }

        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }

        fence(Ordering::SeqCst);
        if self.inner.client.release() {
            debug!("Closed Infisical client");
        }
    }
}

impl Drop for RefreshProvider {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Tick immediately, then every `period`. Each tick runs its refresh on its
/// own task; the gate in [`Inner::refresh`] drops overlapping ticks.
async fn run_refresh_timer(inner: Weak<Inner>, shutdown: ShutdownSignal, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    while shutdown.run_until_triggered(ticker.tick()).await.is_some() {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        tokio::spawn(async move {
            inner.refresh().await;
        });
    }

    debug!("Secret reload timer stopped");
}
