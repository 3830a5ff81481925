//! Integration tests for the refresh provider lifecycle.
//!
//! A scripted in-memory source stands in for Infisical. Timing tests run on
//! a paused tokio clock so five-second floors cost nothing.

use async_trait::async_trait;
use futures::future::join_all;
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::time::Instant;

use infisical_config::{
    ClientFactory, InfisicalOptions, InfisicalSource, ListSecretsRequest, ProviderError,
    ProviderEvent, RefreshOutcome, RefreshProvider, SecretElement, SecretSource, SkipReason,
    SourceError,
};

// ============================================================================
// Scripted source
// ============================================================================

#[derive(Clone)]
enum Reply {
    Secrets(Vec<(String, String)>),
    Fail,
    Hang,
}

#[derive(Clone)]
struct Step {
    delay: Duration,
    reply: Reply,
}

impl Step {
    fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

fn ok(pairs: &[(&str, &str)]) -> Step {
    Step {
        delay: Duration::ZERO,
        reply: Reply::Secrets(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ),
    }
}

fn fail() -> Step {
    Step {
        delay: Duration::ZERO,
        reply: Reply::Fail,
    }
}

fn hang() -> Step {
    Step {
        delay: Duration::ZERO,
        reply: Reply::Hang,
    }
}

type Script = Arc<dyn Fn(usize) -> Step + Send + Sync>;

struct ScriptedSource {
    script: Script,
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    closed: AtomicUsize,
}

struct Leave<'a>(&'a AtomicUsize);

impl Drop for Leave<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SecretSource for ScriptedSource {
    async fn list_secrets(
        &self,
        _request: &ListSecretsRequest,
    ) -> Result<Vec<SecretElement>, SourceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        let _leave = Leave(&self.active);

        let step = (self.script)(call);
        if !step.delay.is_zero() {
            tokio::time::sleep(step.delay).await;
        }

        match step.reply {
            Reply::Secrets(pairs) => Ok(pairs
                .into_iter()
                .map(|(k, v)| SecretElement::new(k, v))
                .collect()),
            Reply::Fail => Err(SourceError::Service {
                status: 503,
                message: "unavailable".into(),
            }),
            Reply::Hang => std::future::pending().await,
        }
    }

    fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

struct Harness {
    source: Arc<ScriptedSource>,
    constructed: Arc<AtomicUsize>,
}

impl Harness {
    fn new<F>(script: F) -> Self
    where
        F: Fn(usize) -> Step + Send + Sync + 'static,
    {
        Self {
            source: Arc::new(ScriptedSource {
                script: Arc::new(script),
                calls: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
                closed: AtomicUsize::new(0),
            }),
            constructed: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn factory(&self) -> ClientFactory {
        let source = Arc::clone(&self.source);
        let constructed = Arc::clone(&self.constructed);
        Arc::new(move |_options: &InfisicalOptions| {
            constructed.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::clone(&source) as Arc<dyn SecretSource>)
        })
    }

    fn source(&self) -> InfisicalSource {
        InfisicalSource::new(InfisicalOptions::new("client", "secret", "project", "dev"))
            .with_client_factory(self.factory())
    }

    fn calls(&self) -> usize {
        self.source.calls.load(Ordering::SeqCst)
    }

    fn max_active(&self) -> usize {
        self.source.max_active.load(Ordering::SeqCst)
    }

    fn closed(&self) -> usize {
        self.source.closed.load(Ordering::SeqCst)
    }

    fn constructed(&self) -> usize {
        self.constructed.load(Ordering::SeqCst)
    }
}

fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

const FLOOR: Duration = Duration::from_secs(5);

// ============================================================================
// Construction and initial load
// ============================================================================

#[tokio::test(start_paused = true)]
async fn construction_is_lazy() {
    let harness = Harness::new(|_| ok(&[("A", "1")]));
    let provider = harness
        .source()
        .reload_after(Duration::from_millis(10))
        .build()
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(harness.constructed(), 0);
    assert_eq!(harness.calls(), 0);
    assert!(!provider.is_client_created());
}

#[tokio::test(start_paused = true)]
async fn load_round_trips_mapping_verbatim() {
    let harness = Harness::new(|_| ok(&[("A", "1"), ("B", "2")]));
    let provider = harness.source().build().unwrap();

    provider.load().await.unwrap();

    assert_eq!(provider.snapshot().as_map(), &map(&[("A", "1"), ("B", "2")]));
    assert!(provider.is_initial_load_complete());
    assert_eq!(harness.constructed(), 1);
}

#[tokio::test(start_paused = true)]
async fn required_load_failure_propagates_after_floor() {
    let harness = Harness::new(|_| fail());
    let provider = harness.source().build().unwrap();

    let started = Instant::now();
    let err = provider.load().await.unwrap_err();

    assert!(matches!(err, ProviderError::Fetch(SourceError::Service { status: 503, .. })));
    assert!(started.elapsed() >= FLOOR);
    assert!(provider.is_initial_load_complete());
}

#[tokio::test(start_paused = true)]
async fn optional_load_failure_is_swallowed_after_floor() {
    let harness = Harness::new(|_| fail());
    let provider = harness.source().optional(true).build().unwrap();

    let started = Instant::now();
    provider.load().await.unwrap();

    assert!(started.elapsed() >= FLOOR);
    assert!(provider.snapshot().is_empty());
    assert!(provider.is_initial_load_complete());
}

#[tokio::test(start_paused = true)]
async fn hanging_source_is_bounded_by_timeout() {
    let harness = Harness::new(|_| hang());
    let provider = harness
        .source()
        .timeout(Duration::from_millis(100))
        .build()
        .unwrap();

    let started = Instant::now();
    let err = provider.load().await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(err.is_timeout());
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_millis(100) + FLOOR);
}

#[tokio::test(start_paused = true)]
async fn hanging_optional_source_returns_normally() {
    let harness = Harness::new(|_| hang());
    let provider = harness
        .source()
        .optional(true)
        .timeout(Duration::from_millis(100))
        .build()
        .unwrap();

    provider.load().await.unwrap();
    assert!(provider.snapshot().is_empty());
}

#[tokio::test(start_paused = true)]
async fn slow_failure_is_not_padded_further() {
    let harness = Harness::new(|_| fail().after(Duration::from_secs(6)));
    let provider = harness
        .source()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap();

    let started = Instant::now();
    assert!(provider.load().await.is_err());

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(6));
    assert!(elapsed < Duration::from_millis(6_500));
}

#[tokio::test(start_paused = true)]
async fn timed_out_fetch_never_publishes_late() {
    let harness = Harness::new(|call| match call {
        0 => ok(&[("OLD", "stale")]).after(Duration::from_secs(10)),
        _ => ok(&[("NEW", "fresh")]),
    });
    let provider = harness
        .source()
        .optional(true)
        .timeout(Duration::from_millis(100))
        .build()
        .unwrap();

    provider.load().await.unwrap();
    assert!(matches!(provider.refresh().await, RefreshOutcome::Reloaded { .. }));

    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(provider.snapshot().as_map(), &map(&[("NEW", "fresh")]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_loads_construct_one_client() {
    let harness = Harness::new(|_| ok(&[("A", "1")]));
    let provider = Arc::new(harness.source().build().unwrap());

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let provider = Arc::clone(&provider);
            tokio::spawn(async move { provider.load().await })
        })
        .collect();
    for task in join_all(tasks).await {
        task.unwrap().unwrap();
    }

    assert_eq!(harness.constructed(), 1);
    assert_eq!(harness.calls(), 8);
}

// ============================================================================
// Background refresh
// ============================================================================

#[tokio::test(start_paused = true)]
async fn refresh_before_initial_load_does_nothing() {
    let harness = Harness::new(|_| ok(&[("A", "1")]));
    let provider = harness.source().build().unwrap();

    let outcome = provider.refresh().await;

    assert!(matches!(outcome, RefreshOutcome::Skipped(SkipReason::InitialLoadPending)));
    assert_eq!(harness.calls(), 0);
    assert_eq!(harness.constructed(), 0);
}

#[tokio::test(start_paused = true)]
async fn overlapping_refreshes_collapse_to_one() {
    let harness = Harness::new(|call| ok(&[("GEN", call.to_string().as_str())]).after(Duration::from_secs(1)));
    let provider = harness.source().build().unwrap();
    provider.load().await.unwrap();

    let outcomes = join_all((0..10).map(|_| provider.refresh())).await;

    let reloaded = outcomes
        .iter()
        .filter(|o| matches!(o, RefreshOutcome::Reloaded { .. }))
        .count();
    let in_flight = outcomes
        .iter()
        .filter(|o| matches!(o, RefreshOutcome::Skipped(SkipReason::InFlight)))
        .count();

    assert_eq!(reloaded, 1);
    assert_eq!(in_flight, 9);
    assert_eq!(harness.calls(), 2);
    assert_eq!(harness.max_active(), 1);
}

#[tokio::test(start_paused = true)]
async fn timer_refreshes_without_overlap() {
    let harness = Harness::new(|call| ok(&[("GEN", call.to_string().as_str())]).after(Duration::from_millis(200)));
    let provider = harness
        .source()
        .reload_after(Duration::from_millis(50))
        .build()
        .unwrap();
    let mut events = provider.subscribe();

    provider.load().await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert!(harness.calls() >= 3);
    assert_eq!(harness.max_active(), 1);
    assert!(matches!(events.try_recv(), Ok(ProviderEvent::Reloaded { .. })));
    assert!(provider.snapshot().generation() >= 2);
}

#[tokio::test(start_paused = true)]
async fn successful_refresh_publishes_and_notifies() {
    let harness = Harness::new(|call| match call {
        0 => ok(&[("A", "1"), ("B", "2")]),
        _ => ok(&[("C", "3")]),
    });
    let provider = harness.source().build().unwrap();
    provider.load().await.unwrap();
    let mut events = provider.subscribe();

    let outcome = provider.refresh().await;

    assert!(matches!(outcome, RefreshOutcome::Reloaded { generation: 2 }));
    assert_eq!(provider.snapshot().as_map(), &map(&[("C", "3")]));
    match events.try_recv() {
        Ok(ProviderEvent::Reloaded {
            generation,
            key_count,
        }) => {
            assert_eq!(generation, 2);
            assert_eq!(key_count, 1);
        }
        other => panic!("expected reload event, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn required_refresh_failure_is_reported_and_keeps_snapshot() {
    let harness = Harness::new(|call| match call {
        0 => ok(&[("A", "1")]),
        _ => fail(),
    });
    let provider = harness.source().build().unwrap();
    provider.load().await.unwrap();
    let mut events = provider.subscribe();

    let started = Instant::now();
    let outcome = provider.refresh().await;

    assert!(matches!(outcome, RefreshOutcome::Failed(_)));
    assert!(started.elapsed() < FLOOR);
    assert!(matches!(events.try_recv(), Ok(ProviderEvent::RefreshFailed(_))));
    assert_eq!(provider.get("A").as_deref(), Some("1"));
}

#[tokio::test(start_paused = true)]
async fn optional_refresh_failure_is_silent() {
    let harness = Harness::new(|call| match call {
        0 => ok(&[("A", "1")]),
        _ => fail(),
    });
    let provider = harness.source().optional(true).build().unwrap();
    provider.load().await.unwrap();
    let mut events = provider.subscribe();

    assert!(matches!(provider.refresh().await, RefreshOutcome::Failed(_)));
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(provider.snapshot().as_map(), &map(&[("A", "1")]));
}

#[tokio::test(start_paused = true)]
async fn refresh_timeout_is_not_floored() {
    let harness = Harness::new(|call| match call {
        0 => ok(&[("A", "1")]),
        _ => hang(),
    });
    let provider = harness
        .source()
        .timeout(Duration::from_millis(100))
        .build()
        .unwrap();
    provider.load().await.unwrap();

    let started = Instant::now();
    match provider.refresh().await {
        RefreshOutcome::Failed(err) => assert!(err.is_timeout()),
        other => panic!("expected timeout, got {other:?}"),
    }
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(provider.refresh_state(), infisical_config::provider::RefreshState::Idle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn readers_never_see_mixed_generations() {
    let harness = Harness::new(|call| {
        let tag = call.to_string();
        let tag = tag.as_str();
        ok(&[("A", tag), ("B", tag), ("C", tag), ("D", tag)])
    });
    let provider = Arc::new(harness.source().build().unwrap());
    provider.load().await.unwrap();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let provider = Arc::clone(&provider);
            tokio::spawn(async move {
                let mut last_generation = 0;
                for _ in 0..2_000 {
                    let snapshot = provider.snapshot();
                    let values: Vec<&str> = ["A", "B", "C", "D"]
                        .iter()
                        .filter_map(|k| snapshot.get(k))
                        .collect();
                    assert_eq!(values.len(), 4);
                    assert!(values.iter().all(|v| *v == values[0]));
                    assert!(snapshot.generation() >= last_generation);
                    last_generation = snapshot.generation();
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    for _ in 0..50 {
        provider.refresh().await;
    }
    for reader in join_all(readers).await {
        reader.unwrap();
    }
}

// ============================================================================
// Disposal
// ============================================================================

#[tokio::test(start_paused = true)]
async fn dispose_without_load_builds_nothing() {
    let harness = Harness::new(|_| ok(&[]));
    let provider = harness
        .source()
        .reload_after(Duration::from_secs(1))
        .build()
        .unwrap();

    provider.dispose();
    provider.dispose();

    assert!(provider.is_disposed());
    assert_eq!(harness.constructed(), 0);
    assert_eq!(harness.closed(), 0);
}

#[tokio::test(start_paused = true)]
async fn dispose_closes_client_once() {
    let harness = Harness::new(|_| ok(&[("A", "1")]));
    let provider = harness.source().build().unwrap();
    provider.load().await.unwrap();

    provider.dispose();
    provider.dispose();
    drop(provider);

    assert_eq!(harness.closed(), 1);
}

#[tokio::test(start_paused = true)]
async fn dispose_stops_timer() {
    let harness = Harness::new(|_| ok(&[("A", "1")]));
    let provider = harness
        .source()
        .reload_after(Duration::from_millis(50))
        .build()
        .unwrap();
    provider.load().await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    provider.dispose();
    tokio::task::yield_now().await;
    let calls_at_dispose = harness.calls();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(calls_at_dispose >= 2);
    assert_eq!(harness.calls(), calls_at_dispose);
}

#[tokio::test(start_paused = true)]
async fn dropping_provider_stops_timer() {
    let harness = Harness::new(|_| ok(&[("A", "1")]));
    let provider: RefreshProvider = harness
        .source()
        .reload_after(Duration::from_millis(50))
        .build()
        .unwrap();
    provider.load().await.unwrap();
    drop(provider);
    tokio::task::yield_now().await;

    let calls_at_drop = harness.calls();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(harness.calls(), calls_at_drop);
    assert_eq!(harness.closed(), 1);
}

#[tokio::test(start_paused = true)]
async fn load_after_dispose_builds_nothing() {
    let harness = Harness::new(|_| ok(&[("A", "1")]));
    let provider = harness.source().optional(true).build().unwrap();

    provider.dispose();
    let started = Instant::now();
    let err = provider.load().await.unwrap_err();
    drop(provider);

    assert!(err.is_disposed());
    assert!(started.elapsed() < FLOOR);
    assert_eq!(harness.constructed(), 0);
    assert_eq!(harness.calls(), 0);
    assert_eq!(harness.closed(), harness.constructed());
}

#[tokio::test(start_paused = true)]
async fn dispose_fences_in_flight_refresh() {
    let harness = Harness::new(|call| {
        if call == 0 {
            ok(&[("GEN", "initial")])
        } else {
            ok(&[("GEN", "late")]).after(Duration::from_secs(1))
        }
    });
    let provider = harness
        .source()
        .reload_after(Duration::from_millis(100))
        .build()
        .unwrap();
    provider.load().await.unwrap();
    let generation = provider.snapshot().generation();
    let mut events = provider.subscribe();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(harness.calls() >= 2, "a reload should be in flight");

    provider.dispose();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(provider.snapshot().generation(), generation);
    assert_eq!(provider.get("GEN").as_deref(), Some("initial"));
    assert_eq!(harness.closed(), 1);
    assert_eq!(harness.source.active.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn disposed_load_in_flight_returns_promptly() {
    let harness = Harness::new(|_| hang());
    let provider = Arc::new(harness.source().timeout(Duration::from_secs(60)).build().unwrap());

    let loading = tokio::spawn({
        let provider = Arc::clone(&provider);
        async move { provider.load().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let started = Instant::now();
    provider.dispose();
    let result = loading.await.unwrap();

    assert!(matches!(result, Err(ProviderError::Disposed)));
    assert!(started.elapsed() < FLOOR);
    assert!(provider.snapshot().is_empty());
    assert_eq!(harness.closed(), 1);
}
