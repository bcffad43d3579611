use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::sync::Mutex;

use flat_core::{
    CycleOrchestrator, CyclePhase, FetchError, Listing, MemoryBackend, NotificationSink,
    NoveltyState, NoveltyTracker, Source, SourceFetcher, StateBackend, StoreError,
};

/// Serves one scripted response per call; repeats the last one when exhausted.
struct ScriptedFetcher {
    source: Source,
    responses: Mutex<VecDeque<Result<Vec<Listing>, String>>>,
}

impl ScriptedFetcher {
    fn new(source: Source, responses: Vec<Result<Vec<Listing>, String>>) -> Arc<dyn SourceFetcher> {
        Arc::new(Self {
            source,
            responses: Mutex::new(responses.into()),
        })
    }
}

#[async_trait]
impl SourceFetcher for ScriptedFetcher {
    fn source(&self) -> Source {
        self.source
    }

    async fn fetch(&self) -> Result<Vec<Listing>, FetchError> {
        let mut responses = self.responses.lock().await;
        let next = if responses.len() > 1 {
            responses.pop_front()
        } else {
            responses.front().cloned()
        };
        match next.unwrap_or_else(|| Ok(Vec::new())) {
            Ok(listings) => Ok(listings),
            Err(reason) => Err(FetchError::Parse(reason)),
        }
    }
}

#[derive(Default)]
struct RecordingSink {
    broadcasts: Mutex<Vec<Vec<Listing>>>,
    no_updates: Mutex<Vec<u64>>,
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn broadcast(&self, listings: &[Listing]) {
        self.broadcasts.lock().await.push(listings.to_vec());
    }

    async fn notify_no_updates(&self, empty_cycles: u64) {
        self.no_updates.lock().await.push(empty_cycles);
    }
}

/// Rejects exactly one save, the `fail_on`-th (1-based); every other save succeeds.
struct FailingNthSave {
    inner: MemoryBackend,
    attempts: AtomicUsize,
    fail_on: usize,
}

impl FailingNthSave {
    fn new(state: NoveltyState, fail_on: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryBackend::with_state(state),
            attempts: AtomicUsize::new(0),
            fail_on,
        })
    }
}

#[async_trait]
impl StateBackend for FailingNthSave {
    async fn load(&self) -> NoveltyState {
        self.inner.load().await
    }

    async fn save(&self, state: &NoveltyState) -> Result<(), StoreError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt == self.fail_on {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )));
        }
        self.inner.save(state).await
    }
}

fn warm_state() -> NoveltyState {
    let mut state = NoveltyState::default();
    for source in Source::ALL {
        state
            .seen_ids_by_source
            .insert(source, ["old".to_string()].into_iter().collect());
    }
    state
}

fn listing(source: Source, id: &str) -> Listing {
    Listing::new(source, id, format!("{}/item/{id}", source.base_url()))
}

fn dated(source: Source, id: &str, created_at: DateTime<Utc>) -> Listing {
    listing(source, id).with_created_at(created_at)
}

fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 10, d, 9, 0, 0).unwrap()
}

fn orchestrator(
    tracker: &NoveltyTracker,
    fetchers: Vec<Arc<dyn SourceFetcher>>,
    sink: &Arc<RecordingSink>,
) -> CycleOrchestrator {
    CycleOrchestrator::new(tracker.clone(), fetchers, sink.clone())
}

async fn warm_tracker(backend: &Arc<MemoryBackend>) -> NoveltyTracker {
    let tracker = NoveltyTracker::load(backend.clone()).await;
    for source in Source::ALL {
        tracker.mark_seen(source, ["old"]).await.unwrap();
    }
    tracker
}

#[tokio::test]
async fn cold_start_records_baseline_without_notifying() {
    let backend = Arc::new(MemoryBackend::new());
    let tracker = NoveltyTracker::load(backend.clone()).await;
    let sink = Arc::new(RecordingSink::default());
    let kufar = ScriptedFetcher::new(
        Source::Kufar,
        vec![Ok(vec![
            dated(Source::Kufar, "1", day(1)),
            dated(Source::Kufar, "2", day(3)),
            listing(Source::Kufar, "3"),
        ])],
    );
    let orch = orchestrator(&tracker, vec![kufar], &sink);

    let report = orch.run_cycle().await.unwrap();

    assert_eq!(report.phase, CyclePhase::Bootstrap);
    assert!(!report.has_new_listings());
    assert_eq!(report.empty_cycles, 0);
    assert_eq!(tracker.seen_count(Source::Kufar).await, 3);
    assert_eq!(tracker.last_date(Source::Kufar).await, Some(day(3)));
    assert!(sink.broadcasts.lock().await.is_empty());
    assert!(sink.no_updates.lock().await.is_empty());
    let persisted = backend.snapshot().await.unwrap();
    assert_eq!(persisted.empty_cycles, 0);
    assert_eq!(persisted.seen_ids_by_source[&Source::Kufar].len(), 3);
}

#[tokio::test]
async fn bootstrap_then_steady_state_reports_only_new_ids() {
    let backend = Arc::new(MemoryBackend::new());
    let tracker = NoveltyTracker::load(backend.clone()).await;
    let sink = Arc::new(RecordingSink::default());
    let realt = ScriptedFetcher::new(
        Source::Realt,
        vec![
            Ok(vec![listing(Source::Realt, "a"), listing(Source::Realt, "b")]),
            Ok(vec![
                listing(Source::Realt, "c"),
                listing(Source::Realt, "a"),
                listing(Source::Realt, "b"),
            ]),
        ],
    );
    let orch = orchestrator(&tracker, vec![realt], &sink);

    assert_eq!(orch.run_cycle().await.unwrap().phase, CyclePhase::Bootstrap);
    let report = orch.run_cycle().await.unwrap();

    assert_eq!(report.phase, CyclePhase::Steady);
    let ids: Vec<_> = report.new_listings.iter().map(|l| l.id.as_str()).collect();
    assert_eq!(ids, ["c"]);
    assert_eq!(sink.broadcasts.lock().await.len(), 1);
}

#[tokio::test]
async fn failed_source_is_isolated() {
    let backend = Arc::new(MemoryBackend::new());
    let tracker = warm_tracker(&backend).await;
    tracker.increment_empty_cycle().await.unwrap();
    tracker.increment_empty_cycle().await.unwrap();
    let sink = Arc::new(RecordingSink::default());
    let a = ScriptedFetcher::new(
        Source::Kufar,
        vec![Ok(vec![listing(Source::Kufar, "n1"), listing(Source::Kufar, "n2")])],
    );
    let b = ScriptedFetcher::new(Source::Domovita, vec![Err("connection reset".into())]);
    let orch = orchestrator(&tracker, vec![a, b], &sink);

    let report = orch.run_cycle().await.unwrap();

    let ids: Vec<_> = report.new_listings.iter().map(|l| l.id.as_str()).collect();
    assert_eq!(ids, ["n1", "n2"]);
    assert_eq!(report.empty_cycles, 0);
    assert_eq!(tracker.empty_cycles().await, 0);
    assert_eq!(tracker.seen_count(Source::Domovita).await, 1);
    let failed = report
        .sources
        .iter()
        .find(|r| r.source == Source::Domovita)
        .unwrap();
    assert!(failed.error.as_deref().unwrap().contains("connection reset"));
    let broadcasts = sink.broadcasts.lock().await;
    assert_eq!(broadcasts.len(), 1);
    assert_eq!(broadcasts[0].len(), 2);
}

#[tokio::test]
async fn heartbeat_fires_every_fifth_empty_cycle() {
    let backend = Arc::new(MemoryBackend::new());
    let tracker = warm_tracker(&backend).await;
    let sink = Arc::new(RecordingSink::default());
    let kufar = ScriptedFetcher::new(Source::Kufar, vec![Ok(vec![listing(Source::Kufar, "old")])]);
    let orch = orchestrator(&tracker, vec![kufar], &sink);

    for expected in 1..=4u64 {
        let report = orch.run_cycle().await.unwrap();
        assert_eq!(report.empty_cycles, expected);
        assert!(sink.no_updates.lock().await.is_empty());
    }
    orch.run_cycle().await.unwrap();
    assert_eq!(*sink.no_updates.lock().await, vec![5]);

    for _ in 0..5 {
        orch.run_cycle().await.unwrap();
    }
    assert_eq!(*sink.no_updates.lock().await, vec![5, 10]);
    assert!(sink.broadcasts.lock().await.is_empty());
    assert_eq!(backend.snapshot().await.unwrap().empty_cycles, 10);
}

#[tokio::test]
async fn stale_listing_with_unseen_id_is_suppressed() {
    let backend = Arc::new(MemoryBackend::new());
    let tracker = warm_tracker(&backend).await;
    tracker
        .update_last_date(Source::Realt, Some(day(10)))
        .await
        .unwrap();
    let sink = Arc::new(RecordingSink::default());
    let realt = ScriptedFetcher::new(
        Source::Realt,
        vec![Ok(vec![
            dated(Source::Realt, "resurfaced", day(10) - Duration::days(1)),
            dated(Source::Realt, "same-day", day(10)),
        ])],
    );
    let orch = orchestrator(&tracker, vec![realt], &sink);

    let report = orch.run_cycle().await.unwrap();

    let ids: Vec<_> = report.new_listings.iter().map(|l| l.id.as_str()).collect();
    assert_eq!(ids, ["same-day"]);
    assert!(tracker.is_new(Source::Realt, "resurfaced", None).await);
}

#[tokio::test]
async fn batch_max_timestamp_advances_high_water_mark_once() {
    let backend = Arc::new(MemoryBackend::new());
    let tracker = warm_tracker(&backend).await;
    tracker
        .update_last_date(Source::Kufar, Some(day(5)))
        .await
        .unwrap();
    let sink = Arc::new(RecordingSink::default());
    // Both are newer than the mark; the earlier one must not be locked out by the later one.
    let kufar = ScriptedFetcher::new(
        Source::Kufar,
        vec![Ok(vec![
            dated(Source::Kufar, "later", day(8)),
            dated(Source::Kufar, "earlier", day(6)),
        ])],
    );
    let orch = orchestrator(&tracker, vec![kufar], &sink);

    let report = orch.run_cycle().await.unwrap();

    assert_eq!(report.new_listings.len(), 2);
    assert_eq!(tracker.last_date(Source::Kufar).await, Some(day(8)));
}

#[tokio::test]
async fn duplicate_ids_in_one_fetch_count_once() {
    let backend = Arc::new(MemoryBackend::new());
    let tracker = warm_tracker(&backend).await;
    let sink = Arc::new(RecordingSink::default());
    let domovita = ScriptedFetcher::new(
        Source::Domovita,
        vec![Ok(vec![
            listing(Source::Domovita, "x").with_title("first"),
            listing(Source::Domovita, "x").with_title("second"),
            listing(Source::Domovita, "y"),
        ])],
    );
    let orch = orchestrator(&tracker, vec![domovita], &sink);

    let report = orch.run_cycle().await.unwrap();

    assert_eq!(report.new_listings.len(), 2);
    assert_eq!(report.new_listings[0].title.as_deref(), Some("first"));
    assert_eq!(report.sources[0].fetched, 3);
    assert_eq!(report.sources[0].fresh, 2);
}

#[tokio::test]
async fn failed_source_during_bootstrap_keeps_empty_baseline() {
    let backend = Arc::new(MemoryBackend::new());
    let tracker = NoveltyTracker::load(backend.clone()).await;
    let sink = Arc::new(RecordingSink::default());
    let kufar = ScriptedFetcher::new(Source::Kufar, vec![Ok(vec![listing(Source::Kufar, "1")])]);
    let realt = ScriptedFetcher::new(Source::Realt, vec![Err("timeout".into())]);
    let orch = orchestrator(&tracker, vec![kufar, realt], &sink);

    let report = orch.run_cycle().await.unwrap();

    assert_eq!(report.phase, CyclePhase::Bootstrap);
    let snapshot = tracker.snapshot().await;
    assert!(snapshot.seen_ids_by_source.contains_key(&Source::Kufar));
    assert!(!snapshot.seen_ids_by_source.contains_key(&Source::Realt));
}

#[tokio::test]
async fn all_sources_failing_keeps_bootstrapping() {
    let backend = Arc::new(MemoryBackend::new());
    let tracker = NoveltyTracker::load(backend.clone()).await;
    let sink = Arc::new(RecordingSink::default());
    let kufar = ScriptedFetcher::new(Source::Kufar, vec![Err("dns".into())]);
    let orch = orchestrator(&tracker, vec![kufar], &sink);

    assert_eq!(orch.run_cycle().await.unwrap().phase, CyclePhase::Bootstrap);
    assert_eq!(orch.run_cycle().await.unwrap().phase, CyclePhase::Bootstrap);
    assert_eq!(tracker.empty_cycles().await, 0);
}

#[tokio::test]
async fn persistence_failure_aborts_cycle() {
    let mut state = NoveltyState::default();
    state
        .seen_ids_by_source
        .insert(Source::Kufar, ["old".to_string()].into_iter().collect());
    let backend = Arc::new(MemoryBackend::with_state(state));
    let tracker = NoveltyTracker::load(backend.clone()).await;
    let sink = Arc::new(RecordingSink::default());
    let kufar = ScriptedFetcher::new(Source::Kufar, vec![Ok(vec![listing(Source::Kufar, "new")])]);
    let orch = orchestrator(&tracker, vec![kufar], &sink);

    backend.set_fail_writes(true);
    assert!(orch.run_cycle().await.is_err());
    assert!(sink.broadcasts.lock().await.is_empty());

    backend.set_fail_writes(false);
    let report = orch.run_cycle().await.unwrap();
    assert_eq!(report.new_listings.len(), 1, "unpersisted listing is retried");
}

#[tokio::test]
async fn recorded_listings_are_sent_when_a_later_source_fails_to_persist() {
    // save #1 records kufar, save #2 (realt) is rejected
    let backend = FailingNthSave::new(warm_state(), 2);
    let tracker = NoveltyTracker::load(backend.clone()).await;
    let sink = Arc::new(RecordingSink::default());
    let kufar = ScriptedFetcher::new(Source::Kufar, vec![Ok(vec![listing(Source::Kufar, "k1")])]);
    let realt = ScriptedFetcher::new(Source::Realt, vec![Ok(vec![listing(Source::Realt, "r1")])]);
    let orch = orchestrator(&tracker, vec![kufar, realt], &sink);

    let err = orch.run_cycle().await.unwrap_err();
    assert!(err.to_string().contains("disk full"));
    {
        let broadcasts = sink.broadcasts.lock().await;
        assert_eq!(broadcasts.len(), 1);
        let ids: Vec<_> = broadcasts[0].iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, ["k1"]);
    }
    assert!(!orch.tracker().is_new(Source::Kufar, "k1", None).await);
    assert!(orch.tracker().is_new(Source::Realt, "r1", None).await);

    let report = orch.run_cycle().await.unwrap();
    let ids: Vec<_> = report.new_listings.iter().map(|l| l.id.as_str()).collect();
    assert_eq!(ids, ["r1"]);

    let sent: Vec<String> = sink
        .broadcasts
        .lock()
        .await
        .iter()
        .flatten()
        .map(|l| format!("{}:{}", l.source, l.id))
        .collect();
    assert_eq!(sent, ["kufar:k1", "realt:r1"]);
}

#[tokio::test]
async fn recorded_listings_are_sent_when_counter_reset_fails() {
    let mut state = warm_state();
    state.empty_cycles = 3;
    // save #1 records the listing, save #2 (counter reset) is rejected
    let backend = FailingNthSave::new(state, 2);
    let tracker = NoveltyTracker::load(backend.clone()).await;
    let sink = Arc::new(RecordingSink::default());
    let domovita = ScriptedFetcher::new(
        Source::Domovita,
        vec![Ok(vec![listing(Source::Domovita, "d1")])],
    );
    let orch = orchestrator(&tracker, vec![domovita], &sink);

    assert!(orch.run_cycle().await.is_err());
    assert_eq!(sink.broadcasts.lock().await.len(), 1);
    assert!(!tracker.is_new(Source::Domovita, "d1", None).await);
    assert_eq!(tracker.empty_cycles().await, 3);
}
