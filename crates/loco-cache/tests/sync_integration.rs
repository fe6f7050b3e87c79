// End-to-end tests: source -> normalizer -> store -> query
// Run with: cargo test -p loco-cache --test sync_integration

use async_trait::async_trait;
use loco_cache::store::SqliteStore;
use loco_cache::{
    CacheStore, LocoKey, MemoryStore, QueryConfig, QueryService, SheetGrid, SheetSource,
    SourceError, StaticSource, SyncConfig, SyncEngine, SyncError, SyncOutcome,
};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};

const FAILURE_HEADER: &[&str] = &[
    "LOCO No. ",
    "Date Failed ",
    "ICMS/ Message",
    "MU with",
    "Div",
    "Rly",
    "Brief Message",
    "Cause of Failure",
    "Component",
    "System",
];

fn key(raw: &str) -> LocoKey {
    LocoKey::parse(raw).unwrap()
}

/// Three locos; 27865 has two detail fields, one schedule and no failures.
async fn seed_fleet(source: &StaticSource) {
    source
        .set_sheet(
            "Loco_list",
            StaticSource::grid(&[
                &["Loco No.", "Type", "Shed", "Make"],
                &["27865", "WAG7", "BIA", "CLW"],
                &["27866", "WAG7", "BIA", "CLW"],
                &["31200", "WAG9", "TKD", "CLW"],
            ]),
        )
        .await;
    source
        .set_sheet(
            "Loco_Schedules",
            StaticSource::grid(&[
                &["Loco No. ", "Incoming Date ", "Sch ", "Outgoing Date "],
                &["27865", "10-01-2024", "IA", "12-01-2024"],
                &["31200", "2024-02-01", "IB", ""],
            ]),
        )
        .await;
    source
        .set_sheet(
            "Traction_failures",
            StaticSource::grid(&[
                FAILURE_HEADER,
                &["31200", "05/03/2024", "M-1", "", "BSP", "SECR", "TM flash", "Insulation", "TM", "Traction"],
            ]),
        )
        .await;
    source
        .set_sheet(
            "WAG7_Modifications",
            StaticSource::grid(&[&["Loco No.", "Type", "Cab AC"], &["27866", "WAG7", "Fitted"]]),
        )
        .await;
}

fn engine(source: Arc<dyn SheetSource>, store: Arc<dyn CacheStore>) -> Arc<SyncEngine> {
    Arc::new(SyncEngine::new(SyncConfig::new("sheet-id"), source, store))
}

#[tokio::test]
async fn test_lookup_after_sync() {
    let source = StaticSource::new();
    seed_fleet(&source).await;
    let store = Arc::new(MemoryStore::new());
    let engine = engine(Arc::new(source), store.clone());

    engine.trigger_sync().await.unwrap();
    let query = QueryService::new(store, QueryConfig::default());

    let summary = query.lookup("27865").await.unwrap().unwrap();
    assert_eq!(summary.details.len(), 2);
    assert_eq!(summary.details[0].field, "Shed");
    assert_eq!(summary.schedules.len(), 1);
    assert_eq!(summary.failures.len(), 0);

    let modified = query.lookup("27866").await.unwrap().unwrap();
    assert_eq!(modified.modifications.len(), 1);

    assert!(query.lookup("99999").await.unwrap().is_none());
}

#[tokio::test]
async fn test_suggest_after_sync() {
    let source = StaticSource::new();
    seed_fleet(&source).await;
    let store = Arc::new(MemoryStore::new());
    engine(Arc::new(source), store.clone()).trigger_sync().await.unwrap();

    let query = QueryService::new(store, QueryConfig::default());
    assert_eq!(query.suggest("278", 10).await.unwrap(), vec![key("27865"), key("27866")]);
    assert!(query.suggest("99", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_one_malformed_row_does_not_fail_the_sheet() {
    let source = StaticSource::new();
    seed_fleet(&source).await;

    let mut rows = vec![vec!["Loco No.".to_string(), "Shed".to_string()]];
    for n in 0..10 {
        let loco = if n == 4 { String::new() } else { format!("3000{n}") };
        rows.push(vec![loco, "BIA".to_string()]);
    }
    source.set_sheet("Loco_list", rows).await;

    let store = Arc::new(MemoryStore::new());
    let outcome = engine(Arc::new(source), store.clone()).trigger_sync().await.unwrap();

    let SyncOutcome::Committed(report) = outcome else {
        panic!("expected a committed cycle");
    };
    assert_eq!(report.counts.details, 9);
    assert_eq!(report.skipped.details, 1);
    assert!(store.snapshot().entry(&key("30003")).is_some());
}

#[tokio::test]
async fn test_unreachable_source_keeps_previous_generation() {
    let source = StaticSource::new();
    seed_fleet(&source).await;
    let store = Arc::new(MemoryStore::new());
    let engine = engine(Arc::new(source.clone()), store.clone());

    engine.trigger_sync().await.unwrap();
    let before = engine.status().await.unwrap();

    source.set_unavailable(true);
    let err = engine.trigger_sync().await.unwrap_err();
    assert!(matches!(err, SyncError::Source(SourceError::Unavailable { .. })));

    let after = engine.status().await.unwrap();
    assert_eq!(after.last_updated, before.last_updated);
    assert_eq!(after.last_success, before.last_success);
    assert_eq!(after.counts, before.counts);
    assert!(after.last_failure.is_some());

    let query = QueryService::new(store, QueryConfig::default());
    assert!(query.lookup("27865").await.unwrap().is_some());
}

#[tokio::test]
async fn test_resync_of_unchanged_source_is_identical() {
    let source = StaticSource::new();
    seed_fleet(&source).await;
    let store = Arc::new(MemoryStore::new());
    let engine = engine(Arc::new(source), store.clone());

    engine.trigger_sync().await.unwrap();
    let first: Vec<_> = store
        .snapshot()
        .entries()
        .map(|(k, e)| (k.clone(), e.clone()))
        .collect();

    engine.trigger_sync().await.unwrap();
    let second: Vec<_> = store
        .snapshot()
        .entries()
        .map(|(k, e)| (k.clone(), e.clone()))
        .collect();

    assert_eq!(first, second);
}

/// Source whose fetches block until the gate opens
struct GatedSource {
    inner: StaticSource,
    started: Arc<Notify>,
    gate: watch::Receiver<bool>,
}

#[async_trait]
impl SheetSource for GatedSource {
    async fn fetch_sheet(&self, sheet_id: &str, sheet_name: &str) -> Result<SheetGrid, SourceError> {
        self.started.notify_one();
        let mut gate = self.gate.clone();
        gate.wait_for(|open| *open)
            .await
            .map(|_| ())
            .map_err(|e| SourceError::unavailable(sheet_name, e))?;
        self.inner.fetch_sheet(sheet_id, sheet_name).await
    }

    fn name(&self) -> &'static str {
        "gated"
    }
}

#[tokio::test]
async fn test_concurrent_triggers_run_one_cycle() {
    let inner = StaticSource::new();
    seed_fleet(&inner).await;
    let started = Arc::new(Notify::new());
    let (open_gate, gate) = watch::channel(false);

    let source = GatedSource {
        inner: inner.clone(),
        started: started.clone(),
        gate,
    };
    let engine = engine(Arc::new(source), Arc::new(MemoryStore::new()));

    let first = tokio::spawn({
        let engine = engine.clone();
        async move { engine.trigger_sync().await }
    });
    started.notified().await;

    let others = futures::future::join_all((0..8).map(|_| engine.trigger_sync())).await;
    for outcome in others {
        assert_eq!(outcome.unwrap(), SyncOutcome::AlreadyRunning);
    }

    open_gate.send(true).unwrap();
    let outcome = first.await.unwrap().unwrap();
    assert!(matches!(outcome, SyncOutcome::Committed(_)));

    // One fetch per configured sheet, all from the single cycle
    assert_eq!(inner.fetch_count(), 4);
}

/// Write one generation in which every record of 27865 carries `marker`.
async fn seed_marked(source: &StaticSource, marker: &str) {
    source
        .set_sheet(
            "Loco_list",
            StaticSource::grid(&[&["Loco No.", "Shed"], &["27865", marker]]),
        )
        .await;
    source
        .set_sheet(
            "Loco_Schedules",
            StaticSource::grid(&[&["Loco No.", "Sch"], &["27865", marker], &["27865", marker]]),
        )
        .await;
    source
        .set_sheet(
            "Traction_failures",
            StaticSource::grid(&[&["LOCO No.", "Brief Message"], &["27865", marker]]),
        )
        .await;
    source
        .set_sheet(
            "WAG7_Modifications",
            StaticSource::grid(&[&["Loco No.", "Cab AC"], &["27865", marker]]),
        )
        .await;
}

async fn assert_reads_never_mix_generations(store: Arc<dyn CacheStore>) {
    let source = StaticSource::new();
    seed_marked(&source, "gen-0").await;
    let engine = engine(Arc::new(source.clone()), store.clone());
    engine.trigger_sync().await.unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let query = QueryService::new(store, QueryConfig::default());

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let query = query.clone();
            let done = done.clone();
            tokio::spawn(async move {
                let mut reads = 0usize;
                loop {
                    let summary = query.lookup("27865").await.unwrap().unwrap();
                    let marker = &summary.details[0].value;
                    assert_eq!(summary.schedules.len(), 2);
                    assert!(summary.schedules.iter().all(|s| s.sch.as_ref() == Some(marker)));
                    assert_eq!(summary.failures[0].brief_message.as_ref(), Some(marker));
                    assert_eq!(&summary.modifications[0].value, marker);
                    reads += 1;
                    if done.load(Ordering::SeqCst) {
                        break reads;
                    }
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    for generation in 1..=20 {
        seed_marked(&source, &format!("gen-{generation}")).await;
        engine.trigger_sync().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    done.store(true, Ordering::SeqCst);

    for reader in readers {
        assert!(reader.await.unwrap() > 0);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_memory_store_reads_never_mix_generations() {
    assert_reads_never_mix_generations(Arc::new(MemoryStore::new())).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sqlite_store_reads_never_mix_generations() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("cache.db").display());
    let store = SqliteStore::connect(&url).await.unwrap();
    assert_reads_never_mix_generations(Arc::new(store)).await;
}
