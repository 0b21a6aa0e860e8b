use std::{
    fs,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use rootrace_store::{
    store_path_for, LockManager, LogEntry, LogStore, LogStoreEvent, ReadMode, StoreCodec,
    WatcherConfig,
};
use serde_json::{json, Value};

static WORKSPACE_COUNTER: AtomicU64 = AtomicU64::new(1);

struct ScratchWorkspace {
    root: PathBuf,
}

impl ScratchWorkspace {
    fn new(label: &str) -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos())
            .unwrap_or_default();
        let root = std::env::temp_dir().join(format!(
            "rootrace-{label}-{}-{nanos}-{}",
            std::process::id(),
            WORKSPACE_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        fs::create_dir_all(&root).expect("create scratch workspace");
        Self { root }
    }

    fn store_path(&self) -> PathBuf {
        store_path_for(&self.root)
    }
}

impl Drop for ScratchWorkspace {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}

// Each "process" gets its own lock manager, exactly like two real processes.
fn process_store(workspace: &ScratchWorkspace, capacity: usize) -> Arc<LogStore> {
    Arc::new(
        LogStore::new(
            workspace.store_path(),
            capacity,
            StoreCodec::plain(),
            Arc::new(LockManager::new()),
        )
        .expect("store"),
    )
}

#[tokio::test]
async fn integration_alternating_processes_never_lose_sequential_appends() {
    let workspace = ScratchWorkspace::new("alternating");
    let host = process_store(&workspace, 1000);
    let query = process_store(&workspace, 1000);

    for n in 0..10 {
        let writer = if n % 2 == 0 { &host } else { &query };
        writer
            .add(LogEntry::new("H1", format!("step-{n}"), json!({ "n": n })))
            .await
            .expect("add");
    }

    let from_host = host.query(ReadMode::Authoritative).await;
    let from_query = query.query(ReadMode::Authoritative).await;
    assert_eq!(from_host, from_query);
    let steps: Vec<String> = from_host.into_iter().map(|entry| entry.context).collect();
    let expected: Vec<String> = (0..10).map(|n| format!("step-{n}")).collect();
    assert_eq!(steps, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn integration_readers_never_observe_a_torn_store_file() {
    let workspace = ScratchWorkspace::new("torn");
    let path = workspace.store_path();
    let writers: Vec<Arc<LogStore>> = (0..3).map(|_| process_store(&workspace, 50)).collect();
    let done = Arc::new(AtomicBool::new(false));

    let reader = {
        let path = path.clone();
        let done = Arc::clone(&done);
        tokio::task::spawn_blocking(move || {
            let mut observed = 0_usize;
            while !done.load(Ordering::SeqCst) {
                if let Ok(raw) = fs::read_to_string(&path) {
                    let parsed: Value = serde_json::from_str(&raw)
                        .unwrap_or_else(|error| panic!("torn read ({error}): {raw:?}"));
                    assert!(parsed.is_array());
                    observed += 1;
                }
            }
            observed
        })
    };

    let mut handles = Vec::new();
    for (index, writer) in writers.iter().enumerate() {
        let writer = Arc::clone(writer);
        handles.push(tokio::spawn(async move {
            let source = format!("H{}", index + 1);
            for n in 0..40 {
                writer
                    .add(LogEntry::new(source.as_str(), format!("w{index}-{n}"), json!(n)))
                    .await
                    .expect("add");
            }
        }));
    }
    for handle in handles {
        handle.await.expect("writer join");
    }
    done.store(true, Ordering::SeqCst);
    let observed = reader.await.expect("reader join");
    assert!(observed > 0, "reader should have seen the file at least once");

    let final_view = writers[0].query_authoritative().await;
    assert!(!final_view.is_empty());
    assert!(final_view.len() <= 50);
}

#[tokio::test]
async fn integration_watching_host_converges_on_query_process_writes() {
    let workspace = ScratchWorkspace::new("watch");
    let host = process_store(&workspace, 100);
    let query = process_store(&workspace, 100);
    let updates = Arc::new(Mutex::new(Vec::<usize>::new()));
    {
        let updates = Arc::clone(&updates);
        host.subscribe(move |event| {
            if let LogStoreEvent::LogsUpdated(entries) = event {
                updates.lock().expect("updates").push(entries.len());
            }
        });
    }
    let mut watcher = host
        .start_watcher(WatcherConfig {
            poll_interval: Duration::from_millis(25),
            debounce: Duration::from_millis(100),
        })
        .expect("watcher");

    query
        .add(LogEntry::with_timestamp(
            "2024-05-01T10:00:00.000Z",
            "H2",
            "from-query-process",
            json!(null),
        ))
        .await
        .expect("add");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while host.count() == 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    watcher.stop().await;

    let local = host.query_by_source("H2", ReadMode::Local).await;
    assert_eq!(local.len(), 1);
    assert_eq!(local[0].context, "from-query-process");
    assert_eq!(*updates.lock().expect("updates"), [1]);
}

#[tokio::test]
async fn integration_clear_in_one_process_is_seen_by_the_other() {
    let workspace = ScratchWorkspace::new("clear");
    let host = process_store(&workspace, 100);
    let query = process_store(&workspace, 100);
    host.add(LogEntry::new("H1", "before-clear", json!(null)))
        .await
        .expect("add");
    assert_eq!(query.query_authoritative().await.len(), 1);

    query.clear().await.expect("clear");
    assert_eq!(host.count(), 1, "local view is stale until reloaded");
    assert!(host.query_authoritative().await.is_empty());
    assert_eq!(host.count(), 0);
}
