// tests/concurrent_upsert.rs
// Many writers against one file-backed database

mod test_helpers;

use std::sync::Arc;

use logwarden::store::connect;
use logwarden::{AppState, ErrorStore, Severity};
use test_helpers::{RecordingTransport, test_config};

const WRITERS: usize = 24;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_records_share_one_row() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let url = format!("sqlite://{}", dir.path().join("errors.db").display());

    let pool = connect(&url, 5).await.expect("open file database");
    let transport = Arc::new(RecordingTransport::default());
    let state = Arc::new(AppState::assemble(test_config(), ErrorStore::new(pool), transport.clone()));

    let mut handles = Vec::new();
    for _ in 0..WRITERS {
        let state = state.clone();
        handles.push(tokio::spawn(async move {
            state
                .engine
                .record_message("deadlock detected", Severity::Error, Some("db.ext"), Some(120))
                .await
                .expect("record under contention")
                .expect("logging enabled")
        }));
    }

    let mut new_count = 0;
    let mut counts = Vec::new();
    for handle in handles {
        let outcome = handle.await.unwrap();
        if outcome.is_new {
            new_count += 1;
        }
        counts.push(outcome.occurrence_count);
    }

    assert_eq!(new_count, 1);
    counts.sort_unstable();
    assert_eq!(counts, (1..=WRITERS as i64).collect::<Vec<_>>());

    let rows = state.store.list(true).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].occurrence_count, WRITERS as i64);
    assert_eq!(transport.count(), 1);
}
