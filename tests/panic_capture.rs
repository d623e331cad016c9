// tests/panic_capture.rs
// The panic hook turns a panic into a stored fatal event

mod test_helpers;

use std::time::Duration;

use logwarden::Severity;
use logwarden::capture::{install_panic_hook, spawn_capture_worker};
use test_helpers::{create_test_app_state, test_config};

#[tokio::test]
async fn test_panic_recorded_as_fatal() {
    let (state, transport) = create_test_app_state(test_config()).await;
    let (handle, _worker) = spawn_capture_worker(state.engine.clone());
    install_panic_hook(handle);

    let joined = std::thread::spawn(|| {
        panic!("checkout invariant broken");
    })
    .join();
    assert!(joined.is_err());

    let mut rows = Vec::new();
    for _ in 0..100 {
        rows = state.store.list(true).await.unwrap();
        // The alert goes out after the row is written
        if !rows.is_empty() && transport.count() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.severity, Severity::Fatal);
    assert!(row.source_file.as_deref().unwrap_or_default().ends_with("panic_capture.rs"));
    assert_eq!(
        state.engine.decrypt_event(row).to_string(),
        "checkout invariant broken"
    );
    assert_eq!(transport.count(), 1);
}
