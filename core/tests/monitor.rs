use clipstack::{
    ClipboardMonitor, HistoryStore, MemoryClipboard, MonitorConfig, StoreConfig, StoreEvent,
};
use std::sync::Arc;
use std::time::Duration;

fn setup() -> (ClipboardMonitor, MemoryClipboard, Arc<HistoryStore>) {
    let store = Arc::new(HistoryStore::in_memory(StoreConfig::default()).unwrap());
    let clipboard = MemoryClipboard::new();
    let monitor = ClipboardMonitor::new(
        Arc::clone(&store),
        Box::new(clipboard.clone()),
        MonitorConfig::default(),
    );
    (monitor, clipboard, store)
}

#[tokio::test]
async fn background_polling_records_copies() {
    let (monitor, clipboard, store) = setup();
    let mut events = store.subscribe();
    monitor.start(Duration::from_millis(10));
    assert!(monitor.is_running());

    clipboard.copy_text("from the timer");
    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, StoreEvent::Added(item) if item.primary_text == "from the timer"));

    monitor.stop().await;
    assert!(!monitor.is_running());
}

#[tokio::test]
async fn nothing_is_recorded_after_stop() {
    let (monitor, clipboard, store) = setup();
    monitor.start(Duration::from_millis(5));
    monitor.stop().await;

    clipboard.copy_text("too late");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(store.is_empty());
}

#[tokio::test]
async fn restart_keeps_change_tracking() {
    let (monitor, clipboard, store) = setup();
    monitor.start(Duration::from_millis(10));

    clipboard.copy_text("once");
    for _ in 0..500 {
        if !store.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(store.len(), 1);

    monitor.restart(Duration::from_millis(5));
    tokio::time::sleep(Duration::from_millis(50)).await;
    monitor.stop().await;

    let item = &store.ordered()[0];
    assert_eq!(item.copy_count, 1);
}
