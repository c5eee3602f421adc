//! Polls the system clipboard and feeds new copies into the history.

use crate::clipboard::SystemClipboard;
use crate::config::Config;
use crate::error::{ClipboardError, CopyError, StoreError};
use crate::item::{Candidate, ContentKind, ItemId, ItemRef, Representations, now_millis};
use crate::store::HistoryStore;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub enabled_types: Vec<ContentKind>,
    /// Substrings matched against the source application identifier.
    pub ignored_applications: Vec<String>,
    pub confidential_types: Vec<ContentKind>,
    /// Representations larger than this are dropped from the copy.
    pub max_clipboard_size: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for MonitorConfig {
    fn from(config: &Config) -> Self {
        Self {
            enabled_types: config.enabled_types.iter().map(|t| ContentKind::from_tag(t)).collect(),
            ignored_applications: config.ignored_applications.clone(),
            confidential_types: config
                .confidential_types
                .iter()
                .map(|t| ContentKind::from_tag(t))
                .collect(),
            max_clipboard_size: config.max_clipboard_size,
        }
    }
}

/// Why a clipboard change was not recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Suppression {
    SelfWrite,
    Paused,
    IgnoreNext,
    IgnoredApplication(String),
    Empty,
    Confidential,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Unchanged,
    Ingested(ItemRef),
    Suppressed(Suppression),
    /// Every enabled type failed to read.
    ReadFailed,
}

struct ClipboardState {
    clipboard: Box<dyn SystemClipboard>,
    last_change: Option<u64>,
    /// Change count produced by our own most recent write.
    self_written: Option<u64>,
}

struct Inner {
    store: Arc<HistoryStore>,
    config: MonitorConfig,
    clipboard: Mutex<ClipboardState>,
    ignore_events: AtomicBool,
    ignore_next: AtomicBool,
}

struct Running {
    handle: JoinHandle<()>,
    interval: watch::Sender<Duration>,
    stop: oneshot::Sender<()>,
}

pub struct ClipboardMonitor {
    inner: Arc<Inner>,
    running: Mutex<Option<Running>>,
}

impl ClipboardMonitor {
    /// Whatever is on the clipboard now counts as already seen.
    pub fn new(
        store: Arc<HistoryStore>,
        mut clipboard: Box<dyn SystemClipboard>,
        config: MonitorConfig,
    ) -> Self {
        let last_change = match clipboard.change_count() {
            Ok(count) => Some(count),
            Err(e) => {
                warn!("cannot read clipboard change count: {}", e);
                None
            }
        };

        Self {
            inner: Arc::new(Inner {
                store,
                config,
                clipboard: Mutex::new(ClipboardState {
                    clipboard,
                    last_change,
                    self_written: None,
                }),
                ignore_events: AtomicBool::new(false),
                ignore_next: AtomicBool::new(false),
            }),
            running: Mutex::new(None),
        }
    }

    /// Starts polling every `interval`. Must be called inside a tokio runtime.
    /// Calling it while already running changes the interval instead.
    pub fn start(&self, interval: Duration) {
        let mut running = self.running.lock();
        if let Some(running) = running.as_ref() {
            let _ = running.interval.send(interval);
            return;
        }

        let (interval_tx, interval_rx) = watch::channel(interval);
        let (stop_tx, stop_rx) = oneshot::channel();
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(poll_loop(inner, interval_rx, stop_rx));

        info!("clipboard monitor started ({}ms)", interval.as_millis());
        *running = Some(Running {
            handle,
            interval: interval_tx,
            stop: stop_tx,
        });
    }

    /// Switches to `interval`; a tick already running completes first.
    pub fn restart(&self, interval: Duration) {
        debug!("poll interval now {}ms", interval.as_millis());
        self.start(interval);
    }

    /// Stops polling. Nothing is ingested by the timer once this returns.
    pub async fn stop(&self) {
        let running = self.running.lock().take();
        if let Some(running) = running {
            let _ = running.stop.send(());
            if let Err(e) = running.handle.await {
                warn!("monitor task ended abnormally: {}", e);
            }
            info!("clipboard monitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Runs a single check of the clipboard.
    pub fn poll_once(&self) -> TickOutcome {
        self.inner.poll_once()
    }

    /// Suppresses all ingestion until resumed.
    pub fn pause(&self) {
        self.inner.ignore_events.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.inner.ignore_events.store(false, Ordering::SeqCst);
        self.inner.ignore_next.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.inner.ignore_events.load(Ordering::SeqCst)
    }

    /// Skips the next clipboard change.
    pub fn ignore_next_event(&self) {
        self.inner.ignore_next.store(true, Ordering::SeqCst);
    }

    /// Writes to the clipboard without the write being recorded as a copy.
    pub fn write(&self, representations: &Representations) -> Result<(), ClipboardError> {
        let mut state = self.inner.clipboard.lock();
        state.clipboard.write(representations)?;
        match state.clipboard.change_count() {
            Ok(count) => state.self_written = Some(count),
            Err(e) => warn!("cannot read change count after write: {}", e),
        }
        Ok(())
    }

    /// Puts a history item back on the clipboard and marks it most recent.
    pub fn copy_item(&self, id: ItemId) -> Result<ItemRef, CopyError> {
        let item = self.inner.store.get(id).ok_or(StoreError::NotFound(id))?;
        self.write(&item.representations)?;
        Ok(self.inner.store.touch(id, now_millis())?)
    }

    pub fn store(&self) -> &Arc<HistoryStore> {
        &self.inner.store
    }
}

async fn poll_loop(
    inner: Arc<Inner>,
    mut interval_rx: watch::Receiver<Duration>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let mut ticker = new_ticker(*interval_rx.borrow_and_update());

    loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            changed = interval_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                ticker = new_ticker(*interval_rx.borrow_and_update());
            }
            _ = ticker.tick() => {
                if let TickOutcome::Ingested(item) = inner.poll_once() {
                    debug!("recorded copy as item {}", item.id);
                }
            }
        }
    }
}

fn new_ticker(period: Duration) -> tokio::time::Interval {
    let period = period.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

impl Inner {
    fn poll_once(&self) -> TickOutcome {
        let mut state = self.clipboard.lock();

        let count = match state.clipboard.change_count() {
            Ok(count) => count,
            Err(e) => {
                warn!("clipboard change count unavailable: {}", e);
                return TickOutcome::Unchanged;
            }
        };
        if state.last_change == Some(count) {
            return TickOutcome::Unchanged;
        }
        state.last_change = Some(count);

        if state.self_written == Some(count) {
            return TickOutcome::Suppressed(Suppression::SelfWrite);
        }

        if let Some(reason) = self.take_ignore_flags() {
            debug!("clipboard change ignored: {:?}", reason);
            return TickOutcome::Suppressed(reason);
        }

        let source_application = state.clipboard.source_application();
        if let Some(app) = &source_application {
            if self.config.ignored_applications.iter().any(|ignored| app.contains(ignored.as_str())) {
                debug!("ignoring copy from {}", app);
                return TickOutcome::Suppressed(Suppression::IgnoredApplication(app.clone()));
            }
        }

        for marker in &self.config.confidential_types {
            if let Ok(Some(_)) = state.clipboard.read(marker) {
                let outcome = state.clipboard.read_all(&self.config.enabled_types);
                outcome.representations.zeroize();
                debug!("ignoring confidential copy ({})", marker);
                return TickOutcome::Suppressed(Suppression::Confidential);
            }
        }

        let outcome = state.clipboard.read_all(&self.config.enabled_types);
        drop(state);

        for failure in &outcome.failures {
            warn!("{}", failure);
        }

        let mut representations = Representations::new();
        for (kind, bytes) in outcome.representations.iter() {
            if bytes.is_empty() {
                continue;
            }
            if bytes.len() > self.config.max_clipboard_size {
                warn!("dropping {} representation of {} bytes", kind, bytes.len());
                continue;
            }
            representations.insert(kind.clone(), bytes.to_vec());
        }

        if representations.is_empty() {
            if !outcome.failures.is_empty() && outcome.representations.is_empty() {
                return TickOutcome::ReadFailed;
            }
            return TickOutcome::Suppressed(Suppression::Empty);
        }
        if representations.len() == 1
            && representations
                .as_text()
                .is_some_and(|text| text.trim().is_empty())
        {
            return TickOutcome::Suppressed(Suppression::Empty);
        }

        let candidate = Candidate {
            representations,
            source_application,
            copied_at: now_millis(),
        };
        let item = self.store.add(candidate);
        self.ignore_next.store(false, Ordering::SeqCst);
        TickOutcome::Ingested(item)
    }

    /// Pausing together with "ignore next" lets exactly one copy through
    /// the pause and then lifts both.
    fn take_ignore_flags(&self) -> Option<Suppression> {
        let paused = self.ignore_events.load(Ordering::SeqCst);
        let next = self.ignore_next.swap(false, Ordering::SeqCst);
        match (paused, next) {
            (true, true) => {
                self.ignore_events.store(false, Ordering::SeqCst);
                Some(Suppression::IgnoreNext)
            }
            (true, false) => Some(Suppression::Paused),
            (false, true) => Some(Suppression::IgnoreNext),
            (false, false) => None,
        }
    }
}
