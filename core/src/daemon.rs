//! Wires the store, monitor and control socket into the long-running process.

use crate::clipboard::{ArboardClipboard, SystemClipboard};
use crate::config::Config;
use crate::footer::FooterAction;
use crate::format::{history_json, history_line};
use crate::ipc::{self, Command};
use crate::item::{Candidate, Representations, now_millis};
use crate::monitor::{ClipboardMonitor, MonitorConfig};
use crate::navigation::Activation;
use crate::persist::{Persistence, ReadOnly};
use crate::rewrite::{CommandRewriter, RewriteActions};
use crate::sqlite::SqlitePersistence;
use crate::store::{HistoryStore, StoreConfig, StoreEvent};
use anyhow::{Context, Result, anyhow};
use log::{error, info, warn};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;

/// What the caller should do after an activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    /// Show this text to the user.
    Display(String),
    Quit,
}

pub struct Daemon {
    config: Config,
    store: Arc<HistoryStore>,
    monitor: Arc<ClipboardMonitor>,
    rewrite: Option<Arc<RewriteActions>>,
}

impl Daemon {
    pub fn new(
        config: Config,
        clipboard: Box<dyn SystemClipboard>,
        persistence: Box<dyn Persistence>,
    ) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(
            HistoryStore::open(StoreConfig::from(&config), persistence)
                .context("Failed to start history store")?,
        );
        let monitor = Arc::new(ClipboardMonitor::new(
            Arc::clone(&store),
            clipboard,
            MonitorConfig::from(&config),
        ));
        let rewrite = CommandRewriter::new(&config.rewrite.command)
            .map(|rewriter| Arc::new(RewriteActions::new(Arc::new(rewriter), &config.rewrite)));

        Ok(Self {
            config,
            store,
            monitor,
            rewrite,
        })
    }

    /// The desktop clipboard and the on-disk history under `data_dir`.
    pub fn open(config: Config) -> Result<Self> {
        let persistence = SqlitePersistence::open(&config.db_path(), config.compress_threshold)
            .context("Failed to open history database")?;
        let clipboard = ArboardClipboard::new().context("Failed to initialize clipboard")?;
        Self::new(config, Box::new(clipboard), Box::new(persistence))
    }

    pub fn with_rewrite(mut self, rewrite: RewriteActions) -> Self {
        self.rewrite = Some(Arc::new(rewrite));
        self
    }

    pub fn store(&self) -> &Arc<HistoryStore> {
        &self.store
    }

    pub fn monitor(&self) -> &ClipboardMonitor {
        &self.monitor
    }

    /// Polls the clipboard and serves the control socket until `shutdown`
    /// resolves.
    pub async fn run(&self, sock_path: &Path, shutdown: impl Future<Output = ()>) -> Result<()> {
        self.monitor.start(self.config.poll_interval());

        let (tx, mut rx) = mpsc::channel(16);
        let server_path = sock_path.to_path_buf();
        let ipc_handle = tokio::spawn(async move {
            if let Err(e) = ipc::serve(tx, &server_path).await {
                error!("control socket failed: {:#}", e);
            }
        });

        let mut events = self.store.subscribe();
        let mut rewrites = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                Some(cmd) = rx.recv() => match cmd {
                    // rewrites wait on an external program; keep serving meanwhile
                    Command::Reword(index) => match self.rewrite_actions() {
                        Ok(rewrite) => {
                            let monitor = Arc::clone(&self.monitor);
                            rewrites.spawn(async move { rewrite.reword(&monitor, index).await });
                        }
                        Err(e) => warn!("{} failed: {:#}", cmd, e),
                    },
                    cmd => {
                        if let Err(e) = self.handle(cmd.clone()).await {
                            warn!("{} failed: {:#}", cmd, e);
                        }
                    }
                },
                Some(done) = rewrites.join_next() => match done {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => warn!("reword failed: {}", e),
                    Err(e) => warn!("reword task ended abnormally: {}", e),
                },
                event = events.recv() => match event {
                    Ok(StoreEvent::PersistenceFailed { message }) => {
                        warn!("history is not being saved: {}", message);
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("missed {} store events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        rewrites.abort_all();
        ipc_handle.abort();
        #[cfg(unix)]
        let _ = std::fs::remove_file(sock_path);

        self.shutdown().await;
        Ok(())
    }

    /// Stops polling, applies `clear_on_quit` and waits for pending writes.
    pub async fn shutdown(&self) {
        self.monitor.stop().await;
        if self.config.clear_on_quit {
            let removed = self.store.clear(true);
            info!("cleared {} items on quit", removed);
        }
        match self.store.flush().await {
            Ok(true) => info!("history saved"),
            _ => error!("some history changes could not be saved"),
        }
    }

    pub async fn handle(&self, cmd: Command) -> Result<()> {
        match cmd {
            Command::Copy(id) => {
                self.monitor.copy_item(id)?;
            }
            Command::Pin(id) => {
                self.store.pin(id, None)?;
            }
            Command::Unpin(id) => {
                self.store.unpin(id)?;
            }
            Command::Delete(id) => {
                self.store.delete(id)?;
            }
            Command::Clear => {
                self.store.clear(true);
            }
            Command::ClearAll => {
                self.store.clear(false);
            }
            Command::IgnoreNext => self.monitor.ignore_next_event(),
            Command::Pause => self.monitor.pause(),
            Command::Resume => self.monitor.resume(),
            Command::Reword(index) => {
                self.rewrite_actions()?.reword(&self.monitor, index).await?;
            }
        }
        Ok(())
    }

    /// Carries out what the navigator produced for the current selection.
    pub async fn activate(&self, activation: Activation) -> Result<Outcome> {
        match activation {
            Activation::Copy(item) => {
                self.monitor.copy_item(item.id)?;
            }
            Activation::CopyText(text) => {
                let representations = Representations::text(text);
                self.monitor.write(&representations)?;
                self.store.add(Candidate::new(representations).at(now_millis()));
            }
            Activation::Footer(FooterAction::Clear) => {
                self.store.clear(true);
            }
            Activation::Footer(FooterAction::ClearAll) => {
                self.store.clear(false);
            }
            Activation::Footer(FooterAction::Quit) => return Ok(Outcome::Quit),
            Activation::Footer(FooterAction::About) => {
                return Ok(Outcome::Display(format!(
                    "{} {}",
                    env!("CARGO_PKG_NAME"),
                    env!("CARGO_PKG_VERSION")
                )));
            }
            Activation::Footer(FooterAction::Preferences) => {
                return Ok(Outcome::Display(Config::path().display().to_string()));
            }
        }
        Ok(Outcome::Continue)
    }

    /// Runs the define action on the most recent copy.
    pub async fn define(&self) -> Result<Outcome> {
        let rewrite = self.rewrite_actions()?;
        Ok(Outcome::Display(rewrite.define(&self.store).await?))
    }

    fn rewrite_actions(&self) -> Result<Arc<RewriteActions>> {
        self.rewrite
            .clone()
            .ok_or_else(|| anyhow!("no rewrite command configured"))
    }
}

/// Launcher lines for the stored history, read straight from disk. With
/// `json`, one JSON object per item instead.
pub fn history_lines(config: &Config, json: bool) -> Result<Vec<String>> {
    let persistence = SqlitePersistence::open(&config.db_path(), config.compress_threshold)
        .context("Failed to open history database")?;
    let store = HistoryStore::open(StoreConfig::from(config), Box::new(ReadOnly(persistence)))?;

    let now = now_millis();
    store
        .ordered()
        .iter()
        .take(config.max_print_entries)
        .map(|item| -> Result<String> {
            if json {
                Ok(history_json(item)?)
            } else {
                Ok(history_line(item, now, config.max_display_length))
            }
        })
        .collect()
}
