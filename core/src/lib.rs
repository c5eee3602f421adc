//! Clipboard history core: a polling monitor, a deduplicating and pinnable
//! history store with SQLite persistence, and keyboard navigation over the
//! visible history plus footer actions.

pub mod clipboard;
pub mod config;
pub mod daemon;
pub mod error;
pub mod fingerprint;
pub mod footer;
pub mod format;
pub mod ipc;
pub mod item;
pub mod monitor;
pub mod navigation;
pub mod persist;
pub mod recency;
pub mod rewrite;
pub mod sqlite;
pub mod store;

pub use clipboard::{ArboardClipboard, MemoryClipboard, SystemClipboard};
pub use config::{Config, PinPosition};
pub use daemon::Daemon;
pub use error::{ClipboardError, CopyError, IpcError, PersistError, RewriteError, StoreError};
pub use fingerprint::{Fingerprint, fingerprint};
pub use footer::{Footer, FooterAction, FooterItem};
pub use item::{Candidate, ContentKind, HistoryItem, ItemId, ItemRef, Representations};
pub use monitor::{ClipboardMonitor, MonitorConfig, TickOutcome};
pub use navigation::{Activation, EntryId, Navigator};
pub use persist::{NullPersistence, Persistence};
pub use sqlite::SqlitePersistence;
pub use store::{HistoryStore, StoreConfig, StoreEvent};
