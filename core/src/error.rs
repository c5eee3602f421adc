use crate::item::{ContentKind, ItemId};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("no history item with id {0}")]
    NotFound(ItemId),
}

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt record {id}: {reason}")]
    Corrupt { id: i64, reason: String },
}

#[derive(Error, Debug)]
pub enum ClipboardError {
    #[error("clipboard unavailable: {0}")]
    Unavailable(String),
    #[error("failed to read {kind}: {reason}")]
    Read { kind: ContentKind, reason: String },
    #[error("failed to write clipboard: {0}")]
    Write(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RewriteError {
    #[error("prompt is empty")]
    EmptyPrompt,
    #[error("no prompt configured at index {0}")]
    UnknownPrompt(usize),
    #[error("history is empty")]
    NoHistory,
    #[error("most recent item has no text")]
    EmptyText,
    #[error("rewriter failed: {0}")]
    Collaborator(String),
    #[error("failed to write result: {0}")]
    Write(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IpcError {
    #[error("message does not start with the protocol magic")]
    BadMagic,
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("invalid argument for {command}: {value}")]
    BadArgument { command: &'static str, value: String },
}

pub type StoreResult<T> = Result<T, StoreError>;
pub type PersistResult<T> = Result<T, PersistError>;

#[derive(Error, Debug)]
pub enum CopyError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Clipboard(#[from] ClipboardError),
}
