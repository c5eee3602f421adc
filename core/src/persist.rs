//! Durability side channel of the history store.
//!
//! The store never waits on storage: every committed mutation is turned into
//! a [`FlushOp`] and handed to a worker thread that owns the [`Persistence`]
//! adapter. Failed operations stay queued and are retried, in order, when the
//! next operation arrives.

use crate::error::PersistResult;
use crate::item::{HistoryItem, ItemId, ItemRef};
use crate::store::StoreEvent;
use log::{debug, error};
use std::collections::VecDeque;
use std::thread::JoinHandle;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Durable load/save of history items.
pub trait Persistence: Send + 'static {
    /// Every stored item, pinned block first in pin order, then unpinned by
    /// recency.
    fn load(&mut self) -> PersistResult<Vec<HistoryItem>>;

    /// Inserts or replaces one item.
    fn save(&mut self, item: &HistoryItem) -> PersistResult<()>;

    fn delete(&mut self, id: ItemId) -> PersistResult<()>;

    fn save_all(&mut self, items: &[ItemRef]) -> PersistResult<()> {
        for item in items {
            self.save(item)?;
        }
        Ok(())
    }

    /// Highest id ever stored, including rows `load` had to skip. New ids
    /// are allocated above it.
    fn max_id(&mut self) -> PersistResult<Option<ItemId>> {
        Ok(None)
    }
}

impl<P: Persistence + ?Sized> Persistence for Box<P> {
    fn load(&mut self) -> PersistResult<Vec<HistoryItem>> {
        (**self).load()
    }

    fn save(&mut self, item: &HistoryItem) -> PersistResult<()> {
        (**self).save(item)
    }

    fn delete(&mut self, id: ItemId) -> PersistResult<()> {
        (**self).delete(id)
    }

    fn save_all(&mut self, items: &[ItemRef]) -> PersistResult<()> {
        (**self).save_all(items)
    }

    fn max_id(&mut self) -> PersistResult<Option<ItemId>> {
        (**self).max_id()
    }
}

/// Keeps nothing; used for throwaway stores.
#[derive(Debug, Default)]
pub struct NullPersistence;

impl Persistence for NullPersistence {
    fn load(&mut self) -> PersistResult<Vec<HistoryItem>> {
        Ok(Vec::new())
    }

    fn save(&mut self, _item: &HistoryItem) -> PersistResult<()> {
        Ok(())
    }

    fn delete(&mut self, _id: ItemId) -> PersistResult<()> {
        Ok(())
    }
}

/// Loads through the wrapped adapter but never writes. For reading history
/// that another process owns.
pub struct ReadOnly<P>(pub P);

impl<P: Persistence> Persistence for ReadOnly<P> {
    fn load(&mut self) -> PersistResult<Vec<HistoryItem>> {
        self.0.load()
    }

    fn save(&mut self, _item: &HistoryItem) -> PersistResult<()> {
        Ok(())
    }

    fn delete(&mut self, _id: ItemId) -> PersistResult<()> {
        Ok(())
    }

    fn max_id(&mut self) -> PersistResult<Option<ItemId>> {
        self.0.max_id()
    }
}

/// Operations kept while storage keeps failing. The oldest are dropped
/// beyond this.
const MAX_PENDING: usize = 10_000;

#[derive(Debug)]
pub(crate) enum FlushOp {
    Save(ItemRef),
    SaveAll(Vec<ItemRef>),
    Delete(ItemId),
    /// Answers `true` once everything queued before it has been written.
    Barrier(oneshot::Sender<bool>),
}

pub(crate) struct Flusher {
    tx: Option<mpsc::UnboundedSender<FlushOp>>,
    worker: Option<JoinHandle<()>>,
}

impl Flusher {
    pub fn spawn(
        persistence: Box<dyn Persistence>,
        events: broadcast::Sender<StoreEvent>,
    ) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = std::thread::Builder::new()
            .name("clipstack-flush".to_string())
            .spawn(move || run(persistence, rx, events))?;

        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
        })
    }

    pub fn submit(&self, op: FlushOp) {
        let Some(tx) = &self.tx else { return };
        if let Err(e) = tx.send(op) {
            error!("flush worker is gone, dropping {:?}", e.0);
        }
    }

    pub fn barrier(&self) -> oneshot::Receiver<bool> {
        let (reply, rx) = oneshot::channel();
        self.submit(FlushOp::Barrier(reply));
        rx
    }
}

impl Drop for Flusher {
    fn drop(&mut self) {
        // closing the channel lets the worker drain and exit
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run(
    mut persistence: Box<dyn Persistence>,
    mut rx: mpsc::UnboundedReceiver<FlushOp>,
    events: broadcast::Sender<StoreEvent>,
) {
    let mut pending: VecDeque<FlushOp> = VecDeque::new();

    while let Some(op) = rx.blocking_recv() {
        match op {
            FlushOp::Barrier(reply) => {
                let clean = drain(persistence.as_mut(), &mut pending, &events);
                let _ = reply.send(clean);
            }
            op => {
                enqueue(&mut pending, op, MAX_PENDING);
                drain(persistence.as_mut(), &mut pending, &events);
            }
        }
    }

    if !drain(persistence.as_mut(), &mut pending, &events) {
        error!(
            "{} history changes were not persisted before shutdown",
            pending.len()
        );
    }
}

/// Queues `op`, dropping saves it supersedes. A later save or delete of
/// the same item makes an earlier queued save pointless.
fn enqueue(pending: &mut VecDeque<FlushOp>, op: FlushOp, cap: usize) {
    let superseded = match &op {
        FlushOp::Save(item) => Some(item.id),
        FlushOp::Delete(id) => Some(*id),
        _ => None,
    };
    if let Some(id) = superseded {
        pending.retain(|queued| !matches!(queued, FlushOp::Save(old) if old.id == id));
    }

    pending.push_back(op);
    while pending.len() > cap {
        if let Some(dropped) = pending.pop_front() {
            error!("flush queue full, dropping {:?}", dropped);
        }
    }
}

/// Applies queued operations front to back, stopping at the first failure.
fn drain(
    persistence: &mut dyn Persistence,
    pending: &mut VecDeque<FlushOp>,
    events: &broadcast::Sender<StoreEvent>,
) -> bool {
    while let Some(op) = pending.front() {
        let result = match op {
            FlushOp::Save(item) => persistence.save(item),
            FlushOp::SaveAll(items) => persistence.save_all(items),
            FlushOp::Delete(id) => persistence.delete(*id),
            FlushOp::Barrier(_) => Ok(()),
        };

        match result {
            Ok(()) => {
                pending.pop_front();
            }
            Err(e) => {
                let message = e.to_string();
                error!(
                    "persisting history failed ({} pending): {}",
                    pending.len(),
                    message
                );
                let _ = events.send(StoreEvent::PersistenceFailed { message });
                return false;
            }
        }
    }
    debug!("history flushed");
    true
}


#[cfg(test)]
mod tests {
    use super::testing::MemoryPersistence;
    use super::*;
    use crate::item::Candidate;
    use crate::store::{HistoryStore, StoreConfig};
    use std::sync::Arc;

    fn item(id: u64, text: &str) -> ItemRef {
        let store = HistoryStore::in_memory(StoreConfig::default()).unwrap();
        let added = store.add(Candidate::text(text));
        let mut item = (*added).clone();
        item.id = ItemId(id);
        Arc::new(item)
    }

    fn describe(pending: &VecDeque<FlushOp>) -> Vec<String> {
        pending
            .iter()
            .map(|op| match op {
                FlushOp::Save(item) => format!("save {} {}", item.id, item.primary_text),
                FlushOp::SaveAll(items) => format!("save_all {}", items.len()),
                FlushOp::Delete(id) => format!("delete {}", id),
                FlushOp::Barrier(_) => "barrier".to_string(),
            })
            .collect()
    }

    #[test]
    fn later_writes_replace_queued_saves() {
        let mut pending = VecDeque::new();
        enqueue(&mut pending, FlushOp::Save(item(1, "a")), 100);
        enqueue(&mut pending, FlushOp::Save(item(2, "b")), 100);
        enqueue(&mut pending, FlushOp::Save(item(1, "a2")), 100);
        assert_eq!(describe(&pending), vec!["save 2 b", "save 1 a2"]);

        enqueue(&mut pending, FlushOp::Delete(ItemId(2)), 100);
        assert_eq!(describe(&pending), vec!["save 1 a2", "delete 2"]);
    }

    #[test]
    fn queue_is_capped() {
        let mut pending = VecDeque::new();
        for id in 0..5 {
            enqueue(&mut pending, FlushOp::Delete(ItemId(id)), 3);
        }
        assert_eq!(describe(&pending), vec!["delete 2", "delete 3", "delete 4"]);
    }

    #[test]
    fn read_only_never_writes() {
        let inner = MemoryPersistence::default();
        let mut adapter = ReadOnly(Box::new(inner.clone()) as Box<dyn Persistence>);
        adapter.save(&item(4, "kept out")).unwrap();
        assert!(inner.rows.lock().is_empty());

        inner.rows.lock().insert(ItemId(9), (*item(9, "stored")).clone());
        assert_eq!(adapter.load().unwrap().len(), 1);
        adapter.delete(ItemId(9)).unwrap();
        assert_eq!(adapter.max_id().unwrap(), Some(ItemId(9)));
    }
}
