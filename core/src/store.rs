//! The authoritative clipboard history.
//!
//! All mutations take the single write lock, so `add`, `pin`, `unpin`,
//! `delete`, `clear` and eviction never interleave. Items are shared as
//! [`ItemRef`]s and replaced copy-on-write, which lets readers keep a
//! consistent snapshot without holding the lock.

use crate::config::{Config, PinPosition};
use crate::error::{StoreError, StoreResult};
use crate::fingerprint::{Fingerprint, fingerprint};
use crate::item::{Candidate, HistoryItem, ItemId, ItemRef, Timestamp};
use crate::persist::{FlushOp, Flusher, NullPersistence, Persistence, ReadOnly};
use crate::recency::RecencyIndex;
use log::{debug, error, info, warn};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Upper bound on unpinned items.
    pub max_unpinned: usize,
    /// Collapse copies with the same fingerprint into one item.
    pub dedup: bool,
    pub pin_position: PinPosition,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_unpinned: 200,
            dedup: true,
            pin_position: PinPosition::Top,
        }
    }
}

impl From<&Config> for StoreConfig {
    fn from(config: &Config) -> Self {
        Self {
            max_unpinned: config.max_entries,
            dedup: config.dedup,
            pin_position: config.pin_position,
        }
    }
}

/// Change notifications for presentation layers.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    Added(ItemRef),
    Updated(ItemRef),
    Removed(ItemId),
    Cleared { keep_pinned: bool },
    PersistenceFailed { message: String },
}

#[derive(Default)]
struct State {
    items: HashMap<ItemId, ItemRef>,
    by_fingerprint: HashMap<Fingerprint, ItemId>,
    pinned: Vec<ItemId>,
    recent: RecencyIndex,
    next_id: u64,
    max_unpinned: usize,
}

impl State {
    fn update(&mut self, id: ItemId, f: impl FnOnce(&mut HistoryItem)) -> Option<ItemRef> {
        let entry = self.items.get_mut(&id)?;
        f(Arc::make_mut(entry));
        Some(Arc::clone(entry))
    }

    fn remove(&mut self, id: ItemId) -> Option<ItemRef> {
        let item = self.items.remove(&id)?;
        if self.by_fingerprint.get(&item.fingerprint) == Some(&id) {
            self.by_fingerprint.remove(&item.fingerprint);
        }
        self.recent.remove(id);
        self.pinned.retain(|pinned| *pinned != id);
        Some(item)
    }

    /// Makes every `pin_order` equal its index in the pinned block and
    /// returns the items that changed.
    fn renumber_pins(&mut self) -> Vec<ItemRef> {
        let pinned = self.pinned.clone();
        let mut changed = Vec::new();
        for (pos, id) in pinned.into_iter().enumerate() {
            let order = Some(pos as u32);
            let current = self.items.get(&id).map(|item| item.pin_order);
            if current != Some(order) {
                if let Some(item) = self.update(id, |item| item.pin_order = order) {
                    changed.push(item);
                }
            }
        }
        changed
    }

    fn evict(&mut self) -> Vec<ItemRef> {
        let mut evicted = Vec::new();
        while self.recent.len() > self.max_unpinned {
            let Some(id) = self.recent.pop_least_recent() else {
                break;
            };
            if let Some(item) = self.remove(id) {
                debug!("evicting item {} (last copied {})", id, item.last_copied_at);
                evicted.push(item);
            }
        }
        evicted
    }

    fn bump(&mut self, id: ItemId, copied_at: Timestamp) -> Option<ItemRef> {
        let item = self.update(id, |item| {
            item.last_copied_at = item.last_copied_at.max(copied_at);
            item.first_copied_at = item.first_copied_at.min(copied_at);
            item.copy_count = item.copy_count.saturating_add(1);
        })?;
        if !item.is_pinned() {
            self.recent.touch(id, item.last_copied_at);
        }
        Some(item)
    }

    fn ordered(&self, pin_position: PinPosition) -> Vec<ItemRef> {
        let pinned = self.pinned.iter().filter_map(|id| self.items.get(id));
        let unpinned = self.recent.iter().filter_map(|id| self.items.get(&id));

        let ordered: Vec<&ItemRef> = match pin_position {
            PinPosition::Top => pinned.chain(unpinned).collect(),
            PinPosition::Bottom => unpinned.chain(pinned).collect(),
        };
        ordered.into_iter().cloned().collect()
    }
}

pub struct HistoryStore {
    dedup: bool,
    pin_position: PinPosition,
    state: RwLock<State>,
    flusher: Flusher,
    events: broadcast::Sender<StoreEvent>,
}

impl HistoryStore {
    /// Builds the store from whatever `persistence` holds and hands the
    /// adapter to the background flush worker.
    ///
    /// A failed load is reported and the store starts empty; it stays usable
    /// but writes nothing for the rest of the session, so the stored history
    /// is still there to load on the next launch.
    pub fn open(config: StoreConfig, mut persistence: Box<dyn Persistence>) -> std::io::Result<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let (loaded, mut persistence): (_, Box<dyn Persistence>) = match persistence.load() {
            Ok(items) => (items, persistence),
            Err(e) => {
                error!("failed to load history, not saving this session: {}", e);
                let _ = events.send(StoreEvent::PersistenceFailed {
                    message: e.to_string(),
                });
                (Vec::new(), Box::new(ReadOnly(persistence)) as Box<dyn Persistence>)
            }
        };

        let first_free = match persistence.max_id() {
            Ok(max) => max.map_or(0, |id| id.0 + 1),
            Err(e) => {
                warn!("cannot read highest stored id: {}", e);
                0
            }
        };

        let flusher = Flusher::spawn(persistence, events.clone())?;
        let store = Self {
            dedup: config.dedup,
            pin_position: config.pin_position,
            state: RwLock::new(State {
                max_unpinned: config.max_unpinned.max(1),
                next_id: first_free,
                ..State::default()
            }),
            flusher,
            events,
        };
        store.restore(loaded);
        Ok(store)
    }

    /// A store that keeps nothing on disk.
    pub fn in_memory(config: StoreConfig) -> std::io::Result<Self> {
        Self::open(config, Box::new(NullPersistence))
    }

    fn restore(&self, mut loaded: Vec<HistoryItem>) {
        let mut state = self.state.write();

        loaded.sort_by(|a, b| match (a.pin_order, b.pin_order) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => b.last_copied_at.cmp(&a.last_copied_at),
        });

        for item in loaded {
            let id = item.id;
            state.next_id = state.next_id.max(id.0 + 1);

            if self.dedup {
                if let Some(existing) = state.by_fingerprint.get(&item.fingerprint) {
                    info!("dropping stored duplicate {} of item {}", id, existing);
                    self.flusher.submit(FlushOp::Delete(id));
                    continue;
                }
            }

            state.by_fingerprint.insert(item.fingerprint, id);
            if item.is_pinned() {
                state.pinned.push(id);
            } else {
                state.recent.push_back(id, item.last_copied_at);
            }
            state.items.insert(id, Arc::new(item));
        }

        let renumbered = state.renumber_pins();
        if !renumbered.is_empty() {
            self.flusher.submit(FlushOp::SaveAll(renumbered));
        }
        for item in state.evict() {
            self.flusher.submit(FlushOp::Delete(item.id));
        }
        info!(
            "history restored: {} pinned, {} unpinned",
            state.pinned.len(),
            state.recent.len()
        );
    }

    fn emit(&self, event: StoreEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn emit_evicted(&self, evicted: Vec<ItemRef>) {
        for item in evicted {
            self.flusher.submit(FlushOp::Delete(item.id));
            self.emit(StoreEvent::Removed(item.id));
        }
    }

    /// Records a copy. A payload already in the history is moved to the front
    /// and returned instead of being inserted again.
    pub fn add(&self, candidate: Candidate) -> ItemRef {
        let fingerprint = fingerprint(&candidate.representations);
        let mut state = self.state.write();

        if self.dedup {
            if let Some(&id) = state.by_fingerprint.get(&fingerprint) {
                if let Some(item) = state.bump(id, candidate.copied_at) {
                    debug!("re-copy of item {} ({} copies)", id, item.copy_count);
                    self.flusher.submit(FlushOp::Save(Arc::clone(&item)));
                    self.emit(StoreEvent::Updated(Arc::clone(&item)));
                    return item;
                }
            }
        }

        let id = ItemId(state.next_id);
        state.next_id += 1;

        let item = Arc::new(HistoryItem {
            id,
            primary_text: candidate.representations.primary_text(),
            representations: candidate.representations,
            fingerprint,
            first_copied_at: candidate.copied_at,
            last_copied_at: candidate.copied_at,
            copy_count: 1,
            pin_order: None,
            source_application: candidate.source_application,
        });

        state.items.insert(id, Arc::clone(&item));
        state.by_fingerprint.insert(fingerprint, id);
        state.recent.touch(id, item.last_copied_at);
        debug!("added item {} ({} bytes)", id, item.representations.total_size());

        self.flusher.submit(FlushOp::Save(Arc::clone(&item)));
        self.emit(StoreEvent::Added(Arc::clone(&item)));

        let evicted = state.evict();
        self.emit_evicted(evicted);
        item
    }

    /// Marks an existing item as copied again at `copied_at`.
    pub fn touch(&self, id: ItemId, copied_at: Timestamp) -> StoreResult<ItemRef> {
        let mut state = self.state.write();
        let item = state.bump(id, copied_at).ok_or(StoreError::NotFound(id))?;
        self.flusher.submit(FlushOp::Save(Arc::clone(&item)));
        self.emit(StoreEvent::Updated(Arc::clone(&item)));
        Ok(item)
    }

    /// Pins `id` at `position` in the pinned block, or at its end. Pinning a
    /// pinned item moves it.
    pub fn pin(&self, id: ItemId, position: Option<usize>) -> StoreResult<ItemRef> {
        let mut state = self.state.write();
        if !state.items.contains_key(&id) {
            return Err(StoreError::NotFound(id));
        }

        state.recent.remove(id);
        state.pinned.retain(|pinned| *pinned != id);
        let at = position
            .unwrap_or(state.pinned.len())
            .min(state.pinned.len());
        state.pinned.insert(at, id);

        let changed = state.renumber_pins();
        for item in &changed {
            self.emit(StoreEvent::Updated(Arc::clone(item)));
        }
        if !changed.is_empty() {
            self.flusher.submit(FlushOp::SaveAll(changed));
        }

        state.items.get(&id).cloned().ok_or(StoreError::NotFound(id))
    }

    /// Returns a pinned item to the front of the recency ordering, keeping
    /// its `last_copied_at`.
    pub fn unpin(&self, id: ItemId) -> StoreResult<ItemRef> {
        let mut state = self.state.write();
        let item = state.items.get(&id).cloned().ok_or(StoreError::NotFound(id))?;
        if !item.is_pinned() {
            return Ok(item);
        }

        state.pinned.retain(|pinned| *pinned != id);
        let item = state
            .update(id, |item| item.pin_order = None)
            .ok_or(StoreError::NotFound(id))?;
        state.recent.touch(id, item.last_copied_at);

        let mut changed = vec![Arc::clone(&item)];
        changed.extend(state.renumber_pins());
        for changed_item in &changed {
            self.emit(StoreEvent::Updated(Arc::clone(changed_item)));
        }
        self.flusher.submit(FlushOp::SaveAll(changed));

        let evicted = state.evict();
        self.emit_evicted(evicted);
        Ok(item)
    }

    pub fn delete(&self, id: ItemId) -> StoreResult<ItemRef> {
        let mut state = self.state.write();
        let item = state.remove(id).ok_or(StoreError::NotFound(id))?;

        self.flusher.submit(FlushOp::Delete(id));
        if item.is_pinned() {
            let renumbered = state.renumber_pins();
            if !renumbered.is_empty() {
                self.flusher.submit(FlushOp::SaveAll(renumbered));
            }
        }
        self.emit(StoreEvent::Removed(id));
        Ok(item)
    }

    /// Removes every unpinned item, and the pinned ones too unless
    /// `keep_pinned`. Returns how many items were removed.
    pub fn clear(&self, keep_pinned: bool) -> usize {
        let mut state = self.state.write();
        let doomed: Vec<ItemId> = state
            .items
            .values()
            .filter(|item| !keep_pinned || !item.is_pinned())
            .map(|item| item.id)
            .collect();

        for id in &doomed {
            state.remove(*id);
            self.flusher.submit(FlushOp::Delete(*id));
        }
        info!("cleared {} items (keep_pinned={})", doomed.len(), keep_pinned);
        self.emit(StoreEvent::Cleared { keep_pinned });
        doomed.len()
    }

    /// Changes the unpinned limit, evicting immediately if it shrank.
    pub fn set_max_unpinned(&self, max_unpinned: usize) {
        let mut state = self.state.write();
        state.max_unpinned = max_unpinned.max(1);
        let evicted = state.evict();
        self.emit_evicted(evicted);
    }

    /// Case-insensitive substring search over `primary_text`.
    ///
    /// The ordering is captured now; filtering happens as the result is
    /// iterated, and can be repeated.
    pub fn search(&self, query: &str) -> SearchResults {
        let items = self.state.read().ordered(self.pin_position);
        SearchResults {
            items,
            query: query.to_string(),
            needle: query.to_lowercase(),
        }
    }

    pub fn visible_items(&self, query: &str) -> Vec<ItemRef> {
        self.search(query).iter().cloned().collect()
    }

    /// Pinned block and recency block in display order.
    pub fn ordered(&self) -> Vec<ItemRef> {
        self.state.read().ordered(self.pin_position)
    }

    pub fn pinned(&self) -> Vec<ItemRef> {
        let state = self.state.read();
        state.pinned.iter().filter_map(|id| state.items.get(id).cloned()).collect()
    }

    pub fn unpinned(&self) -> Vec<ItemRef> {
        let state = self.state.read();
        state.recent.iter().filter_map(|id| state.items.get(&id).cloned()).collect()
    }

    pub fn get(&self, id: ItemId) -> Option<ItemRef> {
        self.state.read().items.get(&id).cloned()
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.state.read().items.contains_key(&id)
    }

    /// The item copied most recently, pinned or not.
    pub fn most_recent(&self) -> Option<ItemRef> {
        self.state
            .read()
            .items
            .values()
            .max_by_key(|item| (item.last_copied_at, item.id))
            .cloned()
    }

    /// Text of the newest unpinned item, flattened to one line.
    pub fn menu_title(&self, max_chars: usize) -> String {
        let state = self.state.read();
        state
            .recent
            .front()
            .and_then(|id| state.items.get(&id))
            .map(|item| item.title(max_chars))
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.state.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().items.is_empty()
    }

    pub fn unpinned_len(&self) -> usize {
        self.state.read().recent.len()
    }

    pub fn pinned_len(&self) -> usize {
        self.state.read().pinned.len()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Resolves once every mutation made so far has been handed to storage;
    /// `true` when all of them succeeded.
    pub fn flush(&self) -> oneshot::Receiver<bool> {
        self.flusher.barrier()
    }
}

/// Snapshot of the history ordering with a pending text filter.
#[derive(Debug, Clone)]
pub struct SearchResults {
    items: Vec<ItemRef>,
    query: String,
    needle: String,
}

impl SearchResults {
    pub fn iter(&self) -> impl Iterator<Item = &ItemRef> {
        self.items.iter().filter(|item| {
            self.needle.is_empty() || item.primary_text.to_lowercase().contains(&self.needle)
        })
    }

    pub fn ids(&self) -> Vec<ItemId> {
        self.iter().map(|item| item.id).collect()
    }

    /// The query as the caller passed it.
    pub fn query(&self) -> &str {
        &self.query
    }
}

impl<'a> IntoIterator for &'a SearchResults {
    type Item = &'a ItemRef;
    type IntoIter = Box<dyn Iterator<Item = &'a ItemRef> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::Representations;
    use crate::persist::testing::MemoryPersistence;

    fn store(max: usize) -> HistoryStore {
        HistoryStore::in_memory(StoreConfig {
            max_unpinned: max,
            ..StoreConfig::default()
        })
        .unwrap()
    }

    fn texts(items: &[ItemRef]) -> Vec<String> {
        items.iter().map(|item| item.primary_text.clone()).collect()
    }

    #[test]
    fn duplicate_copy_updates_existing_item() {
        let store = store(10);
        let first = store.add(Candidate::text("hello").at(100));
        let again = store.add(Candidate::text("hello").at(200));

        assert_eq!(first.id, again.id);
        assert_eq!(store.len(), 1);
        assert_eq!(again.first_copied_at, 100);
        assert_eq!(again.last_copied_at, 200);
        assert_eq!(again.copy_count, 2);
        // the earlier handle is a snapshot
        assert_eq!(first.last_copied_at, 100);
    }

    #[test]
    fn out_of_order_timestamps_keep_extremes() {
        let store = store(10);
        store.add(Candidate::text("x").at(500));
        let item = store.add(Candidate::text("x").at(100));
        assert_eq!(item.first_copied_at, 100);
        assert_eq!(item.last_copied_at, 500);
    }

    #[test]
    fn recopy_moves_to_front() {
        let store = store(10);
        store.add(Candidate::text("a").at(1));
        store.add(Candidate::text("b").at(2));
        store.add(Candidate::text("a").at(3));
        assert_eq!(texts(&store.ordered()), vec!["a", "b"]);
    }

    #[test]
    fn dedup_can_be_disabled() {
        let store = HistoryStore::in_memory(StoreConfig {
            dedup: false,
            ..StoreConfig::default()
        })
        .unwrap();
        let a = store.add(Candidate::text("same"));
        let b = store.add(Candidate::text("same"));
        assert_ne!(a.id, b.id);
        assert_eq!(store.len(), 2);

        store.delete(b.id).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn eviction_removes_least_recently_used() {
        let store = store(3);
        store.add(Candidate::text("1").at(1));
        store.add(Candidate::text("2").at(2));
        store.add(Candidate::text("3").at(3));
        // re-copying "1" makes "2" the least recent
        store.add(Candidate::text("1").at(4));
        store.add(Candidate::text("4").at(5));

        assert_eq!(store.unpinned_len(), 3);
        assert_eq!(texts(&store.ordered()), vec!["4", "1", "3"]);
    }

    #[test]
    fn pinned_items_are_never_evicted() {
        let store = store(2);
        let keep = store.add(Candidate::text("keep"));
        store.pin(keep.id, None).unwrap();
        for i in 0..10 {
            store.add(Candidate::text(format!("n{}", i)).at(i));
        }
        assert!(store.contains(keep.id));
        assert_eq!(store.unpinned_len(), 2);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn pin_positions_and_renumbering() {
        let store = store(10);
        let a = store.add(Candidate::text("a"));
        let b = store.add(Candidate::text("b"));
        let c = store.add(Candidate::text("c"));

        store.pin(a.id, None).unwrap();
        store.pin(b.id, None).unwrap();
        store.pin(c.id, Some(0)).unwrap();
        assert_eq!(texts(&store.pinned()), vec!["c", "a", "b"]);

        let orders: Vec<Option<u32>> = store.pinned().iter().map(|i| i.pin_order).collect();
        assert_eq!(orders, vec![Some(0), Some(1), Some(2)]);

        // moving an already pinned item
        store.pin(b.id, Some(0)).unwrap();
        assert_eq!(texts(&store.pinned()), vec!["b", "c", "a"]);

        store.delete(c.id).unwrap();
        let orders: Vec<Option<u32>> = store.pinned().iter().map(|i| i.pin_order).collect();
        assert_eq!(orders, vec![Some(0), Some(1)]);
    }

    #[test]
    fn pinned_items_ignore_recency() {
        let store = store(10);
        let a = store.add(Candidate::text("a").at(1));
        store.add(Candidate::text("b").at(2));
        store.pin(a.id, None).unwrap();
        store.add(Candidate::text("a").at(3));
        assert_eq!(texts(&store.pinned()), vec!["a"]);
        assert_eq!(texts(&store.unpinned()), vec!["b"]);
    }

    #[test]
    fn unpin_returns_to_front() {
        let store = store(10);
        let a = store.add(Candidate::text("a").at(1));
        store.add(Candidate::text("b").at(2));
        store.pin(a.id, None).unwrap();
        store.add(Candidate::text("c").at(3));

        let item = store.unpin(a.id).unwrap();
        assert!(!item.is_pinned());
        assert_eq!(item.last_copied_at, 1);
        assert_eq!(texts(&store.ordered()), vec!["a", "c", "b"]);
    }

    #[test]
    fn unpin_respects_limit() {
        let store = store(1);
        let a = store.add(Candidate::text("a").at(1));
        store.pin(a.id, None).unwrap();
        store.add(Candidate::text("b").at(2));
        store.unpin(a.id).unwrap();
        assert_eq!(texts(&store.ordered()), vec!["a"]);
    }

    #[test]
    fn unknown_ids_are_not_found() {
        let store = store(10);
        store.add(Candidate::text("a"));
        let missing = ItemId(999);
        assert_eq!(store.pin(missing, None), Err(StoreError::NotFound(missing)));
        assert_eq!(store.unpin(missing), Err(StoreError::NotFound(missing)));
        assert_eq!(store.delete(missing), Err(StoreError::NotFound(missing)));
        assert_eq!(store.touch(missing, 0), Err(StoreError::NotFound(missing)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn clear_keeps_or_drops_pins() {
        let store = store(10);
        let a = store.add(Candidate::text("a"));
        store.add(Candidate::text("b"));
        store.pin(a.id, None).unwrap();

        assert_eq!(store.clear(true), 1);
        assert_eq!(texts(&store.ordered()), vec!["a"]);
        assert_eq!(store.clear(false), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn search_is_case_insensitive_and_ordered() {
        let store = store(10);
        store.add(Candidate::text("Hello World").at(1));
        store.add(Candidate::text("goodbye").at(2));
        store.add(Candidate::text("WORLD peace").at(3));

        let results = store.search("world");
        assert_eq!(texts(&results.iter().cloned().collect::<Vec<_>>()), vec![
            "WORLD peace",
            "Hello World"
        ]);
        // restartable
        assert_eq!(results.ids(), results.ids());
        assert_eq!(store.search("WoRlD").query(), "WoRlD");
        assert_eq!(store.search("").ids().len(), 3);
    }

    #[test]
    fn search_snapshot_ignores_later_mutations() {
        let store = store(10);
        store.add(Candidate::text("one"));
        let results = store.search("");
        store.add(Candidate::text("two"));
        assert_eq!(results.ids().len(), 1);
    }

    #[test]
    fn pin_position_bottom() {
        let store = HistoryStore::in_memory(StoreConfig {
            pin_position: PinPosition::Bottom,
            ..StoreConfig::default()
        })
        .unwrap();
        let a = store.add(Candidate::text("a").at(1));
        store.add(Candidate::text("b").at(2));
        store.pin(a.id, None).unwrap();
        assert_eq!(texts(&store.ordered()), vec!["b", "a"]);
    }

    #[test]
    fn shrinking_limit_evicts() {
        let store = store(5);
        for i in 0..5 {
            store.add(Candidate::text(format!("{}", i)).at(i));
        }
        store.set_max_unpinned(2);
        assert_eq!(texts(&store.ordered()), vec!["4", "3"]);
    }

    #[test]
    fn menu_title_and_most_recent() {
        let store = store(10);
        assert_eq!(store.menu_title(20), "");
        let a = store.add(Candidate::text("first\nline").at(1));
        store.pin(a.id, None).unwrap();
        store.add(Candidate::text("second").at(2));
        store.add(Candidate::text("first\nline").at(3));

        assert_eq!(store.menu_title(20), "second");
        assert_eq!(store.most_recent().unwrap().id, a.id);
    }

    #[test]
    fn events_are_broadcast() {
        let store = store(1);
        let mut rx = store.subscribe();
        let a = store.add(Candidate::text("a"));
        store.add(Candidate::text("b"));

        assert!(matches!(rx.try_recv(), Ok(StoreEvent::Added(item)) if item.id == a.id));
        assert!(matches!(rx.try_recv(), Ok(StoreEvent::Added(_))));
        assert_eq!(rx.try_recv().ok(), Some(StoreEvent::Removed(a.id)));
    }

    #[test]
    fn mutations_reach_persistence() {
        let persistence = MemoryPersistence::default();
        let store = HistoryStore::open(StoreConfig::default(), Box::new(persistence.clone())).unwrap();

        let a = store.add(Candidate::text("a"));
        let b = store.add(Candidate::text("b"));
        store.pin(a.id, None).unwrap();
        store.delete(b.id).unwrap();
        assert!(store.flush().blocking_recv().unwrap());

        let rows = persistence.rows.lock();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows.get(&a.id).and_then(|item| item.pin_order), Some(0));
    }

    #[test]
    fn failed_flush_is_reported_and_retried() {
        let persistence = MemoryPersistence::default();
        let store = HistoryStore::open(StoreConfig::default(), Box::new(persistence.clone())).unwrap();
        let mut rx = store.subscribe();

        persistence.fail(true);
        let a = store.add(Candidate::text("a"));
        assert!(!store.flush().blocking_recv().unwrap());
        assert!(store.contains(a.id));

        let mut saw_failure = false;
        while let Ok(event) = rx.try_recv() {
            saw_failure |= matches!(event, StoreEvent::PersistenceFailed { .. });
        }
        assert!(saw_failure);

        persistence.fail(false);
        store.add(Candidate::text("b"));
        assert!(store.flush().blocking_recv().unwrap());
        assert_eq!(persistence.rows.lock().len(), 2);
    }

    #[test]
    fn restore_rebuilds_order_and_ids() {
        let seed = store(10);
        let a = seed.add(Candidate::text("a").at(1));
        let b = seed.add(Candidate::text("b").at(2));
        let c = seed.add(Candidate::text("c").at(3));
        seed.pin(b.id, None).unwrap();
        let rows: Vec<HistoryItem> = seed.ordered().iter().map(|i| (**i).clone()).collect();

        let persistence = MemoryPersistence::with_items(rows);
        let store = HistoryStore::open(StoreConfig::default(), Box::new(persistence)).unwrap();
        assert_eq!(texts(&store.ordered()), vec!["b", "c", "a"]);

        let d = store.add(Candidate::text("d"));
        assert!(d.id > c.id && d.id > a.id);
    }

    #[test]
    fn restore_drops_stored_duplicates_and_excess() {
        let make = |id: u64, text: &str, at: i64| {
            let reps = Representations::text(text);
            HistoryItem {
                id: ItemId(id),
                primary_text: reps.primary_text(),
                fingerprint: fingerprint(&reps),
                representations: reps,
                first_copied_at: at,
                last_copied_at: at,
                copy_count: 1,
                pin_order: None,
                source_application: None,
            }
        };
        let persistence = MemoryPersistence::with_items(vec![
            make(1, "x", 1),
            make(2, "x", 2),
            make(3, "y", 3),
            make(4, "z", 4),
        ]);
        let store = HistoryStore::open(
            StoreConfig {
                max_unpinned: 2,
                ..StoreConfig::default()
            },
            Box::new(persistence.clone()),
        )
        .unwrap();

        assert_eq!(texts(&store.ordered()), vec!["z", "y"]);
        assert!(store.flush().blocking_recv().unwrap());
        assert_eq!(persistence.rows.lock().len(), 2);
    }

    #[test]
    fn load_failure_leaves_store_usable() {
        let persistence = MemoryPersistence::default();
        persistence.fail(true);
        let store = HistoryStore::open(StoreConfig::default(), Box::new(persistence.clone())).unwrap();
        assert!(store.is_empty());
        persistence.fail(false);
        store.add(Candidate::text("still works"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn load_failure_keeps_stored_rows_intact() {
        let reps = Representations::text("old precious");
        let precious = HistoryItem {
            id: ItemId(0),
            primary_text: reps.primary_text(),
            fingerprint: fingerprint(&reps),
            representations: reps,
            first_copied_at: 1,
            last_copied_at: 1,
            copy_count: 1,
            pin_order: Some(0),
            source_application: None,
        };
        let persistence = MemoryPersistence::with_items(vec![precious]);
        persistence.fail(true);
        let store = HistoryStore::open(StoreConfig::default(), Box::new(persistence.clone())).unwrap();
        persistence.fail(false);

        store.add(Candidate::text("new"));
        store.clear(false);
        assert!(store.flush().blocking_recv().unwrap());

        let rows = persistence.rows.lock();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows.get(&ItemId(0)).map(|item| item.primary_text.as_str()), Some("old precious"));
    }

    #[test]
    fn ids_continue_above_skipped_rows() {
        let persistence = MemoryPersistence::default();
        let seed = HistoryStore::open(StoreConfig::default(), Box::new(persistence.clone())).unwrap();
        seed.add(Candidate::text("a"));
        let b = seed.add(Candidate::text("b"));
        assert!(seed.flush().blocking_recv().unwrap());
        drop(seed);

        // a row the adapter knows about but cannot decode still owns its id
        let mut hidden = persistence.rows.lock().get(&b.id).cloned().unwrap();
        hidden.id = ItemId(40);
        hidden.representations = Representations::new();
        persistence.rows.lock().insert(hidden.id, hidden);

        let store = HistoryStore::open(StoreConfig::default(), Box::new(persistence.clone())).unwrap();
        let c = store.add(Candidate::text("c"));
        assert!(c.id > ItemId(40));
    }

    #[test]
    fn concurrent_identical_copies_produce_one_item() {
        let store = Arc::new(store(100));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        store.add(Candidate::text(format!("item {}", i % 5)));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.len(), 5);
        let total: u32 = store.ordered().iter().map(|i| i.copy_count).sum();
        assert_eq!(total, 400);
    }
}
