use crate::item::{ItemId, Timestamp};
use lru::LruCache;

/// Recency ordering of unpinned items, most recent first.
///
/// Unbounded: eviction is driven by the store so that pinned items and the
/// configured limit stay in one place.
pub struct RecencyIndex {
    inner: LruCache<ItemId, Timestamp>,
}

impl RecencyIndex {
    pub fn new() -> Self {
        Self {
            inner: LruCache::unbounded(),
        }
    }

    /// Moves `id` to the front, inserting it if absent.
    pub fn touch(&mut self, id: ItemId, last_copied_at: Timestamp) {
        self.inner.put(id, last_copied_at);
    }

    /// Appends `id` behind everything already present. Used when rebuilding
    /// from storage, where items arrive most recent first.
    pub fn push_back(&mut self, id: ItemId, last_copied_at: Timestamp) {
        self.inner.put(id, last_copied_at);
        self.inner.demote(&id);
    }

    pub fn remove(&mut self, id: ItemId) -> Option<Timestamp> {
        self.inner.pop(&id)
    }

    pub fn pop_least_recent(&mut self) -> Option<ItemId> {
        self.inner.pop_lru().map(|(id, _)| id)
    }

    pub fn peek_least_recent(&self) -> Option<ItemId> {
        self.inner.peek_lru().map(|(id, _)| *id)
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.inner.contains(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.inner.iter().map(|(id, _)| *id)
    }

    pub fn front(&self) -> Option<ItemId> {
        self.iter().next()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl Default for RecencyIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(index: &RecencyIndex) -> Vec<u64> {
        index.iter().map(|id| id.0).collect()
    }

    #[test]
    fn touch_moves_to_front() {
        let mut index = RecencyIndex::new();
        index.touch(ItemId(1), 10);
        index.touch(ItemId(2), 20);
        index.touch(ItemId(3), 30);
        assert_eq!(ids(&index), vec![3, 2, 1]);

        index.touch(ItemId(1), 40);
        assert_eq!(ids(&index), vec![1, 3, 2]);
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn pop_least_recent_takes_the_tail() {
        let mut index = RecencyIndex::new();
        index.touch(ItemId(1), 10);
        index.touch(ItemId(2), 20);
        assert_eq!(index.peek_least_recent(), Some(ItemId(1)));
        assert_eq!(index.pop_least_recent(), Some(ItemId(1)));
        assert_eq!(ids(&index), vec![2]);
    }

    #[test]
    fn push_back_preserves_load_order() {
        let mut index = RecencyIndex::new();
        index.push_back(ItemId(5), 50);
        index.push_back(ItemId(4), 40);
        index.push_back(ItemId(3), 30);
        assert_eq!(ids(&index), vec![5, 4, 3]);
        assert_eq!(index.front(), Some(ItemId(5)));
    }

    #[test]
    fn remove_drops_the_entry() {
        let mut index = RecencyIndex::new();
        index.touch(ItemId(1), 1);
        index.touch(ItemId(2), 2);
        assert_eq!(index.remove(ItemId(1)), Some(1));
        assert!(!index.contains(ItemId(1)));
        assert_eq!(index.remove(ItemId(2)), Some(2));
        assert!(index.is_empty());
    }
}
