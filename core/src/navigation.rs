//! Keyboard selection over the visible history followed by the footer.
//!
//! Only identifiers are held here. The visible sequence is rebuilt from the
//! store and footer on every call, so a transition never works from a stale
//! ordering, and a selection that dropped out of it reads as no selection.

use crate::footer::{Footer, FooterAction, FooterId};
use crate::item::{ItemId, ItemRef};
use crate::store::HistoryStore;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryId {
    History(ItemId),
    Footer(FooterId),
}

/// Result of activating the current selection.
#[derive(Debug, Clone, PartialEq)]
pub enum Activation {
    Copy(ItemRef),
    Footer(FooterAction),
    /// Nothing was selected; the search text itself is to be copied.
    CopyText(String),
}

pub struct Navigator {
    store: Arc<HistoryStore>,
    footer: Footer,
    selection: Option<EntryId>,
    query: String,
    wrap: bool,
}

impl Navigator {
    /// `wrap` makes every transition behave as if `allow_cycle` were set.
    pub fn new(store: Arc<HistoryStore>, footer: Footer, wrap: bool) -> Self {
        Self {
            store,
            footer,
            selection: None,
            query: String::new(),
            wrap,
        }
    }

    pub fn footer(&self) -> &Footer {
        &self.footer
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    /// History items matching the active query, in display order.
    pub fn visible_items(&self) -> Vec<ItemRef> {
        self.store.visible_items(&self.query)
    }

    /// The concatenated sequence navigation moves through.
    pub fn visible(&self) -> Vec<EntryId> {
        let history = self.store.search(&self.query);
        history
            .iter()
            .map(|item| EntryId::History(item.id))
            .chain(self.footer.visible().map(|item| EntryId::Footer(item.id)))
            .collect()
    }

    pub fn selected(&self) -> Option<EntryId> {
        let selection = self.selection?;
        self.visible().contains(&selection).then_some(selection)
    }

    /// Selects `id` if it is currently visible.
    pub fn select(&mut self, id: EntryId) -> bool {
        if self.visible().contains(&id) {
            self.selection = Some(id);
            true
        } else {
            false
        }
    }

    pub fn clear_selection(&mut self) {
        self.selection = None;
    }

    pub fn set_query(&mut self, query: impl Into<String>) {
        self.query = query.into();
        if let Some(selection) = self.selection {
            if !self.visible().contains(&selection) {
                self.selection = None;
            }
        }
    }

    pub fn first(&mut self) -> Option<EntryId> {
        let visible = self.visible();
        if let Some(first) = visible.first() {
            self.selection = Some(*first);
        }
        self.settle(&visible)
    }

    pub fn last(&mut self) -> Option<EntryId> {
        let visible = self.visible();
        if let Some(last) = visible.last() {
            self.selection = Some(*last);
        }
        self.settle(&visible)
    }

    pub fn next(&mut self, allow_cycle: bool) -> Option<EntryId> {
        let visible = self.visible();
        match self.position_in(&visible) {
            _ if visible.is_empty() => {}
            None => self.selection = Some(visible[0]),
            Some(i) if i + 1 < visible.len() => self.selection = Some(visible[i + 1]),
            Some(_) if allow_cycle || self.wrap => self.selection = Some(visible[0]),
            Some(_) => {}
        }
        self.settle(&visible)
    }

    pub fn previous(&mut self, allow_cycle: bool) -> Option<EntryId> {
        let visible = self.visible();
        match self.position_in(&visible) {
            None => {}
            Some(0) if allow_cycle || self.wrap => self.selection = visible.last().copied(),
            Some(0) => {}
            Some(i) => self.selection = Some(visible[i - 1]),
        }
        self.settle(&visible)
    }

    /// Drops a selection that is no longer in `visible` and returns what is
    /// left.
    fn settle(&mut self, visible: &[EntryId]) -> Option<EntryId> {
        if self.selection.is_some_and(|selection| !visible.contains(&selection)) {
            self.selection = None;
        }
        self.selection
    }

    /// Acts on the selection. Without one, a non-empty query is handed back
    /// for copying and reset.
    pub fn activate(&mut self) -> Option<Activation> {
        match self.selected() {
            Some(EntryId::History(id)) => self.store.get(id).map(Activation::Copy),
            Some(EntryId::Footer(id)) => self.footer.get(id).map(|item| Activation::Footer(item.action)),
            None if !self.query.is_empty() => {
                let text = std::mem::take(&mut self.query);
                self.selection = None;
                Some(Activation::CopyText(text))
            }
            None => None,
        }
    }

    fn position_in(&self, visible: &[EntryId]) -> Option<usize> {
        let selection = self.selection?;
        visible.iter().position(|entry| *entry == selection)
    }
}
