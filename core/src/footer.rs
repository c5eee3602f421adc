use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FooterId(pub &'static str);

impl fmt::Display for FooterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FooterAction {
    /// Clear unpinned history.
    Clear,
    /// Clear everything, pinned items included.
    ClearAll,
    Preferences,
    About,
    Quit,
}

type Visibility = Arc<dyn Fn() -> bool + Send + Sync>;

#[derive(Clone)]
pub struct FooterItem {
    pub id: FooterId,
    pub title: String,
    pub action: FooterAction,
    visible: Visibility,
}

impl FooterItem {
    pub fn new(id: &'static str, title: impl Into<String>, action: FooterAction) -> Self {
        Self {
            id: FooterId(id),
            title: title.into(),
            action,
            visible: Arc::new(|| true),
        }
    }

    pub fn visible_when(mut self, predicate: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.visible = Arc::new(predicate);
        self
    }

    pub fn is_visible(&self) -> bool {
        (self.visible)()
    }
}

impl fmt::Debug for FooterItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FooterItem")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("action", &self.action)
            .field("visible", &self.is_visible())
            .finish()
    }
}

/// Fixed action entries shown after the history items.
#[derive(Debug, Clone)]
pub struct Footer {
    items: Vec<FooterItem>,
    all_modifier: Arc<AtomicBool>,
}

impl Footer {
    pub fn new(items: Vec<FooterItem>) -> Self {
        Self {
            items,
            all_modifier: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn items(&self) -> &[FooterItem] {
        &self.items
    }

    pub fn visible(&self) -> impl Iterator<Item = &FooterItem> {
        self.items.iter().filter(|item| item.is_visible())
    }

    pub fn get(&self, id: FooterId) -> Option<&FooterItem> {
        self.items.iter().find(|item| item.id == id)
    }

    /// Whether the "all" modifier is held, which swaps `clear` for
    /// `clear_all` in the default footer.
    pub fn set_all_modifier(&self, held: bool) {
        self.all_modifier.store(held, Ordering::SeqCst);
    }
}

impl Default for Footer {
    fn default() -> Self {
        let held = Arc::new(AtomicBool::new(false));
        let clear_held = Arc::clone(&held);
        let clear_all_held = Arc::clone(&held);

        Self {
            items: vec![
                FooterItem::new("clear", "Clear", FooterAction::Clear)
                    .visible_when(move || !clear_held.load(Ordering::SeqCst)),
                FooterItem::new("clear_all", "Clear all", FooterAction::ClearAll)
                    .visible_when(move || clear_all_held.load(Ordering::SeqCst)),
                FooterItem::new("preferences", "Preferences…", FooterAction::Preferences),
                FooterItem::new("about", "About", FooterAction::About),
                FooterItem::new("quit", "Quit", FooterAction::Quit),
            ],
            all_modifier: held,
        }
    }
}
