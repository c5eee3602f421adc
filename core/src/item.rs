use crate::fingerprint::Fingerprint;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the unix epoch.
pub type Timestamp = i64;

pub fn now_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as Timestamp
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemId(pub u64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ItemId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().trim_start_matches('#').parse().map(ItemId)
    }
}

/// Type tag of one clipboard representation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ContentKind {
    Text,
    Rtf,
    Html,
    Png,
    FileUrl,
    Other(String),
}

impl ContentKind {
    pub fn tag(&self) -> &str {
        match self {
            ContentKind::Text => "public.utf8-plain-text",
            ContentKind::Rtf => "public.rtf",
            ContentKind::Html => "public.html",
            ContentKind::Png => "public.png",
            ContentKind::FileUrl => "public.file-url",
            ContentKind::Other(tag) => tag,
        }
    }

    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "public.utf8-plain-text" | "text/plain" => ContentKind::Text,
            "public.rtf" | "text/rtf" => ContentKind::Rtf,
            "public.html" | "text/html" => ContentKind::Html,
            "public.png" | "image/png" => ContentKind::Png,
            "public.file-url" | "text/uri-list" => ContentKind::FileUrl,
            other => ContentKind::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// The representations of one clipboard payload, keyed by type tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Representations(BTreeMap<ContentKind, Vec<u8>>);

impl Representations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(text: impl Into<String>) -> Self {
        let mut reps = Self::new();
        reps.insert(ContentKind::Text, text.into().into_bytes());
        reps
    }

    pub fn insert(&mut self, kind: ContentKind, bytes: Vec<u8>) -> Option<Vec<u8>> {
        self.0.insert(kind, bytes)
    }

    pub fn get(&self, kind: &ContentKind) -> Option<&[u8]> {
        self.0.get(kind).map(Vec::as_slice)
    }

    pub fn contains(&self, kind: &ContentKind) -> bool {
        self.0.contains_key(kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ContentKind, &[u8])> {
        self.0.iter().map(|(k, v)| (k, v.as_slice()))
    }

    pub fn kinds(&self) -> impl Iterator<Item = &ContentKind> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn total_size(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    pub fn as_text(&self) -> Option<String> {
        self.get(&ContentKind::Text)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    /// Overwrites every payload with zeros before dropping it.
    pub fn zeroize(mut self) {
        use zeroize::Zeroize;
        for bytes in self.0.values_mut() {
            bytes.zeroize();
        }
    }

    /// Display and search string: the text representation when present,
    /// otherwise a placeholder naming the richest available type.
    pub fn primary_text(&self) -> String {
        if let Some(text) = self.as_text() {
            return text;
        }
        if let Some(url) = self.get(&ContentKind::FileUrl) {
            let url = String::from_utf8_lossy(url);
            return url.trim_start_matches("file://").to_string();
        }
        if self.contains(&ContentKind::Png) {
            return "[Image]".to_string();
        }
        if self.contains(&ContentKind::Html) || self.contains(&ContentKind::Rtf) {
            return "[Rich text]".to_string();
        }
        match self.kinds().next() {
            Some(kind) => format!("[{}]", kind),
            None => String::new(),
        }
    }
}

impl FromIterator<(ContentKind, Vec<u8>)> for Representations {
    fn from_iter<I: IntoIterator<Item = (ContentKind, Vec<u8>)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A freshly observed clipboard payload, not yet part of the history.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub representations: Representations,
    pub source_application: Option<String>,
    pub copied_at: Timestamp,
}

impl Candidate {
    pub fn new(representations: Representations) -> Self {
        Self {
            representations,
            source_application: None,
            copied_at: now_millis(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(Representations::text(text))
    }

    pub fn from_app(mut self, app: impl Into<String>) -> Self {
        self.source_application = Some(app.into());
        self
    }

    pub fn at(mut self, copied_at: Timestamp) -> Self {
        self.copied_at = copied_at;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryItem {
    pub id: ItemId,
    pub representations: Representations,
    pub primary_text: String,
    pub fingerprint: Fingerprint,
    pub first_copied_at: Timestamp,
    pub last_copied_at: Timestamp,
    pub copy_count: u32,
    /// Position in the pinned block; `None` for unpinned items.
    pub pin_order: Option<u32>,
    pub source_application: Option<String>,
}

impl HistoryItem {
    pub fn is_pinned(&self) -> bool {
        self.pin_order.is_some()
    }

    /// Single-line form of the primary text, shortened to `max_chars`.
    pub fn title(&self, max_chars: usize) -> String {
        let flat: String = self
            .primary_text
            .trim()
            .chars()
            .map(|c| if c == '\n' || c == '\r' || c == '\t' { ' ' } else { c })
            .collect();

        if flat.chars().count() <= max_chars {
            flat
        } else {
            let mut short: String = flat.chars().take(max_chars.saturating_sub(1)).collect();
            short.push('…');
            short
        }
    }
}

/// Shared, immutable handle to a history item as it was when handed out.
pub type ItemRef = Arc<HistoryItem>;
