//! Plain-text rendering of history for menu launchers such as rofi.

use crate::item::{ContentKind, HistoryItem, Timestamp};
use serde::Serialize;

const LINE_WIDTH: usize = 80;

/// Compact age such as `42s`, `5m`, `3h` or `2d`.
pub fn format_time_ago(copied_at: Timestamp, now: Timestamp) -> String {
    let ago_secs = (now.saturating_sub(copied_at) / 1000).max(0);

    if ago_secs < 60 {
        format!("{}s", ago_secs)
    } else if ago_secs < 3600 {
        format!("{}m", ago_secs / 60)
    } else if ago_secs < 86400 {
        format!("{}h", ago_secs / 3600)
    } else {
        format!("{}d", ago_secs / 86400)
    }
}

pub fn format_size(bytes: usize) -> String {
    if bytes < 1024 {
        format!("{}B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{}K", bytes / 1024)
    } else {
        format!("{}M", bytes / (1024 * 1024))
    }
}

/// Flattens whitespace and cuts to `max_chars`, ending in `…` when cut.
pub fn truncate_to_fit(text: &str, max_chars: usize) -> String {
    let text = text.replace(['\n', '\t', '\r'], " ");

    if text.chars().count() <= max_chars {
        text
    } else {
        let mut short: String = text.chars().take(max_chars.saturating_sub(1)).collect();
        short.push('…');
        short
    }
}

/// One launcher line: age, preview, optional size, then `#id` for copying
/// the item back. Pinned items carry a `*` after the age.
pub fn history_line(item: &HistoryItem, now: Timestamp, max_display_length: usize) -> String {
    let mut age = format_time_ago(item.last_copied_at, now);
    if item.is_pinned() {
        age.push('*');
    }
    let tag = format!("#{}", item.id);
    let size = item.representations.total_size();

    let budget = LINE_WIDTH
        .min(max_display_length)
        .saturating_sub(age.len() + tag.len() + 2);

    if item.representations.as_text().is_some() {
        if size > 1024 {
            let size_str = format!("[{}]", format_size(size));
            let preview = truncate_to_fit(&item.primary_text, budget.saturating_sub(size_str.len() + 1));
            format!("{} {} {} {}", age, preview, size_str, tag)
        } else {
            format!("{} {} {}", age, truncate_to_fit(&item.primary_text, budget), tag)
        }
    } else if item.representations.contains(&ContentKind::Png) {
        format!("{} [IMG {}] {}", age, format_size(size), tag)
    } else {
        format!("{} {} {}", age, truncate_to_fit(&item.primary_text, budget), tag)
    }
}

/// Machine-readable form of one history item for `print --json`.
#[derive(Debug, Serialize)]
pub struct HistoryRow<'a> {
    pub id: u64,
    pub text: &'a str,
    pub kinds: Vec<&'a str>,
    pub size: usize,
    pub pinned: bool,
    pub copy_count: u32,
    pub first_copied_at: Timestamp,
    pub last_copied_at: Timestamp,
    pub source_application: Option<&'a str>,
}

impl<'a> From<&'a HistoryItem> for HistoryRow<'a> {
    fn from(item: &'a HistoryItem) -> Self {
        Self {
            id: item.id.0,
            text: &item.primary_text,
            kinds: item.representations.kinds().map(|kind| kind.tag()).collect(),
            size: item.representations.total_size(),
            pinned: item.is_pinned(),
            copy_count: item.copy_count,
            first_copied_at: item.first_copied_at,
            last_copied_at: item.last_copied_at,
            source_application: item.source_application.as_deref(),
        }
    }
}

pub fn history_json(item: &HistoryItem) -> serde_json::Result<String> {
    serde_json::to_string(&HistoryRow::from(item))
}
