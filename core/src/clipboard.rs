//! Access to the system clipboard.

use crate::error::ClipboardError;
use crate::item::{ContentKind, Representations};
use arboard::{Clipboard, ImageData};
use blake3::Hasher;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// What one pass over the enabled types produced.
#[derive(Debug, Default)]
pub struct ReadOutcome {
    pub representations: Representations,
    pub failures: Vec<ClipboardError>,
}

pub trait SystemClipboard: Send {
    /// Counter that changes whenever the clipboard contents change.
    fn change_count(&mut self) -> Result<u64, ClipboardError>;

    /// `Ok(None)` when the clipboard holds nothing of this type.
    fn read(&mut self, kind: &ContentKind) -> Result<Option<Vec<u8>>, ClipboardError>;

    fn write(&mut self, representations: &Representations) -> Result<(), ClipboardError>;

    /// Identifier of the application that owns the current contents, when
    /// the platform exposes one.
    fn source_application(&mut self) -> Option<String> {
        None
    }

    /// Reads every enabled type; a failing type does not stop the others.
    fn read_all(&mut self, enabled: &[ContentKind]) -> ReadOutcome {
        let mut outcome = ReadOutcome::default();
        for kind in enabled {
            match self.read(kind) {
                Ok(Some(bytes)) => {
                    outcome.representations.insert(kind.clone(), bytes);
                }
                Ok(None) => {}
                Err(e) => outcome.failures.push(e),
            }
        }
        outcome
    }
}

/// The desktop clipboard through `arboard`.
///
/// arboard has no change counter, so one is derived from a hash of the
/// current text and image contents.
pub struct ArboardClipboard {
    clipboard: Clipboard,
    last_hash: Option<blake3::Hash>,
    count: u64,
}

impl ArboardClipboard {
    pub fn new() -> Result<Self, ClipboardError> {
        let clipboard = Clipboard::new().map_err(|e| ClipboardError::Unavailable(e.to_string()))?;
        Ok(Self {
            clipboard,
            last_hash: None,
            count: 0,
        })
    }

    fn contents_hash(&mut self) -> blake3::Hash {
        let mut hasher = Hasher::new();
        if let Ok(text) = self.clipboard.get_text() {
            hasher.update(b"text");
            hasher.update(text.as_bytes());
        }
        if let Ok(img) = self.clipboard.get_image() {
            hasher.update(b"image");
            hasher.update(&(img.width as u64).to_le_bytes());
            hasher.update(&img.bytes);
        }
        hasher.finalize()
    }
}

impl SystemClipboard for ArboardClipboard {
    fn change_count(&mut self) -> Result<u64, ClipboardError> {
        let hash = self.contents_hash();
        if self.last_hash != Some(hash) {
            self.last_hash = Some(hash);
            self.count += 1;
        }
        Ok(self.count)
    }

    fn read(&mut self, kind: &ContentKind) -> Result<Option<Vec<u8>>, ClipboardError> {
        let read_error = |e: arboard::Error| ClipboardError::Read {
            kind: kind.clone(),
            reason: e.to_string(),
        };

        match kind {
            ContentKind::Text => match self.clipboard.get_text() {
                Ok(text) => Ok(Some(text.into_bytes())),
                Err(arboard::Error::ContentNotAvailable) => Ok(None),
                Err(e) => Err(read_error(e)),
            },
            ContentKind::Png => match self.clipboard.get_image() {
                Ok(img) => image_to_png(&img).map(Some).map_err(|reason| ClipboardError::Read {
                    kind: kind.clone(),
                    reason,
                }),
                Err(arboard::Error::ContentNotAvailable) => Ok(None),
                Err(e) => Err(read_error(e)),
            },
            _ => Ok(None),
        }
    }

    fn write(&mut self, representations: &Representations) -> Result<(), ClipboardError> {
        let write_error = |e: arboard::Error| ClipboardError::Write(e.to_string());
        let text = representations.as_text();

        if let Some(html) = representations.get(&ContentKind::Html) {
            let html = String::from_utf8_lossy(html).into_owned();
            return self.clipboard.set_html(html, text).map_err(write_error);
        }
        if let Some(text) = text {
            return self.clipboard.set_text(text).map_err(write_error);
        }
        if let Some(png) = representations.get(&ContentKind::Png) {
            let img = image::load_from_memory(png).map_err(|e| ClipboardError::Write(e.to_string()))?;
            let rgba = img.to_rgba8();
            let (width, height) = (rgba.width() as usize, rgba.height() as usize);
            let img_data = ImageData {
                width,
                height,
                bytes: rgba.into_raw().into(),
            };
            return self.clipboard.set_image(img_data).map_err(write_error);
        }
        if let Some(url) = representations.get(&ContentKind::FileUrl) {
            let path = String::from_utf8_lossy(url).into_owned();
            return self.clipboard.set_text(path).map_err(write_error);
        }
        Err(ClipboardError::Write("nothing writable in payload".to_string()))
    }
}

fn image_to_png(img: &ImageData) -> Result<Vec<u8>, String> {
    use image::{ImageBuffer, Rgba};

    let width = img.width as u32;
    let height = img.height as u32;

    let buffer = ImageBuffer::<Rgba<u8>, Vec<u8>>::from_raw(width, height, img.bytes.to_vec())
        .ok_or_else(|| "image buffer size mismatch".to_string())?;

    let mut png = Vec::new();
    let encoder = image::codecs::png::PngEncoder::new(&mut png);
    image::ImageEncoder::write_image(encoder, &buffer, width, height, image::ExtendedColorType::Rgba8)
        .map_err(|e| e.to_string())?;
    Ok(png)
}

#[derive(Debug, Default)]
struct MemoryState {
    change_count: u64,
    contents: Representations,
    source_application: Option<String>,
    failing: HashSet<ContentKind>,
}

/// In-process clipboard. Clones share the same contents, so one handle can
/// play the user while another is owned by a monitor.
#[derive(Debug, Clone, Default)]
pub struct MemoryClipboard {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates a copy made by another application.
    pub fn copy(&self, representations: Representations, source_application: Option<&str>) {
        let mut state = self.state.lock();
        state.contents = representations;
        state.source_application = source_application.map(str::to_string);
        state.change_count += 1;
    }

    pub fn copy_text(&self, text: &str) {
        self.copy(Representations::text(text), None);
    }

    pub fn contents(&self) -> Representations {
        self.state.lock().contents.clone()
    }

    /// Makes reads of `kind` fail until cleared.
    pub fn fail_reads(&self, kind: ContentKind, failing: bool) {
        let mut state = self.state.lock();
        if failing {
            state.failing.insert(kind);
        } else {
            state.failing.remove(&kind);
        }
    }
}

impl SystemClipboard for MemoryClipboard {
    fn change_count(&mut self) -> Result<u64, ClipboardError> {
        Ok(self.state.lock().change_count)
    }

    fn read(&mut self, kind: &ContentKind) -> Result<Option<Vec<u8>>, ClipboardError> {
        let state = self.state.lock();
        if state.failing.contains(kind) {
            return Err(ClipboardError::Read {
                kind: kind.clone(),
                reason: "simulated failure".to_string(),
            });
        }
        Ok(state.contents.get(kind).map(<[u8]>::to_vec))
    }

    fn write(&mut self, representations: &Representations) -> Result<(), ClipboardError> {
        let mut state = self.state.lock();
        state.contents = representations.clone();
        state.source_application = None;
        state.change_count += 1;
        Ok(())
    }

    fn source_application(&mut self) -> Option<String> {
        self.state.lock().source_application.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_all_skips_failing_types() {
        let mut clipboard = MemoryClipboard::new();
        let mut reps = Representations::text("hi");
        reps.insert(ContentKind::Html, b"<i>hi</i>".to_vec());
        clipboard.copy(reps, Some("Editor"));
        clipboard.fail_reads(ContentKind::Html, true);

        let outcome = clipboard.read_all(&[ContentKind::Text, ContentKind::Html, ContentKind::Png]);
        assert_eq!(outcome.representations, Representations::text("hi"));
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(clipboard.source_application().as_deref(), Some("Editor"));
    }

    #[test]
    fn writes_bump_the_counter() {
        let mut clipboard = MemoryClipboard::new();
        let before = clipboard.change_count().unwrap();
        clipboard.write(&Representations::text("x")).unwrap();
        assert_eq!(clipboard.change_count().unwrap(), before + 1);
        assert_eq!(clipboard.contents().as_text().as_deref(), Some("x"));
    }

    #[test]
    fn png_encoding_keeps_dimensions() {
        let img = ImageData {
            width: 2,
            height: 3,
            bytes: vec![255u8; 2 * 3 * 4].into(),
        };
        let png = image_to_png(&img).unwrap();
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (2, 3));
    }
}
