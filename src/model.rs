//! Data model shared by the fetch and reconstruction stages.
//!
//! Wire-facing types deserialise the StreamDocs JSON directly; field renames
//! live here so the rest of the crate can use descriptive names.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

// ── Identity ─────────────────────────────────────────────────────────────

/// Opaque identifier of a remote document. Stable across runs, so it also
/// names the document's cache namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id can name a single directory under the cache root:
    /// non-empty, not `.` or `..`, and free of path separators.
    pub fn is_path_safe(&self) -> bool {
        !matches!(self.0.as_str(), "" | "." | "..")
            && !self.0.contains(['/', '\\', '\0'])
    }

    /// First 32 characters, used for the fallback output filename.
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(32) {
            Some((end, _)) => &self.0[..end],
            None => &self.0,
        }
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Page geometry ────────────────────────────────────────────────────────

/// Physical page size. Doubles as the coordinate space for both the
/// background image and the text overlay (origin bottom-left, no unit
/// conversion).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireLayout", into = "WireLayout")]
pub struct PageLayout {
    pub width: f32,
    pub height: f32,
}

impl PageLayout {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

#[derive(Serialize, Deserialize)]
struct WireLayout {
    bbox: WireBox,
}

#[derive(Serialize, Deserialize)]
struct WireBox {
    w: f32,
    h: f32,
}

impl From<WireLayout> for PageLayout {
    fn from(l: WireLayout) -> Self {
        PageLayout::new(l.bbox.w, l.bbox.h)
    }
}

impl From<PageLayout> for WireLayout {
    fn from(l: PageLayout) -> Self {
        WireLayout {
            bbox: WireBox {
                w: l.width,
                h: l.height,
            },
        }
    }
}

/// Bounding rectangle of one character.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub left: f32,
    pub bottom: f32,
    pub top: f32,
}

/// A run of text with one rectangle per character.
///
/// `rects[i]` belongs to the i-th `char` of `text`. When the two lengths
/// differ only the common prefix is placed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    #[serde(default)]
    pub text: String,
    #[serde(rename = "rect", default)]
    pub rects: Vec<Rect>,
}

impl TextBlock {
    pub fn new(text: impl Into<String>, rects: Vec<Rect>) -> Self {
        Self {
            text: text.into(),
            rects,
        }
    }
}

/// All text blocks of one page, in service order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageText(pub Vec<TextBlock>);

impl PageText {
    pub fn blocks(&self) -> &[TextBlock] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Build from a raw JSON payload, skipping anything malformed.
    ///
    /// A non-array payload yields an empty page; a block that does not match
    /// the expected shape is dropped with a warning and the rest are kept.
    pub fn from_json(page: usize, value: serde_json::Value) -> Self {
        let serde_json::Value::Array(items) = value else {
            warn!("Page {}: text payload is not an array; no text layer", page + 1);
            return PageText::default();
        };
        let mut blocks = Vec::with_capacity(items.len());
        for (i, item) in items.into_iter().enumerate() {
            match serde_json::from_value::<TextBlock>(item) {
                Ok(block) => blocks.push(block),
                Err(e) => warn!("Page {}: skipping malformed text block {}: {}", page + 1, i, e),
            }
        }
        PageText(blocks)
    }
}

// ── Document metadata ────────────────────────────────────────────────────

/// Document information dictionary as served by the viewer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DocumentInfo {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub keywords: Option<String>,
    #[serde(default)]
    pub creator: Option<String>,
    #[serde(default)]
    pub producer: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
}

impl DocumentInfo {
    /// Title, falling back to the original filename, then to "".
    pub fn resolved_title(&self) -> &str {
        non_empty(&self.title)
            .or_else(|| non_empty(&self.file_name))
            .unwrap_or("")
    }

    /// Original filename when the service reports one.
    pub fn file_name(&self) -> Option<&str> {
        non_empty(&self.file_name)
    }
}

fn non_empty(v: &Option<String>) -> Option<&str> {
    v.as_deref().filter(|s| !s.is_empty())
}

/// Everything learned from the one-shot metadata request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub layouts: Vec<PageLayout>,
    pub info: DocumentInfo,
    /// The original, unrendered file may be downloaded directly.
    pub downloadable: bool,
}

impl DocumentMetadata {
    pub fn page_count(&self) -> usize {
        self.layouts.len()
    }
}

// ── Fetch units ──────────────────────────────────────────────────────────

/// The two per-page artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    Image,
    Text,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 2] = [ResourceKind::Image, ResourceKind::Text];
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Image => f.write_str("image"),
            ResourceKind::Text => f.write_str("text"),
        }
    }
}

/// One schedulable item: the unit of retry and of progress reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FetchUnit {
    pub kind: ResourceKind,
    pub page_index: usize,
}

impl FetchUnit {
    pub fn new(kind: ResourceKind, page_index: usize) -> Self {
        Self { kind, page_index }
    }
}

impl fmt::Display for FetchUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of page {}", self.kind, self.page_index + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn path_safe_ids_name_one_directory() {
        assert!(DocumentId::new("72059197").is_path_safe());
        assert!(DocumentId::new("a..b").is_path_safe());
        for id in ["", ".", "..", "../x", "a/b", "a\\b"] {
            assert!(!DocumentId::new(id).is_path_safe(), "{id}");
        }
    }

    #[test]
    fn short_id_truncates_on_char_boundary() {
        let long = DocumentId::new("a".repeat(40));
        assert_eq!(long.short().len(), 32);
        let short = DocumentId::new("abc");
        assert_eq!(short.short(), "abc");
    }

    #[test]
    fn layout_reads_bbox() {
        let l: PageLayout = serde_json::from_value(json!({"bbox": {"w": 595.5, "h": 842}})).unwrap();
        assert_eq!(l, PageLayout::new(595.5, 842.0));
    }

    #[test]
    fn text_block_uses_rect_wire_name_and_ignores_extra_fields() {
        let b: TextBlock = serde_json::from_value(json!({
            "text": "AB",
            "rect": [
                {"left": 10, "bottom": 20, "top": 30, "right": 18},
                {"left": 40, "bottom": 20, "top": 28}
            ],
            "font": "x"
        }))
        .unwrap();
        assert_eq!(b.text, "AB");
        assert_eq!(b.rects.len(), 2);
        assert_eq!(b.rects[1].top, 28.0);
    }

    #[test]
    fn page_text_skips_malformed_blocks() {
        let v = json!([
            {"text": "ok", "rect": [{"left": 1, "bottom": 2, "top": 3}]},
            {"text": "bad", "rect": [{"left": "x"}]},
            {"rect": []}
        ]);
        let page = PageText::from_json(0, v);
        assert_eq!(page.blocks().len(), 2);
        assert_eq!(page.blocks()[0].text, "ok");
        assert_eq!(page.blocks()[1].text, "");
    }

    #[test]
    fn page_text_from_non_array_is_empty() {
        assert!(PageText::from_json(3, json!({"error": "nope"})).is_empty());
    }

    #[test]
    fn title_falls_back_to_filename() {
        let mut info = DocumentInfo {
            file_name: Some("KS X 1001.pdf".into()),
            ..Default::default()
        };
        assert_eq!(info.resolved_title(), "KS X 1001.pdf");
        info.title = Some(String::new());
        assert_eq!(info.resolved_title(), "KS X 1001.pdf");
        info.title = Some("Code".into());
        assert_eq!(info.resolved_title(), "Code");
        assert_eq!(DocumentInfo::default().resolved_title(), "");
    }

    #[test]
    fn info_reads_pascal_case_keys() {
        let info: DocumentInfo = serde_json::from_value(json!({
            "Title": "T", "Author": "A", "FileName": "f.pdf", "Pages": 3
        }))
        .unwrap();
        assert_eq!(info.title.as_deref(), Some("T"));
        assert_eq!(info.author.as_deref(), Some("A"));
        assert_eq!(info.file_name(), Some("f.pdf"));
        assert_eq!(info.subject, None);
    }

    #[test]
    fn fetch_unit_display_is_one_indexed() {
        assert_eq!(
            FetchUnit::new(ResourceKind::Text, 0).to_string(),
            "text of page 1"
        );
    }
}
