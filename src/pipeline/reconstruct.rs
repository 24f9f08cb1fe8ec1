//! Page reconstruction and document assembly.
//!
//! Both stages only *emit builder calls*; they hold no drawing state of their
//! own. [`crate::pipeline::pdf::PdfDocumentBuilder`] turns the calls into a
//! PDF, and the tests below record them instead.
//!
//! ## Per page
//!
//! ```text
//! set_size(layout)
//! draw_background_image(bytes, width, height)      if an image exists
//! set_overlay_alpha(0)                             if text exists
//! draw_glyph(ch, rect.left, rect.bottom, size)     per (char, rect) pair
//! ```
//!
//! Glyphs are paired with rectangles by zipping, so a block with fewer
//! rectangles than characters places only the common prefix. Blocks with no
//! text or no rectangles are skipped.

use crate::error::StreamDocError;
use crate::model::{DocumentInfo, PageLayout, PageText, Rect};
use crate::progress::ProgressCallback;
use tracing::debug;

/// Drawing surface for one output page.
pub trait PageBuilder {
    /// Physical page size; also the coordinate space for everything drawn.
    fn set_size(&mut self, layout: PageLayout);

    /// Draw a raster stretched to `width × height`, anchored at the origin.
    fn draw_background_image(&mut self, image: Vec<u8>, width: f32, height: f32);

    /// Fill/stroke opacity for everything drawn afterwards.
    fn set_overlay_alpha(&mut self, alpha: f32);

    /// Place one character with its baseline origin at `(left, bottom)`.
    fn draw_glyph(&mut self, ch: char, left: f32, bottom: f32, font_size: f32);
}

/// A document under construction.
pub trait DocumentBuilder {
    type Page: PageBuilder;
    type Output;

    /// Document information. Called once, before the first page.
    fn set_metadata(&mut self, info: &DocumentInfo);

    /// Start a fresh page.
    fn new_page(&mut self) -> Self::Page;

    /// Close `page` and append it after the pages already added.
    fn append_page(&mut self, page: Self::Page) -> Result<(), StreamDocError>;

    /// Flush everything and hand back the finished document.
    fn finalize(self) -> Result<Self::Output, StreamDocError>;
}

/// Everything known about one page once fetching is done.
#[derive(Debug, Clone, PartialEq)]
pub struct PageInput {
    pub layout: PageLayout,
    pub image: Option<Vec<u8>>,
    pub text: Option<PageText>,
}

/// Pair every page layout with its fetched artifacts, in page order.
///
/// Missing trailing slots are treated as absent.
pub fn collect_page_inputs(
    layouts: &[PageLayout],
    images: Vec<Option<Vec<u8>>>,
    texts: Vec<Option<PageText>>,
) -> Vec<PageInput> {
    let mut images = images.into_iter();
    let mut texts = texts.into_iter();
    layouts
        .iter()
        .map(|layout| PageInput {
            layout: *layout,
            image: images.next().flatten(),
            text: texts.next().flatten(),
        })
        .collect()
}

/// Font size for a glyph: its rectangle height, never below 1.
pub fn overlay_font_size(rect: &Rect) -> f32 {
    (rect.top - rect.bottom).max(1.0)
}

/// Emit the drawing calls for one page. Returns the number of glyphs placed.
pub fn reconstruct_page<P: PageBuilder>(page: &mut P, input: PageInput) -> usize {
    let PageInput {
        layout,
        image,
        text,
    } = input;

    page.set_size(layout);

    if let Some(image) = image {
        page.draw_background_image(image, layout.width, layout.height);
    }

    let Some(text) = text.filter(|t| !t.is_empty()) else {
        return 0;
    };

    page.set_overlay_alpha(0.0);
    let mut placed = 0;
    for block in text.blocks() {
        if block.text.is_empty() || block.rects.is_empty() {
            continue;
        }
        for (ch, rect) in block.text.chars().zip(&block.rects) {
            page.draw_glyph(ch, rect.left, rect.bottom, overlay_font_size(rect));
            placed += 1;
        }
    }
    placed
}

/// Apply metadata once, then build and append every page in order.
pub fn assemble_document<B: DocumentBuilder>(
    mut builder: B,
    info: &DocumentInfo,
    pages: Vec<PageInput>,
    progress: Option<&ProgressCallback>,
) -> Result<B::Output, StreamDocError> {
    let total = pages.len();
    builder.set_metadata(info);
    if let Some(cb) = progress {
        cb.on_build_start(total);
    }

    for (i, input) in pages.into_iter().enumerate() {
        let mut page = builder.new_page();
        let glyphs = reconstruct_page(&mut page, input);
        builder.append_page(page)?;
        debug!("Page {}/{}: {} glyphs", i + 1, total, glyphs);
        if let Some(cb) = progress {
            cb.on_page_built(i + 1, total);
        }
    }

    builder.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TextBlock;
    use crate::progress::DownloadProgressCallback;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Size(f32, f32),
        Image(usize, f32, f32),
        Alpha(f32),
        Glyph(char, f32, f32, f32),
    }

    #[derive(Default)]
    struct RecordingPage {
        calls: Vec<Call>,
    }

    impl PageBuilder for RecordingPage {
        fn set_size(&mut self, layout: PageLayout) {
            self.calls.push(Call::Size(layout.width, layout.height));
        }

        fn draw_background_image(&mut self, image: Vec<u8>, width: f32, height: f32) {
            self.calls.push(Call::Image(image.len(), width, height));
        }

        fn set_overlay_alpha(&mut self, alpha: f32) {
            self.calls.push(Call::Alpha(alpha));
        }

        fn draw_glyph(&mut self, ch: char, left: f32, bottom: f32, font_size: f32) {
            self.calls.push(Call::Glyph(ch, left, bottom, font_size));
        }
    }

    #[derive(Debug, PartialEq)]
    enum DocEvent {
        Metadata(String),
        Page(Vec<Call>),
    }

    #[derive(Default)]
    struct RecordingDocument {
        events: Vec<DocEvent>,
    }

    impl DocumentBuilder for RecordingDocument {
        type Page = RecordingPage;
        type Output = Vec<DocEvent>;

        fn set_metadata(&mut self, info: &DocumentInfo) {
            self.events
                .push(DocEvent::Metadata(info.resolved_title().to_string()));
        }

        fn new_page(&mut self) -> RecordingPage {
            RecordingPage::default()
        }

        fn append_page(&mut self, page: RecordingPage) -> Result<(), StreamDocError> {
            self.events.push(DocEvent::Page(page.calls));
            Ok(())
        }

        fn finalize(self) -> Result<Vec<DocEvent>, StreamDocError> {
            Ok(self.events)
        }
    }

    fn rect(left: f32, bottom: f32, top: f32) -> Rect {
        Rect { left, bottom, top }
    }

    fn text_page(blocks: Vec<TextBlock>) -> PageInput {
        PageInput {
            layout: PageLayout::new(600.0, 800.0),
            image: None,
            text: Some(PageText(blocks)),
        }
    }

    fn glyphs(calls: &[Call]) -> Vec<Call> {
        calls
            .iter()
            .filter(|c| matches!(c, Call::Glyph(..)))
            .cloned()
            .collect()
    }

    #[test]
    fn places_one_glyph_per_rect_sized_by_height() {
        let mut page = RecordingPage::default();
        let input = text_page(vec![TextBlock::new(
            "AB",
            vec![rect(10.0, 20.0, 30.0), rect(40.0, 20.0, 28.0)],
        )]);

        assert_eq!(reconstruct_page(&mut page, input), 2);
        assert_eq!(
            glyphs(&page.calls),
            vec![
                Call::Glyph('A', 10.0, 20.0, 10.0),
                Call::Glyph('B', 40.0, 20.0, 8.0),
            ]
        );
        assert!(page.calls.contains(&Call::Alpha(0.0)));
    }

    #[test]
    fn alpha_is_set_before_any_glyph() {
        let mut page = RecordingPage::default();
        reconstruct_page(
            &mut page,
            text_page(vec![TextBlock::new("A", vec![rect(0.0, 0.0, 5.0)])]),
        );
        let alpha_at = page.calls.iter().position(|c| *c == Call::Alpha(0.0));
        let glyph_at = page.calls.iter().position(|c| matches!(c, Call::Glyph(..)));
        assert!(alpha_at < glyph_at);
    }

    #[test]
    fn extra_characters_are_truncated() {
        let mut page = RecordingPage::default();
        let input = text_page(vec![TextBlock::new("ABC", vec![rect(1.0, 2.0, 3.0)])]);
        assert_eq!(reconstruct_page(&mut page, input), 1);
        assert_eq!(glyphs(&page.calls), vec![Call::Glyph('A', 1.0, 2.0, 1.0)]);
    }

    #[test]
    fn extra_rects_are_ignored() {
        let mut page = RecordingPage::default();
        let input = text_page(vec![TextBlock::new(
            "가",
            vec![rect(1.0, 2.0, 14.0), rect(20.0, 2.0, 14.0)],
        )]);
        assert_eq!(reconstruct_page(&mut page, input), 1);
        assert_eq!(glyphs(&page.calls), vec![Call::Glyph('가', 1.0, 2.0, 12.0)]);
    }

    #[test]
    fn degenerate_height_floors_at_one() {
        assert_eq!(overlay_font_size(&rect(0.0, 5.0, 5.0)), 1.0);
        assert_eq!(overlay_font_size(&rect(0.0, 5.0, 4.0)), 1.0);
        assert_eq!(overlay_font_size(&rect(0.0, 5.0, 5.5)), 1.0);
        assert_eq!(overlay_font_size(&rect(0.0, 5.0, 17.0)), 12.0);
    }

    #[test]
    fn empty_blocks_are_skipped() {
        let mut page = RecordingPage::default();
        let input = text_page(vec![
            TextBlock::new("", vec![rect(1.0, 2.0, 3.0)]),
            TextBlock::new("X", vec![]),
            TextBlock::new("Y", vec![rect(5.0, 6.0, 16.0)]),
        ]);
        assert_eq!(reconstruct_page(&mut page, input), 1);
        assert_eq!(glyphs(&page.calls), vec![Call::Glyph('Y', 5.0, 6.0, 10.0)]);
    }

    #[test]
    fn image_is_stretched_to_page_size() {
        let mut page = RecordingPage::default();
        reconstruct_page(
            &mut page,
            PageInput {
                layout: PageLayout::new(600.0, 800.0),
                image: Some(vec![0xFF; 16]),
                text: None,
            },
        );
        assert_eq!(
            page.calls,
            vec![Call::Size(600.0, 800.0), Call::Image(16, 600.0, 800.0)]
        );
    }

    #[test]
    fn empty_text_draws_no_overlay() {
        let mut page = RecordingPage::default();
        reconstruct_page(&mut page, text_page(vec![]));
        assert_eq!(page.calls, vec![Call::Size(600.0, 800.0)]);
    }

    #[test]
    fn collect_pairs_slots_by_index() {
        let layouts = vec![PageLayout::new(1.0, 2.0), PageLayout::new(3.0, 4.0)];
        let pages = collect_page_inputs(&layouts, vec![Some(vec![1]), None], vec![None]);
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].image, Some(vec![1]));
        assert_eq!(pages[1].layout, PageLayout::new(3.0, 4.0));
        assert!(pages[1].image.is_none());
        assert!(pages[1].text.is_none());
    }

    #[derive(Default)]
    struct BuildCounter {
        started: AtomicUsize,
        built: AtomicUsize,
    }

    impl DownloadProgressCallback for BuildCounter {
        fn on_build_start(&self, total_pages: usize) {
            self.started.store(total_pages, Ordering::SeqCst);
        }

        fn on_page_built(&self, _page_num: usize, _total_pages: usize) {
            self.built.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn assembler_sets_metadata_once_then_pages_in_order() {
        let info = DocumentInfo {
            title: Some("Manual".into()),
            ..Default::default()
        };
        let pages = vec![
            PageInput {
                layout: PageLayout::new(600.0, 800.0),
                image: Some(vec![0; 4]),
                text: None,
            },
            PageInput {
                layout: PageLayout::new(842.0, 595.0),
                image: None,
                text: None,
            },
        ];
        let counter = Arc::new(BuildCounter::default());
        let cb: ProgressCallback = counter.clone();

        let events =
            assemble_document(RecordingDocument::default(), &info, pages, Some(&cb)).unwrap();

        assert_eq!(
            events,
            vec![
                DocEvent::Metadata("Manual".into()),
                DocEvent::Page(vec![Call::Size(600.0, 800.0), Call::Image(4, 600.0, 800.0)]),
                DocEvent::Page(vec![Call::Size(842.0, 595.0)]),
            ]
        );
        assert_eq!(counter.started.load(Ordering::SeqCst), 2);
        assert_eq!(counter.built.load(Ordering::SeqCst), 2);
    }
}
