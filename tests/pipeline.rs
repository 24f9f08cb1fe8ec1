//! Offline integration tests: the full fetch → rebuild → save → purge path
//! against an in-process page source and a real on-disk cache.
//!
//! Run with:
//!   cargo test --test pipeline -- --nocapture

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::sync::Mutex;
use streamdoc_dl::{
    fetch_pages, rebuild_document, DocumentId, DocumentInfo, DocumentMetadata, DownloadConfig,
    FetchUnit, FsPageCache, PageCache, PageLayout, PageSource, PageText, Rect, ResourceKind,
    StreamDocError, TextBlock,
};

// ── Test helpers ─────────────────────────────────────────────────────────────

fn jpeg_page(shade: u8) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(30, 40, Rgb([shade, shade, shade])));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Jpeg).unwrap();
    out.into_inner()
}

fn page_text(word: &str) -> PageText {
    let rects = word
        .chars()
        .enumerate()
        .map(|(i, _)| Rect {
            left: 50.0 + 10.0 * i as f32,
            bottom: 700.0,
            top: 711.0,
        })
        .collect();
    PageText(vec![TextBlock::new(word, rects)])
}

/// Serves deterministic pages and records every request.
struct ScriptedSource {
    calls: Mutex<Vec<FetchUnit>>,
    fail_text_of: Option<usize>,
}

impl ScriptedSource {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_text_of: None,
        }
    }

    fn calls(&self) -> Vec<FetchUnit> {
        let mut calls = self.calls.lock().unwrap().clone();
        calls.sort();
        calls
    }
}

impl PageSource for ScriptedSource {
    async fn fetch_image(
        &self,
        _doc: &DocumentId,
        page_index: usize,
        _zoom: u32,
    ) -> Result<Vec<u8>, StreamDocError> {
        self.calls
            .lock()
            .unwrap()
            .push(FetchUnit::new(ResourceKind::Image, page_index));
        Ok(jpeg_page(40 * page_index as u8))
    }

    async fn fetch_text(
        &self,
        _doc: &DocumentId,
        page_index: usize,
    ) -> Result<PageText, StreamDocError> {
        self.calls
            .lock()
            .unwrap()
            .push(FetchUnit::new(ResourceKind::Text, page_index));
        if self.fail_text_of == Some(page_index) {
            return Err(StreamDocError::Http {
                url: format!("scripted://texts/{page_index}"),
                status: 404,
            });
        }
        Ok(page_text(&format!("page{page_index}")))
    }
}

fn metadata(pages: usize) -> DocumentMetadata {
    DocumentMetadata {
        layouts: (0..pages).map(|_| PageLayout::new(600.0, 800.0)).collect(),
        info: DocumentInfo {
            title: Some("Scripted".into()),
            ..Default::default()
        },
        downloadable: false,
    }
}

fn config(cache_root: &std::path::Path) -> DownloadConfig {
    DownloadConfig::builder()
        .cache_root(cache_root)
        .retry_backoff_ms(0)
        .build()
        .unwrap()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn resumes_from_partial_cache_and_purges_on_success() {
    let dir = tempfile::tempdir().unwrap();
    let cache_root = dir.path().join("cache");
    let cache = FsPageCache::new(&cache_root);
    let doc = DocumentId::new("doc-e2e");

    // Page 0 fully cached, page 1 missing both artifacts.
    cache
        .write(&doc, FetchUnit::new(ResourceKind::Image, 0), &jpeg_page(0))
        .await
        .unwrap();
    cache
        .write(
            &doc,
            FetchUnit::new(ResourceKind::Text, 0),
            &serde_json::to_vec(&page_text("page0")).unwrap(),
        )
        .await
        .unwrap();

    let source = ScriptedSource::new();
    let cfg = config(&cache_root);
    let fetched = fetch_pages(&source, &cache, &doc, 2, &cfg).await.unwrap();

    assert_eq!(
        source.calls(),
        vec![
            FetchUnit::new(ResourceKind::Image, 1),
            FetchUnit::new(ResourceKind::Text, 1),
        ]
    );
    assert_eq!(fetched.stats.cached, 2);
    assert_eq!(fetched.stats.fetched, 2);

    // Two pages, image + text each.
    let mut entries: Vec<String> = std::fs::read_dir(cache.document_dir(&doc))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    entries.sort();
    assert_eq!(entries, ["0.img", "0.json", "1.img", "1.json"]);

    let out_path = dir.path().join("out.pdf");
    let out = rebuild_document(&source, &cache, &doc, &metadata(2), &out_path, &cfg)
        .await
        .unwrap();

    // Everything was already cached: no further requests.
    assert_eq!(source.calls().len(), 2);
    assert_eq!(out.stats.cached, 4);
    assert_eq!(out.stats.fetched, 0);
    assert_eq!(out.page_count, 2);
    assert!(!out.direct);

    let pdf = lopdf::Document::load(&out_path).unwrap();
    assert_eq!(pdf.get_pages().len(), 2);

    // Cache removed, including the now-empty root.
    assert!(!cache.document_dir(&doc).exists());
    assert!(!cache_root.exists());
}

#[tokio::test]
async fn failed_run_keeps_cache_and_next_run_finishes() {
    let dir = tempfile::tempdir().unwrap();
    let cache_root = dir.path().join("cache");
    let cache = FsPageCache::new(&cache_root);
    let doc = DocumentId::new("doc-resume");
    let out_path = dir.path().join("out.pdf");
    let cfg = DownloadConfig::builder()
        .cache_root(&cache_root)
        .concurrency(1)
        .retry_backoff_ms(0)
        .build()
        .unwrap();

    let flaky = ScriptedSource {
        calls: Mutex::new(Vec::new()),
        fail_text_of: Some(2),
    };
    let err = rebuild_document(&flaky, &cache, &doc, &metadata(3), &out_path, &cfg)
        .await
        .unwrap_err();
    match &err {
        StreamDocError::FetchAborted {
            remaining, cache: location, ..
        } => {
            assert_eq!(*remaining, 1);
            assert!(location.contains("doc-resume"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!out_path.exists());
    assert!(cache.exists(&doc, FetchUnit::new(ResourceKind::Image, 2)).await.unwrap());

    let healthy = ScriptedSource::new();
    rebuild_document(&healthy, &cache, &doc, &metadata(3), &out_path, &cfg)
        .await
        .unwrap();
    assert_eq!(healthy.calls(), vec![FetchUnit::new(ResourceKind::Text, 2)]);
    assert!(out_path.exists());
    assert!(!cache.document_dir(&doc).exists());
}

#[tokio::test]
async fn missing_explicit_font_is_fatal_only_with_text() {
    let dir = tempfile::tempdir().unwrap();
    let cache_root = dir.path().join("cache");
    let cache = FsPageCache::new(&cache_root);
    let doc = DocumentId::new("doc-font");
    let out_path = dir.path().join("out.pdf");
    let cfg = DownloadConfig::builder()
        .cache_root(&cache_root)
        .font_path(dir.path().join("missing.ttf"))
        .build()
        .unwrap();

    let err = rebuild_document(&ScriptedSource::new(), &cache, &doc, &metadata(1), &out_path, &cfg)
        .await
        .unwrap_err();
    assert!(matches!(err, StreamDocError::AssetUnavailable { .. }));
    // Fetched units stay cached for the next attempt.
    assert!(cache.exists(&doc, FetchUnit::new(ResourceKind::Text, 0)).await.unwrap());

    // Same document with empty text pages builds image-only.
    cache
        .write(&doc, FetchUnit::new(ResourceKind::Text, 0), b"[]")
        .await
        .unwrap();
    rebuild_document(&ScriptedSource::new(), &cache, &doc, &metadata(1), &out_path, &cfg)
        .await
        .unwrap();
    assert!(out_path.exists());
}
