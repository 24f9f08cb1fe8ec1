//! Top-level download entry points.
//!
//! [`download`] drives one StreamDocs link end to end. [`rebuild_document`]
//! is the fetch-and-assemble half on its own, generic over the page source
//! and cache so it runs offline against fakes.
//!
//! The page cache is purged only after the PDF has been saved. Any failure
//! before that point leaves it in place, and re-running the same command
//! fetches only what is missing.

use crate::config::DownloadConfig;
use crate::error::StreamDocError;
use crate::model::{DocumentId, DocumentInfo, DocumentMetadata};
use crate::pipeline::cache::{FsPageCache, PageCache};
use crate::pipeline::compress::{compress_pdf, CompressOutcome};
use crate::pipeline::fetch::PageSource;
use crate::pipeline::font::resolve_overlay_font;
use crate::pipeline::pdf::{save_pdf, write_atomic, PdfDocumentBuilder};
use crate::pipeline::reconstruct::{assemble_document, collect_page_inputs};
use crate::pipeline::schedule::{fetch_pages, FetchStats};
use crate::streamdocs::{parse_viewer_url, StreamDocsClient};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Result of a successful download.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadOutput {
    /// Where the PDF was written.
    pub path: PathBuf,
    pub page_count: usize,
    /// The original file was saved as-is; no pages were fetched.
    pub direct: bool,
    pub stats: FetchStats,
    /// Set when compression was requested and Ghostscript ran.
    pub compression: Option<CompressOutcome>,
    pub total_duration_ms: u64,
}

/// Download the document behind a StreamDocs viewer `url`.
///
/// # Arguments
/// * `url`    — viewer link containing `;streamdocsId=<id>`
/// * `output` — target path; defaults to the service's file name, then to
///   `<first 32 chars of the id>.pdf`
/// * `config` — download configuration
pub async fn download(
    url: &str,
    output: Option<&Path>,
    config: &DownloadConfig,
) -> Result<DownloadOutput, StreamDocError> {
    let start = Instant::now();

    // ── Step 1: Resolve the document ─────────────────────────────────────
    let (base_url, doc) = parse_viewer_url(url)?;
    info!("Base: {}", base_url);
    info!("Document ID: {}", doc);

    // ── Step 2: Session + metadata ───────────────────────────────────────
    let client = StreamDocsClient::new(&base_url, config)?;
    client.open_session(&doc).await?;
    let metadata = client.document_metadata(&doc).await?;
    if let Some(name) = metadata.info.file_name() {
        info!("Filename: {}", name);
    }
    let path = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_output_path(&metadata.info, &doc));

    // ── Step 3: Direct download shortcut ─────────────────────────────────
    if metadata.downloadable && config.allow_direct_download {
        info!("Direct download allowed, trying the original file");
        match client.try_direct_download(&doc).await {
            Ok(Some(bytes)) => {
                let target = path.clone();
                tokio::task::spawn_blocking(move || write_atomic(&target, &bytes))
                    .await
                    .map_err(|e| StreamDocError::Internal(format!("Write task panicked: {}", e)))??;
                info!("Saved original file to {}", path.display());
                return Ok(DownloadOutput {
                    path,
                    page_count: metadata.page_count(),
                    direct: true,
                    stats: FetchStats::default(),
                    compression: None,
                    total_duration_ms: start.elapsed().as_millis() as u64,
                });
            }
            Ok(None) => info!("Original file unavailable; rebuilding from page renders"),
            Err(e) => warn!("Direct download failed ({}); rebuilding from page renders", e),
        }
    }

    // ── Step 4: Fetch + rebuild ──────────────────────────────────────────
    let cache = FsPageCache::new(&config.cache_root);
    let mut out = rebuild_document(&client, &cache, &doc, &metadata, &path, config).await?;
    out.total_duration_ms = start.elapsed().as_millis() as u64;
    Ok(out)
}

/// Fetch every page of `doc`, rebuild it into `path`, and purge its cache.
pub async fn rebuild_document<S, C>(
    source: &S,
    cache: &C,
    doc: &DocumentId,
    metadata: &DocumentMetadata,
    path: &Path,
    config: &DownloadConfig,
) -> Result<DownloadOutput, StreamDocError>
where
    S: PageSource,
    C: PageCache,
{
    let start = Instant::now();
    let page_count = metadata.page_count();
    info!("Pages: {}", page_count);

    // Resolved before fetching so a bad --font is reported early, but only
    // fatal once we know some page carries text.
    let font_path = config.font_path.clone();
    let font = tokio::task::spawn_blocking(move || resolve_overlay_font(font_path.as_deref()))
        .await
        .map_err(|e| StreamDocError::Internal(format!("Font lookup task panicked: {}", e)))?;
    if let Err(ref e) = font {
        warn!("{}", e);
    }

    // ── Fetch ────────────────────────────────────────────────────────────
    let fetched = fetch_pages(source, cache, doc, page_count, config).await?;
    let stats = fetched.stats;
    let font = match font {
        Ok(font) => Some(font),
        Err(e) if fetched.has_text() => return Err(e),
        Err(_) => {
            info!("No page has text; building image-only pages");
            None
        }
    };

    // ── Build + save (CPU-bound) ─────────────────────────────────────────
    let pages = collect_page_inputs(&metadata.layouts, fetched.images, fetched.texts);
    let info = metadata.info.clone();
    let out_path = path.to_path_buf();
    let progress = config.progress_callback.clone();
    let build_start = Instant::now();
    tokio::task::spawn_blocking(move || {
        let mut pdf =
            assemble_document(PdfDocumentBuilder::new(font), &info, pages, progress.as_ref())?;
        save_pdf(&mut pdf, &out_path)
    })
    .await
    .map_err(|e| StreamDocError::Internal(format!("PDF build task panicked: {}", e)))??;
    info!(
        "Built {} pages into {} in {}ms",
        page_count,
        path.display(),
        build_start.elapsed().as_millis()
    );

    // ── Compress (best effort) ───────────────────────────────────────────
    let compression = match config.compress {
        Some(level) => match compress_pdf(path, level).await {
            Ok(CompressOutcome::Unavailable) => {
                warn!("Ghostscript (gs) not found, skipping compression");
                None
            }
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!("Compression failed, keeping uncompressed file: {}", e);
                None
            }
        },
        None => None,
    };

    // ── Clean up ─────────────────────────────────────────────────────────
    if let Err(e) = cache.purge(doc).await {
        warn!("Could not remove cache {}: {}", cache.location(doc), e);
    } else {
        debug!("Removed cache {}", cache.location(doc));
    }

    Ok(DownloadOutput {
        path: path.to_path_buf(),
        page_count,
        direct: false,
        stats,
        compression,
        total_duration_ms: start.elapsed().as_millis() as u64,
    })
}

/// Output path when none is given: the service's file name (without any
/// directory part), else `<id[..32]>.pdf`.
pub fn default_output_path(info: &DocumentInfo, doc: &DocumentId) -> PathBuf {
    info.file_name()
        .and_then(|name| Path::new(name).file_name())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(format!("{}.pdf", doc.short())))
}
