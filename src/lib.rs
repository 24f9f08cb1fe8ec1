//! # streamdoc-dl
//!
//! Rebuild searchable PDFs from StreamDocs document viewers.
//!
//! ## Why this crate?
//!
//! StreamDocs viewers never hand out the document itself. They serve each
//! page as a raster render plus a separate list of character boxes. This
//! crate fetches both, keeps them in a resumable on-disk cache, and writes a
//! PDF where every page is the original render with an invisible text layer
//! laid exactly over it, so the result looks like the viewer and can still
//! be searched and copied.
//!
//! ## Pipeline Overview
//!
//! ```text
//! viewer URL
//!  │
//!  ├─ 1. Resolve   base URL + document id, session cookies
//!  ├─ 2. Metadata  page sizes, document info, direct-download permission
//!  ├─ 3. Fetch     images + text per page, concurrent, cached, resumable
//!  ├─ 4. Rebuild   background image + alpha-0 glyphs per character box
//!  ├─ 5. Save      lopdf, atomic write (spawn_blocking)
//!  └─ 6. Compress  optional Ghostscript pass, then purge the cache
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use streamdoc_dl::{download, DownloadConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DownloadConfig::builder().concurrency(8).build()?;
//!     let out = download(
//!         "https://example.org/streamdocs/view/sd;streamdocsId=ABC",
//!         None,
//!         &config,
//!     )
//!     .await?;
//!     println!("saved {} ({} pages)", out.path.display(), out.page_count);
//!     Ok(())
//! }
//! ```
//!
//! ## Resuming
//!
//! Every fetched artifact is written to `.streamdoc-dl-cache/<id>/` as soon
//! as it arrives. A failed or interrupted run keeps the cache; running the
//! same command again fetches only what is missing. The cache is removed
//! after a successful save.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `streamdoc-dl` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! streamdoc-dl = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod download;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod streamdocs;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{CompressLevel, DownloadConfig, DownloadConfigBuilder, DEFAULT_CACHE_ROOT};
pub use download::{default_output_path, download, rebuild_document, DownloadOutput};
pub use error::StreamDocError;
pub use model::{
    DocumentId, DocumentInfo, DocumentMetadata, FetchUnit, PageLayout, PageText, Rect,
    ResourceKind, TextBlock,
};
pub use pipeline::cache::{FsPageCache, MemoryPageCache, PageCache};
pub use pipeline::compress::CompressOutcome;
pub use pipeline::fetch::{repair_image_bytes, PageSource};
pub use pipeline::schedule::{fetch_pages, FetchStats, FetchedPages};
pub use progress::{DownloadProgressCallback, NoopProgressCallback, ProgressCallback};
pub use streamdocs::{parse_viewer_url, StreamDocsClient};
