//! Progress-callback trait for download and rebuild events.
//!
//! Inject an [`Arc<dyn DownloadProgressCallback>`] via
//! [`crate::config::DownloadConfigBuilder::progress_callback`] to receive
//! events as units complete and pages are assembled.
//!
//! Fetch completions arrive in network order, not page order. The
//! `completed` counter passed to [`DownloadProgressCallback::on_unit_complete`]
//! is the only ordering guarantee: it increases by exactly one per call.
//!
//! # Example
//!
//! ```rust
//! use streamdoc_dl::{DownloadConfig, DownloadProgressCallback, FetchUnit};
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! impl DownloadProgressCallback for Printer {
//!     fn on_unit_complete(&self, unit: FetchUnit, completed: usize, total: usize) {
//!         eprintln!("{completed}/{total}: {unit}");
//!     }
//! }
//!
//! let config = DownloadConfig::builder()
//!     .progress_callback(Arc::new(Printer) as Arc<dyn DownloadProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::model::FetchUnit;
use std::sync::Arc;

/// Called by the pipeline as it fetches units and rebuilds pages.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Rebuild events are emitted from a blocking worker
/// thread, hence `Send + Sync`.
pub trait DownloadProgressCallback: Send + Sync {
    /// Called once after the cache scan.
    ///
    /// # Arguments
    /// * `pending` — units that must be fetched
    /// * `cached`  — units already satisfied from the cache
    fn on_fetch_start(&self, pending: usize, cached: usize) {
        let _ = (pending, cached);
    }

    /// Called after a unit has been fetched and persisted.
    fn on_unit_complete(&self, unit: FetchUnit, completed: usize, total: usize) {
        let _ = (unit, completed, total);
    }

    /// Called before a transient failure is retried.
    fn on_unit_retry(&self, unit: FetchUnit, attempt: u32, error: &str) {
        let _ = (unit, attempt, error);
    }

    /// Called when the fetch phase ends, successfully or not.
    fn on_fetch_complete(&self, completed: usize, total: usize) {
        let _ = (completed, total);
    }

    /// Called once before the first page is assembled.
    fn on_build_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called after each page is appended to the output document.
    ///
    /// # Arguments
    /// * `page_num`    — 1-indexed page number
    /// * `total_pages` — pages in the document
    fn on_page_built(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl DownloadProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::DownloadConfig`].
pub type ProgressCallback = Arc<dyn DownloadProgressCallback>;
