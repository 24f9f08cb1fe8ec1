//! Error types for the streamdoc-dl library.
//!
//! Every variant of [`StreamDocError`] is **fatal** for the current run: the
//! fetch phase is fail-fast and the only recovery is re-running, which resumes
//! from the page cache. Geometry anomalies in text blocks are never errors;
//! the reconstructor absorbs them by truncation.
//!
//! [`StreamDocError::is_retryable`] separates transient network conditions
//! from permanent ones so the scheduler's optional per-unit retry never
//! hammers a request that cannot succeed.

use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the streamdoc-dl library.
#[derive(Debug, Error)]
pub enum StreamDocError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The URL is not a StreamDocs viewer link.
    #[error("Cannot parse StreamDocs URL: '{url}'\nExpected something like https://host/view/sd;streamdocsId=<id>")]
    InvalidUrl { url: String },

    // ── Network errors ────────────────────────────────────────────────────
    /// Connection-level failure (DNS, reset, TLS, proxy).
    #[error("Request to '{url}' failed: {reason}")]
    Transport { url: String, reason: String },

    /// The request exceeded the configured per-request timeout.
    #[error("Request to '{url}' timed out after {secs}s\nIncrease --timeout.")]
    Timeout { url: String, secs: u64 },

    /// The service answered with a non-success status.
    #[error("HTTP {status} from '{url}'")]
    Http { url: String, status: u16 },

    /// The one-shot document metadata response could not be understood.
    #[error("Invalid document metadata: {detail}")]
    Metadata { detail: String },

    /// A page's text payload was not JSON at all.
    #[error("Page {page}: text payload is not valid JSON: {detail}")]
    InvalidTextPayload { page: usize, detail: String },

    /// A fetch unit failed and the run was aborted.
    #[error(
        "Download aborted at {unit}: {completed}/{total} units fetched, {remaining} remaining.\n\
Cached pages are kept in {cache}; re-run the same command to resume."
    )]
    FetchAborted {
        unit: String,
        completed: usize,
        total: usize,
        remaining: usize,
        cache: String,
        #[source]
        source: Box<StreamDocError>,
    },

    // ── Cache errors ──────────────────────────────────────────────────────
    /// Cache lookup for an absent entry. Only used internally to decide
    /// that a unit must be fetched.
    #[error("Cache entry not found: {key}")]
    NotFound { key: String },

    /// The cache directory could not be read or written.
    #[error("Cache I/O error at '{}': {source}", path.display())]
    CacheIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Reconstruction errors ─────────────────────────────────────────────
    /// No font could be resolved although at least one page has text.
    #[error("No usable font for the text layer: {detail}\nPass --font <PATH.ttf> or install NanumGothic.")]
    AssetUnavailable { detail: String },

    /// A page image could not be decoded or embedded.
    #[error("Page {page}: reconstruction failed: {detail}")]
    ReconstructionFailed { page: usize, detail: String },

    /// lopdf failed while assembling the document.
    #[error("PDF assembly failed: {0}")]
    Pdf(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output PDF.
    #[error("Failed to write output file '{}': {source}", path.display())]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StreamDocError {
    /// Whether repeating the same request could plausibly succeed.
    ///
    /// Transport failures, timeouts, `429` and `5xx` are transient; every
    /// other status and all local errors are permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            StreamDocError::Transport { .. } | StreamDocError::Timeout { .. } => true,
            StreamDocError::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Map a reqwest failure for `url` onto the transport taxonomy.
    pub(crate) fn from_reqwest(url: &str, timeout_secs: u64, e: reqwest::Error) -> Self {
        if e.is_timeout() {
            StreamDocError::Timeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else if let Some(status) = e.status() {
            StreamDocError::Http {
                url: url.to_string(),
                status: status.as_u16(),
            }
        } else {
            StreamDocError::Transport {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    }
}
