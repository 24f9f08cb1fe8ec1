//! Configuration types for a StreamDocs download.
//!
//! All behaviour is controlled through [`DownloadConfig`], built via its
//! [`DownloadConfigBuilder`]. Keeping every knob in one struct makes it easy to
//! share across tasks and to log exactly what a run was asked to do.

use crate::error::StreamDocError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Default on-disk cache root, relative to the working directory.
pub const DEFAULT_CACHE_ROOT: &str = ".streamdoc-dl-cache";

/// Configuration for one document download.
///
/// # Example
/// ```rust
/// use streamdoc_dl::DownloadConfig;
///
/// let config = DownloadConfig::builder()
///     .zoom(200)
///     .concurrency(8)
///     .build()
///     .unwrap();
/// assert_eq!(config.concurrency, 8);
/// ```
#[derive(Clone)]
pub struct DownloadConfig {
    /// Render zoom requested from the service (percent). Default: 300.
    ///
    /// The background image is stretched to the page size regardless, so zoom
    /// only trades output sharpness against download size.
    pub zoom: u32,

    /// Number of fetch units in flight at once. Default: 4.
    ///
    /// A width of 1 is fully sequential and produces the same result.
    pub concurrency: usize,

    /// Per-request timeout in seconds. Default: 60.
    pub request_timeout_secs: u64,

    /// Retry attempts per fetch unit on a transient failure. Default: 2.
    ///
    /// Only transport errors, timeouts, `429` and `5xx` are retried. Set to 0
    /// for strict fail-fast.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Directory holding per-document cache namespaces.
    /// Default: [`DEFAULT_CACHE_ROOT`].
    pub cache_root: PathBuf,

    /// TrueType font for the text layer. If None, one is discovered.
    pub font_path: Option<PathBuf>,

    /// Ghostscript compression of the final file. Default: None (off).
    pub compress: Option<CompressLevel>,

    /// HTTP(S)/SOCKS proxy URL, e.g. `socks5h://127.0.0.1:9050`.
    pub proxy: Option<String>,

    /// Save the original file when the viewer allows it. Default: true.
    pub allow_direct_download: bool,

    /// Progress events. Default: None.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            zoom: 300,
            concurrency: 4,
            request_timeout_secs: 60,
            max_retries: 2,
            retry_backoff_ms: 500,
            cache_root: PathBuf::from(DEFAULT_CACHE_ROOT),
            font_path: None,
            compress: None,
            proxy: None,
            allow_direct_download: true,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for DownloadConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadConfig")
            .field("zoom", &self.zoom)
            .field("concurrency", &self.concurrency)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("cache_root", &self.cache_root)
            .field("font_path", &self.font_path)
            .field("compress", &self.compress)
            .field("proxy", &self.proxy)
            .field("allow_direct_download", &self.allow_direct_download)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn DownloadProgressCallback>"),
            )
            .finish()
    }
}

impl DownloadConfig {
    /// Create a new builder for `DownloadConfig`.
    pub fn builder() -> DownloadConfigBuilder {
        DownloadConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`DownloadConfig`].
#[derive(Debug)]
pub struct DownloadConfigBuilder {
    config: DownloadConfig,
}

impl DownloadConfigBuilder {
    pub fn zoom(mut self, zoom: u32) -> Self {
        self.config.zoom = zoom;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn cache_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cache_root = dir.into();
        self
    }

    pub fn font_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.font_path = Some(path.into());
        self
    }

    pub fn compress(mut self, level: CompressLevel) -> Self {
        self.config.compress = Some(level);
        self
    }

    pub fn proxy(mut self, url: impl Into<String>) -> Self {
        self.config.proxy = Some(url.into());
        self
    }

    pub fn allow_direct_download(mut self, v: bool) -> Self {
        self.config.allow_direct_download = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<DownloadConfig, StreamDocError> {
        let c = &self.config;
        if c.zoom == 0 || c.zoom > 1000 {
            return Err(StreamDocError::InvalidConfig(format!(
                "zoom must be 1–1000, got {}",
                c.zoom
            )));
        }
        if c.concurrency == 0 {
            return Err(StreamDocError::InvalidConfig(
                "concurrency must be ≥ 1".into(),
            ));
        }
        if c.request_timeout_secs == 0 {
            return Err(StreamDocError::InvalidConfig(
                "request timeout must be ≥ 1s".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Ghostscript `-dPDFSETTINGS` preset.
///
/// | Level | Effect |
/// |-------|--------|
/// | screen   | 72 dpi images, smallest |
/// | ebook    | 150 dpi images (default) |
/// | printer  | 300 dpi images |
/// | prepress | 300 dpi, colour preserving, largest |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressLevel {
    Screen,
    #[default]
    Ebook,
    Printer,
    Prepress,
}

impl CompressLevel {
    /// Name used in `-dPDFSETTINGS=/<name>`.
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressLevel::Screen => "screen",
            CompressLevel::Ebook => "ebook",
            CompressLevel::Printer => "printer",
            CompressLevel::Prepress => "prepress",
        }
    }
}

impl fmt::Display for CompressLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressLevel {
    type Err = StreamDocError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "screen" => Ok(CompressLevel::Screen),
            "ebook" => Ok(CompressLevel::Ebook),
            "printer" => Ok(CompressLevel::Printer),
            "prepress" => Ok(CompressLevel::Prepress),
            other => Err(StreamDocError::InvalidConfig(format!(
                "unknown compression level '{other}' (screen, ebook, printer, prepress)"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_cli_defaults() {
        let c = DownloadConfig::default();
        assert_eq!(c.zoom, 300);
        assert_eq!(c.concurrency, 4);
        assert_eq!(c.cache_root, PathBuf::from(DEFAULT_CACHE_ROOT));
        assert!(c.allow_direct_download);
        assert!(c.compress.is_none());
    }

    #[test]
    fn builder_rejects_zero_concurrency() {
        let err = DownloadConfig::builder().concurrency(0).build().unwrap_err();
        assert!(matches!(err, StreamDocError::InvalidConfig(_)), "got: {err}");
        assert_eq!(DownloadConfig::builder().concurrency(1).build().unwrap().concurrency, 1);
    }

    #[test]
    fn builder_rejects_zero_zoom_and_timeout() {
        assert!(DownloadConfig::builder().zoom(0).build().is_err());
        assert!(DownloadConfig::builder()
            .request_timeout_secs(0)
            .build()
            .is_err());
    }

    #[test]
    fn compress_level_parses_case_insensitively() {
        assert_eq!("EBOOK".parse::<CompressLevel>().unwrap(), CompressLevel::Ebook);
        assert_eq!(" screen ".parse::<CompressLevel>().unwrap(), CompressLevel::Screen);
        assert!("tiny".parse::<CompressLevel>().is_err());
        assert_eq!(CompressLevel::default().as_str(), "ebook");
    }

    #[test]
    fn debug_hides_callback() {
        let s = format!("{:?}", DownloadConfig::default());
        assert!(s.contains("progress_callback: None"));
    }
}
