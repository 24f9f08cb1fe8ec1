//! CLI binary for streamdoc-dl.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `DownloadConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use streamdoc_dl::{
    download, CompressLevel, CompressOutcome, DownloadConfig, DownloadProgressCallback, FetchUnit,
    ProgressCallback, DEFAULT_CACHE_ROOT,
};
use tracing_subscriber::EnvFilter;

/// Local SOCKS endpoint of a Tor daemon.
const TOR_PROXY: &str = "socks5h://127.0.0.1:9050";

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar reused for the fetch phase and the
/// build phase. Units complete out of order, so only counts are shown.
struct CliProgressCallback {
    bar: ProgressBar,
    retries: AtomicUsize,
}

impl CliProgressCallback {
    /// Start as a spinner; the bar gets its length once the cache scan is done.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening viewer session…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            retries: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, prefix: &'static str, total: usize, unit: &str) {
        let progress_style = ProgressStyle::with_template(&format!(
            "{{spinner:.cyan}} {{prefix:.bold}}  \
             [{{bar:42.green/238}}] {{pos:>4}}/{{len}} {unit}  \
             ⏱ {{elapsed_precise}}  ETA {{eta_precise}}"
        ))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_position(0);
        self.bar.set_style(progress_style);
        self.bar.set_prefix(prefix);
        self.bar.reset_eta();
    }
}

impl DownloadProgressCallback for CliProgressCallback {
    fn on_fetch_start(&self, pending: usize, cached: usize) {
        if pending == 0 {
            self.bar
                .println(format!("{} All {} units cached", cyan("◆"), cached));
            return;
        }
        if cached > 0 {
            self.bar.println(format!(
                "{} Resuming: {}/{} units cached",
                cyan("◆"),
                cached,
                cached + pending
            ));
        }
        self.activate_bar("Fetching", pending, "units");
    }

    fn on_unit_complete(&self, unit: FetchUnit, _completed: usize, _total: usize) {
        self.bar.set_message(unit.to_string());
        self.bar.inc(1);
    }

    fn on_unit_retry(&self, unit: FetchUnit, attempt: u32, error: &str) {
        self.retries.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!(
            "  {} {} retry {}  {}",
            yellow("↻"),
            unit,
            attempt,
            dim(error)
        ));
    }

    fn on_fetch_complete(&self, completed: usize, total: usize) {
        if total == 0 {
            return;
        }
        let retries = self.retries.load(Ordering::SeqCst);
        let suffix = if retries > 0 {
            dim(&format!("  ({retries} retries)"))
        } else {
            String::new()
        };
        self.bar.println(format!(
            "{} Fetched {}/{} units{}",
            if completed == total {
                green("✓")
            } else {
                yellow("✗")
            },
            completed,
            total,
            suffix
        ));
    }

    fn on_build_start(&self, total_pages: usize) {
        self.activate_bar("Building", total_pages, "pages");
    }

    fn on_page_built(&self, _page_num: usize, _total_pages: usize) {
        self.bar.inc(1);
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Download to the file name reported by the viewer
  streamdoc-dl 'https://www.standard.go.kr/streamdocs/view/sd;streamdocsId=72059197'

  # Explicit output, lower zoom, more workers
  streamdoc-dl URL -o ks.pdf -z 200 -j 8

  # Compress with Ghostscript (screen, ebook, printer, prepress)
  streamdoc-dl URL --compress            # ebook
  streamdoc-dl URL --compress screen

  # Through Tor
  streamdoc-dl URL --tor

RESUMING:
  Fetched pages are cached in .streamdoc-dl-cache/<document id>/ as they
  arrive. If a run fails or is interrupted, run the same command again: only
  the missing pages are fetched. The cache is deleted after a successful save.

ENVIRONMENT VARIABLES:
  STREAMDOC_FONT      TrueType font for the text layer (default: NanumGothic,
                      then fc-match, then the built-in HYSMyeongJo-Medium)
  STREAMDOC_CACHE_DIR Cache root (default: .streamdoc-dl-cache)
  STREAMDOC_PROXY     HTTP(S)/SOCKS proxy URL
  RUST_LOG            Override log filtering (e.g. streamdoc_dl=debug)
"#;

/// Download PDFs from StreamDocs viewers.
#[derive(Parser, Debug)]
#[command(
    name = "streamdoc-dl",
    version,
    about = "Download PDFs from StreamDocs viewers",
    long_about = "Rebuild a searchable PDF from a StreamDocs document viewer: every page is \
fetched as a rendered image plus character positions, cached for resumption, and reassembled \
with an invisible text layer. Uses the original file instead when the viewer allows it.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// StreamDocs viewer URL (…/view/…;streamdocsId=<id>).
    url: String,

    /// Output PDF path (default: the document's file name).
    #[arg(short, long, env = "STREAMDOC_OUTPUT")]
    output: Option<PathBuf>,

    /// Render zoom requested from the viewer.
    #[arg(short, long, env = "STREAMDOC_ZOOM", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(1..=1000))]
    zoom: u32,

    /// Concurrent page downloads.
    #[arg(short, long, env = "STREAMDOC_JOBS", default_value_t = 4)]
    jobs: usize,

    /// TrueType font for the text layer (auto-detected if omitted).
    #[arg(long, env = "STREAMDOC_FONT")]
    font: Option<PathBuf>,

    /// Compress with Ghostscript: screen, ebook, printer, prepress.
    #[arg(long, value_name = "LEVEL", num_args = 0..=1, default_missing_value = "ebook")]
    compress: Option<CompressLevel>,

    /// Route traffic through Tor (SOCKS5 proxy on 127.0.0.1:9050).
    #[arg(long, conflicts_with = "proxy")]
    tor: bool,

    /// HTTP(S)/SOCKS proxy URL.
    #[arg(long, env = "STREAMDOC_PROXY")]
    proxy: Option<String>,

    /// Page cache root.
    #[arg(long, env = "STREAMDOC_CACHE_DIR", default_value = DEFAULT_CACHE_ROOT)]
    cache_dir: PathBuf,

    /// Retries per page request on transient failures (0 = fail fast).
    #[arg(long, env = "STREAMDOC_RETRIES", default_value_t = 2)]
    retries: u32,

    /// Per-request timeout in seconds.
    #[arg(long, env = "STREAMDOC_TIMEOUT", default_value_t = 60)]
    timeout: u64,

    /// Always rebuild from page renders, even if the original is downloadable.
    #[arg(long)]
    no_direct: bool,

    /// Disable progress bar.
    #[arg(long, env = "STREAMDOC_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "STREAMDOC_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and the saved path.
    #[arg(short, long, env = "STREAMDOC_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active.
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let progress: Option<Arc<CliProgressCallback>> = if show_progress {
        Some(CliProgressCallback::new_dynamic())
    } else {
        None
    };
    let config = build_config(
        &cli,
        progress.clone().map(|cb| cb as ProgressCallback),
    )?;

    // ── Run ──────────────────────────────────────────────────────────────
    let result = download(&cli.url, cli.output.as_deref(), &config).await;
    if let Some(ref cb) = progress {
        cb.bar.finish_and_clear();
    }
    let out = result.context("Download failed")?;

    if !cli.quiet {
        if out.direct {
            eprintln!("{} Original file downloaded directly", green("✔"));
        } else {
            eprintln!(
                "{} {} pages  {} fetched / {} cached  {}ms",
                green("✔"),
                bold(&out.page_count.to_string()),
                out.stats.fetched,
                out.stats.cached,
                out.total_duration_ms,
            );
        }
        if let Some(CompressOutcome::Replaced { before, after }) = out.compression {
            eprintln!(
                "   {}",
                dim(&format!("compressed {}K → {}K", before / 1024, after / 1024))
            );
        } else if let Some(CompressOutcome::Larger { .. }) = out.compression {
            eprintln!("   {}", dim("compression would increase size, skipped"));
        }
    }
    println!("Saved: {}", out.path.display());

    Ok(())
}

/// Map CLI args to `DownloadConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<DownloadConfig> {
    let mut builder = DownloadConfig::builder()
        .zoom(cli.zoom)
        .concurrency(cli.jobs)
        .request_timeout_secs(cli.timeout)
        .max_retries(cli.retries)
        .cache_root(&cli.cache_dir)
        .allow_direct_download(!cli.no_direct);

    if let Some(ref font) = cli.font {
        builder = builder.font_path(font);
    }
    if let Some(level) = cli.compress {
        builder = builder.compress(level);
    }
    if cli.tor {
        builder = builder.proxy(TOR_PROXY);
    } else if let Some(ref proxy) = cli.proxy {
        builder = builder.proxy(proxy.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("streamdoc-dl").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn defaults_match_library_defaults() {
        let cli = parse(&["https://h/view/sd;streamdocsId=x"]);
        let config = build_config(&cli, None).unwrap();
        assert_eq!(config.zoom, 300);
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.compress, None);
        assert!(config.allow_direct_download);
    }

    #[test]
    fn bare_compress_means_ebook() {
        let cli = parse(&["u", "--compress"]);
        assert_eq!(cli.compress, Some(CompressLevel::Ebook));
        let cli = parse(&["u", "--compress", "screen"]);
        assert_eq!(cli.compress, Some(CompressLevel::Screen));
    }

    #[test]
    fn tor_sets_socks_proxy_and_conflicts_with_proxy() {
        let cli = parse(&["u", "--tor"]);
        assert_eq!(
            build_config(&cli, None).unwrap().proxy.as_deref(),
            Some(TOR_PROXY)
        );
        let err = Cli::try_parse_from(["streamdoc-dl", "u", "--tor", "--proxy", "http://p:1"]);
        assert!(err.is_err());
    }

    #[test]
    fn zero_jobs_is_rejected() {
        let cli = parse(&["u", "-j", "0"]);
        assert!(build_config(&cli, None).is_err());
    }

    #[test]
    fn zoom_is_range_checked() {
        assert!(Cli::try_parse_from(["streamdoc-dl", "u", "-z", "0"]).is_err());
    }
}
