//! Fetch scheduling: bring every page's image and text into memory with the
//! least network work, persisting each result as soon as it arrives.
//!
//! ## Algorithm
//!
//! 1. Scan the cache for both kinds of every page. Hits fill the in-memory
//!    slot; misses become pending [`FetchUnit`]s.
//! 2. Nothing pending → done, no network traffic.
//! 3. Otherwise the pending units are driven through
//!    `buffer_unordered(concurrency)`. Each worker future only fetches and
//!    yields `(unit, result)`; it never touches shared state.
//! 4. The single consuming loop below is the coordinator: it writes the
//!    cache entry **before** filling the slot and reporting progress, so
//!    every reported completion is durable.
//!
//! The first unit that still fails after its retries aborts the run. Units
//! already written stay in the cache and the next run fetches only the rest.

use crate::config::DownloadConfig;
use crate::error::StreamDocError;
use crate::model::{DocumentId, FetchUnit, PageText, ResourceKind};
use crate::pipeline::cache::PageCache;
use crate::pipeline::fetch::PageSource;
use futures::stream::{self, StreamExt};
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// In-memory result of the fetch phase, indexed by page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchedPages {
    pub images: Vec<Option<Vec<u8>>>,
    pub texts: Vec<Option<PageText>>,
    pub stats: FetchStats,
}

impl FetchedPages {
    /// Whether at least one page carries text blocks.
    pub fn has_text(&self) -> bool {
        self.texts.iter().flatten().any(|t| !t.is_empty())
    }
}

/// Counters reported after the fetch phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchStats {
    /// Units satisfied from the cache.
    pub cached: usize,
    /// Units fetched over the network in this run.
    pub fetched: usize,
    /// Wall-clock time of the phase.
    pub duration_ms: u64,
}

/// A successfully fetched artifact.
enum Fetched {
    Image(Vec<u8>),
    Text(PageText),
}

/// Populate images and texts for pages `0..page_count`.
///
/// Returns only when every slot is filled, or with
/// [`StreamDocError::FetchAborted`] on the first unrecoverable unit.
pub async fn fetch_pages<S, C>(
    source: &S,
    cache: &C,
    doc: &DocumentId,
    page_count: usize,
    config: &DownloadConfig,
) -> Result<FetchedPages, StreamDocError>
where
    S: PageSource,
    C: PageCache,
{
    let start = Instant::now();
    let mut images: Vec<Option<Vec<u8>>> = vec![None; page_count];
    let mut texts: Vec<Option<PageText>> = vec![None; page_count];

    // ── Step 1: resume scan ──────────────────────────────────────────────
    let mut pending = Vec::new();
    for page_index in 0..page_count {
        for kind in ResourceKind::ALL {
            let unit = FetchUnit::new(kind, page_index);
            match load_cached(cache, doc, unit).await? {
                Some(Fetched::Image(bytes)) => images[page_index] = Some(bytes),
                Some(Fetched::Text(text)) => texts[page_index] = Some(text),
                None => pending.push(unit),
            }
        }
    }

    let total_units = page_count * 2;
    let total = pending.len();
    let cached = total_units - total;
    if let Some(ref cb) = config.progress_callback {
        cb.on_fetch_start(total, cached);
    }

    // ── Step 2: fully cached ─────────────────────────────────────────────
    if pending.is_empty() {
        info!("All {} pages cached", page_count);
        return Ok(FetchedPages {
            images,
            texts,
            stats: FetchStats {
                cached,
                fetched: 0,
                duration_ms: start.elapsed().as_millis() as u64,
            },
        });
    }
    if cached > 0 {
        info!("Resuming: {}/{} units cached", cached, total_units);
    }
    info!(
        "Fetching {} units with {} workers",
        total, config.concurrency
    );

    // ── Step 3: fan out ──────────────────────────────────────────────────
    let mut completions = stream::iter(pending.into_iter().map(|unit| async move {
        let result = fetch_unit(source, doc, unit, config).await;
        (unit, result)
    }))
    .buffer_unordered(config.concurrency);

    // ── Step 4: coordinate ───────────────────────────────────────────────
    let mut completed = 0usize;
    while let Some((unit, result)) = completions.next().await {
        let persisted = match result {
            Ok(fetched) => persist(cache, doc, unit, fetched).await,
            Err(e) => Err(e),
        };

        match persisted {
            Ok(Fetched::Image(bytes)) => images[unit.page_index] = Some(bytes),
            Ok(Fetched::Text(text)) => texts[unit.page_index] = Some(text),
            Err(e) => {
                warn!("{} failed: {}", unit, e);
                if let Some(ref cb) = config.progress_callback {
                    cb.on_fetch_complete(completed, total);
                }
                return Err(StreamDocError::FetchAborted {
                    unit: unit.to_string(),
                    completed,
                    total,
                    remaining: total - completed,
                    cache: cache.location(doc),
                    source: Box::new(e),
                });
            }
        }

        completed += 1;
        debug!("Fetched {} ({}/{})", unit, completed, total);
        if let Some(ref cb) = config.progress_callback {
            cb.on_unit_complete(unit, completed, total);
        }
    }

    if let Some(ref cb) = config.progress_callback {
        cb.on_fetch_complete(completed, total);
    }

    let duration_ms = start.elapsed().as_millis() as u64;
    info!("Fetched {} units in {}ms", completed, duration_ms);

    Ok(FetchedPages {
        images,
        texts,
        stats: FetchStats {
            cached,
            fetched: completed,
            duration_ms,
        },
    })
}

/// Read one unit from the cache. `None` means it must be fetched.
async fn load_cached<C: PageCache>(
    cache: &C,
    doc: &DocumentId,
    unit: FetchUnit,
) -> Result<Option<Fetched>, StreamDocError> {
    if !cache.exists(doc, unit).await? {
        return Ok(None);
    }
    let bytes = match cache.read(doc, unit).await {
        Ok(bytes) => bytes,
        Err(StreamDocError::NotFound { .. }) => return Ok(None),
        Err(e) => return Err(e),
    };

    match unit.kind {
        ResourceKind::Image => Ok(Some(Fetched::Image(bytes))),
        ResourceKind::Text => match serde_json::from_slice::<serde_json::Value>(&bytes) {
            Ok(value) => Ok(Some(Fetched::Text(PageText::from_json(
                unit.page_index,
                value,
            )))),
            Err(e) => {
                warn!("Cached {} is not valid JSON ({}); refetching", unit, e);
                Ok(None)
            }
        },
    }
}

/// Write a fetched artifact to the cache, handing it back on success.
async fn persist<C: PageCache>(
    cache: &C,
    doc: &DocumentId,
    unit: FetchUnit,
    fetched: Fetched,
) -> Result<Fetched, StreamDocError> {
    match &fetched {
        Fetched::Image(bytes) => cache.write(doc, unit, bytes).await?,
        Fetched::Text(text) => {
            let bytes = serde_json::to_vec(text)
                .map_err(|e| StreamDocError::Internal(format!("serialise {unit}: {e}")))?;
            cache.write(doc, unit, &bytes).await?;
        }
    }
    Ok(fetched)
}

/// Fetch one unit, retrying transient failures with exponential backoff
/// (`retry_backoff_ms * 2^(attempt-1)`).
async fn fetch_unit<S: PageSource>(
    source: &S,
    doc: &DocumentId,
    unit: FetchUnit,
    config: &DownloadConfig,
) -> Result<Fetched, StreamDocError> {
    let mut attempt: u32 = 0;
    loop {
        let result = match unit.kind {
            ResourceKind::Image => source
                .fetch_image(doc, unit.page_index, config.zoom)
                .await
                .map(Fetched::Image),
            ResourceKind::Text => source
                .fetch_text(doc, unit.page_index)
                .await
                .map(Fetched::Text),
        };

        match result {
            Ok(fetched) => return Ok(fetched),
            Err(e) if e.is_retryable() && attempt < config.max_retries => {
                attempt += 1;
                let backoff = config
                    .retry_backoff_ms
                    .saturating_mul(1u64 << (attempt - 1).min(16));
                warn!(
                    "{}: retry {}/{} after {}ms: {}",
                    unit, attempt, config.max_retries, backoff, e
                );
                if let Some(ref cb) = config.progress_callback {
                    cb.on_unit_retry(unit, attempt, &e.to_string());
                }
                sleep(Duration::from_millis(backoff)).await;
            }
            Err(e) => return Err(e),
        }
    }
}
