//! Page cache: durable storage of fetched artifacts, keyed by
//! `(document, page index, kind)`.
//!
//! Existence of an entry is the only resume signal; contents are never
//! checksummed. The scheduler is written against [`PageCache`] so the resume
//! algorithm can be exercised with [`MemoryPageCache`].
//!
//! ## Filesystem layout
//!
//! ```text
//! <root>/<document id>/<index>.img    repaired raster bytes
//! <root>/<document id>/<index>.json   text blocks (JSON array)
//! ```
//!
//! Writes go to a hidden temporary sibling and are renamed into place, so an
//! interrupted write never shows up as an existing entry.

use crate::error::StreamDocError;
use crate::model::{DocumentId, FetchUnit, ResourceKind};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Key-value store for per-page artifacts.
pub trait PageCache {
    /// Whether an entry exists.
    fn exists(
        &self,
        doc: &DocumentId,
        unit: FetchUnit,
    ) -> impl Future<Output = Result<bool, StreamDocError>> + Send;

    /// Read an entry; [`StreamDocError::NotFound`] when absent.
    fn read(
        &self,
        doc: &DocumentId,
        unit: FetchUnit,
    ) -> impl Future<Output = Result<Vec<u8>, StreamDocError>> + Send;

    /// Write (or overwrite) an entry, creating the document scope if needed.
    fn write(
        &self,
        doc: &DocumentId,
        unit: FetchUnit,
        bytes: &[u8],
    ) -> impl Future<Output = Result<(), StreamDocError>> + Send;

    /// Remove every entry of a document. Never fails on missing paths.
    fn purge(&self, doc: &DocumentId) -> impl Future<Output = Result<(), StreamDocError>> + Send;

    /// Human-readable location of a document's entries, for error messages.
    fn location(&self, doc: &DocumentId) -> String;
}

fn entry_name(unit: FetchUnit) -> String {
    let ext = match unit.kind {
        ResourceKind::Image => "img",
        ResourceKind::Text => "json",
    };
    format!("{}.{}", unit.page_index, ext)
}

// ── Filesystem backend ───────────────────────────────────────────────────

/// Cache rooted at a directory, one subdirectory per document.
#[derive(Debug, Clone)]
pub struct FsPageCache {
    root: PathBuf,
}

impl FsPageCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding a document's entries.
    pub fn document_dir(&self, doc: &DocumentId) -> PathBuf {
        self.root.join(doc.as_str())
    }

    /// Full path of one entry.
    pub fn entry_path(&self, doc: &DocumentId, unit: FetchUnit) -> PathBuf {
        self.document_dir(doc).join(entry_name(unit))
    }

    /// [`Self::document_dir`], refusing ids that would resolve outside `root`.
    fn scoped_dir(&self, doc: &DocumentId) -> Result<PathBuf, StreamDocError> {
        let dir = self.document_dir(doc);
        if !doc.is_path_safe() || dir.parent() != Some(self.root.as_path()) {
            return Err(StreamDocError::CacheIo {
                path: dir,
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("document id '{doc}' does not name a directory under the cache root"),
                ),
            });
        }
        Ok(dir)
    }

    fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StreamDocError + '_ {
        move |source| StreamDocError::CacheIo {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl PageCache for FsPageCache {
    async fn exists(&self, doc: &DocumentId, unit: FetchUnit) -> Result<bool, StreamDocError> {
        let path = self.scoped_dir(doc)?.join(entry_name(unit));
        tokio::fs::try_exists(&path)
            .await
            .map_err(Self::io_err(&path))
    }

    async fn read(&self, doc: &DocumentId, unit: FetchUnit) -> Result<Vec<u8>, StreamDocError> {
        let path = self.scoped_dir(doc)?.join(entry_name(unit));
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StreamDocError::NotFound {
                key: path.display().to_string(),
            }),
            Err(e) => Err(Self::io_err(&path)(e)),
        }
    }

    async fn write(
        &self,
        doc: &DocumentId,
        unit: FetchUnit,
        bytes: &[u8],
    ) -> Result<(), StreamDocError> {
        let dir = self.scoped_dir(doc)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(Self::io_err(&dir))?;

        let path = dir.join(entry_name(unit));
        let tmp_path = dir.join(format!(".{}.tmp", entry_name(unit)));
        tokio::fs::write(&tmp_path, bytes)
            .await
            .map_err(Self::io_err(&tmp_path))?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(Self::io_err(&path))?;

        debug!("Cached {} ({} bytes) at {}", unit, bytes.len(), path.display());
        Ok(())
    }

    async fn purge(&self, doc: &DocumentId) -> Result<(), StreamDocError> {
        let dir = self.scoped_dir(doc)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => debug!("Removed cache {}", dir.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove cache {}: {}", dir.display(), e),
        }
        // Drop the root too when no other document is cached; fails harmlessly otherwise.
        let _ = tokio::fs::remove_dir(&self.root).await;
        Ok(())
    }

    fn location(&self, doc: &DocumentId) -> String {
        self.document_dir(doc).display().to_string()
    }
}

// ── In-memory backend ────────────────────────────────────────────────────

/// Process-local cache. Used by tests and by callers that do not need resume.
#[derive(Debug, Default)]
pub struct MemoryPageCache {
    entries: Mutex<HashMap<(DocumentId, FetchUnit), Vec<u8>>>,
    writes: Mutex<Vec<FetchUnit>>,
}

impl MemoryPageCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry without counting it as a write.
    pub fn seed(&self, doc: &DocumentId, unit: FetchUnit, bytes: impl Into<Vec<u8>>) {
        self.lock_entries().insert((doc.clone(), unit), bytes.into());
    }

    /// Number of entries currently held for `doc`.
    pub fn len(&self, doc: &DocumentId) -> usize {
        self.lock_entries().keys().filter(|(d, _)| d == doc).count()
    }

    pub fn is_empty(&self, doc: &DocumentId) -> bool {
        self.len(doc) == 0
    }

    /// Units written through [`PageCache::write`], in write order.
    pub fn writes(&self) -> Vec<FetchUnit> {
        self.writes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<(DocumentId, FetchUnit), Vec<u8>>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PageCache for MemoryPageCache {
    async fn exists(&self, doc: &DocumentId, unit: FetchUnit) -> Result<bool, StreamDocError> {
        Ok(self.lock_entries().contains_key(&(doc.clone(), unit)))
    }

    async fn read(&self, doc: &DocumentId, unit: FetchUnit) -> Result<Vec<u8>, StreamDocError> {
        self.lock_entries()
            .get(&(doc.clone(), unit))
            .cloned()
            .ok_or_else(|| StreamDocError::NotFound {
                key: format!("{doc}/{}", entry_name(unit)),
            })
    }

    async fn write(
        &self,
        doc: &DocumentId,
        unit: FetchUnit,
        bytes: &[u8],
    ) -> Result<(), StreamDocError> {
        self.lock_entries().insert((doc.clone(), unit), bytes.to_vec());
        self.writes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(unit);
        Ok(())
    }

    async fn purge(&self, doc: &DocumentId) -> Result<(), StreamDocError> {
        self.lock_entries().retain(|(d, _), _| d != doc);
        Ok(())
    }

    fn location(&self, doc: &DocumentId) -> String {
        format!("memory:{doc}")
    }
}
