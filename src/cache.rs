//! Durable per-chunk memoization.
//!
//! A run over a large document makes hundreds of paid generation calls. When
//! one of them fails, the run fails, but every chunk that already succeeded
//! should not be paid for again. Results are therefore stored per
//! `(document, chunk index)` slot, and a stored result is a promise that the
//! chunk is done.
//!
//! ## Disk Layout
//!
//! ```text
//! notes.txt                        <- the document
//! notes/chunk1.txt                 <- input of chunk 1 (written on a miss)
//! notes/result1.txt                <- output of chunk 1 (its presence is a hit)
//! notes/chunk2.txt
//! notes/result2.txt
//! notes.combined_results.txt       <- merged output, rewritten every run
//! ```
//!
//! Nothing expires on its own; [`clear_cache`] removes a document's directory.
//!
//! Stores are called from inside chunk tasks, and every task owns a distinct
//! slot, so implementations need no cross-slot coordination beyond writes
//! that never expose a half-written result.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::{Error, Result};

/// Stable identity of a document, derived from its path.
///
/// ```rust
/// use slabmap::DocumentKey;
///
/// let key = DocumentKey::from_path("data/notes.txt");
/// assert_eq!(key.cache_dir(), std::path::Path::new("data/notes"));
/// assert_eq!(
///     key.combined_output(),
///     std::path::Path::new("data/notes.combined_results.txt")
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentKey {
    base: PathBuf,
    cache_dir: PathBuf,
}

impl DocumentKey {
    /// Key for the document at `path`: the path without its extension.
    ///
    /// A document without an extension would collide with its own cache
    /// directory, so its directory gets a `.chunks` suffix instead.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let base = path.with_extension("");
        let cache_dir = if path.extension().is_some() {
            base.clone()
        } else {
            let mut dir = base.clone().into_os_string();
            dir.push(".chunks");
            PathBuf::from(dir)
        };
        Self { base, cache_dir }
    }

    /// The document path without its extension.
    #[must_use]
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Directory holding the chunk and result files.
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Input file of chunk `index`.
    #[must_use]
    pub fn chunk_path(&self, index: usize) -> PathBuf {
        self.cache_dir.join(format!("chunk{index}.txt"))
    }

    /// Result file of chunk `index`.
    #[must_use]
    pub fn result_path(&self, index: usize) -> PathBuf {
        self.cache_dir.join(format!("result{index}.txt"))
    }

    /// Where the merged output is written.
    #[must_use]
    pub fn combined_output(&self) -> PathBuf {
        let mut path = self.base.clone().into_os_string();
        path.push(".combined_results.txt");
        PathBuf::from(path)
    }
}

/// Storage for per-chunk results.
pub trait CacheStore: Send + Sync {
    /// The stored result for `index`, or `None` if the chunk was never completed.
    ///
    /// # Errors
    ///
    /// Returns an error if the slot exists but cannot be read.
    fn get(&self, key: &DocumentKey, index: usize) -> Result<Option<String>>;

    /// Store the result for `index`, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the result cannot be persisted.
    fn put(&self, key: &DocumentKey, index: usize, result: &str) -> Result<()>;

    /// Keep a copy of the chunk input for inspection.
    ///
    /// # Errors
    ///
    /// Returns an error if the copy cannot be persisted.
    fn record_chunk(&self, _key: &DocumentKey, _index: usize, _text: &str) -> Result<()> {
        Ok(())
    }

    /// Drop everything stored for the document. Clearing an empty cache is not
    /// an error.
    ///
    /// # Errors
    ///
    /// Returns an error if stored entries exist but cannot be removed.
    fn clear(&self, key: &DocumentKey) -> Result<()>;
}

/// The on-disk cache next to each document.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskCache;

impl DiskCache {
    /// Create a disk cache.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl CacheStore for DiskCache {
    fn get(&self, key: &DocumentKey, index: usize) -> Result<Option<String>> {
        let path = key.result_path(index);
        match fs::read_to_string(&path) {
            Ok(result) => Ok(Some(result)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(Error::Cache { path, source }),
        }
    }

    fn put(&self, key: &DocumentKey, index: usize, result: &str) -> Result<()> {
        write_atomic(key.cache_dir(), &key.result_path(index), result)
    }

    fn record_chunk(&self, key: &DocumentKey, index: usize, text: &str) -> Result<()> {
        write_atomic(key.cache_dir(), &key.chunk_path(index), text)
    }

    fn clear(&self, key: &DocumentKey) -> Result<()> {
        match fs::remove_dir_all(key.cache_dir()) {
            Ok(()) => {
                tracing::info!(dir = %key.cache_dir().display(), "removed cache directory");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::info!(dir = %key.cache_dir().display(), "no cache directory found");
                Ok(())
            }
            Err(source) => Err(Error::Cache {
                path: key.cache_dir().to_path_buf(),
                source,
            }),
        }
    }
}

/// Write to a sibling temp file and rename it over `path`.
fn write_atomic(dir: &Path, path: &Path, contents: &str) -> Result<()> {
    let cache_err = |source| Error::Cache {
        path: path.to_path_buf(),
        source,
    };

    fs::create_dir_all(dir).map_err(cache_err)?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, contents).map_err(cache_err)?;
    fs::rename(&tmp, path).map_err(|source| {
        let _ = fs::remove_file(&tmp);
        cache_err(source)
    })
}

/// In-process cache; forgets everything when dropped.
#[derive(Debug, Default)]
pub struct MemoryCache {
    results: Mutex<HashMap<(DocumentKey, usize), String>>,
    chunks: Mutex<HashMap<(DocumentKey, usize), String>>,
}

impl MemoryCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored results across all documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.results.lock().len()
    }

    /// Whether no result is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.lock().is_empty()
    }

    /// The recorded input of chunk `index`, if any.
    #[must_use]
    pub fn chunk(&self, key: &DocumentKey, index: usize) -> Option<String> {
        self.chunks.lock().get(&(key.clone(), index)).cloned()
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, key: &DocumentKey, index: usize) -> Result<Option<String>> {
        Ok(self.results.lock().get(&(key.clone(), index)).cloned())
    }

    fn put(&self, key: &DocumentKey, index: usize, result: &str) -> Result<()> {
        self.results
            .lock()
            .insert((key.clone(), index), result.to_string());
        Ok(())
    }

    fn record_chunk(&self, key: &DocumentKey, index: usize, text: &str) -> Result<()> {
        self.chunks
            .lock()
            .insert((key.clone(), index), text.to_string());
        Ok(())
    }

    fn clear(&self, key: &DocumentKey) -> Result<()> {
        self.results.lock().retain(|(k, _), _| k != key);
        self.chunks.lock().retain(|(k, _), _| k != key);
        Ok(())
    }
}

/// Remove the cached chunks and results of the document at `path`.
///
/// # Errors
///
/// Returns [`Error::Cache`] if the directory exists but cannot be removed.
pub fn clear_cache(path: impl AsRef<Path>) -> Result<()> {
    DiskCache.clear(&DocumentKey::from_path(path))
}
