//! Sub-word unit counting.
//!
//! Chunk sizes are measured in the units the generation service bills and
//! limits by, not in bytes or characters. The pipeline only relies on the
//! contract of a counter: identical text always yields an identical count.
//!
//! ```rust
//! use slabmap::{Cl100kCounter, TokenCounter};
//!
//! let counter = Cl100kCounter::new().unwrap();
//! let n = counter.count("Hello, world!");
//! assert!(n > 0);
//! assert_eq!(n, counter.count("Hello, world!"));
//! ```

use std::sync::{Arc, OnceLock};

use tiktoken_rs::CoreBPE;

use crate::{Error, Result};

/// Something that can measure text in sub-word units.
pub trait TokenCounter: Send + Sync {
    /// Number of units `text` encodes to.
    fn count(&self, text: &str) -> usize;
}

/// Counter backed by the `cl100k_base` byte-pair encoding.
pub struct Cl100kCounter {
    bpe: CoreBPE,
}

impl Cl100kCounter {
    /// Build a fresh encoder.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EstimationUnavailable`] if the encoding tables fail to load.
    pub fn new() -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|e| Error::EstimationUnavailable(e.to_string()))?;
        Ok(Self { bpe })
    }

    /// Process-wide shared encoder.
    ///
    /// Loading the tables is comparatively slow, so the first successful load
    /// is reused by every later caller.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EstimationUnavailable`] if the encoding tables fail to load.
    pub fn shared() -> Result<Arc<Self>> {
        static SHARED: OnceLock<std::result::Result<Arc<Cl100kCounter>, String>> = OnceLock::new();

        SHARED
            .get_or_init(|| {
                Self::new()
                    .map(Arc::new)
                    .map_err(|e| e.to_string())
            })
            .clone()
            .map_err(Error::EstimationUnavailable)
    }
}

impl std::fmt::Debug for Cl100kCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cl100kCounter").finish_non_exhaustive()
    }
}

impl TokenCounter for Cl100kCounter {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }
}

impl<T: TokenCounter + ?Sized> TokenCounter for Arc<T> {
    fn count(&self, text: &str) -> usize {
        (**self).count(text)
    }
}
