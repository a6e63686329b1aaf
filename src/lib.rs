//! # slabmap
//!
//! Apply one natural-language transformation to a document of any size by
//! cutting it into token-budgeted slabs, sending every slab to a
//! text-generation service in parallel, and stitching the answers back
//! together.
//!
//! ## The Problem
//!
//! Generation services cap their input and bill per token. A 40 MB log file
//! does not fit, and a run that makes five hundred calls will sometimes see
//! one of them fail. You need to:
//!
//! - cut the input under the cap, measured in tokens rather than bytes,
//! - keep lines whole, since the prompt talks about lines,
//! - never pay twice for a chunk that already succeeded,
//! - put the answers back in document order, whatever order they arrive in.
//!
//! ## The Pipeline
//!
//! ```text
//! document ──> TokenChunker ──> [slab 1] [slab 2] ... [slab n]
//!                                  │        │            │
//!                              CacheStore hit?  ── yes ──┼──> result
//!                                  │ no                  │
//!                              Generator (concurrent) ───┘──> result, cached
//!                                                            │
//!                       results by index ──> <doc>.combined_results.txt
//! ```
//!
//! ### Chunking
//!
//! Lines are accumulated until the next one would push the chunk over the
//! budget. A line that is over budget on its own is cut on word boundaries.
//! See [`TokenChunker`].
//!
//! ### Caching
//!
//! Each chunk's result is stored under `(document, index)`. A stored result
//! means the chunk is done; a second run of the same document makes no calls
//! at all. See [`CacheStore`] and [`DiskCache`].
//!
//! ### Orchestration
//!
//! Uncached chunks run as concurrent tasks. The first failure cancels the
//! rest and fails the run without writing any merged output; results cached
//! before the failure are reused next time. See [`Orchestrator`].
//!
//! ## Quick Start
//!
//! ```rust
//! use slabmap::split_into_token_chunks;
//!
//! let text = "first line\nsecond line\nthird line";
//! let chunks = split_into_token_chunks(text, 2000).unwrap();
//! assert_eq!(chunks.len(), 1);
//! ```
//!
//! Running a whole document (requires network access and a key):
//!
//! ```rust,no_run
//! # async fn example() -> slabmap::Result<()> {
//! use slabmap::{process, RunConfig};
//!
//! let key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
//! process(&key, RunConfig::default(), "Keep lines that mention timeouts.", "app.log").await?;
//! # Ok(())
//! # }
//! ```

mod budget;
mod cache;
mod chunker;
mod error;
mod estimate;
mod model;
mod orchestrator;
mod slab;
mod tokens;

pub mod config;
pub mod generate;
pub mod openai;

pub use budget::TokenBudget;
pub use cache::{clear_cache, CacheStore, DiskCache, DocumentKey, MemoryCache};
pub use chunker::{split_into_token_chunks, TokenChunker};
pub use error::{Error, Result};
pub use estimate::{PriceTable, TokenEstimate};
pub use generate::{GenerationError, GenerationRequest, Generator};
pub use model::Model;
pub use openai::OpenAiClient;
pub use orchestrator::{
    process, Confirm, Orchestrator, RunConfig, RunOutcome, RunPlan, RunReport,
    KEEP_LINES_INSTRUCTION,
};
pub use slab::{Slab, SlabOrigin};
pub use tokens::{Cl100kCounter, TokenCounter};

/// A text chunking strategy.
///
/// ```rust
/// use std::sync::Arc;
/// use slabmap::{Chunker, Cl100kCounter, Slab, TokenBudget, TokenChunker};
///
/// fn chunk_document(chunker: &dyn Chunker, text: &str) -> Vec<Slab> {
///     chunker.chunk(text)
/// }
///
/// let counter = Arc::new(Cl100kCounter::new().unwrap());
/// let chunker = TokenChunker::new(TokenBudget::new(100).unwrap(), counter);
/// let slabs = chunk_document(&chunker, "Hello world.\nThis is a test.");
/// assert_eq!(slabs.len(), 1);
/// ```
pub trait Chunker: Send + Sync {
    /// Split text into chunks, numbered from 1 in document order.
    fn chunk(&self, text: &str) -> Vec<Slab>;

    /// Estimate the number of chunks for a given text length.
    ///
    /// Useful for pre-allocation. May be approximate.
    fn estimate_chunks(&self, text_len: usize) -> usize {
        // Conservative default
        (text_len / 500).max(1)
    }
}
