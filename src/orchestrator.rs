//! Map/cache/reduce over one document.
//!
//! ## One Run
//!
//! ```text
//! read document ──> estimate ──> split into slabs
//!                                     │
//!                      ┌──────────────┴──────────────┐
//!                 cached result                 no result yet
//!                 (used as-is)          (one task each, all in flight)
//!                      │                 record chunk ─> generate ─> cache
//!                      └──────────────┬──────────────┘
//!                                     │
//!                     results placed by slab index
//!                                     │
//!                        <doc>.combined_results.txt
//! ```
//!
//! ## Failure
//!
//! The first failing chunk cancels its siblings and fails the run. No merged
//! output is written, but every result already cached stays on disk, so
//! running again only pays for the chunks that never finished.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::generate::{GenerationError, GenerationRequest, Generator};
use crate::{
    CacheStore, Chunker, Cl100kCounter, DiskCache, DocumentKey, Error, Model, OpenAiClient,
    PriceTable, Result, Slab, TokenBudget, TokenChunker, TokenCounter, TokenEstimate,
};

/// Appended to every user prompt to form the system instruction.
pub const KEEP_LINES_INSTRUCTION: &str = "Return the lines that you want to keep.";

/// Settings for a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    /// Maximum units per chunk.
    pub budget: TokenBudget,
    /// Model every chunk is sent to.
    pub model: Model,
    /// Prices used for the cost projection.
    pub prices: PriceTable,
    /// Cap on simultaneous generation calls; `None` leaves backpressure to
    /// the backend.
    pub max_concurrency: Option<NonZeroUsize>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            budget: TokenBudget::default(),
            model: Model::default(),
            prices: PriceTable::default(),
            max_concurrency: None,
        }
    }
}

/// What a run is about to do, shown before asking for confirmation.
#[derive(Debug, Clone, PartialEq)]
pub struct RunPlan {
    /// The document being processed.
    pub document: PathBuf,
    /// Total number of chunks.
    pub chunks: usize,
    /// Chunks that already have a cached result.
    pub cached: usize,
    /// Size of the whole document.
    pub estimate: TokenEstimate,
    /// Projected input cost of the whole document on the configured model.
    pub cost: Option<f64>,
}

impl RunPlan {
    /// Chunks that will be sent for generation.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.chunks - self.cached
    }
}

/// Gate between planning and spending.
pub trait Confirm: Send + Sync {
    /// Return `true` to proceed with `plan`.
    fn confirm(&self, plan: &RunPlan) -> bool;
}

impl<F> Confirm for F
where
    F: Fn(&RunPlan) -> bool + Send + Sync,
{
    fn confirm(&self, plan: &RunPlan) -> bool {
        self(plan)
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// Where the merged output was written.
    pub output: PathBuf,
    /// Total number of chunks.
    pub chunks: usize,
    /// Chunks served from the cache.
    pub cached: usize,
    /// Chunks sent for generation.
    pub generated: usize,
    /// Size of the document.
    pub estimate: TokenEstimate,
}

/// How a run ended without error.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Every chunk has a result and the merged output is written.
    Completed(RunReport),
    /// The confirmation gate declined; nothing was written or generated.
    Cancelled,
}

/// Drives chunking, dispatch, caching and merging for a document.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use slabmap::{OpenAiClient, Orchestrator, RunOutcome};
///
/// # async fn example() -> slabmap::Result<()> {
/// let client = OpenAiClient::new(std::env::var("OPENAI_API_KEY").unwrap_or_default())?;
/// let outcome = Orchestrator::new(Arc::new(client))
///     .process("Keep only lines mentioning errors.", "server.log")
///     .await?;
///
/// if let RunOutcome::Completed(report) = outcome {
///     println!("{} chunks -> {}", report.chunks, report.output.display());
/// }
/// # Ok(())
/// # }
/// ```
pub struct Orchestrator {
    generator: Arc<dyn Generator>,
    cache: Arc<dyn CacheStore>,
    counter: Option<Arc<dyn TokenCounter>>,
    confirm: Option<Arc<dyn Confirm>>,
    config: RunConfig,
}

impl Orchestrator {
    /// Orchestrator with the on-disk cache, the `cl100k_base` counter and the
    /// default configuration.
    #[must_use]
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self {
            generator,
            cache: Arc::new(DiskCache::new()),
            counter: None,
            confirm: None,
            config: RunConfig::default(),
        }
    }

    /// Use another cache store.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = cache;
        self
    }

    /// Use another token counter.
    #[must_use]
    pub fn with_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.counter = Some(counter);
        self
    }

    /// Replace the configuration.
    #[must_use]
    pub fn with_config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    /// Ask `confirm` before any chunk is dispatched.
    ///
    /// The gate runs on the blocking pool, so it may read from a terminal.
    #[must_use]
    pub fn with_confirmation(mut self, confirm: impl Confirm + 'static) -> Self {
        self.confirm = Some(Arc::new(confirm));
        self
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Apply `prompt` to every chunk of `document` and merge the results.
    ///
    /// # Errors
    ///
    /// - [`Error::DocumentRead`] if the document cannot be read.
    /// - [`Error::Chunking`] if no token counter is available.
    /// - [`Error::Generation`] or [`Error::Task`] if any chunk fails.
    /// - [`Error::Task`] if the confirmation gate panics.
    /// - [`Error::MergeWrite`] if the merged output cannot be written.
    pub async fn process(&self, prompt: &str, document: impl AsRef<Path>) -> Result<RunOutcome> {
        let document = document.as_ref();
        info!(path = %document.display(), "processing document");

        let text = tokio::fs::read_to_string(document)
            .await
            .map_err(|source| Error::DocumentRead {
                path: document.to_path_buf(),
                source,
            })?;

        let counter = self.counter()?;
        let estimate = TokenEstimate::measure(&*counter, &text);
        info!(bytes = estimate.bytes, tokens = estimate.tokens, "estimated document size");
        for (model, cost) in estimate.costs(&self.config.prices) {
            info!(model = %model, "estimated input cost: ${cost:.4}");
        }

        let slabs = TokenChunker::new(self.config.budget, counter).chunk(&text);
        info!(chunks = slabs.len(), budget = self.config.budget.get(), "split document");

        let key = DocumentKey::from_path(document);
        let (mut results, pending) = self.lookup(&key, slabs);
        let cached = results.len() - pending.len();
        if cached > 0 {
            info!(cached, pending = pending.len(), "found cached results");
        }

        if let Some(confirm) = &self.confirm {
            let plan = RunPlan {
                document: document.to_path_buf(),
                chunks: results.len(),
                cached,
                estimate,
                cost: self.config.prices.cost(&self.config.model, estimate.tokens),
            };
            let confirm = Arc::clone(confirm);
            let proceed = tokio::task::spawn_blocking(move || confirm.confirm(&plan))
                .await
                .map_err(|source| Error::Task { source })?;
            if !proceed {
                info!("processing cancelled by user");
                return Ok(RunOutcome::Cancelled);
            }
        }

        let progress = Arc::new(Progress::new(results.len()));
        for (i, _) in results.iter().enumerate().filter(|(_, r)| r.is_some()) {
            progress.advance(i + 1, true);
        }

        let generated = pending.len();
        self.dispatch(&key, prompt, pending, &mut results, &progress)
            .await?;

        debug_assert!(results.iter().all(Option::is_some));
        let combined: String = results.into_iter().flatten().collect();

        let output = key.combined_output();
        tokio::fs::write(&output, combined)
            .await
            .map_err(|source| Error::MergeWrite {
                path: output.clone(),
                source,
            })?;
        info!(path = %output.display(), "combined results written");

        Ok(RunOutcome::Completed(RunReport {
            output,
            chunks: progress.total,
            cached,
            generated,
            estimate,
        }))
    }

    fn counter(&self) -> Result<Arc<dyn TokenCounter>> {
        match &self.counter {
            Some(counter) => Ok(Arc::clone(counter)),
            None => Cl100kCounter::shared()
                .map(|c| c as Arc<dyn TokenCounter>)
                .map_err(|e| Error::Chunking(Box::new(e))),
        }
    }

    /// Fill results from the cache; return the slabs that still need work.
    fn lookup(&self, key: &DocumentKey, slabs: Vec<Slab>) -> (Vec<Option<String>>, Vec<Slab>) {
        let mut results = vec![None; slabs.len()];
        let mut pending = Vec::new();

        for slab in slabs {
            match self.cache.get(key, slab.index) {
                Ok(Some(result)) => {
                    debug!(index = slab.index, "using cached result");
                    results[slab.index - 1] = Some(result);
                }
                Ok(None) => pending.push(slab),
                Err(e) => {
                    warn!(index = slab.index, error = %e, "unreadable cached result, regenerating");
                    pending.push(slab);
                }
            }
        }

        (results, pending)
    }

    async fn dispatch(
        &self,
        key: &DocumentKey,
        prompt: &str,
        pending: Vec<Slab>,
        results: &mut [Option<String>],
        progress: &Arc<Progress>,
    ) -> Result<()> {
        if pending.is_empty() {
            return Ok(());
        }
        info!(chunks = pending.len(), "starting parallel processing");

        let job = Arc::new(ChunkJob {
            generator: Arc::clone(&self.generator),
            cache: Arc::clone(&self.cache),
            key: key.clone(),
            model: self.config.model.clone(),
            system: format!("{prompt}\n{KEEP_LINES_INSTRUCTION}"),
            cancel: CancellationToken::new(),
            limiter: self.config.max_concurrency.map(|n| Semaphore::new(n.get())),
            progress: Arc::clone(progress),
        });

        let mut tasks = JoinSet::new();
        for slab in pending {
            let job = Arc::clone(&job);
            tasks.spawn(async move { job.run(slab).await });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined.map_err(|source| Error::Task { source }).and_then(|r| r) {
                Ok(Some((index, text))) => results[index - 1] = Some(text),
                Ok(None) => {}
                Err(e) => {
                    error!(error = %e, "chunk failed, cancelling remaining work");
                    job.cancel.cancel();
                    tasks.abort_all();
                    return Err(e);
                }
            }
        }

        Ok(())
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("confirm", &self.confirm.is_some())
            .finish_non_exhaustive()
    }
}

/// State shared by every chunk task of one run.
struct ChunkJob {
    generator: Arc<dyn Generator>,
    cache: Arc<dyn CacheStore>,
    key: DocumentKey,
    model: Model,
    system: String,
    cancel: CancellationToken,
    limiter: Option<Semaphore>,
    progress: Arc<Progress>,
}

impl ChunkJob {
    /// Generate and cache one slab. `None` means the run was cancelled first.
    async fn run(&self, slab: Slab) -> Result<Option<(usize, String)>> {
        let index = slab.index;

        let _permit = match &self.limiter {
            Some(limiter) => tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Ok(None),
                permit = limiter.acquire() => permit.ok(),
            },
            None => None,
        };

        if self.cancel.is_cancelled() {
            return Ok(None);
        }

        if let Err(e) = self.cache.record_chunk(&self.key, index, &slab.text) {
            warn!(index, error = %e, "failed to record chunk");
        }

        debug!(index, tokens = slab.tokens, "processing chunk");
        let request = GenerationRequest {
            model: self.model.clone(),
            system: self.system.clone(),
            user: slab.text,
        };

        let generated = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Ok(None),
            generated = self.generator.generate(&request) => generated,
        };

        let text = generated
            .and_then(|text| {
                if text.is_empty() {
                    Err(GenerationError::EmptyResponse)
                } else {
                    Ok(text)
                }
            })
            .map_err(|source| {
                // siblings waiting on the limiter must see this before our permit frees
                self.cancel.cancel();
                Error::Generation { index, source }
            })?;

        match self.cache.put(&self.key, index, &text) {
            Ok(()) => debug!(index, "result cached"),
            Err(e) => warn!(index, error = %e, "failed to cache result"),
        }

        self.progress.advance(index, false);
        Ok(Some((index, text)))
    }
}

/// Completion tally shared by chunk tasks.
struct Progress {
    completed: AtomicUsize,
    total: usize,
}

impl Progress {
    fn new(total: usize) -> Self {
        Self {
            completed: AtomicUsize::new(0),
            total,
        }
    }

    fn advance(&self, index: usize, cached: bool) {
        let done = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        let percent = done as f64 / self.total as f64 * 100.0;
        info!(
            index,
            cached,
            "progress: {done}/{} chunks completed ({percent:.1}%)",
            self.total
        );
    }
}

/// Process `document` with the `OpenAI` backend and the on-disk cache.
///
/// The credential is checked before anything touches the filesystem.
///
/// # Errors
///
/// [`Error::Precondition`] for a blank `api_key`, otherwise as
/// [`Orchestrator::process`].
pub async fn process(
    api_key: &str,
    config: RunConfig,
    prompt: &str,
    document: impl AsRef<Path>,
) -> Result<RunOutcome> {
    let client = OpenAiClient::new(api_key)?;
    Orchestrator::new(Arc::new(client))
        .with_config(config)
        .process(prompt, document)
        .await
}
