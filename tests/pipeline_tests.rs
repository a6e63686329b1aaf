//! End-to-end runs of the orchestrator against a scripted generator.

use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use slabmap::{
    clear_cache, CacheStore, DocumentKey, Error, GenerationError, GenerationRequest, Generator,
    MemoryCache, Model, Orchestrator, RunConfig, RunOutcome, RunPlan, RunReport, TokenBudget,
    TokenCounter, KEEP_LINES_INSTRUCTION,
};
use tempfile::TempDir;

// =============================================================================
// Fixtures
// =============================================================================

enum Behavior {
    /// Answer every chunk with the same text.
    Fixed(&'static str),
    /// Answer `[<chunk>]` followed by a newline.
    Echo,
    /// Fail every call.
    Fail(&'static str),
    /// Fail calls whose chunk contains the marker, echo the rest.
    FailOn(&'static str),
    /// Answer with an empty string.
    Empty,
}

struct MockGenerator {
    behavior: Behavior,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl MockGenerator {
    fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        // let siblings interleave; longer chunks finish later
        for _ in 0..request.user.len() % 7 + 1 {
            tokio::task::yield_now().await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match &self.behavior {
            Behavior::Fixed(text) => Ok((*text).to_string()),
            Behavior::Echo => Ok(format!("[{}]\n", request.user)),
            Behavior::Fail(message) => Err(GenerationError::Backend((*message).to_string())),
            Behavior::FailOn(marker) if request.user.contains(marker) => {
                Err(GenerationError::Backend(format!("refused {marker}")))
            }
            Behavior::FailOn(_) => Ok(format!("[{}]\n", request.user)),
            Behavior::Empty => Ok(String::new()),
        }
    }
}

/// One unit per whitespace-delimited word.
struct WordCounter;

impl TokenCounter for WordCounter {
    fn count(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}

fn write_doc(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).unwrap();
    path
}

/// Twelve two-word lines; with a budget of 4 that is six chunks.
fn six_chunk_doc() -> String {
    (1..=12)
        .map(|i| format!("line{i} text{i}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn small_budget(generator: Arc<MockGenerator>) -> Orchestrator {
    Orchestrator::new(generator)
        .with_counter(Arc::new(WordCounter))
        .with_config(RunConfig {
            budget: TokenBudget::new(4).unwrap(),
            ..RunConfig::default()
        })
}

fn completed(outcome: RunOutcome) -> RunReport {
    match outcome {
        RunOutcome::Completed(report) => report,
        RunOutcome::Cancelled => panic!("run was cancelled"),
    }
}

fn count_files(dir: &Path, prefix: &str) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(prefix))
        .count()
}

// =============================================================================
// Success paths
// =============================================================================

#[tokio::test]
async fn single_chunk_writes_combined_output() {
    let dir = TempDir::new().unwrap();
    let doc = write_doc(&dir, "test.txt", "Line 1\nLine 2\nLine 3\nLine 4\nLine 5");
    let generator = MockGenerator::new(Behavior::Fixed("Filtered content"));

    let report = completed(
        Orchestrator::new(generator.clone())
            .process("Keep only important lines", &doc)
            .await
            .unwrap(),
    );

    assert_eq!(report.output, dir.path().join("test.combined_results.txt"));
    assert_eq!(fs::read_to_string(&report.output).unwrap(), "Filtered content");
    assert_eq!(report.chunks, 1);
    assert_eq!(report.generated, 1);
    assert_eq!(generator.calls(), 1);

    let key = DocumentKey::from_path(&doc);
    assert!(key.chunk_path(1).exists());
    assert_eq!(fs::read_to_string(key.result_path(1)).unwrap(), "Filtered content");
}

#[tokio::test]
async fn request_carries_prompt_and_model() {
    let dir = TempDir::new().unwrap();
    let doc = write_doc(&dir, "doc.txt", "alpha\nbeta");
    let generator = MockGenerator::new(Behavior::Echo);

    Orchestrator::new(generator.clone())
        .with_config(RunConfig {
            model: Model::GPT5_MINI,
            ..RunConfig::default()
        })
        .process("Drop greek letters", &doc)
        .await
        .unwrap();

    let requests = generator.requests.lock();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].model, Model::GPT5_MINI);
    assert_eq!(
        requests[0].system,
        format!("Drop greek letters\n{KEEP_LINES_INSTRUCTION}")
    );
    assert_eq!(requests[0].user, "alpha\nbeta");
}

#[tokio::test]
async fn multiple_chunks_merge_in_document_order() {
    let dir = TempDir::new().unwrap();
    let text = six_chunk_doc();
    let doc = write_doc(&dir, "large.txt", &text);
    let generator = MockGenerator::new(Behavior::Echo);

    let report = completed(small_budget(generator.clone()).process("p", &doc).await.unwrap());

    assert_eq!(report.chunks, 6);
    assert_eq!(generator.calls(), 6);

    let expected: String = text
        .lines()
        .collect::<Vec<_>>()
        .chunks(2)
        .map(|pair| format!("[{}]\n", pair.join("\n")))
        .collect();
    assert_eq!(fs::read_to_string(&report.output).unwrap(), expected);

    let cache_dir = dir.path().join("large");
    assert_eq!(count_files(&cache_dir, "chunk"), 6);
    assert_eq!(count_files(&cache_dir, "result"), 6);
}

#[tokio::test]
async fn long_line_at_default_budget() {
    let dir = TempDir::new().unwrap();
    let doc = write_doc(&dir, "words.txt", &"word ".repeat(3000));
    let generator = MockGenerator::new(Behavior::Fixed("kept"));

    let report = completed(
        Orchestrator::new(generator.clone())
            .process("Keep every line", &doc)
            .await
            .unwrap(),
    );

    assert!(report.chunks >= 2, "got {} chunks", report.chunks);
    assert_eq!(generator.calls(), report.chunks);

    let cache_dir = dir.path().join("words");
    assert_eq!(
        count_files(&cache_dir, "chunk"),
        count_files(&cache_dir, "result")
    );
    assert_eq!(count_files(&cache_dir, "result"), report.chunks);
}

#[tokio::test]
async fn leading_blank_line_is_not_sent() {
    let dir = TempDir::new().unwrap();
    let doc = write_doc(&dir, "blank.txt", &format!("\n{}", "word ".repeat(3000)));
    let generator = MockGenerator::new(Behavior::Echo);

    let report = completed(Orchestrator::new(generator.clone()).process("p", &doc).await.unwrap());

    assert!(report.chunks >= 2);
    let requests = generator.requests.lock();
    assert_eq!(requests.len(), report.chunks);
    assert!(requests.iter().all(|r| !r.user.trim().is_empty()));
}

#[tokio::test]
async fn second_run_uses_cache() {
    let dir = TempDir::new().unwrap();
    let doc = write_doc(&dir, "cached.txt", &six_chunk_doc());
    let generator = MockGenerator::new(Behavior::Echo);
    let orchestrator = small_budget(generator.clone());

    let first = completed(orchestrator.process("p", &doc).await.unwrap());
    let first_output = fs::read(&first.output).unwrap();
    assert_eq!(generator.calls(), 6);

    let second = completed(orchestrator.process("p", &doc).await.unwrap());
    assert_eq!(generator.calls(), 6, "second run should not generate");
    assert_eq!(second.cached, 6);
    assert_eq!(second.generated, 0);
    assert_eq!(fs::read(&second.output).unwrap(), first_output);
}

#[tokio::test]
async fn empty_document_makes_no_calls() {
    let dir = TempDir::new().unwrap();
    let doc = write_doc(&dir, "empty.txt", "");
    let generator = MockGenerator::new(Behavior::Echo);

    let report = completed(Orchestrator::new(generator.clone()).process("p", &doc).await.unwrap());

    assert_eq!(report.chunks, 0);
    assert_eq!(generator.calls(), 0);
    assert_eq!(fs::read_to_string(&report.output).unwrap(), "");
}

#[tokio::test]
async fn memory_cache_replaces_disk() {
    let dir = TempDir::new().unwrap();
    let doc = write_doc(&dir, "mem.txt", &six_chunk_doc());
    let generator = MockGenerator::new(Behavior::Echo);
    let cache = Arc::new(MemoryCache::new());

    let orchestrator = small_budget(generator.clone()).with_cache(cache.clone());
    completed(orchestrator.process("p", &doc).await.unwrap());
    completed(orchestrator.process("p", &doc).await.unwrap());

    assert_eq!(generator.calls(), 6);
    assert_eq!(cache.len(), 6);
    let key = DocumentKey::from_path(&doc);
    assert_eq!(cache.chunk(&key, 1).as_deref(), Some("line1 text1\nline2 text2"));
    assert!(!key.cache_dir().exists());
}

#[tokio::test]
async fn concurrency_cap_is_respected() {
    let dir = TempDir::new().unwrap();
    let doc = write_doc(&dir, "capped.txt", &six_chunk_doc());
    let generator = MockGenerator::new(Behavior::Echo);

    let orchestrator = small_budget(generator.clone()).with_config(RunConfig {
        budget: TokenBudget::new(4).unwrap(),
        max_concurrency: NonZeroUsize::new(2),
        ..RunConfig::default()
    });
    completed(orchestrator.process("p", &doc).await.unwrap());

    assert_eq!(generator.calls(), 6);
    assert!(generator.peak() <= 2, "peak in flight was {}", generator.peak());
}

// =============================================================================
// Failure paths
// =============================================================================

#[tokio::test]
async fn generation_error_fails_run() {
    let dir = TempDir::new().unwrap();
    let doc = write_doc(&dir, "test.txt", "Some content");
    let generator = MockGenerator::new(Behavior::Fail("mock error"));

    let err = Orchestrator::new(generator)
        .process("p", &doc)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Generation { index: 1, .. }));
    let message = err.to_string();
    assert!(message.contains("mock error"), "{message}");
    assert!(message.contains("chunk 1"), "{message}");
    assert!(!dir.path().join("test.combined_results.txt").exists());
}

#[tokio::test]
async fn empty_response_is_an_error() {
    let dir = TempDir::new().unwrap();
    let doc = write_doc(&dir, "test.txt", "Some content");

    let err = Orchestrator::new(MockGenerator::new(Behavior::Empty))
        .process("p", &doc)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Generation {
            source: GenerationError::EmptyResponse,
            ..
        }
    ));
    assert!(DiskCacheProbe::new(&doc).result(1).is_none());
}

#[tokio::test]
async fn partial_failure_keeps_finished_results() {
    let dir = TempDir::new().unwrap();
    let doc = write_doc(&dir, "partial.txt", &six_chunk_doc());
    let failing = MockGenerator::new(Behavior::FailOn("line5"));

    let err = small_budget(failing.clone())
        .with_config(RunConfig {
            budget: TokenBudget::new(4).unwrap(),
            max_concurrency: NonZeroUsize::new(1),
            ..RunConfig::default()
        })
        .process("p", &doc)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Generation { index: 3, .. }));
    assert!(!dir.path().join("partial.combined_results.txt").exists());
    // chunks queued behind the failure never reach the generator
    assert_eq!(failing.calls(), 3);

    let probe = DiskCacheProbe::new(&doc);
    assert!(probe.result(1).is_some());
    assert!(probe.result(2).is_some());
    assert!(probe.result(3).is_none());

    // a rerun only pays for what never finished
    let retry = MockGenerator::new(Behavior::Echo);
    let report = completed(small_budget(retry.clone()).process("p", &doc).await.unwrap());
    assert!(report.cached >= 2);
    assert_eq!(retry.calls(), report.generated);
    assert_eq!(report.cached + report.generated, 6);
}

#[tokio::test]
async fn cache_write_failure_does_not_fail_run() {
    let dir = TempDir::new().unwrap();
    let text = six_chunk_doc();
    let doc = write_doc(&dir, "unwritable.txt", &text);
    let generator = MockGenerator::new(Behavior::Echo);
    let cache = Arc::new(BrokenCache {
        get_fails: false,
        puts: AtomicUsize::new(0),
    });

    let report = completed(
        small_budget(generator.clone())
            .with_cache(cache.clone())
            .process("p", &doc)
            .await
            .unwrap(),
    );

    assert_eq!(report.generated, 6);
    assert_eq!(cache.puts.load(Ordering::SeqCst), 6);
    let merged = fs::read_to_string(&report.output).unwrap();
    assert_eq!(merged.matches('[').count(), 6);
    assert!(merged.starts_with("[line1 text1\nline2 text2]\n"));
}

#[tokio::test]
async fn unreadable_cached_result_is_regenerated() {
    let dir = TempDir::new().unwrap();
    let doc = write_doc(&dir, "unreadable.txt", &six_chunk_doc());
    let generator = MockGenerator::new(Behavior::Echo);
    let cache = Arc::new(BrokenCache {
        get_fails: true,
        puts: AtomicUsize::new(0),
    });

    let report = completed(
        small_budget(generator.clone())
            .with_cache(cache)
            .process("p", &doc)
            .await
            .unwrap(),
    );

    assert_eq!(report.cached, 0);
    assert_eq!(report.generated, 6);
    assert_eq!(generator.calls(), 6);
}

#[tokio::test]
async fn unwritable_combined_output() {
    let dir = TempDir::new().unwrap();
    let doc = write_doc(&dir, "blocked.txt", "some content");
    fs::create_dir(dir.path().join("blocked.combined_results.txt")).unwrap();
    let generator = MockGenerator::new(Behavior::Echo);

    let err = Orchestrator::new(generator.clone())
        .process("p", &doc)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::MergeWrite { .. }));
    assert!(err.to_string().contains("blocked.combined_results.txt"));
    // the chunk result is kept for the next run
    assert!(DiskCacheProbe::new(&doc).result(1).is_some());
}

#[tokio::test]
async fn missing_document() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nonexistent.txt");
    let generator = MockGenerator::new(Behavior::Echo);

    let err = Orchestrator::new(generator.clone())
        .process("p", &missing)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::DocumentRead { .. }));
    assert!(err.to_string().contains("nonexistent.txt"));
    assert_eq!(generator.calls(), 0);
}

// =============================================================================
// Confirmation
// =============================================================================

#[tokio::test]
async fn declined_confirmation_does_nothing() {
    let dir = TempDir::new().unwrap();
    let doc = write_doc(&dir, "declined.txt", &six_chunk_doc());
    let generator = MockGenerator::new(Behavior::Echo);

    let outcome = small_budget(generator.clone())
        .with_confirmation(|_: &RunPlan| false)
        .process("p", &doc)
        .await
        .unwrap();

    assert_eq!(outcome, RunOutcome::Cancelled);
    assert_eq!(generator.calls(), 0);
    assert!(!dir.path().join("declined").exists());
    assert!(!dir.path().join("declined.combined_results.txt").exists());
}

#[tokio::test]
async fn panicking_confirmation_is_a_task_error() {
    let dir = TempDir::new().unwrap();
    let doc = write_doc(&dir, "panics.txt", "content");
    let generator = MockGenerator::new(Behavior::Echo);

    let err = Orchestrator::new(generator.clone())
        .with_confirmation(|_: &RunPlan| -> bool { panic!("terminal closed") })
        .process("p", &doc)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Task { .. }));
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn plan_reports_cached_chunks() {
    let dir = TempDir::new().unwrap();
    let doc = write_doc(&dir, "plan.txt", &six_chunk_doc());
    let generator = MockGenerator::new(Behavior::Echo);
    completed(small_budget(generator.clone()).process("p", &doc).await.unwrap());

    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    completed(
        small_budget(generator.clone())
            .with_confirmation(move |plan: &RunPlan| {
                *sink.lock() = Some(plan.clone());
                true
            })
            .process("p", &doc)
            .await
            .unwrap(),
    );

    let plan = seen.lock().clone().unwrap();
    assert_eq!(plan.chunks, 6);
    assert_eq!(plan.cached, 6);
    assert_eq!(plan.pending(), 0);
    assert_eq!(plan.estimate.tokens, 24);
    assert!(plan.cost.is_some());
}

// =============================================================================
// Cache maintenance
// =============================================================================

#[tokio::test]
async fn clean_cache_removes_results() {
    let dir = TempDir::new().unwrap();
    let doc = write_doc(&dir, "clean.txt", &six_chunk_doc());
    let generator = MockGenerator::new(Behavior::Echo);
    let orchestrator = small_budget(generator.clone());

    completed(orchestrator.process("p", &doc).await.unwrap());
    assert!(dir.path().join("clean").exists());

    clear_cache(&doc).unwrap();
    assert!(!dir.path().join("clean").exists());

    completed(orchestrator.process("p", &doc).await.unwrap());
    assert_eq!(generator.calls(), 12);
}

#[test]
fn clean_missing_cache_is_ok() {
    let dir = TempDir::new().unwrap();
    assert!(clear_cache(dir.path().join("never-processed.txt")).is_ok());
}

#[tokio::test]
async fn documents_do_not_share_cache() {
    let dir = TempDir::new().unwrap();
    let a = write_doc(&dir, "a.txt", "first document");
    let b = write_doc(&dir, "b.txt", "second document");
    let generator = MockGenerator::new(Behavior::Echo);
    let orchestrator = Orchestrator::new(generator.clone());

    completed(orchestrator.process("p", &a).await.unwrap());
    completed(orchestrator.process("p", &b).await.unwrap());
    assert_eq!(generator.calls(), 2);

    clear_cache(&a).unwrap();
    assert!(DiskCacheProbe::new(&a).result(1).is_none());
    assert_eq!(
        DiskCacheProbe::new(&b).result(1).as_deref(),
        Some("[second document]\n")
    );
}

/// A store whose writes always fail, and optionally its reads too.
struct BrokenCache {
    get_fails: bool,
    puts: AtomicUsize,
}

impl BrokenCache {
    fn error(key: &DocumentKey, index: usize) -> Error {
        Error::Cache {
            path: key.result_path(index),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
        }
    }
}

impl CacheStore for BrokenCache {
    fn get(&self, key: &DocumentKey, index: usize) -> slabmap::Result<Option<String>> {
        if self.get_fails {
            Err(Self::error(key, index))
        } else {
            Ok(None)
        }
    }

    fn put(&self, key: &DocumentKey, index: usize, _result: &str) -> slabmap::Result<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        Err(Self::error(key, index))
    }

    fn clear(&self, _key: &DocumentKey) -> slabmap::Result<()> {
        Ok(())
    }
}

/// Reads results straight from the on-disk layout.
struct DiskCacheProbe(DocumentKey);

impl DiskCacheProbe {
    fn new(doc: &Path) -> Self {
        Self(DocumentKey::from_path(doc))
    }

    fn result(&self, index: usize) -> Option<String> {
        slabmap::DiskCache::new().get(&self.0, index).unwrap()
    }
}
