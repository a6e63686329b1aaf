//! Token-budgeted line chunking.
//!
//! Lines are the unit the downstream prompt reasons about ("return the lines
//! you want to keep"), so chunks are built from whole lines whenever possible.
//!
//! ## The Algorithm
//!
//! ```text
//! budget = 10
//!
//! line 1 (4 units)  -> buffer [1]            4
//! line 2 (5 units)  -> buffer [1, 2]         9
//! line 3 (3 units)  -> 12 > 10, close [1, 2]; buffer [3]   3
//! line 4 (23 units) -> close [3]; line alone exceeds the budget:
//!                        words of line 4 -> [w1..w9] [w10..w18] emitted
//!                        remainder [w19..w23] seeds the next buffer
//! line 5 (2 units)  -> buffer [w19..w23, 5]
//! end               -> close buffer
//! ```
//!
//! Every chunk ends up at or under the budget, except a fragment made of a
//! single word that is over budget on its own.
//!
//! ## Fidelity
//!
//! Joining the chunks with `"\n"` gives back the original lines. Pieces cut
//! out of an oversized line are whitespace-normalized: the words survive,
//! their original spacing does not. A run of blank lines that would form a
//! chunk on its own is dropped rather than sent as an empty payload.

use std::sync::Arc;

use crate::{Chunker, Cl100kCounter, Result, Slab, SlabOrigin, TokenBudget, TokenCounter};

/// Greedy line accumulator measured in sub-word units.
///
/// ## Example
///
/// ```rust
/// use std::sync::Arc;
/// use slabmap::{Chunker, Cl100kCounter, TokenBudget, TokenChunker};
///
/// let counter = Arc::new(Cl100kCounter::new().unwrap());
/// let chunker = TokenChunker::new(TokenBudget::new(1000).unwrap(), counter);
///
/// let slabs = chunker.chunk("a\nb\nc\n");
/// assert_eq!(slabs.len(), 1);
/// assert_eq!(slabs[0].text, "a\nb\nc");
/// assert_eq!(slabs[0].index, 1);
/// ```
#[derive(Clone)]
pub struct TokenChunker {
    budget: TokenBudget,
    counter: Arc<dyn TokenCounter>,
}

impl TokenChunker {
    /// Create a chunker that keeps every chunk within `budget` as measured by
    /// `counter`.
    #[must_use]
    pub fn new(budget: TokenBudget, counter: Arc<dyn TokenCounter>) -> Self {
        Self { budget, counter }
    }

    /// The configured budget.
    #[must_use]
    pub fn budget(&self) -> TokenBudget {
        self.budget
    }

    /// Split a line that is over budget by itself on word boundaries.
    ///
    /// Full pieces are pushed to `slabs`; the trailing piece is returned with
    /// its unit count so it can seed the next buffer.
    fn split_line(&self, line: &str, slabs: &mut Vec<Slab>) -> Option<(String, usize)> {
        let mut piece = String::new();
        let mut piece_tokens = 0;

        for word in line.split_whitespace() {
            let with_space = format!("{word} ");
            let word_tokens = self.counter.count(&with_space);

            if self.budget.would_overflow(piece_tokens, word_tokens) && !piece.is_empty() {
                push(slabs, piece.trim(), piece_tokens, SlabOrigin::LineFragment);
                piece = with_space;
                piece_tokens = word_tokens;
            } else {
                piece.push_str(&with_space);
                piece_tokens += word_tokens;
            }
        }

        if piece.is_empty() {
            return None;
        }

        let seed = format!("{}\n", piece.trim());
        let seed_tokens = self.counter.count(&seed);
        Some((seed, seed_tokens))
    }
}

impl std::fmt::Debug for TokenChunker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenChunker")
            .field("budget", &self.budget)
            .finish_non_exhaustive()
    }
}

impl Chunker for TokenChunker {
    fn chunk(&self, text: &str) -> Vec<Slab> {
        let mut slabs = Vec::new();
        let mut current = String::new();
        let mut current_tokens = 0;

        for line in text.lines() {
            let with_newline = format!("{line}\n");
            let line_tokens = self.counter.count(&with_newline);

            if self.budget.would_overflow(current_tokens, line_tokens) && !current.is_empty() {
                close(&mut slabs, &current, current_tokens);
                current = with_newline;
                current_tokens = line_tokens;
            } else {
                current.push_str(&with_newline);
                current_tokens += line_tokens;
            }

            // The buffer now holds exactly this line.
            if self.budget.exceeds(line_tokens) {
                if let Some((seed, seed_tokens)) = self.split_line(line, &mut slabs) {
                    current = seed;
                    current_tokens = seed_tokens;
                }
            }
        }

        close(&mut slabs, &current, current_tokens);

        slabs
    }

    fn estimate_chunks(&self, text_len: usize) -> usize {
        // ~4 bytes per unit for English prose
        (text_len / 4).div_ceil(self.budget.get()).max(1)
    }
}

fn push(slabs: &mut Vec<Slab>, text: &str, tokens: usize, origin: SlabOrigin) {
    let index = slabs.len() + 1;
    slabs.push(Slab::new(text, index, tokens, origin));
}

/// Emit a line buffer. Buffers holding only blank lines are dropped.
fn close(slabs: &mut Vec<Slab>, buffer: &str, tokens: usize) {
    let text = strip_newline(buffer);
    if !text.trim().is_empty() {
        push(slabs, text, tokens, SlabOrigin::Lines);
    }
}

fn strip_newline(buffer: &str) -> &str {
    buffer.strip_suffix('\n').unwrap_or(buffer)
}

/// Split `text` into chunks of at most `max_tokens_per_chunk` `cl100k_base`
/// units.
///
/// ```rust
/// let chunks = slabmap::split_into_token_chunks("Line 1\nLine 2\nLine 3", 1000).unwrap();
/// assert_eq!(chunks, vec!["Line 1\nLine 2\nLine 3"]);
/// ```
///
/// # Errors
///
/// Returns [`crate::Error::InvalidBudget`] for a zero budget and
/// [`crate::Error::EstimationUnavailable`] if the encoder cannot be loaded.
pub fn split_into_token_chunks(text: &str, max_tokens_per_chunk: usize) -> Result<Vec<String>> {
    let budget = TokenBudget::new(max_tokens_per_chunk)?;
    let counter: Arc<dyn TokenCounter> = Cl100kCounter::shared()?;
    let chunker = TokenChunker::new(budget, counter);

    Ok(chunker.chunk(text).into_iter().map(|slab| slab.text).collect())
}
