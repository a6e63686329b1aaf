//! The Slab type: one bounded unit of work cut from a document.

/// How a slab was assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlabOrigin {
    /// Whole lines accumulated up to the budget.
    Lines,
    /// A word-boundary piece of a single line that was over budget by itself.
    LineFragment,
}

/// A chunk of a document, sized to fit the generation service's input limit.
///
/// Slabs are numbered from 1 in document order. The index doubles as the
/// cache slot for the slab's result, so it must stay stable across runs of
/// the same document.
///
/// ```rust
/// use slabmap::{Slab, SlabOrigin};
///
/// let slab = Slab::new("first line\nsecond line", 1, 6, SlabOrigin::Lines);
/// assert_eq!(slab.index, 1);
/// assert_eq!(slab.to_string(), "Slab { index: 1, tokens: 6, len: 22 }");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slab {
    /// The chunk text.
    pub text: String,
    /// One-based position of this chunk in the document.
    pub index: usize,
    /// Units tallied for this chunk while it was accumulated.
    pub tokens: usize,
    /// Whether this chunk holds whole lines or a fragment of one.
    pub origin: SlabOrigin,
}

impl Slab {
    /// Create a new slab.
    #[must_use]
    pub fn new(text: impl Into<String>, index: usize, tokens: usize, origin: SlabOrigin) -> Self {
        Self {
            text: text.into(),
            index,
            tokens,
            origin,
        }
    }

    /// The length of this chunk in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.text.len()
    }

    /// Whether this chunk is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Whether this chunk was cut out of an oversized line.
    #[must_use]
    pub fn is_fragment(&self) -> bool {
        self.origin == SlabOrigin::LineFragment
    }
}

impl std::fmt::Display for Slab {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Slab {{ index: {}, tokens: {}, len: {} }}",
            self.index,
            self.tokens,
            self.len()
        )
    }
}
