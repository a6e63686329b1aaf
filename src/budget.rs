//! Per-chunk token budget.
//!
//! Generation services reject inputs above a fixed number of sub-word units,
//! so every chunk is accumulated against a hard ceiling:
//!
//! ```text
//! budget: 10
//!
//! buffer: 7 units   + next line: 2 units  -> 9  fits, append
//! buffer: 9 units   + next line: 4 units  -> 13 overflows, close buffer
//! buffer: 0 units   + line: 14 units      -> line alone exceeds, split on words
//! ```
//!
//! An empty buffer always accepts the next piece, otherwise a single
//! oversized piece would stall the chunker forever.

use std::num::NonZeroUsize;

use crate::{Error, Result};

/// Maximum number of sub-word units permitted per chunk.
///
/// # Examples
///
/// ```rust
/// use slabmap::TokenBudget;
///
/// let budget = TokenBudget::new(2000).unwrap();
/// assert_eq!(budget.get(), 2000);
/// assert!(!budget.would_overflow(1500, 500));
/// assert!(budget.would_overflow(1500, 501));
///
/// assert!(TokenBudget::new(0).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TokenBudget(NonZeroUsize);

impl TokenBudget {
    /// Create a budget.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBudget`] if `units == 0`.
    pub fn new(units: usize) -> Result<Self> {
        NonZeroUsize::new(units)
            .map(Self)
            .ok_or(Error::InvalidBudget(units))
    }

    /// The budget in units.
    #[must_use]
    pub const fn get(&self) -> usize {
        self.0.get()
    }

    /// Whether a piece of `count` units is over budget on its own.
    #[must_use]
    pub const fn exceeds(&self, count: usize) -> bool {
        count > self.0.get()
    }

    /// Whether adding `additional` units to a buffer holding `current` would
    /// exceed the budget.
    #[must_use]
    pub const fn would_overflow(&self, current: usize, additional: usize) -> bool {
        current.saturating_add(additional) > self.0.get()
    }
}

impl Default for TokenBudget {
    fn default() -> Self {
        Self(NonZeroUsize::new(2000).unwrap_or(NonZeroUsize::MIN))
    }
}

impl From<NonZeroUsize> for TokenBudget {
    fn from(units: NonZeroUsize) -> Self {
        Self(units)
    }
}

impl TryFrom<usize> for TokenBudget {
    type Error = Error;

    fn try_from(units: usize) -> Result<Self> {
        Self::new(units)
    }
}

impl std::fmt::Display for TokenBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} tokens", self.0)
    }
}
