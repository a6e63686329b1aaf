//! Token estimation and cost projection.
//!
//! Pricing is configuration, not a process-wide constant: a [`PriceTable`] is
//! handed to the orchestrator through [`crate::RunConfig`], so a deployment or
//! a test can price models however it likes.
//!
//! ```rust
//! use slabmap::{Model, PriceTable};
//!
//! let prices = PriceTable::new().with_price(Model::custom("local"), 2.0);
//! assert_eq!(prices.cost(&Model::custom("local"), 500_000), Some(1.0));
//! assert_eq!(prices.cost(&Model::GPT5, 500_000), None);
//! ```

use std::collections::BTreeMap;

use crate::{Model, TokenCounter};

/// Input price per million tokens, in USD, keyed by model.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceTable {
    per_million: BTreeMap<Model, f64>,
}

impl PriceTable {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            per_million: BTreeMap::new(),
        }
    }

    /// Set the price of `model` (USD per million input tokens).
    #[must_use]
    pub fn with_price(mut self, model: Model, usd_per_million: f64) -> Self {
        self.per_million.insert(model, usd_per_million);
        self
    }

    /// Price of `model`, if known.
    #[must_use]
    pub fn price(&self, model: &Model) -> Option<f64> {
        self.per_million.get(model).copied()
    }

    /// Projected input cost of `tokens` on `model`, if the model is priced.
    #[must_use]
    pub fn cost(&self, model: &Model, tokens: usize) -> Option<f64> {
        self.price(model).map(|p| tokens as f64 * p / 1_000_000.0)
    }

    /// All priced models, in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&Model, f64)> {
        self.per_million.iter().map(|(m, p)| (m, *p))
    }

    /// Number of priced models.
    #[must_use]
    pub fn len(&self) -> usize {
        self.per_million.len()
    }

    /// Whether no model is priced.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.per_million.is_empty()
    }
}

impl Default for PriceTable {
    /// Published input prices of the stock models.
    fn default() -> Self {
        Self::new()
            .with_price(Model::GPT5_NANO, 0.05)
            .with_price(Model::GPT5_MINI, 0.25)
            .with_price(Model::GPT5, 1.25)
            .with_price(Model::GPT51, 1.25)
    }
}

/// Size of a text in bytes and units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TokenEstimate {
    /// Size in bytes.
    pub bytes: usize,
    /// Size in sub-word units.
    pub tokens: usize,
}

impl TokenEstimate {
    /// Measure `text` with `counter`.
    #[must_use]
    pub fn measure(counter: &dyn TokenCounter, text: &str) -> Self {
        Self {
            bytes: text.len(),
            tokens: counter.count(text),
        }
    }

    /// Projected cost of this text on every model in `prices`.
    #[must_use]
    pub fn costs(&self, prices: &PriceTable) -> Vec<(Model, f64)> {
        prices
            .iter()
            .map(|(model, p)| (model.clone(), self.tokens as f64 * p / 1_000_000.0))
            .collect()
    }
}
