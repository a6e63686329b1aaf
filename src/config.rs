//! Command-line configuration for the `slabmap` binary.
//!
//! Every flag can also come from the environment (a `.env` file is honoured
//! by the binary). The credential is only ever read from `OPENAI_API_KEY`.

use std::num::NonZeroUsize;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::{Model, PriceTable, Result, RunConfig, TokenBudget};

/// Map a prompt over a large text file, one token-budgeted chunk at a time.
#[derive(Parser, Debug, Clone)]
#[command(name = "slabmap", version, about)]
pub struct CliArgs {
    /// What to do.
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Apply a prompt to every chunk of a file and merge the results
    Run(RunArgs),

    /// Delete the cached chunks and results of a file
    Clean {
        /// The file whose cache should be removed
        file: PathBuf,
    },
}

/// Arguments of `slabmap run`.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Transformation applied to each chunk
    pub prompt: String,

    /// File to process
    pub file: PathBuf,

    /// Model every chunk is sent to
    ///
    /// Environment variable: `SLABMAP_MODEL`
    #[arg(long, env = "SLABMAP_MODEL", default_value_t = Model::GPT5_NANO)]
    pub model: Model,

    /// Maximum tokens per chunk
    ///
    /// Environment variable: `SLABMAP_BUDGET`
    #[arg(long, env = "SLABMAP_BUDGET", default_value_t = 2000)]
    pub budget: usize,

    /// Maximum simultaneous generation calls (0 = unbounded)
    ///
    /// Environment variable: `SLABMAP_CONCURRENCY`
    #[arg(long, env = "SLABMAP_CONCURRENCY", default_value_t = 0)]
    pub concurrency: usize,

    /// Skip the confirmation prompt
    #[arg(short, long, default_value_t = false)]
    pub yes: bool,

    /// API key for the generation service
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true, default_value = "")]
    pub api_key: String,

    /// Alternative API root
    #[arg(long, env = "OPENAI_API_BASE")]
    pub api_base: Option<String>,
}

impl TryFrom<&RunArgs> for RunConfig {
    type Error = crate::Error;

    fn try_from(args: &RunArgs) -> Result<Self> {
        Ok(Self {
            budget: TokenBudget::new(args.budget)?,
            model: args.model.clone(),
            prices: PriceTable::default(),
            max_concurrency: NonZeroUsize::new(args.concurrency),
        })
    }
}
