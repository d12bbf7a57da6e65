//! Validated run and model configuration.
use crate::error::Error;
use crate::strategy::{
    Aggregation, DiffType, Evaluate, EvaluationStrategy, IsmOptions, MaskingOptions,
    Perturbation, Scope, StrandMerge, DEFAULT_FLANK,
};
use crate::window::Anchor;
use crate::Result;
use std::path::PathBuf;
use std::time::Duration;

/// Default window length in bases
pub const DEFAULT_WINDOW_LENGTH: usize = 101;
/// Default number of variants per batch
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Options recognised by a run
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    /// Bases per sequence window
    pub window_length: usize,
    /// Variants per batch, the last batch may be smaller
    pub batch_size: usize,
    #[allow(missing_docs)]
    pub diff_type: DiffType,
    #[allow(missing_docs)]
    pub evaluation_strategy: EvaluationStrategy,
    /// Abort on the first variant failure
    pub fail_fast: bool,
    /// Batches processed concurrently
    pub num_workers: usize,
    /// Placement of the variant inside the window
    pub anchor: Anchor,
    /// Checked between batches
    pub timeout: Option<Duration>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            window_length: DEFAULT_WINDOW_LENGTH,
            batch_size: DEFAULT_BATCH_SIZE,
            diff_type: DiffType::Diff,
            evaluation_strategy: EvaluationStrategy::default(),
            fail_fast: false,
            num_workers: 1,
            anchor: Anchor::Center,
            timeout: None,
        }
    }
}

impl RunConfig {
    /// Checks the options are usable together
    pub fn validate(&self) -> Result<()> {
        if self.window_length == 0 {
            return Err(Error::Config("window length must be at least 1".to_string()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch size must be at least 1".to_string()));
        }
        if self.num_workers == 0 {
            return Err(Error::Config("number of workers must be at least 1".to_string()));
        }
        if self.evaluation_strategy.scope() == Some(Scope::Flank(0)) {
            return Err(Error::Config(format!(
                "{} perturbation needs a flank of at least 1 base",
                self.evaluation_strategy.name()
            )));
        }
        if let Anchor::Offset(offset) = self.anchor {
            if offset >= self.window_length {
                return Err(Error::Config(format!(
                    "anchor offset {} does not fit in a window of {} bases",
                    offset, self.window_length
                )));
            }
        }
        Ok(())
    }
}

/// Files making up a model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelConfig {
    /// JSON motif weights
    pub weights: PathBuf,
}

impl ModelConfig {
    /// Fails if the weights file is missing
    pub fn validate(&self) -> Result<()> {
        if self.weights.is_file() {
            Ok(())
        } else {
            Err(Error::Config(format!(
                "model weights {} do not exist",
                self.weights.display()
            )))
        }
    }
}

/// Builds an evaluation strategy from its textual options. A `flank` scope without an
/// explicit `flank` covers [`DEFAULT_FLANK`] bases either side of the allele.
pub fn strategy_from_options(
    name: &str,
    perturbation: &str,
    scope: &str,
    flank: Option<usize>,
    aggregation: &str,
    strand: &str,
) -> Result<EvaluationStrategy> {
    let scope = match scope {
        "flank" => Scope::Flank(flank.unwrap_or(DEFAULT_FLANK)),
        "window" => Scope::Window,
        other => return Err(Error::Config(format!("unknown scope `{}`", other))),
    };
    let aggregation: Aggregation = aggregation.parse()?;
    let strand: StrandMerge = strand.parse()?;
    match name {
        "ism" => Ok(EvaluationStrategy::Ism(IsmOptions {
            perturbation: perturbation.parse::<Perturbation>()?,
            scope,
            aggregation,
            strand,
        })),
        "masking" => Ok(EvaluationStrategy::Masking(MaskingOptions {
            scope,
            aggregation,
            strand,
        })),
        other => Err(Error::Config(format!(
            "unknown evaluation strategy `{}`",
            other
        ))),
    }
}
