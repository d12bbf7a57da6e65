#![warn(missing_debug_implementations, rust_2018_idioms, missing_docs)]

//! Scoring of the predicted functional effect of sequence variants. A sequence-to-function
//! model is run on reference and alternate windows around each variant, optionally across
//! in-silico perturbed contexts, and the outputs are reduced to one score per output label.
//!
//! The pipeline streams [`VariantRecord`]s through a [`WindowBuilder`], groups them with
//! the [`Scheduler`] and scores each batch with an [`Evaluate`] strategy before
//! [`aggregate::assemble`] produces the final [`ScoreTable`].

pub mod aggregate;
pub mod config;
pub mod error;
pub mod genomic;
pub mod model;
pub mod pipeline;
pub mod scheduler;
pub mod strategy;
pub mod variant;
pub mod window;

pub use crate::aggregate::{EffectScoreRow, ScoreTable, VariantFailure};
pub use crate::config::{ModelConfig, RunConfig};
pub use crate::error::{Error, ErrorKind};
pub use crate::model::{Model, MotifModel, OutputLabels, OutputSchema, OutputTarget};
pub use crate::pipeline::{ingest, run_pipeline};
pub use crate::scheduler::{RunReport, Scheduler};
pub use crate::strategy::{DiffType, Evaluate, EvaluationStrategy};
pub use crate::variant::{RawVariant, VariantRecord};
pub use crate::window::{Anchor, ReferenceWindowBuilder, SequenceWindow, WindowBuilder};

/// Nucleotide alphabet used, in one-hot column order
pub const NUCLEOTIDES: [u8; 4] = [b'A', b'C', b'G', b'T'];

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, crate::error::Error>;
