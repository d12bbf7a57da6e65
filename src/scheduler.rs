//! Batching of variants, model evaluation and re-association of the scores.
use crate::aggregate::{assemble, ScoreTable, VariantFailure};
use crate::config::RunConfig;
use crate::error::Error;
use crate::model::{Model, OutputLabels};
use crate::strategy::Evaluate;
use crate::variant::VariantRecord;
use crate::window::{SequenceWindow, WindowBuilder};
use crate::Result;
use log::{debug, info, warn};
use rayon::prelude::*;
use std::time::Instant;

/// Outcome of a run: the scored rows and the variants that could not be scored
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    /// One row per scored variant and label
    pub table: ScoreTable,
    /// Per-variant failures, in input order
    pub failures: Vec<VariantFailure>,
}

impl RunReport {
    /// A run without a single scored row but with failures
    pub fn is_failed(&self) -> bool {
        self.table.is_empty() && !self.failures.is_empty()
    }
}

#[derive(Debug)]
enum Outcome {
    Scored(Vec<f64>),
    Failed(VariantFailure),
}

#[derive(Debug)]
struct BatchOutcome {
    index: usize,
    outcomes: Vec<Outcome>,
}

/// Runs an evaluation strategy over consecutive batches of variants
#[derive(Debug, Clone)]
pub struct Scheduler {
    config: RunConfig,
}

impl Scheduler {
    /// Validates the configuration
    pub fn new(config: RunConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    #[allow(missing_docs)]
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Scores every variant, rows follow the input order of `variants` and then the
    /// order of `labels`. Output is identical for any batch size or number of workers.
    /// `labels` must name the model columns in order, otherwise nothing is scored.
    pub fn run(
        &self,
        variants: &[VariantRecord],
        builder: &dyn WindowBuilder,
        strategy: &dyn Evaluate,
        model: &dyn Model,
        labels: &OutputLabels,
    ) -> Result<RunReport> {
        labels.check_schema(model.output_schema())?;
        let started = Instant::now();
        let deadline = self.config.timeout.map(|timeout| started + timeout);
        let batches: Vec<(usize, &[VariantRecord])> =
            variants.chunks(self.config.batch_size).enumerate().collect();
        info!(
            "Scoring {} variants in {} batches with the {} strategy",
            variants.len(),
            batches.len(),
            strategy.name()
        );

        let mut outcomes = if self.config.num_workers > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.num_workers)
                .thread_name(|i| format!("rustyism-worker-{}", i))
                .build()
                .map_err(|_| Error::ThreadError)?;
            pool.install(|| {
                batches
                    .par_iter()
                    .map(|(index, batch)| {
                        self.guarded_batch(
                            *index,
                            batch,
                            deadline,
                            builder,
                            strategy,
                            model,
                            labels,
                        )
                    })
                    .collect::<Result<Vec<BatchOutcome>>>()
            })?
        } else {
            batches
                .iter()
                .map(|(index, batch)| {
                    self.guarded_batch(*index, batch, deadline, builder, strategy, model, labels)
                })
                .collect::<Result<Vec<BatchOutcome>>>()?
        };
        outcomes.sort_by_key(|batch| batch.index);

        let mut scored = Vec::with_capacity(variants.len());
        let mut failures = Vec::new();
        let flattened = outcomes.into_iter().flat_map(|batch| batch.outcomes);
        for (variant, outcome) in variants.iter().zip(flattened) {
            match outcome {
                Outcome::Scored(scores) => scored.push((variant.clone(), scores)),
                Outcome::Failed(failure) => failures.push(failure),
            }
        }

        let table = assemble(&scored, labels, self.config.diff_type)?;
        info!(
            "Scored {} of {} variants ({} rows, {} failures) in {:.2?}",
            scored.len(),
            variants.len(),
            table.len(),
            failures.len(),
            started.elapsed()
        );
        Ok(RunReport { table, failures })
    }

    #[allow(clippy::too_many_arguments)]
    fn guarded_batch(
        &self,
        index: usize,
        batch: &[VariantRecord],
        deadline: Option<Instant>,
        builder: &dyn WindowBuilder,
        strategy: &dyn Evaluate,
        model: &dyn Model,
        labels: &OutputLabels,
    ) -> Result<BatchOutcome> {
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return Err(Error::Timeout(index));
            }
        }
        debug!("Starting batch {} with {} variants", index, batch.len());
        let outcomes = self.run_batch(batch, builder, strategy, model, labels)?;
        debug!("Finished batch {}", index);
        Ok(BatchOutcome { index, outcomes })
    }

    /// Turns a variant error into a failure record, or aborts the run
    fn record(&self, variant: &VariantRecord, error: Error) -> Result<Outcome> {
        if self.config.fail_fast || error.is_systemic() {
            return Err(error);
        }
        warn!("Could not score {}: {}", variant.variant_id(), error);
        Ok(Outcome::Failed(VariantFailure::new(
            variant.variant_id(),
            &error,
        )))
    }

    fn run_batch(
        &self,
        batch: &[VariantRecord],
        builder: &dyn WindowBuilder,
        strategy: &dyn Evaluate,
        model: &dyn Model,
        labels: &OutputLabels,
    ) -> Result<Vec<Outcome>> {
        let diff_type = self.config.diff_type;
        let mut outcomes: Vec<Option<Outcome>> = Vec::with_capacity(batch.len());
        let mut windows: Vec<(usize, SequenceWindow, SequenceWindow)> = Vec::new();

        for (i, variant) in batch.iter().enumerate() {
            match builder.build(variant, self.config.window_length) {
                Ok((ref_window, alt_window)) => {
                    windows.push((i, ref_window, alt_window));
                    outcomes.push(None);
                }
                Err(e) => outcomes.push(Some(self.record(variant, e)?)),
            }
        }

        if strategy.supports_batching() {
            let pairs: Vec<(&SequenceWindow, &SequenceWindow)> =
                windows.iter().map(|(_, r, a)| (r, a)).collect();
            let scores = match strategy.evaluate_batch(model, &pairs, labels, diff_type) {
                Ok(scores) if scores.len() == pairs.len() => scores,
                Ok(scores) => {
                    return Err(Error::ModelInference(format!(
                        "strategy returned {} results for {} variants",
                        scores.len(),
                        pairs.len()
                    )))
                }
                Err(e) if self.config.fail_fast || e.is_systemic() => return Err(e),
                Err(e) => {
                    warn!("Batch of {} variants failed: {}", pairs.len(), e);
                    pairs
                        .iter()
                        .map(|_| Err(Error::ModelInference(e.to_string())))
                        .collect()
                }
            };
            for ((i, _, _), score) in windows.iter().zip(scores) {
                outcomes[*i] = Some(match score {
                    Ok(score) => Outcome::Scored(score),
                    Err(e) => self.record(&batch[*i], e)?,
                });
            }
        } else {
            for (i, ref_window, alt_window) in &windows {
                outcomes[*i] = Some(
                    match strategy.evaluate(model, ref_window, alt_window, labels, diff_type) {
                        Ok(score) => Outcome::Scored(score),
                        Err(e) => self.record(&batch[*i], e)?,
                    },
                );
            }
        }

        outcomes
            .into_iter()
            .map(|outcome| {
                outcome.ok_or_else(|| {
                    Error::ModelInference("variant was not evaluated".to_string())
                })
            })
            .collect()
    }
}
