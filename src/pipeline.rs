//! Ingestion, scoring and reporting of a whole run.
use crate::aggregate::VariantFailure;
use crate::config::RunConfig;
use crate::model::{Model, OutputLabels};
use crate::scheduler::{RunReport, Scheduler};
use crate::variant::{RawVariant, VariantRecord};
use crate::window::WindowBuilder;
use crate::Result;
use log::{info, warn};

/// Validates raw variants. Rejected records are returned as failures unless `fail_fast`
/// is set, in which case the first one aborts.
pub fn ingest(
    raw: &[RawVariant],
    fail_fast: bool,
) -> Result<(Vec<VariantRecord>, Vec<VariantFailure>)> {
    let mut variants = Vec::with_capacity(raw.len());
    let mut failures = Vec::new();
    for record in raw {
        match VariantRecord::from_raw(record) {
            Ok(variant) => variants.push(variant),
            Err(e) if fail_fast => return Err(e),
            Err(e) => {
                warn!("Skipping variant {}: {}", record.variant_id(), e);
                failures.push(VariantFailure::new(record.variant_id(), &e));
            }
        }
    }
    Ok((variants, failures))
}

/// Ingests `raw`, scores the valid variants with the configured strategy and returns the
/// table. Ingestion failures precede evaluation failures in the report.
pub fn run_pipeline(
    config: &RunConfig,
    raw: &[RawVariant],
    builder: &dyn WindowBuilder,
    model: &dyn Model,
) -> Result<RunReport> {
    let labels = OutputLabels::from_model(model)?;
    info!(
        "Model declares {} outputs: {}",
        labels.len(),
        labels.as_slice().join(", ")
    );
    let scheduler = Scheduler::new(config.clone())?;
    let (variants, mut failures) = ingest(raw, config.fail_fast)?;

    let mut report = scheduler.run(
        &variants,
        builder,
        &config.evaluation_strategy,
        model,
        &labels,
    )?;
    failures.append(&mut report.failures);
    report.failures = failures;
    Ok(report)
}
